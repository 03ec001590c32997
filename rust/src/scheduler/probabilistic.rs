//! Probabilistic backfilling.
//!
//! A candidate may start now if the predicted probability that it delays the head
//! job stays within a threshold. The prediction combines the candidate's own
//! runtime distribution with the chance that the running jobs release enough
//! processors in time, computed by a dynamic program over the running set.

use rustc_hash::FxHashMap;

use crate::models::{Job, Time, UserId};
use crate::{log_checks, log_debug};

use super::core::SchedulerError;
use super::distribution::{round_time_down, round_time_up, Distribution};
use super::policy::{BackfillContext, BackfillPolicy};
use super::state::SchedulerState;

/// Scratch table for the bottleneck dynamic program.
///
/// Reused across decisions; the backing buffer only grows.
#[derive(Clone, Debug, Default)]
struct BottleneckTable {
    cells: Vec<f64>,
    cols: usize,
}

impl BottleneckTable {
    fn reset(&mut self, rows: usize, cols: usize) {
        let needed = rows * cols;
        if self.cells.len() < needed {
            self.cells.resize(needed, 0.0);
        }
        self.cols = cols;
    }

    fn get(&self, row: usize, col: usize) -> f64 {
        self.cells[row * self.cols + col]
    }

    fn set(&mut self, row: usize, col: usize, value: f64) {
        self.cells[row * self.cols + col] = value;
    }
}

pub struct ProbabilisticPolicy {
    num_processors: u32,
    threshold: f64,
    window_size: usize,
    user_distribution: FxHashMap<UserId, Distribution>,
    work_list: BottleneckTable,
    verbosity: u8,
}

impl ProbabilisticPolicy {
    pub fn new(num_processors: u32, threshold: f64, window_size: usize, verbosity: u8) -> Self {
        Self {
            num_processors,
            threshold,
            window_size,
            user_distribution: FxHashMap::default(),
            work_list: BottleneckTable::default(),
            verbosity,
        }
    }

    pub fn distribution(&self, user_id: UserId) -> Option<&Distribution> {
        self.user_distribution.get(&user_id)
    }

    fn user(&self, user_id: UserId) -> Result<&Distribution, SchedulerError> {
        self.user_distribution
            .get(&user_id)
            .ok_or(SchedulerError::UnknownUser { user_id })
    }

    fn user_mut(&mut self, user_id: UserId) -> Result<&mut Distribution, SchedulerError> {
        self.user_distribution
            .get_mut(&user_id)
            .ok_or(SchedulerError::UnknownUser { user_id })
    }

    /// Share of the submitter's history whose runtime bucket is exactly `time`.
    ///
    /// Buckets above `2 * estimate - 1` are left out of the population.
    pub fn probability_to_end_at(&self, time: Time, job: &Job) -> Result<f64, SchedulerError> {
        let distribution = self.user(job.user_id)?;
        let count = distribution
            .count(time)
            .ok_or(SchedulerError::MissingBucket {
                user_id: job.user_id,
                bucket: time,
            })?;

        let horizon = (2 * job.estimated_run_time).saturating_sub(1);
        let last: u64 = distribution
            .bins()
            .range(horizon + 1..)
            .map(|(_, c)| *c)
            .sum();
        let relevant = (distribution.number_of_jobs_added() as f64) - (last as f64) + 1.0;
        if relevant <= 0.0 {
            return Ok(0.0);
        }

        Ok((count as f64 / relevant).clamp(0.0, 1.0))
    }

    /// Probability that a running job has finished within `time` from `current_time`.
    ///
    /// Conditioned on the job having already run for its (rounded) elapsed time.
    pub fn probability_of_running_job_to_end_upto(
        &self,
        time: Time,
        current_time: Time,
        job: &Job,
    ) -> Result<f64, SchedulerError> {
        let start = job
            .start_to_run_at_time
            .ok_or(SchedulerError::JobNotStarted { job_id: job.id })?;
        let elapsed = round_time_down(current_time.saturating_sub(start).max(1));
        let remaining = (job.estimated_run_time + 1).saturating_sub(elapsed).max(1);
        let bound = round_time_down(2 * remaining);

        if time >= bound {
            return Ok(1.0);
        }

        let distribution = self.user(job.user_id)?;
        let horizon = time + elapsed;
        let mut first = 0u64;
        let mut last = 0u64;
        let mut middle = 0.0;

        for (&key, &count) in distribution.bins() {
            let half = key / 2;
            if key > bound {
                last += count;
            } else if key <= elapsed {
                first += count;
            } else if key <= horizon {
                middle += count as f64;
            } else if horizon > half {
                // Straddles the horizon: interpolate within the bucket
                middle += (count * (horizon - half)) as f64 / half as f64;
            }
        }

        let relevant =
            distribution.number_of_jobs_added() as f64 - first as f64 - last as f64 + 1.0;
        if relevant <= 0.0 {
            return Ok(0.0);
        }

        Ok((middle / relevant).clamp(0.0, 1.0))
    }

    /// Probability that by `time` the running jobs release enough processors for the
    /// head but not enough for the head and the candidate together.
    pub fn bottle_neck(
        &mut self,
        time: Time,
        candidate: &Job,
        head: &Job,
        running: &[Job],
        current_time: Time,
    ) -> Result<f64, SchedulerError> {
        let head_processors = head.num_required_processors as usize;
        let combined = head_processors + candidate.num_required_processors as usize;
        let cap = combined.min(self.num_processors as usize);

        let releases = running
            .iter()
            .map(|job| {
                let p = self.probability_of_running_job_to_end_upto(time, current_time, job)?;
                Ok((job.num_required_processors as usize, p))
            })
            .collect::<Result<Vec<_>, SchedulerError>>()?;

        // M[n][c]: probability that the first n running jobs release at least c
        let rows = releases.len() + 1;
        let m = &mut self.work_list;
        m.reset(rows, cap + 1);

        m.set(0, 0, 1.0);
        for c in 1..=cap {
            m.set(0, c, 0.0);
        }

        for (i, &(processors, pn)) in releases.iter().enumerate() {
            let n = i + 1;
            m.set(n, 0, 1.0);
            for c in 1..processors.min(cap + 1) {
                let x = m.get(n - 1, c);
                m.set(n, c, x + (1.0 - x) * pn);
            }
            for c in processors..=cap {
                let x = m.get(n - 1, c);
                let with = m.get(n - 1, c - processors);
                m.set(n, c, x + (with - x) * pn);
            }
        }

        let last = rows - 1;
        let result = if combined <= cap {
            m.get(last, head_processors) - m.get(last, combined)
        } else {
            m.get(last, head_processors)
        };

        Ok(result.clamp(0.0, 1.0))
    }

    /// Probability that starting `candidate` now delays `head`.
    pub fn predict_delay_probability(
        &mut self,
        running: &[Job],
        head: &Job,
        candidate: &Job,
        current_time: Time,
    ) -> Result<f64, SchedulerError> {
        let rounded = round_time_up(candidate.estimated_run_time);
        for job in running {
            self.user_mut(job.user_id)?.touch(rounded);
        }

        let mut prediction = 0.0;
        let mut max_bottle_neck: f64 = 0.0;
        let mut t: Time = 1;
        while t < 2 * candidate.estimated_run_time {
            let end_here = self.probability_to_end_at(t, candidate)?;
            let bottle_neck = self.bottle_neck(t, candidate, head, running, current_time)?;
            max_bottle_neck = max_bottle_neck.max(bottle_neck);
            prediction += end_here * max_bottle_neck;
            t *= 2;
        }

        log_debug!(
            self.verbosity,
            "    job {}: delay probability for head job {} is {:.4}",
            candidate.id,
            head.id,
            prediction
        );
        Ok(prediction)
    }
}

impl BackfillPolicy for ProbabilisticPolicy {
    fn name(&self) -> &'static str {
        "probabilistic"
    }

    fn on_job_submission(&mut self, job: &Job) {
        let window_size = self.window_size;
        self.user_distribution
            .entry(job.user_id)
            .and_modify(|d| d.touch(round_time_up(job.estimated_run_time)))
            .or_insert_with(|| Distribution::new(job.user_id, job.estimated_run_time, window_size));
    }

    fn on_job_termination(&mut self, job: &Job) -> Result<(), SchedulerError> {
        self.user_mut(job.user_id)?.add_job(job.actual_run_time)
    }

    fn can_be_backfilled(
        &mut self,
        state: &SchedulerState,
        context: &BackfillContext,
        candidate: &Job,
    ) -> Result<bool, SchedulerError> {
        if !state
            .cpu_snapshot
            .can_job_start_now(candidate, context.current_time)
        {
            log_checks!(
                self.verbosity,
                "    job {}: not enough free processors now",
                candidate.id
            );
            return Ok(false);
        }

        let prediction = self.predict_delay_probability(
            &state.running,
            &context.head,
            candidate,
            context.current_time,
        )?;
        if prediction > self.threshold {
            log_checks!(
                self.verbosity,
                "    job {}: delay probability {:.4} exceeds threshold {}",
                candidate.id,
                prediction,
                self.threshold
            );
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::policy::EasyPolicy;

    fn job(id: u64, user_id: u64, processors: u32, estimate: u64) -> Job {
        Job::new(id, user_id, 0, estimate, estimate, processors)
    }

    fn started_at(mut job: Job, start: Time) -> Job {
        job.start_to_run_at_time = Some(start);
        job
    }

    fn finished(user_id: u64, actual: u64) -> Job {
        Job::new(0, user_id, 0, actual, actual, 1)
    }

    /// Two jobs of user 1 running on a 16 processor cluster, a 12 processor head
    /// job and a 4 processor, 100 second candidate of `candidate_user`.
    fn setup(
        candidate_user: u64,
        candidate_history: u64,
    ) -> (ProbabilisticPolicy, SchedulerState, BackfillContext, Job) {
        let mut policy = ProbabilisticPolicy::new(16, 0.05, 150, 0);
        let mut state = SchedulerState::new(16);

        for j in [job(1, 1, 8, 64), job(2, 1, 4, 1000)] {
            policy.on_job_submission(&j);
            let j = started_at(j, 0);
            state.cpu_snapshot.assign_job(&j, 0).unwrap();
            state.running.push(j);
        }
        for _ in 0..100 {
            policy.on_job_termination(&finished(1, 1000)).unwrap();
        }

        let head = job(3, 3, 12, 10);
        let candidate = job(4, candidate_user, 4, 100);
        policy.on_job_submission(&head);
        policy.on_job_submission(&candidate);
        for _ in 0..140 {
            policy
                .on_job_termination(&finished(candidate_user, candidate_history))
                .unwrap();
        }
        state.unscheduled.push_back(head.clone());
        state.unscheduled.push_back(candidate.clone());

        let head_start_time = state.cpu_snapshot.job_earliest_assignment(&head, 1).unwrap();
        let context = BackfillContext {
            head,
            head_start_time,
            current_time: 1,
        };
        (policy, state, context, candidate)
    }

    #[test]
    fn test_short_running_user_is_backfilled_where_easy_refuses() {
        let (mut policy, state, context, candidate) = setup(2, 3);
        assert_eq!(context.head_start_time, 64);

        let prediction = policy
            .predict_delay_probability(&state.running, &context.head, &candidate, 1)
            .unwrap();
        assert!(prediction < 0.01, "prediction {}", prediction);
        assert!(policy
            .can_be_backfilled(&state, &context, &candidate)
            .unwrap());

        let mut easy = EasyPolicy::default();
        assert!(!easy.can_be_backfilled(&state, &context, &candidate).unwrap());
    }

    #[test]
    fn test_user_running_to_estimate_is_refused() {
        let (mut policy, state, context, candidate) = setup(5, 100);
        let prediction = policy
            .predict_delay_probability(&state.running, &context.head, &candidate, 1)
            .unwrap();
        assert!(prediction > 0.05, "prediction {}", prediction);
        assert!(!policy
            .can_be_backfilled(&state, &context, &candidate)
            .unwrap());
    }

    #[test]
    fn test_bottle_neck_without_running_jobs_is_zero() {
        let mut policy = ProbabilisticPolicy::new(8, 0.05, 150, 0);
        let head = job(1, 1, 4, 10);
        let candidate = job(2, 1, 2, 10);
        for t in [1, 2, 64] {
            let p = policy.bottle_neck(t, &candidate, &head, &[], 0).unwrap();
            assert_eq!(p, 0.0);
        }
    }

    #[test]
    fn test_bottle_neck_single_running_job() {
        // Once the running job is certain to be done, releasing its 4 processors
        // covers the head (4) but never head plus candidate (6)
        let mut policy = ProbabilisticPolicy::new(8, 0.05, 150, 0);
        let running = started_at(job(1, 1, 4, 8), 0);
        policy.on_job_submission(&running);
        let head = job(2, 2, 4, 10);
        let candidate = job(3, 2, 2, 10);

        let p = policy
            .bottle_neck(64, &candidate, &head, &[running], 1)
            .unwrap();
        assert!((p - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_end_probability_is_monotone_in_time() {
        let mut policy = ProbabilisticPolicy::new(16, 0.05, 150, 0);
        let running = job(1, 1, 4, 1000);
        policy.on_job_submission(&job(9, 1, 1, 64));
        policy.on_job_submission(&running);
        for actual in [5, 40, 300, 1000, 1000, 700] {
            policy.on_job_termination(&finished(1, actual)).unwrap();
        }
        let running = started_at(running, 0);

        let mut previous = 0.0;
        let mut t = 1;
        while t <= 2048 {
            let p = policy
                .probability_of_running_job_to_end_upto(t, 1, &running)
                .unwrap();
            assert!((0.0..=1.0).contains(&p));
            assert!(p >= previous, "t={} gave {} after {}", t, p, previous);
            previous = p;
            t *= 2;
        }
        assert_eq!(previous, 1.0);
    }

    /// User 1 with buckets {1: 1, 2: 1, 4: 2, 8: 1, 16: 1, 32: 1, 64: 2}, 9 jobs.
    fn policy_with_history(num_processors: u32) -> ProbabilisticPolicy {
        let mut policy = ProbabilisticPolicy::new(num_processors, 0.05, 150, 0);
        policy.on_job_submission(&job(9, 1, 1, 4));
        policy.on_job_termination(&finished(1, 3)).unwrap();
        policy.on_job_termination(&finished(1, 60)).unwrap();
        policy
    }

    fn assert_close(got: f64, want: f64) {
        assert!((got - want).abs() < 1e-12, "got {} want {}", got, want);
    }

    #[test]
    fn test_end_at_ignores_buckets_past_twice_the_estimate() {
        let policy = policy_with_history(8);
        assert_eq!(policy.distribution(1).unwrap().number_of_jobs_added(), 9);

        // Estimate 4: buckets 8 and up (5 jobs) are left out, plus one
        let short = job(1, 1, 1, 4);
        assert_close(policy.probability_to_end_at(4, &short).unwrap(), 2.0 / 5.0);
        assert_close(policy.probability_to_end_at(1, &short).unwrap(), 1.0 / 5.0);

        // Estimate 16: only buckets 32 and 64 (3 jobs) are left out
        let long = job(2, 1, 1, 16);
        assert_close(policy.probability_to_end_at(4, &long).unwrap(), 2.0 / 7.0);
        assert_close(policy.probability_to_end_at(16, &long).unwrap(), 1.0 / 7.0);
    }

    #[test]
    fn test_running_job_end_interpolates_straddling_bucket() {
        let policy = policy_with_history(8);
        // Elapsed rounds down to 2, so buckets 1 and 2 are behind it
        let running = started_at(job(1, 1, 2, 40), 0);

        // Horizon 6: bucket 4 in full, half of bucket 8's upper half
        let p = policy
            .probability_of_running_job_to_end_upto(4, 3, &running)
            .unwrap();
        assert_close(p, 2.5 / 8.0);

        // Horizon 10: buckets 4 and 8 in full, a quarter of bucket 16
        let p = policy
            .probability_of_running_job_to_end_upto(8, 3, &running)
            .unwrap();
        assert_close(p, 3.25 / 8.0);

        // At the bound the job is certainly done
        let p = policy
            .probability_of_running_job_to_end_upto(64, 3, &running)
            .unwrap();
        assert_eq!(p, 1.0);
    }

    #[test]
    fn test_bottle_neck_two_running_jobs() {
        let mut policy = policy_with_history(8);
        let a = started_at(job(1, 1, 2, 40), 0);
        let b = started_at(job(2, 1, 3, 40), 2);
        let pa = policy.probability_of_running_job_to_end_upto(4, 3, &a).unwrap();
        let pb = policy.probability_of_running_job_to_end_upto(4, 3, &b).unwrap();
        assert_close(pa, 5.0 / 16.0);
        assert_close(pb, 13.0 / 36.0);

        // Head needs B's 3 processors; head plus candidate needs both jobs gone
        let head = job(3, 2, 3, 10);
        let candidate = job(4, 2, 2, 10);
        let p = policy
            .bottle_neck(4, &candidate, &head, &[a, b], 3)
            .unwrap();
        assert_close(p, pb * (1.0 - pa));
        assert_close(p, 143.0 / 576.0);
    }

    #[test]
    fn test_bottle_neck_when_head_and_candidate_exceed_cluster() {
        let mut policy = policy_with_history(5);
        let a = started_at(job(1, 1, 2, 40), 0);
        let b = started_at(job(2, 1, 3, 40), 2);

        // 2 + 4 processors never fit on 5, so only the head's share counts
        let head = job(3, 2, 2, 10);
        let candidate = job(4, 2, 4, 10);
        let p = policy
            .bottle_neck(4, &candidate, &head, &[a, b], 3)
            .unwrap();
        let (pa, pb) = (5.0 / 16.0, 13.0 / 36.0);
        assert_close(p, pa + (1.0 - pa) * pb);
        assert_close(p, 323.0 / 576.0);
    }

    #[test]
    fn test_untouched_bucket_is_an_error() {
        let mut policy = ProbabilisticPolicy::new(8, 0.05, 150, 0);
        let j = job(1, 1, 1, 4);
        policy.on_job_submission(&j);
        assert!(matches!(
            policy.probability_to_end_at(64, &j),
            Err(SchedulerError::MissingBucket { bucket: 64, .. })
        ));
        assert!(policy.probability_to_end_at(4, &j).is_ok());
    }

    #[test]
    fn test_termination_for_unknown_user_fails() {
        let mut policy = ProbabilisticPolicy::new(8, 0.05, 150, 0);
        assert!(matches!(
            policy.on_job_termination(&finished(42, 10)),
            Err(SchedulerError::UnknownUser { user_id: 42 })
        ));
    }

    #[test]
    fn test_submission_creates_then_touches() {
        let mut policy = ProbabilisticPolicy::new(8, 0.05, 150, 0);
        policy.on_job_submission(&job(1, 3, 1, 4));
        assert_eq!(policy.distribution(3).unwrap().number_of_jobs_added(), 3);
        policy.on_job_submission(&job(2, 3, 1, 30));
        let d = policy.distribution(3).unwrap();
        assert!(d.contains(32));
        assert_eq!(d.number_of_jobs_added(), 6);
    }
}
