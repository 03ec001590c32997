//! Shared head-of-queue and backfill engine.

use std::collections::VecDeque;

use thiserror::Error;

use crate::config::SchedulingConfig;
use crate::events::Event;
use crate::models::{Job, JobId, Time, UserId};
use crate::sorting::SortingError;
use crate::{log_changes, log_checks, log_debug};

use super::greedy::GreedyPolicy;
use super::policy::{BackfillContext, BackfillPolicy, EasyPolicy, FcfsPolicy};
use super::probabilistic::ProbabilisticPolicy;
use super::state::SchedulerState;

/// Errors that can occur during scheduling.
///
/// Apart from the configuration variants these are broken invariants: the run
/// cannot continue once one is returned.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Job {job_id} needs {required} processors at t={time} but only {available} are free")]
    CapacityExceeded {
        job_id: JobId,
        time: Time,
        required: u32,
        available: u32,
    },
    #[error("Job {job_id} needs {required} processors, cluster has {num_processors}")]
    NoFeasibleStart {
        job_id: JobId,
        required: u32,
        num_processors: u32,
    },
    #[error("Releasing the tail of job {job_id} at t={time} exceeds the cluster size")]
    ReleaseOverflow { job_id: JobId, time: Time },
    #[error("t={time} is before the archived horizon t={horizon}")]
    ArchivedTime { time: Time, horizon: Time },
    #[error("Job {job_id} terminated at t={time} but is not running")]
    JobNotRunning { job_id: JobId, time: Time },
    #[error("Job {job_id} has no start time")]
    JobNotStarted { job_id: JobId },
    #[error("No runtime distribution for user {user_id}")]
    UnknownUser { user_id: UserId },
    #[error("Runtime bucket {bucket} was never touched for user {user_id}")]
    MissingBucket { user_id: UserId, bucket: Time },
    #[error("Runtime bucket {bucket} of user {user_id} would drop below zero")]
    DistributionUnderflow { user_id: UserId, bucket: Time },
    #[error("Unknown job {0}")]
    UnknownJob(JobId),
    #[error("Job {0} appears more than once in the workload")]
    DuplicateJob(JobId),
    #[error("Job {job_id} is invalid: {reason}")]
    InvalidJob { job_id: JobId, reason: String },
    #[error("Job {0} was started twice")]
    DuplicateStart(JobId),
    #[error("Simulation ended with unfinished jobs: {0:?}")]
    UnfinishedJobs(Vec<JobId>),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Unknown scheduling strategy: {0}")]
    UnknownStrategy(String),
}

impl From<SortingError> for SchedulerError {
    fn from(err: SortingError) -> Self {
        SchedulerError::InvalidConfig(err.to_string())
    }
}

/// Queue-and-running-set scheduler with a pluggable backfill policy.
///
/// Each arrival or departure runs one pass: start jobs from the head of the queue
/// while they fit, then offer every remaining queued job to the policy.
pub struct BackfillScheduler {
    state: SchedulerState,
    policy: Box<dyn BackfillPolicy>,
    verbosity: u8,
}

impl BackfillScheduler {
    pub fn new(num_processors: u32, policy: Box<dyn BackfillPolicy>, verbosity: u8) -> Self {
        Self {
            state: SchedulerState::new(num_processors),
            policy,
            verbosity,
        }
    }

    /// Build the scheduler named by `config.strategy`.
    pub fn from_config(config: &SchedulingConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let verbosity = config.verbosity;

        let policy: Box<dyn BackfillPolicy> = match config.strategy.as_str() {
            "fcfs" => Box::new(FcfsPolicy),
            "easy" => Box::new(EasyPolicy::new(verbosity)),
            "greedy" => Box::new(GreedyPolicy::from_config(&config.greedy, verbosity)?),
            "probabilistic" => Box::new(ProbabilisticPolicy::new(
                config.num_processors,
                config.probabilistic.threshold,
                config.probabilistic.window_size,
                verbosity,
            )),
            other => return Err(SchedulerError::UnknownStrategy(other.to_string())),
        };

        Ok(Self::new(config.num_processors, policy, verbosity))
    }

    pub fn algorithm_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Handle an arrival and return the start events it triggers.
    pub fn new_events_on_job_submission(
        &mut self,
        job: Job,
        current_time: Time,
    ) -> Result<Vec<Event>, SchedulerError> {
        if job.num_required_processors > self.state.num_processors {
            return Err(SchedulerError::NoFeasibleStart {
                job_id: job.id,
                required: job.num_required_processors,
                num_processors: self.state.num_processors,
            });
        }

        log_checks!(
            self.verbosity,
            "t={}: job {} submitted ({} processors, estimate {})",
            current_time,
            job.id,
            job.num_required_processors,
            job.estimated_run_time
        );

        self.policy.on_job_submission(&job);
        self.archive(current_time);
        self.state.unscheduled.push_back(job);

        let started = self.schedule_jobs(current_time)?;
        Ok(Self::start_events(&started, current_time))
    }

    /// Handle a departure and return the start events it triggers.
    pub fn new_events_on_job_termination(
        &mut self,
        job_id: JobId,
        current_time: Time,
    ) -> Result<Vec<Event>, SchedulerError> {
        let idx = self
            .state
            .running
            .iter()
            .position(|j| j.id == job_id)
            .ok_or(SchedulerError::JobNotRunning {
                job_id,
                time: current_time,
            })?;

        let job = self.state.running.remove(idx);
        self.policy.on_job_termination(&job)?;
        self.archive(current_time);
        self.state.cpu_snapshot.del_tail_of_job(&job)?;

        log_changes!(
            self.verbosity,
            "t={}: job {} terminated ({} processors released)",
            current_time,
            job.id,
            job.num_required_processors
        );

        let started = self.schedule_jobs(current_time)?;
        Ok(Self::start_events(&started, current_time))
    }

    fn start_events(started: &[JobId], current_time: Time) -> Vec<Event> {
        started
            .iter()
            .map(|id| Event::start(current_time, *id))
            .collect()
    }

    fn archive(&mut self, current_time: Time) {
        let dropped = self.state.cpu_snapshot.archive_old_slices(current_time);
        if dropped > 0 {
            log_debug!(
                self.verbosity,
                "  archived {} slices before t={}",
                dropped,
                current_time
            );
        }
    }

    /// Start whatever can run now; returns the started job ids in start order.
    fn schedule_jobs(&mut self, current_time: Time) -> Result<Vec<JobId>, SchedulerError> {
        let sorted = self.policy.keeps_queue_sorted();
        if sorted {
            self.sort_queue();
        }
        let mut started = self.schedule_head_of_list(current_time)?;
        started.extend(self.backfill_jobs(current_time)?);
        if sorted {
            self.sort_queue();
        }
        Ok(started)
    }

    fn sort_queue(&mut self) {
        self.state
            .unscheduled
            .make_contiguous()
            .sort_by_key(|j| (j.submit_time, j.id));
    }

    /// Start jobs in arrival order until the first one that does not fit.
    fn schedule_head_of_list(&mut self, current_time: Time) -> Result<Vec<JobId>, SchedulerError> {
        let mut started = Vec::new();

        while let Some(head) = self.state.head() {
            if !self.state.cpu_snapshot.can_job_start_now(head, current_time) {
                break;
            }
            if let Some(job) = self.state.unscheduled.pop_front() {
                log_changes!(
                    self.verbosity,
                    "t={}: starting job {} from the head of the queue",
                    current_time,
                    job.id
                );
                started.push(self.start_job(job, current_time)?);
            }
        }

        Ok(started)
    }

    fn backfill_jobs(&mut self, current_time: Time) -> Result<Vec<JobId>, SchedulerError> {
        if self.state.unscheduled.len() <= 1 {
            return Ok(Vec::new());
        }

        let head = self.state.unscheduled[0].clone();
        let head_start_time = self
            .state
            .cpu_snapshot
            .job_earliest_assignment(&head, current_time)?;
        log_debug!(
            self.verbosity,
            "  head job {} is guaranteed to start by t={}",
            head.id,
            head_start_time
        );

        let context = BackfillContext {
            head,
            head_start_time,
            current_time,
        };

        if let Some(order) = self.policy.reorder_candidates(&self.state, &context)? {
            self.apply_tail_order(&order);
        }

        let candidates: Vec<JobId> = self
            .state
            .unscheduled
            .iter()
            .skip(1)
            .map(|j| j.id)
            .collect();

        let mut started = Vec::new();
        for job_id in candidates {
            let pos = match self.state.unscheduled.iter().position(|j| j.id == job_id) {
                Some(pos) => pos,
                None => continue,
            };

            let accepted = self.policy.can_be_backfilled(
                &self.state,
                &context,
                &self.state.unscheduled[pos],
            )?;
            if !accepted {
                log_checks!(self.verbosity, "    job {} not backfilled", job_id);
                continue;
            }

            if let Some(job) = self.state.unscheduled.remove(pos) {
                log_changes!(
                    self.verbosity,
                    "t={}: backfilling job {} ahead of head job {}",
                    current_time,
                    job.id,
                    context.head.id
                );
                started.push(self.start_job(job, current_time)?);
            }
        }

        Ok(started)
    }

    /// Rearrange everything behind the head: ids in `order` first, then the rest
    /// in their current order.
    fn apply_tail_order(&mut self, order: &[JobId]) {
        let mut tail: VecDeque<Job> = self.state.unscheduled.drain(1..).collect();
        for job_id in order {
            if let Some(pos) = tail.iter().position(|j| j.id == *job_id) {
                if let Some(job) = tail.remove(pos) {
                    self.state.unscheduled.push_back(job);
                }
            }
        }
        self.state.unscheduled.extend(tail);
    }

    fn start_job(&mut self, mut job: Job, current_time: Time) -> Result<JobId, SchedulerError> {
        job.start_to_run_at_time = Some(current_time);
        self.state.cpu_snapshot.assign_job(&job, current_time)?;
        let job_id = job.id;
        self.state.running.push(job);
        Ok(job_id)
    }
}
