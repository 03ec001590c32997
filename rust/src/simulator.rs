//! Discrete-event driver: replays a workload through a backfill scheduler.

use std::collections::HashMap;

use rustc_hash::FxHashMap;

use crate::config::SchedulingConfig;
use crate::events::{Event, EventKind, EventQueue};
use crate::models::{Job, JobId, ScheduledJob, SimulationResult, Time};
use crate::scheduler::{BackfillScheduler, SchedulerError};
use crate::{log_changes, log_debug};

/// Run times shorter than this are padded when computing bounded slowdown.
pub const SLOWDOWN_BOUND: Time = 10;

pub struct Simulator {
    jobs: FxHashMap<JobId, Job>,
    /// Job ids in workload order, for reporting
    job_order: Vec<JobId>,
    events: EventQueue,
    scheduler: BackfillScheduler,
    verbosity: u8,
}

impl Simulator {
    /// Check the workload against the cluster and queue one submission per job.
    ///
    /// Actual run times longer than the estimate are cut to the estimate.
    pub fn new(
        jobs: Vec<Job>,
        scheduler: BackfillScheduler,
        verbosity: u8,
    ) -> Result<Self, SchedulerError> {
        let num_processors = scheduler.state().num_processors;
        let mut table = FxHashMap::default();
        let mut job_order = Vec::with_capacity(jobs.len());
        let mut events = EventQueue::new();

        for mut job in jobs {
            let reason = if job.estimated_run_time == 0 {
                Some("estimated run time must be positive".to_string())
            } else if job.actual_run_time == 0 {
                Some("actual run time must be positive".to_string())
            } else if job.num_required_processors == 0 {
                Some("processor count must be positive".to_string())
            } else if job.num_required_processors > num_processors {
                Some(format!(
                    "needs {} processors, cluster has {}",
                    job.num_required_processors, num_processors
                ))
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(SchedulerError::InvalidJob {
                    job_id: job.id,
                    reason,
                });
            }
            if table.contains_key(&job.id) {
                return Err(SchedulerError::DuplicateJob(job.id));
            }

            job.actual_run_time = job.actual_run_time.min(job.estimated_run_time);
            job.start_to_run_at_time = None;
            events.push(Event::submission(job.submit_time, job.id));
            job_order.push(job.id);
            table.insert(job.id, job);
        }

        Ok(Self {
            jobs: table,
            job_order,
            events,
            scheduler,
            verbosity,
        })
    }

    pub fn from_config(jobs: Vec<Job>, config: &SchedulingConfig) -> Result<Self, SchedulerError> {
        let scheduler = BackfillScheduler::from_config(config)?;
        Self::new(jobs, scheduler, config.verbosity)
    }

    /// Dispatch events until none are left.
    pub fn run(mut self) -> Result<SimulationResult, SchedulerError> {
        log_changes!(
            self.verbosity,
            "Simulating {} jobs with {} backfilling",
            self.job_order.len(),
            self.scheduler.algorithm_name()
        );

        while let Some(event) = self.events.pop_min_event() {
            log_debug!(
                self.verbosity,
                "t={}: {:?} job {} ({} events pending)",
                event.timestamp,
                event.kind,
                event.job_id,
                self.events.len()
            );
            match event.kind {
                EventKind::Submission => {
                    let job = self
                        .jobs
                        .get(&event.job_id)
                        .cloned()
                        .ok_or(SchedulerError::UnknownJob(event.job_id))?;
                    let new_events = self
                        .scheduler
                        .new_events_on_job_submission(job, event.timestamp)?;
                    self.events.add_events(new_events);
                }
                EventKind::Start => {
                    let job = self
                        .jobs
                        .get_mut(&event.job_id)
                        .ok_or(SchedulerError::UnknownJob(event.job_id))?;
                    if job.start_to_run_at_time.is_some() {
                        return Err(SchedulerError::DuplicateStart(job.id));
                    }
                    job.start_to_run_at_time = Some(event.timestamp);
                    let end = event.timestamp + job.actual_run_time;
                    self.events.push(Event::termination(end, job.id));
                }
                EventKind::Termination => {
                    let new_events = self
                        .scheduler
                        .new_events_on_job_termination(event.job_id, event.timestamp)?;
                    self.events.add_events(new_events);
                }
            }
        }

        let mut unfinished = self.scheduler.state().pending_job_ids();
        if !unfinished.is_empty() {
            unfinished.sort_unstable();
            return Err(SchedulerError::UnfinishedJobs(unfinished));
        }

        self.into_result()
    }

    fn into_result(self) -> Result<SimulationResult, SchedulerError> {
        let mut scheduled_jobs = Vec::with_capacity(self.job_order.len());
        for job_id in &self.job_order {
            let job = self
                .jobs
                .get(job_id)
                .ok_or(SchedulerError::UnknownJob(*job_id))?;
            let (start_time, end_time) = match (job.start_to_run_at_time, job.actual_end_time()) {
                (Some(start), Some(end)) => (start, end),
                _ => return Err(SchedulerError::JobNotStarted { job_id: job.id }),
            };
            scheduled_jobs.push(ScheduledJob {
                job_id: job.id,
                user_id: job.user_id,
                submit_time: job.submit_time,
                start_time,
                end_time,
                num_processors: job.num_required_processors,
            });
        }

        let num_processors = self.scheduler.state().num_processors;
        let mut metadata = summarize(&scheduled_jobs, num_processors);
        metadata.insert(
            "algorithm".to_string(),
            self.scheduler.algorithm_name().to_string(),
        );

        log_changes!(
            self.verbosity,
            "Finished: makespan {}, average wait {}",
            metadata.get("makespan").map(String::as_str).unwrap_or("-"),
            metadata.get("average_wait_time").map(String::as_str).unwrap_or("-")
        );

        Ok(SimulationResult {
            scheduled_jobs,
            algorithm_metadata: metadata,
        })
    }
}

/// Aggregate statistics of a finished run, as strings for the Python side.
pub fn summarize(jobs: &[ScheduledJob], num_processors: u32) -> HashMap<String, String> {
    let mut metadata = HashMap::new();
    metadata.insert("job_count".to_string(), jobs.len().to_string());
    if jobs.is_empty() {
        return metadata;
    }

    let count = jobs.len() as f64;
    let first_submit = jobs.iter().map(|j| j.submit_time).min().unwrap_or(0);
    let makespan = jobs.iter().map(|j| j.end_time).max().unwrap_or(0);
    let total_wait: Time = jobs.iter().map(ScheduledJob::wait_time).sum();
    let total_slowdown: f64 = jobs.iter().map(|j| j.bounded_slowdown(SLOWDOWN_BOUND)).sum();
    let busy: u64 = jobs
        .iter()
        .map(|j| j.num_processors as u64 * (j.end_time - j.start_time))
        .sum();
    let span = makespan.saturating_sub(first_submit);
    let utilization = if span == 0 || num_processors == 0 {
        0.0
    } else {
        busy as f64 / (num_processors as f64 * span as f64)
    };

    metadata.insert("makespan".to_string(), makespan.to_string());
    metadata.insert(
        "average_wait_time".to_string(),
        format!("{:.4}", total_wait as f64 / count),
    );
    metadata.insert(
        "average_bounded_slowdown".to_string(),
        format!("{:.4}", total_slowdown / count),
    );
    metadata.insert("utilization".to_string(), format!("{:.4}", utilization));
    metadata
}

/// Run `jobs` on the scheduler described by `config`.
pub fn run_simulation(
    jobs: Vec<Job>,
    config: &SchedulingConfig,
) -> Result<SimulationResult, SchedulerError> {
    Simulator::from_config(jobs, config)?.run()
}
