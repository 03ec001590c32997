//! Backfill acceptance policies.
//!
//! The engine owns the queue and the allocation model; a policy only answers
//! whether a queued job may start early, and optionally reorders the candidates
//! before they are offered.

use crate::models::{Job, JobId, Time};
use crate::log_checks;

use super::core::SchedulerError;
use super::state::SchedulerState;

/// Facts fixed for the duration of one backfill pass.
#[derive(Clone, Debug)]
pub struct BackfillContext {
    /// The job at the head of the queue
    pub head: Job,
    /// Earliest start of the head job before anything was backfilled this pass
    pub head_start_time: Time,
    pub current_time: Time,
}

/// Decides which queued jobs may start ahead of the head job.
pub trait BackfillPolicy {
    fn name(&self) -> &'static str;

    /// Called for every arrival, before the scheduling pass.
    fn on_job_submission(&mut self, _job: &Job) {}

    /// Called for every departure, before the scheduling pass.
    fn on_job_termination(&mut self, _job: &Job) -> Result<(), SchedulerError> {
        Ok(())
    }

    /// Whether the queue is put back in (submit time, id) order around every pass.
    fn keeps_queue_sorted(&self) -> bool {
        false
    }

    /// Preferred order for the jobs behind the head, or None to keep arrival order.
    fn reorder_candidates(
        &mut self,
        _state: &SchedulerState,
        _context: &BackfillContext,
    ) -> Result<Option<Vec<JobId>>, SchedulerError> {
        Ok(None)
    }

    fn can_be_backfilled(
        &mut self,
        state: &SchedulerState,
        context: &BackfillContext,
        candidate: &Job,
    ) -> Result<bool, SchedulerError>;
}

/// Plain first-come first-served: nothing ever jumps the queue.
#[derive(Clone, Copy, Debug, Default)]
pub struct FcfsPolicy;

impl BackfillPolicy for FcfsPolicy {
    fn name(&self) -> &'static str {
        "fcfs"
    }

    fn can_be_backfilled(
        &mut self,
        _state: &SchedulerState,
        _context: &BackfillContext,
        _candidate: &Job,
    ) -> Result<bool, SchedulerError> {
        Ok(false)
    }
}

/// EASY backfilling: a job may start now only if the head job still starts at the
/// time it was guaranteed at the beginning of the pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct EasyPolicy {
    verbosity: u8,
}

impl EasyPolicy {
    pub fn new(verbosity: u8) -> Self {
        Self { verbosity }
    }
}

impl BackfillPolicy for EasyPolicy {
    fn name(&self) -> &'static str {
        "easy"
    }

    fn can_be_backfilled(
        &mut self,
        state: &SchedulerState,
        context: &BackfillContext,
        candidate: &Job,
    ) -> Result<bool, SchedulerError> {
        let now = context.current_time;
        if !state.cpu_snapshot.can_job_start_now(candidate, now) {
            log_checks!(
                self.verbosity,
                "    job {}: not enough free processors now",
                candidate.id
            );
            return Ok(false);
        }

        let mut what_if = state.cpu_snapshot.clone();
        what_if.assign_job(candidate, now)?;
        let head_start = what_if.job_earliest_assignment(&context.head, now)?;

        if head_start > context.head_start_time {
            log_checks!(
                self.verbosity,
                "    job {}: would delay head job {} from t={} to t={}",
                candidate.id,
                context.head.id,
                context.head_start_time,
                head_start
            );
            return Ok(false);
        }
        Ok(true)
    }
}
