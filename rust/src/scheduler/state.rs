//! Queue, running set and allocation model shared by every policy.

use std::collections::VecDeque;

use crate::models::{Job, JobId};

use super::cpu_snapshot::CpuSnapshot;

/// Scheduler state that backfill policies inspect.
///
/// Every submitted, unterminated job is in exactly one of `unscheduled` (arrival
/// order) or `running` (start order).
#[derive(Clone, Debug)]
pub struct SchedulerState {
    pub num_processors: u32,
    /// Jobs waiting to start; the front is the head-of-queue job
    pub unscheduled: VecDeque<Job>,
    /// Jobs currently running, each with its start time set
    pub running: Vec<Job>,
    /// Free processors over time, with every running job's estimate reserved
    pub cpu_snapshot: CpuSnapshot,
}

impl SchedulerState {
    pub fn new(num_processors: u32) -> Self {
        Self {
            num_processors,
            unscheduled: VecDeque::new(),
            running: Vec::new(),
            cpu_snapshot: CpuSnapshot::new(num_processors),
        }
    }

    pub fn head(&self) -> Option<&Job> {
        self.unscheduled.front()
    }

    /// Ids of jobs that are queued or running.
    pub fn pending_job_ids(&self) -> Vec<JobId> {
        self.unscheduled
            .iter()
            .chain(self.running.iter())
            .map(|j| j.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_clone_is_independent() {
        let mut state = SchedulerState::new(4);
        state.unscheduled.push_back(Job::new(1, 0, 0, 10, 10, 2));

        let mut cloned = state.clone();
        let job = cloned.unscheduled.pop_front().unwrap();
        cloned.cpu_snapshot.assign_job(&job, 0).unwrap();
        cloned.running.push(job);

        assert_eq!(state.head().map(|j| j.id), Some(1));
        assert!(state.running.is_empty());
        assert_eq!(state.cpu_snapshot.free_processors_available_at(0), 4);
        assert_eq!(cloned.pending_job_ids(), vec![1]);
    }
}
