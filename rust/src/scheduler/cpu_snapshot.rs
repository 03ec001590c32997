//! Free-processor tracking over future time with sorted, contiguous slices.

use crate::models::{Job, Time};

use super::core::SchedulerError;

/// A stretch of time with a constant number of free processors.
///
/// A slice runs from its `start` up to the next slice's start; the last slice
/// extends forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slice {
    pub start: Time,
    pub free_processors: u32,
}

/// Free processors as a function of time.
///
/// Maintains the invariant that slices are sorted by start with no duplicates, every
/// free count is within `[0, num_processors]`, and adjacent slices differ in their
/// free count. Cloning gives an independent copy for what-if exploration.
#[derive(Clone, Debug)]
pub struct CpuSnapshot {
    num_processors: u32,
    slices: Vec<Slice>,
}

impl CpuSnapshot {
    /// Create an idle cluster starting at time zero.
    pub fn new(num_processors: u32) -> Self {
        Self {
            num_processors,
            slices: vec![Slice {
                start: 0,
                free_processors: num_processors,
            }],
        }
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    /// Index of the slice covering `time`.
    ///
    /// Times before the first (archived) slice map to the first slice.
    fn slice_index_at(&self, time: Time) -> usize {
        self.slices
            .partition_point(|s| s.start <= time)
            .saturating_sub(1)
    }

    /// End of the slice at `idx` (None for the last slice).
    fn slice_end(&self, idx: usize) -> Option<Time> {
        self.slices.get(idx + 1).map(|s| s.start)
    }

    /// Number of free processors at `time`.
    pub fn free_processors_available_at(&self, time: Time) -> u32 {
        self.slices[self.slice_index_at(time)].free_processors
    }

    /// Minimum number of free processors over `[start, start + duration)`.
    ///
    /// A zero duration looks at the single instant `start`.
    pub fn free_processors_available_during(&self, start: Time, duration: Time) -> u32 {
        let end = start + duration;
        let mut idx = self.slice_index_at(start);
        let mut min_free = self.slices[idx].free_processors;

        while let Some(next_start) = self.slice_end(idx) {
            if next_start >= end {
                break;
            }
            idx += 1;
            min_free = min_free.min(self.slices[idx].free_processors);
        }

        min_free
    }

    /// Whether `job` could run from `start` for its estimate without disturbing
    /// anything already assigned.
    pub fn can_job_start_at(&self, job: &Job, start: Time) -> bool {
        self.free_processors_available_during(start, job.estimated_run_time)
            >= job.num_required_processors
    }

    pub fn can_job_start_now(&self, job: &Job, current_time: Time) -> bool {
        self.can_job_start_at(job, current_time)
    }

    /// Earliest time at or after `current_time` where `job` fits for its whole estimate.
    ///
    /// Only slice boundaries need checking: if a job cannot start at a boundary it
    /// cannot start anywhere inside that slice either.
    pub fn job_earliest_assignment(
        &self,
        job: &Job,
        current_time: Time,
    ) -> Result<Time, SchedulerError> {
        if job.num_required_processors > self.num_processors {
            return Err(SchedulerError::NoFeasibleStart {
                job_id: job.id,
                required: job.num_required_processors,
                num_processors: self.num_processors,
            });
        }

        if self.can_job_start_at(job, current_time) {
            return Ok(current_time);
        }

        let first_later = self.slices.partition_point(|s| s.start <= current_time);
        for slice in &self.slices[first_later..] {
            if self.can_job_start_at(job, slice.start) {
                return Ok(slice.start);
            }
        }

        Err(SchedulerError::NoFeasibleStart {
            job_id: job.id,
            required: job.num_required_processors,
            num_processors: self.num_processors,
        })
    }

    /// Start of the oldest slice still kept.
    fn horizon(&self) -> Time {
        self.slices[0].start
    }

    fn check_horizon(&self, time: Time) -> Result<(), SchedulerError> {
        let horizon = self.horizon();
        if time < horizon {
            return Err(SchedulerError::ArchivedTime { time, horizon });
        }
        Ok(())
    }

    /// Make sure a slice starts exactly at `time` and return its index.
    ///
    /// Splitting at an existing boundary is a no-op. `time` must not be before
    /// the archived horizon.
    fn split_at(&mut self, time: Time) -> usize {
        let idx = self.slice_index_at(time);
        let slice = self.slices[idx];
        if slice.start == time {
            return idx;
        }
        self.slices.insert(
            idx + 1,
            Slice {
                start: time,
                free_processors: slice.free_processors,
            },
        );
        idx + 1
    }

    /// Merge neighbouring slices with equal free counts.
    fn coalesce(&mut self) {
        self.slices
            .dedup_by(|next, prev| next.free_processors == prev.free_processors);
    }

    /// Reserve `job.num_required_processors` over `[start, start + estimate)`.
    pub fn assign_job(&mut self, job: &Job, start: Time) -> Result<(), SchedulerError> {
        let available = self.free_processors_available_during(start, job.estimated_run_time);
        if available < job.num_required_processors {
            return Err(SchedulerError::CapacityExceeded {
                job_id: job.id,
                time: start,
                required: job.num_required_processors,
                available,
            });
        }
        if job.estimated_run_time == 0 {
            return Ok(());
        }
        self.check_horizon(start)?;

        let end = start + job.estimated_run_time;
        let first = self.split_at(start);
        let last = self.split_at(end);
        for slice in &mut self.slices[first..last] {
            slice.free_processors -= job.num_required_processors;
        }
        self.coalesce();
        Ok(())
    }

    /// Reserve `job` at its earliest feasible start and return that start.
    pub fn assign_job_earliest(
        &mut self,
        job: &Job,
        current_time: Time,
    ) -> Result<Time, SchedulerError> {
        let start = self.job_earliest_assignment(job, current_time)?;
        self.assign_job(job, start)?;
        Ok(start)
    }

    /// Give back `[actual_end, estimated_end)` of a job that finished early.
    ///
    /// Jobs that used their whole estimate leave the snapshot untouched.
    pub fn del_tail_of_job(&mut self, job: &Job) -> Result<(), SchedulerError> {
        let (actual_end, estimated_end) = match (job.actual_end_time(), job.estimated_end_time())
        {
            (Some(actual), Some(estimated)) => (actual, estimated),
            _ => return Err(SchedulerError::JobNotStarted { job_id: job.id }),
        };
        if actual_end >= estimated_end {
            return Ok(());
        }
        self.check_horizon(actual_end)?;

        // Check the whole range before touching any slice
        let mut idx = self.slice_index_at(actual_end);
        loop {
            let slice = self.slices[idx];
            if slice.free_processors + job.num_required_processors > self.num_processors {
                return Err(SchedulerError::ReleaseOverflow {
                    job_id: job.id,
                    time: slice.start.max(actual_end),
                });
            }
            match self.slice_end(idx) {
                Some(next) if next < estimated_end => idx += 1,
                _ => break,
            }
        }

        let first = self.split_at(actual_end);
        let last = self.split_at(estimated_end);
        for slice in &mut self.slices[first..last] {
            slice.free_processors += job.num_required_processors;
        }
        self.coalesce();
        Ok(())
    }

    /// Drop slices that end at or before `current_time`.
    ///
    /// Answers for any time at or after `current_time` are unchanged. Returns the
    /// number of slices dropped.
    pub fn archive_old_slices(&mut self, current_time: Time) -> usize {
        let idx = self.slice_index_at(current_time);
        self.slices.drain(..idx);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: u64, processors: u32, estimate: u64) -> Job {
        Job::new(id, 0, 0, estimate, estimate, processors)
    }

    fn started(id: u64, processors: u32, estimate: u64, actual: u64, start: u64) -> Job {
        let mut j = Job::new(id, 0, 0, estimate, actual, processors);
        j.start_to_run_at_time = Some(start);
        j
    }

    #[test]
    fn test_idle_cluster() {
        let snapshot = CpuSnapshot::new(8);
        assert_eq!(snapshot.free_processors_available_at(0), 8);
        assert_eq!(snapshot.free_processors_available_at(1_000_000), 8);
        assert_eq!(snapshot.slices().len(), 1);
    }

    #[test]
    fn test_assign_job_reserves_interval() {
        let mut snapshot = CpuSnapshot::new(8);
        snapshot.assign_job(&job(1, 3, 10), 5).unwrap();
        assert_eq!(snapshot.free_processors_available_at(4), 8);
        assert_eq!(snapshot.free_processors_available_at(5), 5);
        assert_eq!(snapshot.free_processors_available_at(14), 5);
        assert_eq!(snapshot.free_processors_available_at(15), 8);
    }

    #[test]
    fn test_assign_at_existing_boundary_does_not_duplicate_slices() {
        let mut snapshot = CpuSnapshot::new(8);
        snapshot.assign_job(&job(1, 2, 10), 0).unwrap();
        snapshot.assign_job(&job(2, 2, 10), 10).unwrap();
        snapshot.assign_job(&job(3, 1, 5), 10).unwrap();

        let starts: Vec<u64> = snapshot.slices().iter().map(|s| s.start).collect();
        let mut deduped = starts.clone();
        deduped.dedup();
        assert_eq!(starts, deduped);
        assert_eq!(snapshot.free_processors_available_at(12), 5);
        assert_eq!(snapshot.free_processors_available_at(16), 6);
    }

    #[test]
    fn test_adjacent_equal_slices_merge() {
        let mut snapshot = CpuSnapshot::new(8);
        snapshot.assign_job(&job(1, 2, 10), 0).unwrap();
        snapshot.assign_job(&job(2, 2, 10), 10).unwrap();
        // [0, 20) at 6 free, then 8 free
        assert_eq!(
            snapshot.slices(),
            &[
                Slice { start: 0, free_processors: 6 },
                Slice { start: 20, free_processors: 8 },
            ]
        );
    }

    #[test]
    fn test_assign_job_over_capacity_fails() {
        let mut snapshot = CpuSnapshot::new(4);
        snapshot.assign_job(&job(1, 3, 10), 0).unwrap();
        let err = snapshot.assign_job(&job(2, 2, 10), 5).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::CapacityExceeded {
                job_id: 2,
                required: 2,
                available: 1,
                ..
            }
        ));
        // Nothing changed on failure
        assert_eq!(snapshot.free_processors_available_at(5), 1);
        assert_eq!(snapshot.free_processors_available_at(10), 4);
    }

    #[test]
    fn test_can_job_start_now() {
        let mut snapshot = CpuSnapshot::new(8);
        snapshot.assign_job(&job(1, 6, 10), 20).unwrap();
        // Fits now but would overlap the reservation at 20
        assert!(snapshot.can_job_start_now(&job(2, 4, 10), 0));
        assert!(!snapshot.can_job_start_now(&job(3, 4, 30), 0));
        assert!(snapshot.can_job_start_now(&job(4, 2, 30), 0));
    }

    #[test]
    fn test_earliest_start_time() {
        let mut snapshot = CpuSnapshot::new(8);
        snapshot.assign_job(&job(1, 8, 50), 0).unwrap();
        assert_eq!(snapshot.job_earliest_assignment(&job(2, 4, 10), 0).unwrap(), 50);

        snapshot.assign_job(&job(3, 4, 100), 60).unwrap();
        // A gap of 10 at [50, 60) with 8 free fits a 10-long job
        assert_eq!(snapshot.job_earliest_assignment(&job(4, 8, 10), 0).unwrap(), 50);
        // Too long for the gap, must wait until 160
        assert_eq!(snapshot.job_earliest_assignment(&job(5, 8, 11), 0).unwrap(), 160);
        // Narrow enough to share with the reservation
        assert_eq!(snapshot.job_earliest_assignment(&job(6, 4, 500), 0).unwrap(), 50);
    }

    #[test]
    fn test_earliest_start_for_oversized_job() {
        let snapshot = CpuSnapshot::new(4);
        assert!(matches!(
            snapshot.job_earliest_assignment(&job(1, 5, 10), 0),
            Err(SchedulerError::NoFeasibleStart { .. })
        ));
    }

    #[test]
    fn test_del_tail_of_job_releases_unused_estimate() {
        let mut snapshot = CpuSnapshot::new(8);
        let j = started(1, 6, 100, 30, 10);
        snapshot.assign_job(&j, 10).unwrap();
        snapshot.del_tail_of_job(&j).unwrap();

        assert_eq!(snapshot.free_processors_available_at(39), 2);
        assert_eq!(snapshot.free_processors_available_at(40), 8);
        assert_eq!(snapshot.free_processors_available_at(109), 8);
        assert_eq!(snapshot.slices().len(), 3);
    }

    #[test]
    fn test_del_tail_of_job_when_estimate_was_exact() {
        let mut snapshot = CpuSnapshot::new(8);
        let j = started(1, 6, 100, 100, 0);
        snapshot.assign_job(&j, 0).unwrap();
        let before = snapshot.slices().to_vec();
        snapshot.del_tail_of_job(&j).unwrap();
        assert_eq!(snapshot.slices(), before.as_slice());
    }

    #[test]
    fn test_del_tail_of_unstarted_job_fails() {
        let mut snapshot = CpuSnapshot::new(8);
        assert!(matches!(
            snapshot.del_tail_of_job(&job(1, 2, 10)),
            Err(SchedulerError::JobNotStarted { job_id: 1 })
        ));
    }

    #[test]
    fn test_del_tail_never_exceeds_cluster_size() {
        let mut snapshot = CpuSnapshot::new(8);
        // Never assigned, so releasing its tail would create processors
        let j = started(1, 2, 100, 10, 0);
        assert!(matches!(
            snapshot.del_tail_of_job(&j),
            Err(SchedulerError::ReleaseOverflow { job_id: 1, .. })
        ));
    }

    #[test]
    fn test_failed_release_leaves_snapshot_untouched() {
        let mut snapshot = CpuSnapshot::new(8);
        snapshot.assign_job(&started(1, 6, 100, 100, 0), 0).unwrap();
        let before = snapshot.slices().to_vec();

        // [30, 100) has room to give back 6, [100, 150) does not
        let j = started(2, 6, 150, 30, 0);
        assert!(matches!(
            snapshot.del_tail_of_job(&j),
            Err(SchedulerError::ReleaseOverflow { job_id: 2, time: 100 })
        ));
        assert_eq!(snapshot.slices(), before.as_slice());
    }

    #[test]
    fn test_assign_job_earliest_reserves_first_fit() {
        let mut snapshot = CpuSnapshot::new(8);
        snapshot.assign_job(&job(1, 6, 40), 0).unwrap();

        let start = snapshot.assign_job_earliest(&job(2, 4, 10), 5).unwrap();
        assert_eq!(start, 40);
        assert_eq!(snapshot.free_processors_available_at(45), 4);
        assert_eq!(snapshot.free_processors_available_at(50), 8);

        let start = snapshot.assign_job_earliest(&job(3, 2, 10), 5).unwrap();
        assert_eq!(start, 5);
        assert_eq!(snapshot.free_processors_available_at(5), 0);
    }

    #[test]
    fn test_archived_past_cannot_be_rewritten() {
        let mut snapshot = CpuSnapshot::new(8);
        snapshot.assign_job(&job(1, 2, 10), 0).unwrap();
        snapshot.archive_old_slices(50);
        let before = snapshot.slices().to_vec();

        assert!(matches!(
            snapshot.assign_job(&job(2, 1, 5), 5),
            Err(SchedulerError::ArchivedTime { time: 5, horizon: 10 })
        ));
        let j = started(3, 1, 100, 2, 0);
        assert!(matches!(
            snapshot.del_tail_of_job(&j),
            Err(SchedulerError::ArchivedTime { time: 2, horizon: 10 })
        ));
        assert_eq!(snapshot.slices(), before.as_slice());
    }

    #[test]
    fn test_archive_keeps_future_answers() {
        let mut snapshot = CpuSnapshot::new(8);
        snapshot.assign_job(&job(1, 2, 10), 0).unwrap();
        snapshot.assign_job(&job(2, 3, 10), 20).unwrap();
        snapshot.assign_job(&job(3, 1, 100), 25).unwrap();

        let probes = [30, 35, 50, 125, 200];
        let before: Vec<u32> = probes
            .iter()
            .map(|t| snapshot.free_processors_available_at(*t))
            .collect();

        let dropped = snapshot.archive_old_slices(30);
        assert!(dropped > 0);
        let after: Vec<u32> = probes
            .iter()
            .map(|t| snapshot.free_processors_available_at(*t))
            .collect();
        assert_eq!(before, after);
        assert!(snapshot.slices()[0].start <= 30);
    }

    #[test]
    fn test_queries_after_archiving() {
        let mut snapshot = CpuSnapshot::new(8);
        snapshot.assign_job(&job(1, 2, 10), 0).unwrap();
        snapshot.archive_old_slices(50);
        assert_eq!(snapshot.free_processors_available_during(50, 0), 8);
        assert_eq!(snapshot.free_processors_available_at(5), 8);
        assert_eq!(snapshot.slices().len(), 1);
    }

    #[test]
    fn test_copy_is_independent() {
        let mut snapshot = CpuSnapshot::new(8);
        snapshot.assign_job(&job(1, 4, 10), 0).unwrap();
        let mut what_if = snapshot.clone();
        what_if.assign_job(&job(2, 4, 10), 0).unwrap();

        assert_eq!(what_if.free_processors_available_at(0), 0);
        assert_eq!(snapshot.free_processors_available_at(0), 4);
    }

    #[test]
    fn test_capacity_invariant() {
        let mut snapshot = CpuSnapshot::new(16);
        let placed = [
            (job(1, 4, 30), 0),
            (job(2, 8, 10), 5),
            (job(3, 2, 50), 12),
            (job(4, 4, 7), 40),
            (job(5, 6, 20), 60),
        ];
        for (j, start) in &placed {
            snapshot.assign_job(j, *start).unwrap();
        }

        for t in 0..120 {
            let occupied: u32 = placed
                .iter()
                .filter(|(j, start)| *start <= t && t < start + j.estimated_run_time)
                .map(|(j, _)| j.num_required_processors)
                .sum();
            assert_eq!(snapshot.free_processors_available_at(t) + occupied, 16, "t={}", t);
        }
    }
}
