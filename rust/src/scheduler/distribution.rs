//! Per-user runtime histograms over power-of-two buckets.

use std::collections::{BTreeMap, VecDeque};

use crate::models::{Time, UserId};

use super::core::SchedulerError;

/// Smallest power of two that is `>= time` (1 for 0).
pub fn round_time_up(time: Time) -> Time {
    time.max(1).next_power_of_two()
}

/// Largest power of two that is `<= time` (1 for 0).
pub fn round_time_down(time: Time) -> Time {
    1 << (63 - time.max(1).leading_zeros())
}

/// Histogram of one user's recent runtimes.
///
/// Every key in `bins` was introduced by a touch, which also counts towards
/// `number_of_jobs_added`. Real completions are kept in a sliding window; once it
/// overflows the oldest completion is taken back out of its bucket.
#[derive(Clone, Debug)]
pub struct Distribution {
    user_id: UserId,
    bins: BTreeMap<Time, u64>,
    number_of_jobs_added: u64,
    window_size: usize,
    /// Buckets of the windowed completions, oldest first
    jobs: VecDeque<Time>,
}

impl Distribution {
    /// Prior for a user's first submission: one touch for every bucket up to the
    /// rounded estimate.
    pub fn new(user_id: UserId, estimated_run_time: Time, window_size: usize) -> Self {
        let mut bins = BTreeMap::new();
        bins.insert(1, 1);
        let mut distribution = Self {
            user_id,
            bins,
            number_of_jobs_added: 1,
            window_size,
            jobs: VecDeque::new(),
        };
        distribution.touch(round_time_up(estimated_run_time));
        distribution
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn bins(&self) -> &BTreeMap<Time, u64> {
        &self.bins
    }

    pub fn count(&self, bucket: Time) -> Option<u64> {
        self.bins.get(&bucket).copied()
    }

    pub fn contains(&self, bucket: Time) -> bool {
        self.bins.contains_key(&bucket)
    }

    pub fn number_of_jobs_added(&self) -> u64 {
        self.number_of_jobs_added
    }

    pub fn window_len(&self) -> usize {
        self.jobs.len()
    }

    /// Make sure `rounded_time` and every smaller bucket exist.
    ///
    /// Walks down by halving and stops at the first bucket already present, so a
    /// repeated touch is a no-op.
    pub fn touch(&mut self, rounded_time: Time) {
        let mut bucket = rounded_time;
        while bucket > 1 && !self.bins.contains_key(&bucket) {
            self.bins.insert(bucket, 1);
            self.number_of_jobs_added += 1;
            bucket /= 2;
        }
    }

    /// Record a completion with the given actual run time.
    pub fn add_job(&mut self, actual_run_time: Time) -> Result<(), SchedulerError> {
        let bucket = round_time_up(actual_run_time);
        self.touch(bucket);

        self.number_of_jobs_added += 1;
        *self.bins.entry(bucket).or_insert(0) += 1;

        self.jobs.push_back(bucket);
        if self.jobs.len() > self.window_size {
            if let Some(oldest) = self.jobs.pop_front() {
                self.del_job(oldest)?;
            }
        }
        Ok(())
    }

    fn del_job(&mut self, bucket: Time) -> Result<(), SchedulerError> {
        let underflow = SchedulerError::DistributionUnderflow {
            user_id: self.user_id,
            bucket,
        };
        let count = match self.bins.get_mut(&bucket) {
            Some(count) if *count > 0 && self.number_of_jobs_added >= *count => count,
            _ => return Err(underflow),
        };
        *count -= 1;
        self.number_of_jobs_added -= 1;
        Ok(())
    }
}
