//! Candidate orderings and scores for the greedy backfill variant.
//!
//! Sort keys:
//! - `reverse_submit_time`: newest submissions first
//! - `submit_time`: oldest submissions first
//! - `num_processors`: narrowest jobs first
//! - `estimated_run_time`: shortest estimates first
//! - `area`: smallest processors x estimate first
//!
//! Score functions rate a tentative backfill set; higher is better.

use std::cmp::Ordering;
use std::str::FromStr;

use crate::models::Job;

/// Errors that can occur while parsing sorting configuration.
#[derive(Debug, Clone)]
pub enum SortingError {
    UnknownSortKey(String),
    UnknownScoreFunction(String),
    EmptySortKeys,
}

impl std::fmt::Display for SortingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownSortKey(s) => write!(f, "Unknown sort key: {}", s),
            Self::UnknownScoreFunction(s) => write!(f, "Unknown score function: {}", s),
            Self::EmptySortKeys => write!(f, "Greedy backfill needs at least one sort key"),
        }
    }
}

impl std::error::Error for SortingError {}

/// A way of ordering backfill candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    ReverseSubmitTime,
    SubmitTime,
    NumProcessors,
    EstimatedRunTime,
    Area,
}

/// Orderings tried by the greedy variant unless configured otherwise.
pub const DEFAULT_SORT_KEYS: [SortKey; 4] = [
    SortKey::ReverseSubmitTime,
    SortKey::SubmitTime,
    SortKey::NumProcessors,
    SortKey::EstimatedRunTime,
];

impl SortKey {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReverseSubmitTime => "reverse_submit_time",
            Self::SubmitTime => "submit_time",
            Self::NumProcessors => "num_processors",
            Self::EstimatedRunTime => "estimated_run_time",
            Self::Area => "area",
        }
    }

    /// Compare two jobs under this key (lower = tried first).
    pub fn compare(&self, a: &Job, b: &Job) -> Ordering {
        match self {
            Self::ReverseSubmitTime => b.submit_time.cmp(&a.submit_time),
            Self::SubmitTime => a.submit_time.cmp(&b.submit_time),
            Self::NumProcessors => a.num_required_processors.cmp(&b.num_required_processors),
            Self::EstimatedRunTime => a.estimated_run_time.cmp(&b.estimated_run_time),
            Self::Area => a.estimated_area().cmp(&b.estimated_area()),
        }
    }
}

impl FromStr for SortKey {
    type Err = SortingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reverse_submit_time" => Ok(Self::ReverseSubmitTime),
            "submit_time" => Ok(Self::SubmitTime),
            "num_processors" => Ok(Self::NumProcessors),
            "estimated_run_time" => Ok(Self::EstimatedRunTime),
            "area" => Ok(Self::Area),
            _ => Err(SortingError::UnknownSortKey(s.to_string())),
        }
    }
}

/// Rates a tentative list of backfilled jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreFunction {
    /// Sum of processors x estimated run time.
    ProcessorTime,
    /// Number of jobs started.
    JobCount,
}

impl ScoreFunction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProcessorTime => "processor_time",
            Self::JobCount => "job_count",
        }
    }

    pub fn score<'a>(&self, jobs: impl IntoIterator<Item = &'a Job>) -> u64 {
        match self {
            Self::ProcessorTime => jobs.into_iter().map(Job::estimated_area).sum(),
            Self::JobCount => jobs.into_iter().count() as u64,
        }
    }
}

impl FromStr for ScoreFunction {
    type Err = SortingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processor_time" => Ok(Self::ProcessorTime),
            "job_count" => Ok(Self::JobCount),
            _ => Err(SortingError::UnknownScoreFunction(s.to_string())),
        }
    }
}

/// Parse a list of sort key names, keeping their order.
pub fn parse_sort_keys(names: &[String]) -> Result<Vec<SortKey>, SortingError> {
    if names.is_empty() {
        return Err(SortingError::EmptySortKeys);
    }
    names.iter().map(|name| name.parse()).collect()
}

/// Return `jobs` ordered by `key`. Equal keys keep their relative order.
pub fn sort_jobs<'a>(jobs: &[&'a Job], key: SortKey) -> Vec<&'a Job> {
    let mut sorted = jobs.to_vec();
    sorted.sort_by(|a, b| key.compare(a, b));
    sorted
}
