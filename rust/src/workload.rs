//! Standard Workload Format (SWF) traces.
//!
//! One job per line, 18 whitespace-separated fields; `;` starts a header comment.
//! Missing values are written as `-1`. Only these fields are used:
//! - 1: job number
//! - 2: submit time
//! - 4: run time
//! - 5: allocated processors
//! - 8: requested processors (falls back to allocated)
//! - 9: requested time (falls back to run time)
//! - 12: user id

use std::path::Path;

use thiserror::Error;

use crate::models::Job;
use crate::log_debug;

const JOB_NUMBER: usize = 1;
const SUBMIT_TIME: usize = 2;
const RUN_TIME: usize = 4;
const ALLOCATED_PROCESSORS: usize = 5;
const REQUESTED_PROCESSORS: usize = 8;
const REQUESTED_TIME: usize = 9;
const USER_ID: usize = 12;

#[derive(Error, Debug)]
pub enum WorkloadError {
    #[error("Line {line}: missing field {field}")]
    MissingField { line: usize, field: usize },
    #[error("Line {line}: field {field} is not a number: {value:?}")]
    InvalidField {
        line: usize,
        field: usize,
        value: String,
    },
    #[error("Failed to read workload: {0}")]
    Io(#[from] std::io::Error),
}

/// Fields of one record, 1-based like the format description.
struct Record<'a> {
    line: usize,
    fields: Vec<&'a str>,
}

impl Record<'_> {
    fn get(&self, field: usize) -> Result<i64, WorkloadError> {
        let raw = self
            .fields
            .get(field - 1)
            .ok_or(WorkloadError::MissingField {
                line: self.line,
                field,
            })?;
        // Some archives write times with a fractional part
        raw.parse::<i64>()
            .or_else(|_| raw.parse::<f64>().map(|v| v as i64))
            .map_err(|_| WorkloadError::InvalidField {
                line: self.line,
                field,
                value: raw.to_string(),
            })
    }
}

/// Parse SWF text into jobs that fit on a cluster of `num_processors`.
///
/// Records with a non-positive run time or processor count, a negative submit
/// time, or more processors than the cluster has are skipped. The actual run time
/// is cut to the requested time.
pub fn parse_swf(contents: &str, num_processors: u32) -> Result<Vec<Job>, WorkloadError> {
    parse_swf_with_verbosity(contents, num_processors, 0)
}

pub fn parse_swf_with_verbosity(
    contents: &str,
    num_processors: u32,
    verbosity: u8,
) -> Result<Vec<Job>, WorkloadError> {
    let mut jobs = Vec::new();
    let mut skipped = 0usize;

    for (idx, text) in contents.lines().enumerate() {
        let text = text.trim();
        if text.is_empty() || text.starts_with(';') {
            continue;
        }
        let record = Record {
            line: idx + 1,
            fields: text.split_whitespace().collect(),
        };

        let id = record.get(JOB_NUMBER)?;
        let submit_time = record.get(SUBMIT_TIME)?;
        let run_time = record.get(RUN_TIME)?;
        let allocated = record.get(ALLOCATED_PROCESSORS)?;
        let requested = record.get(REQUESTED_PROCESSORS)?;
        let requested_time = record.get(REQUESTED_TIME)?;
        let user_id = record.get(USER_ID)?;

        let processors = if requested > 0 { requested } else { allocated };
        let estimate = if requested_time > 0 { requested_time } else { run_time };

        if id < 0
            || submit_time < 0
            || run_time <= 0
            || processors <= 0
            || processors > num_processors as i64
        {
            log_debug!(verbosity, "skipping SWF line {}: {}", record.line, text);
            skipped += 1;
            continue;
        }

        jobs.push(Job::new(
            id as u64,
            user_id.max(0) as u64,
            submit_time as u64,
            estimate as u64,
            run_time.min(estimate) as u64,
            processors as u32,
        ));
    }

    if skipped > 0 {
        log_debug!(verbosity, "skipped {} SWF records", skipped);
    }
    Ok(jobs)
}

/// Read and parse an SWF file.
pub fn load_swf_file(
    path: impl AsRef<Path>,
    num_processors: u32,
    verbosity: u8,
) -> Result<Vec<Job>, WorkloadError> {
    let contents = std::fs::read_to_string(path)?;
    parse_swf_with_verbosity(&contents, num_processors, verbosity)
}
