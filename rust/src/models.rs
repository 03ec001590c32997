//! Core data types for the simulator.

use pyo3::prelude::*;
use std::collections::HashMap;

// Note: We use std HashMap here for PyO3 interface compatibility

/// Simulation time in seconds.
pub type Time = u64;
/// Job identity (the workload's job number).
pub type JobId = u64;
/// User identity, used to key runtime distributions.
pub type UserId = u64;

/// A job submitted to the cluster.
///
/// Everything except `start_to_run_at_time` is fixed at submission. The actual run
/// time is ground truth that the schedulers only look at once the job terminates.
#[pyclass]
#[derive(Clone, Debug, PartialEq)]
pub struct Job {
    #[pyo3(get, set)]
    pub id: JobId,
    #[pyo3(get, set)]
    pub user_id: UserId,
    #[pyo3(get, set)]
    pub submit_time: Time,
    #[pyo3(get, set)]
    pub estimated_run_time: Time,
    #[pyo3(get, set)]
    pub actual_run_time: Time,
    #[pyo3(get, set)]
    pub num_required_processors: u32,
    #[pyo3(get)]
    pub start_to_run_at_time: Option<Time>,
}

impl Job {
    /// Build a job that has not started yet.
    pub fn new(
        id: JobId,
        user_id: UserId,
        submit_time: Time,
        estimated_run_time: Time,
        actual_run_time: Time,
        num_required_processors: u32,
    ) -> Self {
        Self {
            id,
            user_id,
            submit_time,
            estimated_run_time,
            actual_run_time,
            num_required_processors,
            start_to_run_at_time: None,
        }
    }

    /// Processor-seconds reserved by the estimate.
    pub fn estimated_area(&self) -> u64 {
        self.num_required_processors as u64 * self.estimated_run_time
    }

    /// End of the reservation made for this job, if it has started.
    pub fn estimated_end_time(&self) -> Option<Time> {
        self.start_to_run_at_time
            .map(|start| start + self.estimated_run_time)
    }

    /// Time the job really finishes, if it has started.
    pub fn actual_end_time(&self) -> Option<Time> {
        self.start_to_run_at_time.map(|start| start + self.actual_run_time)
    }
}

#[pymethods]
impl Job {
    #[new]
    #[pyo3(signature = (
        id,
        submit_time,
        estimated_run_time,
        actual_run_time,
        num_required_processors,
        user_id=0
    ))]
    fn py_new(
        id: JobId,
        submit_time: Time,
        estimated_run_time: Time,
        actual_run_time: Time,
        num_required_processors: u32,
        user_id: UserId,
    ) -> Self {
        Self::new(
            id,
            user_id,
            submit_time,
            estimated_run_time,
            actual_run_time,
            num_required_processors,
        )
    }

    fn __repr__(&self) -> String {
        format!(
            "Job(id={}, user={}, submit={}, estimate={}, actual={}, processors={})",
            self.id,
            self.user_id,
            self.submit_time,
            self.estimated_run_time,
            self.actual_run_time,
            self.num_required_processors
        )
    }
}

/// A job after the simulation has run it.
#[pyclass]
#[derive(Clone, Debug)]
pub struct ScheduledJob {
    #[pyo3(get, set)]
    pub job_id: JobId,
    #[pyo3(get, set)]
    pub user_id: UserId,
    #[pyo3(get, set)]
    pub submit_time: Time,
    #[pyo3(get, set)]
    pub start_time: Time,
    #[pyo3(get, set)]
    pub end_time: Time,
    #[pyo3(get, set)]
    pub num_processors: u32,
}

impl ScheduledJob {
    pub fn wait_time(&self) -> Time {
        self.start_time.saturating_sub(self.submit_time)
    }

    /// Bounded slowdown: response time over run time, with short runs padded up to
    /// `bound` so that tiny jobs do not dominate the average.
    pub fn bounded_slowdown(&self, bound: Time) -> f64 {
        let run_time = self.end_time.saturating_sub(self.start_time);
        let response = self.end_time.saturating_sub(self.submit_time);
        (response as f64 / run_time.max(bound) as f64).max(1.0)
    }
}

#[pymethods]
impl ScheduledJob {
    #[getter(wait_time)]
    fn py_wait_time(&self) -> Time {
        self.wait_time()
    }

    fn __repr__(&self) -> String {
        format!(
            "ScheduledJob(job_id={}, start={}, end={}, wait={})",
            self.job_id,
            self.start_time,
            self.end_time,
            self.wait_time()
        )
    }
}

/// Result of a simulation run.
#[pyclass]
#[derive(Clone, Debug, Default)]
pub struct SimulationResult {
    #[pyo3(get, set)]
    pub scheduled_jobs: Vec<ScheduledJob>,
    #[pyo3(get, set)]
    pub algorithm_metadata: HashMap<String, String>,
}

#[pymethods]
impl SimulationResult {
    fn __repr__(&self) -> String {
        format!(
            "SimulationResult(scheduled_jobs={}, metadata_keys={})",
            self.scheduled_jobs.len(),
            self.algorithm_metadata.len()
        )
    }
}
