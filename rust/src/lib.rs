//! Discrete-event simulator for backfill scheduling on a parallel cluster.
//!
//! Jobs arrive over time with a processor count and a user-estimated run time; the
//! scheduler starts them in arrival order and lets later jobs backfill into idle
//! processors under one of several policies (FCFS, EASY, greedy, probabilistic).

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use pyo3::prelude::*;

mod config;
pub mod events;
pub mod logging;
mod models;
pub mod scheduler;
pub mod simulator;
pub mod sorting;
pub mod workload;

pub use config::{GreedyConfig, ProbabilisticConfig, SchedulingConfig, STRATEGIES};
pub use events::{Event, EventKind, EventQueue};
pub use models::{Job, JobId, ScheduledJob, SimulationResult, Time, UserId};
pub use scheduler::{BackfillScheduler, CpuSnapshot, SchedulerError};
pub use simulator::{run_simulation, Simulator};
pub use sorting::{ScoreFunction, SortKey, SortingError};
pub use workload::{load_swf_file, parse_swf, WorkloadError};

/// Simulate a workload under the configured backfill strategy.
///
/// # Arguments
/// * `jobs` - Jobs to submit; actual run times above the estimate are cut to it
/// * `config` - Cluster size, strategy and strategy options
///
/// # Returns
/// * SimulationResult with one ScheduledJob per input job and run statistics
///
/// # Raises
/// * ValueError on an invalid configuration or workload
#[pyfunction]
#[pyo3(name = "run_simulation")]
fn py_run_simulation(jobs: Vec<Job>, config: SchedulingConfig) -> PyResult<SimulationResult> {
    match run_simulation(jobs, &config) {
        Ok(result) => Ok(result),
        Err(e) => Err(pyo3::exceptions::PyValueError::new_err(e.to_string())),
    }
}

/// Parse Standard Workload Format text into jobs that fit on `num_processors`.
#[pyfunction]
fn parse_swf_workload(contents: &str, num_processors: u32) -> PyResult<Vec<Job>> {
    parse_swf(contents, num_processors)
        .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))
}

/// Load an SWF trace from `path` and simulate it.
///
/// # Raises
/// * ValueError if the file cannot be read or parsed, or the run fails
#[pyfunction]
fn run_swf_file(path: &str, config: SchedulingConfig) -> PyResult<SimulationResult> {
    let jobs = load_swf_file(path, config.num_processors, config.verbosity)
        .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))?;
    run_simulation(jobs, &config)
        .map_err(|e| pyo3::exceptions::PyValueError::new_err(e.to_string()))
}

/// The backfill_sim.rust Python module.
#[pymodule]
fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Core data types
    m.add_class::<Job>()?;
    m.add_class::<ScheduledJob>()?;
    m.add_class::<SimulationResult>()?;

    // Config types
    m.add_class::<SchedulingConfig>()?;
    m.add_class::<GreedyConfig>()?;
    m.add_class::<ProbabilisticConfig>()?;

    // Simulation
    m.add_function(wrap_pyfunction!(py_run_simulation, m)?)?;
    m.add_function(wrap_pyfunction!(parse_swf_workload, m)?)?;
    m.add_function(wrap_pyfunction!(run_swf_file, m)?)?;

    Ok(())
}
