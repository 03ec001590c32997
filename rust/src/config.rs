//! Configuration types for the simulator.

use pyo3::prelude::*;

use crate::logging::clamp_verbosity;
use crate::scheduler::SchedulerError;
use crate::sorting::{parse_sort_keys, ScoreFunction, DEFAULT_SORT_KEYS};

/// Scheduling strategies accepted by `SchedulingConfig::strategy`.
pub const STRATEGIES: [&str; 4] = ["fcfs", "easy", "greedy", "probabilistic"];

/// Options for the greedy backfill variant.
#[pyclass]
#[derive(Clone, Debug)]
pub struct GreedyConfig {
    /// Candidate orderings to try, in tie-break order
    #[pyo3(get, set)]
    pub sort_keys: Vec<String>,
    /// How a tentative backfill set is scored: "processor_time" or "job_count"
    #[pyo3(get, set)]
    pub score_function: String,
}

impl Default for GreedyConfig {
    fn default() -> Self {
        Self {
            sort_keys: DEFAULT_SORT_KEYS
                .iter()
                .map(|k| k.name().to_string())
                .collect(),
            score_function: ScoreFunction::ProcessorTime.name().to_string(),
        }
    }
}

#[pymethods]
impl GreedyConfig {
    #[new]
    #[pyo3(signature = (sort_keys=None, score_function=None))]
    fn new(sort_keys: Option<Vec<String>>, score_function: Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            sort_keys: sort_keys.unwrap_or(defaults.sort_keys),
            score_function: score_function.unwrap_or(defaults.score_function),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "GreedyConfig(sort_keys={:?}, score_function={:?})",
            self.sort_keys, self.score_function
        )
    }
}

/// Options for the probabilistic backfill variant.
#[pyclass]
#[derive(Clone, Debug)]
pub struct ProbabilisticConfig {
    /// Highest accepted probability of delaying the head job
    #[pyo3(get, set)]
    pub threshold: f64,
    /// Number of recent completions kept per user
    #[pyo3(get, set)]
    pub window_size: usize,
}

impl Default for ProbabilisticConfig {
    fn default() -> Self {
        Self {
            threshold: 0.05,
            window_size: 150,
        }
    }
}

#[pymethods]
impl ProbabilisticConfig {
    #[new]
    #[pyo3(signature = (threshold=None, window_size=None))]
    fn new(threshold: Option<f64>, window_size: Option<usize>) -> Self {
        let defaults = Self::default();
        Self {
            threshold: threshold.unwrap_or(defaults.threshold),
            window_size: window_size.unwrap_or(defaults.window_size),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "ProbabilisticConfig(threshold={}, window_size={})",
            self.threshold, self.window_size
        )
    }
}

/// Cluster size, strategy selection and per-strategy options.
#[pyclass]
#[derive(Clone, Debug)]
pub struct SchedulingConfig {
    /// Number of interchangeable processors in the cluster
    #[pyo3(get, set)]
    pub num_processors: u32,
    /// Strategy: "fcfs", "easy", "greedy", or "probabilistic"
    #[pyo3(get, set)]
    pub strategy: String,
    /// Verbosity level: 0=silent, 1=changes, 2=checks, 3=debug
    #[pyo3(get, set)]
    pub verbosity: u8,
    #[pyo3(get, set)]
    pub greedy: GreedyConfig,
    #[pyo3(get, set)]
    pub probabilistic: ProbabilisticConfig,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            num_processors: 0,
            strategy: "easy".to_string(),
            verbosity: 0,
            greedy: GreedyConfig::default(),
            probabilistic: ProbabilisticConfig::default(),
        }
    }
}

impl SchedulingConfig {
    /// Config for `strategy` on a cluster of `num_processors`, other options default.
    pub fn for_strategy(num_processors: u32, strategy: &str) -> Self {
        Self {
            num_processors,
            strategy: strategy.to_string(),
            ..Self::default()
        }
    }

    /// Reject configurations the simulator cannot run.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.num_processors == 0 {
            return Err(SchedulerError::InvalidConfig(
                "num_processors must be positive".to_string(),
            ));
        }
        if !STRATEGIES.contains(&self.strategy.as_str()) {
            return Err(SchedulerError::UnknownStrategy(self.strategy.clone()));
        }
        match self.strategy.as_str() {
            "greedy" => {
                parse_sort_keys(&self.greedy.sort_keys)?;
                self.greedy.score_function.parse::<ScoreFunction>()?;
            }
            "probabilistic" => {
                let threshold = self.probabilistic.threshold;
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(SchedulerError::InvalidConfig(format!(
                        "threshold must be within [0, 1], got {}",
                        threshold
                    )));
                }
                if self.probabilistic.window_size == 0 {
                    return Err(SchedulerError::InvalidConfig(
                        "window_size must be positive".to_string(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[pymethods]
impl SchedulingConfig {
    #[new]
    #[pyo3(signature = (
        num_processors,
        strategy=None,
        verbosity=None,
        greedy=None,
        probabilistic=None
    ))]
    fn new(
        num_processors: u32,
        strategy: Option<String>,
        verbosity: Option<u8>,
        greedy: Option<GreedyConfig>,
        probabilistic: Option<ProbabilisticConfig>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            num_processors,
            strategy: strategy.unwrap_or(defaults.strategy),
            verbosity: clamp_verbosity(verbosity.unwrap_or(defaults.verbosity)),
            greedy: greedy.unwrap_or(defaults.greedy),
            probabilistic: probabilistic.unwrap_or(defaults.probabilistic),
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "SchedulingConfig(num_processors={}, strategy={:?}, verbosity={})",
            self.num_processors, self.strategy, self.verbosity
        )
    }
}
