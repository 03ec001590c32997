//! Backfill scheduling on a shared processor-time allocation model.
//!
//! One queue-and-running-set engine handles arrivals and departures; the policy
//! injected into it decides which queued jobs may start ahead of the head job
//! (none, EASY, greedy reordering, or a probabilistic risk bound).

mod core;
mod cpu_snapshot;
mod distribution;
mod greedy;
mod policy;
mod probabilistic;
mod state;

pub use core::{BackfillScheduler, SchedulerError};
pub use cpu_snapshot::{CpuSnapshot, Slice};
pub use distribution::{round_time_down, round_time_up, Distribution};
pub use greedy::GreedyPolicy;
pub use policy::{BackfillContext, BackfillPolicy, EasyPolicy, FcfsPolicy};
pub use probabilistic::ProbabilisticPolicy;
pub use state::SchedulerState;
