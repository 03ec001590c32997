//! Greedy backfilling: reorder the candidates before the backfill pass.
//!
//! Each configured sort key yields one candidate order. The order whose greedy
//! what-if allocation scores highest replaces the queue tail, and candidates are
//! then accepted whenever they can start now.

use crate::config::GreedyConfig;
use crate::models::{Job, JobId};
use crate::sorting::{parse_sort_keys, sort_jobs, ScoreFunction, SortKey};
use crate::{log_checks, log_debug};

use super::core::SchedulerError;
use super::cpu_snapshot::CpuSnapshot;
use super::policy::{BackfillContext, BackfillPolicy};
use super::state::SchedulerState;

#[derive(Clone, Debug)]
pub struct GreedyPolicy {
    sort_keys: Vec<SortKey>,
    score_function: ScoreFunction,
    verbosity: u8,
}

impl GreedyPolicy {
    pub fn new(sort_keys: Vec<SortKey>, score_function: ScoreFunction, verbosity: u8) -> Self {
        Self {
            sort_keys,
            score_function,
            verbosity,
        }
    }

    pub fn from_config(config: &GreedyConfig, verbosity: u8) -> Result<Self, SchedulerError> {
        let sort_keys = parse_sort_keys(&config.sort_keys)?;
        let score_function = config.score_function.parse::<ScoreFunction>()?;
        Ok(Self::new(sort_keys, score_function, verbosity))
    }

    pub fn sort_keys(&self) -> &[SortKey] {
        &self.sort_keys
    }

    pub fn score_function(&self) -> ScoreFunction {
        self.score_function
    }

    /// Walk `order` on a copy of `snapshot`, keeping every job that can start now.
    fn tentative_list<'a>(
        snapshot: &CpuSnapshot,
        order: &[&'a Job],
        context: &BackfillContext,
    ) -> Result<Vec<&'a Job>, SchedulerError> {
        let mut what_if = snapshot.clone();
        let mut accepted = Vec::new();
        for &job in order {
            if what_if.can_job_start_now(job, context.current_time) {
                what_if.assign_job(job, context.current_time)?;
                accepted.push(job);
            }
        }
        Ok(accepted)
    }
}

impl BackfillPolicy for GreedyPolicy {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn keeps_queue_sorted(&self) -> bool {
        true
    }

    fn reorder_candidates(
        &mut self,
        state: &SchedulerState,
        context: &BackfillContext,
    ) -> Result<Option<Vec<JobId>>, SchedulerError> {
        let tail: Vec<&Job> = state.unscheduled.iter().skip(1).collect();
        if tail.is_empty() {
            return Ok(None);
        }

        // Candidates must leave room for the head at its earliest start
        let mut with_head = state.cpu_snapshot.clone();
        let head_start = with_head.assign_job_earliest(&context.head, context.current_time)?;
        log_debug!(
            self.verbosity,
            "  greedy holds t={} for head job {}",
            head_start,
            context.head.id
        );

        let mut best: Option<(u64, SortKey, Vec<&Job>)> = None;
        for &key in &self.sort_keys {
            let order = sort_jobs(&tail, key);
            let tentative = Self::tentative_list(&with_head, &order, context)?;
            let score = self.score_function.score(tentative.iter().copied());
            log_debug!(
                self.verbosity,
                "  greedy order {} scores {} with {} jobs",
                key.name(),
                score,
                tentative.len()
            );
            if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
                best = Some((score, key, tentative));
            }
        }

        let Some((score, key, tentative)) = best else {
            return Ok(None);
        };
        log_checks!(
            self.verbosity,
            "  greedy picked order {} (score {})",
            key.name(),
            score
        );

        let mut order: Vec<JobId> = tentative.iter().map(|j| j.id).collect();
        order.extend(
            tail.iter()
                .filter(|j| !tentative.iter().any(|t| t.id == j.id))
                .map(|j| j.id),
        );
        Ok(Some(order))
    }

    fn can_be_backfilled(
        &mut self,
        state: &SchedulerState,
        context: &BackfillContext,
        candidate: &Job,
    ) -> Result<bool, SchedulerError> {
        Ok(state
            .cpu_snapshot
            .can_job_start_now(candidate, context.current_time))
    }
}
