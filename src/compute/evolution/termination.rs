//! Termination state machine over generation records.

use crate::schema::{GenerationRecord, RunConfig, TerminationConfig, TerminationReason, TerminationState};

/// Decides when a run stops.
///
/// `Running` is the initial state. [`TerminationController::advance`] moves
/// to `Converged`, `BudgetExhausted` or `Failed`, and
/// [`TerminationController::finish`] moves any of those to `Done`. When
/// several conditions hold at once, failure wins over budget exhaustion, and
/// budget exhaustion wins over convergence.
#[derive(Debug, Clone)]
pub struct TerminationController {
    config: TerminationConfig,
    max_failure_rate: f64,
    state: TerminationState,
    reason: Option<TerminationReason>,
}

impl TerminationController {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            config: config.termination.clone(),
            max_failure_rate: config.scoring.max_failure_rate,
            state: TerminationState::Running,
            reason: None,
        }
    }

    pub fn state(&self) -> TerminationState {
        self.state
    }

    pub fn reason(&self) -> Option<&TerminationReason> {
        self.reason.as_ref()
    }

    /// Whether any stopping condition holds. Pure.
    pub fn termination_met(&self, records: &[GenerationRecord], cancelled: bool) -> bool {
        self.check(records, cancelled).is_some()
    }

    /// The stopping condition that holds, if any. Pure.
    pub fn check(&self, records: &[GenerationRecord], cancelled: bool) -> Option<TerminationReason> {
        self.failure(records)
            .or_else(|| self.budget(records, cancelled))
            .or_else(|| self.convergence(records))
    }

    /// Re-evaluate and store the transition. Terminal states are sticky.
    pub fn advance(&mut self, records: &[GenerationRecord], cancelled: bool) -> TerminationState {
        if self.state == TerminationState::Running
            && let Some(reason) = self.check(records, cancelled)
        {
            self.state = reason.state();
            self.reason = Some(reason);
        }
        self.state
    }

    /// Move a terminal state to `Done`.
    pub fn finish(&mut self) -> TerminationState {
        if self.state.is_terminal() {
            self.state = TerminationState::Done;
        }
        self.state
    }

    fn failure(&self, records: &[GenerationRecord]) -> Option<TerminationReason> {
        let last = records.last()?;
        let rate = last.failure_rate();
        if rate > self.max_failure_rate {
            return Some(TerminationReason::ScoringFailureRate {
                rate,
                threshold: self.max_failure_rate,
            });
        }

        let stalled = records
            .iter()
            .rev()
            .take_while(|r| r.children_produced == 0)
            .count();
        (stalled >= self.config.stall_generations)
            .then_some(TerminationReason::Stalled { generations: stalled })
    }

    fn budget(&self, records: &[GenerationRecord], cancelled: bool) -> Option<TerminationReason> {
        if cancelled {
            return Some(TerminationReason::Cancelled);
        }
        let last = records.last()?;
        if let Some(max) = self.config.max_generations
            && last.generation >= max
        {
            return Some(TerminationReason::MaxGenerations);
        }
        if let Some(max) = self.config.max_wall_clock_secs
            && last.elapsed_seconds >= max
        {
            return Some(TerminationReason::WallClock);
        }
        None
    }

    fn convergence(&self, records: &[GenerationRecord]) -> Option<TerminationReason> {
        let last = records.last()?;

        if let Some(target) = self.config.target_score {
            let value = if self.config.target_uses_mean {
                last.mean_fitness
            } else {
                last.best_ever
            };
            if value.is_some_and(|v| v >= target) {
                return Some(TerminationReason::TargetReached);
            }
        }

        let plateau = self.config.plateau.as_ref()?;
        let mut best = records[0].best_ever;
        let mut stuck = 0;
        for record in &records[1..] {
            let improved = match (record.best_ever, best) {
                (Some(current), Some(reference)) => current > reference + plateau.epsilon,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if improved {
                best = record.best_ever;
                stuck = 0;
            } else {
                stuck += 1;
            }
        }
        (stuck >= plateau.patience).then_some(TerminationReason::Plateau { generations: stuck })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::PlateauConfig;

    fn record(generation: usize, best: f64) -> GenerationRecord {
        GenerationRecord {
            generation,
            best_fitness: Some(best),
            mean_fitness: Some(best / 2.0),
            best_ever: Some(best),
            population_size: 10,
            children_requested: 5,
            children_produced: 5,
            child_attempts: 5,
            rejected_invalid: 0,
            rejected_duplicate: 0,
            rejected_similar: 0,
            operator_failures: 0,
            scoring_calls: 5,
            scoring_failures: 0,
            scoring_cancelled: 0,
            cache_hits: 0,
            diversity: 0.5,
            elapsed_seconds: generation as f64,
        }
    }

    fn history(bests: &[f64]) -> Vec<GenerationRecord> {
        bests
            .iter()
            .enumerate()
            .map(|(i, &b)| record(i + 1, b))
            .collect()
    }

    fn make_controller(configure: impl FnOnce(&mut RunConfig)) -> TerminationController {
        let mut config = RunConfig::default();
        configure(&mut config);
        TerminationController::new(&config)
    }

    #[test]
    fn test_plateau_converges_exactly_at_third_generation() {
        let controller = make_controller(|c| {
            c.termination.plateau = Some(PlateauConfig {
                epsilon: 0.0,
                patience: 2,
            });
        });
        let records = history(&[5.0, 5.0, 5.0]);

        assert_eq!(controller.check(&records[..1], false), None);
        assert_eq!(controller.check(&records[..2], false), None);
        assert_eq!(
            controller.check(&records, false),
            Some(TerminationReason::Plateau { generations: 2 })
        );
    }

    #[test]
    fn test_improvement_within_epsilon_is_not_progress() {
        let controller = make_controller(|c| {
            c.termination.plateau = Some(PlateauConfig {
                epsilon: 0.5,
                patience: 2,
            });
        });
        assert!(controller.termination_met(&history(&[1.0, 1.2, 1.4]), false));
        assert!(!controller.termination_met(&history(&[1.0, 1.6, 1.8]), false));
    }

    #[test]
    fn test_generation_and_wall_clock_budget() {
        let controller = make_controller(|c| c.termination.max_generations = Some(3));
        assert!(!controller.termination_met(&history(&[1.0, 2.0]), false));
        assert_eq!(
            controller.check(&history(&[1.0, 2.0, 3.0]), false),
            Some(TerminationReason::MaxGenerations)
        );

        let controller = make_controller(|c| {
            c.termination.max_generations = None;
            c.termination.max_wall_clock_secs = Some(1.5);
        });
        assert_eq!(
            controller.check(&history(&[1.0, 2.0]), false),
            Some(TerminationReason::WallClock)
        );
    }

    #[test]
    fn test_cancellation_exhausts_budget() {
        let controller = make_controller(|_| {});
        assert_eq!(controller.check(&[], true), Some(TerminationReason::Cancelled));
        assert_eq!(controller.check(&[], false), None);
    }

    #[test]
    fn test_failure_rate_above_threshold() {
        let controller = make_controller(|_| {});
        let mut records = history(&[1.0]);
        records[0].scoring_failures = 2;
        assert!(!controller.termination_met(&records, false));
        records[0].scoring_failures = 5;
        assert_eq!(
            controller.check(&records, false),
            Some(TerminationReason::ScoringFailureRate {
                rate: 1.0,
                threshold: 0.5
            })
        );
    }

    #[test]
    fn test_rate_at_threshold_is_tolerated() {
        let controller = make_controller(|c| c.scoring.max_failure_rate = 0.6);
        let mut records = history(&[1.0]);
        records[0].scoring_failures = 3;
        assert!(!controller.termination_met(&records, false));
    }

    #[test]
    fn test_stall_counts_trailing_generations() {
        let controller = make_controller(|c| c.termination.stall_generations = 2);
        let mut records = history(&[1.0, 1.0, 1.0]);
        records[1].children_produced = 0;
        assert!(!controller.termination_met(&records, false));
        records[2].children_produced = 0;
        assert_eq!(
            controller.check(&records, false),
            Some(TerminationReason::Stalled { generations: 2 })
        );
    }

    #[test]
    fn test_failure_takes_precedence() {
        let controller = make_controller(|c| {
            c.termination.max_generations = Some(1);
            c.termination.target_score = Some(0.0);
        });
        let mut records = history(&[1.0]);
        assert_eq!(
            controller.check(&records, false),
            Some(TerminationReason::MaxGenerations)
        );
        records[0].scoring_failures = 5;
        assert_eq!(
            controller.check(&records, true).map(|r| r.state()),
            Some(TerminationState::Failed)
        );
    }

    #[test]
    fn test_target_score_on_best_or_mean() {
        let controller = make_controller(|c| c.termination.target_score = Some(4.0));
        assert_eq!(
            controller.check(&history(&[4.0]), false),
            Some(TerminationReason::TargetReached)
        );

        let controller = make_controller(|c| {
            c.termination.target_score = Some(4.0);
            c.termination.target_uses_mean = true;
        });
        assert_eq!(controller.check(&history(&[4.0]), false), None);
        assert!(controller.termination_met(&history(&[8.0]), false));
    }

    #[test]
    fn test_state_transitions() {
        let mut controller = make_controller(|c| c.termination.max_generations = Some(1));
        assert_eq!(controller.state(), TerminationState::Running);
        assert_eq!(controller.finish(), TerminationState::Running);

        assert_eq!(controller.advance(&[], false), TerminationState::Running);
        assert_eq!(
            controller.advance(&history(&[1.0]), false),
            TerminationState::BudgetExhausted
        );
        assert_eq!(controller.reason(), Some(&TerminationReason::MaxGenerations));
        assert_eq!(controller.finish(), TerminationState::Done);
        assert_eq!(controller.advance(&history(&[1.0]), true), TerminationState::Done);
    }
}
