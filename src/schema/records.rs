//! Per-individual status, per-generation records and run results.

use serde::{Deserialize, Serialize};

/// Unique identifier of an individual for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndividualId(pub u64);

impl std::fmt::Display for IndividualId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an individual came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lineage {
    /// Supplied by the caller before the first generation.
    Seed,
    /// Produced by a graph-edit operator.
    Child,
}

/// Graph-edit operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatorKind {
    /// Change the element of one atom.
    PointMutation,
    /// Attach a new atom to an atom with free valence.
    PeripheralExpansion,
    /// Remove an atom with a single neighbor.
    PeripheralDeletion,
    /// Replace the smaller side of a bridge bond with a library fragment.
    FragmentSubstitution,
    /// Join complementary halves of two parents cut at bridge bonds.
    Crossover,
}

impl OperatorKind {
    pub const ALL: [OperatorKind; 5] = [
        OperatorKind::PointMutation,
        OperatorKind::PeripheralExpansion,
        OperatorKind::PeripheralDeletion,
        OperatorKind::FragmentSubstitution,
        OperatorKind::Crossover,
    ];

    /// Number of parents the operator consumes.
    pub fn arity(self) -> usize {
        match self {
            OperatorKind::Crossover => 2,
            _ => 1,
        }
    }
}

/// Why scoring an individual produced no usable fitness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ScoreFailure {
    /// The scorer returned an error.
    Error { message: String },
    /// The scorer returned NaN or an infinity.
    NotFinite,
    /// The scorer did not answer within the configured timeout.
    Timeout,
    /// The scorer panicked.
    Panicked,
    /// The run was cancelled before this individual was scored.
    Cancelled,
}

/// Scoring status of an individual.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum ScoreState {
    /// Not yet scored.
    #[default]
    Pending,
    /// Scored successfully.
    Scored { fitness: f64 },
    /// Scoring failed; the individual cannot survive selection.
    Failed { failure: ScoreFailure },
}

impl ScoreState {
    pub fn fitness(&self) -> Option<f64> {
        match self {
            ScoreState::Scored { fitness } => Some(*fitness),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ScoreState::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ScoreState::Failed { .. })
    }
}

/// Read-only view of an individual, used in results and checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndividualSnapshot {
    pub id: IndividualId,
    /// Canonical text of the molecule.
    pub text: String,
    pub lineage: Lineage,
    pub score: ScoreState,
    /// Generation in which the individual was created (0 for seeds).
    pub generation: usize,
    /// Parent ids (empty for seeds).
    #[serde(default)]
    pub parents: Vec<IndividualId>,
    /// Operator that produced the individual.
    #[serde(default)]
    pub operator: Option<OperatorKind>,
}

/// Immutable summary of one completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    /// Generation index, starting at 1.
    pub generation: usize,
    /// Best fitness among survivors.
    pub best_fitness: Option<f64>,
    /// Mean fitness of scored survivors.
    pub mean_fitness: Option<f64>,
    /// Best fitness seen in the run so far.
    pub best_ever: Option<f64>,
    /// Survivors after selection.
    pub population_size: usize,
    pub children_requested: usize,
    pub children_produced: usize,
    /// Operator applications attempted while producing children.
    pub child_attempts: usize,
    pub rejected_invalid: usize,
    pub rejected_duplicate: usize,
    pub rejected_similar: usize,
    pub operator_failures: usize,
    /// Scorer invocations (cache hits excluded).
    pub scoring_calls: usize,
    /// Failed scorer invocations, cancellations excluded.
    pub scoring_failures: usize,
    pub scoring_cancelled: usize,
    pub cache_hits: usize,
    /// Mean pairwise structural distance among survivors.
    pub diversity: f64,
    /// Seconds since the run started.
    pub elapsed_seconds: f64,
}

impl GenerationRecord {
    /// Share of scoring calls that failed.
    pub fn failure_rate(&self) -> f64 {
        if self.scoring_calls == 0 {
            0.0
        } else {
            self.scoring_failures as f64 / self.scoring_calls as f64
        }
    }
}

/// States of the termination state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TerminationState {
    #[default]
    Running,
    Converged,
    BudgetExhausted,
    Failed,
    /// Finalization has run.
    Done,
}

impl TerminationState {
    /// Whether no further generations will run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TerminationState::Running)
    }
}

/// Reason a run stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Reached the generation budget.
    MaxGenerations,
    /// Reached the wall-clock budget.
    WallClock,
    /// The caller cancelled the run.
    Cancelled,
    /// No improvement beyond epsilon for `patience` generations.
    Plateau { generations: usize },
    /// Best (or mean) fitness reached the target score.
    TargetReached,
    /// Scoring failure rate exceeded the threshold.
    ScoringFailureRate { rate: f64, threshold: f64 },
    /// No valid child produced for several consecutive generations.
    Stalled { generations: usize },
}

impl TerminationReason {
    /// Terminal state this reason leads to.
    pub fn state(&self) -> TerminationState {
        match self {
            TerminationReason::MaxGenerations
            | TerminationReason::WallClock
            | TerminationReason::Cancelled => TerminationState::BudgetExhausted,
            TerminationReason::Plateau { .. } | TerminationReason::TargetReached => {
                TerminationState::Converged
            }
            TerminationReason::ScoringFailureRate { .. } | TerminationReason::Stalled { .. } => {
                TerminationState::Failed
            }
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationReason::MaxGenerations => write!(f, "generation budget reached"),
            TerminationReason::WallClock => write!(f, "wall-clock budget reached"),
            TerminationReason::Cancelled => write!(f, "cancelled"),
            TerminationReason::Plateau { generations } => {
                write!(f, "no improvement for {generations} generations")
            }
            TerminationReason::TargetReached => write!(f, "target score reached"),
            TerminationReason::ScoringFailureRate { rate, threshold } => write!(
                f,
                "scoring failure rate {:.1}% exceeded {:.1}%",
                rate * 100.0,
                threshold * 100.0
            ),
            TerminationReason::Stalled { generations } => {
                write!(f, "no valid children for {generations} generations")
            }
        }
    }
}

/// Aggregate statistics of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub generations: usize,
    pub scoring_calls: u64,
    pub scoring_failures: u64,
    pub cache_hits: u64,
    pub best_fitness: Option<f64>,
    pub elapsed_seconds: f64,
}

/// Final result of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    /// Final population, best first.
    pub population: Vec<IndividualSnapshot>,
    /// One record per completed generation.
    pub records: Vec<GenerationRecord>,
    /// Terminal state reached before finalization.
    pub state: TerminationState,
    pub reason: TerminationReason,
    pub stats: RunStats,
}

impl RunOutcome {
    /// Best scored individual of the final population.
    pub fn best(&self) -> Option<&IndividualSnapshot> {
        self.population.iter().find(|i| i.score.fitness().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_states() {
        assert_eq!(
            TerminationReason::MaxGenerations.state(),
            TerminationState::BudgetExhausted
        );
        assert_eq!(
            TerminationReason::Plateau { generations: 2 }.state(),
            TerminationState::Converged
        );
        assert_eq!(
            TerminationReason::Stalled { generations: 3 }.state(),
            TerminationState::Failed
        );
        assert!(!TerminationState::Running.is_terminal());
        assert!(TerminationState::Done.is_terminal());
    }

    #[test]
    fn test_failure_rate_without_calls() {
        let record = GenerationRecord {
            generation: 1,
            best_fitness: None,
            mean_fitness: None,
            best_ever: None,
            population_size: 0,
            children_requested: 0,
            children_produced: 0,
            child_attempts: 0,
            rejected_invalid: 0,
            rejected_duplicate: 0,
            rejected_similar: 0,
            operator_failures: 0,
            scoring_calls: 0,
            scoring_failures: 0,
            scoring_cancelled: 0,
            cache_hits: 0,
            diversity: 0.0,
            elapsed_seconds: 0.0,
        };
        assert_eq!(record.failure_rate(), 0.0);
    }

    #[test]
    fn test_score_state_serialization() {
        let state = ScoreState::Failed {
            failure: ScoreFailure::Error {
                message: "boom".to_string(),
            },
        };
        let json = serde_json::to_string(&state).unwrap();
        let parsed: ScoreState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
