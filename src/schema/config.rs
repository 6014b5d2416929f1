//! Run configuration for evolutionary molecular design.

use serde::{Deserialize, Serialize};

/// Top-level configuration of an evolution run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    /// Population size and brood size.
    #[serde(default)]
    pub population: PopulationConfig,
    /// Relative weights of the graph-edit operators.
    #[serde(default)]
    pub operators: OperatorWeights,
    /// How parents are drawn from the survivors.
    #[serde(default)]
    pub parent_selection: ParentSelection,
    /// Child generation limits and filters.
    #[serde(default)]
    pub children: ChildConfig,
    /// Survivor selection settings.
    #[serde(default)]
    pub selection: SelectionConfig,
    /// Stopping conditions.
    #[serde(default)]
    pub termination: TerminationConfig,
    /// Scoring dispatch settings.
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Periodic checkpointing.
    #[serde(default)]
    pub checkpoint: Option<CheckpointConfig>,
    /// Random seed for reproducibility.
    #[serde(default)]
    pub random_seed: Option<u64>,
}

/// Population and generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationConfig {
    /// Maximum number of survivors kept after each generation.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Number of children requested per generation.
    #[serde(default = "default_children_per_generation")]
    pub children_per_generation: usize,
    /// Unscored seeds smaller than this are grown by peripheral expansion
    /// before the first scoring pass.
    #[serde(default)]
    pub min_seed_atoms: Option<usize>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            children_per_generation: default_children_per_generation(),
            min_seed_atoms: None,
        }
    }
}

fn default_max_size() -> usize {
    100
}
fn default_children_per_generation() -> usize {
    100
}

/// Integer weights of the graph-edit operators.
///
/// An operator is drawn with probability proportional to its weight; a weight
/// of zero disables it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorWeights {
    #[serde(default = "default_point_mutation_weight")]
    pub point_mutation: u32,
    #[serde(default = "default_expansion_weight")]
    pub peripheral_expansion: u32,
    #[serde(default = "default_deletion_weight")]
    pub peripheral_deletion: u32,
    #[serde(default = "default_substitution_weight")]
    pub fragment_substitution: u32,
    #[serde(default = "default_crossover_weight")]
    pub crossover: u32,
}

impl Default for OperatorWeights {
    fn default() -> Self {
        Self {
            point_mutation: default_point_mutation_weight(),
            peripheral_expansion: default_expansion_weight(),
            peripheral_deletion: default_deletion_weight(),
            fragment_substitution: default_substitution_weight(),
            crossover: default_crossover_weight(),
        }
    }
}

fn default_point_mutation_weight() -> u32 {
    10
}
fn default_expansion_weight() -> u32 {
    4
}
fn default_deletion_weight() -> u32 {
    4
}
fn default_substitution_weight() -> u32 {
    28
}
fn default_crossover_weight() -> u32 {
    10
}

/// Parent selection policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum ParentSelection {
    /// Best of `size` uniformly drawn candidates.
    Tournament {
        #[serde(default = "default_tournament_size")]
        size: usize,
    },
    /// Probability proportional to `(fitness - min + eps)^gamma`.
    FitnessProportional {
        #[serde(default = "default_gamma")]
        gamma: f64,
    },
    /// Probability proportional to rank (best gets the largest weight).
    RankBased,
    /// Every candidate equally likely.
    Uniform,
}

impl Default for ParentSelection {
    fn default() -> Self {
        Self::Tournament {
            size: default_tournament_size(),
        }
    }
}

fn default_tournament_size() -> usize {
    3
}
fn default_gamma() -> f64 {
    2.5
}

/// Child generation limits and filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildConfig {
    /// Attempts per requested child before the slot is left empty.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    /// Reject children whose canonical text matches a live individual.
    #[serde(default = "default_duplicate_suppression")]
    pub duplicate_suppression: bool,
    /// Minimum heavy atom count of a child.
    #[serde(default = "default_min_atoms")]
    pub min_atoms: usize,
    /// Maximum heavy atom count of a child.
    #[serde(default = "default_max_atoms")]
    pub max_atoms: usize,
    /// Reject children more similar than this (1 - distance) to a parent.
    #[serde(default)]
    pub max_parent_similarity: Option<f64>,
    /// Maximum number of atoms that lie on a ring.
    #[serde(default)]
    pub max_ring_atoms: Option<usize>,
    /// Maximum size of the smallest ring through any ring bond.
    #[serde(default)]
    pub max_ring_size: Option<usize>,
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            duplicate_suppression: default_duplicate_suppression(),
            min_atoms: default_min_atoms(),
            max_atoms: default_max_atoms(),
            max_parent_similarity: None,
            max_ring_atoms: None,
            max_ring_size: None,
        }
    }
}

fn default_max_attempts() -> usize {
    10
}
fn default_duplicate_suppression() -> bool {
    true
}
fn default_min_atoms() -> usize {
    1
}
fn default_max_atoms() -> usize {
    60
}

/// Survivor selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Always keep the best scored individual.
    #[serde(default = "default_elitism")]
    pub elitism: bool,
    /// Whether parents compete with children.
    #[serde(default)]
    pub replacement: Replacement,
    /// Diversity-preserving niche clearing.
    #[serde(default)]
    pub niching: NichingConfig,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            elitism: default_elitism(),
            replacement: Replacement::default(),
            niching: NichingConfig::default(),
        }
    }
}

fn default_elitism() -> bool {
    true
}

/// Replacement strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Replacement {
    /// Parents and children compete on equal terms.
    #[default]
    Plus,
    /// Children of the current generation rank ahead of older individuals.
    Comma,
}

/// Niche clearing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NichingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Structural distance below which two individuals share a niche.
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f64,
    /// Survivors allowed per niche before further members are deferred.
    #[serde(default = "default_niche_capacity")]
    pub niche_capacity: usize,
}

impl Default for NichingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            distance_threshold: default_distance_threshold(),
            niche_capacity: default_niche_capacity(),
        }
    }
}

fn default_distance_threshold() -> f64 {
    0.2
}
fn default_niche_capacity() -> usize {
    1
}

/// Stopping conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationConfig {
    /// Maximum number of generations.
    #[serde(default = "default_max_generations")]
    pub max_generations: Option<usize>,
    /// Wall-clock budget in seconds.
    #[serde(default)]
    pub max_wall_clock_secs: Option<f64>,
    /// Stop when the best fitness stops improving.
    #[serde(default)]
    pub plateau: Option<PlateauConfig>,
    /// Stop once this score is reached.
    #[serde(default)]
    pub target_score: Option<f64>,
    /// Compare the target against the mean rather than the best fitness.
    #[serde(default)]
    pub target_uses_mean: bool,
    /// Consecutive generations without any valid child before the run fails.
    #[serde(default = "default_stall_generations")]
    pub stall_generations: usize,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            max_generations: default_max_generations(),
            max_wall_clock_secs: None,
            plateau: None,
            target_score: None,
            target_uses_mean: false,
            stall_generations: default_stall_generations(),
        }
    }
}

fn default_max_generations() -> Option<usize> {
    Some(100)
}
fn default_stall_generations() -> usize {
    5
}

/// Fitness plateau detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateauConfig {
    /// Minimum improvement that counts as progress.
    #[serde(default)]
    pub epsilon: f64,
    /// Consecutive non-improving generations tolerated.
    #[serde(default = "default_patience")]
    pub patience: usize,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.0,
            patience: default_patience(),
        }
    }
}

fn default_patience() -> usize {
    1000
}

/// Scoring dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Failure rate per generation above which the run fails.
    #[serde(default = "default_max_failure_rate")]
    pub max_failure_rate: f64,
    /// Per-call timeout in milliseconds. A call that times out keeps running
    /// on a detached thread until the scorer returns.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Timed-out calls allowed to keep running beyond the worker count.
    /// Once reached, further calls fail immediately instead of spawning.
    #[serde(default = "default_max_stalled_calls")]
    pub max_stalled_calls: usize,
    /// Number of parallel scoring workers (0 = auto-detect).
    #[serde(default)]
    pub parallel_workers: usize,
    /// Reuse scores of canonical texts already scored in this run.
    #[serde(default = "default_cache_scores")]
    pub cache_scores: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_failure_rate: default_max_failure_rate(),
            timeout_ms: None,
            max_stalled_calls: default_max_stalled_calls(),
            parallel_workers: 0,
            cache_scores: default_cache_scores(),
        }
    }
}

fn default_max_failure_rate() -> f64 {
    0.5
}
fn default_max_stalled_calls() -> usize {
    16
}
fn default_cache_scores() -> bool {
    true
}

/// Periodic checkpoint output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// File the checkpoint is written to.
    pub path: String,
    /// Write every N generations (0 = only on finalization).
    #[serde(default)]
    pub every_generations: usize,
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Population max size must be at least 1")]
    PopulationTooSmall,
    #[error("At least one operator weight must be positive")]
    NoOperators,
    #[error("Tournament size must be at least 1")]
    InvalidTournamentSize,
    #[error("Fitness-proportional gamma must be finite and non-negative, got {0}")]
    InvalidGamma(f64),
    #[error("Child attempts must be at least 1")]
    InvalidAttempts,
    #[error("Child atom bounds invalid: min {min} > max {max} or max is zero")]
    InvalidAtomBounds { min: usize, max: usize },
    #[error("Ring size limit must be at least 3, got {0}")]
    InvalidRingSize(usize),
    #[error("Minimum seed size {min} exceeds child max atoms {max}")]
    InvalidSeedSize { min: usize, max: usize },
    #[error("{name} must lie in [0, 1], got {value}")]
    OutOfUnitRange { name: &'static str, value: f64 },
    #[error("Niche capacity must be at least 1")]
    InvalidNicheCapacity,
    #[error("No generation, wall-clock, plateau or target budget configured")]
    Unbounded,
    #[error("Invalid budget: {0}")]
    InvalidBudget(String),
    #[error("Scoring timeout must be positive")]
    InvalidTimeout,
    #[error("Checkpoint path must not be empty")]
    EmptyCheckpointPath,
}

impl RunConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population.max_size == 0 {
            return Err(ConfigError::PopulationTooSmall);
        }

        let w = &self.operators;
        if w.point_mutation
            + w.peripheral_expansion
            + w.peripheral_deletion
            + w.fragment_substitution
            + w.crossover
            == 0
        {
            return Err(ConfigError::NoOperators);
        }

        match &self.parent_selection {
            ParentSelection::Tournament { size } if *size == 0 => {
                return Err(ConfigError::InvalidTournamentSize);
            }
            ParentSelection::FitnessProportional { gamma } if !gamma.is_finite() || *gamma < 0.0 => {
                return Err(ConfigError::InvalidGamma(*gamma));
            }
            _ => {}
        }

        let children = &self.children;
        if children.max_attempts == 0 {
            return Err(ConfigError::InvalidAttempts);
        }
        if children.max_atoms == 0 || children.min_atoms > children.max_atoms {
            return Err(ConfigError::InvalidAtomBounds {
                min: children.min_atoms,
                max: children.max_atoms,
            });
        }
        if let Some(size) = children.max_ring_size
            && size < 3
        {
            return Err(ConfigError::InvalidRingSize(size));
        }
        if let Some(min) = self.population.min_seed_atoms
            && min > children.max_atoms
        {
            return Err(ConfigError::InvalidSeedSize {
                min,
                max: children.max_atoms,
            });
        }

        let unit = |value: f64, name: &'static str| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::OutOfUnitRange { name, value })
            }
        };
        if let Some(similarity) = children.max_parent_similarity {
            unit(similarity, "max_parent_similarity")?;
        }
        unit(self.scoring.max_failure_rate, "max_failure_rate")?;

        let niching = &self.selection.niching;
        if niching.enabled {
            unit(niching.distance_threshold, "distance_threshold")?;
            if niching.niche_capacity == 0 {
                return Err(ConfigError::InvalidNicheCapacity);
            }
        }

        let t = &self.termination;
        if t.max_generations.is_none()
            && t.max_wall_clock_secs.is_none()
            && t.plateau.is_none()
            && t.target_score.is_none()
        {
            return Err(ConfigError::Unbounded);
        }
        if t.max_generations == Some(0) {
            return Err(ConfigError::InvalidBudget(
                "max_generations must be positive".to_string(),
            ));
        }
        if let Some(secs) = t.max_wall_clock_secs
            && !(secs.is_finite() && secs > 0.0)
        {
            return Err(ConfigError::InvalidBudget(format!(
                "max_wall_clock_secs must be positive, got {secs}"
            )));
        }
        if let Some(plateau) = &t.plateau {
            if plateau.patience == 0 {
                return Err(ConfigError::InvalidBudget(
                    "plateau patience must be positive".to_string(),
                ));
            }
            if !(plateau.epsilon.is_finite() && plateau.epsilon >= 0.0) {
                return Err(ConfigError::InvalidBudget(format!(
                    "plateau epsilon must be non-negative, got {}",
                    plateau.epsilon
                )));
            }
        }
        if let Some(target) = t.target_score
            && !target.is_finite()
        {
            return Err(ConfigError::InvalidBudget(format!(
                "target_score must be finite, got {target}"
            )));
        }
        if t.stall_generations == 0 {
            return Err(ConfigError::InvalidBudget(
                "stall_generations must be positive".to_string(),
            ));
        }

        if self.scoring.timeout_ms == Some(0) {
            return Err(ConfigError::InvalidTimeout);
        }

        if let Some(checkpoint) = &self.checkpoint
            && checkpoint.path.trim().is_empty()
        {
            return Err(ConfigError::EmptyCheckpointPath);
        }

        Ok(())
    }
}
