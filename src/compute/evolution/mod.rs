//! Evolutionary engine for de novo molecular design.
//!
//! A run starts from seed molecules and repeatedly produces children through
//! graph-edit operators, scores them with a caller-supplied fitness function
//! and keeps the best survivors.
//!
//! # Overview
//!
//! The engine consists of:
//!
//! - **Population** (`population`): Individuals, lineage and write-once scores
//! - **Molecular Model** (`model`): Validity, canonical text, distance and edits
//! - **Child Generation** (`children`): Parent selection, operators, rejection
//! - **Scoring** (`scoring`): Parallel, timeout-bounded calls to the scorer
//! - **Selection** (`selection`): Ranking, elitism, replacement and niching
//! - **Termination** (`termination`): Budget, convergence and failure checks
//! - **Checkpoints** (`checkpoint`): JSON snapshots for resuming a run
//! - **Orchestrator** (`orchestrator`): The generation loop tying it together
//!
//! # Example
//!
//! ```rust,no_run
//! use molevo::compute::evolution::{GenerationOrchestrator, GraphModel};
//! use molevo::schema::RunConfig;
//!
//! // Fitness: prefer larger molecules
//! let scorer = |smiles: &str| -> Result<f64, String> { Ok(smiles.len() as f64) };
//!
//! let mut engine = GenerationOrchestrator::new(RunConfig::default(), GraphModel::new(), scorer)?;
//! for seed in ["CCO", "c1ccccc1", "CC(=O)N"] {
//!     if engine.add_seed_text(seed).is_err() {
//!         eprintln!("skipping {seed}");
//!     }
//! }
//!
//! let outcome = engine.run_with_callback(|record| {
//!     println!("Generation {}: best = {:?}", record.generation, record.best_fitness);
//! })?;
//! println!("Stopped: {}", outcome.reason);
//! # Ok::<(), molevo::compute::evolution::EvolutionError>(())
//! ```
//!
//! # Operators
//!
//! - `PointMutation`: Change one atom's element
//! - `PeripheralExpansion`: Attach a new atom to an atom with free valence
//! - `PeripheralDeletion`: Remove a terminal atom
//! - `FragmentSubstitution`: Replace a side chain with a library fragment
//! - `Crossover`: Join one side of a cut bond from each of two parents

mod checkpoint;
mod children;
mod model;
mod orchestrator;
mod population;
mod scoring;
mod selection;
mod termination;

pub use checkpoint::{CHECKPOINT_VERSION, Checkpoint, CheckpointError};
pub use children::{ChildGenerator, ChildReport};
pub use model::{GraphModel, MolecularModel};
pub use orchestrator::{EvolutionError, GenerationOrchestrator};
pub use population::{Individual, Origin, PopulationStore};
pub use scoring::{Scorer, ScoringDispatcher, ScoringError, ScoringReport};
pub use selection::{SelectionEngine, compare_rank, diversity, rank};
pub use termination::TerminationController;
