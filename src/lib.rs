//! Molevo - Evolutionary de novo molecular design.
//!
//! This crate evolves a population of molecules toward a caller-supplied
//! fitness function. Children are produced by graph-edit operators (point
//! mutation, peripheral expansion and deletion, fragment substitution and
//! crossover), scored in parallel and filtered by a selection policy until a
//! budget, convergence or failure condition ends the run.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration, molecular graphs, SMILES parsing and run records
//! - `compute`: Canonicalization, fingerprints, graph edits and the
//!   evolutionary engine
//!
//! # Example
//!
//! ```rust,no_run
//! use molevo::{
//!     compute::evolution::{GenerationOrchestrator, GraphModel},
//!     schema::RunConfig,
//! };
//!
//! // Create configuration
//! let mut config = RunConfig::default();
//! config.termination.max_generations = Some(20);
//!
//! // Score molecules by the number of heteroatoms in their SMILES
//! let scorer = |smiles: &str| -> Result<f64, String> {
//!     Ok(smiles.chars().filter(|c| matches!(c, 'N' | 'O' | 'S')).count() as f64)
//! };
//!
//! let mut engine = GenerationOrchestrator::new(config, GraphModel::new(), scorer)?;
//! engine.add_seed_text("CCO")?;
//! engine.add_seed_text("CC(=O)N")?;
//!
//! let outcome = engine.run()?;
//! if let Some(best) = outcome.best() {
//!     println!("Best molecule: {} ({:?})", best.text, best.score.fitness());
//! }
//! # Ok::<(), molevo::compute::evolution::EvolutionError>(())
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::{EvolutionError, GenerationOrchestrator, GraphModel, MolecularModel, Scorer};
pub use schema::{MolGraph, RunConfig, RunOutcome, parse_smiles};
