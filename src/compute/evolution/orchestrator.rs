//! Generation loop: generate children, score them, select survivors, record
//! and check termination.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::schema::{
    ConfigError, GenerationRecord, IndividualId, OperatorKind, RunConfig, RunOutcome, RunStats,
    TerminationReason, TerminationState,
};

use super::checkpoint::{CHECKPOINT_VERSION, Checkpoint, CheckpointError};
use super::children::{ChildGenerator, ChildReport};
use super::model::MolecularModel;
use super::population::{Origin, PopulationStore};
use super::scoring::{Scorer, ScoringDispatcher, ScoringReport};
use super::selection::{SelectionEngine, diversity};
use super::termination::TerminationController;

/// Errors raised by the evolution engine.
#[derive(Debug, thiserror::Error)]
pub enum EvolutionError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Population is empty; add at least one seed")]
    EmptyPopulation,
    #[error("Seed '{0}' is not a valid molecule")]
    InvalidSeedText(String),
    #[error("Individual {0} is not in the population")]
    UnknownIndividual(IndividualId),
    #[error("Individual {0} already has a score")]
    ScoreAlreadyRecorded(IndividualId),
    #[error("Checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Failed to build scoring pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Run has already been finalized")]
    Finalized,
}

/// Running totals over the whole run, seeds included.
#[derive(Debug, Clone, Copy, Default)]
struct Totals {
    scoring_calls: u64,
    scoring_failures: u64,
    cache_hits: u64,
}

/// Drives an evolution run over a [`MolecularModel`] and a [`Scorer`].
///
/// The orchestrator owns the population. Each generation produces children,
/// scores every pending individual exactly once, selects survivors and
/// appends a [`GenerationRecord`]. The scorer and the model are released
/// exactly once, either when a run finishes (successfully or not) or when
/// the orchestrator is dropped.
pub struct GenerationOrchestrator<M: MolecularModel, S: Scorer + 'static> {
    config: RunConfig,
    model: M,
    store: PopulationStore<M::Molecule>,
    generator: ChildGenerator,
    dispatcher: ScoringDispatcher<S>,
    selection: SelectionEngine,
    termination: TerminationController,
    records: Vec<GenerationRecord>,
    rng: StdRng,
    generation: usize,
    best_ever: Option<f64>,
    cancelled: Arc<AtomicBool>,
    clock: Option<Instant>,
    elapsed_offset: f64,
    totals: Totals,
    initialized: bool,
    released: bool,
}

impl<M: MolecularModel, S: Scorer + 'static> GenerationOrchestrator<M, S> {
    /// Create an orchestrator with an empty population.
    pub fn new(config: RunConfig, model: M, scorer: S) -> Result<Self, EvolutionError> {
        config.validate()?;
        let generator = ChildGenerator::new(&config)?;
        let dispatcher = ScoringDispatcher::new(Arc::new(scorer), &config.scoring)?;
        let selection = SelectionEngine::new(&config);
        let termination = TerminationController::new(&config);
        let seed = config.random_seed.unwrap_or_else(rand::random);

        Ok(Self {
            config,
            model,
            store: PopulationStore::new(),
            generator,
            dispatcher,
            selection,
            termination,
            records: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            generation: 0,
            best_ever: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            clock: None,
            elapsed_offset: 0.0,
            totals: Totals::default(),
            initialized: false,
            released: false,
        })
    }

    /// Continue a run from a checkpoint. The population, history, identifier
    /// counter and elapsed time carry over; scores of restored individuals
    /// are never recomputed.
    pub fn resume(
        config: RunConfig,
        model: M,
        scorer: S,
        checkpoint: Checkpoint,
    ) -> Result<Self, EvolutionError> {
        let mut orchestrator = Self::new(config, model, scorer)?;

        for snapshot in &checkpoint.population {
            let molecule = orchestrator
                .model
                .from_canonical_text(&snapshot.text)
                .ok_or_else(|| CheckpointError::UnparsableText {
                    text: snapshot.text.clone(),
                })?;
            orchestrator.store.restore(snapshot, molecule);
            if let Some(fitness) = snapshot.score.fitness() {
                orchestrator.dispatcher.remember(&snapshot.text, fitness);
                orchestrator.observe(fitness);
            }
        }
        orchestrator.store.reserve_ids(checkpoint.next_id);
        if let Some(best) = checkpoint.records.last().and_then(|r| r.best_ever) {
            orchestrator.observe(best);
        }

        orchestrator.records = checkpoint.records;
        orchestrator.generation = checkpoint.generation;
        orchestrator.rng = StdRng::seed_from_u64(checkpoint.reseed);
        orchestrator.elapsed_offset = checkpoint.elapsed_seconds;
        orchestrator.clock = Some(Instant::now());
        orchestrator.initialized = true;

        log::info!(
            "Resumed at generation {} with {} individuals",
            orchestrator.generation,
            orchestrator.store.len()
        );
        Ok(orchestrator)
    }

    /// Get cancellation handle. Setting it stops the run before the next
    /// generation and cancels scoring calls that have not started.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Add an unscored seed. Invalid or duplicate seeds are kept with a
    /// warning. With `min_seed_atoms` set, smaller seeds are grown first.
    pub fn add_seed(&mut self, molecule: M::Molecule) -> IndividualId {
        let molecule = self.grow_seed(molecule);
        self.insert_seed(molecule)
    }

    /// Extend a seed by peripheral expansion until it reaches
    /// `min_seed_atoms`, giving up after `max_attempts` failed expansions.
    fn grow_seed(&mut self, mut molecule: M::Molecule) -> M::Molecule {
        let Some(min_atoms) = self.config.population.min_seed_atoms else {
            return molecule;
        };
        let mut failures = 0;
        while self.model.atom_count(&molecule) < min_atoms
            && failures < self.config.children.max_attempts
        {
            let grown = self.model.apply_operator(
                OperatorKind::PeripheralExpansion,
                &[&molecule],
                &mut self.rng,
            );
            match grown {
                Some(grown) if self.model.is_valid(&grown) => molecule = grown,
                _ => failures += 1,
            }
        }
        if self.model.atom_count(&molecule) < min_atoms {
            log::warn!(
                "Seed {} stopped growing at {} atoms (minimum {})",
                self.model.canonical_text(&molecule),
                self.model.atom_count(&molecule),
                min_atoms
            );
        }
        molecule
    }

    fn insert_seed(&mut self, molecule: M::Molecule) -> IndividualId {
        let text = self.model.canonical_text(&molecule);
        if !self.model.is_valid(&molecule) {
            log::warn!("Seed {text} is structurally invalid; keeping it");
        }
        if self.store.contains_text(&text) {
            log::warn!("Seed {text} duplicates an earlier seed; keeping it");
        }
        self.store.insert(molecule, text, Origin::seed())
    }

    /// Add a seed whose score is already known. The scorer is never called
    /// for it, and it is never grown.
    pub fn add_seed_with_score(
        &mut self,
        molecule: M::Molecule,
        fitness: f64,
    ) -> Result<IndividualId, EvolutionError> {
        let id = self.insert_seed(molecule);
        self.store.record_score(id, Ok(fitness))?;
        if let Some(individual) = self.store.get(id)
            && let Some(fitness) = individual.fitness()
        {
            self.dispatcher.remember(individual.text(), fitness);
            self.observe(fitness);
        }
        Ok(id)
    }

    /// Parse a seed from text and add it unscored.
    pub fn add_seed_text(&mut self, text: &str) -> Result<IndividualId, EvolutionError> {
        let molecule = self
            .model
            .from_canonical_text(text)
            .ok_or_else(|| EvolutionError::InvalidSeedText(text.to_string()))?;
        Ok(self.add_seed(molecule))
    }

    /// Score the seeds. Runs once; later calls do nothing.
    pub fn initialize(&mut self) -> Result<(), EvolutionError> {
        if self.released {
            return Err(EvolutionError::Finalized);
        }
        if self.initialized {
            return Ok(());
        }
        if self.store.is_empty() {
            return Err(EvolutionError::EmptyPopulation);
        }

        self.clock = Some(Instant::now());
        let report = self.score_pending()?;
        self.initialized = true;
        log::info!(
            "Initialized {} seeds ({} scored, {} failed, {} cached)",
            self.store.len(),
            report.calls - report.failures,
            report.failures,
            report.cache_hits
        );
        Ok(())
    }

    /// Run one generation and return its record.
    pub fn step(&mut self) -> Result<GenerationRecord, EvolutionError> {
        if self.released {
            return Err(EvolutionError::Finalized);
        }
        self.initialize()?;

        self.generation += 1;
        let generation = self.generation;

        let children =
            self.generator
                .generate(&mut self.store, &self.model, generation, &mut self.rng);
        let scoring = self.score_pending()?;
        let survivors = self.selection.select(&self.store, &self.model, generation);
        let culled = self.store.retain_ranked(&survivors);

        let record = self.make_record(generation, &children, &scoring);
        log::info!(
            "Generation {}: best={:.4} mean={:.4} size={} children={}/{} failures={}/{} culled={}",
            generation,
            record.best_fitness.unwrap_or(f64::NAN),
            record.mean_fitness.unwrap_or(f64::NAN),
            record.population_size,
            record.children_produced,
            record.children_requested,
            record.scoring_failures,
            record.scoring_calls,
            culled
        );
        self.records.push(record.clone());

        if let Some(checkpoint) = &self.config.checkpoint
            && checkpoint.every_generations > 0
            && generation % checkpoint.every_generations == 0
        {
            let path = checkpoint.path.clone();
            self.save_checkpoint(path)?;
        }
        Ok(record)
    }

    /// Run until a termination condition holds (blocking).
    pub fn run(&mut self) -> Result<RunOutcome, EvolutionError> {
        self.run_with_callback(|_| {})
    }

    /// Run evolution, calling `callback` after every generation.
    ///
    /// The scorer and model are released before returning, whether the run
    /// ends normally or with an error.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> Result<RunOutcome, EvolutionError>
    where
        F: FnMut(&GenerationRecord),
    {
        let outcome = self
            .drive(&mut callback)
            .and_then(|reason| self.finish(reason));
        self.release();
        outcome
    }

    fn drive<F>(&mut self, callback: &mut F) -> Result<TerminationReason, EvolutionError>
    where
        F: FnMut(&GenerationRecord),
    {
        if self.released {
            return Err(EvolutionError::Finalized);
        }
        loop {
            let cancelled = self.cancelled.load(Ordering::Relaxed);
            self.termination.advance(&self.records, cancelled);
            if let Some(reason) = self.termination.reason() {
                return Ok(reason.clone());
            }
            let record = self.step()?;
            callback(&record);
        }
    }

    fn finish(&mut self, reason: TerminationReason) -> Result<RunOutcome, EvolutionError> {
        let state = self.termination.state();
        log::info!(
            "Run stopped after {} generations ({:?}): {}",
            self.generation,
            state,
            reason
        );

        if let Some(path) = self.config.checkpoint.as_ref().map(|c| c.path.clone()) {
            self.save_checkpoint(path)?;
        }
        self.termination.finish();

        Ok(RunOutcome {
            population: self.store.snapshots(),
            records: self.records.clone(),
            state,
            reason,
            stats: self.stats(),
        })
    }

    /// Release the scorer and model. Only the first call has an effect.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.dispatcher.scorer().release();
        self.model.release();
        log::debug!("Released scorer and model");
    }

    /// Capture the run state. The generator is reseeded from a value stored
    /// in the checkpoint, so a resumed run draws the same random stream.
    pub fn checkpoint(&mut self) -> Checkpoint {
        let reseed: u64 = self.rng.r#gen();
        self.rng = StdRng::seed_from_u64(reseed);
        Checkpoint {
            version: CHECKPOINT_VERSION,
            generation: self.generation,
            next_id: self.store.next_id(),
            reseed,
            elapsed_seconds: self.elapsed(),
            population: self.store.snapshots(),
            records: self.records.clone(),
        }
    }

    /// Write a checkpoint to `path`.
    pub fn save_checkpoint<P: AsRef<Path>>(&mut self, path: P) -> Result<(), EvolutionError> {
        let checkpoint = self.checkpoint();
        checkpoint.save(&path)?;
        log::debug!(
            "Checkpoint for generation {} written to {}",
            checkpoint.generation,
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn population(&self) -> &PopulationStore<M::Molecule> {
        &self.store
    }

    pub fn records(&self) -> &[GenerationRecord] {
        &self.records
    }

    /// Last completed generation (0 before the first step).
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn state(&self) -> TerminationState {
        self.termination.state()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Aggregate statistics so far.
    pub fn stats(&self) -> RunStats {
        RunStats {
            generations: self.generation,
            scoring_calls: self.totals.scoring_calls,
            scoring_failures: self.totals.scoring_failures,
            cache_hits: self.totals.cache_hits,
            best_fitness: self.best_ever,
            elapsed_seconds: self.elapsed(),
        }
    }

    fn elapsed(&self) -> f64 {
        self.elapsed_offset + self.clock.map_or(0.0, |c| c.elapsed().as_secs_f64())
    }

    fn observe(&mut self, fitness: f64) {
        self.best_ever = Some(self.best_ever.map_or(fitness, |b| b.max(fitness)));
    }

    /// Score every pending individual and write the outcomes back.
    fn score_pending(&mut self) -> Result<ScoringReport, EvolutionError> {
        let pending = self.store.pending();
        if pending.is_empty() {
            return Ok(ScoringReport::default());
        }

        let report = self.dispatcher.dispatch(pending, &self.cancelled);
        for (id, outcome) in &report.outcomes {
            if let Ok(fitness) = outcome
                && fitness.is_finite()
            {
                self.observe(*fitness);
            }
            self.store.record_score(*id, outcome.clone())?;
        }

        self.totals.scoring_calls += report.calls as u64;
        self.totals.scoring_failures += report.failures as u64;
        self.totals.cache_hits += report.cache_hits as u64;
        if report.cancelled > 0 {
            log::info!("Cancelled {} pending scoring calls", report.cancelled);
        }
        Ok(report)
    }

    fn make_record(
        &self,
        generation: usize,
        children: &ChildReport,
        scoring: &ScoringReport,
    ) -> GenerationRecord {
        let fitnesses: Vec<f64> = self.store.iter().filter_map(|i| i.fitness()).collect();
        let best_fitness = fitnesses.iter().copied().reduce(f64::max);
        let mean_fitness = (!fitnesses.is_empty())
            .then(|| fitnesses.iter().sum::<f64>() / fitnesses.len() as f64);
        let molecules: Vec<&M::Molecule> = self.store.iter().map(|i| i.molecule()).collect();

        GenerationRecord {
            generation,
            best_fitness,
            mean_fitness,
            best_ever: self.best_ever,
            population_size: self.store.len(),
            children_requested: children.requested,
            children_produced: children.produced,
            child_attempts: children.attempts,
            rejected_invalid: children.rejected_invalid,
            rejected_duplicate: children.rejected_duplicate,
            rejected_similar: children.rejected_similar,
            operator_failures: children.operator_failures,
            scoring_calls: scoring.calls,
            scoring_failures: scoring.failures,
            scoring_cancelled: scoring.cancelled,
            cache_hits: scoring.cache_hits,
            diversity: diversity(&self.model, &molecules),
            elapsed_seconds: self.elapsed(),
        }
    }
}

impl<M: MolecularModel, S: Scorer + 'static> Drop for GenerationOrchestrator<M, S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::evolution::GraphModel;
    use crate::compute::evolution::scoring::ScoringError;
    use crate::schema::{MolGraph, OperatorKind, OperatorWeights, ScoreState, TerminationReason};
    use proptest::prelude::*;
    use rand::RngCore;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    const SEEDS: [&str; 10] = [
        "C", "CC", "CCC", "CCCC", "CCCCC", "CCO", "CCN", "CCCl", "CC=O", "C1CC1",
    ];

    fn expansion_only(max_size: usize, children: usize) -> RunConfig {
        let mut config = RunConfig {
            operators: OperatorWeights {
                point_mutation: 0,
                peripheral_expansion: 1,
                peripheral_deletion: 0,
                fragment_substitution: 0,
                crossover: 0,
            },
            random_seed: Some(7),
            ..Default::default()
        };
        config.population.max_size = max_size;
        config.population.children_per_generation = children;
        config.scoring.parallel_workers = 2;
        config
    }

    /// Scores by text length and remembers every text it saw.
    #[derive(Default)]
    struct LengthScorer {
        seen: Arc<Mutex<Vec<String>>>,
        releases: Arc<AtomicUsize>,
    }

    impl Scorer for LengthScorer {
        fn score(&self, text: &str) -> Result<f64, ScoringError> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(text.len() as f64)
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Graph model that counts releases.
    struct TrackedModel {
        inner: GraphModel,
        releases: Arc<AtomicUsize>,
    }

    impl MolecularModel for TrackedModel {
        type Molecule = MolGraph;

        fn is_valid(&self, molecule: &MolGraph) -> bool {
            self.inner.is_valid(molecule)
        }

        fn canonical_text(&self, molecule: &MolGraph) -> String {
            self.inner.canonical_text(molecule)
        }

        fn from_canonical_text(&self, text: &str) -> Option<MolGraph> {
            self.inner.from_canonical_text(text)
        }

        fn structural_distance(&self, a: &MolGraph, b: &MolGraph) -> f64 {
            self.inner.structural_distance(a, b)
        }

        fn atom_count(&self, molecule: &MolGraph) -> usize {
            self.inner.atom_count(molecule)
        }

        fn apply_operator(
            &self,
            operator: OperatorKind,
            parents: &[&MolGraph],
            rng: &mut dyn RngCore,
        ) -> Option<MolGraph> {
            self.inner.apply_operator(operator, parents, rng)
        }

        fn release(&self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn seeded<S: Scorer + 'static>(
        config: RunConfig,
        scorer: S,
    ) -> GenerationOrchestrator<GraphModel, S> {
        let mut orchestrator = GenerationOrchestrator::new(config, GraphModel::new(), scorer).unwrap();
        for smiles in SEEDS {
            orchestrator.add_seed_text(smiles).unwrap();
        }
        orchestrator
    }

    #[test]
    fn test_small_seeds_grown_before_scoring() {
        let mut config = expansion_only(10, 2);
        config.population.min_seed_atoms = Some(6);
        let scorer = LengthScorer::default();
        let seen = Arc::clone(&scorer.seen);
        let mut orchestrator = GenerationOrchestrator::new(config, GraphModel::new(), scorer).unwrap();

        let small = orchestrator.add_seed_text("CCCC").unwrap();
        let large = orchestrator.add_seed_text("CCCCCCCO").unwrap();
        let molecule = orchestrator.model().from_canonical_text("O").unwrap();
        let known = orchestrator.add_seed_with_score(molecule, 1.0).unwrap();
        orchestrator.initialize().unwrap();

        let store = orchestrator.population();
        let grown = store.get(small).unwrap();
        assert!(grown.molecule().atom_count() >= 6);
        assert!(orchestrator.model().is_valid(grown.molecule()));
        assert_eq!(store.get(large).unwrap().molecule().atom_count(), 8);
        assert_eq!(store.get(known).unwrap().molecule().atom_count(), 1);

        // The grown form is what gets scored.
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.contains(&grown.text().to_string()));
    }

    #[test]
    fn test_single_generation_keeps_best_of_all_candidates() {
        let scorer = LengthScorer::default();
        let seen = Arc::clone(&scorer.seen);
        let mut orchestrator = seeded(expansion_only(10, 5), scorer);

        let record = orchestrator.step().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(record.generation, 1);
        assert_eq!(record.children_produced, 5);
        assert_eq!(seen.len(), 15);
        assert!(record.population_size <= 10);

        let longest = seen.iter().map(|t| t.len()).max().unwrap() as f64;
        assert_eq!(record.best_fitness, Some(longest));
        assert_eq!(record.best_ever, Some(longest));
        assert_eq!(orchestrator.population().len(), record.population_size);
    }

    #[test]
    fn test_total_scoring_failure_fails_after_one_generation() {
        let mut config = expansion_only(10, 5);
        config.termination.max_generations = Some(10);
        let scorer = |_: &str| -> Result<f64, String> { Err("service offline".to_string()) };
        let mut orchestrator = GenerationOrchestrator::new(config, GraphModel::new(), scorer).unwrap();
        for (i, smiles) in SEEDS.iter().enumerate() {
            let molecule = orchestrator.model().from_canonical_text(smiles).unwrap();
            orchestrator.add_seed_with_score(molecule, i as f64).unwrap();
        }

        let outcome = orchestrator.run().unwrap();

        assert_eq!(outcome.state, TerminationState::Failed);
        assert_eq!(outcome.records.len(), 1);
        assert!(matches!(
            outcome.reason,
            TerminationReason::ScoringFailureRate { .. }
        ));
        assert_eq!(outcome.records[0].scoring_failures, outcome.records[0].scoring_calls);
        assert_eq!(orchestrator.state(), TerminationState::Done);
        // Failed children never survive, the scored seeds do.
        assert_eq!(outcome.population.len(), 10);
        assert!(outcome.population.iter().all(|i| i.score.fitness().is_some()));
    }

    #[test]
    fn test_release_happens_exactly_once() {
        let scorer_releases = Arc::new(AtomicUsize::new(0));
        let model_releases = Arc::new(AtomicUsize::new(0));
        let mut config = expansion_only(10, 3);
        config.termination.max_generations = Some(2);
        let scorer = LengthScorer {
            releases: Arc::clone(&scorer_releases),
            ..Default::default()
        };
        let model = TrackedModel {
            inner: GraphModel::new(),
            releases: Arc::clone(&model_releases),
        };

        let mut orchestrator = GenerationOrchestrator::new(config, model, scorer).unwrap();
        orchestrator.add_seed_text("CCO").unwrap();
        let outcome = orchestrator.run().unwrap();
        assert_eq!(outcome.reason, TerminationReason::MaxGenerations);
        assert_eq!(scorer_releases.load(Ordering::SeqCst), 1);
        assert_eq!(model_releases.load(Ordering::SeqCst), 1);

        assert!(matches!(orchestrator.run(), Err(EvolutionError::Finalized)));
        assert!(matches!(orchestrator.step(), Err(EvolutionError::Finalized)));
        drop(orchestrator);
        assert_eq!(scorer_releases.load(Ordering::SeqCst), 1);
        assert_eq!(model_releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_on_error_and_drop() {
        let releases = Arc::new(AtomicUsize::new(0));
        let scorer = LengthScorer {
            releases: Arc::clone(&releases),
            ..Default::default()
        };
        let mut orchestrator =
            GenerationOrchestrator::new(expansion_only(5, 2), GraphModel::new(), scorer).unwrap();
        assert!(matches!(orchestrator.run(), Err(EvolutionError::EmptyPopulation)));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        let releases = Arc::new(AtomicUsize::new(0));
        let scorer = LengthScorer {
            releases: Arc::clone(&releases),
            ..Default::default()
        };
        let orchestrator =
            GenerationOrchestrator::new(expansion_only(5, 2), GraphModel::new(), scorer).unwrap();
        drop(orchestrator);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_each_individual_scored_once() {
        let mut config = RunConfig {
            random_seed: Some(11),
            ..Default::default()
        };
        config.population.max_size = 8;
        config.population.children_per_generation = 6;
        config.termination.max_generations = Some(4);
        config.scoring.cache_scores = false;

        let calls: Arc<Mutex<HashMap<String, usize>>> = Arc::default();
        let counter = Arc::clone(&calls);
        let scorer = move |text: &str| -> Result<f64, String> {
            *counter.lock().unwrap().entry(text.to_string()).or_insert(0) += 1;
            Ok(text.len() as f64)
        };
        let mut orchestrator = seeded(config, scorer);
        let outcome = orchestrator.run().unwrap();

        let produced: usize = outcome.records.iter().map(|r| r.children_produced).sum();
        let calls = calls.lock().unwrap();
        let total: usize = calls.values().sum();
        assert_eq!(total, SEEDS.len() + produced);
        assert_eq!(outcome.stats.scoring_calls, total as u64);
        assert_eq!(outcome.stats.cache_hits, 0);
    }

    #[test]
    fn test_elitism_keeps_best_monotonic() {
        let mut config = RunConfig {
            random_seed: Some(3),
            ..Default::default()
        };
        config.population.max_size = 6;
        config.population.children_per_generation = 6;
        config.termination.max_generations = Some(6);
        let scorer = |text: &str| -> Result<f64, String> {
            Ok(text.chars().filter(|c| *c == 'C').count() as f64 - text.len() as f64 * 0.1)
        };
        let mut orchestrator = seeded(config, scorer);
        let outcome = orchestrator.run().unwrap();

        assert_eq!(outcome.records.len(), 6);
        for pair in outcome.records.windows(2) {
            assert!(pair[1].best_fitness >= pair[0].best_fitness);
            assert!(pair[1].best_ever >= pair[0].best_ever);
        }
        assert_eq!(
            outcome.best().and_then(|b| b.score.fitness()),
            outcome.stats.best_fitness
        );
    }

    #[test]
    fn test_cancel_before_run() {
        let mut orchestrator = seeded(expansion_only(10, 5), LengthScorer::default());
        orchestrator.cancel_handle().store(true, Ordering::Relaxed);

        let outcome = orchestrator.run().unwrap();
        assert_eq!(outcome.state, TerminationState::BudgetExhausted);
        assert_eq!(outcome.reason, TerminationReason::Cancelled);
        assert!(outcome.records.is_empty());
    }

    #[test]
    fn test_cancel_during_scoring() {
        let mut config = expansion_only(10, 4);
        config.scoring.parallel_workers = 1;
        let handle: Arc<Mutex<Option<Arc<AtomicBool>>>> = Arc::default();
        let trigger = Arc::clone(&handle);
        let scorer = move |text: &str| -> Result<f64, String> {
            if let Some(flag) = trigger.lock().unwrap().as_ref() {
                flag.store(true, Ordering::SeqCst);
            }
            Ok(text.len() as f64)
        };

        let mut orchestrator = GenerationOrchestrator::new(config, GraphModel::new(), scorer).unwrap();
        for smiles in SEEDS {
            let molecule = orchestrator.model().from_canonical_text(smiles).unwrap();
            orchestrator.add_seed_with_score(molecule, 1.0).unwrap();
        }
        *handle.lock().unwrap() = Some(orchestrator.cancel_handle());

        let outcome = orchestrator.run().unwrap();
        assert_eq!(outcome.reason, TerminationReason::Cancelled);
        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.scoring_calls, 1);
        assert_eq!(record.scoring_failures, 0);
        assert_eq!(record.scoring_cancelled, record.children_produced - 1);
        assert!(
            outcome
                .population
                .iter()
                .all(|i| matches!(i.score, ScoreState::Scored { .. }))
        );
    }

    #[test]
    fn test_checkpoint_and_resume() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let mut config = expansion_only(6, 4);
        config.checkpoint = Some(crate::schema::CheckpointConfig {
            path: path.to_string_lossy().into_owned(),
            every_generations: 1,
        });

        let scorer = LengthScorer::default();
        let mut orchestrator = seeded(config.clone(), scorer);
        orchestrator.step().unwrap();
        orchestrator.step().unwrap();

        let checkpoint = Checkpoint::load(&path).unwrap();
        assert_eq!(checkpoint.generation, 2);
        assert_eq!(checkpoint.records.len(), 2);

        let before: Vec<(IndividualId, String, Option<f64>)> = orchestrator
            .population()
            .iter()
            .map(|i| (i.id(), i.text().to_string(), i.fitness()))
            .collect();
        let next_id = checkpoint.next_id;

        let scorer = LengthScorer::default();
        let seen = Arc::clone(&scorer.seen);
        let mut resumed =
            GenerationOrchestrator::resume(config, GraphModel::new(), scorer, checkpoint).unwrap();
        let after: Vec<(IndividualId, String, Option<f64>)> = resumed
            .population()
            .iter()
            .map(|i| (i.id(), i.text().to_string(), i.fitness()))
            .collect();
        assert_eq!(before, after);
        assert_eq!(resumed.generation(), 2);
        assert_eq!(resumed.records().len(), 2);

        let record = resumed.step().unwrap();
        assert_eq!(record.generation, 3);
        // Restored individuals are not rescored.
        assert_eq!(seen.lock().unwrap().len(), record.scoring_calls);
        assert!(
            resumed
                .population()
                .iter()
                .filter(|i| i.generation() == 3)
                .all(|i| i.id().0 >= next_id)
        );
        assert!(record.best_ever >= orchestrator.records()[1].best_ever);
    }

    #[test]
    fn test_invalid_seed_text_and_config() {
        let mut orchestrator =
            GenerationOrchestrator::new(expansion_only(5, 2), GraphModel::new(), LengthScorer::default())
                .unwrap();
        assert!(matches!(
            orchestrator.add_seed_text("C(("),
            Err(EvolutionError::InvalidSeedText(_))
        ));

        let mut config = expansion_only(5, 2);
        config.population.max_size = 0;
        assert!(matches!(
            GenerationOrchestrator::new(config, GraphModel::new(), LengthScorer::default()),
            Err(EvolutionError::Config(ConfigError::PopulationTooSmall))
        ));
    }

    #[test]
    fn test_duplicate_seeds_are_kept() {
        let mut orchestrator =
            GenerationOrchestrator::new(expansion_only(5, 2), GraphModel::new(), LengthScorer::default())
                .unwrap();
        orchestrator.add_seed_text("OCC").unwrap();
        orchestrator.add_seed_text("CCO").unwrap();
        assert_eq!(orchestrator.population().len(), 2);

        orchestrator.initialize().unwrap();
        assert!(orchestrator.population().iter().all(|i| i.fitness() == Some(3.0)));
        assert_eq!(orchestrator.stats().scoring_calls, 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        #[test]
        fn prop_population_bounded_with_unique_ids(
            seed in any::<u64>(),
            max_size in 1usize..8,
            children in 1usize..8,
        ) {
            let mut config = RunConfig {
                random_seed: Some(seed),
                ..Default::default()
            };
            config.population.max_size = max_size;
            config.population.children_per_generation = children;
            config.termination.max_generations = Some(3);
            config.scoring.parallel_workers = 1;

            let mut orchestrator = seeded(config, LengthScorer::default());
            let outcome = orchestrator.run().unwrap();

            for record in &outcome.records {
                prop_assert!(record.population_size <= max_size);
            }
            let mut ids: Vec<IndividualId> = outcome.population.iter().map(|i| i.id).collect();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), total);
            prop_assert!(total <= max_size);
        }
    }
}
