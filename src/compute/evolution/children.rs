//! Child generation: parent selection, operator choice and rejection of
//! invalid, duplicate or too-similar children with bounded retries.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::Rng;

use crate::schema::{ChildConfig, ConfigError, IndividualId, OperatorKind, ParentSelection, RunConfig};

use super::model::MolecularModel;
use super::population::{Origin, PopulationStore};

/// Outcome of one child-generation phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildReport {
    pub requested: usize,
    pub produced: usize,
    pub attempts: usize,
    pub rejected_invalid: usize,
    pub rejected_duplicate: usize,
    pub rejected_similar: usize,
    pub operator_failures: usize,
    /// Identifiers of the appended children.
    pub children: Vec<IndividualId>,
}

/// Produces children from the live population.
#[derive(Debug, Clone)]
pub struct ChildGenerator {
    operators: Vec<OperatorKind>,
    operator_weights: WeightedIndex<u32>,
    parent_selection: ParentSelection,
    limits: ChildConfig,
    count: usize,
}

/// Parent drawn for one operator application.
#[derive(Debug, Clone, Copy)]
struct PoolEntry {
    index: usize,
    fitness: Option<f64>,
}

/// Per-generation parent sampler built from the current pool.
enum ParentSampler {
    Tournament(usize),
    Weighted(WeightedIndex<f64>),
    Uniform,
}

impl ChildGenerator {
    /// Build a generator from the run configuration.
    pub fn new(config: &RunConfig) -> Result<Self, ConfigError> {
        let w = &config.operators;
        let table = [
            (OperatorKind::PointMutation, w.point_mutation),
            (OperatorKind::PeripheralExpansion, w.peripheral_expansion),
            (OperatorKind::PeripheralDeletion, w.peripheral_deletion),
            (OperatorKind::FragmentSubstitution, w.fragment_substitution),
            (OperatorKind::Crossover, w.crossover),
        ];
        let operators: Vec<OperatorKind> = table
            .iter()
            .filter(|(_, weight)| *weight > 0)
            .map(|(kind, _)| *kind)
            .collect();
        let operator_weights = WeightedIndex::new(
            table
                .iter()
                .filter(|(_, weight)| *weight > 0)
                .map(|(_, weight)| *weight),
        )
        .map_err(|_| ConfigError::NoOperators)?;

        Ok(Self {
            operators,
            operator_weights,
            parent_selection: config.parent_selection.clone(),
            limits: config.children.clone(),
            count: config.population.children_per_generation,
        })
    }

    /// Operators that can be drawn (positive weight).
    pub fn operators(&self) -> &[OperatorKind] {
        &self.operators
    }

    /// Append up to `children_per_generation` new pending children created in
    /// `generation`. Existing individuals are never modified.
    pub fn generate<M: MolecularModel>(
        &self,
        store: &mut PopulationStore<M::Molecule>,
        model: &M,
        generation: usize,
        rng: &mut StdRng,
    ) -> ChildReport {
        let mut report = ChildReport {
            requested: self.count,
            ..Default::default()
        };

        let pool = parent_pool(store);
        if pool.is_empty() {
            return report;
        }
        let sampler = self.sampler(&pool);

        for _ in 0..self.count {
            for _ in 0..self.limits.max_attempts {
                report.attempts += 1;

                let operator = self.operators[self.operator_weights.sample(rng)];
                let picks: Vec<usize> = (0..operator.arity())
                    .map(|_| pool[sampler.pick(&pool, rng)].index)
                    .collect();
                let parents: Vec<_> = picks.iter().filter_map(|&i| store.at(i)).collect();
                let molecules: Vec<&M::Molecule> = parents.iter().map(|p| p.molecule()).collect();

                let Some(child) = model.apply_operator(operator, &molecules, rng) else {
                    report.operator_failures += 1;
                    continue;
                };

                if !model.is_valid(&child) || !self.within_size_limits(model, &child) {
                    report.rejected_invalid += 1;
                    continue;
                }

                let text = model.canonical_text(&child);
                if self.limits.duplicate_suppression && store.contains_text(&text) {
                    report.rejected_duplicate += 1;
                    continue;
                }

                if let Some(max_similarity) = self.limits.max_parent_similarity
                    && molecules
                        .iter()
                        .any(|p| 1.0 - model.structural_distance(&child, p) > max_similarity)
                {
                    report.rejected_similar += 1;
                    continue;
                }

                let parent_ids = parents.iter().map(|p| p.id()).collect();
                let id = store.insert(child, text, Origin::child(generation, parent_ids, operator));
                report.children.push(id);
                report.produced += 1;
                break;
            }
        }

        log::debug!(
            "Generation {}: {}/{} children in {} attempts ({} invalid, {} duplicate, {} similar, {} operator failures)",
            generation,
            report.produced,
            report.requested,
            report.attempts,
            report.rejected_invalid,
            report.rejected_duplicate,
            report.rejected_similar,
            report.operator_failures
        );

        report
    }

    /// Atom count and ring limits.
    fn within_size_limits<M: MolecularModel>(&self, model: &M, child: &M::Molecule) -> bool {
        let atoms = model.atom_count(child);
        if atoms < self.limits.min_atoms || atoms > self.limits.max_atoms {
            return false;
        }
        if let Some(max) = self.limits.max_ring_atoms
            && model.ring_atom_count(child) > max
        {
            return false;
        }
        if let Some(max) = self.limits.max_ring_size
            && model.largest_ring_size(child) > max
        {
            return false;
        }
        true
    }

    fn sampler(&self, pool: &[PoolEntry]) -> ParentSampler {
        let scored = pool.iter().all(|p| p.fitness.is_some());
        match &self.parent_selection {
            ParentSelection::Tournament { size } => ParentSampler::Tournament(*size),
            ParentSelection::FitnessProportional { gamma } if scored => {
                let min = pool
                    .iter()
                    .filter_map(|p| p.fitness)
                    .fold(f64::INFINITY, f64::min);
                weighted_or_uniform(
                    pool.iter()
                        .map(|p| (p.fitness.unwrap_or(min) - min + 1e-6).powf(*gamma))
                        .collect(),
                )
            }
            ParentSelection::RankBased if scored => {
                // Pool is sorted best first, so the best gets weight n.
                let n = pool.len();
                weighted_or_uniform((0..n).map(|rank| (n - rank) as f64).collect())
            }
            _ => ParentSampler::Uniform,
        }
    }
}

impl ParentSampler {
    fn pick(&self, pool: &[PoolEntry], rng: &mut StdRng) -> usize {
        match self {
            ParentSampler::Tournament(size) => {
                let mut best = rng.gen_range(0..pool.len());
                for _ in 1..*size {
                    let challenger = rng.gen_range(0..pool.len());
                    if beats(pool[challenger].fitness, pool[best].fitness) {
                        best = challenger;
                    }
                }
                best
            }
            ParentSampler::Weighted(weights) => weights.sample(rng),
            ParentSampler::Uniform => rng.gen_range(0..pool.len()),
        }
    }
}

/// `WeightedIndex` panics on an infinite total, so overflowing weights fall
/// back to uniform sampling as well as all-zero ones.
fn weighted_or_uniform(weights: Vec<f64>) -> ParentSampler {
    if !weights.iter().sum::<f64>().is_finite() {
        return ParentSampler::Uniform;
    }
    WeightedIndex::new(weights).map_or(ParentSampler::Uniform, ParentSampler::Weighted)
}

fn beats(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a > b,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Scored live individuals sorted best first, or every live individual when
/// none is scored yet.
fn parent_pool<M>(store: &PopulationStore<M>) -> Vec<PoolEntry> {
    let live = store.live_indices();
    let mut pool: Vec<PoolEntry> = live
        .iter()
        .filter_map(|&index| {
            let fitness = store.at(index)?.fitness()?;
            Some(PoolEntry {
                index,
                fitness: Some(fitness),
            })
        })
        .collect();
    if pool.is_empty() {
        pool = live
            .into_iter()
            .map(|index| PoolEntry {
                index,
                fitness: None,
            })
            .collect();
    }
    pool.sort_by(|a, b| {
        b.fitness
            .unwrap_or(f64::NEG_INFINITY)
            .total_cmp(&a.fitness.unwrap_or(f64::NEG_INFINITY))
            .then(a.index.cmp(&b.index))
    });
    pool
}
