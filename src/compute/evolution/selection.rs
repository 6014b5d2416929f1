//! Survivor selection.
//!
//! Ranking is fully deterministic: fitness descending, then creation
//! generation ascending (older wins exact ties), then identifier ascending.
//! Pending and failed individuals never survive.

use std::cmp::Ordering;

use crate::schema::{IndividualId, NichingConfig, Replacement, RunConfig};

use super::model::MolecularModel;
use super::population::{Individual, PopulationStore};

/// Applies selective pressure to a population.
#[derive(Debug, Clone)]
pub struct SelectionEngine {
    max_size: usize,
    elitism: bool,
    replacement: Replacement,
    niching: NichingConfig,
}

impl SelectionEngine {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            max_size: config.population.max_size,
            elitism: config.selection.elitism,
            replacement: config.selection.replacement,
            niching: config.selection.niching.clone(),
        }
    }

    /// Choose at most `max_size` survivors, best first.
    ///
    /// With elitism, the best scored individual overall is pinned first, and
    /// the best individual that predates `generation` is pinned next if room
    /// remains. Under [`Replacement::Comma`] children of `generation` are
    /// considered before older individuals. With niching, a candidate within
    /// `distance_threshold` of `niche_capacity` or more accepted survivors is
    /// deferred and only fills slots left over at the end.
    pub fn select<M: MolecularModel>(
        &self,
        store: &PopulationStore<M::Molecule>,
        model: &M,
        generation: usize,
    ) -> Vec<IndividualId> {
        // Positions below index into `ranked`.
        let ranked = rank(store);
        let mut order: Vec<usize> = match self.replacement {
            Replacement::Plus => (0..ranked.len()).collect(),
            Replacement::Comma => {
                let (fresh, old): (Vec<usize>, Vec<usize>) =
                    (0..ranked.len()).partition(|&i| ranked[i].generation() >= generation);
                fresh.into_iter().chain(old).collect()
            }
        };

        let mut survivors: Vec<usize> = Vec::with_capacity(self.max_size);
        if self.elitism {
            let best = (!ranked.is_empty()).then_some(0);
            let prior_best = ranked.iter().position(|i| i.generation() < generation);
            for elite in best.into_iter().chain(prior_best) {
                if survivors.len() < self.max_size && !survivors.contains(&elite) {
                    survivors.push(elite);
                }
            }
            order.retain(|i| !survivors.contains(i));
        }

        let distances = if self.niching.enabled {
            let molecules: Vec<&M::Molecule> = ranked.iter().map(|i| i.molecule()).collect();
            model.distance_matrix(&molecules)
        } else {
            Vec::new()
        };

        let mut deferred = Vec::new();
        for candidate in order {
            if survivors.len() >= self.max_size {
                break;
            }
            if self.niching.enabled && self.crowded(&distances[candidate], &survivors) {
                deferred.push(candidate);
            } else {
                survivors.push(candidate);
            }
        }
        for candidate in deferred {
            if survivors.len() >= self.max_size {
                break;
            }
            survivors.push(candidate);
        }

        survivors.iter().map(|&i| ranked[i].id()).collect()
    }

    /// Whether `niche_capacity` accepted survivors already sit within the
    /// distance threshold, given the candidate's row of the distance matrix.
    fn crowded(&self, distances: &[f64], accepted: &[usize]) -> bool {
        let neighbors = accepted
            .iter()
            .filter(|&&s| distances[s] < self.niching.distance_threshold)
            .count();
        neighbors >= self.niching.niche_capacity
    }
}

/// Compare two individuals by ranking key; `Less` means `a` ranks first.
pub fn compare_rank<M>(a: &Individual<M>, b: &Individual<M>) -> Ordering {
    let fa = a.fitness().unwrap_or(f64::NEG_INFINITY);
    let fb = b.fitness().unwrap_or(f64::NEG_INFINITY);
    fb.total_cmp(&fa)
        .then(a.generation().cmp(&b.generation()))
        .then(a.id().cmp(&b.id()))
}

/// Scored live individuals in ranking order.
pub fn rank<M>(store: &PopulationStore<M>) -> Vec<&Individual<M>> {
    let mut scored: Vec<&Individual<M>> = store.iter().filter(|i| i.fitness().is_some()).collect();
    scored.sort_by(|a, b| compare_rank(a, b));
    scored
}

/// Mean pairwise structural distance.
pub fn diversity<M: MolecularModel>(model: &M, molecules: &[&M::Molecule]) -> f64 {
    if molecules.len() < 2 {
        return 0.0;
    }

    let matrix = model.distance_matrix(molecules);
    let mut total = 0.0;
    let mut count = 0usize;
    for (i, row) in matrix.iter().enumerate() {
        for distance in &row[i + 1..] {
            total += distance;
            count += 1;
        }
    }
    total / count as f64
}
