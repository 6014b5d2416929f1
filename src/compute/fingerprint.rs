//! Circular atom-environment fingerprints and Tanimoto distance.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::schema::MolGraph;

/// Default environment radius (ECFP4-like).
pub const DEFAULT_RADIUS: usize = 2;

/// Sorted, deduplicated set of atom-environment identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    features: Vec<u64>,
}

impl Fingerprint {
    /// Build the fingerprint of a graph, collecting environments of radius
    /// `0..=radius` around every atom.
    pub fn from_graph(graph: &MolGraph, radius: usize) -> Self {
        let ring = graph.ring_atom_flags();
        let mut ids: Vec<u64> = (0..graph.atom_count())
            .map(|i| {
                hash_of(&(
                    graph.element(i).atomic_number(),
                    graph.degree(i),
                    graph.implicit_hydrogens(i),
                    ring[i],
                ))
            })
            .collect();
        let mut features = ids.clone();

        for iteration in 1..=radius {
            ids = (0..graph.atom_count())
                .map(|i| {
                    let mut environment: Vec<(u8, u64)> = graph
                        .neighbors(i)
                        .map(|(j, order)| (order.valence(), ids[j]))
                        .collect();
                    environment.sort_unstable();
                    hash_of(&(iteration, ids[i], environment))
                })
                .collect();
            features.extend_from_slice(&ids);
        }

        features.sort_unstable();
        features.dedup();
        Self { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Tanimoto similarity in `[0, 1]`. Two empty fingerprints are identical.
    pub fn similarity(&self, other: &Fingerprint) -> f64 {
        let (mut i, mut j, mut shared) = (0, 0, 0usize);
        while i < self.features.len() && j < other.features.len() {
            match self.features[i].cmp(&other.features[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    shared += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        let union = self.features.len() + other.features.len() - shared;
        if union == 0 {
            1.0
        } else {
            shared as f64 / union as f64
        }
    }

    /// Tanimoto distance, `1 - similarity`.
    pub fn distance(&self, other: &Fingerprint) -> f64 {
        1.0 - self.similarity(other)
    }
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Tanimoto distance between two graphs at the default radius.
pub fn tanimoto_distance(a: &MolGraph, b: &MolGraph) -> f64 {
    Fingerprint::from_graph(a, DEFAULT_RADIUS).distance(&Fingerprint::from_graph(b, DEFAULT_RADIUS))
}
