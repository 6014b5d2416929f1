//! Molecular model abstraction consumed by the engine, and the built-in
//! graph implementation.

use std::fmt::Debug;

use rand::RngCore;
use rayon::prelude::*;

use crate::compute::{
    DEFAULT_RADIUS, Fingerprint, FragmentLibrary, canonical_smiles, crossover,
    fragment_substitution, peripheral_deletion, peripheral_expansion, point_mutation,
};
use crate::schema::{MolGraph, OperatorKind, parse_smiles};

/// Operations the engine needs from a molecule representation.
///
/// The engine never looks inside a molecule: validity, canonical text,
/// distance and graph edits all go through this trait.
pub trait MolecularModel: Send + Sync {
    type Molecule: Clone + Send + Sync + Debug;

    /// Whether the molecule is structurally valid (valence, connectivity).
    fn is_valid(&self, molecule: &Self::Molecule) -> bool;

    /// Canonical textual projection. Equal structures give equal text.
    fn canonical_text(&self, molecule: &Self::Molecule) -> String;

    /// Rebuild a molecule from its canonical text.
    fn from_canonical_text(&self, text: &str) -> Option<Self::Molecule>;

    /// Structural distance in `[0, 1]`; zero for identical structures.
    fn structural_distance(&self, a: &Self::Molecule, b: &Self::Molecule) -> f64;

    /// Size used for the child atom-count bounds.
    fn atom_count(&self, molecule: &Self::Molecule) -> usize;

    /// Atoms on at least one ring. Models without ring perception report
    /// zero, so ring limits never reject their molecules.
    fn ring_atom_count(&self, _molecule: &Self::Molecule) -> usize {
        0
    }

    /// Largest ring size, measured as the smallest ring through each ring bond.
    fn largest_ring_size(&self, _molecule: &Self::Molecule) -> usize {
        0
    }

    /// Full symmetric matrix of structural distances. Implementations with an
    /// expensive per-molecule preparation step should override this so the
    /// step runs once per molecule instead of once per pair.
    fn distance_matrix(&self, molecules: &[&Self::Molecule]) -> Vec<Vec<f64>> {
        molecules
            .iter()
            .map(|a| molecules.iter().map(|b| self.structural_distance(a, b)).collect())
            .collect()
    }

    /// Apply a graph-edit operator. `parents` holds `operator.arity()`
    /// molecules. Returns `None` when the operator has no site to act on.
    fn apply_operator(
        &self,
        operator: OperatorKind,
        parents: &[&Self::Molecule],
        rng: &mut dyn RngCore,
    ) -> Option<Self::Molecule>;

    /// Release external resources. Called once when a run is finalized.
    fn release(&self) {}
}

/// Built-in model over [`MolGraph`], with SMILES as canonical text and
/// Tanimoto distance over circular fingerprints.
#[derive(Debug, Clone)]
pub struct GraphModel {
    library: FragmentLibrary,
    radius: usize,
}

impl Default for GraphModel {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphModel {
    /// Create a model with the default fragment library.
    pub fn new() -> Self {
        Self {
            library: FragmentLibrary::default(),
            radius: DEFAULT_RADIUS,
        }
    }

    /// Use a custom fragment library for substitution.
    pub fn with_library(mut self, library: FragmentLibrary) -> Self {
        self.library = library;
        self
    }

    /// Set the fingerprint radius used for distances.
    pub fn with_radius(mut self, radius: usize) -> Self {
        self.radius = radius;
        self
    }

    pub fn library(&self) -> &FragmentLibrary {
        &self.library
    }
}

impl MolecularModel for GraphModel {
    type Molecule = MolGraph;

    fn is_valid(&self, molecule: &MolGraph) -> bool {
        molecule.is_connected() && molecule.valence_ok()
    }

    fn canonical_text(&self, molecule: &MolGraph) -> String {
        canonical_smiles(molecule)
    }

    fn from_canonical_text(&self, text: &str) -> Option<MolGraph> {
        parse_smiles(text).ok()
    }

    fn structural_distance(&self, a: &MolGraph, b: &MolGraph) -> f64 {
        Fingerprint::from_graph(a, self.radius).distance(&Fingerprint::from_graph(b, self.radius))
    }

    fn atom_count(&self, molecule: &MolGraph) -> usize {
        molecule.atom_count()
    }

    fn ring_atom_count(&self, molecule: &MolGraph) -> usize {
        molecule.ring_atom_count()
    }

    fn largest_ring_size(&self, molecule: &MolGraph) -> usize {
        molecule.largest_ring_size()
    }

    fn distance_matrix(&self, molecules: &[&MolGraph]) -> Vec<Vec<f64>> {
        let fingerprints: Vec<Fingerprint> = molecules
            .par_iter()
            .map(|m| Fingerprint::from_graph(m, self.radius))
            .collect();
        fingerprints
            .iter()
            .map(|a| fingerprints.iter().map(|b| a.distance(b)).collect())
            .collect()
    }

    fn apply_operator(
        &self,
        operator: OperatorKind,
        parents: &[&MolGraph],
        rng: &mut dyn RngCore,
    ) -> Option<MolGraph> {
        let first = parents.first()?;
        match operator {
            OperatorKind::PointMutation => point_mutation(first, rng),
            OperatorKind::PeripheralExpansion => peripheral_expansion(first, rng),
            OperatorKind::PeripheralDeletion => peripheral_deletion(first, rng),
            OperatorKind::FragmentSubstitution => fragment_substitution(first, &self.library, rng),
            OperatorKind::Crossover => crossover(first, parents.get(1)?, rng),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_text_roundtrip() {
        let model = GraphModel::new();
        let molecule = model.from_canonical_text("OCC(=O)N").unwrap();
        let text = model.canonical_text(&molecule);
        let again = model.from_canonical_text(&text).unwrap();
        assert_eq!(model.canonical_text(&again), text);
        assert_eq!(model.structural_distance(&molecule, &again), 0.0);
    }

    #[test]
    fn test_validity() {
        let model = GraphModel::new();
        assert!(model.is_valid(&parse_smiles("CCO").unwrap()));
        assert!(!model.is_valid(&parse_smiles("CC.O").unwrap()));
        assert!(!model.is_valid(&parse_smiles("C(C)(C)(C)(C)C").unwrap()));
        assert!(!model.is_valid(&MolGraph::new()));
        assert!(model.from_canonical_text("c1ccccc1").is_none());
    }

    #[test]
    fn test_operators_dispatch() {
        let model = GraphModel::new();
        let mut rng = StdRng::seed_from_u64(1);
        let a = parse_smiles("CCCCO").unwrap();
        let b = parse_smiles("NCCCl").unwrap();
        for operator in OperatorKind::ALL {
            let parents = [&a, &b];
            let child = model
                .apply_operator(operator, &parents[..operator.arity()], &mut rng)
                .unwrap();
            assert!(model.is_valid(&child), "{operator:?}");
        }
        assert!(
            model
                .apply_operator(OperatorKind::Crossover, &[&a], &mut rng)
                .is_none()
        );
    }

    #[test]
    fn test_distance_matrix_matches_pairwise() {
        let model = GraphModel::new();
        let graphs: Vec<MolGraph> = ["CCO", "CCN", "C1CCCCC1", "FC(F)(F)Cl"]
            .iter()
            .map(|s| parse_smiles(s).unwrap())
            .collect();
        let refs: Vec<&MolGraph> = graphs.iter().collect();

        let matrix = model.distance_matrix(&refs);
        assert_eq!(matrix.len(), 4);
        for i in 0..4 {
            assert_eq!(matrix[i][i], 0.0);
            for j in 0..4 {
                assert_eq!(matrix[i][j], model.structural_distance(refs[i], refs[j]));
                assert_eq!(matrix[i][j], matrix[j][i]);
            }
        }
        assert!(model.distance_matrix(&[]).is_empty());
    }

    #[test]
    fn test_ring_measures() {
        let model = GraphModel::new();
        let spiro = parse_smiles("C1CCC2(CC1)CCC2").unwrap();
        assert_eq!(model.ring_atom_count(&spiro), 9);
        assert_eq!(model.largest_ring_size(&spiro), 6);
        assert_eq!(model.largest_ring_size(&parse_smiles("CCCC").unwrap()), 0);
    }
}
