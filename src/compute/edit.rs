//! Graph-edit operators: point mutation, peripheral expansion and deletion,
//! fragment substitution and crossover.
//!
//! Every operator works on a copy and returns `None` when the input offers no
//! site it can act on. Operators keep valence within each element's limits
//! and keep connected inputs connected, but callers still validate results.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::schema::{BondOrder, Element, MolGraph, SmilesError, parse_smiles};

/// Fragments used for substitution when no library is configured.
pub const DEFAULT_FRAGMENTS: &[&str] = &[
    "C", "N", "O", "F", "Cl", "S", "C=C", "C#N", "OC", "N(C)C", "C(=O)O", "C(N)=O", "C(F)(F)F",
    "C1CC1", "C1CCCC1", "C1CCCCC1", "C1CCOCC1", "C1CCNCC1",
];

/// Elements drawn by peripheral expansion; carbon is listed repeatedly to bias
/// growth toward organic scaffolds.
const EXPANSION_ELEMENTS: [Element; 8] = [
    Element::C,
    Element::C,
    Element::C,
    Element::C,
    Element::N,
    Element::O,
    Element::F,
    Element::Cl,
];

/// A library fragment with the atoms it may be attached through.
#[derive(Debug, Clone)]
pub struct Fragment {
    graph: MolGraph,
    attachments: Vec<usize>,
}

impl Fragment {
    /// Parse a fragment. Every atom with free valence is an attachment point.
    pub fn from_smiles(smiles: &str) -> Result<Self, SmilesError> {
        let graph = parse_smiles(smiles)?;
        let attachments = (0..graph.atom_count())
            .filter(|&i| graph.free_valence(i) > 0)
            .collect();
        Ok(Self { graph, attachments })
    }

    pub fn graph(&self) -> &MolGraph {
        &self.graph
    }

    pub fn attachments(&self) -> &[usize] {
        &self.attachments
    }
}

/// Set of fragments available to substitution.
#[derive(Debug, Clone)]
pub struct FragmentLibrary {
    fragments: Vec<Fragment>,
}

impl FragmentLibrary {
    /// Build a library from SMILES strings. Fragments without any attachment
    /// point are skipped.
    pub fn from_smiles<'a>(smiles: impl IntoIterator<Item = &'a str>) -> Result<Self, SmilesError> {
        let mut fragments = Vec::new();
        for s in smiles {
            let fragment = Fragment::from_smiles(s)?;
            if !fragment.attachments.is_empty() {
                fragments.push(fragment);
            }
        }
        Ok(Self { fragments })
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }
}

impl Default for FragmentLibrary {
    fn default() -> Self {
        let fragments = DEFAULT_FRAGMENTS
            .iter()
            .filter_map(|s| Fragment::from_smiles(s).ok())
            .filter(|f| !f.attachments.is_empty())
            .collect();
        Self { fragments }
    }
}

/// Change the element of a random atom to one whose valence still fits.
pub fn point_mutation<R: Rng + ?Sized>(graph: &MolGraph, rng: &mut R) -> Option<MolGraph> {
    if graph.is_empty() {
        return None;
    }
    let atom = rng.gen_range(0..graph.atom_count());
    let current = graph.element(atom);
    let used = graph.explicit_valence(atom);
    let candidates: Vec<Element> = Element::ALL
        .iter()
        .copied()
        .filter(|&e| e != current && e.max_valence() >= used)
        .collect();
    let element = *candidates.choose(rng)?;

    let mut child = graph.clone();
    child.set_element(atom, element);
    Some(child)
}

/// Bond a new atom to a random atom with free valence.
pub fn peripheral_expansion<R: Rng + ?Sized>(graph: &MolGraph, rng: &mut R) -> Option<MolGraph> {
    let open: Vec<usize> = (0..graph.atom_count())
        .filter(|&i| graph.free_valence(i) > 0)
        .collect();
    let atom = *open.choose(rng)?;
    let element = *EXPANSION_ELEMENTS.choose(rng)?;
    let max_order = graph
        .free_valence(atom)
        .min(element.max_valence())
        .min(BondOrder::Triple.valence());
    let order = BondOrder::from_valence(rng.gen_range(1..=max_order))?;

    let mut child = graph.clone();
    let new_atom = child.add_atom(element);
    child.add_bond(atom, new_atom, order);
    Some(child)
}

/// Remove a random atom that has exactly one neighbor.
pub fn peripheral_deletion<R: Rng + ?Sized>(graph: &MolGraph, rng: &mut R) -> Option<MolGraph> {
    if graph.atom_count() < 2 {
        return None;
    }
    let atom = *graph.peripheral_atoms().choose(rng)?;
    let mut child = graph.clone();
    child.remove_atom(atom);
    Some(child)
}

/// Cut a random bridge bond, keep the larger side and attach a random library
/// fragment where the cut was.
pub fn fragment_substitution<R: Rng + ?Sized>(
    graph: &MolGraph,
    library: &FragmentLibrary,
    rng: &mut R,
) -> Option<MolGraph> {
    let bond_index = *graph.bridge_bonds().choose(rng)?;
    let bond = graph.bonds()[bond_index];
    let side_a = graph.reachable_without(bond.a, Some(bond_index));
    let side_b = graph.reachable_without(bond.b, Some(bond_index));
    let (kept, anchor) = if side_a.len() >= side_b.len() {
        (side_a, bond.a)
    } else {
        (side_b, bond.b)
    };

    let (mut child, map) = graph.induced_subgraph(&kept);
    let anchor = map[anchor]?;
    let fragment = library.fragments.choose(rng)?;
    let attachment = *fragment.attachments.choose(rng)?;
    let offset = child.merge(&fragment.graph);
    child.add_bond(anchor, offset + attachment, BondOrder::Single);
    Some(child)
}

/// Cut a random bridge bond in each parent and join one side of each.
pub fn crossover<R: Rng + ?Sized>(
    first: &MolGraph,
    second: &MolGraph,
    rng: &mut R,
) -> Option<MolGraph> {
    let (mut child, left_anchor) = random_side(first, rng)?;
    let (right, right_anchor) = random_side(second, rng)?;
    let offset = child.merge(&right);
    child.add_bond(left_anchor, offset + right_anchor, BondOrder::Single);
    Some(child)
}

/// One side of a random bridge bond, with the index of the cut atom.
fn random_side<R: Rng + ?Sized>(graph: &MolGraph, rng: &mut R) -> Option<(MolGraph, usize)> {
    let bond_index = *graph.bridge_bonds().choose(rng)?;
    let bond = graph.bonds()[bond_index];
    let end = if rng.gen_bool(0.5) { bond.a } else { bond.b };
    let side = graph.reachable_without(end, Some(bond_index));
    let (sub, map) = graph.induced_subgraph(&side);
    Some((sub, map[end]?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn mol(smiles: &str) -> MolGraph {
        parse_smiles(smiles).unwrap()
    }

    fn assert_sound(graph: &MolGraph) {
        assert!(graph.valence_ok(), "overvalent: {graph:?}");
        assert!(graph.is_connected(), "disconnected: {graph:?}");
    }

    #[test]
    fn test_default_library() {
        let library = FragmentLibrary::default();
        assert_eq!(library.len(), DEFAULT_FRAGMENTS.len());
        assert!(library.fragments().iter().all(|f| !f.attachments().is_empty()));
    }

    #[test]
    fn test_library_rejects_bad_smiles() {
        assert!(FragmentLibrary::from_smiles(["C", "C("]).is_err());
    }

    #[test]
    fn test_point_mutation() {
        let mut rng = StdRng::seed_from_u64(42);
        let parent = mol("CC(=O)OC");
        for _ in 0..50 {
            let child = point_mutation(&parent, &mut rng).unwrap();
            assert_eq!(child.bonds(), parent.bonds());
            let changed = (0..parent.atom_count())
                .filter(|&i| child.element(i) != parent.element(i))
                .count();
            assert_eq!(changed, 1);
            assert_sound(&child);
        }
    }

    #[test]
    fn test_peripheral_expansion() {
        let mut rng = StdRng::seed_from_u64(7);
        let parent = mol("CCO");
        for _ in 0..50 {
            let child = peripheral_expansion(&parent, &mut rng).unwrap();
            assert_eq!(child.atom_count(), 4);
            assert_sound(&child);
        }
        // Fully saturated halogen pair has nowhere to grow.
        assert!(peripheral_expansion(&mol("FF"), &mut rng).is_none());
    }

    #[test]
    fn test_peripheral_deletion() {
        let mut rng = StdRng::seed_from_u64(3);
        let child = peripheral_deletion(&mol("CC(C)O"), &mut rng).unwrap();
        assert_eq!(child.atom_count(), 3);
        assert_sound(&child);

        assert!(peripheral_deletion(&mol("C"), &mut rng).is_none());
        assert!(peripheral_deletion(&mol("C1CCCCC1"), &mut rng).is_none());
    }

    #[test]
    fn test_fragment_substitution() {
        let mut rng = StdRng::seed_from_u64(11);
        let library = FragmentLibrary::default();
        let parent = mol("CCCCC1CCCCC1");
        for _ in 0..50 {
            let child = fragment_substitution(&parent, &library, &mut rng).unwrap();
            assert_sound(&child);
        }
        assert!(fragment_substitution(&mol("C1CCCCC1"), &library, &mut rng).is_none());
    }

    #[test]
    fn test_crossover() {
        let mut rng = StdRng::seed_from_u64(5);
        let a = mol("CCCCO");
        let b = mol("NCCC1CC1");
        for _ in 0..50 {
            let child = crossover(&a, &b, &mut rng).unwrap();
            assert_sound(&child);
        }
        assert!(crossover(&a, &mol("C"), &mut rng).is_none());
    }
}
