//! Canonical atom ranking and canonical SMILES output.
//!
//! Ranks start from atom invariants (element, degree, valence, hydrogens,
//! ring membership) and are refined with neighbor ranks until stable. Ties
//! left after refinement are broken one class at a time, refining again after
//! each break. The SMILES writer walks the graph depth-first from the
//! lowest-ranked atom, visiting neighbors in rank order.

use crate::schema::{BondOrder, MolGraph};

/// Compute canonical ranks (0..n, all distinct) for every atom.
pub fn canonical_ranks(graph: &MolGraph) -> Vec<usize> {
    let n = graph.atom_count();
    if n == 0 {
        return Vec::new();
    }

    let ring = graph.ring_atom_flags();
    let invariants: Vec<(u8, usize, u8, u8, bool)> = (0..n)
        .map(|i| {
            (
                graph.element(i).atomic_number(),
                graph.degree(i),
                graph.explicit_valence(i),
                graph.implicit_hydrogens(i),
                ring[i],
            )
        })
        .collect();

    let mut ranks = dense_ranks(&invariants);
    loop {
        ranks = refine(graph, ranks);
        if distinct(&ranks) == n {
            return ranks;
        }

        // Split the lowest tied class by promoting its first member.
        let mut counts = vec![0usize; n];
        for &r in &ranks {
            counts[r] += 1;
        }
        let tied = (0..n).find(|&r| counts[r] > 1).unwrap_or(0);
        let chosen = ranks.iter().position(|&r| r == tied).unwrap_or(0);
        let keys: Vec<(usize, u8)> = ranks
            .iter()
            .enumerate()
            .map(|(i, &r)| (r, u8::from(i != chosen)))
            .collect();
        ranks = dense_ranks(&keys);
    }
}

fn refine(graph: &MolGraph, mut ranks: Vec<usize>) -> Vec<usize> {
    loop {
        let keys: Vec<(usize, Vec<(usize, u8)>)> = (0..graph.atom_count())
            .map(|i| {
                let mut neighbors: Vec<(usize, u8)> = graph
                    .neighbors(i)
                    .map(|(j, order)| (ranks[j], order.valence()))
                    .collect();
                neighbors.sort_unstable();
                (ranks[i], neighbors)
            })
            .collect();
        let refined = dense_ranks(&keys);
        if distinct(&refined) == distinct(&ranks) {
            return refined;
        }
        ranks = refined;
    }
}

fn dense_ranks<T: Ord + Clone>(keys: &[T]) -> Vec<usize> {
    let mut sorted: Vec<T> = keys.to_vec();
    sorted.sort();
    sorted.dedup();
    keys.iter()
        .map(|k| sorted.binary_search(k).unwrap_or(0))
        .collect()
}

fn distinct(ranks: &[usize]) -> usize {
    let mut sorted = ranks.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.len()
}

struct RingClosure {
    order: BondOrder,
}

/// DFS layout of one component: tree children and ring closures per atom.
struct Layout {
    children: Vec<Vec<(usize, BondOrder)>>,
    opens: Vec<Vec<usize>>,
    closes: Vec<Vec<usize>>,
    closures: Vec<RingClosure>,
    visited: Vec<bool>,
    bond_used: Vec<bool>,
}

impl Layout {
    fn new(graph: &MolGraph) -> Self {
        let n = graph.atom_count();
        Self {
            children: vec![Vec::new(); n],
            opens: vec![Vec::new(); n],
            closes: vec![Vec::new(); n],
            closures: Vec::new(),
            visited: vec![false; n],
            bond_used: vec![false; graph.bond_count()],
        }
    }

    fn walk(&mut self, graph: &MolGraph, ranks: &[usize], atom: usize) {
        self.visited[atom] = true;

        let mut neighbors: Vec<(usize, usize)> = graph
            .bonds()
            .iter()
            .enumerate()
            .filter_map(|(index, bond)| bond.other(atom).map(|n| (n, index)))
            .collect();
        neighbors.sort_by_key(|&(n, _)| ranks[n]);

        for (next, bond_index) in neighbors {
            if self.bond_used[bond_index] {
                continue;
            }
            self.bond_used[bond_index] = true;
            let order = graph.bonds()[bond_index].order;
            if self.visited[next] {
                let id = self.closures.len();
                self.closures.push(RingClosure { order });
                self.opens[next].push(id);
                self.closes[atom].push(id);
            } else {
                self.children[atom].push((next, order));
                self.walk(graph, ranks, next);
            }
        }
    }
}

struct Writer<'a> {
    graph: &'a MolGraph,
    layout: &'a Layout,
    digits: Vec<Option<usize>>,
    in_use: Vec<bool>,
    out: String,
}

impl Writer<'_> {
    fn emit(&mut self, atom: usize) {
        self.out.push_str(self.graph.element(atom).symbol());

        for &closure in &self.layout.closes[atom] {
            if let Some(digit) = self.digits[closure] {
                push_ring_label(&mut self.out, digit);
                self.in_use[digit] = false;
            }
        }
        for &closure in &self.layout.opens[atom] {
            let digit = self.allocate();
            self.digits[closure] = Some(digit);
            self.out.push_str(self.layout.closures[closure].order.symbol());
            push_ring_label(&mut self.out, digit);
        }

        let children = &self.layout.children[atom];
        for (i, &(child, order)) in children.iter().enumerate() {
            let branch = i + 1 < children.len();
            if branch {
                self.out.push('(');
            }
            self.out.push_str(order.symbol());
            self.emit(child);
            if branch {
                self.out.push(')');
            }
        }
    }

    fn allocate(&mut self) -> usize {
        match self.in_use.iter().skip(1).position(|used| !used) {
            Some(offset) => {
                self.in_use[offset + 1] = true;
                offset + 1
            }
            None => {
                self.in_use.push(true);
                self.in_use.len() - 1
            }
        }
    }
}

fn push_ring_label(out: &mut String, digit: usize) {
    if digit < 10 {
        out.push_str(&digit.to_string());
    } else {
        out.push_str(&format!("%{digit:02}"));
    }
}

/// Write the canonical SMILES of a graph.
///
/// Disconnected components are written in order of their lowest rank and
/// joined with `.`.
pub fn canonical_smiles(graph: &MolGraph) -> String {
    let ranks = canonical_ranks(graph);
    let mut layout = Layout::new(graph);

    let mut starts: Vec<usize> = graph
        .components()
        .iter()
        .filter_map(|component| component.iter().copied().min_by_key(|&a| ranks[a]))
        .collect();
    starts.sort_by_key(|&a| ranks[a]);

    for &start in &starts {
        layout.walk(graph, &ranks, start);
    }

    let mut writer = Writer {
        graph,
        layout: &layout,
        digits: vec![None; layout.closures.len()],
        in_use: vec![true],
        out: String::new(),
    };
    for (i, &start) in starts.iter().enumerate() {
        if i > 0 {
            writer.out.push('.');
        }
        writer.emit(start);
    }
    writer.out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_smiles;

    fn canon(smiles: &str) -> String {
        canonical_smiles(&parse_smiles(smiles).unwrap())
    }

    #[test]
    fn test_atom_order_invariance() {
        assert_eq!(canon("CCO"), canon("OCC"));
        assert_eq!(canon("CC(C)O"), canon("OC(C)C"));
        assert_eq!(canon("CC1CCCCC1"), canon("C1CCC(C)CC1"));
        assert_eq!(canon("NC(=O)CCl"), canon("ClCC(N)=O"));
    }

    #[test]
    fn test_distinguishes_isomers() {
        assert_ne!(canon("CCCO"), canon("CC(C)O"));
        assert_ne!(canon("C=CC"), canon("C1CC1"));
    }

    #[test]
    fn test_roundtrip_preserves_structure() {
        for smiles in ["C1CCCCC1", "CC(=O)OC1CC2CCC1C2", "N#CC(F)(F)F", "CC.O", "C1CC2CC1CC2"] {
            let once = canon(smiles);
            let graph = parse_smiles(&once).unwrap();
            let original = parse_smiles(smiles).unwrap();
            assert_eq!(graph.atom_count(), original.atom_count(), "{smiles}");
            assert_eq!(graph.bond_count(), original.bond_count(), "{smiles}");
            assert_eq!(canonical_smiles(&graph), once, "{smiles}");
        }
    }

    #[test]
    fn test_ranks_are_a_permutation() {
        let graph = parse_smiles("CC(C)(C)C").unwrap();
        let mut ranks = canonical_ranks(&graph);
        ranks.sort_unstable();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_graph() {
        assert_eq!(canonical_smiles(&MolGraph::new()), "");
    }

    #[test]
    fn test_ring_bond_order_written_once() {
        let smiles = canon("C1=CCCCC1");
        let graph = parse_smiles(&smiles).unwrap();
        let doubles = graph
            .bonds()
            .iter()
            .filter(|b| b.order == BondOrder::Double)
            .count();
        assert_eq!(doubles, 1);
    }

    #[test]
    fn test_overvalent_hub_does_not_panic() {
        let graph = parse_smiles(&format!("C{}", "(C)".repeat(256))).unwrap();
        let smiles = canonical_smiles(&graph);
        assert_eq!(parse_smiles(&smiles).unwrap().atom_count(), 257);
    }
}
