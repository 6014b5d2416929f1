//! Molecular graph types used by the built-in graph model.
//!
//! A [`MolGraph`] is a hydrogen-suppressed, organic-subset molecular graph:
//! heavy atoms are nodes, covalent bonds are weighted edges, and hydrogens are
//! implied by whatever valence is left over.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Chemical elements supported by the graph model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Element {
    B,
    C,
    N,
    O,
    F,
    P,
    S,
    Cl,
    Br,
    I,
}

impl Element {
    /// All supported elements, in atomic number order.
    pub const ALL: [Element; 10] = [
        Element::B,
        Element::C,
        Element::N,
        Element::O,
        Element::F,
        Element::P,
        Element::S,
        Element::Cl,
        Element::Br,
        Element::I,
    ];

    /// Element symbol as written in SMILES.
    pub fn symbol(self) -> &'static str {
        match self {
            Element::B => "B",
            Element::C => "C",
            Element::N => "N",
            Element::O => "O",
            Element::F => "F",
            Element::P => "P",
            Element::S => "S",
            Element::Cl => "Cl",
            Element::Br => "Br",
            Element::I => "I",
        }
    }

    /// Parse an element symbol.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| e.symbol() == symbol)
    }

    /// Atomic number.
    pub fn atomic_number(self) -> u8 {
        match self {
            Element::B => 5,
            Element::C => 6,
            Element::N => 7,
            Element::O => 8,
            Element::F => 9,
            Element::P => 15,
            Element::S => 16,
            Element::Cl => 17,
            Element::Br => 35,
            Element::I => 53,
        }
    }

    /// Allowed neutral valences, lowest first.
    pub fn valences(self) -> &'static [u8] {
        match self {
            Element::B => &[3],
            Element::C => &[4],
            Element::N => &[3],
            Element::O => &[2],
            Element::P => &[3, 5],
            Element::S => &[2, 4, 6],
            Element::F | Element::Cl | Element::Br | Element::I => &[1],
        }
    }

    /// Highest allowed valence.
    pub fn max_valence(self) -> u8 {
        self.valences().last().copied().unwrap_or(0)
    }
}

/// Covalent bond order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
}

impl BondOrder {
    /// Number of valence electrons pairs the bond consumes on each atom.
    pub fn valence(self) -> u8 {
        match self {
            BondOrder::Single => 1,
            BondOrder::Double => 2,
            BondOrder::Triple => 3,
        }
    }

    /// Bond order for a valence contribution, if one exists.
    pub fn from_valence(valence: u8) -> Option<Self> {
        match valence {
            1 => Some(BondOrder::Single),
            2 => Some(BondOrder::Double),
            3 => Some(BondOrder::Triple),
            _ => None,
        }
    }

    /// SMILES bond symbol. Single bonds are implicit.
    pub fn symbol(self) -> &'static str {
        match self {
            BondOrder::Single => "",
            BondOrder::Double => "=",
            BondOrder::Triple => "#",
        }
    }
}

/// Bond between two atom indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bond {
    pub a: usize,
    pub b: usize,
    pub order: BondOrder,
}

impl Bond {
    /// The atom on the other end of the bond, if `atom` is one of its ends.
    pub fn other(&self, atom: usize) -> Option<usize> {
        if self.a == atom {
            Some(self.b)
        } else if self.b == atom {
            Some(self.a)
        } else {
            None
        }
    }

    /// Whether the bond touches `atom`.
    pub fn touches(&self, atom: usize) -> bool {
        self.a == atom || self.b == atom
    }
}

/// Hydrogen-suppressed molecular graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MolGraph {
    atoms: Vec<Element>,
    bonds: Vec<Bond>,
}

impl MolGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of heavy atoms.
    pub fn atom_count(&self) -> usize {
        self.atoms.len()
    }

    /// Number of bonds.
    pub fn bond_count(&self) -> usize {
        self.bonds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    pub fn atoms(&self) -> &[Element] {
        &self.atoms
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn element(&self, atom: usize) -> Element {
        self.atoms[atom]
    }

    /// Append an atom and return its index.
    pub fn add_atom(&mut self, element: Element) -> usize {
        self.atoms.push(element);
        self.atoms.len() - 1
    }

    /// Replace the element of an existing atom.
    pub fn set_element(&mut self, atom: usize, element: Element) {
        self.atoms[atom] = element;
    }

    /// Add a bond. Returns `false` for self-loops, out-of-range indices, or
    /// an already bonded pair.
    pub fn add_bond(&mut self, a: usize, b: usize, order: BondOrder) -> bool {
        if a == b || a >= self.atoms.len() || b >= self.atoms.len() || self.bond_between(a, b).is_some()
        {
            return false;
        }
        self.bonds.push(Bond { a, b, order });
        true
    }

    /// Index of the bond joining `a` and `b`.
    pub fn bond_between(&self, a: usize, b: usize) -> Option<usize> {
        self.bonds
            .iter()
            .position(|bond| (bond.a == a && bond.b == b) || (bond.a == b && bond.b == a))
    }

    /// Remove a bond by index.
    pub fn remove_bond(&mut self, index: usize) -> Bond {
        self.bonds.swap_remove(index)
    }

    /// Change the order of a bond.
    pub fn set_bond_order(&mut self, index: usize, order: BondOrder) {
        self.bonds[index].order = order;
    }

    /// Remove an atom and every bond touching it. Later atom indices shift down by one.
    pub fn remove_atom(&mut self, atom: usize) {
        self.atoms.remove(atom);
        self.bonds.retain(|b| !b.touches(atom));
        for bond in &mut self.bonds {
            if bond.a > atom {
                bond.a -= 1;
            }
            if bond.b > atom {
                bond.b -= 1;
            }
        }
    }

    /// Neighbors of an atom with the connecting bond order.
    pub fn neighbors(&self, atom: usize) -> impl Iterator<Item = (usize, BondOrder)> + '_ {
        self.bonds
            .iter()
            .filter_map(move |b| b.other(atom).map(|n| (n, b.order)))
    }

    pub fn degree(&self, atom: usize) -> usize {
        self.neighbors(atom).count()
    }

    /// Sum of bond valences on an atom, saturating at `u8::MAX`.
    pub fn explicit_valence(&self, atom: usize) -> u8 {
        self.neighbors(atom)
            .fold(0u8, |acc, (_, order)| acc.saturating_add(order.valence()))
    }

    /// Valence left for implicit hydrogens or new bonds, against the element's
    /// highest valence.
    pub fn free_valence(&self, atom: usize) -> u8 {
        self.atoms[atom]
            .max_valence()
            .saturating_sub(self.explicit_valence(atom))
    }

    /// Implicit hydrogens, using the lowest valence state that fits.
    pub fn implicit_hydrogens(&self, atom: usize) -> u8 {
        let used = self.explicit_valence(atom);
        self.atoms[atom]
            .valences()
            .iter()
            .find(|&&v| v >= used)
            .map(|v| v - used)
            .unwrap_or(0)
    }

    /// Whether every atom's bonds fit one of its valence states.
    pub fn valence_ok(&self) -> bool {
        (0..self.atoms.len()).all(|i| self.explicit_valence(i) <= self.atoms[i].max_valence())
    }

    /// Connected components as sorted atom index lists.
    pub fn components(&self) -> Vec<Vec<usize>> {
        let mut seen = vec![false; self.atoms.len()];
        let mut components = Vec::new();
        for start in 0..self.atoms.len() {
            if seen[start] {
                continue;
            }
            components.push(self.reachable_from(start, None, &mut seen));
        }
        components
    }

    /// Whether the graph is a single non-empty component.
    pub fn is_connected(&self) -> bool {
        !self.atoms.is_empty() && self.components().len() == 1
    }

    /// Atoms reachable from `start`, optionally ignoring one bond.
    pub fn reachable_without(&self, start: usize, ignored_bond: Option<usize>) -> Vec<usize> {
        let mut seen = vec![false; self.atoms.len()];
        self.reachable_from(start, ignored_bond, &mut seen)
    }

    fn reachable_from(&self, start: usize, ignored_bond: Option<usize>, seen: &mut [bool]) -> Vec<usize> {
        let mut stack = vec![start];
        let mut found = Vec::new();
        seen[start] = true;
        while let Some(atom) = stack.pop() {
            found.push(atom);
            for (index, bond) in self.bonds.iter().enumerate() {
                if Some(index) == ignored_bond {
                    continue;
                }
                if let Some(next) = bond.other(atom)
                    && !seen[next]
                {
                    seen[next] = true;
                    stack.push(next);
                }
            }
        }
        found.sort_unstable();
        found
    }

    /// Whether a bond lies on a ring (removing it keeps its ends connected).
    pub fn is_ring_bond(&self, index: usize) -> bool {
        let bond = self.bonds[index];
        self.reachable_without(bond.a, Some(index)).binary_search(&bond.b).is_ok()
    }

    /// Ring membership of every bond, from a single lowlink search.
    pub fn ring_bond_flags(&self) -> Vec<bool> {
        let mut search = BridgeSearch {
            adjacency: self.adjacency(),
            order: vec![None; self.atoms.len()],
            low: vec![0; self.atoms.len()],
            counter: 0,
            ring: vec![true; self.bonds.len()],
        };
        for start in 0..self.atoms.len() {
            if search.order[start].is_none() {
                search.visit(start, None);
            }
        }
        search.ring
    }

    /// Ring membership of every atom.
    pub fn ring_atom_flags(&self) -> Vec<bool> {
        let mut flags = vec![false; self.atoms.len()];
        for (bond, ring) in self.bonds.iter().zip(self.ring_bond_flags()) {
            if ring {
                flags[bond.a] = true;
                flags[bond.b] = true;
            }
        }
        flags
    }

    /// Number of atoms on at least one ring.
    pub fn ring_atom_count(&self) -> usize {
        self.ring_atom_flags().iter().filter(|&&ring| ring).count()
    }

    /// Size of the smallest ring through a bond, or `None` for a bridge.
    pub fn smallest_ring_through(&self, index: usize) -> Option<usize> {
        self.shortest_cycle(&self.adjacency(), index)
    }

    /// Largest of the smallest rings through each ring bond; zero when the
    /// graph is acyclic. A fused bicycle reports its bigger ring, never the
    /// envelope around both.
    pub fn largest_ring_size(&self) -> usize {
        let adjacency = self.adjacency();
        self.ring_bond_flags()
            .iter()
            .enumerate()
            .filter(|(_, ring)| **ring)
            .filter_map(|(index, _)| self.shortest_cycle(&adjacency, index))
            .max()
            .unwrap_or(0)
    }

    /// Neighbor and bond index lists per atom.
    fn adjacency(&self) -> Vec<Vec<(usize, usize)>> {
        let mut adjacency = vec![Vec::new(); self.atoms.len()];
        for (index, bond) in self.bonds.iter().enumerate() {
            adjacency[bond.a].push((bond.b, index));
            adjacency[bond.b].push((bond.a, index));
        }
        adjacency
    }

    /// Breadth-first path between the ends of a bond that avoids the bond
    /// itself; the ring size is the path's atom count.
    fn shortest_cycle(&self, adjacency: &[Vec<(usize, usize)>], index: usize) -> Option<usize> {
        let bond = self.bonds[index];
        let mut seen = vec![false; self.atoms.len()];
        let mut queue = VecDeque::from([(bond.a, 1usize)]);
        seen[bond.a] = true;
        while let Some((atom, atoms_on_path)) = queue.pop_front() {
            if atom == bond.b {
                return Some(atoms_on_path);
            }
            for &(next, via) in &adjacency[atom] {
                if via != index && !seen[next] {
                    seen[next] = true;
                    queue.push_back((next, atoms_on_path + 1));
                }
            }
        }
        None
    }

    /// Indices of bonds that are not on any ring.
    pub fn bridge_bonds(&self) -> Vec<usize> {
        self.ring_bond_flags()
            .iter()
            .enumerate()
            .filter(|(_, ring)| !**ring)
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether an atom is on any ring.
    pub fn is_ring_atom(&self, atom: usize) -> bool {
        self.ring_atom_flags()[atom]
    }

    /// Atoms with exactly one neighbor.
    pub fn peripheral_atoms(&self) -> Vec<usize> {
        (0..self.atoms.len()).filter(|&i| self.degree(i) == 1).collect()
    }

    /// Copy of the subgraph induced by `atoms` (sorted, unique), with indices
    /// remapped in that order. Returns the subgraph and the old→new index map.
    pub fn induced_subgraph(&self, atoms: &[usize]) -> (MolGraph, Vec<Option<usize>>) {
        let mut map = vec![None; self.atoms.len()];
        let mut sub = MolGraph::new();
        for &atom in atoms {
            map[atom] = Some(sub.add_atom(self.atoms[atom]));
        }
        for bond in &self.bonds {
            if let (Some(a), Some(b)) = (map[bond.a], map[bond.b]) {
                sub.add_bond(a, b, bond.order);
            }
        }
        (sub, map)
    }

    /// Copy another graph into this one, returning the index offset of its atoms.
    pub fn merge(&mut self, other: &MolGraph) -> usize {
        let offset = self.atoms.len();
        self.atoms.extend_from_slice(&other.atoms);
        self.bonds.extend(other.bonds.iter().map(|b| Bond {
            a: b.a + offset,
            b: b.b + offset,
            order: b.order,
        }));
        offset
    }
}

/// Depth-first bridge finding over an adjacency list.
struct BridgeSearch {
    adjacency: Vec<Vec<(usize, usize)>>,
    order: Vec<Option<usize>>,
    low: Vec<usize>,
    counter: usize,
    ring: Vec<bool>,
}

impl BridgeSearch {
    fn visit(&mut self, atom: usize, parent_bond: Option<usize>) {
        self.order[atom] = Some(self.counter);
        self.low[atom] = self.counter;
        self.counter += 1;

        for i in 0..self.adjacency[atom].len() {
            let (next, bond) = self.adjacency[atom][i];
            if Some(bond) == parent_bond {
                continue;
            }
            match self.order[next] {
                Some(order) => self.low[atom] = self.low[atom].min(order),
                None => {
                    self.visit(next, Some(bond));
                    self.low[atom] = self.low[atom].min(self.low[next]);
                    if let Some(order) = self.order[atom]
                        && self.low[next] > order
                    {
                        self.ring[bond] = false;
                    }
                }
            }
        }
    }
}
