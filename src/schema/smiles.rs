//! SMILES reader for the organic subset.
//!
//! Supports aliphatic organic-subset atoms (`B C N O P S F Cl Br I`),
//! explicit `-`, `=` and `#` bonds, branches, ring closures (`1`-`9` and
//! `%nn`) and `.` component separators. Aromatic lowercase atoms, bracket
//! atoms, charges and stereochemistry are rejected.

use std::collections::HashMap;

use super::{BondOrder, Element, MolGraph};

/// SMILES parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SmilesError {
    #[error("Empty SMILES string")]
    Empty,
    #[error("Unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },
    #[error("Unsupported SMILES feature '{ch}' at position {position}")]
    Unsupported { ch: char, position: usize },
    #[error("Bond or ring closure at position {position} has no preceding atom")]
    DanglingBond { position: usize },
    #[error("Unbalanced parenthesis at position {position}")]
    UnbalancedParenthesis { position: usize },
    #[error("Ring closure {label} is never closed")]
    UnclosedRing { label: u32 },
    #[error("Ring closure {label} has conflicting bond orders")]
    ConflictingRingBond { label: u32 },
    #[error("Ring closure {label} would duplicate an existing bond")]
    DuplicateBond { label: u32 },
    #[error("Malformed ring label at position {position}")]
    BadRingLabel { position: usize },
}

/// Parse a SMILES string into a molecular graph.
///
/// Valence is not checked here; callers validate the resulting graph.
pub fn parse_smiles(smiles: &str) -> Result<MolGraph, SmilesError> {
    let chars: Vec<char> = smiles.trim().chars().collect();
    if chars.is_empty() {
        return Err(SmilesError::Empty);
    }

    let mut graph = MolGraph::new();
    let mut previous: Option<usize> = None;
    let mut branch_stack: Vec<Option<usize>> = Vec::new();
    let mut pending_bond: Option<(BondOrder, usize)> = None;
    let mut open_rings: HashMap<u32, (usize, Option<BondOrder>)> = HashMap::new();

    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        match ch {
            'B' | 'C' | 'N' | 'O' | 'P' | 'S' | 'F' | 'I' => {
                let mut buf = [0u8; 4];
                let (element, width) = match (ch, chars.get(i + 1)) {
                    ('C', Some('l')) => (Some(Element::Cl), 2),
                    ('B', Some('r')) => (Some(Element::Br), 2),
                    _ => (Element::from_symbol(ch.encode_utf8(&mut buf)), 1),
                };
                let element = element.ok_or(SmilesError::UnexpectedChar { ch, position: i })?;
                let atom = graph.add_atom(element);
                if let Some(prev) = previous {
                    let order = pending_bond.take().map_or(BondOrder::Single, |(o, _)| o);
                    graph.add_bond(prev, atom, order);
                }
                previous = Some(atom);
                i += width;
            }
            '-' | '=' | '#' => {
                if previous.is_none() {
                    return Err(SmilesError::DanglingBond { position: i });
                }
                let order = match ch {
                    '-' => BondOrder::Single,
                    '=' => BondOrder::Double,
                    _ => BondOrder::Triple,
                };
                pending_bond = Some((order, i));
                i += 1;
            }
            '(' => {
                if previous.is_none() {
                    return Err(SmilesError::UnbalancedParenthesis { position: i });
                }
                branch_stack.push(previous);
                i += 1;
            }
            ')' => {
                previous = branch_stack
                    .pop()
                    .ok_or(SmilesError::UnbalancedParenthesis { position: i })?;
                i += 1;
            }
            '0'..='9' | '%' => {
                let atom = previous.ok_or(SmilesError::DanglingBond { position: i })?;
                let (label, width) = read_ring_label(&chars, i)?;
                let bond = pending_bond.take().map(|(o, _)| o);
                match open_rings.remove(&label) {
                    Some((opener, opener_bond)) => {
                        let order = match (opener_bond, bond) {
                            (Some(a), Some(b)) if a != b => {
                                return Err(SmilesError::ConflictingRingBond { label });
                            }
                            (Some(a), _) | (None, Some(a)) => a,
                            (None, None) => BondOrder::Single,
                        };
                        if !graph.add_bond(opener, atom, order) {
                            return Err(SmilesError::DuplicateBond { label });
                        }
                    }
                    None => {
                        open_rings.insert(label, (atom, bond));
                    }
                }
                i += width;
            }
            '.' => {
                previous = None;
                pending_bond = None;
                i += 1;
            }
            'b' | 'c' | 'n' | 'o' | 'p' | 's' | '[' | ']' | '+' | '@' | '/' | '\\' | ':' => {
                return Err(SmilesError::Unsupported { ch, position: i });
            }
            _ => return Err(SmilesError::UnexpectedChar { ch, position: i }),
        }
    }

    if !branch_stack.is_empty() {
        return Err(SmilesError::UnbalancedParenthesis {
            position: chars.len(),
        });
    }
    if let Some((_, position)) = pending_bond {
        return Err(SmilesError::DanglingBond { position });
    }
    if let Some(&label) = open_rings.keys().min() {
        return Err(SmilesError::UnclosedRing { label });
    }

    Ok(graph)
}

fn read_ring_label(chars: &[char], i: usize) -> Result<(u32, usize), SmilesError> {
    if chars[i] == '%' {
        let tens = chars.get(i + 1).and_then(|c| c.to_digit(10));
        let ones = chars.get(i + 2).and_then(|c| c.to_digit(10));
        match (tens, ones) {
            (Some(t), Some(o)) => Ok((t * 10 + o, 3)),
            _ => Err(SmilesError::BadRingLabel { position: i }),
        }
    } else {
        chars[i]
            .to_digit(10)
            .map(|d| (d, 1))
            .ok_or(SmilesError::BadRingLabel { position: i })
    }
}
