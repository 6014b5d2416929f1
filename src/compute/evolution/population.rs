//! Population store: the single owner of every individual in a run.

use std::collections::HashMap;

use crate::schema::{IndividualId, IndividualSnapshot, Lineage, OperatorKind, ScoreFailure, ScoreState};

use super::orchestrator::EvolutionError;

/// One candidate molecule plus its run metadata.
#[derive(Debug, Clone)]
pub struct Individual<M> {
    id: IndividualId,
    molecule: M,
    text: String,
    lineage: Lineage,
    score: ScoreState,
    generation: usize,
    parents: Vec<IndividualId>,
    operator: Option<OperatorKind>,
    alive: bool,
}

impl<M> Individual<M> {
    pub fn id(&self) -> IndividualId {
        self.id
    }

    pub fn molecule(&self) -> &M {
        &self.molecule
    }

    /// Canonical text, computed once when the individual was created.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lineage(&self) -> Lineage {
        self.lineage
    }

    pub fn score(&self) -> &ScoreState {
        &self.score
    }

    pub fn fitness(&self) -> Option<f64> {
        self.score.fitness()
    }

    /// Generation in which the individual was created.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn parents(&self) -> &[IndividualId] {
        &self.parents
    }

    pub fn operator(&self) -> Option<OperatorKind> {
        self.operator
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Convert to snapshot for serialization.
    pub fn to_snapshot(&self) -> IndividualSnapshot {
        IndividualSnapshot {
            id: self.id,
            text: self.text.clone(),
            lineage: self.lineage,
            score: self.score.clone(),
            generation: self.generation,
            parents: self.parents.clone(),
            operator: self.operator,
        }
    }
}

/// Provenance of an individual being inserted.
#[derive(Debug, Clone)]
pub struct Origin {
    pub lineage: Lineage,
    pub generation: usize,
    pub parents: Vec<IndividualId>,
    pub operator: Option<OperatorKind>,
}

impl Origin {
    /// A caller-supplied seed of generation zero.
    pub fn seed() -> Self {
        Self {
            lineage: Lineage::Seed,
            generation: 0,
            parents: Vec::new(),
            operator: None,
        }
    }

    /// A child produced by `operator` from `parents`.
    pub fn child(generation: usize, parents: Vec<IndividualId>, operator: OperatorKind) -> Self {
        Self {
            lineage: Lineage::Child,
            generation,
            parents,
            operator: Some(operator),
        }
    }
}

/// Ordered collection of individuals with an index of their canonical texts.
///
/// Individuals are only ever appended, scored once, or culled. Culled
/// individuals are swept out by [`PopulationStore::retain_ranked`], which also
/// reorders the survivors.
#[derive(Debug, Clone)]
pub struct PopulationStore<M> {
    individuals: Vec<Individual<M>>,
    texts: HashMap<String, usize>,
    next_id: u64,
}

impl<M> Default for PopulationStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> PopulationStore<M> {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            individuals: Vec::new(),
            texts: HashMap::new(),
            next_id: 0,
        }
    }

    /// Number of live individuals.
    pub fn len(&self) -> usize {
        self.individuals.iter().filter(|i| i.alive).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifier the next inserted individual will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Live individuals in store order.
    pub fn iter(&self) -> impl Iterator<Item = &Individual<M>> {
        self.individuals.iter().filter(|i| i.alive)
    }

    /// Individual at a store position.
    pub fn at(&self, index: usize) -> Option<&Individual<M>> {
        self.individuals.get(index)
    }

    /// Store positions of live individuals.
    pub fn live_indices(&self) -> Vec<usize> {
        (0..self.individuals.len())
            .filter(|&i| self.individuals[i].alive)
            .collect()
    }

    pub fn get(&self, id: IndividualId) -> Option<&Individual<M>> {
        self.position(id).map(|i| &self.individuals[i])
    }

    fn position(&self, id: IndividualId) -> Option<usize> {
        // Ids are allocated in increasing order but survivors are reordered
        // by rank, so a linear scan is needed.
        self.individuals.iter().position(|i| i.id == id)
    }

    /// Whether a live individual has this canonical text.
    pub fn contains_text(&self, text: &str) -> bool {
        self.texts.get(text).is_some_and(|&count| count > 0)
    }

    /// Append a pending individual and return its new identifier.
    pub fn insert(&mut self, molecule: M, text: String, origin: Origin) -> IndividualId {
        let id = IndividualId(self.next_id);
        self.next_id += 1;
        self.push(id, molecule, text, origin, ScoreState::Pending);
        id
    }

    /// Re-insert an individual from a snapshot, keeping its identifier and
    /// score. Later insertions never reuse the identifier.
    pub fn restore(&mut self, snapshot: &IndividualSnapshot, molecule: M) {
        let origin = Origin {
            lineage: snapshot.lineage,
            generation: snapshot.generation,
            parents: snapshot.parents.clone(),
            operator: snapshot.operator,
        };
        self.next_id = self.next_id.max(snapshot.id.0 + 1);
        self.push(
            snapshot.id,
            molecule,
            snapshot.text.clone(),
            origin,
            snapshot.score.clone(),
        );
    }

    /// Make sure no identifier below `next_id` is ever allocated.
    pub fn reserve_ids(&mut self, next_id: u64) {
        self.next_id = self.next_id.max(next_id);
    }

    fn push(&mut self, id: IndividualId, molecule: M, text: String, origin: Origin, score: ScoreState) {
        *self.texts.entry(text.clone()).or_insert(0) += 1;
        self.individuals.push(Individual {
            id,
            molecule,
            text,
            lineage: origin.lineage,
            score,
            generation: origin.generation,
            parents: origin.parents,
            operator: origin.operator,
            alive: true,
        });
    }

    /// Live individuals still waiting for a score, as owned `(id, text)` pairs.
    pub fn pending(&self) -> Vec<(IndividualId, String)> {
        self.iter()
            .filter(|i| i.score.is_pending())
            .map(|i| (i.id, i.text.clone()))
            .collect()
    }

    /// Record the scoring outcome of a pending individual.
    ///
    /// A score is written exactly once; recording a second outcome is an
    /// error. Non-finite values are stored as failures.
    pub fn record_score(
        &mut self,
        id: IndividualId,
        outcome: Result<f64, ScoreFailure>,
    ) -> Result<(), EvolutionError> {
        let index = self
            .position(id)
            .ok_or(EvolutionError::UnknownIndividual(id))?;
        let individual = &mut self.individuals[index];
        if !individual.score.is_pending() {
            return Err(EvolutionError::ScoreAlreadyRecorded(id));
        }
        individual.score = match outcome {
            Ok(fitness) if fitness.is_finite() => ScoreState::Scored { fitness },
            Ok(_) => ScoreState::Failed {
                failure: ScoreFailure::NotFinite,
            },
            Err(failure) => ScoreState::Failed { failure },
        };
        Ok(())
    }

    /// Keep exactly the listed individuals, in the listed order. Everything
    /// else is culled and removed. Returns the number of culled individuals.
    pub fn retain_ranked(&mut self, ranked: &[IndividualId]) -> usize {
        let rank: HashMap<IndividualId, usize> =
            ranked.iter().enumerate().map(|(r, &id)| (id, r)).collect();
        for individual in &mut self.individuals {
            if !rank.contains_key(&individual.id) {
                individual.alive = false;
            }
        }

        let before = self.individuals.len();
        self.individuals.retain(|i| i.alive);
        self.individuals
            .sort_by_key(|i| rank.get(&i.id).copied().unwrap_or(usize::MAX));

        self.texts.clear();
        for individual in &self.individuals {
            *self.texts.entry(individual.text.clone()).or_insert(0) += 1;
        }
        before - self.individuals.len()
    }

    /// Snapshots of the live individuals in store order.
    pub fn snapshots(&self) -> Vec<IndividualSnapshot> {
        self.iter().map(Individual::to_snapshot).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(texts: &[&str]) -> PopulationStore<String> {
        let mut store = PopulationStore::new();
        for text in texts {
            store.insert(text.to_string(), text.to_string(), Origin::seed());
        }
        store
    }

    #[test]
    fn test_ids_are_sequential_and_unique() {
        let store = store_with(&["C", "CC", "CCC"]);
        let ids: Vec<u64> = store.iter().map(|i| i.id().0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(store.next_id(), 3);
    }

    #[test]
    fn test_score_is_write_once() {
        let mut store = store_with(&["C"]);
        let id = IndividualId(0);
        store.record_score(id, Ok(1.5)).unwrap();
        assert_eq!(store.get(id).unwrap().fitness(), Some(1.5));

        let err = store.record_score(id, Ok(2.0)).unwrap_err();
        assert!(matches!(err, EvolutionError::ScoreAlreadyRecorded(i) if i == id));
        assert_eq!(store.get(id).unwrap().fitness(), Some(1.5));
    }

    #[test]
    fn test_unknown_individual() {
        let mut store = store_with(&["C"]);
        assert!(matches!(
            store.record_score(IndividualId(9), Ok(1.0)),
            Err(EvolutionError::UnknownIndividual(IndividualId(9)))
        ));
    }

    #[test]
    fn test_nan_recorded_as_failure() {
        let mut store = store_with(&["C"]);
        store.record_score(IndividualId(0), Ok(f64::NAN)).unwrap();
        assert_eq!(
            store.get(IndividualId(0)).unwrap().score(),
            &ScoreState::Failed {
                failure: ScoreFailure::NotFinite
            }
        );
    }

    #[test]
    fn test_pending_lists_only_unscored() {
        let mut store = store_with(&["C", "CC"]);
        store.record_score(IndividualId(0), Ok(1.0)).unwrap();
        assert_eq!(store.pending(), vec![(IndividualId(1), "CC".to_string())]);
    }

    #[test]
    fn test_retain_ranked_culls_and_reorders() {
        let mut store = store_with(&["C", "CC", "CCC"]);
        let culled = store.retain_ranked(&[IndividualId(2), IndividualId(0)]);
        assert_eq!(culled, 1);
        let ids: Vec<IndividualId> = store.iter().map(|i| i.id()).collect();
        assert_eq!(ids, vec![IndividualId(2), IndividualId(0)]);
        assert!(!store.contains_text("CC"));
        assert!(store.contains_text("CCC"));
    }

    #[test]
    fn test_duplicate_texts_counted() {
        let mut store = store_with(&["C", "C"]);
        store.retain_ranked(&[IndividualId(1)]);
        assert!(store.contains_text("C"));
        store.retain_ranked(&[]);
        assert!(!store.contains_text("C"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_restore_keeps_ids_unique() {
        let source = store_with(&["C", "CC"]);
        let mut restored = PopulationStore::new();
        for snapshot in source.snapshots().iter().rev() {
            restored.restore(snapshot, snapshot.text.clone());
        }
        let id = restored.insert("N".to_string(), "N".to_string(), Origin::seed());
        assert_eq!(id, IndividualId(2));
    }
}
