use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::row::RowId;
use crate::label::Label;

/// How a prediction was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The response mapped to 0 or 1.
    Parsed,
    /// The call succeeded but the text is outside the allow-list.
    Unparseable,
    /// The call failed after retries or hit the pair deadline.
    CallFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    pub row_id: RowId,
    pub construct: String,
}

impl PairKey {
    pub fn new(row_id: RowId, construct: impl Into<String>) -> Self {
        Self {
            row_id,
            construct: construct.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: Label,
    pub outcome: Outcome,
    pub model: String,
    pub run_id: Uuid,
}

/// Accumulated predictions keyed by (row id, construct). Later inserts for
/// the same key replace earlier ones.
#[derive(Debug, Clone, Default)]
pub struct PredictionSet {
    entries: BTreeMap<PairKey, Prediction>,
}

impl PredictionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: PairKey, prediction: Prediction) {
        self.entries.insert(key, prediction);
    }

    pub fn get(&self, row_id: &RowId, construct: &str) -> Option<&Prediction> {
        self.entries.get(&PairKey::new(row_id.clone(), construct))
    }

    /// Whether a pair needs no further call. `CallFailed` pairs are settled
    /// only when failed calls are not retried on resume.
    pub fn is_settled(&self, key: &PairKey, retry_failed: bool) -> bool {
        match self.entries.get(key) {
            Some(p) => !(retry_failed && p.outcome == Outcome::CallFailed),
            None => false,
        }
    }

    /// Labels recorded for one construct, keyed by row.
    pub fn labels_for(&self, construct: &str) -> BTreeMap<&RowId, Label> {
        self.entries
            .iter()
            .filter(|(k, _)| k.construct == construct)
            .map(|(k, p)| (&k.row_id, p.label))
            .collect()
    }

    /// A copy holding only the pairs `keep` accepts.
    pub fn filtered(&self, mut keep: impl FnMut(&PairKey) -> bool) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| keep(k))
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PairKey, &Prediction)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_outcome(&self, outcome: Outcome) -> usize {
        self.entries
            .values()
            .filter(|p| p.outcome == outcome)
            .count()
    }

    /// Distinct run ids that contributed predictions, sorted.
    pub fn run_ids(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.entries.values().map(|p| p.run_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
