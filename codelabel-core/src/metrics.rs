//! Agreement metrics between model predictions and human labels.
//!
//! Per construct, over rows with both a resolved prediction and a human label:
//!
//!   freq      = #(human == 1)
//!   kappa     = (p_o − p_e) / (1 − p_e)
//!   precision = TP / (TP + FP)
//!   recall    = TP / (TP + FN)
//!
//! where p_o is the observed agreement and p_e the chance agreement from the
//! two raters' marginals. Zero denominators yield `None` and a
//! [`DegenerateMetric`] flag instead of an error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::codebook::Codebook;
use crate::dataset::GroundTruth;
use crate::error::CodelabelError;
use crate::label::Label;
use crate::models::PredictionSet;

/// 2×2 contingency counts (prediction vs. truth, positive class = 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Confusion {
    pub tp: u64,
    pub fp: u64,
    pub fn_: u64,
    pub tn: u64,
}

impl Confusion {
    pub fn record(&mut self, predicted: u8, truth: u8) {
        match (predicted, truth) {
            (1, 1) => self.tp += 1,
            (1, _) => self.fp += 1,
            (_, 1) => self.fn_ += 1,
            _ => self.tn += 1,
        }
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (u8, u8)>) -> Self {
        let mut c = Self::default();
        for (p, t) in pairs {
            c.record(p, t);
        }
        c
    }

    pub fn merge(&mut self, other: &Confusion) {
        self.tp += other.tp;
        self.fp += other.fp;
        self.fn_ += other.fn_;
        self.tn += other.tn;
    }

    pub fn n(&self) -> u64 {
        self.tp + self.fp + self.fn_ + self.tn
    }

    /// Rows where the human label is 1.
    pub fn truth_positives(&self) -> u64 {
        self.tp + self.fn_
    }

    pub fn kappa(&self) -> Option<f64> {
        let n = self.n();
        if n == 0 {
            return None;
        }
        let n = n as f64;
        let p_o = (self.tp + self.tn) as f64 / n;
        let pred_pos = (self.tp + self.fp) as f64 / n;
        let truth_pos = (self.tp + self.fn_) as f64 / n;
        let p_e = pred_pos * truth_pos + (1.0 - pred_pos) * (1.0 - truth_pos);
        if (1.0 - p_e).abs() < f64::EPSILON {
            return None;
        }
        Some((p_o - p_e) / (1.0 - p_e))
    }

    pub fn precision(&self) -> Option<f64> {
        ratio(self.tp, self.tp + self.fp)
    }

    pub fn recall(&self) -> Option<f64> {
        ratio(self.tp, self.tp + self.fn_)
    }
}

fn ratio(num: u64, den: u64) -> Option<f64> {
    if den == 0 {
        None
    } else {
        Some(num as f64 / den as f64)
    }
}

/// Cohen's kappa for two equally long binary vectors.
pub fn cohen_kappa(a: &[u8], b: &[u8]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    Confusion::from_pairs(a.iter().copied().zip(b.iter().copied())).kappa()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegenerateMetric {
    Kappa,
    Precision,
    Recall,
}

/// Metrics for one construct. `freq`, `kappa`, `precision` and `recall` are
/// the published columns; the rest records what was excluded and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub freq: u64,
    pub kappa: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    /// Rows in the joined set.
    pub n_eval: u64,
    /// Predictions with no human label.
    pub missing_truth: u64,
    /// Human labels with no prediction.
    pub missing_prediction: u64,
    /// Human labels whose prediction is UNRESOLVED.
    pub unresolved: u64,
    #[serde(default)]
    pub degenerate: Vec<DegenerateMetric>,
}

impl MetricsRecord {
    pub fn excluded(&self) -> u64 {
        self.missing_truth + self.missing_prediction + self.unresolved
    }
}

/// Metrics for every construct, keyed (and therefore serialized) by name.
pub type MetricsReport = BTreeMap<String, MetricsRecord>;

/// Outcome of joining one construct's predictions with its human labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinedConstruct {
    pub confusion: Confusion,
    pub missing_truth: u64,
    pub missing_prediction: u64,
    pub unresolved: u64,
}

pub fn join_construct(
    construct: &str,
    predictions: &PredictionSet,
    truth: &GroundTruth,
) -> JoinedConstruct {
    let predicted = predictions.labels_for(construct);
    let empty = BTreeMap::new();
    let coded = truth.for_construct(construct).unwrap_or(&empty);

    let mut joined = JoinedConstruct::default();

    for (row_id, label) in &predicted {
        match (label.as_binary(), coded.get(*row_id)) {
            (Some(p), Some(t)) => joined.confusion.record(p, *t),
            (None, Some(_)) => joined.unresolved += 1,
            (_, None) => joined.missing_truth += 1,
        }
    }

    joined.missing_prediction = coded
        .keys()
        .filter(|row_id| !predicted.contains_key(row_id))
        .count() as u64;

    joined
}

pub fn score_confusion(joined: &JoinedConstruct) -> MetricsRecord {
    let c = &joined.confusion;
    let kappa = c.kappa();
    let precision = c.precision();
    let recall = c.recall();

    let mut degenerate = Vec::new();
    if kappa.is_none() {
        degenerate.push(DegenerateMetric::Kappa);
    }
    if precision.is_none() {
        degenerate.push(DegenerateMetric::Precision);
    }
    if recall.is_none() {
        degenerate.push(DegenerateMetric::Recall);
    }

    MetricsRecord {
        freq: c.truth_positives(),
        kappa,
        precision,
        recall,
        n_eval: c.n(),
        missing_truth: joined.missing_truth,
        missing_prediction: joined.missing_prediction,
        unresolved: joined.unresolved,
        degenerate,
    }
}

/// Score every construct in the codebook.
pub fn score_all(
    codebook: &Codebook,
    predictions: &PredictionSet,
    truth: &GroundTruth,
) -> MetricsReport {
    codebook
        .iter()
        .map(|c| {
            let joined = join_construct(&c.name, predictions, truth);
            (c.name.clone(), score_confusion(&joined))
        })
        .collect()
}

/// Stable JSON rendering of a report: pretty, keys sorted, trailing newline.
pub fn render_report(report: &MetricsReport) -> Result<String, CodelabelError> {
    let mut out = serde_json::to_string_pretty(report)?;
    out.push('\n');
    Ok(out)
}

/// Resolved-label counts used in logs.
pub fn label_counts<'a>(labels: impl IntoIterator<Item = &'a Label>) -> (u64, u64, u64) {
    labels
        .into_iter()
        .fold((0, 0, 0), |(pos, neg, unres), l| match l {
            Label::Present => (pos + 1, neg, unres),
            Label::Absent => (pos, neg + 1, unres),
            Label::Unresolved => (pos, neg, unres + 1),
        })
}

// ============================================================================
// TESTS
// ============================================================================
