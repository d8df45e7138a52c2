//! Scoring subsystem — joins predictions with human labels and computes
//! per-construct agreement.
//!
//! Scoring is a pure function of the prediction set, the ground truth and the
//! codebook; it never touches the model.

use codelabel_core::metrics::{join_construct, label_counts, score_all, Confusion};
use codelabel_core::{Codebook, GroundTruth, MetricsReport, PredictionSet};
use serde::{Deserialize, Serialize};

/// Pairs left out of the metrics, summed across constructs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionTotals {
    pub evaluated: u64,
    pub missing_truth: u64,
    pub missing_prediction: u64,
    pub unresolved: u64,
}

pub struct ScoreOutcome {
    pub report: MetricsReport,
    pub overall_kappa: Option<f64>,
    pub totals: ExclusionTotals,
    /// Constructs with at least one undefined metric.
    pub degenerate_constructs: Vec<String>,
}

/// Kappa over every joined (row, construct) pair pooled across constructs.
pub fn pooled_kappa(
    codebook: &Codebook,
    predictions: &PredictionSet,
    truth: &GroundTruth,
) -> Option<f64> {
    let mut pooled = Confusion::default();
    for construct in codebook.iter() {
        pooled.merge(&join_construct(&construct.name, predictions, truth).confusion);
    }
    pooled.kappa()
}

pub fn score_predictions(
    codebook: &Codebook,
    predictions: &PredictionSet,
    truth: &GroundTruth,
) -> ScoreOutcome {
    let report = score_all(codebook, predictions, truth);
    let overall_kappa = pooled_kappa(codebook, predictions, truth);

    let mut totals = ExclusionTotals::default();
    let mut degenerate_constructs = Vec::new();

    for (name, record) in &report {
        totals.evaluated += record.n_eval;
        totals.missing_truth += record.missing_truth;
        totals.missing_prediction += record.missing_prediction;
        totals.unresolved += record.unresolved;

        let labels = predictions.labels_for(name);
        let (present, absent, unresolved) = label_counts(labels.values());

        tracing::info!(
            construct = %name,
            freq = record.freq,
            n_eval = record.n_eval,
            kappa = ?record.kappa,
            precision = ?record.precision,
            recall = ?record.recall,
            predicted_present = present,
            predicted_absent = absent,
            predicted_unresolved = unresolved,
            "Construct scored"
        );

        if record.excluded() > 0 {
            tracing::warn!(
                construct = %name,
                missing_truth = record.missing_truth,
                missing_prediction = record.missing_prediction,
                unresolved = record.unresolved,
                "Pairs excluded from metrics"
            );
        }

        if !record.degenerate.is_empty() {
            tracing::warn!(
                construct = %name,
                degenerate = ?record.degenerate,
                "Undefined metrics for construct"
            );
            degenerate_constructs.push(name.clone());
        }
    }

    tracing::info!(
        constructs = report.len(),
        evaluated = totals.evaluated,
        overall_kappa = ?overall_kappa,
        "Scoring complete"
    );

    ScoreOutcome {
        report,
        overall_kappa,
        totals,
        degenerate_constructs,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use codelabel_core::{Construct, Label, Outcome, PairKey, Prediction, RowId};
    use uuid::Uuid;

    fn id(s: &str) -> RowId {
        RowId::normalize(s).unwrap()
    }

    fn predict(set: &mut PredictionSet, row: &str, construct: &str, label: Label) {
        let outcome = if label.is_resolved() {
            Outcome::Parsed
        } else {
            Outcome::Unparseable
        };
        set.insert(
            PairKey::new(id(row), construct),
            Prediction {
                label,
                outcome,
                model: "gpt-4o".to_string(),
                run_id: Uuid::nil(),
            },
        );
    }

    fn codebook() -> Codebook {
        Codebook::new(vec![
            Construct::new("Operator", "Modification of an operator."),
            Construct::new("Testing", "Test code changed."),
        ])
        .unwrap()
    }

    #[test]
    fn test_totals_sum_constructs() {
        let mut truth = GroundTruth::default();
        let mut preds = PredictionSet::new();

        for (row, p, g) in [("1", Label::Present, 1), ("2", Label::Absent, 0)] {
            truth.insert("Operator", id(row), g);
            predict(&mut preds, row, "Operator", p);
        }
        // Unresolved with truth, prediction without truth, truth without prediction.
        truth.insert("Testing", id("1"), 1);
        predict(&mut preds, "1", "Testing", Label::Unresolved);
        predict(&mut preds, "2", "Testing", Label::Absent);
        truth.insert("Testing", id("3"), 0);

        let outcome = score_predictions(&codebook(), &preds, &truth);

        assert_eq!(
            outcome.totals,
            ExclusionTotals {
                evaluated: 2,
                missing_truth: 1,
                missing_prediction: 1,
                unresolved: 1,
            }
        );
        assert_eq!(outcome.report["Operator"].kappa, Some(1.0));
        assert_eq!(outcome.degenerate_constructs, vec!["Testing".to_string()]);
        assert_eq!(outcome.overall_kappa, Some(1.0));
    }

    #[test]
    fn test_pooled_kappa_merges_constructs() {
        let mut truth = GroundTruth::default();
        let mut preds = PredictionSet::new();
        // Each construct alone is single-class on the human side; pooled they agree fully.
        truth.insert("Operator", id("1"), 1);
        predict(&mut preds, "1", "Operator", Label::Present);
        truth.insert("Testing", id("1"), 0);
        predict(&mut preds, "1", "Testing", Label::Absent);

        assert_eq!(pooled_kappa(&codebook(), &preds, &truth), Some(1.0));
        let outcome = score_predictions(&codebook(), &preds, &truth);
        assert!(outcome.report["Operator"].kappa.is_none());
        assert_eq!(outcome.overall_kappa, Some(1.0));
    }

    #[test]
    fn test_every_construct_is_reported_even_without_data() {
        let outcome = score_predictions(&codebook(), &PredictionSet::new(), &GroundTruth::default());
        assert_eq!(outcome.report.len(), 2);
        assert!(outcome.overall_kappa.is_none());
        assert_eq!(outcome.degenerate_constructs.len(), 2);
    }
}
