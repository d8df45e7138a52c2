//! Files written by a run, all derived from `output.out_prefix`.

use anyhow::{Context, Result};
use codelabel_core::metrics::render_report;
use codelabel_core::{Codebook, GroundTruth, MetricsReport, PredictionSet, Row};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::subsystems::predict::PredictionSummary;
use crate::subsystems::score::ExclusionTotals;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub ledger: PathBuf,
    pub metrics: PathBuf,
    pub metrics_csv: PathBuf,
    pub summary: PathBuf,
    pub predictions: PathBuf,
}

impl ArtifactPaths {
    pub fn from_prefix(prefix: &str) -> Self {
        Self {
            ledger: PathBuf::from(format!("{prefix}_ledger.jsonl")),
            metrics: PathBuf::from(format!("{prefix}_per_construct_metrics.json")),
            metrics_csv: PathBuf::from(format!("{prefix}_per_construct_metrics.csv")),
            summary: PathBuf::from(format!("{prefix}_summary.json")),
            predictions: PathBuf::from(format!("{prefix}_preds.csv")),
        }
    }
}

/// Run-level summary written next to the per-construct metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub model: String,
    /// Every run that contributed a prediction, sorted.
    pub run_ids: Vec<Uuid>,
    pub overall_kappa: Option<f64>,
    pub total_pairs: usize,
    pub predicted_pairs: usize,
    pub unresolved_pairs: usize,
    pub exclusions: ExclusionTotals,
    pub degenerate_constructs: Vec<String>,
    pub id_col: String,
    pub text_col: String,
    pub constructs: Vec<String>,
    pub artifacts: ArtifactPaths,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionSummary>,
}

impl RunSummary {
    /// Pairs of the cross product without a resolved label: UNRESOLVED
    /// predictions plus pairs never predicted.
    pub fn incomplete_pairs(&self) -> usize {
        self.unresolved_pairs + self.total_pairs.saturating_sub(self.predicted_pairs)
    }
}

/// Write `contents` next to `path` and rename it into place, so readers
/// never see a half-written file.
async fn write_replace(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

pub async fn write_metrics(path: &Path, report: &MetricsReport) -> Result<()> {
    let rendered = render_report(report)?;
    write_replace(path, rendered.as_bytes()).await?;
    tracing::info!(path = %path.display(), constructs = report.len(), "Wrote per-construct metrics");
    Ok(())
}

fn format_metric(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// The metrics report as a table, one line per construct in name order.
/// Undefined metrics are empty cells.
pub fn render_metrics_csv(report: &MetricsReport) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record([
        "construct",
        "freq",
        "kappa",
        "precision",
        "recall",
        "n_eval",
        "missing_truth",
        "missing_prediction",
        "unresolved",
    ])?;

    for (name, record) in report {
        writer.write_record([
            name.clone(),
            record.freq.to_string(),
            format_metric(record.kappa),
            format_metric(record.precision),
            format_metric(record.recall),
            record.n_eval.to_string(),
            record.missing_truth.to_string(),
            record.missing_prediction.to_string(),
            record.unresolved.to_string(),
        ])?;
    }

    Ok(writer.into_inner()?)
}

pub async fn write_metrics_csv(path: &Path, report: &MetricsReport) -> Result<()> {
    let bytes = render_metrics_csv(report)?;
    write_replace(path, &bytes).await?;
    tracing::info!(path = %path.display(), constructs = report.len(), "Wrote per-construct metrics table");
    Ok(())
}

pub async fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let mut rendered = serde_json::to_string_pretty(summary)?;
    rendered.push('\n');
    write_replace(path, rendered.as_bytes()).await?;
    tracing::info!(path = %path.display(), "Wrote run summary");
    Ok(())
}

/// One line per (row, construct) in the cross product, in input order.
pub fn render_predictions_csv(
    rows: &[Row],
    codebook: &Codebook,
    predictions: &PredictionSet,
    truth: &GroundTruth,
) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["row_id", "construct", "prediction", "human_label"])?;

    for row in rows {
        for construct in codebook.iter() {
            let prediction = predictions
                .get(&row.id, &construct.name)
                .map(|p| p.label.as_str())
                .unwrap_or("");
            let human = truth
                .get(&row.id, &construct.name)
                .map(|v| v.to_string())
                .unwrap_or_default();
            writer.write_record([
                row.id.as_str(),
                construct.name.as_str(),
                prediction,
                human.as_str(),
            ])?;
        }
    }

    Ok(writer.into_inner()?)
}

pub async fn write_predictions_csv(
    path: &Path,
    rows: &[Row],
    codebook: &Codebook,
    predictions: &PredictionSet,
    truth: &GroundTruth,
) -> Result<()> {
    let bytes = render_predictions_csv(rows, codebook, predictions, truth)?;
    write_replace(path, &bytes).await?;
    tracing::info!(path = %path.display(), rows = rows.len(), "Wrote prediction export");
    Ok(())
}
