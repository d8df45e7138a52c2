//! Run orchestration: setup, prediction pass, scoring pass.
//!
//! Every setup failure (config, codebook, datasets, ledger) surfaces here
//! before the first model call is issued.

use anyhow::{Context, Result};
use codelabel_core::dataset::{load_ground_truth, load_rows, read_table};
use codelabel_core::config::expand_path;
use codelabel_core::{
    ClassifierBackend, Codebook, CodelabelConfig, GroundTruth, PredictionLedger, PredictionSet,
    Row,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifacts::{self, ArtifactPaths, RunSummary};
use crate::subsystems::predict::{self, PredictOutcome, PredictionSummary};
use crate::subsystems::score;

/// Exit code when pairs remain without a resolved label and the run is not
/// best-effort.
pub const EXIT_UNRESOLVED: i32 = 2;
/// Exit code after a cancelled run has persisted its work.
pub const EXIT_CANCELLED: i32 = 130;

/// Everything a run needs that does not involve the model.
pub struct RunInputs {
    pub config: CodelabelConfig,
    pub codebook: Codebook,
    pub rows: Vec<Row>,
    pub paths: ArtifactPaths,
}

impl RunInputs {
    pub fn total_pairs(&self) -> usize {
        self.rows.len() * self.codebook.len()
    }
}

/// Validate config, build the codebook and load the raw rows.
pub fn prepare(config: CodelabelConfig) -> Result<RunInputs> {
    config.validate()?;
    let codebook = Codebook::from_config(config.constructs.as_deref())?;

    let (raw_path, raw_sheet) = config.dataset.raw_source();
    let table = read_table(&raw_path, raw_sheet)
        .with_context(|| format!("reading raw dataset {}", raw_path.display()))?;
    let mut rows = load_rows(&table, &config.dataset.id_col, &config.dataset.text_col)?;

    if let Some(limit) = config.run.limit {
        if limit < rows.len() {
            tracing::info!(limit, available = rows.len(), "Limiting rows");
            rows.truncate(limit);
        }
    }

    let paths = ArtifactPaths::from_prefix(&expand_path(&config.output.out_prefix));

    tracing::info!(
        raw = %raw_path.display(),
        rows = rows.len(),
        constructs = codebook.len(),
        "Run inputs loaded"
    );

    Ok(RunInputs {
        config,
        codebook,
        rows,
        paths,
    })
}

/// Load the coded dataset against the run's codebook.
pub fn load_truth(inputs: &RunInputs) -> Result<GroundTruth> {
    let dataset = &inputs.config.dataset;
    let (coded_path, coded_sheet) = dataset.coded_source();
    let table = read_table(&coded_path, coded_sheet)
        .with_context(|| format!("reading coded dataset {}", coded_path.display()))?;
    let truth = load_ground_truth(&table, &dataset.id_col, &inputs.codebook)?;

    tracing::info!(
        coded = %coded_path.display(),
        labels = truth.len(),
        constructs = truth.constructs().count(),
        "Ground truth loaded"
    );
    Ok(truth)
}

/// Open the ledger, resume from it and label every unsettled pair.
pub async fn predict(
    inputs: &RunInputs,
    backend: Arc<dyn ClassifierBackend>,
    cancel: CancellationToken,
) -> Result<PredictOutcome> {
    let ledger = PredictionLedger::open(&inputs.paths.ledger)
        .await
        .with_context(|| format!("opening ledger {}", inputs.paths.ledger.display()))?;
    let existing = PredictionLedger::load(&inputs.paths.ledger).await?;

    if !existing.is_empty() {
        let other_models = existing
            .iter()
            .filter(|(_, p)| p.model != backend.model())
            .count();
        if other_models > 0 {
            tracing::warn!(
                configured = backend.model(),
                predictions = other_models,
                "Ledger holds predictions from a different model; they are kept"
            );
        }
        tracing::info!(
            ledger = %inputs.paths.ledger.display(),
            existing = existing.len(),
            "Resuming from ledger"
        );
    }

    let run_id = Uuid::new_v4();
    predict::run_prediction_loop(
        &inputs.rows,
        &inputs.codebook,
        backend,
        Arc::new(ledger),
        existing,
        &inputs.config.run,
        run_id,
        cancel,
    )
    .await
}

/// Score predictions and write the metrics, summary and prediction export.
/// When `predictions` is `None` they are read back from the ledger. Only
/// pairs of this run's rows and codebook are scored.
pub async fn score(
    inputs: &RunInputs,
    truth: &GroundTruth,
    predictions: Option<PredictionSet>,
    prediction_summary: Option<PredictionSummary>,
) -> Result<RunSummary> {
    let predictions = match predictions {
        Some(p) => p,
        None => PredictionLedger::load(&inputs.paths.ledger)
            .await
            .with_context(|| format!("reading ledger {}", inputs.paths.ledger.display()))?,
    };

    let predictions = in_scope(inputs, &predictions);
    let outcome = score::score_predictions(&inputs.codebook, &predictions, truth);

    let (predicted_pairs, unresolved_pairs) = inputs
        .rows
        .iter()
        .flat_map(|row| inputs.codebook.iter().map(move |c| (row, c)))
        .filter_map(|(row, c)| predictions.get(&row.id, &c.name))
        .fold((0, 0), |(n, unresolved), p| {
            (n + 1, unresolved + usize::from(!p.label.is_resolved()))
        });

    let summary = RunSummary {
        model: inputs.config.model.name.clone(),
        run_ids: predictions.run_ids(),
        overall_kappa: outcome.overall_kappa,
        total_pairs: inputs.total_pairs(),
        predicted_pairs,
        unresolved_pairs,
        exclusions: outcome.totals,
        degenerate_constructs: outcome.degenerate_constructs,
        id_col: inputs.config.dataset.id_col.clone(),
        text_col: inputs.config.dataset.text_col.clone(),
        constructs: inputs.codebook.iter().map(|c| c.name.clone()).collect(),
        artifacts: inputs.paths.clone(),
        prediction: prediction_summary,
    };

    artifacts::write_metrics(&inputs.paths.metrics, &outcome.report).await?;
    artifacts::write_metrics_csv(&inputs.paths.metrics_csv, &outcome.report).await?;
    artifacts::write_predictions_csv(
        &inputs.paths.predictions,
        &inputs.rows,
        &inputs.codebook,
        &predictions,
        truth,
    )
    .await?;
    artifacts::write_summary(&inputs.paths.summary, &summary).await?;

    Ok(summary)
}

/// Predictions for this run's (row, construct) cross product. Ledger entries
/// for rows outside the limit or constructs no longer configured are dropped.
fn in_scope(inputs: &RunInputs, predictions: &PredictionSet) -> PredictionSet {
    let rows: HashSet<_> = inputs.rows.iter().map(|r| &r.id).collect();
    let scoped = predictions
        .filtered(|k| rows.contains(&k.row_id) && inputs.codebook.get(&k.construct).is_some());

    let dropped = predictions.len() - scoped.len();
    if dropped > 0 {
        tracing::info!(dropped, kept = scoped.len(), "Ignoring ledger entries outside this run");
    }
    scoped
}

/// Map the end state of a run to the process exit code. `incomplete` counts
/// pairs without a resolved label, never-predicted ones included.
pub fn exit_code(cancelled: bool, incomplete: usize, fail_on_unresolved: bool) -> i32 {
    if cancelled {
        EXIT_CANCELLED
    } else if incomplete > 0 && fail_on_unresolved {
        EXIT_UNRESOLVED
    } else {
        0
    }
}
