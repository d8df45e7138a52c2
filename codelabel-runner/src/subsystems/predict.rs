//! Prediction subsystem — labels every (row, construct) pair with the model
//!
//! This subsystem is responsible for:
//! - Walking the full row × construct cross product in input order
//! - Skipping pairs already settled in the ledger (resume)
//! - Issuing calls through a bounded worker pool behind a shared throttle
//! - Persisting every finished pair to the ledger before releasing its slot
//!
//! Per-pair failures never abort the batch: they are recorded as UNRESOLVED.
//! A failed ledger write does: dispatch stops at once and the pass errors.

use anyhow::Result;
use chrono::Utc;
use codelabel_core::{
    build_prompt, parse_label, ClassifierBackend, Codebook, CodelabelError, Construct, Label,
    LedgerEntry, Outcome, PairKey, PredictionSet, PredictionSink, Row,
};
use codelabel_core::config::RunConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::throttle::Throttle;

/// Counts reported at the end of a prediction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub total_pairs: usize,
    pub skipped_existing: usize,
    pub issued: usize,
    pub parsed: usize,
    pub unparseable: usize,
    pub call_failed: usize,
    /// Pairs in the cross product without a resolved label after this pass:
    /// UNRESOLVED ones, carried over or new, plus pairs never predicted.
    pub unresolved: usize,
    /// Unsettled pairs never attempted because the run was cancelled.
    pub not_started: usize,
    pub cancelled: bool,
}

pub struct PredictOutcome {
    pub predictions: PredictionSet,
    pub summary: PredictionSummary,
}

/// Shared, per-run state handed to every worker.
struct WorkerContext {
    backend: Arc<dyn ClassifierBackend>,
    ledger: Arc<dyn PredictionSink>,
    throttle: Throttle,
    pair_timeout: Duration,
    run_id: Uuid,
}

/// Run one prediction pass.
///
/// `existing` is the prediction set read back from the ledger; settled pairs
/// in it are not re-issued. Cancelling `cancel` stops new pairs from starting;
/// in-flight pairs finish and are persisted.
#[allow(clippy::too_many_arguments)]
pub async fn run_prediction_loop(
    rows: &[Row],
    codebook: &Codebook,
    backend: Arc<dyn ClassifierBackend>,
    ledger: Arc<dyn PredictionSink>,
    existing: PredictionSet,
    config: &RunConfig,
    run_id: Uuid,
    cancel: CancellationToken,
) -> Result<PredictOutcome> {
    let total_pairs = rows.len() * codebook.len();
    let mut summary = PredictionSummary {
        total_pairs,
        ..Default::default()
    };

    let ctx = Arc::new(WorkerContext {
        backend,
        ledger,
        throttle: Throttle::per_minute(config.rate_limit_rpm),
        pair_timeout: Duration::from_secs(config.pair_timeout_secs),
        run_id,
    });

    let mut predictions = existing;
    let sem = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let mut join_set = JoinSet::new();

    tracing::info!(
        run_id = %run_id,
        rows = rows.len(),
        constructs = codebook.len(),
        total_pairs,
        concurrency = config.concurrency,
        rate_limit_rpm = config.rate_limit_rpm,
        model = ctx.backend.model(),
        "Prediction pass started"
    );

    let pending: Vec<(&Row, &Construct)> = rows
        .iter()
        .flat_map(|row| codebook.iter().map(move |c| (row, c)))
        .filter(|(row, c)| {
            let key = PairKey::new(row.id.clone(), c.name.clone());
            !predictions.is_settled(&key, config.retry_failed_on_resume)
        })
        .collect();
    summary.skipped_existing = total_pairs - pending.len();

    // Finished workers are reaped while dispatching, so a ledger failure
    // stops the pass before the next pair is issued.
    let mut persist_error = None;
    let mut dispatched = 0usize;
    'pairs: for (row, construct) in pending.iter().copied() {
        let permit = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'pairs,
                Some(res) = join_set.join_next(), if !join_set.is_empty() => {
                    record_result(res, &mut summary, &mut predictions, &mut persist_error, &cancel);
                }
                permit = sem.clone().acquire_owned() => break permit?,
            }
        };

        let ctx = ctx.clone();
        let row = row.clone();
        let construct = construct.clone();
        join_set.spawn(async move {
            let _permit = permit;
            label_pair(&ctx, &row, &construct).await
        });
        dispatched += 1;
    }

    summary.cancelled = cancel.is_cancelled();
    summary.not_started = pending.len() - dispatched;
    if summary.cancelled {
        tracing::warn!(
            dispatched,
            not_started = summary.not_started,
            "Prediction pass cancelled, waiting for in-flight pairs"
        );
    }

    while let Some(res) = join_set.join_next().await {
        record_result(res, &mut summary, &mut predictions, &mut persist_error, &cancel);
    }

    if let Some(e) = persist_error {
        return Err(anyhow::Error::new(e).context("prediction ledger write failed"));
    }

    summary.unresolved = rows
        .iter()
        .flat_map(|row| codebook.iter().map(move |c| (row, c)))
        .filter(|(row, c)| {
            predictions
                .get(&row.id, &c.name)
                .map_or(true, |p| p.label == Label::Unresolved)
        })
        .count();

    tracing::info!(
        issued = summary.issued,
        skipped_existing = summary.skipped_existing,
        parsed = summary.parsed,
        unparseable = summary.unparseable,
        call_failed = summary.call_failed,
        unresolved = summary.unresolved,
        not_started = summary.not_started,
        "Prediction pass complete"
    );

    Ok(PredictOutcome {
        predictions,
        summary,
    })
}

/// Fold one finished worker into the running tally. A ledger failure
/// cancels the pass.
fn record_result(
    res: std::result::Result<std::result::Result<LedgerEntry, CodelabelError>, JoinError>,
    summary: &mut PredictionSummary,
    predictions: &mut PredictionSet,
    persist_error: &mut Option<CodelabelError>,
    cancel: &CancellationToken,
) {
    let entry = match res {
        Ok(Ok(entry)) => entry,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to persist prediction, stopping dispatch");
            persist_error.get_or_insert(e);
            cancel.cancel();
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "Prediction worker panicked");
            return;
        }
    };

    summary.issued += 1;
    match entry.outcome {
        Outcome::Parsed => summary.parsed += 1,
        Outcome::Unparseable => summary.unparseable += 1,
        Outcome::CallFailed => summary.call_failed += 1,
    }
    predictions.insert(entry.key(), entry.prediction());

    if summary.issued % 100 == 0 {
        tracing::info!(
            done = summary.issued,
            total_pairs = summary.total_pairs,
            "Prediction progress"
        );
    }
}

/// Label one pair and persist the result.
async fn label_pair(
    ctx: &WorkerContext,
    row: &Row,
    construct: &Construct,
) -> Result<LedgerEntry, CodelabelError> {
    ctx.throttle.acquire().await;

    let prompt = build_prompt(construct, row);
    let result = timeout(ctx.pair_timeout, ctx.backend.classify(&prompt)).await;

    let (label, outcome, raw, error) = match result {
        Ok(Ok(text)) => {
            let label = parse_label(&text);
            if label.is_resolved() {
                tracing::debug!(row_id = %row.id, construct = %construct.name, label = label.as_str(), "Pair labeled");
                (label, Outcome::Parsed, Some(text), None)
            } else {
                tracing::warn!(
                    row_id = %row.id,
                    construct = %construct.name,
                    raw = %text,
                    "Unparseable model response, recording UNRESOLVED"
                );
                (Label::Unresolved, Outcome::Unparseable, Some(text), None)
            }
        }
        Ok(Err(e)) => {
            tracing::error!(row_id = %row.id, construct = %construct.name, error = %e, "Model call failed");
            (Label::Unresolved, Outcome::CallFailed, None, Some(e.to_string()))
        }
        Err(_) => {
            let msg = format!("pair deadline of {}s exceeded", ctx.pair_timeout.as_secs());
            tracing::error!(row_id = %row.id, construct = %construct.name, "Model call timed out");
            (Label::Unresolved, Outcome::CallFailed, None, Some(msg))
        }
    };

    let entry = LedgerEntry {
        row_id: row.id.clone(),
        construct: construct.name.clone(),
        label,
        outcome,
        raw,
        error,
        model: ctx.backend.model().to_string(),
        run_id: ctx.run_id,
        recorded_at: Utc::now(),
    };

    ctx.ledger.append(&entry).await?;
    Ok(entry)
}

// ============================================================================
// TESTS
// ============================================================================
