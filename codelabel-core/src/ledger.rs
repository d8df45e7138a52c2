//! Append-only prediction ledger (JSON Lines).
//!
//! Every finished (row, construct) call is appended as one line and synced to
//! disk before the worker moves on, so an interrupted run loses nothing that
//! completed. Reading the ledger back rebuilds the [`PredictionSet`]; the last
//! line for a key wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::CodelabelError;
use crate::label::Label;
use crate::models::{Outcome, PairKey, Prediction, PredictionSet, RowId};

/// One persisted prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub row_id: RowId,
    pub construct: String,
    pub label: Label,
    pub outcome: Outcome,
    /// Raw response text, kept for audit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub model: String,
    pub run_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn key(&self) -> PairKey {
        PairKey::new(self.row_id.clone(), self.construct.clone())
    }

    pub fn prediction(&self) -> Prediction {
        Prediction {
            label: self.label,
            outcome: self.outcome,
            model: self.model.clone(),
            run_id: self.run_id,
        }
    }
}

/// Destination for finished predictions. Workers only need to append.
#[async_trait]
pub trait PredictionSink: Send + Sync {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), CodelabelError>;
}

pub struct PredictionLedger {
    path: PathBuf,
    file: Mutex<fs::File>,
}

impl PredictionLedger {
    /// Open (or create) the ledger for appending. A torn final line left by
    /// a crash is terminated so the next entry starts on its own line.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CodelabelError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let needs_newline = match fs::read(&path).await {
            Ok(bytes) => bytes.last().is_some_and(|b| *b != b'\n'),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if needs_newline {
            tracing::warn!(path = %path.display(), "Ledger ends with a partial line, terminating it");
            file.write_all(b"\n").await?;
            file.sync_data().await?;
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and sync it to disk. Appends are serialized so
    /// concurrent workers never interleave partial lines.
    pub async fn append(&self, entry: &LedgerEntry) -> Result<(), CodelabelError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read every entry in file order. Missing file → empty. Lines that do
    /// not parse (a torn write) are skipped with a warning.
    pub async fn read_entries(path: impl AsRef<Path>) -> Result<Vec<LedgerEntry>, CodelabelError> {
        let path = path.as_ref();
        // Bytes, not a string: a write torn mid-character leaves invalid UTF-8.
        let contents = match fs::read(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (idx, line) in contents.split(|b| *b == b'\n').enumerate() {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<LedgerEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        line = idx + 1,
                        error = %e,
                        "Skipping unreadable ledger line"
                    );
                }
            }
        }
        Ok(entries)
    }

    /// Rebuild the prediction set from the ledger.
    pub async fn load(path: impl AsRef<Path>) -> Result<PredictionSet, CodelabelError> {
        let mut set = PredictionSet::new();
        for entry in Self::read_entries(path).await? {
            set.insert(entry.key(), entry.prediction());
        }
        Ok(set)
    }
}

#[async_trait]
impl PredictionSink for PredictionLedger {
    async fn append(&self, entry: &LedgerEntry) -> Result<(), CodelabelError> {
        PredictionLedger::append(self, entry).await
    }
}
