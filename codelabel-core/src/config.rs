use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::CodelabelError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CodelabelConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Replaces the built-in codebook when present. An empty list is rejected.
    #[serde(default)]
    pub constructs: Option<Vec<ConstructConfig>>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    pub base_url: String,
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            temperature: 0.0,
            max_tokens: 4,
            request_timeout_secs: 60,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunConfig {
    pub concurrency: usize,
    pub rate_limit_rpm: u32,
    pub pair_timeout_secs: u64,
    pub retry_failed_on_resume: bool,
    pub fail_on_unresolved: bool,
    pub limit: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            rate_limit_rpm: 0,
            pair_timeout_secs: 300,
            retry_failed_on_resume: true,
            fail_on_unresolved: true,
            limit: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatasetConfig {
    pub raw_path: String,
    pub coded_path: String,
    /// XLSX sheet for the raw dataset; the first sheet when unset.
    pub sheet: Option<String>,
    /// XLSX sheet for the coded dataset; the first sheet when unset.
    pub coded_sheet: Option<String>,
    pub id_col: String,
    pub text_col: String,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            raw_path: "dataset/Raw_Data.xlsx".to_string(),
            coded_path: "dataset/Coded_Data.csv".to_string(),
            sheet: None,
            coded_sheet: None,
            id_col: "task_submit_id".to_string(),
            text_col: "code_change_text".to_string(),
        }
    }
}

impl DatasetConfig {
    /// Expanded raw dataset path and the sheet to read from it.
    pub fn raw_source(&self) -> (PathBuf, Option<&str>) {
        (PathBuf::from(expand_path(&self.raw_path)), self.sheet.as_deref())
    }

    /// Expanded coded dataset path and the sheet to read from it.
    pub fn coded_source(&self) -> (PathBuf, Option<&str>) {
        (
            PathBuf::from(expand_path(&self.coded_path)),
            self.coded_sheet.as_deref(),
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub out_prefix: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            out_prefix: "study3_zeroshot".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConstructConfig {
    pub name: String,
    pub definition: String,
}

impl CodelabelConfig {
    /// Load from an optional TOML file, then `CODELABEL__SECTION__KEY` env vars.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("CODELABEL")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), CodelabelError> {
        if self.run.concurrency == 0 {
            return Err(CodelabelError::InvalidConfig(
                "run.concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(CodelabelError::InvalidConfig(format!(
                "model.temperature must be within [0, 2], got {}",
                self.model.temperature
            )));
        }
        if self.model.name.trim().is_empty() {
            return Err(CodelabelError::InvalidConfig(
                "model.name must not be empty".to_string(),
            ));
        }
        if self.dataset.id_col.trim().is_empty() || self.dataset.text_col.trim().is_empty() {
            return Err(CodelabelError::InvalidConfig(
                "dataset.id_col and dataset.text_col must not be empty".to_string(),
            ));
        }
        if self.output.out_prefix.trim().is_empty() {
            return Err(CodelabelError::InvalidConfig(
                "output.out_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}
