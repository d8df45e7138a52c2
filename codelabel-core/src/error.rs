use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodelabelError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Xlsx(#[from] calamine::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Column '{column}' not found in {path} (available: {available:?})")]
    MissingColumn {
        path: String,
        column: String,
        available: Vec<String>,
    },

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Codebook error: {0}")]
    Codebook(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
