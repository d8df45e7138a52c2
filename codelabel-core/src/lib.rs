pub mod codebook;
pub mod config;
pub mod dataset;
pub mod error;
pub mod inference;
pub mod label;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod prompt;

pub use codebook::{canonical, Codebook, Construct};
pub use config::CodelabelConfig;
pub use dataset::GroundTruth;
pub use error::CodelabelError;
pub use inference::{
    create_backend, ClassifierBackend, InferenceConfig, InferenceError, OpenAiChatClient,
};
pub use label::{parse_label, Label};
pub use ledger::{LedgerEntry, PredictionLedger, PredictionSink};
pub use metrics::{MetricsRecord, MetricsReport};
pub use models::{Outcome, PairKey, Prediction, PredictionSet, Row, RowId};
pub use prompt::{build_prompt, Prompt};
