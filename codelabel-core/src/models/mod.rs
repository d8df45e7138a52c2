pub mod prediction;
pub mod row;

pub use prediction::{Outcome, PairKey, Prediction, PredictionSet};
pub use row::{Row, RowId};
