use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

/// Structural failures surfaced to the caller.
///
/// Undefined indicator values never show up here: they travel as NaN and are
/// filtered by the feature pipeline.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("no price data available for ticker '{ticker}'")]
    DataUnavailable { ticker: String },

    #[error("insufficient history: {rows} usable rows, at least {required} required")]
    InsufficientHistory { rows: usize, required: usize },

    #[error("{kind} not found at {}", path.display())]
    MissingArtifact { kind: &'static str, path: PathBuf },

    #[error("bars must be strictly increasing by date; row {index} ({date}) is not after its predecessor")]
    UnorderedSeries { index: usize, date: NaiveDate },

    #[error("length mismatch: {left_name} has {left} rows but {right_name} has {right}")]
    LengthMismatch {
        left_name: &'static str,
        left: usize,
        right_name: &'static str,
        right: usize,
    },

    #[error("model was fitted with features {found:?}, expected {expected:?}")]
    FeatureContract {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("threshold {0} must lie strictly between 0 and 1")]
    InvalidThreshold(f64),
}

impl AnalysisError {
    pub fn length_mismatch(
        left_name: &'static str,
        left: usize,
        right_name: &'static str,
        right: usize,
    ) -> Self {
        Self::LengthMismatch {
            left_name,
            left,
            right_name,
            right,
        }
    }
}
