use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the prediction pipeline.
///
/// Schema problems in the input never show up here: missing columns, unseen
/// categories and malformed values are absorbed by documented fallbacks.
/// Optional artifacts that fail to load are logged and replaced by empty
/// defaults.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The model file does not exist; nothing can be predicted.
    #[error("model artifact not found: {}", path.display())]
    ArtifactMissing { path: PathBuf },

    /// The model file exists but could not be parsed.
    #[error("model artifact {} is invalid: {source}", path.display())]
    ArtifactInvalid {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The model rejected the aligned feature matrix on every available path.
    #[error(
        "prediction failed: {reason}. Model type: {model_type}. \
         Matrix shape: ({rows}, {cols}). Columns: {columns:?}"
    )]
    InferenceFailure {
        model_type: String,
        rows: usize,
        cols: usize,
        columns: Vec<String>,
        reason: String,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Why a single predictor call rejected its input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    #[error("feature names mismatch: model expects {expected:?}, got {actual:?}")]
    FeatureMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("expected {expected} features per row, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("could not convert column '{column}' to float (value {value:?})")]
    NonNumeric { column: String, value: String },

    #[error("input contains NaN in column '{column}'")]
    MissingValue { column: String },

    #[error("model produced {actual} predictions for {expected} rows")]
    OutputLength { expected: usize, actual: usize },
}
