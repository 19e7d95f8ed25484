//! Income prediction pipeline.
//!
//! ```text
//!  RecordTable ──normalize──▶ RecordTable ──build──▶ FeatureMatrix ──infer──▶ PredictionResult
//!                                               ▲                      ▲
//!                                               └──── ModelArtifacts ──┘
//! ```

pub mod artifacts;
pub mod config;
pub mod data;
pub mod error;
pub mod features;
pub mod inference;
pub mod model;
pub mod output;
pub mod pipeline;

pub use artifacts::{ArtifactStore, ModelArtifacts};
pub use config::{ArtifactPaths, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{PredictionService, predict_table};
