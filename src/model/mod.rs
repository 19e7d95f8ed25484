//! The persisted predictor.
//!
//! A model artifact is one of several families, all exposed through
//! [`Predictor`]. Families that also carry a low-level positional
//! interface advertise it through [`Predictor::booster`], which the
//! inference adapter uses as its fallback path.

use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PredictError;
use crate::features::FeatureMatrix;

pub mod gbdt;
pub mod linear;

pub use gbdt::{GbdtModel, Tree};
pub use linear::LinearModel;

/// Standard prediction interface: named, column-aligned input.
pub trait Predictor: Send + Sync + fmt::Debug {
    /// Short family name used in diagnostics.
    fn model_type(&self) -> &str;

    /// Predict one value per matrix row.
    fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>, PredictError>;

    /// Low-level positional interface, if the family has one.
    fn booster(&self) -> Option<&dyn Booster> {
        None
    }
}

/// Positional prediction over a dense row-major array, without any
/// feature-name checks.
pub trait Booster: Send + Sync {
    fn num_features(&self) -> usize;

    fn predict_dense(&self, data: &[f64], n_rows: usize) -> Result<Vec<f64>, PredictError>;
}

/// On-disk model representation, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSchema {
    Gbdt(GbdtModel),
    Linear(LinearModel),
}

impl ModelSchema {
    /// Validate the structure and turn it into a runtime predictor.
    pub fn into_predictor(self) -> Result<Box<dyn Predictor>> {
        Ok(match self {
            ModelSchema::Gbdt(m) => {
                m.validate()?;
                Box::new(m)
            }
            ModelSchema::Linear(m) => {
                m.validate()?;
                Box::new(m)
            }
        })
    }
}

/// Reject a matrix whose columns differ from the names the model was
/// fitted with. Models without stored names accept any column names.
pub(crate) fn check_feature_names(
    expected: Option<&[String]>,
    matrix: &FeatureMatrix,
) -> Result<(), PredictError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = matrix.column_names();
    if expected != actual.as_slice() {
        return Err(PredictError::FeatureMismatch {
            expected: expected.to_vec(),
            actual,
        });
    }
    Ok(())
}
