use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::error::PredictError;
use crate::features::FeatureMatrix;

use super::{Predictor, check_feature_names};

/// `bias + Σ weight·x`. Has no positional fallback and rejects missing
/// values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_names: Option<Vec<String>>,
    pub weights: Vec<f64>,
    #[serde(default)]
    pub bias: f64,
}

impl LinearModel {
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(names) = &self.feature_names {
            ensure!(
                names.len() == self.weights.len(),
                "{} feature names for {} weights",
                names.len(),
                self.weights.len()
            );
        }
        Ok(())
    }
}

impl Predictor for LinearModel {
    fn model_type(&self) -> &str {
        "linear"
    }

    fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>, PredictError> {
        check_feature_names(self.feature_names.as_deref(), matrix)?;
        let width = self.weights.len();
        if matrix.n_cols() != width {
            return Err(PredictError::ShapeMismatch {
                expected: width,
                actual: matrix.n_cols(),
            });
        }
        let data = matrix.to_dense()?;
        if let Some(pos) = data.iter().position(|v| v.is_nan()) {
            let column = matrix.column_names().swap_remove(pos % width);
            return Err(PredictError::MissingValue { column });
        }

        Ok((0..matrix.n_rows())
            .map(|r| {
                let row = &data[r * width..(r + 1) * width];
                self.bias + row.iter().zip(&self.weights).map(|(x, w)| x * w).sum::<f64>()
            })
            .collect())
    }
}
