//! Model invocation and result assembly.

use log::{debug, warn};
use serde::Serialize;

use crate::artifacts::ModelArtifacts;
use crate::data::model::{CellValue, RecordTable};
use crate::error::{PipelineError, PipelineResult, PredictError};
use crate::features::FeatureMatrix;

pub const ID_COLUMN: &str = "id";

/// Where record identifiers come from.
#[derive(Debug, Clone, PartialEq)]
pub enum IdSource {
    /// Values of the input's `id` column, one per row.
    Column(Vec<CellValue>),
    /// 1-based row numbers.
    Sequential,
}

impl IdSource {
    /// Use the table's `id` column if it has one.
    pub fn from_table(table: &RecordTable) -> Self {
        match table.column(ID_COLUMN) {
            Some(col) => IdSource::Column(col.values.clone()),
            None => IdSource::Sequential,
        }
    }

    fn resolve(&self, n_rows: usize) -> Vec<CellValue> {
        match self {
            IdSource::Column(values) => values.clone(),
            IdSource::Sequential => (1..=n_rows as i64).map(CellValue::Integer).collect(),
        }
    }
}

/// One prediction row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    #[serde(serialize_with = "serialize_cell")]
    pub id: CellValue,
    pub target: f64,
}

/// Predictions in input row order.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct PredictionResult {
    pub rows: Vec<Prediction>,
}

impl PredictionResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn targets(&self) -> Vec<f64> {
        self.rows.iter().map(|p| p.target).collect()
    }
}

pub(crate) fn serialize_cell<S: serde::Serializer>(v: &CellValue, s: S) -> Result<S::Ok, S::Error> {
    match v {
        CellValue::Text(t) => s.serialize_str(t),
        CellValue::Integer(i) => s.serialize_i64(*i),
        CellValue::Float(f) if f.is_nan() => s.serialize_none(),
        CellValue::Float(f) => s.serialize_f64(*f),
        CellValue::Bool(b) => s.serialize_bool(*b),
        CellValue::Null => s.serialize_none(),
    }
}

/// Run the model on `matrix` and pair each prediction with its id.
///
/// The standard interface is tried first. If it rejects the matrix and the
/// model has a positional booster, the dense values are retried through it.
/// When both fail the error carries the model type, matrix shape and
/// columns. Failures are not retried.
pub fn infer(
    matrix: &FeatureMatrix,
    artifacts: &ModelArtifacts,
    ids: &IdSource,
) -> PipelineResult<PredictionResult> {
    let model = artifacts.model();
    let n_rows = matrix.n_rows();

    let targets = match predict_checked(n_rows, || model.predict(matrix)) {
        Ok(targets) => targets,
        Err(primary) => {
            warn!("{} predict failed: {primary}", model.model_type());
            let fallback = match model.booster() {
                Some(booster) => {
                    debug!(
                        "retrying through booster ({} features)",
                        booster.num_features()
                    );
                    predict_checked(n_rows, || {
                        let data = matrix.to_dense()?;
                        booster.predict_dense(&data, n_rows)
                    })
                }
                None => Err(primary.clone()),
            };
            fallback.map_err(|e| failure(matrix, model.model_type(), &primary, &e))?
        }
    };

    let rows = ids
        .resolve(n_rows)
        .into_iter()
        .zip(targets)
        .map(|(id, target)| Prediction { id, target })
        .collect();
    Ok(PredictionResult { rows })
}

fn predict_checked<F>(n_rows: usize, f: F) -> Result<Vec<f64>, PredictError>
where
    F: FnOnce() -> Result<Vec<f64>, PredictError>,
{
    let out = f()?;
    if out.len() != n_rows {
        return Err(PredictError::OutputLength {
            expected: n_rows,
            actual: out.len(),
        });
    }
    Ok(out)
}

fn failure(
    matrix: &FeatureMatrix,
    model_type: &str,
    primary: &PredictError,
    fallback: &PredictError,
) -> PipelineError {
    let reason = if primary == fallback {
        primary.to_string()
    } else {
        format!("{primary}; fallback: {fallback}")
    };
    PipelineError::InferenceFailure {
        model_type: model_type.to_string(),
        rows: matrix.n_rows(),
        cols: matrix.n_cols(),
        columns: matrix.column_names(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::artifacts::Metadata;
    use crate::data::model::Column;
    use crate::model::{GbdtModel, LinearModel, Predictor, Tree};

    fn artifacts(model: impl Predictor + 'static) -> ModelArtifacts {
        ModelArtifacts::new(Arc::new(model), Metadata::default(), Default::default(), vec![])
    }

    fn matrix(names: &[&str], rows: &[&[f64]]) -> FeatureMatrix {
        let columns = names
            .iter()
            .enumerate()
            .map(|(j, n)| Column::new(*n, rows.iter().map(|r| CellValue::Float(r[j])).collect()))
            .collect();
        FeatureMatrix::new(rows.len(), columns)
    }

    /// Single split on feature 0 at 0.5: left 10, right 20.
    fn tree_model(names: Option<&[&str]>) -> GbdtModel {
        GbdtModel {
            feature_names: names.map(|n| n.iter().map(|s| s.to_string()).collect()),
            base_score: 0.0,
            trees: vec![Tree {
                split_indices: vec![0, 0, 0],
                thresholds: vec![0.5, 0.0, 0.0],
                children_left: vec![1, 0, 0],
                children_right: vec![2, 0, 0],
                default_left: vec![true, false, false],
                leaf_values: vec![0.0, 10.0, 20.0],
            }],
        }
    }

    #[test]
    fn sequential_ids_when_no_id_column() {
        let a = artifacts(tree_model(None));
        let m = matrix(&["x"], &[&[0.0], &[1.0], &[0.0]]);
        let out = infer(&m, &a, &IdSource::Sequential).unwrap();
        assert_eq!(out.len(), 3);
        let ids: Vec<_> = out.rows.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec![1i64.into(), 2i64.into(), 3i64.into()]);
        assert_eq!(out.targets(), vec![10.0, 20.0, 10.0]);
    }

    #[test]
    fn ids_taken_from_input_column() {
        let table = RecordTable::from_columns(
            2,
            vec![Column::new(ID_COLUMN, vec!["a-1".into(), "b-2".into()])],
        );
        let ids = IdSource::from_table(&table);
        let out = infer(&matrix(&["x"], &[&[1.0], &[0.0]]), &artifacts(tree_model(None)), &ids)
            .unwrap();
        assert_eq!(out.rows[0].id, CellValue::from("a-1"));
        assert_eq!(out.rows[1].target, 10.0);
    }

    #[test]
    fn falls_back_to_booster_on_name_mismatch() {
        let a = artifacts(tree_model(Some(&["trained_name"])));
        let m = matrix(&["renamed"], &[&[1.0]]);
        let out = infer(&m, &a, &IdSource::Sequential).unwrap();
        assert_eq!(out.targets(), vec![20.0]);
    }

    #[test]
    fn failure_without_booster_reports_shape() {
        let model = LinearModel {
            feature_names: Some(vec!["a".into(), "b".into()]),
            weights: vec![1.0, 1.0],
            bias: 0.0,
        };
        let m = matrix(&["a", "c"], &[&[1.0, 2.0], &[3.0, 4.0], &[5.0, 6.0]]);
        let err = infer(&m, &artifacts(model), &IdSource::Sequential).unwrap_err();
        match err {
            PipelineError::InferenceFailure {
                model_type,
                rows,
                cols,
                columns,
                ..
            } => {
                assert_eq!(model_type, "linear");
                assert_eq!((rows, cols), (3, 2));
                assert_eq!(columns, vec!["a".to_string(), "c".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn text_cells_fail_both_paths() {
        let a = artifacts(tree_model(None));
        let m = FeatureMatrix::new(1, vec![Column::new("x", vec!["n/a".into()])]);
        let err = infer(&m, &a, &IdSource::Sequential).unwrap_err();
        assert!(err.to_string().contains("(1, 1)"), "{err}");
    }

    #[test]
    fn empty_matrix_yields_empty_result() {
        let a = artifacts(tree_model(None));
        let m = matrix(&["x"], &[]);
        assert!(infer(&m, &a, &IdSource::Sequential).unwrap().is_empty());
    }
}
