use anyhow::{Result, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::error::PredictError;
use crate::features::FeatureMatrix;

use super::{Booster, Predictor, check_feature_names};

/// One regression tree in structure-of-arrays layout.
///
/// All arrays have one entry per node; node 0 is the root. A node is a leaf
/// when `children_left[i] == 0`. Internal nodes send `x < threshold` left
/// and missing values (NaN) to the side given by `default_left`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub split_indices: Vec<u32>,
    pub thresholds: Vec<f64>,
    pub children_left: Vec<u32>,
    pub children_right: Vec<u32>,
    pub default_left: Vec<bool>,
    pub leaf_values: Vec<f64>,
}

impl Tree {
    pub fn num_nodes(&self) -> usize {
        self.leaf_values.len()
    }

    fn is_leaf(&self, node: usize) -> bool {
        self.children_left[node] == 0
    }

    /// Highest split feature index referenced by an internal node.
    fn max_feature(&self) -> Option<usize> {
        (0..self.num_nodes())
            .filter(|&n| !self.is_leaf(n))
            .map(|n| self.split_indices[n] as usize)
            .max()
    }

    fn validate(&self, tree_idx: usize) -> Result<()> {
        let n = self.num_nodes();
        ensure!(n > 0, "tree {tree_idx} has no nodes");
        for (name, len) in [
            ("split_indices", self.split_indices.len()),
            ("thresholds", self.thresholds.len()),
            ("children_left", self.children_left.len()),
            ("children_right", self.children_right.len()),
            ("default_left", self.default_left.len()),
        ] {
            ensure!(
                len == n,
                "tree {tree_idx}: '{name}' has {len} entries, expected {n}"
            );
        }
        for node in (0..n).filter(|&i| !self.is_leaf(i)) {
            let (l, r) = (
                self.children_left[node] as usize,
                self.children_right[node] as usize,
            );
            // Children after their parent keeps traversal finite.
            if l <= node || r <= node || l >= n || r >= n {
                bail!("tree {tree_idx}: node {node} has invalid children ({l}, {r})");
            }
        }
        Ok(())
    }

    /// Leaf value reached by one row.
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut node = 0usize;
        while !self.is_leaf(node) {
            let x = row[self.split_indices[node] as usize];
            let go_left = if x.is_nan() {
                self.default_left[node]
            } else {
                x < self.thresholds[node]
            };
            node = if go_left {
                self.children_left[node]
            } else {
                self.children_right[node]
            } as usize;
        }
        self.leaf_values[node]
    }
}

/// Additive ensemble of regression trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtModel {
    /// Names of the columns the ensemble was fitted on, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_names: Option<Vec<String>>,
    #[serde(default)]
    pub base_score: f64,
    pub trees: Vec<Tree>,
}

impl GbdtModel {
    /// Width of an input row.
    pub fn num_features(&self) -> usize {
        match &self.feature_names {
            Some(names) => names.len(),
            None => self
                .trees
                .iter()
                .filter_map(Tree::max_feature)
                .max()
                .map_or(0, |m| m + 1),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(i)?;
        }
        let width = self.num_features();
        if let Some(max) = self.trees.iter().filter_map(Tree::max_feature).max() {
            ensure!(
                max < width,
                "split on feature {max} but model declares {width} features"
            );
        }
        Ok(())
    }

    fn predict_rows(&self, data: &[f64], n_rows: usize) -> Vec<f64> {
        let width = self.num_features();
        (0..n_rows)
            .map(|r| {
                let row = &data[r * width..(r + 1) * width];
                self.base_score + self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
            })
            .collect()
    }
}

impl Predictor for GbdtModel {
    fn model_type(&self) -> &str {
        "gbdt"
    }

    fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<f64>, PredictError> {
        check_feature_names(self.feature_names.as_deref(), matrix)?;
        let data = matrix.to_dense()?;
        self.predict_dense(&data, matrix.n_rows())
    }

    fn booster(&self) -> Option<&dyn Booster> {
        Some(self)
    }
}

impl Booster for GbdtModel {
    fn num_features(&self) -> usize {
        GbdtModel::num_features(self)
    }

    fn predict_dense(&self, data: &[f64], n_rows: usize) -> Result<Vec<f64>, PredictError> {
        let width = GbdtModel::num_features(self);
        let actual = if n_rows == 0 { width } else { data.len() / n_rows };
        if actual != width || data.len() != n_rows * width {
            return Err(PredictError::ShapeMismatch {
                expected: width,
                actual,
            });
        }
        Ok(self.predict_rows(data, n_rows))
    }
}
