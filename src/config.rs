use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Pipeline configuration
// ---------------------------------------------------------------------------

/// Tunables of the feature pipeline.
///
/// Every field has a default matching the behaviour the model was trained
/// against, so an empty JSON object (or no config file at all) is valid.
///
/// `numeric_coercion_threshold` and `keep_mixed_columns_as_text` are
/// heuristics carried over from the training notebook; changing them alters
/// which input columns the model sees as numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Share of non-null values that must convert before a text column in
    /// the aligned matrix is treated as numeric (strictly greater than).
    pub numeric_coercion_threshold: f64,
    /// Keep columns that mix numbers and free text as text during
    /// normalization instead of coercing the non-numeric values to null.
    pub keep_mixed_columns_as_text: bool,
    /// Category substituted for missing values of target-encoded columns.
    pub unknown_category: String,
    /// Value of `gender` that maps to `is_male = 1`.
    pub male_marker: String,
    /// Housekeeping columns always removed before alignment.
    pub housekeeping_columns: Vec<String>,
    /// Feature list used when the metadata file does not provide one.
    pub default_features: Vec<String>,
    /// Target-encoded columns used when the metadata file does not list any.
    pub default_te_columns: Vec<String>,
    /// Re-read the metadata artifact before each prediction.
    pub reload_metadata: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            numeric_coercion_threshold: 0.95,
            keep_mixed_columns_as_text: true,
            unknown_category: "Unknown".to_string(),
            male_marker: "Мужской".to_string(),
            housekeeping_columns: vec!["dt".to_string()],
            default_features: vec![
                "first_salary_income".to_string(),
                "incomeValue".to_string(),
            ],
            default_te_columns: [
                "adminarea",
                "dp_ewb_last_employment_position",
                "city_smart_name",
                "addrref",
                "dp_address_unique_regions",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            reload_metadata: true,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Artifact locations
// ---------------------------------------------------------------------------

/// Paths of the four persisted artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub target_encoding: PathBuf,
    pub columns_to_drop: PathBuf,
    pub metadata: PathBuf,
}

impl ArtifactPaths {
    pub const MODEL_FILE: &'static str = "final_model.json";
    pub const TARGET_ENCODING_FILE: &'static str = "target_encoding_stats.json";
    pub const COLUMNS_TO_DROP_FILE: &'static str = "columns_to_drop.json";
    pub const METADATA_FILE: &'static str = "model_metadata.json";

    /// Default file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            model: dir.join(Self::MODEL_FILE),
            target_encoding: dir.join(Self::TARGET_ENCODING_FILE),
            columns_to_drop: dir.join(Self::COLUMNS_TO_DROP_FILE),
            metadata: dir.join(Self::METADATA_FILE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.numeric_coercion_threshold, 0.95);
    }

    #[test]
    fn partial_json_overrides_single_field() {
        let cfg: PipelineConfig =
            serde_json::from_str(r#"{"male_marker": "M", "reload_metadata": false}"#).unwrap();
        assert_eq!(cfg.male_marker, "M");
        assert!(!cfg.reload_metadata);
        assert_eq!(cfg.unknown_category, "Unknown");
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, r#"{"numeric_coercion_threshold": 0.5}"#).unwrap();
        let cfg = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(cfg.numeric_coercion_threshold, 0.5);
    }

    #[test]
    fn artifact_paths_use_default_names() {
        let paths = ArtifactPaths::in_dir(Path::new("/srv/model"));
        assert_eq!(paths.model, Path::new("/srv/model/final_model.json"));
        assert_eq!(paths.metadata, Path::new("/srv/model/model_metadata.json"));
    }
}
