//! Read-only access to the persisted model artifacts.
//!
//! The model file is mandatory. Target-encoding statistics, the drop list
//! and the metadata file are optional: when absent or unreadable they are
//! replaced by empty defaults and a warning is logged. Metadata can be
//! re-read between requests; everything else is loaded once.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::{ArtifactPaths, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::model::{ModelSchema, Predictor};

// ---------------------------------------------------------------------------
// Target encoding statistics
// ---------------------------------------------------------------------------

/// Per-category target means of one column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TargetEncoding {
    pub mapping: HashMap<String, f64>,
    /// Fallback for unseen categories. `None` leaves them missing.
    pub global_mean: Option<f64>,
}

pub type TargetEncodingStats = BTreeMap<String, TargetEncoding>;

/// Accepted on-disk shapes of one statistics entry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EncodingEntry {
    Keyed {
        #[serde(alias = "stats", alias = "map")]
        mapping: HashMap<String, f64>,
        #[serde(default)]
        global_mean: Option<f64>,
    },
    Flat(HashMap<String, f64>),
}

impl From<EncodingEntry> for TargetEncoding {
    fn from(entry: EncodingEntry) -> Self {
        match entry {
            EncodingEntry::Keyed {
                mapping,
                global_mean,
            } => TargetEncoding {
                mapping,
                global_mean,
            },
            EncodingEntry::Flat(mut mapping) => {
                let global_mean = mapping.remove("global_mean").unwrap_or(0.0);
                TargetEncoding {
                    mapping,
                    global_mean: Some(global_mean),
                }
            }
        }
    }
}

/// Parse the statistics document. Entries in an unknown shape are skipped.
pub fn parse_target_encoding(text: &str) -> Result<TargetEncodingStats> {
    let raw: BTreeMap<String, JsonValue> =
        serde_json::from_str(text).context("parsing target-encoding statistics")?;
    let mut stats = TargetEncodingStats::new();
    for (column, value) in raw {
        match serde_json::from_value::<EncodingEntry>(value) {
            Ok(entry) => {
                stats.insert(column, entry.into());
            }
            Err(e) => warn!("target encoding for '{column}' has no usable mapping: {e}"),
        }
    }
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Metadata file as stored; every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFile {
    #[serde(default)]
    pub features: Option<Vec<String>>,
    #[serde(default)]
    pub median_fill: Option<BTreeMap<String, Option<f64>>>,
    #[serde(default)]
    pub te_columns: Option<Vec<String>>,
}

/// Resolved metadata: feature contract, medians, encoded columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metadata {
    pub features: Vec<String>,
    pub median_fill: HashMap<String, f64>,
    pub te_columns: Vec<String>,
}

impl Metadata {
    /// Fill keys missing from `file` with the configured defaults.
    pub fn resolve(file: MetadataFile, config: &PipelineConfig) -> Self {
        Self {
            features: file
                .features
                .unwrap_or_else(|| config.default_features.clone()),
            median_fill: file.median_fill.map(flatten_medians).unwrap_or_default(),
            te_columns: file
                .te_columns
                .unwrap_or_else(|| config.default_te_columns.clone()),
        }
    }

    /// Metadata to adopt after a re-read, or `None` to keep `self`.
    ///
    /// A file without a non-empty feature list is ignored; a file without
    /// medians keeps the current ones.
    fn reloaded(&self, file: MetadataFile, config: &PipelineConfig) -> Option<Self> {
        if file.features.as_ref().map_or(true, Vec::is_empty) {
            return None;
        }
        let keep_medians = file.median_fill.is_none();
        let mut next = Self::resolve(file, config);
        if keep_medians {
            next.median_fill = self.median_fill.clone();
        }
        Some(next)
    }
}

fn flatten_medians(raw: BTreeMap<String, Option<f64>>) -> HashMap<String, f64> {
    raw.into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)))
        .collect()
}

// ---------------------------------------------------------------------------
// ModelArtifacts – immutable snapshot handed to the pipeline
// ---------------------------------------------------------------------------

/// Everything one request needs from the artifacts, cheap to clone.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    model: Arc<dyn Predictor>,
    metadata: Arc<Metadata>,
    target_encoding: Arc<TargetEncodingStats>,
    columns_to_drop: Arc<Vec<String>>,
}

impl ModelArtifacts {
    pub fn new(
        model: Arc<dyn Predictor>,
        metadata: Metadata,
        target_encoding: TargetEncodingStats,
        columns_to_drop: Vec<String>,
    ) -> Self {
        Self {
            model,
            metadata: Arc::new(metadata),
            target_encoding: Arc::new(target_encoding),
            columns_to_drop: Arc::new(columns_to_drop),
        }
    }

    pub fn model(&self) -> &dyn Predictor {
        self.model.as_ref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Feature names in the order the model expects them.
    pub fn expected_features(&self) -> &[String] {
        &self.metadata.features
    }

    pub fn median(&self, feature: &str) -> Option<f64> {
        self.metadata.median_fill.get(feature).copied()
    }

    pub fn target_encoding_columns(&self) -> &[String] {
        &self.metadata.te_columns
    }

    pub fn target_encoding(&self, column: &str) -> Option<&TargetEncoding> {
        self.target_encoding.get(column)
    }

    pub fn columns_to_drop(&self) -> &[String] {
        &self.columns_to_drop
    }
}

// ---------------------------------------------------------------------------
// ArtifactStore – process-wide owner of the loaded artifacts
// ---------------------------------------------------------------------------

pub struct ArtifactStore {
    paths: ArtifactPaths,
    config: PipelineConfig,
    model: Arc<dyn Predictor>,
    target_encoding: Arc<TargetEncodingStats>,
    columns_to_drop: Arc<Vec<String>>,
    metadata: RwLock<Arc<Metadata>>,
}

impl ArtifactStore {
    /// Load all four artifacts. Only a missing or invalid model is an error.
    pub fn open(paths: ArtifactPaths, config: &PipelineConfig) -> PipelineResult<Self> {
        let model = load_model(&paths.model)?;
        info!(
            "loaded {} model from {}",
            model.model_type(),
            paths.model.display()
        );

        let target_encoding = load_optional(
            &paths.target_encoding,
            "target-encoding statistics",
            parse_target_encoding,
        );
        let columns_to_drop: Vec<String> =
            load_optional(&paths.columns_to_drop, "columns-to-drop list", parse_json);
        let metadata_file: MetadataFile = load_optional(&paths.metadata, "metadata", parse_json);
        let metadata = Metadata::resolve(metadata_file, config);

        info!(
            "artifacts ready: {} features, {} encoded columns with statistics, {} columns to drop",
            metadata.features.len(),
            target_encoding.len(),
            columns_to_drop.len()
        );

        Ok(Self {
            paths,
            config: config.clone(),
            model: Arc::from(model),
            target_encoding: Arc::new(target_encoding),
            columns_to_drop: Arc::new(columns_to_drop),
            metadata: RwLock::new(Arc::new(metadata)),
        })
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Current artifacts for one request.
    pub fn snapshot(&self) -> ModelArtifacts {
        let metadata = self
            .metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        ModelArtifacts {
            model: Arc::clone(&self.model),
            metadata,
            target_encoding: Arc::clone(&self.target_encoding),
            columns_to_drop: Arc::clone(&self.columns_to_drop),
        }
    }

    /// Re-read the metadata file. Returns whether new metadata was adopted.
    ///
    /// Requests that already took a snapshot keep the metadata they started
    /// with.
    pub fn refresh_metadata(&self) -> bool {
        let path = &self.paths.metadata;
        if !path.exists() {
            return false;
        }
        let file: MetadataFile = match std::fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|text| parse_json(&text))
        {
            Ok(file) => file,
            Err(e) => {
                debug!("ignoring unreadable metadata {}: {e:#}", path.display());
                return false;
            }
        };

        let current = self
            .metadata
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(next) = current.reloaded(file, &self.config) else {
            return false;
        };
        if next == *current {
            return false;
        }

        debug!("metadata reloaded: {} features", next.features.len());
        *self.metadata.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        true
    }
}

// -- loading helpers --

fn load_model(path: &Path) -> PipelineResult<Box<dyn Predictor>> {
    if !path.exists() {
        return Err(PipelineError::ArtifactMissing {
            path: path.to_path_buf(),
        });
    }
    let text = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_json::<ModelSchema>(&text)
        .and_then(ModelSchema::into_predictor)
        .map_err(|source| PipelineError::ArtifactInvalid {
            path: path.to_path_buf(),
            source,
        })
}

fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(text)?)
}

/// Load an optional artifact, substituting `T::default()` on any failure.
fn load_optional<T, F>(path: &Path, what: &str, parse: F) -> T
where
    T: Default,
    F: FnOnce(&str) -> Result<T>,
{
    if !path.exists() {
        warn!("{what} not found at {}, using empty default", path.display());
        return T::default();
    }
    match std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))
        .and_then(|text| parse(&text))
    {
        Ok(value) => value,
        Err(e) => {
            warn!("{what} at {} is unreadable ({e:#}), using empty default", path.display());
            T::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const LINEAR_MODEL: &str = r#"{"type": "linear", "weights": [1.0], "bias": 0.0}"#;

    fn write_model(dir: &Path) -> ArtifactPaths {
        let paths = ArtifactPaths::in_dir(dir);
        fs::write(&paths.model, LINEAR_MODEL).unwrap();
        paths
    }

    #[test]
    fn missing_model_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArtifactStore::open(ArtifactPaths::in_dir(dir.path()), &PipelineConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::ArtifactMissing { .. }));
    }

    #[test]
    fn corrupt_model_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::in_dir(dir.path());
        fs::write(&paths.model, "not json").unwrap();
        let err = ArtifactStore::open(paths, &PipelineConfig::default()).err().unwrap();
        assert!(matches!(err, PipelineError::ArtifactInvalid { .. }));
    }

    #[test]
    fn optional_artifacts_degrade_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_model(dir.path());
        fs::write(&paths.target_encoding, "{broken").unwrap();
        fs::write(&paths.columns_to_drop, r#"{"not": "a list"}"#).unwrap();

        let cfg = PipelineConfig::default();
        let store = ArtifactStore::open(paths, &cfg).unwrap();
        let a = store.snapshot();
        assert!(a.target_encoding("adminarea").is_none());
        assert!(a.columns_to_drop().is_empty());
        assert_eq!(a.expected_features(), cfg.default_features.as_slice());
        assert_eq!(a.target_encoding_columns(), cfg.default_te_columns.as_slice());
        assert!(a.metadata().median_fill.is_empty());
    }

    #[test]
    fn loads_all_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_model(dir.path());
        fs::write(
            &paths.target_encoding,
            r#"{"adminarea": {"mapping": {"Unknown": 50000}, "global_mean": 45000}}"#,
        )
        .unwrap();
        fs::write(&paths.columns_to_drop, r#"["leak"]"#).unwrap();
        fs::write(
            &paths.metadata,
            r#"{"features": ["age"], "median_fill": {"age": 30, "x": null}, "te_columns": ["adminarea"]}"#,
        )
        .unwrap();

        let a = ArtifactStore::open(paths, &PipelineConfig::default())
            .unwrap()
            .snapshot();
        assert_eq!(a.expected_features(), ["age".to_string()]);
        assert_eq!(a.median("age"), Some(30.0));
        assert_eq!(a.median("x"), None);
        assert_eq!(a.columns_to_drop(), ["leak".to_string()]);
        let te = a.target_encoding("adminarea").unwrap();
        assert_eq!(te.mapping.get("Unknown"), Some(&50000.0));
        assert_eq!(te.global_mean, Some(45000.0));
    }

    #[test]
    fn encoding_entry_shapes() {
        let stats = parse_target_encoding(
            r#"{
                "a": {"stats": {"x": 1.0}, "global_mean": 2.0},
                "b": {"map": {"y": 3.0}},
                "c": {"z": 4.0, "global_mean": 5.0},
                "d": {"mapping": null, "note": "broken"}
            }"#,
        )
        .unwrap();
        assert_eq!(stats["a"].global_mean, Some(2.0));
        assert_eq!(stats["b"].global_mean, None);
        assert_eq!(stats["c"].mapping.get("z"), Some(&4.0));
        assert!(!stats["c"].mapping.contains_key("global_mean"));
        assert_eq!(stats["c"].global_mean, Some(5.0));
        assert!(!stats.contains_key("d"));
    }

    #[test]
    fn refresh_adopts_only_non_empty_feature_lists() {
        let dir = tempfile::tempdir().unwrap();
        let paths = write_model(dir.path());
        fs::write(&paths.metadata, r#"{"features": ["a"], "median_fill": {"a": 1.0}}"#).unwrap();
        let store = ArtifactStore::open(paths.clone(), &PipelineConfig::default()).unwrap();
        let before = store.snapshot();

        fs::write(&paths.metadata, r#"{"features": []}"#).unwrap();
        assert!(!store.refresh_metadata());
        assert_eq!(store.snapshot().expected_features(), ["a".to_string()]);

        fs::write(&paths.metadata, r#"{"features": ["a", "b"]}"#).unwrap();
        assert!(store.refresh_metadata());
        let after = store.snapshot();
        assert_eq!(after.expected_features(), ["a".to_string(), "b".to_string()]);
        // medians carried over when the new file has none
        assert_eq!(after.median("a"), Some(1.0));
        // an earlier snapshot is unaffected
        assert_eq!(before.expected_features(), ["a".to_string()]);

        fs::write(&paths.metadata, "garbage").unwrap();
        assert!(!store.refresh_metadata());
    }
}
