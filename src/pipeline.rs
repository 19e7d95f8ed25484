use std::time::Instant;

use log::{debug, info};

use crate::artifacts::{ArtifactStore, ModelArtifacts};
use crate::config::PipelineConfig;
use crate::data::model::RecordTable;
use crate::data::normalize::normalize;
use crate::error::PipelineResult;
use crate::features::build;
use crate::inference::{IdSource, PredictionResult, infer};

// ---------------------------------------------------------------------------
// Request pipeline
// ---------------------------------------------------------------------------

/// normalize → build → infer for one table against fixed artifacts.
pub fn predict_table(
    table: RecordTable,
    artifacts: &ModelArtifacts,
    config: &PipelineConfig,
) -> PipelineResult<PredictionResult> {
    let table = normalize(table, config);
    let ids = IdSource::from_table(&table);
    let matrix = build(&table, artifacts, config);
    debug!(
        "built feature matrix {:?} from {} input columns",
        matrix.shape(),
        table.n_cols()
    );
    infer(&matrix, artifacts, &ids)
}

/// Process-wide owner of the artifacts and the pipeline configuration.
///
/// Shared between request handlers; each call works on its own snapshot of
/// the artifacts.
pub struct PredictionService {
    store: ArtifactStore,
    config: PipelineConfig,
}

impl PredictionService {
    pub fn new(store: ArtifactStore, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Predict every record of `table`, picking up updated metadata first
    /// when reloading is enabled.
    pub fn predict(&self, table: RecordTable) -> PipelineResult<PredictionResult> {
        let start = Instant::now();
        if self.config.reload_metadata && self.store.refresh_metadata() {
            info!("picked up updated model metadata");
        }
        let artifacts = self.store.snapshot();
        let n_rows = table.n_rows();
        let result = predict_table(table, &artifacts, &self.config)?;
        info!(
            "predicted {n_rows} rows in {:.1} ms",
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(result)
    }
}
