use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::inference::{Prediction, PredictionResult};

/// How a prediction batch is written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// `id,target` rows.
    #[default]
    Csv,
    /// `{"predictions": [...], "count": n, "status": "success"}`.
    Json,
    /// Targets plus mean / median / min / max.
    Summary,
}

/// Write `result` to `out` in the requested format.
pub fn write_result<W: Write>(
    result: &PredictionResult,
    format: OutputFormat,
    file_name: &str,
    out: W,
) -> Result<()> {
    match format {
        OutputFormat::Csv => write_csv(result, out),
        OutputFormat::Json => write_json(&PredictionsDocument::new(result), out),
        OutputFormat::Summary => write_json(&SummaryDocument::new(result, file_name), out),
    }
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

pub fn write_csv<W: Write>(result: &PredictionResult, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer
        .write_record(["id", "target"])
        .context("writing CSV header")?;
    for p in &result.rows {
        let id = if p.id.is_null() {
            String::new()
        } else {
            p.id.to_string()
        };
        writer
            .write_record([id, p.target.to_string()])
            .context("writing CSV row")?;
    }
    writer.flush().context("flushing CSV output")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON documents
// ---------------------------------------------------------------------------

fn write_json<T: Serialize, W: Write>(doc: &T, mut out: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, doc).context("writing JSON output")?;
    writeln!(out).context("writing JSON output")?;
    out.flush().context("flushing JSON output")?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct PredictionsDocument<'a> {
    pub predictions: &'a [Prediction],
    pub count: usize,
    pub status: &'static str,
}

impl<'a> PredictionsDocument<'a> {
    pub fn new(result: &'a PredictionResult) -> Self {
        Self {
            predictions: &result.rows,
            count: result.len(),
            status: "success",
        }
    }
}

/// Batch statistics of the predicted target; all zero for an empty batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TargetSummary {
    pub target_mean: f64,
    pub target_median: f64,
    pub target_min: f64,
    pub target_max: f64,
}

impl TargetSummary {
    pub fn of(targets: &[f64]) -> Self {
        if targets.is_empty() {
            return Self::default();
        }
        let mut sorted = targets.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        Self {
            target_mean: sorted.iter().sum::<f64>() / n as f64,
            target_median: median,
            target_min: sorted[0],
            target_max: sorted[n - 1],
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SummaryDocument {
    pub request_id: String,
    pub file_name: String,
    pub n_rows: usize,
    pub target: Vec<f64>,
    pub summary: TargetSummary,
}

impl SummaryDocument {
    pub fn new(result: &PredictionResult, file_name: &str) -> Self {
        let target = result.targets();
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            file_name: file_name.to_string(),
            n_rows: target.len(),
            summary: TargetSummary::of(&target),
            target,
        }
    }
}
