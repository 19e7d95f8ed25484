use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, AsArray, BooleanArray, Date32Array, Float32Array, Float64Array, Int32Array,
    Int64Array, StringArray,
};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{CellValue, Column, RecordTable};

/// Null markers recognised in delimited text, on top of empty fields.
pub const DEFAULT_NA_VALUES: [&str; 18] = [
    "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

/// Delimited-text conventions of uploaded files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    pub delimiter: u8,
    pub decimal: char,
    /// Fields equal to one of these are read as null.
    pub na_values: BTreeSet<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: b';',
            decimal: ',',
            na_values: DEFAULT_NA_VALUES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl LoadOptions {
    fn is_na(&self, field: &str) -> bool {
        field.is_empty() || self.na_values.contains(field)
    }
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a record table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – header row, `;` separated, `,` as decimal separator
/// * `.json`    – `[{ "col": value, ... }, ...]` or `{ "records": [...] }`
/// * `.parquet` – flat Parquet file, one column per field
pub fn load_file(path: &Path, options: &LoadOptions) -> Result<RecordTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => {
            let text = std::fs::read_to_string(path).context("reading JSON file")?;
            parse_json(&text)
        }
        "csv" => {
            let file = std::fs::File::open(path).context("opening CSV")?;
            parse_csv(file, options)
        }
        other => bail!("Unsupported file extension: .{other}"),
    }
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented):
///
/// ```json
/// [
///   { "id": 1, "age": "34", "gender": "Мужской", "adminarea": null },
///   ...
/// ]
/// ```
///
/// A batch envelope `{ "records": [...] }` is accepted as well.
pub fn parse_json(text: &str) -> Result<RecordTable> {
    let root: JsonValue = serde_json::from_str(text).context("parsing JSON")?;
    json_to_table(root)
}

/// Convert an already parsed JSON document into a table.
pub fn json_to_table(root: JsonValue) -> Result<RecordTable> {
    let records = match root {
        JsonValue::Array(records) => records,
        JsonValue::Object(mut obj) => match obj.remove("records") {
            Some(JsonValue::Array(records)) => records,
            _ => bail!("Expected top-level JSON array or an object with a 'records' array"),
        },
        _ => bail!("Expected top-level JSON array"),
    };

    let mut rows = Vec::with_capacity(records.len());
    for (i, rec) in records.into_iter().enumerate() {
        let JsonValue::Object(obj) = rec else {
            bail!("Row {i} is not a JSON object");
        };
        rows.push(
            obj.into_iter()
                .map(|(key, val)| (key, json_to_cell(val)))
                .collect(),
        );
    }

    Ok(RecordTable::from_ordered_rows(rows))
}

fn json_to_cell(val: JsonValue) -> CellValue {
    match val {
        JsonValue::String(s) => CellValue::Text(s),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                CellValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                CellValue::Float(f)
            } else {
                CellValue::Text(n.to_string())
            }
        }
        JsonValue::Bool(b) => CellValue::Bool(b),
        JsonValue::Null => CellValue::Null,
        other => CellValue::Text(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, fields separated by
/// `options.delimiter`.
///
/// Types are decided per column: a column whose non-empty fields all parse
/// as numbers (with `options.decimal` as decimal separator) is numeric,
/// anything else keeps every field as text. Empty fields and fields listed
/// in `options.na_values` are null.
pub fn parse_csv<R: Read>(input: R, options: &LoadOptions) -> Result<RecordTable> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .flexible(true)
        .from_reader(input);
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut raw: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    let mut n_rows = 0;

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        for (col_idx, column) in raw.iter_mut().enumerate() {
            let field = record.get(col_idx).unwrap_or("");
            column.push((!options.is_na(field)).then(|| field.to_string()));
        }
        n_rows += 1;
    }

    let columns = headers
        .into_iter()
        .zip(raw)
        .map(|(name, fields)| Column::new(name, infer_csv_column(fields, options.decimal)))
        .collect();

    Ok(RecordTable::from_columns(n_rows, columns))
}

fn infer_csv_column(fields: Vec<Option<String>>, decimal: char) -> Vec<CellValue> {
    let parsed: Vec<Option<CellValue>> = fields
        .iter()
        .map(|f| f.as_deref().and_then(|s| parse_locale_number(s, decimal)))
        .collect();
    let numeric = fields
        .iter()
        .zip(&parsed)
        .all(|(field, num)| field.is_none() || num.is_some());

    if numeric {
        parsed
            .into_iter()
            .map(|v| v.unwrap_or(CellValue::Null))
            .collect()
    } else {
        fields
            .into_iter()
            .map(|f| f.map(CellValue::Text).unwrap_or(CellValue::Null))
            .collect()
    }
}

/// Parse a number written with `decimal` as decimal separator.
fn parse_locale_number(s: &str, decimal: char) -> Option<CellValue> {
    if decimal == '.' {
        return CellValue::parse_number(s);
    }
    if s.contains('.') {
        return None;
    }
    CellValue::parse_number(&s.replacen(decimal, ".", 1))
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a flat Parquet file.
///
/// Utf8, integer, float, boolean and Date32 columns are supported; dates
/// are rendered as `YYYY-MM-DD` text. Other types are rendered with their
/// Arrow type name so the column still reaches the pipeline as text.
fn load_parquet(path: &Path) -> Result<RecordTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let mut columns: Vec<Column> = builder
        .schema()
        .fields()
        .iter()
        .map(|field| Column::new(field.name().clone(), Vec::new()))
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut n_rows = 0;
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for (column, array) in columns.iter_mut().zip(batch.columns()) {
            for row in 0..batch.num_rows() {
                let value = extract_cell(array, row).with_context(|| {
                    format!("Row {}: failed to read '{}'", n_rows + row, column.name)
                })?;
                column.values.push(value);
            }
        }
        n_rows += batch.num_rows();
    }

    Ok(RecordTable::from_columns(n_rows, columns))
}

// -- Parquet / Arrow helpers --

fn downcast<'a, T: 'static>(col: &'a Arc<dyn Array>) -> Result<&'a T> {
    col.as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("unexpected array layout for {:?}", col.data_type()))
}

/// Extract a single cell from an Arrow column at a given row.
fn extract_cell(col: &Arc<dyn Array>, row: usize) -> Result<CellValue> {
    if col.is_null(row) {
        return Ok(CellValue::Null);
    }
    let value = match col.data_type() {
        DataType::Utf8 => CellValue::Text(downcast::<StringArray>(col)?.value(row).to_string()),
        DataType::LargeUtf8 => CellValue::Text(col.as_string::<i64>().value(row).to_string()),
        DataType::Int32 => CellValue::Integer(downcast::<Int32Array>(col)?.value(row) as i64),
        DataType::Int64 => CellValue::Integer(downcast::<Int64Array>(col)?.value(row)),
        DataType::Float32 => CellValue::Float(downcast::<Float32Array>(col)?.value(row) as f64),
        DataType::Float64 => CellValue::Float(downcast::<Float64Array>(col)?.value(row)),
        DataType::Boolean => CellValue::Bool(downcast::<BooleanArray>(col)?.value(row)),
        DataType::Date32 => match downcast::<Date32Array>(col)?.value_as_date(row) {
            Some(date) => CellValue::Text(date.format("%Y-%m-%d").to_string()),
            None => CellValue::Null,
        },
        other => CellValue::Text(format!("{other:?}")),
    };
    Ok(value)
}
