//! Feature engineering and alignment.
//!
//! Turns a normalized [`RecordTable`] of arbitrary shape into the exact
//! matrix the model was fitted on. The steps run in a fixed order because
//! later steps read columns produced by earlier ones:
//!
//! 1. fill missing categories of target-encoded columns
//! 2. derive `num_unique_regions`
//! 3. target-encode categorical columns into `<name>_te`
//! 4. derive `period_year`
//! 5. derive `is_male`
//! 6. drop encoded, scaffold and leaky columns
//! 7. synthesize absent features from medians (or zero)
//! 8. align columns to the expected feature order
//! 9. coerce aligned columns to numbers and fill the remaining gaps

use chrono::{Datelike, NaiveDate};
use log::debug;

use crate::artifacts::{ModelArtifacts, TargetEncoding};
use crate::config::PipelineConfig;
use crate::data::model::{CellValue, Column, RecordTable};
use crate::data::normalize::{ColumnKind, ColumnProfile, coerce_numeric};
use crate::error::PredictError;

pub const REGIONS_COLUMN: &str = "dp_address_unique_regions";
pub const NUM_REGIONS_FEATURE: &str = "num_unique_regions";
pub const PERIOD_COLUMN: &str = "period_last_act_ad";
pub const PERIOD_YEAR_FEATURE: &str = "period_year";
pub const GENDER_COLUMN: &str = "gender";
pub const IS_MALE_FEATURE: &str = "is_male";
pub const TE_SUFFIX: &str = "_te";

const PERIOD_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// FeatureMatrix
// ---------------------------------------------------------------------------

/// Model-ready input: one row per input record, columns in the model's
/// expected order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    n_rows: usize,
    columns: Vec<Column>,
}

impl FeatureMatrix {
    pub fn new(n_rows: usize, columns: Vec<Column>) -> Self {
        debug_assert!(columns.iter().all(|c| c.values.len() == n_rows));
        Self { n_rows, columns }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.n_rows, self.n_cols())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Value at (`row`, `name`).
    pub fn get(&self, row: usize, name: &str) -> Option<&CellValue> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .and_then(|c| c.values.get(row))
    }

    /// Row-major `f64` copy. Missing values become NaN; text cells are an
    /// error.
    pub fn to_dense(&self) -> Result<Vec<f64>, PredictError> {
        let mut out = Vec::with_capacity(self.n_rows * self.n_cols());
        for row in 0..self.n_rows {
            for col in &self.columns {
                let cell = &col.values[row];
                match cell {
                    CellValue::Text(s) => {
                        return Err(PredictError::NonNumeric {
                            column: col.name.clone(),
                            value: s.clone(),
                        });
                    }
                    other => out.push(other.as_f64().unwrap_or(f64::NAN)),
                }
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Build the aligned feature matrix for `table`.
///
/// Never fails: absent columns, unseen categories and malformed values all
/// have a fallback. The result always has exactly
/// `artifacts.expected_features` as columns, in that order, and one row per
/// input record.
pub fn build(table: &RecordTable, artifacts: &ModelArtifacts, config: &PipelineConfig) -> FeatureMatrix {
    let mut df = table.clone();
    let te_columns = artifacts.target_encoding_columns();

    fill_unknown_categories(&mut df, te_columns, &config.unknown_category);
    derive_region_count(&mut df, &config.unknown_category);
    apply_target_encoding(&mut df, te_columns, artifacts);
    derive_period_year(&mut df);
    derive_is_male(&mut df, &config.male_marker);
    drop_columns(&mut df, artifacts, config);
    complete_features(&mut df, artifacts);

    let mut columns = align(&df, artifacts.expected_features());
    for column in &mut columns {
        finalize_column(column, artifacts, config);
    }

    FeatureMatrix::new(table.n_rows(), columns)
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Step 1: missing values of target-encoded columns become a category.
fn fill_unknown_categories(df: &mut RecordTable, te_columns: &[String], unknown: &str) {
    for name in te_columns {
        if let Some(col) = df.column_mut(name) {
            for v in col.values.iter_mut().filter(|v| v.is_null()) {
                *v = CellValue::Text(unknown.to_string());
            }
        }
    }
}

/// Step 2: number of comma-separated regions, 0 for missing or unknown.
fn derive_region_count(df: &mut RecordTable, unknown: &str) {
    let Some(col) = df.column(REGIONS_COLUMN) else {
        return;
    };
    let counts = col
        .values
        .iter()
        .map(|v| match v.category_key() {
            Some(s) if s != unknown => CellValue::Integer(s.split(',').count() as i64),
            _ => CellValue::Integer(0),
        })
        .collect();
    df.set_column(Column::new(NUM_REGIONS_FEATURE, counts));
}

/// Step 3: `<name>_te` for every target-encoded column with statistics.
fn apply_target_encoding(df: &mut RecordTable, te_columns: &[String], artifacts: &ModelArtifacts) {
    for name in te_columns {
        let Some(col) = df.column(name) else {
            continue;
        };
        let Some(encoding) = artifacts.target_encoding(name) else {
            debug!("no target-encoding statistics for '{name}', skipping");
            continue;
        };
        let (encoded, unmapped) = encode_column(col, encoding);
        if unmapped > 0 {
            debug!("'{name}': {unmapped} values without a mapping, using global mean");
        }
        df.set_column(Column::new(format!("{name}{TE_SUFFIX}"), encoded));
    }
}

/// Map each value through the category means; unseen categories fall back
/// to the global mean. Returns the encoded values and the fallback count.
pub fn encode_column(col: &Column, encoding: &TargetEncoding) -> (Vec<CellValue>, usize) {
    let mut unmapped = 0;
    let values = col
        .values
        .iter()
        .map(|v| {
            let mean = v
                .category_key()
                .and_then(|key| encoding.mapping.get(&key).copied());
            match mean.or_else(|| {
                unmapped += 1;
                encoding.global_mean
            }) {
                Some(m) => CellValue::Float(m),
                None => CellValue::Null,
            }
        })
        .collect();
    (values, unmapped)
}

/// Step 4: calendar year of `period_last_act_ad`, 0 when unparseable.
fn derive_period_year(df: &mut RecordTable) {
    let Some(col) = df.column(PERIOD_COLUMN) else {
        return;
    };
    let years = col
        .values
        .iter()
        .map(|v| CellValue::Integer(parse_year(v).unwrap_or(0)))
        .collect();
    df.set_column(Column::new(PERIOD_YEAR_FEATURE, years));
}

fn parse_year(v: &CellValue) -> Option<i64> {
    let text = v.as_text()?;
    NaiveDate::parse_from_str(text.trim(), PERIOD_FORMAT)
        .ok()
        .map(|d| d.year() as i64)
}

/// Step 5: 1 when `gender` equals the male marker, else 0.
fn derive_is_male(df: &mut RecordTable, male_marker: &str) {
    let Some(col) = df.column(GENDER_COLUMN) else {
        return;
    };
    let flags = col
        .values
        .iter()
        .map(|v| CellValue::Integer((v.as_text() == Some(male_marker)) as i64))
        .collect();
    df.set_column(Column::new(IS_MALE_FEATURE, flags));
}

/// Step 6: encoded sources, raw date/gender, housekeeping columns and the
/// offline drop list. Absent columns are ignored.
fn drop_columns(df: &mut RecordTable, artifacts: &ModelArtifacts, config: &PipelineConfig) {
    let fixed = [PERIOD_COLUMN, GENDER_COLUMN];
    let names = artifacts
        .target_encoding_columns()
        .iter()
        .map(String::as_str)
        .chain(fixed)
        .chain(config.housekeeping_columns.iter().map(String::as_str))
        .chain(artifacts.columns_to_drop().iter().map(String::as_str));

    let mut dropped = 0;
    for name in names {
        if df.drop_column(name).is_some() {
            dropped += 1;
        }
    }
    debug!("dropped {dropped} columns before alignment");
}

/// Step 7: synthesize every expected feature the table lacks.
fn complete_features(df: &mut RecordTable, artifacts: &ModelArtifacts) {
    let n_rows = df.n_rows();
    let mut synthesized = Vec::new();
    for name in artifacts.expected_features() {
        if df.contains(name) {
            continue;
        }
        let fill = match artifacts.median(name) {
            Some(m) => CellValue::Float(m),
            None => CellValue::Integer(0),
        };
        df.set_column(Column::constant(name.clone(), fill, n_rows));
        synthesized.push(name.as_str());
    }
    if !synthesized.is_empty() {
        debug!("synthesized {} missing features: {synthesized:?}", synthesized.len());
    }
}

/// Step 8: exactly `expected`, in order; everything else is discarded.
/// A name listed twice gets its own copy of the column each time.
fn align(df: &RecordTable, expected: &[String]) -> Vec<Column> {
    let n_rows = df.n_rows();
    expected
        .iter()
        .map(|name| {
            df.column(name)
                .cloned()
                .unwrap_or_else(|| Column::constant(name.clone(), CellValue::Integer(0), n_rows))
        })
        .collect()
}

/// Step 9: numeric coercion and gap filling for one aligned column.
///
/// Text columns convert when more than `numeric_coercion_threshold` of
/// their non-null values parse; values that don't become null. Nulls are
/// then filled with the column median when one exists, otherwise with 0
/// for numeric columns. Text columns without a median keep their nulls.
fn finalize_column(column: &mut Column, artifacts: &ModelArtifacts, config: &PipelineConfig) {
    let profile = ColumnProfile::of(column);
    let kind = profile.kind(config.numeric_coercion_threshold);

    if kind == ColumnKind::Numeric && profile.has_text() {
        coerce_numeric(column);
    }

    let fill = match (artifacts.median(&column.name), kind) {
        (Some(m), _) => Some(CellValue::Float(m)),
        (None, ColumnKind::Numeric | ColumnKind::Unresolved) => Some(CellValue::Integer(0)),
        (None, ColumnKind::Categorical) => None,
    };
    if let Some(fill) = fill {
        for v in column.values.iter_mut().filter(|v| v.is_null()) {
            *v = fill.clone();
        }
    }

    if kind == ColumnKind::Categorical {
        debug!(
            "feature '{}' has no numeric interpretation ({:.0}% convertible)",
            column.name,
            profile.numeric_ratio() * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use super::*;
    use crate::artifacts::Metadata;
    use crate::model::LinearModel;

    fn artifacts_with(
        features: &[&str],
        median: &[(&str, f64)],
        te: &[(&str, &[(&str, f64)], Option<f64>)],
        te_columns: Option<Vec<String>>,
        columns_to_drop: Vec<String>,
    ) -> ModelArtifacts {
        let metadata = Metadata {
            features: features.iter().map(|s| s.to_string()).collect(),
            median_fill: median.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            te_columns: te_columns
                .unwrap_or_else(|| te.iter().map(|(c, _, _)| c.to_string()).collect()),
        };
        let stats = te
            .iter()
            .map(|(c, mapping, global)| {
                (
                    c.to_string(),
                    TargetEncoding {
                        mapping: mapping.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                        global_mean: *global,
                    },
                )
            })
            .collect();
        let model = LinearModel {
            feature_names: None,
            weights: vec![0.0; features.len()],
            bias: 0.0,
        };
        ModelArtifacts::new(Arc::new(model), metadata, stats, columns_to_drop)
    }

    fn artifacts(
        features: &[&str],
        median: &[(&str, f64)],
        te: &[(&str, &[(&str, f64)], Option<f64>)],
    ) -> ModelArtifacts {
        artifacts_with(features, median, te, None, vec![])
    }

    fn one_row(pairs: &[(&str, CellValue)]) -> RecordTable {
        let row: BTreeMap<String, CellValue> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        RecordTable::from_rows(vec![row])
    }

    #[test]
    fn reference_scenario() {
        let a = artifacts(
            &["age", "is_male", "adminarea_te"],
            &[("age", 30.0)],
            &[("adminarea", &[("Unknown", 50000.0)], Some(45000.0))],
        );
        let raw = one_row(&[
            ("adminarea", CellValue::Null),
            ("age", "34".into()),
            ("gender", "Мужской".into()),
        ]);
        let cfg = PipelineConfig::default();
        let table = crate::data::normalize::normalize(raw, &cfg);
        let m = build(&table, &a, &cfg);

        assert_eq!(m.column_names(), vec!["age", "is_male", "adminarea_te"]);
        assert_eq!(m.to_dense().unwrap(), vec![34.0, 1.0, 50000.0]);
    }

    #[test]
    fn repeated_feature_name_copies_the_column() {
        let a = artifacts(&["age", "age"], &[], &[]);
        let t = one_row(&[("age", CellValue::Integer(50))]);
        let m = build(&t, &a, &PipelineConfig::default());
        assert_eq!(m.column_names(), vec!["age", "age"]);
        assert_eq!(m.to_dense().unwrap(), vec![50.0, 50.0]);
    }

    #[test]
    fn zero_column_input_is_fully_synthesized() {
        let a = artifacts(&["x", "y", "z"], &[("y", 2.5)], &[]);
        let m = build(&RecordTable::with_rows(3), &a, &PipelineConfig::default());
        assert_eq!(m.shape(), (3, 3));
        assert_eq!(
            m.to_dense().unwrap(),
            vec![0.0, 2.5, 0.0, 0.0, 2.5, 0.0, 0.0, 2.5, 0.0]
        );
    }

    #[test]
    fn unseen_category_uses_global_mean() {
        let a = artifacts(
            &["city_te"],
            &[],
            &[("city", &[("Москва", 90.0)], Some(40.0))],
        );
        let t = RecordTable::from_columns(
            3,
            vec![Column::new(
                "city",
                vec!["Москва".into(), "Тверь".into(), CellValue::Null],
            )],
        );
        let m = build(&t, &a, &PipelineConfig::default());
        assert_eq!(m.to_dense().unwrap(), vec![90.0, 40.0, 40.0]);
    }

    #[test]
    fn flat_mapping_without_global_mean_falls_back_to_fill() {
        let a = artifacts(&["city_te"], &[("city_te", 7.0)], &[("city", &[("A", 1.0)], None)]);
        let t = RecordTable::from_columns(2, vec![Column::new("city", vec!["A".into(), "B".into()])]);
        let m = build(&t, &a, &PipelineConfig::default());
        assert_eq!(m.to_dense().unwrap(), vec![1.0, 7.0]);
    }

    #[test]
    fn te_column_without_stats_is_skipped_and_dropped() {
        let a = artifacts_with(
            &["addrref", "addrref_te"],
            &[],
            &[],
            Some(vec!["addrref".into()]),
            vec![],
        );
        let t = RecordTable::from_columns(1, vec![Column::new("addrref", vec!["x".into()])]);
        let m = build(&t, &a, &PipelineConfig::default());
        assert_eq!(m.to_dense().unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn region_count_and_period_year() {
        let a = artifacts(&["num_unique_regions", "period_year"], &[], &[]);
        let t = RecordTable::from_columns(
            3,
            vec![
                Column::new(
                    REGIONS_COLUMN,
                    vec!["Москва,Тверь,Псков".into(), "Unknown".into(), CellValue::Null],
                ),
                Column::new(
                    PERIOD_COLUMN,
                    vec!["2023-05-17".into(), "17.05.2023".into(), CellValue::Null],
                ),
            ],
        );
        let m = build(&t, &a, &PipelineConfig::default());
        assert_eq!(m.to_dense().unwrap(), vec![3.0, 2023.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn gender_other_than_marker_is_zero() {
        let a = artifacts(&["is_male"], &[], &[]);
        let t = RecordTable::from_columns(
            3,
            vec![Column::new(
                GENDER_COLUMN,
                vec!["Женский".into(), "Мужской".into(), CellValue::Null],
            )],
        );
        let m = build(&t, &a, &PipelineConfig::default());
        assert_eq!(m.to_dense().unwrap(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn drop_list_removes_leaky_columns_before_alignment() {
        let a = artifacts_with(
            &["leak", "dt", "gender"],
            &[("leak", 5.0)],
            &[],
            None,
            vec!["leak".into()],
        );
        let t = RecordTable::from_columns(
            1,
            vec![
                Column::new("leak", vec![CellValue::Integer(999)]),
                Column::new("dt", vec!["2024-01-01".into()]),
                Column::new("gender", vec!["Мужской".into()]),
            ],
        );
        let m = build(&t, &a, &PipelineConfig::default());
        // dropped, then re-synthesized from median / zero
        assert_eq!(m.to_dense().unwrap(), vec![5.0, 0.0, 0.0]);
    }

    #[test]
    fn extra_columns_are_discarded() {
        let a = artifacts(&["b", "a"], &[], &[]);
        let t = RecordTable::from_columns(
            1,
            vec![
                Column::new("a", vec![CellValue::Integer(1)]),
                Column::new("b", vec![CellValue::Integer(2)]),
                Column::new("c", vec![CellValue::Integer(3)]),
            ],
        );
        let m = build(&t, &a, &PipelineConfig::default());
        assert_eq!(m.column_names(), vec!["b", "a"]);
        assert_eq!(m.to_dense().unwrap(), vec![2.0, 1.0]);
    }

    #[test]
    fn mostly_numeric_text_is_coerced() {
        let a = artifacts(&["score"], &[("score", 10.0)], &[]);
        let mut values: Vec<CellValue> = (0..20).map(|i| CellValue::Text(i.to_string())).collect();
        values.push("bad".into());
        let t = RecordTable::from_columns(21, vec![Column::new("score", values)]);
        let m = build(&t, &a, &PipelineConfig::default());
        let dense = m.to_dense().unwrap();
        assert_eq!(dense[3], 3.0);
        assert_eq!(dense[20], 10.0);
    }

    #[test]
    fn low_ratio_text_stays_text() {
        let a = artifacts(&["score"], &[("score", 10.0)], &[]);
        let t = RecordTable::from_columns(
            4,
            vec![Column::new(
                "score",
                vec!["12".into(), "13.5".into(), "n/a".into(), CellValue::Null],
            )],
        );
        let m = build(&t, &a, &PipelineConfig::default());
        assert_eq!(m.get(0, "score"), Some(&CellValue::from("12")));
        assert_eq!(m.get(3, "score"), Some(&CellValue::Float(10.0)));
        assert!(matches!(
            m.to_dense(),
            Err(PredictError::NonNumeric { .. })
        ));
    }

    #[test]
    fn numeric_nulls_without_median_become_zero() {
        let a = artifacts(&["x"], &[], &[]);
        let t = RecordTable::from_columns(
            2,
            vec![Column::new("x", vec![CellValue::Null, CellValue::Float(f64::NAN)])],
        );
        let m = build(&t, &a, &PipelineConfig::default());
        assert_eq!(m.to_dense().unwrap(), vec![0.0, 0.0]);
    }
}
