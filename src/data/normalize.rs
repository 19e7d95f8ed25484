use log::debug;

use crate::config::PipelineConfig;

use super::model::{CellValue, Column, RecordTable};

// ---------------------------------------------------------------------------
// Column classification
// ---------------------------------------------------------------------------

/// How a column is interpreted, decided once per column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Every value counts as a number (possibly after parsing text).
    Numeric,
    /// Free text, or numbers mixed with text below the conversion threshold.
    Categorical,
    /// No non-null values to decide from.
    Unresolved,
}

/// Counts gathered in one pass over a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColumnProfile {
    pub non_null: usize,
    pub convertible: usize,
    pub text: usize,
}

impl ColumnProfile {
    pub fn of(column: &Column) -> Self {
        column.non_null().fold(Self::default(), |mut p, v| {
            p.non_null += 1;
            if v.to_number().is_some() {
                p.convertible += 1;
            }
            if v.is_text() {
                p.text += 1;
            }
            p
        })
    }

    /// Share of non-null values that convert to a number.
    pub fn numeric_ratio(&self) -> f64 {
        if self.non_null == 0 {
            return 0.0;
        }
        self.convertible as f64 / self.non_null as f64
    }

    /// Classify: numeric when every value converts, or when the converting
    /// share is strictly above `threshold`.
    pub fn kind(&self, threshold: f64) -> ColumnKind {
        if self.non_null == 0 {
            ColumnKind::Unresolved
        } else if self.convertible == self.non_null || self.numeric_ratio() > threshold {
            ColumnKind::Numeric
        } else {
            ColumnKind::Categorical
        }
    }

    pub fn has_text(&self) -> bool {
        self.text > 0
    }
}

/// Replace every cell with its numeric conversion; failures become null.
pub fn coerce_numeric(column: &mut Column) {
    for v in column.values.iter_mut() {
        *v = v.to_number().unwrap_or(CellValue::Null);
    }
}

/// Render non-text, non-null cells to their text form.
fn coerce_text(column: &mut Column) {
    for v in column.values.iter_mut() {
        if !v.is_null() && !v.is_text() {
            *v = CellValue::Text(v.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Resolve each column of `table` to an unambiguous numeric or text type.
///
/// * text columns whose non-null values all parse as numbers become numeric
/// * columns mixing numbers and non-numeric text are kept as text, with
///   numbers rendered to strings so the column is uniformly typed
/// * all-null columns are left as they are
///
/// Running it twice yields the same table as running it once.
pub fn normalize(mut table: RecordTable, config: &PipelineConfig) -> RecordTable {
    let mut converted = 0usize;
    let mut kept_text = 0usize;

    for column in table.columns_mut() {
        let profile = ColumnProfile::of(column);
        match profile.kind(1.0) {
            ColumnKind::Unresolved => {}
            ColumnKind::Numeric => {
                if profile.has_text() {
                    coerce_numeric(column);
                    converted += 1;
                }
            }
            ColumnKind::Categorical => {
                let mixed = profile.convertible > 0;
                if mixed && !config.keep_mixed_columns_as_text {
                    coerce_numeric(column);
                    converted += 1;
                } else {
                    coerce_text(column);
                    if mixed {
                        kept_text += 1;
                    }
                }
            }
        }
    }

    debug!(
        "normalized {} columns: {converted} converted to numeric, {kept_text} mixed kept as text",
        table.n_cols()
    );
    table
}
