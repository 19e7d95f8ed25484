use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// CellValue – a single cell of an input table
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value mirroring common dataframe dtypes.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => write!(f, "{s}"),
            CellValue::Integer(i) => write!(f, "{i}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Null => write!(f, "<null>"),
        }
    }
}

impl CellValue {
    /// Nulls and NaN floats both count as missing.
    pub fn is_null(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Float(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Whether the cell already carries a number (bools count as 0/1).
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CellValue::Integer(_) | CellValue::Float(_) | CellValue::Bool(_)
        ) && !self.is_null()
    }

    pub fn is_text(&self) -> bool {
        matches!(self, CellValue::Text(_))
    }

    /// Interpret the value as an `f64` without parsing text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Float(v) if !v.is_nan() => Some(*v),
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Text form used for category lookups; `None` for missing values.
    pub fn category_key(&self) -> Option<String> {
        if self.is_null() {
            return None;
        }
        Some(match self {
            CellValue::Text(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Parse text into a number. Integral text becomes `Integer`.
    ///
    /// Surrounding whitespace is accepted; `nan`, `inf` and empty strings
    /// are not considered numbers.
    pub fn parse_number(s: &str) -> Option<CellValue> {
        let t = s.trim();
        if t.is_empty() {
            return None;
        }
        if let Ok(i) = t.parse::<i64>() {
            return Some(CellValue::Integer(i));
        }
        match t.parse::<f64>() {
            Ok(f) if f.is_finite() => Some(CellValue::Float(f)),
            _ => None,
        }
    }

    /// Numeric conversion of a single cell, parsing text when needed.
    pub fn to_number(&self) -> Option<CellValue> {
        match self {
            CellValue::Text(s) => CellValue::parse_number(s),
            CellValue::Bool(b) => Some(CellValue::Integer(*b as i64)),
            v if v.is_numeric() => Some(v.clone()),
            _ => None,
        }
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Float(v)
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Integer(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Text(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Text(v)
    }
}

// ---------------------------------------------------------------------------
// Column / RecordTable – the raw input, stored column-wise
// ---------------------------------------------------------------------------

/// One named column; `values.len()` equals the table's row count.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<CellValue>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<CellValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    /// Column filled with a single repeated value.
    pub fn constant(name: impl Into<String>, value: CellValue, n_rows: usize) -> Self {
        Self::new(name, vec![value; n_rows])
    }

    pub fn non_null(&self) -> impl Iterator<Item = &CellValue> {
        self.values.iter().filter(|v| !v.is_null())
    }

    pub fn has_text(&self) -> bool {
        self.values.iter().any(CellValue::is_text)
    }
}

/// An ordered set of equally long columns.
///
/// Column order is the order of first appearance in the source; the row
/// count is tracked separately so a table without columns still knows how
/// many records it holds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordTable {
    n_rows: usize,
    columns: Vec<Column>,
}

impl RecordTable {
    /// Empty table with `n_rows` records and no columns.
    pub fn with_rows(n_rows: usize) -> Self {
        Self {
            n_rows,
            columns: Vec::new(),
        }
    }

    /// Build from columns. Panics on ragged input.
    pub fn from_columns(n_rows: usize, columns: Vec<Column>) -> Self {
        let mut table = Self::with_rows(n_rows);
        for col in columns {
            table.set_column(col);
        }
        table
    }

    /// Build from row mappings. Columns missing from a row become null.
    pub fn from_rows(rows: Vec<BTreeMap<String, CellValue>>) -> Self {
        Self::from_ordered_rows(
            rows.into_iter()
                .map(|r| r.into_iter().collect::<Vec<_>>())
                .collect(),
        )
    }

    /// Build from rows given as ordered `(column, value)` pairs.
    pub fn from_ordered_rows(rows: Vec<Vec<(String, CellValue)>>) -> Self {
        let n_rows = rows.len();
        let mut table = Self::with_rows(n_rows);
        let mut index: BTreeMap<String, usize> = BTreeMap::new();

        for (row_idx, row) in rows.into_iter().enumerate() {
            for (name, value) in row {
                let col_idx = *index.entry(name.clone()).or_insert_with(|| {
                    table
                        .columns
                        .push(Column::constant(name, CellValue::Null, n_rows));
                    table.columns.len() - 1
                });
                table.columns[col_idx].values[row_idx] = value;
            }
        }
        table
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Insert or replace a column, keeping the position of a replaced one.
    pub fn set_column(&mut self, column: Column) {
        assert_eq!(
            column.values.len(),
            self.n_rows,
            "column '{}' has {} values, table has {} rows",
            column.name,
            column.values.len(),
            self.n_rows
        );
        match self.position(&column.name) {
            Some(idx) => self.columns[idx] = column,
            None => self.columns.push(column),
        }
    }

    /// Remove a column if present.
    pub fn drop_column(&mut self, name: &str) -> Option<Column> {
        self.position(name).map(|idx| self.columns.remove(idx))
    }

    /// Value at (`row`, `name`), null when the column is absent.
    pub fn get(&self, row: usize, name: &str) -> &CellValue {
        self.column(name)
            .and_then(|c| c.values.get(row))
            .unwrap_or(&CellValue::Null)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, CellValue)]) -> BTreeMap<String, CellValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn from_rows_fills_missing_cells_with_null() {
        let table = RecordTable::from_rows(vec![
            row(&[("a", 1i64.into())]),
            row(&[("b", "x".into())]),
        ]);
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.get(0, "b"), &CellValue::Null);
        assert_eq!(table.get(1, "a"), &CellValue::Null);
        assert_eq!(table.get(1, "b"), &CellValue::Text("x".into()));
    }

    #[test]
    fn ordered_rows_keep_first_appearance_order() {
        let table = RecordTable::from_ordered_rows(vec![
            vec![("z".into(), 1i64.into()), ("a".into(), 2i64.into())],
            vec![("m".into(), 3i64.into())],
        ]);
        assert_eq!(table.column_names(), vec!["z", "a", "m"]);
    }

    #[test]
    fn set_column_replaces_in_place() {
        let mut table = RecordTable::from_columns(
            1,
            vec![
                Column::new("a", vec![1i64.into()]),
                Column::new("b", vec![2i64.into()]),
            ],
        );
        table.set_column(Column::new("a", vec![9i64.into()]));
        assert_eq!(table.column_names(), vec!["a", "b"]);
        assert_eq!(table.get(0, "a"), &CellValue::Integer(9));
    }

    #[test]
    fn parse_number_accepts_ints_and_floats() {
        assert_eq!(CellValue::parse_number(" 34 "), Some(CellValue::Integer(34)));
        assert_eq!(CellValue::parse_number("13.5"), Some(CellValue::Float(13.5)));
        assert_eq!(CellValue::parse_number("n/a"), None);
        assert_eq!(CellValue::parse_number("nan"), None);
        assert_eq!(CellValue::parse_number(""), None);
    }

    #[test]
    fn nan_counts_as_null() {
        assert!(CellValue::Float(f64::NAN).is_null());
        assert!(!CellValue::Float(f64::NAN).is_numeric());
        assert_eq!(CellValue::Float(f64::NAN).category_key(), None);
    }

    #[test]
    fn category_key_uses_text_form() {
        assert_eq!(CellValue::Integer(5).category_key().as_deref(), Some("5"));
        assert_eq!(CellValue::from("Москва").category_key().as_deref(), Some("Москва"));
    }
}
