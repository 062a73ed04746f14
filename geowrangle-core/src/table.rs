//! Minimal tabular dataset the geometry layer consumes and produces.
//!
//! Readers and writers for CSV/Parquet/Shapefile live elsewhere; they hand
//! the core a [`FeatureTable`] and get one back.

use std::collections::HashSet;

use crate::error::{GeoWrangleError, Result};
use crate::geometry::GeometryValue;

/// A single cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Geometry(GeometryValue),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Numeric view used by coordinate columns and aggregates.
    /// NaN floats count as missing.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) if !v.is_nan() => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_geometry(&self) -> Option<&GeometryValue> {
        match self {
            FieldValue::Geometry(g) => Some(g),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<GeometryValue> for FieldValue {
    fn from(v: GeometryValue) -> Self {
        FieldValue::Geometry(v)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

/// Where a component reads row geometries from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeometrySource {
    /// An encoded (or native) geometry column.
    Column(String),
    /// A pair of numeric longitude/latitude columns.
    LonLat { lon: String, lat: String },
}

impl GeometrySource {
    pub fn column(name: impl Into<String>) -> Self {
        GeometrySource::Column(name.into())
    }

    pub fn lon_lat(lon: impl Into<String>, lat: impl Into<String>) -> Self {
        GeometrySource::LonLat {
            lon: lon.into(),
            lat: lat.into(),
        }
    }

    /// Fail fast when the columns this source needs are absent.
    pub fn check(&self, table: &FeatureTable) -> Result<()> {
        match self {
            GeometrySource::Column(name) => table.require_column(name).map(|_| ()),
            GeometrySource::LonLat { lon, lat } => {
                table.require_column(lon)?;
                table.require_column(lat)?;
                Ok(())
            }
        }
    }
}

/// Rows of attribute values plus a row index.
///
/// # Example
///
/// ```
/// use geowrangle_core::table::{FeatureTable, FieldValue};
///
/// let mut table = FeatureTable::new(["name", "lng", "lat"]);
/// table.push_row(vec!["a".into(), 120.1.into(), 30.2.into()]).unwrap();
/// assert_eq!(table.len(), 1);
/// assert_eq!(table.value(0, "lng"), Some(&FieldValue::Float(120.1)));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    index: Vec<i64>,
    rows: Vec<Vec<FieldValue>>,
}

impl FeatureTable {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            index: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Append a row whose index is its position.
    pub fn push_row(&mut self, values: Vec<FieldValue>) -> Result<()> {
        let index = self.rows.len() as i64;
        self.push_indexed_row(index, values)
    }

    pub fn push_indexed_row(&mut self, index: i64, values: Vec<FieldValue>) -> Result<()> {
        if values.len() != self.columns.len() {
            return Err(GeoWrangleError::InvalidInput(format!(
                "row has {} values but the table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.index.push(index);
        self.rows.push(values);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn index(&self) -> &[i64] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Position of a required column; a missing column is a precondition
    /// failure.
    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_position(name).ok_or_else(|| {
            GeoWrangleError::Precondition(format!("required column '{name}' is missing"))
        })
    }

    pub fn row(&self, row: usize) -> &[FieldValue] {
        &self.rows[row]
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&FieldValue> {
        let col = self.column_position(column)?;
        self.rows.get(row).map(|r| &r[col])
    }

    pub fn rows(&self) -> impl Iterator<Item = (i64, &[FieldValue])> {
        self.index
            .iter()
            .copied()
            .zip(self.rows.iter().map(Vec::as_slice))
    }

    /// Borrow one column top to bottom.
    pub fn column_values(&self, name: &str) -> Result<Vec<&FieldValue>> {
        let col = self.require_column(name)?;
        Ok(self.rows.iter().map(|r| &r[col]).collect())
    }

    /// Add a column, or replace it when the name already exists.
    pub fn with_column(mut self, name: &str, values: Vec<FieldValue>) -> Result<Self> {
        if values.len() != self.rows.len() {
            return Err(GeoWrangleError::InvalidInput(format!(
                "column '{name}' has {} values for {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        match self.column_position(name) {
            Some(col) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[col] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(self)
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if self.column_position(to).is_some() {
            return Err(GeoWrangleError::InvalidInput(format!(
                "cannot rename '{from}': column '{to}' already exists"
            )));
        }
        let col = self.require_column(from)?;
        self.columns[col] = to.to_string();
        Ok(())
    }

    /// Join and topology operations address rows by index, so it must be
    /// unique.
    pub fn ensure_unique_index(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.index.len());
        for &idx in &self.index {
            if !seen.insert(idx) {
                return Err(GeoWrangleError::Precondition(format!(
                    "duplicate row index {idx}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FeatureTable {
        let mut t = FeatureTable::new(["id", "value"]);
        t.push_row(vec![FieldValue::Int(1), 2.5.into()]).unwrap();
        t.push_row(vec![FieldValue::Int(2), FieldValue::Null]).unwrap();
        t
    }

    #[test]
    fn push_row_rejects_wrong_arity() {
        let mut t = FeatureTable::new(["a", "b"]);
        assert!(t.push_row(vec![FieldValue::Null]).is_err());
    }

    #[test]
    fn default_index_is_position() {
        assert_eq!(sample().index(), &[0, 1]);
    }

    #[test]
    fn duplicate_index_is_a_precondition_error() {
        let mut t = FeatureTable::new(["a"]);
        t.push_indexed_row(7, vec![FieldValue::Null]).unwrap();
        t.push_indexed_row(7, vec![FieldValue::Null]).unwrap();
        let err = t.ensure_unique_index().unwrap_err();
        assert!(matches!(err, GeoWrangleError::Precondition(_)));
    }

    #[test]
    fn missing_column_is_a_precondition_error() {
        let err = sample().require_column("geometry").unwrap_err();
        assert!(format!("{err}").contains("geometry"));
    }

    #[test]
    fn with_column_adds_then_replaces() {
        let t = sample()
            .with_column("flag", vec![FieldValue::Bool(true), FieldValue::Bool(false)])
            .unwrap();
        assert_eq!(t.columns().len(), 3);
        let t = t
            .with_column("flag", vec![FieldValue::Null, FieldValue::Null])
            .unwrap();
        assert_eq!(t.columns().len(), 3);
        assert_eq!(t.value(0, "flag"), Some(&FieldValue::Null));
    }

    #[test]
    fn rename_refuses_to_clobber() {
        let mut t = sample();
        assert!(t.rename_column("id", "value").is_err());
        t.rename_column("id", "id_origin").unwrap();
        assert_eq!(t.columns()[0], "id_origin");
    }

    #[test]
    fn as_f64_skips_nan_and_text() {
        assert_eq!(FieldValue::Float(f64::NAN).as_f64(), None);
        assert_eq!(FieldValue::from("1.5").as_f64(), None);
        assert_eq!(FieldValue::Int(3).as_f64(), Some(3.0));
    }

    #[test]
    fn lon_lat_source_checks_both_columns() {
        let src = GeometrySource::lon_lat("id", "missing");
        assert!(src.check(&sample()).is_err());
        assert!(GeometrySource::column("value").check(&sample()).is_ok());
    }
}
