//! Geometry format detection and conversion.
//!
//! Every format has one codec module; [`decode`] and [`encode`] dispatch on
//! [`GeometryFormat`] with a plain `match`.

pub mod geojson;
pub mod wkb;
pub mod wkt;

use crate::error::{GeoWrangleError, Result};
use crate::geometry::{GeometryFormat, GeometryValue};
use crate::table::{FeatureTable, FieldValue};

/// Guess the encoding of one cell.
///
/// Attempts, in order: native geometry, WKB (raw or hex), WKT, GeoJSON.
///
/// # Example
///
/// ```
/// use geowrangle_core::functions::codec::infer_format;
/// use geowrangle_core::geometry::GeometryFormat;
/// use geowrangle_core::table::FieldValue;
///
/// assert_eq!(infer_format(&"POINT(1 2)".into()), GeometryFormat::Wkt);
/// assert_eq!(
///     infer_format(&r#"{"type":"Point","coordinates":[1,2]}"#.into()),
///     GeometryFormat::GeoJson
/// );
/// assert_eq!(infer_format(&FieldValue::Int(3)), GeometryFormat::Unknown);
/// ```
pub fn infer_format(sample: &FieldValue) -> GeometryFormat {
    match sample {
        FieldValue::Geometry(_) => GeometryFormat::Native,
        FieldValue::Bytes(blob) if wkb::decode_bytes(blob).is_ok() => GeometryFormat::Wkb,
        FieldValue::Text(text) => {
            if wkb::decode_hex(text).is_ok() {
                GeometryFormat::Wkb
            } else if wkt::decode(text).is_ok() {
                GeometryFormat::Wkt
            } else if geojson::decode(text).is_ok() {
                GeometryFormat::GeoJson
            } else {
                GeometryFormat::Unknown
            }
        }
        _ => GeometryFormat::Unknown,
    }
}

fn mismatch(format: GeometryFormat, value: &FieldValue) -> GeoWrangleError {
    GeoWrangleError::Decode {
        format: format.name(),
        reason: format!("cell holds {}", cell_kind(value)),
    }
}

fn cell_kind(value: &FieldValue) -> &'static str {
    match value {
        FieldValue::Null => "null",
        FieldValue::Bool(_) => "a boolean",
        FieldValue::Int(_) => "an integer",
        FieldValue::Float(_) => "a float",
        FieldValue::Text(_) => "text",
        FieldValue::Bytes(_) => "bytes",
        FieldValue::Geometry(_) => "a native geometry",
    }
}

/// Fallible decode. `Ok(None)` for a null cell.
pub fn try_decode(value: &FieldValue, format: GeometryFormat) -> Result<Option<GeometryValue>> {
    if value.is_null() {
        return Ok(None);
    }
    let decoded = match (format, value) {
        (GeometryFormat::Native, FieldValue::Geometry(g)) => g.clone(),
        (GeometryFormat::Wkb, FieldValue::Bytes(blob)) => wkb::decode_bytes(blob)?,
        (GeometryFormat::Wkb, FieldValue::Text(text)) => wkb::decode_hex(text)?,
        (GeometryFormat::Wkt, FieldValue::Text(text)) => wkt::decode(text)?,
        (GeometryFormat::GeoJson, FieldValue::Text(text)) => geojson::decode(text)?,
        (format, other) => return Err(mismatch(format, other)),
    };
    Ok(Some(decoded))
}

/// Lenient decode: malformed input logs a warning and yields `None`, so a
/// batch keeps going.
pub fn decode(value: &FieldValue, format: GeometryFormat) -> Option<GeometryValue> {
    match try_decode(value, format) {
        Ok(decoded) => decoded,
        Err(err) => {
            tracing::warn!(%format, error = %err, "dropping undecodable geometry");
            None
        }
    }
}

/// Encode into the cell representation of `format`.
///
/// WKB encodes to raw bytes; see [`encode_hex_wkb`] for hex text.
pub fn encode(value: &GeometryValue, format: GeometryFormat) -> Result<FieldValue> {
    Ok(match format {
        GeometryFormat::Native => FieldValue::Geometry(value.clone()),
        GeometryFormat::Wkb => FieldValue::Bytes(wkb::encode_bytes(value)?),
        GeometryFormat::Wkt => FieldValue::Text(wkt::encode(value)?),
        GeometryFormat::GeoJson => FieldValue::Text(geojson::encode(value)?),
        GeometryFormat::Unknown => {
            return Err(GeoWrangleError::InvalidInput(
                "cannot encode to an unknown format".to_string(),
            ))
        }
    })
}

pub fn encode_hex_wkb(value: &GeometryValue) -> Result<FieldValue> {
    Ok(FieldValue::Text(wkb::encode_hex(value)?))
}

/// Encode in `format`, matching the cell representation of `like`: WKB that
/// arrived as hex text goes back out as hex text.
pub fn encode_like(value: &GeometryValue, format: GeometryFormat, like: &FieldValue) -> Result<FieldValue> {
    match (format, like) {
        (GeometryFormat::Wkb, FieldValue::Text(_)) => encode_hex_wkb(value),
        _ => encode(value, format),
    }
}

/// Any-to-any conversion of one cell. Same-format conversion returns the
/// input untouched.
///
/// # Example
///
/// ```
/// use geowrangle_core::functions::codec::convert;
/// use geowrangle_core::geometry::GeometryFormat;
/// use geowrangle_core::table::FieldValue;
///
/// let hex: FieldValue = "010100000000000000006060400000000000003F40".into();
/// let wkt = convert(&hex, GeometryFormat::Wkb, GeometryFormat::Wkt).unwrap();
/// assert_eq!(wkt, FieldValue::Text("POINT (131 31)".to_string()));
/// ```
pub fn convert(value: &FieldValue, from: GeometryFormat, to: GeometryFormat) -> Result<FieldValue> {
    if from == to {
        return Ok(value.clone());
    }
    match try_decode(value, from)? {
        Some(decoded) => encode(&decoded, to),
        None => Ok(FieldValue::Null),
    }
}

/// Infer a column's format from its first non-null value.
///
/// An all-null column reports [`GeometryFormat::Unknown`]; callers decide
/// whether that is an error.
pub fn infer_column_format(table: &FeatureTable, column: &str) -> Result<GeometryFormat> {
    let values = table.column_values(column)?;
    Ok(values
        .into_iter()
        .find(|v| !v.is_null())
        .map_or(GeometryFormat::Unknown, infer_format))
}

/// Check that every non-null cell parses in the inferred format.
pub fn validate_column_format(table: &FeatureTable, column: &str) -> Result<GeometryFormat> {
    let format = infer_column_format(table, column)?;
    if format == GeometryFormat::Unknown {
        if table.column_values(column)?.iter().any(|v| !v.is_null()) {
            return Err(GeoWrangleError::UnsupportedFormat {
                column: column.to_string(),
            });
        }
        return Ok(format);
    }
    for (row, value) in table.column_values(column)?.into_iter().enumerate() {
        if !value.is_null() && try_decode(value, format).is_err() {
            return Err(GeoWrangleError::HeterogeneousColumn {
                column: column.to_string(),
                row,
                expected: format.name(),
            });
        }
    }
    Ok(format)
}

/// Decode a whole column with the format of its first non-null cell.
///
/// Returns the format so results can be re-encoded the same way. A column
/// whose representative cell is unrecognisable is an error; individual bad
/// cells are not.
pub fn decode_column(
    table: &FeatureTable,
    column: &str,
) -> Result<(GeometryFormat, Vec<Option<GeometryValue>>)> {
    let values = table.column_values(column)?;
    let format = infer_column_format(table, column)?;
    if format == GeometryFormat::Unknown {
        if values.iter().all(|v| v.is_null()) {
            return Ok((format, vec![None; values.len()]));
        }
        return Err(GeoWrangleError::UnsupportedFormat {
            column: column.to_string(),
        });
    }
    let decoded = values.into_iter().map(|v| decode(v, format)).collect();
    Ok((format, decoded))
}

/// Re-encode a geometry column in place.
pub fn convert_column(table: &FeatureTable, column: &str, to: GeometryFormat) -> Result<FeatureTable> {
    let (from, decoded) = decode_column(table, column)?;
    if from == to {
        return Ok(table.clone());
    }
    let encoded = decoded
        .iter()
        .map(|g| match g {
            Some(g) => encode(g, to),
            None => Ok(FieldValue::Null),
        })
        .collect::<Result<Vec<_>>>()?;
    table.clone().with_column(column, encoded)
}
