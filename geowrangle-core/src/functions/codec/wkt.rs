//! (E)WKT codec.

use geo::Geometry;
use geozero::{ToGeo, ToWkt};

use crate::error::{GeoWrangleError, Result};
use crate::geometry::GeometryValue;

/// Split an optional `SRID=n;` prefix off EWKT text.
fn split_srid(text: &str) -> Result<(Option<i32>, &str)> {
    let trimmed = text.trim();
    let Some(rest) = trimmed
        .strip_prefix("SRID=")
        .or_else(|| trimmed.strip_prefix("srid="))
    else {
        return Ok((None, trimmed));
    };
    let (srid, wkt) = rest.split_once(';').ok_or_else(|| GeoWrangleError::Decode {
        format: "WKT",
        reason: "SRID prefix without ';'".to_string(),
    })?;
    let srid = srid.trim().parse::<i32>().map_err(|e| GeoWrangleError::Decode {
        format: "WKT",
        reason: format!("invalid SRID '{srid}': {e}"),
    })?;
    Ok((Some(srid), wkt.trim()))
}

pub fn decode(text: &str) -> Result<GeometryValue> {
    let (srid, wkt) = split_srid(text)?;
    let geom: Geometry<f64> = geozero::wkt::Wkt(wkt.as_bytes()).to_geo()?;
    Ok(GeometryValue::new(geom)?.with_srid(srid))
}

/// Space out a compact WKT string: `POINT(1 2)` → `POINT (1 2)`,
/// `(0 0,1 1)` → `(0 0, 1 1)`.
pub(crate) fn canonical_spacing(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    let mut prev: Option<char> = None;
    for c in raw.chars() {
        match (prev, c) {
            (Some(p), '(') if p.is_ascii_alphabetic() => out.push(' '),
            (Some(','), ch) if ch != ' ' => out.push(' '),
            _ => {}
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// WKT text, prefixed with `SRID=n;` when the value carries an SRID.
pub fn encode(value: &GeometryValue) -> Result<String> {
    let wkt = canonical_spacing(&value.geometry().to_wkt()?);
    Ok(match value.srid() {
        Some(srid) => format!("SRID={srid};{wkt}"),
        None => wkt,
    })
}
