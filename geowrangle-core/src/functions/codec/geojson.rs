//! GeoJSON codec.
//!
//! SRIDs travel in the legacy named `crs` member (`"EPSG:4326"` or the
//! `urn:ogc:def:crs:EPSG::4326` form). Feature objects decode to their
//! geometry.

use geo::Geometry;
use geozero::{ToGeo, ToJson};
use serde_json::{json, Map, Value};

use crate::error::{GeoWrangleError, Result};
use crate::geometry::GeometryValue;

fn decode_error(reason: impl Into<String>) -> GeoWrangleError {
    GeoWrangleError::Decode {
        format: "GeoJSON",
        reason: reason.into(),
    }
}

fn parse_crs_name(name: &str) -> Option<i32> {
    let code = name.rsplit(':').next()?;
    code.trim().parse().ok()
}

fn take_srid(object: &mut Map<String, Value>) -> Option<i32> {
    let crs = object.remove("crs")?;
    crs.get("properties")
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .and_then(parse_crs_name)
}

pub fn decode(text: &str) -> Result<GeometryValue> {
    let mut root: Value = serde_json::from_str(text)?;
    let object = root
        .as_object_mut()
        .ok_or_else(|| decode_error("top level is not an object"))?;
    let mut srid = take_srid(object);

    let mut geometry = if object.get("type").and_then(Value::as_str) == Some("Feature") {
        let mut inner = object
            .remove("geometry")
            .filter(|g| !g.is_null())
            .ok_or_else(|| decode_error("Feature without geometry"))?;
        if let Some(obj) = inner.as_object_mut() {
            srid = srid.or_else(|| take_srid(obj));
        }
        inner
    } else {
        root
    };
    if !geometry.is_object() {
        return Err(decode_error("geometry is not an object"));
    }
    if let Some(obj) = geometry.as_object_mut() {
        obj.remove("bbox");
    }

    let body = geometry.to_string();
    let geom: Geometry<f64> = geozero::geojson::GeoJson(body.as_str()).to_geo()?;
    Ok(GeometryValue::new(geom)?.with_srid(srid))
}

pub fn encode(value: &GeometryValue) -> Result<String> {
    let body = value.geometry().to_json()?;
    let Some(srid) = value.srid() else {
        return Ok(body);
    };
    let mut object: Value = serde_json::from_str(&body)?;
    if let Some(obj) = object.as_object_mut() {
        obj.insert(
            "crs".to_string(),
            json!({ "type": "name", "properties": { "name": format!("EPSG:{srid}") } }),
        );
    }
    Ok(object.to_string())
}
