//! WGS84 / GCJ02 / BD09 datum conversion and great-circle distance.
//!
//! The GCJ02 offset is an empirical correction calibrated for mainland
//! China. Coordinates outside the calibrated box are returned unchanged.
//! All coordinate pairs are `(lng, lat)` in degrees.

use std::f64::consts::PI;

use geo::{Coord, CoordsIter, MapCoords};
use serde::Deserialize;

use crate::codec;
use crate::error::{GeoWrangleError, Result};
use crate::geometry::GeometryValue;
use crate::reference::ReferenceTables;
use crate::table::{FeatureTable, FieldValue, GeometrySource};

// Krasovsky 1940 ellipsoid used by the GCJ02 offset.
const KRASOVSKY_A: f64 = 6_378_245.0;
const KRASOVSKY_EE: f64 = 0.006_693_421_622_965_943_23;
const BD_X_PI: f64 = PI * 3000.0 / 180.0;
const BD_LNG_OFFSET: f64 = 0.0065;
const BD_LAT_OFFSET: f64 = 0.006;

const DOMAIN_LNG: (f64, f64) = (72.004, 137.8347);
const DOMAIN_LAT: (f64, f64) = (0.8293, 55.8271);

const EXACT_INITIAL_DELTA: f64 = 0.01;
const EXACT_THRESHOLD: f64 = 1e-6;
const EXACT_MAX_ITERATIONS: usize = 30;
const EXACT_POLISH_ITERATIONS: usize = 10;
const EXACT_POLISH_THRESHOLD: f64 = 1e-9;

/// Mean earth radius in metres used by [`distance`].
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Geographic datums the transform engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpatialReference {
    Wgs84,
    Gcj02,
    Bd09,
}

impl SpatialReference {
    pub fn name(self) -> &'static str {
        match self {
            SpatialReference::Wgs84 => "WGS84",
            SpatialReference::Gcj02 => "GCJ02",
            SpatialReference::Bd09 => "BD09",
        }
    }

    /// Case-insensitive parse of `wgs84`, `gcj02`, `bd09` and common aliases.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "wgs84" | "wgs-84" | "epsg:4326" | "gps" => Some(SpatialReference::Wgs84),
            "gcj02" | "gcj-02" | "mars" | "amap" | "gaode" => Some(SpatialReference::Gcj02),
            "bd09" | "bd-09" | "baidu" => Some(SpatialReference::Bd09),
            _ => None,
        }
    }
}

/// True when the point lies inside the box the GCJ02 offset is calibrated for.
pub fn in_calibrated_domain(lng: f64, lat: f64) -> bool {
    (DOMAIN_LNG.0..=DOMAIN_LNG.1).contains(&lng) && (DOMAIN_LAT.0..=DOMAIN_LAT.1).contains(&lat)
}

fn offset_lat(x: f64, y: f64) -> f64 {
    let mut ret = -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * x * y + 0.2 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (y * PI).sin() + 40.0 * (y / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (160.0 * (y / 12.0 * PI).sin() + 320.0 * (y * PI / 30.0).sin()) * 2.0 / 3.0;
    ret
}

fn offset_lng(x: f64, y: f64) -> f64 {
    let mut ret = 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * x * y + 0.1 * x.abs().sqrt();
    ret += (20.0 * (6.0 * x * PI).sin() + 20.0 * (2.0 * x * PI).sin()) * 2.0 / 3.0;
    ret += (20.0 * (x * PI).sin() + 40.0 * (x / 3.0 * PI).sin()) * 2.0 / 3.0;
    ret += (150.0 * (x / 12.0 * PI).sin() + 300.0 * (x / 30.0 * PI).sin()) * 2.0 / 3.0;
    ret
}

/// GCJ02 offset `(dlng, dlat)` at a WGS84 position.
fn gcj_delta(lng: f64, lat: f64) -> (f64, f64) {
    let dlat = offset_lat(lng - 105.0, lat - 35.0);
    let dlng = offset_lng(lng - 105.0, lat - 35.0);
    let rad_lat = lat / 180.0 * PI;
    let magic = 1.0 - KRASOVSKY_EE * rad_lat.sin().powi(2);
    let sqrt_magic = magic.sqrt();
    let dlat = (dlat * 180.0) / ((KRASOVSKY_A * (1.0 - KRASOVSKY_EE)) / (magic * sqrt_magic) * PI);
    let dlng = (dlng * 180.0) / (KRASOVSKY_A / sqrt_magic * rad_lat.cos() * PI);
    (dlng, dlat)
}

/// WGS84 → GCJ02.
///
/// # Example
///
/// ```
/// use geowrangle_core::functions::transform::wgs84_to_gcj02;
///
/// assert_eq!(wgs84_to_gcj02(0.0, 0.0), (0.0, 0.0));
/// let (lng, lat) = wgs84_to_gcj02(116.397, 39.909);
/// assert!((lng - 116.397).abs() > 1e-4);
/// assert!((lat - 39.909).abs() > 1e-4);
/// ```
pub fn wgs84_to_gcj02(lng: f64, lat: f64) -> (f64, f64) {
    if !in_calibrated_domain(lng, lat) {
        return (lng, lat);
    }
    let (dlng, dlat) = gcj_delta(lng, lat);
    (lng + dlng, lat + dlat)
}

/// GCJ02 → WGS84, one-step approximation (metre-level error).
pub fn gcj02_to_wgs84(lng: f64, lat: f64) -> (f64, f64) {
    if !in_calibrated_domain(lng, lat) {
        return (lng, lat);
    }
    let (dlng, dlat) = gcj_delta(lng, lat);
    (lng - dlng, lat - dlat)
}

/// GCJ02 → WGS84 by bracket narrowing around the forward transform.
///
/// Narrowing stops once both forward deltas are below 1e-6° or after 30
/// halvings. The midpoint is then refined by fixed-point steps until the
/// forward deltas drop below 1e-9°, so the result lands within 1e-6° of the
/// WGS84 point. Never fails.
pub fn gcj02_to_wgs84_exact(lng: f64, lat: f64) -> (f64, f64) {
    if !in_calibrated_domain(lng, lat) {
        return (lng, lat);
    }
    let (mut min_lng, mut max_lng) = (lng - EXACT_INITIAL_DELTA, lng + EXACT_INITIAL_DELTA);
    let (mut min_lat, mut max_lat) = (lat - EXACT_INITIAL_DELTA, lat + EXACT_INITIAL_DELTA);
    let mut guess = (lng, lat);
    let mut bracketed = false;

    for _ in 0..EXACT_MAX_ITERATIONS {
        guess = ((min_lng + max_lng) / 2.0, (min_lat + max_lat) / 2.0);
        let (fwd_lng, fwd_lat) = wgs84_to_gcj02(guess.0, guess.1);
        let (d_lng, d_lat) = (fwd_lng - lng, fwd_lat - lat);
        if d_lng.abs() < EXACT_THRESHOLD && d_lat.abs() < EXACT_THRESHOLD {
            bracketed = true;
            break;
        }
        if d_lng > 0.0 {
            max_lng = guess.0;
        } else {
            min_lng = guess.0;
        }
        if d_lat > 0.0 {
            max_lat = guess.1;
        } else {
            min_lat = guess.1;
        }
    }
    if !bracketed {
        // the axes are narrowed independently and can stall where the
        // offset couples them
        tracing::debug!(lng, lat, "bracket narrowing stalled, refining by fixed point");
    }
    for _ in 0..EXACT_POLISH_ITERATIONS {
        let (fwd_lng, fwd_lat) = wgs84_to_gcj02(guess.0, guess.1);
        let (d_lng, d_lat) = (fwd_lng - lng, fwd_lat - lat);
        if d_lng.abs() < EXACT_POLISH_THRESHOLD && d_lat.abs() < EXACT_POLISH_THRESHOLD {
            break;
        }
        guess = (guess.0 - d_lng, guess.1 - d_lat);
    }
    guess
}

/// GCJ02 → BD09.
pub fn gcj02_to_bd09(lng: f64, lat: f64) -> (f64, f64) {
    if !in_calibrated_domain(lng, lat) {
        return (lng, lat);
    }
    let z = (lng * lng + lat * lat).sqrt() + 0.00002 * (lat * BD_X_PI).sin();
    let theta = lat.atan2(lng) + 0.000003 * (lng * BD_X_PI).cos();
    (z * theta.cos() + BD_LNG_OFFSET, z * theta.sin() + BD_LAT_OFFSET)
}

/// BD09 → GCJ02.
pub fn bd09_to_gcj02(lng: f64, lat: f64) -> (f64, f64) {
    if !in_calibrated_domain(lng, lat) {
        return (lng, lat);
    }
    let x = lng - BD_LNG_OFFSET;
    let y = lat - BD_LAT_OFFSET;
    let z = (x * x + y * y).sqrt() - 0.00002 * (y * BD_X_PI).sin();
    let theta = y.atan2(x) - 0.000003 * (x * BD_X_PI).cos();
    (z * theta.cos(), z * theta.sin())
}

pub fn wgs84_to_bd09(lng: f64, lat: f64) -> (f64, f64) {
    let (g_lng, g_lat) = wgs84_to_gcj02(lng, lat);
    gcj02_to_bd09(g_lng, g_lat)
}

pub fn bd09_to_wgs84(lng: f64, lat: f64) -> (f64, f64) {
    let (g_lng, g_lat) = bd09_to_gcj02(lng, lat);
    gcj02_to_wgs84(g_lng, g_lat)
}

/// Great-circle distance in metres between two `(lng, lat)` points
/// (spherical law of cosines).
///
/// # Example
///
/// ```
/// use geowrangle_core::functions::transform::distance;
///
/// let a = (116.3975, 39.9087);
/// let b = (121.4737, 31.2304);
/// assert_eq!(distance(a, a), 0.0);
/// let d = distance(a, b);
/// assert!((d - 1_067_000.0).abs() < 10_000.0);
/// assert_eq!(d, distance(b, a));
/// ```
pub fn distance(p1: (f64, f64), p2: (f64, f64)) -> f64 {
    if p1 == p2 {
        return 0.0;
    }
    let (lng1, lat1) = (p1.0.to_radians(), p1.1.to_radians());
    let (lng2, lat2) = (p2.0.to_radians(), p2.1.to_radians());
    let cos_angle = lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * (lng2 - lng1).cos();
    EARTH_RADIUS_M * cos_angle.clamp(-1.0, 1.0).acos()
}

/// A configured datum conversion.
///
/// # Example
///
/// ```
/// use geowrangle_core::functions::transform::{SpatialReference, Transformer};
///
/// let t = Transformer::new(SpatialReference::Wgs84, SpatialReference::Bd09);
/// let (lng, lat) = t.convert(116.397, 39.909);
/// let back = t.inverse().convert(lng, lat);
/// assert!((back.0 - 116.397).abs() < 1e-4);
/// assert!((back.1 - 39.909).abs() < 1e-4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transformer {
    from: SpatialReference,
    to: SpatialReference,
    exact_inverse: bool,
}

impl Transformer {
    pub fn new(from: SpatialReference, to: SpatialReference) -> Self {
        Self {
            from,
            to,
            exact_inverse: true,
        }
    }

    /// Resolve the source datum from the city lookup table.
    pub fn for_city(tables: &ReferenceTables, city: &str, to: SpatialReference) -> Result<Self> {
        let from = tables.datum_for_city(city).ok_or_else(|| {
            GeoWrangleError::InvalidInput(format!("no datum registered for city '{city}'"))
        })?;
        Ok(Self::new(from, to))
    }

    /// Use the one-step approximate inverse instead of bracket narrowing.
    pub fn with_exact_inverse(mut self, exact: bool) -> Self {
        self.exact_inverse = exact;
        self
    }

    pub fn from(&self) -> SpatialReference {
        self.from
    }

    pub fn to(&self) -> SpatialReference {
        self.to
    }

    pub fn inverse(&self) -> Self {
        Self {
            from: self.to,
            to: self.from,
            exact_inverse: self.exact_inverse,
        }
    }

    fn gcj_to_wgs(&self, lng: f64, lat: f64) -> (f64, f64) {
        if self.exact_inverse {
            gcj02_to_wgs84_exact(lng, lat)
        } else {
            gcj02_to_wgs84(lng, lat)
        }
    }

    pub fn convert(&self, lng: f64, lat: f64) -> (f64, f64) {
        use SpatialReference::*;
        match (self.from, self.to) {
            (Wgs84, Wgs84) | (Gcj02, Gcj02) | (Bd09, Bd09) => (lng, lat),
            (Wgs84, Gcj02) => wgs84_to_gcj02(lng, lat),
            (Gcj02, Wgs84) => self.gcj_to_wgs(lng, lat),
            (Gcj02, Bd09) => gcj02_to_bd09(lng, lat),
            (Bd09, Gcj02) => bd09_to_gcj02(lng, lat),
            (Wgs84, Bd09) => wgs84_to_bd09(lng, lat),
            (Bd09, Wgs84) => {
                let (g_lng, g_lat) = bd09_to_gcj02(lng, lat);
                self.gcj_to_wgs(g_lng, g_lat)
            }
        }
    }

    /// Convert every vertex. Out-of-domain vertices pass through and are
    /// reported with one warning per geometry.
    pub fn apply(&self, value: &GeometryValue) -> Result<GeometryValue> {
        if self.from == self.to {
            return Ok(value.clone());
        }
        let outside = value
            .geometry()
            .coords_iter()
            .filter(|c| !in_calibrated_domain(c.x, c.y))
            .count();
        if outside > 0 {
            tracing::warn!(
                from = self.from.name(),
                to = self.to.name(),
                outside,
                "coordinates outside the calibrated China domain left unchanged"
            );
        }
        let converted = value.geometry().map_coords(|c| {
            let (x, y) = self.convert(c.x, c.y);
            Coord { x, y }
        });
        value.derive(converted)
    }

    /// Transform a geometry column (re-encoded in its own format) or a pair
    /// of lon/lat columns.
    pub fn transform_table(&self, table: &FeatureTable, source: &GeometrySource) -> Result<FeatureTable> {
        source.check(table)?;
        match source {
            GeometrySource::Column(column) => {
                let (format, decoded) = codec::decode_column(table, column)?;
                let cells = table.column_values(column)?;
                let encoded = decoded
                    .iter()
                    .zip(cells)
                    .map(|(geom, cell)| match geom {
                        Some(g) => codec::encode_like(&self.apply(g)?, format, cell),
                        None => Ok(FieldValue::Null),
                    })
                    .collect::<Result<Vec<_>>>()?;
                table.clone().with_column(column, encoded)
            }
            GeometrySource::LonLat { lon, lat } => {
                let lons = table.column_values(lon)?;
                let lats = table.column_values(lat)?;
                let mut new_lons = Vec::with_capacity(table.len());
                let mut new_lats = Vec::with_capacity(table.len());
                let mut outside = 0usize;
                for (x, y) in lons.into_iter().zip(lats) {
                    match (x.as_f64(), y.as_f64()) {
                        (Some(x), Some(y)) => {
                            if !in_calibrated_domain(x, y) {
                                outside += 1;
                            }
                            let (nx, ny) = self.convert(x, y);
                            new_lons.push(FieldValue::Float(nx));
                            new_lats.push(FieldValue::Float(ny));
                        }
                        _ => {
                            new_lons.push(FieldValue::Null);
                            new_lats.push(FieldValue::Null);
                        }
                    }
                }
                if outside > 0 && self.from != self.to {
                    tracing::warn!(outside, "rows outside the calibrated China domain left unchanged");
                }
                table
                    .clone()
                    .with_column(lon, new_lons)?
                    .with_column(lat, new_lats)
            }
        }
    }
}
