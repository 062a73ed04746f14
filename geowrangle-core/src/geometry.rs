//! In-memory geometry representation shared by every component.

use std::fmt;

use geo::{CoordsIter, Geometry};

use crate::error::{GeoWrangleError, Result};

/// Encodings a geometry cell can arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryFormat {
    /// Already-decoded [`GeometryValue`].
    Native,
    /// (E)WKB, either raw bytes or hex text.
    Wkb,
    /// (E)WKT text.
    Wkt,
    /// GeoJSON geometry (or Feature) text.
    GeoJson,
    Unknown,
}

impl GeometryFormat {
    pub fn name(self) -> &'static str {
        match self {
            GeometryFormat::Native => "native",
            GeometryFormat::Wkb => "WKB",
            GeometryFormat::Wkt => "WKT",
            GeometryFormat::GeoJson => "GeoJSON",
            GeometryFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GeometryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The six geometry kinds the core operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
}

impl GeometryKind {
    pub fn is_polygonal(self) -> bool {
        matches!(self, GeometryKind::Polygon | GeometryKind::MultiPolygon)
    }
}

fn kind_of(geometry: &Geometry<f64>) -> Option<GeometryKind> {
    match geometry {
        Geometry::Point(_) => Some(GeometryKind::Point),
        Geometry::LineString(_) => Some(GeometryKind::LineString),
        Geometry::Polygon(_) => Some(GeometryKind::Polygon),
        Geometry::MultiPoint(_) => Some(GeometryKind::MultiPoint),
        Geometry::MultiLineString(_) => Some(GeometryKind::MultiLineString),
        Geometry::MultiPolygon(_) => Some(GeometryKind::MultiPolygon),
        _ => None,
    }
}

/// A decoded geometry plus the SRID tag it was encoded with, if any.
///
/// Values are immutable: transforms build new instances.
///
/// # Example
///
/// ```
/// use geo::{Geometry, Point};
/// use geowrangle_core::geometry::{GeometryKind, GeometryValue};
///
/// let value = GeometryValue::new(Geometry::Point(Point::new(1.0, 2.0)))
///     .unwrap()
///     .with_srid(Some(4326));
/// assert_eq!(value.kind(), GeometryKind::Point);
/// assert_eq!(value.srid(), Some(4326));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryValue {
    geometry: Geometry<f64>,
    kind: GeometryKind,
    srid: Option<i32>,
}

impl GeometryValue {
    /// Wrap a geometry, rejecting kinds outside the supported six
    /// (collections, `Line`, `Rect`, `Triangle`).
    pub fn new(geometry: Geometry<f64>) -> Result<Self> {
        let kind = kind_of(&geometry).ok_or(GeoWrangleError::WrongType(
            "Point, LineString, Polygon or Multi* geometry",
        ))?;
        Ok(Self {
            geometry,
            kind,
            srid: None,
        })
    }

    pub fn point(x: f64, y: f64) -> Self {
        Self {
            geometry: Geometry::Point(geo::Point::new(x, y)),
            kind: GeometryKind::Point,
            srid: None,
        }
    }

    pub fn with_srid(mut self, srid: Option<i32>) -> Self {
        self.srid = srid;
        self
    }

    pub fn geometry(&self) -> &Geometry<f64> {
        &self.geometry
    }

    pub fn into_geometry(self) -> Geometry<f64> {
        self.geometry
    }

    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    pub fn srid(&self) -> Option<i32> {
        self.srid
    }

    /// Build a sibling value carrying the same SRID.
    pub(crate) fn derive(&self, geometry: Geometry<f64>) -> Result<Self> {
        Ok(Self::new(geometry)?.with_srid(self.srid))
    }

    /// Same kind, same SRID, same vertex count, and every coordinate within
    /// `tolerance` on both axes.
    pub fn approx_eq(&self, other: &GeometryValue, tolerance: f64) -> bool {
        if self.kind != other.kind || self.srid != other.srid {
            return false;
        }
        if self.geometry.coords_count() != other.geometry.coords_count() {
            return false;
        }
        self.geometry
            .coords_iter()
            .zip(other.geometry.coords_iter())
            .all(|(a, b)| (a.x - b.x).abs() <= tolerance && (a.y - b.y).abs() <= tolerance)
    }
}

impl TryFrom<Geometry<f64>> for GeometryValue {
    type Error = GeoWrangleError;

    fn try_from(geometry: Geometry<f64>) -> Result<Self> {
        GeometryValue::new(geometry)
    }
}
