//! Reprojection to metric coordinates by EPSG code.
//!
//! Distance-based operations (neighbor search, buffers in metres) need a
//! planar CRS. [`auto_metric_epsg`] picks the UTM zone covering the data and
//! [`MetricProjector`] reprojects from WGS84 lon/lat with `proj4rs`.

use geo::algorithm::line_measures::metric_spaces::Euclidean;
use geo::algorithm::line_measures::Length;
use geo::algorithm::Area;
use geo::{Coord, CoordsIter, Geometry, MapCoords};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::error::{GeoWrangleError, Result};
use crate::geometry::GeometryValue;

pub const WGS84_EPSG: u16 = 4326;

/// PROJ string for an EPSG code from the bundled `crs-definitions` table.
pub fn proj_string(epsg: u16) -> Result<&'static str> {
    crs_definitions::from_code(epsg)
        .map(|def| def.proj4)
        .ok_or_else(|| GeoWrangleError::Projection(format!("EPSG:{epsg} is not a known CRS")))
}

pub fn is_geographic(epsg: u16) -> bool {
    match proj_string(epsg) {
        Ok(def) => def.contains("+proj=longlat"),
        Err(_) => (4000..5000).contains(&epsg),
    }
}

/// UTM zone EPSG for a lon/lat position: 326xx north of the equator, 327xx
/// south.
///
/// # Example
///
/// ```
/// use geowrangle_core::functions::metric::utm_epsg_for;
///
/// assert_eq!(utm_epsg_for(116.4, 39.9), 32650);
/// assert_eq!(utm_epsg_for(151.2, -33.9), 32756);
/// assert_eq!(utm_epsg_for(180.0, 0.0), 32660);
/// ```
pub fn utm_epsg_for(lon: f64, lat: f64) -> u16 {
    let zone = (((lon + 180.0) / 6.0).floor() as i64 + 1).clamp(1, 60) as u16;
    if lat >= 0.0 {
        32600 + zone
    } else {
        32700 + zone
    }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// UTM zone for a set of lon/lat geometries, from the median longitude and
/// the hemisphere of the median latitude. `None` when there are no vertices.
pub fn auto_metric_epsg<'a, I>(geoms: I) -> Option<u16>
where
    I: IntoIterator<Item = &'a Geometry<f64>>,
{
    let mut lons = Vec::new();
    let mut lats = Vec::new();
    for geom in geoms {
        for c in geom.coords_iter() {
            if c.x.is_finite() && c.y.is_finite() {
                lons.push(c.x);
                lats.push(c.y);
            }
        }
    }
    Some(utm_epsg_for(median(&mut lons)?, median(&mut lats)?))
}

/// Reusable transform between two EPSG codes.
pub struct MetricProjector {
    source: Proj,
    target: Proj,
    source_epsg: u16,
    target_epsg: u16,
    source_geographic: bool,
    target_geographic: bool,
}

impl std::fmt::Debug for MetricProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricProjector")
            .field("source_epsg", &self.source_epsg)
            .field("target_epsg", &self.target_epsg)
            .finish_non_exhaustive()
    }
}

impl MetricProjector {
    pub fn new(source_epsg: u16, target_epsg: u16) -> Result<Self> {
        let build = |epsg: u16| {
            Proj::from_proj_string(proj_string(epsg)?).map_err(|e| {
                GeoWrangleError::Projection(format!("invalid projection EPSG:{epsg}: {e:?}"))
            })
        };
        Ok(Self {
            source: build(source_epsg)?,
            target: build(target_epsg)?,
            source_epsg,
            target_epsg,
            source_geographic: is_geographic(source_epsg),
            target_geographic: is_geographic(target_epsg),
        })
    }

    /// WGS84 lon/lat → `target_epsg`.
    pub fn from_wgs84(target_epsg: u16) -> Result<Self> {
        Self::new(WGS84_EPSG, target_epsg)
    }

    pub fn source_epsg(&self) -> u16 {
        self.source_epsg
    }

    pub fn target_epsg(&self) -> u16 {
        self.target_epsg
    }

    pub fn project(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if self.source_epsg == self.target_epsg {
            return Ok((x, y));
        }
        // proj4rs works in radians for geographic systems
        let mut point = if self.source_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(&self.source, &self.target, &mut point).map_err(|e| {
            GeoWrangleError::Projection(format!(
                "EPSG:{} -> EPSG:{} failed at ({x}, {y}): {e:?}",
                self.source_epsg, self.target_epsg
            ))
        })?;
        Ok(if self.target_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        })
    }

    pub fn project_geometry(&self, geom: &Geometry<f64>) -> Result<Geometry<f64>> {
        geom.try_map_coords(|c| {
            let (x, y) = self.project(c.x, c.y)?;
            Ok::<_, GeoWrangleError>(Coord { x, y })
        })
    }
}

/// Reproject a value between two EPSG codes. The result carries the target
/// SRID.
pub fn reproject(value: &GeometryValue, from_epsg: u16, to_epsg: u16) -> Result<GeometryValue> {
    let projector = MetricProjector::new(from_epsg, to_epsg)?;
    let projected = projector.project_geometry(value.geometry())?;
    Ok(GeometryValue::new(projected)?.with_srid(Some(i32::from(to_epsg))))
}

/// Project WGS84 geometries to `epsg`, or to the auto-selected UTM zone when
/// `epsg` is `None`. Returns the EPSG actually used.
pub fn to_metric(geoms: &[Geometry<f64>], epsg: Option<u16>) -> Result<(u16, Vec<Geometry<f64>>)> {
    let epsg = match epsg {
        Some(code) => code,
        None => auto_metric_epsg(geoms).ok_or_else(|| {
            GeoWrangleError::InvalidInput("cannot pick a metric CRS for empty input".to_string())
        })?,
    };
    let projector = MetricProjector::from_wgs84(epsg)?;
    let projected = geoms
        .iter()
        .map(|g| projector.project_geometry(g))
        .collect::<Result<Vec<_>>>()?;
    Ok((epsg, projected))
}

fn metric_geometry(value: &GeometryValue) -> Result<Geometry<f64>> {
    let epsg = auto_metric_epsg(std::iter::once(value.geometry())).ok_or_else(|| {
        GeoWrangleError::InvalidInput("geometry has no coordinates".to_string())
    })?;
    MetricProjector::from_wgs84(epsg)?.project_geometry(value.geometry())
}

/// Area in square metres of a WGS84 polygonal geometry (0 for other kinds).
pub fn metric_area(value: &GeometryValue) -> Result<f64> {
    Ok(metric_geometry(value)?.unsigned_area())
}

fn perimeter(polygon: &geo::Polygon<f64>) -> f64 {
    Euclidean.length(polygon.exterior())
        + polygon
            .interiors()
            .iter()
            .map(|r| Euclidean.length(r))
            .sum::<f64>()
}

/// Length in metres of a WGS84 linear geometry; polygon perimeters for
/// polygonal kinds, 0 for points.
pub fn metric_length(value: &GeometryValue) -> Result<f64> {
    let geom = metric_geometry(value)?;
    Ok(match &geom {
        Geometry::LineString(ls) => Euclidean.length(ls),
        Geometry::MultiLineString(mls) => mls.0.iter().map(|ls| Euclidean.length(ls)).sum(),
        Geometry::Polygon(p) => perimeter(p),
        Geometry::MultiPolygon(mp) => mp.0.iter().map(perimeter).sum(),
        _ => 0.0,
    })
}
