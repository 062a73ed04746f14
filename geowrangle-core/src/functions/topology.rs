//! Topology validation and repair for polygon collections.
//!
//! A collection is topologically valid when every geometry is valid on its
//! own (no self-intersection) and no two polygonal geometries overlap.
//! Boundaries may touch. Points and lines are checked for validity only and
//! pass through repair unchanged.

use std::collections::HashSet;

use geo::algorithm::bool_ops::BooleanOps;
use geo::algorithm::{Area, BoundingRect, Buffer, Intersects, Relate, Validation};
use geo::{Geometry, MultiPolygon, Polygon, Rect};
use serde::Deserialize;

use crate::codec;
use crate::error::{GeoWrangleError, Result};
use crate::functions::polygonize::{has_self_intersection, polygonize};
use crate::table::{FeatureTable, FieldValue};

// Residual area (relative) below which a geometry counts as covered by its
// neighbors.
const CONTAINED_TOLERANCE: f64 = 1e-9;
const PROGRESS_EVERY: usize = 1000;

/// What to keep when a self-intersecting polygon falls apart into faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfIntersectionPolicy {
    /// Only the largest face.
    KeepLargest,
    /// Every face, merged into one (multi)polygon.
    #[default]
    UnionParts,
}

/// Overlap repair knobs.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TopologyOptions {
    /// Hand each overlap to exactly one geometry instead of cutting it out of
    /// both.
    pub fill_intersects: bool,
    /// Keep geometries entirely covered by their neighbors; the neighbors
    /// are cut around them instead.
    pub keep_contains: bool,
    /// Neighbors are buffered by this distance (CRS units) before they are
    /// subtracted, so repaired shapes do not share boundaries.
    pub buffer_epsilon: f64,
    pub self_intersection: SelfIntersectionPolicy,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            fill_intersects: true,
            keep_contains: true,
            buffer_epsilon: 1e-7,
            self_intersection: SelfIntersectionPolicy::default(),
        }
    }
}

/// A single finding of [`find_topology_issues`]. Positions index the input
/// slice.
#[derive(Debug, Clone, PartialEq)]
pub enum TopologyIssue {
    SelfIntersection { row: usize },
    /// Unordered pair, stored with `left < right`.
    Overlap { left: usize, right: usize, overlap: f64 },
}

fn as_multi_polygon(geom: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geom {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        _ => None,
    }
}

fn polygons(geom: &Geometry<f64>) -> &[Polygon<f64>] {
    match geom {
        Geometry::Polygon(p) => std::slice::from_ref(p),
        Geometry::MultiPolygon(mp) => &mp.0,
        _ => &[],
    }
}

/// Collapse a single-part result back to a `Polygon`.
fn simplify_kind(mp: MultiPolygon<f64>) -> Geometry<f64> {
    if mp.0.len() == 1 {
        let mut parts = mp.0;
        Geometry::Polygon(parts.remove(0))
    } else {
        Geometry::MultiPolygon(mp)
    }
}

/// Validity of one geometry, including ring self-crossings.
pub fn is_geometry_valid(geom: &Geometry<f64>) -> bool {
    geom.is_valid() && polygons(geom).iter().all(|p| !has_self_intersection(p))
}

fn bbox_overlap(a: &Option<Rect<f64>>, b: &Option<Rect<f64>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.intersects(b),
        _ => false,
    }
}

/// Interiors intersect; touching boundaries do not count.
fn interiors_overlap(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
    let matrix = a.relate(b);
    matrix.is_intersects() && !matrix.is_touches()
}

struct Prepared {
    shapes: Vec<Option<MultiPolygon<f64>>>,
    bounds: Vec<Option<Rect<f64>>>,
}

impl Prepared {
    fn new(geoms: &[Geometry<f64>]) -> Self {
        let shapes: Vec<_> = geoms.iter().map(as_multi_polygon).collect();
        let bounds = shapes
            .iter()
            .map(|s| s.as_ref().and_then(|mp| mp.bounding_rect()))
            .collect();
        Self { shapes, bounds }
    }

    fn overlaps(&self, i: usize, j: usize) -> bool {
        if !bbox_overlap(&self.bounds[i], &self.bounds[j]) {
            return false;
        }
        match (&self.shapes[i], &self.shapes[j]) {
            (Some(a), Some(b)) => interiors_overlap(a, b),
            _ => false,
        }
    }

    fn area(&self, i: usize) -> f64 {
        self.shapes[i].as_ref().map_or(0.0, |mp| mp.unsigned_area())
    }
}

/// True when no geometry self-intersects and no two polygonal geometries
/// overlap. Stops at the first finding.
///
/// # Example
///
/// ```
/// use geo::{polygon, Geometry};
/// use geowrangle_core::functions::topology::is_topology_valid;
///
/// let a = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)];
/// let b = polygon![(x: 1.0, y: 0.0), (x: 3.0, y: 0.0), (x: 3.0, y: 2.0), (x: 1.0, y: 2.0)];
/// let c = polygon![(x: 2.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 2.0), (x: 2.0, y: 2.0)];
/// assert!(!is_topology_valid(&[Geometry::Polygon(a.clone()), Geometry::Polygon(b)]));
/// assert!(is_topology_valid(&[Geometry::Polygon(a), Geometry::Polygon(c)]));
/// ```
pub fn is_topology_valid(geoms: &[Geometry<f64>]) -> bool {
    if !geoms.iter().all(is_geometry_valid) {
        return false;
    }
    let prepared = Prepared::new(geoms);
    for i in 0..geoms.len() {
        for j in i + 1..geoms.len() {
            if prepared.overlaps(i, j) {
                return false;
            }
        }
    }
    true
}

/// Every self-intersecting geometry and every overlapping pair.
///
/// Pairs involving an invalid geometry are not examined; repair those first.
pub fn find_topology_issues(geoms: &[Geometry<f64>]) -> Vec<TopologyIssue> {
    let valid: Vec<bool> = geoms.iter().map(is_geometry_valid).collect();
    let mut issues: Vec<TopologyIssue> = valid
        .iter()
        .enumerate()
        .filter(|(_, ok)| !**ok)
        .map(|(row, _)| TopologyIssue::SelfIntersection { row })
        .collect();

    let prepared = Prepared::new(geoms);
    for i in 0..geoms.len() {
        for j in i + 1..geoms.len() {
            if !valid[i] || !valid[j] || !prepared.overlaps(i, j) {
                continue;
            }
            if let (Some(a), Some(b)) = (&prepared.shapes[i], &prepared.shapes[j]) {
                issues.push(TopologyIssue::Overlap {
                    left: i,
                    right: j,
                    overlap: a.intersection(b).unsigned_area(),
                });
            }
        }
    }
    issues
}

/// Split a self-intersecting polygon into simple faces and apply `policy`.
/// Valid and non-polygonal geometries are returned unchanged.
pub fn fix_self_intersection(geom: &Geometry<f64>, policy: SelfIntersectionPolicy) -> Geometry<f64> {
    if is_geometry_valid(geom) || as_multi_polygon(geom).is_none() {
        return geom.clone();
    }
    let mut parts: Vec<Polygon<f64>> = Vec::new();
    for polygon in polygons(geom) {
        let faces = polygonize(polygon);
        match policy {
            SelfIntersectionPolicy::KeepLargest => parts.extend(faces.into_iter().take(1)),
            SelfIntersectionPolicy::UnionParts => parts.extend(faces),
        }
    }
    if parts.is_empty() {
        tracing::warn!("self-intersection repair produced no faces; geometry left as is");
        return geom.clone();
    }
    let merged = parts
        .into_iter()
        .fold(MultiPolygon::new(Vec::new()), |acc, p| {
            acc.union(&MultiPolygon::new(vec![p]))
        });
    simplify_kind(merged)
}

/// Remove pairwise overlaps.
///
/// Geometries are resolved in descending area order (ties by position); the
/// one resolved first gives up the shared area. Non-polygonal geometries are
/// returned unchanged.
pub fn fix_overlaps(geoms: &[Geometry<f64>], options: &TopologyOptions) -> Result<Vec<Geometry<f64>>> {
    let prepared = Prepared::new(geoms);
    let mut out = geoms.to_vec();
    let active: Vec<usize> = (0..geoms.len())
        .filter(|&i| prepared.shapes[i].is_some())
        .collect();
    resolve(&prepared, &mut out, active, options)?;
    Ok(out)
}

fn covered_by(shape: &MultiPolygon<f64>, cover: &MultiPolygon<f64>) -> bool {
    let area = shape.unsigned_area();
    let residual = shape.difference(cover).unsigned_area();
    residual <= CONTAINED_TOLERANCE * area.max(f64::MIN_POSITIVE)
}

fn resolve(
    prepared: &Prepared,
    out: &mut [Geometry<f64>],
    subset: Vec<usize>,
    options: &TopologyOptions,
) -> Result<()> {
    let neighbors: Vec<Vec<usize>> = subset
        .iter()
        .map(|&i| {
            subset
                .iter()
                .copied()
                .filter(|&j| j != i && prepared.overlaps(i, j))
                .collect()
        })
        .collect();

    let mut current = Vec::new();
    let mut deferred = Vec::new();
    for (slot, &i) in subset.iter().enumerate() {
        let contained = options.keep_contains
            && !neighbors[slot].is_empty()
            && match &prepared.shapes[i] {
                Some(shape) => {
                    let cover = neighbors[slot]
                        .iter()
                        .filter_map(|&j| prepared.shapes[j].as_ref())
                        .fold(MultiPolygon::new(Vec::new()), |acc, mp| acc.union(mp));
                    covered_by(shape, &cover)
                }
                None => false,
            };
        if contained {
            deferred.push(slot);
        } else {
            current.push(slot);
        }
    }
    if !deferred.is_empty() && current.is_empty() {
        return Err(GeoWrangleError::UnresolvableTopology {
            count: deferred.len(),
        });
    }

    current.sort_by(|&a, &b| {
        prepared
            .area(subset[b])
            .total_cmp(&prepared.area(subset[a]))
            .then(subset[a].cmp(&subset[b]))
    });

    let mut finalized: HashSet<usize> = HashSet::new();
    for (done, &slot) in current.iter().enumerate() {
        let i = subset[slot];
        if done > 0 && done % PROGRESS_EVERY == 0 {
            tracing::debug!(done, total = current.len(), "resolving overlaps");
        }
        let Some(shape) = &prepared.shapes[i] else {
            continue;
        };
        let mut result = shape.clone();
        let mut cut = false;
        for &j in &neighbors[slot] {
            if options.fill_intersects && finalized.contains(&j) {
                continue;
            }
            if let Some(other) = &prepared.shapes[j] {
                result = result.difference(&other.buffer(options.buffer_epsilon));
                cut = true;
            }
        }
        if cut {
            out[i] = simplify_kind(result);
        }
        finalized.insert(i);
    }

    if deferred.is_empty() {
        return Ok(());
    }
    let nested: Vec<usize> = deferred.into_iter().map(|slot| subset[slot]).collect();
    resolve(prepared, out, nested, options)
}

/// Repair a collection: self-intersections first, then overlaps. Already
/// valid input is returned as is, so the repair is idempotent.
///
/// The output has the same length and order as the input.
///
/// # Example
///
/// ```
/// use geo::{polygon, Area, Geometry};
/// use geowrangle_core::functions::topology::{fix_topology, is_topology_valid, TopologyOptions};
///
/// let a = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 0.0), (x: 2.0, y: 2.0), (x: 0.0, y: 2.0)];
/// let b = polygon![(x: 1.0, y: 0.0), (x: 3.0, y: 0.0), (x: 3.0, y: 2.0), (x: 1.0, y: 2.0)];
/// let fixed = fix_topology(
///     &[Geometry::Polygon(a), Geometry::Polygon(b)],
///     &TopologyOptions::default(),
/// )
/// .unwrap();
/// assert!(is_topology_valid(&fixed));
/// let total: f64 = fixed.iter().map(|g| g.unsigned_area()).sum();
/// assert!((total - 6.0).abs() < 1e-5);
/// ```
pub fn fix_topology(geoms: &[Geometry<f64>], options: &TopologyOptions) -> Result<Vec<Geometry<f64>>> {
    if is_topology_valid(geoms) {
        return Ok(geoms.to_vec());
    }
    let simple: Vec<Geometry<f64>> = geoms
        .iter()
        .map(|g| fix_self_intersection(g, options.self_intersection))
        .collect();
    fix_overlaps(&simple, options)
}

/// Non-null geometries of a column, with their row positions.
fn column_geometries(table: &FeatureTable, column: &str) -> Result<(Vec<usize>, Vec<Geometry<f64>>)> {
    table.ensure_unique_index()?;
    let (_, decoded) = codec::decode_column(table, column)?;
    let mut rows = Vec::new();
    let mut geoms = Vec::new();
    for (row, value) in decoded.into_iter().enumerate() {
        if let Some(value) = value {
            rows.push(row);
            geoms.push(value.into_geometry());
        }
    }
    Ok((rows, geoms))
}

/// [`is_topology_valid`] over a geometry column. Null cells are ignored.
pub fn topology_check(table: &FeatureTable, column: &str) -> Result<bool> {
    let (_, geoms) = column_geometries(table, column)?;
    Ok(is_topology_valid(&geoms))
}

/// [`find_topology_issues`] over a geometry column; positions refer to table
/// rows.
pub fn topology_issues(table: &FeatureTable, column: &str) -> Result<Vec<TopologyIssue>> {
    let (rows, geoms) = column_geometries(table, column)?;
    Ok(find_topology_issues(&geoms)
        .into_iter()
        .map(|issue| match issue {
            TopologyIssue::SelfIntersection { row } => TopologyIssue::SelfIntersection { row: rows[row] },
            TopologyIssue::Overlap { left, right, overlap } => TopologyIssue::Overlap {
                left: rows[left],
                right: rows[right],
                overlap,
            },
        })
        .collect())
}

/// [`fix_topology`] over a geometry column, re-encoded in the column's own
/// format. SRIDs are preserved; null cells stay null.
pub fn topology_fix(table: &FeatureTable, column: &str, options: &TopologyOptions) -> Result<FeatureTable> {
    table.ensure_unique_index()?;
    let (format, decoded) = codec::decode_column(table, column)?;
    let geoms: Vec<Geometry<f64>> = decoded
        .iter()
        .flatten()
        .map(|v| v.geometry().clone())
        .collect();
    let mut fixed = fix_topology(&geoms, options)?.into_iter();

    let cells = table.column_values(column)?;
    let mut values = Vec::with_capacity(decoded.len());
    for (original, cell) in decoded.iter().zip(cells) {
        let value = match (original, original.as_ref().and_then(|_| fixed.next())) {
            (Some(original), Some(geom)) => codec::encode_like(&original.derive(geom)?, format, cell)?,
            _ => FieldValue::Null,
        };
        values.push(value);
    }
    table.clone().with_column(column, values)
}
