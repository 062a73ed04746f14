//! Nearest-neighbor search between two tables, with per-row aggregates of
//! the neighbors' attributes.
//!
//! Lon/lat input is projected to a metric CRS first so that `radius` and the
//! reported distances are in metres.

use std::fmt;

use geo::Point;
use serde::Deserialize;

use crate::error::{GeoWrangleError, Result};
use crate::functions::join::representative_points;
use crate::functions::kdtree::KdTree;
use crate::functions::metric::{auto_metric_epsg, MetricProjector};
use crate::table::{FeatureTable, FieldValue, GeometrySource};

/// One neighbor of a query point. `index` is the row position in the
/// reference set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f64,
}

/// Neighbors of one query row, nearest first.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborQueryResult {
    pub row: usize,
    pub neighbors: Vec<Neighbor>,
}

impl NeighborQueryResult {
    pub fn min_distance(&self) -> Option<f64> {
        self.neighbors.first().map(|n| n.distance)
    }
}

/// K-d tree over reference points, answering count and radius queries.
#[derive(Debug, Clone)]
pub struct NeighborIndex {
    tree: KdTree,
}

impl NeighborIndex {
    pub fn new(points: &[(f64, f64)]) -> Self {
        let points: Vec<[f64; 2]> = points.iter().map(|&(x, y)| [x, y]).collect();
        Self {
            tree: KdTree::build(&points),
        }
    }

    /// Missing points keep their position but are never returned.
    pub fn from_optional(points: &[Option<(f64, f64)>]) -> Self {
        let points: Vec<[f64; 2]> = points
            .iter()
            .map(|p| p.map_or([f64::NAN, f64::NAN], |(x, y)| [x, y]))
            .collect();
        Self {
            tree: KdTree::build(&points),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Neighbors of `point` under a count limit, a radius, or both (radius
    /// first, then the `k` closest of those). At least one must be given.
    ///
    /// # Example
    ///
    /// ```
    /// use geowrangle_core::functions::neighbors::NeighborIndex;
    ///
    /// let index = NeighborIndex::new(&[(0.0, 0.0), (10.0, 0.0), (1.0, 1.0)]);
    /// let found = index.query((0.0, 0.0), Some(2), None).unwrap();
    /// assert_eq!(found.iter().map(|n| n.index).collect::<Vec<_>>(), vec![0, 2]);
    /// let found = index.query((0.0, 0.0), Some(5), Some(5.0)).unwrap();
    /// assert_eq!(found.len(), 2);
    /// assert!(index.query((0.0, 0.0), None, None).is_err());
    /// ```
    pub fn query(&self, point: (f64, f64), k: Option<usize>, radius: Option<f64>) -> Result<Vec<Neighbor>> {
        let query = [point.0, point.1];
        let found = match (k, radius) {
            (None, None) => {
                return Err(GeoWrangleError::Precondition(
                    "neighbor query needs a count, a radius, or both".to_string(),
                ))
            }
            (Some(k), None) => self.tree.nearest(query, k),
            (None, Some(r)) => self.tree.within_radius(query, r),
            (Some(k), Some(r)) => {
                let mut within = self.tree.within_radius(query, r);
                within.truncate(k);
                within
            }
        };
        Ok(found
            .into_iter()
            .map(|(index, distance)| Neighbor { index, distance })
            .collect())
    }
}

/// Aggregate applied to a numeric reference column over each row's
/// neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunc {
    Count,
    Sum,
    Mean,
    Min,
    Max,
    Median,
    /// Sample standard deviation (n - 1 denominator).
    Std,
}

impl AggregateFunc {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum => "sum",
            AggregateFunc::Mean => "mean",
            AggregateFunc::Min => "min",
            AggregateFunc::Max => "max",
            AggregateFunc::Median => "median",
            AggregateFunc::Std => "std",
        }
    }

    /// Aggregate over the non-null values of matched neighbors.
    ///
    /// `matched` is false when the row had no neighbors at all; every
    /// aggregate is then null. With neighbors but no values, `Count` and
    /// `Sum` are zero and the rest null.
    pub fn apply(self, values: &[f64], matched: bool) -> FieldValue {
        if !matched {
            return FieldValue::Null;
        }
        let n = values.len();
        match self {
            AggregateFunc::Count => FieldValue::Int(n as i64),
            AggregateFunc::Sum => FieldValue::Float(values.iter().sum()),
            _ if n == 0 => FieldValue::Null,
            AggregateFunc::Mean => FieldValue::Float(values.iter().sum::<f64>() / n as f64),
            AggregateFunc::Min => FieldValue::Float(values.iter().copied().fold(f64::INFINITY, f64::min)),
            AggregateFunc::Max => FieldValue::Float(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
            AggregateFunc::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = n / 2;
                FieldValue::Float(if n % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                })
            }
            AggregateFunc::Std => {
                if n < 2 {
                    return FieldValue::Null;
                }
                let mean = values.iter().sum::<f64>() / n as f64;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
                FieldValue::Float(var.sqrt())
            }
        }
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `func` over reference column `column`, written to `{column}_{func}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AggregateSpec {
    pub column: String,
    pub func: AggregateFunc,
}

impl AggregateSpec {
    pub fn new(column: impl Into<String>, func: AggregateFunc) -> Self {
        Self {
            column: column.into(),
            func,
        }
    }

    pub fn output_name(&self) -> String {
        format!("{}_{}", self.column, self.func)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NeighborOptions {
    /// Keep at most this many neighbors.
    pub k: Option<usize>,
    /// Keep neighbors at most this far away (metres, or CRS units when
    /// `projected`).
    pub radius: Option<f64>,
    /// Metric CRS to measure in. Picked from the reference data when unset.
    pub metric_epsg: Option<u16>,
    /// Coordinates are already planar; skip reprojection.
    pub projected: bool,
    /// Prefix of the count and min-distance columns.
    pub prefix: String,
    pub aggregates: Vec<AggregateSpec>,
}

impl Default for NeighborOptions {
    fn default() -> Self {
        Self {
            k: None,
            radius: None,
            metric_epsg: None,
            projected: false,
            prefix: "nn_".to_string(),
            aggregates: Vec::new(),
        }
    }
}

fn to_pairs(points: Vec<Option<Point<f64>>>) -> Vec<Option<(f64, f64)>> {
    points.into_iter().map(|p| p.map(|p| (p.x(), p.y()))).collect()
}

fn project_all(projector: &MetricProjector, points: &[Option<(f64, f64)>]) -> Result<Vec<Option<(f64, f64)>>> {
    points
        .iter()
        .map(|p| p.map(|(x, y)| projector.project(x, y)).transpose())
        .collect()
}

/// Raw neighbor lists for every query row, in query-row order.
pub fn neighbor_lists(
    query: &FeatureTable,
    query_geometry: &GeometrySource,
    reference: &FeatureTable,
    reference_geometry: &GeometrySource,
    options: &NeighborOptions,
) -> Result<Vec<NeighborQueryResult>> {
    if options.k.is_none() && options.radius.is_none() {
        return Err(GeoWrangleError::Precondition(
            "nearest neighbors needs `k`, `radius`, or both".to_string(),
        ));
    }
    if options.radius.is_some_and(|r| r.is_nan() || r < 0.0) {
        return Err(GeoWrangleError::InvalidInput("radius must be non-negative".to_string()));
    }
    query.ensure_unique_index()?;
    query_geometry.check(query)?;
    reference_geometry.check(reference)?;
    for spec in &options.aggregates {
        reference.require_column(&spec.column)?;
    }

    let mut query_points = to_pairs(representative_points(query, query_geometry)?);
    let mut reference_points = to_pairs(representative_points(reference, reference_geometry)?);

    if !options.projected {
        let epsg = match options.metric_epsg {
            Some(epsg) => Some(epsg),
            None => {
                let geoms: Vec<geo::Geometry<f64>> = reference_points
                    .iter()
                    .flatten()
                    .map(|&(x, y)| geo::Geometry::Point(Point::new(x, y)))
                    .collect();
                auto_metric_epsg(&geoms)
            }
        };
        // no usable reference point means nothing can match anyway
        if let Some(epsg) = epsg {
            tracing::debug!(epsg, "projecting neighbor search to metric CRS");
            let projector = MetricProjector::from_wgs84(epsg)?;
            query_points = project_all(&projector, &query_points)?;
            reference_points = project_all(&projector, &reference_points)?;
        }
    }

    let index = NeighborIndex::from_optional(&reference_points);
    let mut results = Vec::with_capacity(query_points.len());
    for (row, point) in query_points.iter().enumerate() {
        if row > 0 && row % 1000 == 0 {
            tracing::debug!(done = row, total = query_points.len(), "neighbor search");
        }
        let neighbors = match point {
            Some(p) => index.query(*p, options.k, options.radius)?,
            None => Vec::new(),
        };
        results.push(NeighborQueryResult { row, neighbors });
    }
    Ok(results)
}

/// Append neighbor statistics to `query`.
///
/// Adds `<prefix>count` (0 when nothing matched), `<prefix>min_distance`
/// (null when nothing matched) and one `{column}_{func}` column per
/// aggregate spec.
///
/// # Example
///
/// ```
/// use geowrangle_core::functions::neighbors::{
///     nearest_neighbors, AggregateFunc, AggregateSpec, NeighborOptions,
/// };
/// use geowrangle_core::table::{FeatureTable, FieldValue, GeometrySource};
///
/// let mut homes = FeatureTable::new(["x", "y"]);
/// homes.push_row(vec![0.0.into(), 0.0.into()]).unwrap();
///
/// let mut shops = FeatureTable::new(["x", "y", "sales"]);
/// shops.push_row(vec![3.0.into(), 4.0.into(), 10.0.into()]).unwrap();
/// shops.push_row(vec![30.0.into(), 40.0.into(), 99.0.into()]).unwrap();
///
/// let options = NeighborOptions {
///     radius: Some(10.0),
///     projected: true,
///     aggregates: vec![AggregateSpec::new("sales", AggregateFunc::Sum)],
///     ..NeighborOptions::default()
/// };
/// let xy = GeometrySource::lon_lat("x", "y");
/// let out = nearest_neighbors(&homes, &xy, &shops, &xy, &options).unwrap();
/// assert_eq!(out.value(0, "nn_count"), Some(&FieldValue::Int(1)));
/// assert_eq!(out.value(0, "nn_min_distance"), Some(&FieldValue::Float(5.0)));
/// assert_eq!(out.value(0, "sales_sum"), Some(&FieldValue::Float(10.0)));
/// ```
pub fn nearest_neighbors(
    query: &FeatureTable,
    query_geometry: &GeometrySource,
    reference: &FeatureTable,
    reference_geometry: &GeometrySource,
    options: &NeighborOptions,
) -> Result<FeatureTable> {
    let results = neighbor_lists(query, query_geometry, reference, reference_geometry, options)?;

    let counts = results
        .iter()
        .map(|r| FieldValue::Int(r.neighbors.len() as i64))
        .collect();
    let min_distances = results.iter().map(|r| r.min_distance().into()).collect();
    let mut out = query
        .clone()
        .with_column(&format!("{}count", options.prefix), counts)?
        .with_column(&format!("{}min_distance", options.prefix), min_distances)?;

    for spec in &options.aggregates {
        let column = reference.column_values(&spec.column)?;
        let values = results
            .iter()
            .map(|r| {
                let numbers: Vec<f64> = r.neighbors.iter().filter_map(|n| column[n.index].as_f64()).collect();
                spec.func.apply(&numbers, !r.neighbors.is_empty())
            })
            .collect();
        out = out.with_column(&spec.output_name(), values)?;
    }
    Ok(out)
}
