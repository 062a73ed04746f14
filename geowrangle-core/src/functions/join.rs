//! Spatial tagging: copy attributes of matching right-hand features onto
//! left-hand rows.

use geo::algorithm::{BoundingRect, InteriorPoint, Intersects, Relate};
use geo::{Geometry, Point};
use rstar::{RTree, RTreeObject, AABB};
use serde::Deserialize;

use crate::codec;
use crate::error::{GeoWrangleError, Result};
use crate::table::{FeatureTable, FieldValue, GeometrySource};

/// How a left point must relate to a right geometry to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialPredicate {
    /// The right geometry and the point share at least one point.
    #[default]
    Intersects,
    /// The point lies within the right geometry.
    Within,
    /// The point contains the right geometry (only a coincident point).
    Contains,
}

impl SpatialPredicate {
    pub fn evaluate(self, point: &Point<f64>, right: &Geometry<f64>) -> bool {
        match self {
            SpatialPredicate::Intersects => right.intersects(point),
            SpatialPredicate::Within => Geometry::Point(*point).relate(right).is_within(),
            SpatialPredicate::Contains => Geometry::Point(*point).relate(right).is_contains(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct JoinOptions {
    pub predicate: SpatialPredicate,
    /// Right-hand columns to copy. Empty means every column except the
    /// right geometry column.
    pub tag_columns: Vec<String>,
    /// Appended to left columns whose name collides with a tag column.
    pub collision_suffix: String,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            predicate: SpatialPredicate::default(),
            tag_columns: Vec::new(),
            collision_suffix: "_origin".to_string(),
        }
    }
}

struct Envelope {
    row: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for Envelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Row geometries reduced to one point each: points as they are, anything
/// else by its interior point (with one warning per table). Missing or
/// undecodable geometries are `None`.
pub(crate) fn representative_points(
    table: &FeatureTable,
    source: &GeometrySource,
) -> Result<Vec<Option<Point<f64>>>> {
    match source {
        GeometrySource::LonLat { lon, lat } => {
            let lons = table.column_values(lon)?;
            let lats = table.column_values(lat)?;
            Ok(lons
                .into_iter()
                .zip(lats)
                .map(|(x, y)| Some(Point::new(x.as_f64()?, y.as_f64()?)))
                .collect())
        }
        GeometrySource::Column(column) => {
            let (_, decoded) = codec::decode_column(table, column)?;
            let mut warned = false;
            Ok(decoded
                .into_iter()
                .map(|value| {
                    let geom = value?.into_geometry();
                    match geom {
                        Geometry::Point(p) => Some(p),
                        other => {
                            if !warned {
                                tracing::warn!(
                                    column = %column,
                                    "geometries are not points; using interior points"
                                );
                                warned = true;
                            }
                            other.interior_point()
                        }
                    }
                })
                .collect())
        }
    }
}

fn resolve_tags(right: &FeatureTable, right_column: &str, options: &JoinOptions) -> Result<Vec<usize>> {
    if options.tag_columns.is_empty() {
        return Ok(right
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, name)| name.as_str() != right_column)
            .map(|(i, _)| i)
            .collect());
    }
    options
        .tag_columns
        .iter()
        .map(|name| right.require_column(name))
        .collect()
}

/// Left join of `left` against the geometries in `right[right_column]`.
///
/// Each left row is repeated once per matching right row (in right-table
/// order); rows without a match appear once with null tags. Left columns
/// sharing a name with a tag column are renamed with
/// [`JoinOptions::collision_suffix`].
///
/// # Example
///
/// ```
/// use geowrangle_core::functions::join::{spatial_join, JoinOptions};
/// use geowrangle_core::table::{FeatureTable, FieldValue, GeometrySource};
///
/// let mut shops = FeatureTable::new(["shop", "lng", "lat"]);
/// shops.push_row(vec!["a".into(), 0.5.into(), 0.5.into()]).unwrap();
/// shops.push_row(vec!["b".into(), 5.0.into(), 5.0.into()]).unwrap();
///
/// let mut areas = FeatureTable::new(["district", "geom"]);
/// areas
///     .push_row(vec!["D1".into(), "POLYGON((0 0,1 0,1 1,0 1,0 0))".into()])
///     .unwrap();
///
/// let joined = spatial_join(
///     &shops,
///     &GeometrySource::lon_lat("lng", "lat"),
///     &areas,
///     "geom",
///     &JoinOptions::default(),
/// )
/// .unwrap();
/// assert_eq!(joined.len(), 2);
/// assert_eq!(joined.value(0, "district"), Some(&FieldValue::from("D1")));
/// assert_eq!(joined.value(1, "district"), Some(&FieldValue::Null));
/// ```
pub fn spatial_join(
    left: &FeatureTable,
    left_geometry: &GeometrySource,
    right: &FeatureTable,
    right_column: &str,
    options: &JoinOptions,
) -> Result<FeatureTable> {
    left.ensure_unique_index()?;
    right.ensure_unique_index()?;
    left_geometry.check(left)?;
    right.require_column(right_column)?;
    let tags = resolve_tags(right, right_column, options)?;

    if left.is_empty() || right.is_empty() {
        tracing::warn!(
            left_rows = left.len(),
            right_rows = right.len(),
            "spatial join with an empty input; returning the left table unchanged"
        );
        return Ok(left.clone());
    }

    let tag_names: Vec<String> = tags.iter().map(|&i| right.columns()[i].clone()).collect();
    let mut columns: Vec<String> = left.columns().to_vec();
    for name in &mut columns {
        if tag_names.contains(name) {
            let renamed = format!("{name}{}", options.collision_suffix);
            if left.column_position(&renamed).is_some() || tag_names.contains(&renamed) {
                return Err(GeoWrangleError::InvalidInput(format!(
                    "cannot rename colliding column '{name}': '{renamed}' already exists"
                )));
            }
            *name = renamed;
        }
    }
    columns.extend(tag_names.iter().cloned());
    let mut out = FeatureTable::new(columns);

    let points = representative_points(left, left_geometry)?;
    let null_tags = vec![FieldValue::Null; tags.len()];
    if points.iter().all(Option::is_none) {
        tracing::warn!("left geometries are all null; spatial join skipped");
        for (index, row) in left.rows() {
            out.push_indexed_row(index, [row, null_tags.as_slice()].concat())?;
        }
        return Ok(out);
    }

    let (_, right_geoms) = codec::decode_column(right, right_column)?;
    let tree = RTree::bulk_load(
        right_geoms
            .iter()
            .enumerate()
            .filter_map(|(row, g)| {
                let rect = g.as_ref()?.geometry().bounding_rect()?;
                Some(Envelope {
                    row,
                    envelope: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect(),
    );

    for (pos, ((index, row), point)) in left.rows().zip(&points).enumerate() {
        if pos > 0 && pos % 1000 == 0 {
            tracing::debug!(done = pos, total = left.len(), "spatial join");
        }
        let mut matches: Vec<usize> = match point {
            Some(p) => tree
                .locate_in_envelope_intersecting(&AABB::from_point([p.x(), p.y()]))
                .map(|e| e.row)
                .filter(|&r| {
                    right_geoms[r]
                        .as_ref()
                        .is_some_and(|g| options.predicate.evaluate(p, g.geometry()))
                })
                .collect(),
            None => Vec::new(),
        };
        matches.sort_unstable();

        if matches.is_empty() {
            out.push_indexed_row(index, [row, null_tags.as_slice()].concat())?;
            continue;
        }
        for r in matches {
            let right_row = right.row(r);
            let mut values = row.to_vec();
            values.extend(tags.iter().map(|&c| right_row[c].clone()));
            out.push_indexed_row(index, values)?;
        }
    }
    Ok(out)
}
