//! End-to-end scenarios over `FeatureTable`s.

use geo::{Area, BooleanOps, Geometry, MultiPolygon};
use geowrangle_core::codec;
use geowrangle_core::config::GeoWrangleConfig;
use geowrangle_core::functions::join::{spatial_join, JoinOptions, SpatialPredicate};
use geowrangle_core::functions::neighbors::{nearest_neighbors, neighbor_lists, NeighborOptions};
use geowrangle_core::functions::topology::{topology_check, topology_fix, topology_issues, TopologyIssue};
use geowrangle_core::functions::transform::{wgs84_to_gcj02, SpatialReference, Transformer};
use geowrangle_core::geometry::{GeometryFormat, GeometryValue};
use geowrangle_core::table::{FeatureTable, FieldValue, GeometrySource};
use geowrangle_core::GeoWrangleError;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn hex_wkb(wkt: &str) -> FieldValue {
    let value = codec::wkt::decode(wkt).unwrap();
    codec::encode_hex_wkb(&value).unwrap()
}

fn as_multi(geom: &Geometry<f64>) -> MultiPolygon<f64> {
    match geom {
        Geometry::Polygon(p) => MultiPolygon(vec![p.clone()]),
        Geometry::MultiPolygon(mp) => mp.clone(),
        other => panic!("expected a polygon, got {other:?}"),
    }
}

// ── Codecs ───────────────────────────────────────────────────────────────────

#[test]
fn hex_wkb_column_converts_to_wkt() {
    let mut table = FeatureTable::new(["id", "geom"]);
    table
        .push_row(vec![FieldValue::Int(1), "010100000000000000006060400000000000003F40".into()])
        .unwrap();
    table.push_row(vec![FieldValue::Int(2), FieldValue::Null]).unwrap();

    assert_eq!(codec::validate_column_format(&table, "geom").unwrap(), GeometryFormat::Wkb);
    let out = codec::convert_column(&table, "geom", GeometryFormat::Wkt).unwrap();
    assert_eq!(out.value(0, "geom"), Some(&FieldValue::from("POINT (131 31)")));
    assert_eq!(out.value(1, "geom"), Some(&FieldValue::Null));
}

#[test]
fn mixed_encodings_are_reported() {
    let mut table = FeatureTable::new(["geom"]);
    table.push_row(vec!["POINT (1 2)".into()]).unwrap();
    table
        .push_row(vec![r#"{"type":"Point","coordinates":[1,2]}"#.into()])
        .unwrap();
    let err = codec::validate_column_format(&table, "geom").unwrap_err();
    assert!(matches!(err, GeoWrangleError::HeterogeneousColumn { row: 1, .. }));
}

// ── Topology ─────────────────────────────────────────────────────────────────

#[test]
fn overlapping_squares_become_a_coverage() {
    init_logging();
    let mut table = FeatureTable::new(["name", "geom"]);
    table
        .push_row(vec!["small".into(), hex_wkb("POLYGON((0 0,2 0,2 2,0 2,0 0))")])
        .unwrap();
    table
        .push_row(vec!["big".into(), hex_wkb("POLYGON((1 0,3 0,3 2,1 2,1 0))")])
        .unwrap();

    assert!(!topology_check(&table, "geom").unwrap());
    let issues = topology_issues(&table, "geom").unwrap();
    assert!(matches!(issues.as_slice(), [TopologyIssue::Overlap { left: 0, right: 1, .. }]));

    let fixed = topology_fix(&table, "geom", &GeoWrangleConfig::default().topology).unwrap();
    assert!(topology_check(&fixed, "geom").unwrap());
    // hex text stays hex text
    assert!(matches!(fixed.value(0, "geom"), Some(FieldValue::Text(_))));

    let (_, decoded) = codec::decode_column(&fixed, "geom").unwrap();
    let a = as_multi(decoded[0].as_ref().unwrap().geometry());
    let b = as_multi(decoded[1].as_ref().unwrap().geometry());
    assert!(a.intersection(&b).unsigned_area() < 1e-5);
    assert!((a.union(&b).unsigned_area() - 6.0).abs() < 1e-5);
}

// ── Spatial join ─────────────────────────────────────────────────────────────

#[test]
fn join_is_one_to_many_and_keeps_the_left_index() {
    init_logging();
    let mut zones = FeatureTable::new(["zone", "geom"]);
    zones
        .push_row(vec!["a".into(), "POLYGON((0 0,10 0,10 10,0 10,0 0))".into()])
        .unwrap();
    zones
        .push_row(vec!["b".into(), "POLYGON((5 5,15 5,15 15,5 15,5 5))".into()])
        .unwrap();

    let mut pois = FeatureTable::new(["zone", "x", "y"]);
    pois.push_indexed_row(100, vec!["?".into(), 7.0.into(), 7.0.into()]).unwrap();
    pois.push_indexed_row(200, vec!["?".into(), 1.0.into(), 1.0.into()]).unwrap();
    pois.push_indexed_row(300, vec!["?".into(), 50.0.into(), 50.0.into()]).unwrap();

    let options = JoinOptions {
        predicate: SpatialPredicate::Within,
        ..JoinOptions::default()
    };
    let joined = spatial_join(&pois, &GeometrySource::lon_lat("x", "y"), &zones, "geom", &options).unwrap();

    assert_eq!(joined.index(), &[100, 100, 200, 300]);
    assert_eq!(joined.columns(), &["zone_origin", "x", "y", "zone"]);
    let zones_of: Vec<&FieldValue> = (0..joined.len()).map(|r| joined.value(r, "zone").unwrap()).collect();
    assert_eq!(
        zones_of,
        vec![&FieldValue::from("a"), &FieldValue::from("b"), &FieldValue::from("a"), &FieldValue::Null]
    );
}

#[test]
fn join_rejects_duplicate_index() {
    let mut zones = FeatureTable::new(["geom"]);
    zones.push_row(vec!["POLYGON((0 0,1 0,1 1,0 1,0 0))".into()]).unwrap();
    let mut pois = FeatureTable::new(["x", "y"]);
    pois.push_indexed_row(1, vec![0.5.into(), 0.5.into()]).unwrap();
    pois.push_indexed_row(1, vec![0.2.into(), 0.2.into()]).unwrap();
    let err = spatial_join(&pois, &GeometrySource::lon_lat("x", "y"), &zones, "geom", &JoinOptions::default())
        .unwrap_err();
    assert!(matches!(err, GeoWrangleError::Precondition(_)));
}

// ── Datum transforms ─────────────────────────────────────────────────────────

#[test]
fn gcj02_shops_line_up_with_wgs84_districts_after_transform() {
    let wgs = (116.40, 39.91);
    let gcj = wgs84_to_gcj02(wgs.0, wgs.1);

    let mut shops = FeatureTable::new(["lng", "lat"]);
    shops.push_row(vec![gcj.0.into(), gcj.1.into()]).unwrap();
    let tables = GeoWrangleConfig::default().reference_tables();
    let to_wgs = Transformer::for_city(&tables, "北京", SpatialReference::Wgs84).unwrap();
    let shops = to_wgs.transform_table(&shops, &GeometrySource::lon_lat("lng", "lat")).unwrap();

    let lng = shops.value(0, "lng").and_then(FieldValue::as_f64).unwrap();
    let lat = shops.value(0, "lat").and_then(FieldValue::as_f64).unwrap();
    assert!((lng - wgs.0).abs() <= 1e-6 && (lat - wgs.1).abs() <= 1e-6);
}

#[test]
fn native_geometries_keep_their_srid() {
    let mut table = FeatureTable::new(["geom"]);
    table
        .push_row(vec![GeometryValue::point(121.47, 31.23).with_srid(Some(4326)).into()])
        .unwrap();
    let t = Transformer::new(SpatialReference::Wgs84, SpatialReference::Bd09);
    let out = t.transform_table(&table, &GeometrySource::column("geom")).unwrap();
    let value = out.value(0, "geom").and_then(FieldValue::as_geometry).unwrap();
    assert_eq!(value.srid(), Some(4326));
}

// ── Nearest neighbors ────────────────────────────────────────────────────────

#[test]
fn radius_results_stay_within_radius_in_metres() {
    init_logging();
    // ~111 m per 0.001° of latitude
    let mut query = FeatureTable::new(["lng", "lat"]);
    query.push_row(vec![120.0.into(), 30.0.into()]).unwrap();
    let mut reference = FeatureTable::new(["lng", "lat"]);
    for i in 0..10 {
        reference
            .push_row(vec![120.0.into(), (30.0 + 0.001 * f64::from(i)).into()])
            .unwrap();
    }
    let options = NeighborOptions {
        radius: Some(500.0),
        ..NeighborOptions::default()
    };
    let src = GeometrySource::lon_lat("lng", "lat");
    let results = neighbor_lists(&query, &src, &reference, &src, &options).unwrap();
    let found = &results[0].neighbors;
    assert_eq!(found.len(), 5);
    assert!(found.iter().all(|n| n.distance <= 500.0));
    assert!(found.windows(2).all(|w| w[0].distance <= w[1].distance));
    assert_eq!(found[0].index, 0);
}

#[test]
fn unmatched_rows_get_zero_count_and_null_distance() {
    let mut query = FeatureTable::new(["x", "y"]);
    query.push_row(vec![0.0.into(), 0.0.into()]).unwrap();
    query.push_row(vec![FieldValue::Null, FieldValue::Null]).unwrap();
    let mut reference = FeatureTable::new(["x", "y"]);
    reference.push_row(vec![100.0.into(), 0.0.into()]).unwrap();

    let options = NeighborOptions {
        radius: Some(1.0),
        projected: true,
        ..NeighborOptions::default()
    };
    let src = GeometrySource::lon_lat("x", "y");
    let out = nearest_neighbors(&query, &src, &reference, &src, &options).unwrap();
    for row in 0..2 {
        assert_eq!(out.value(row, "nn_count"), Some(&FieldValue::Int(0)));
        assert_eq!(out.value(row, "nn_min_distance"), Some(&FieldValue::Null));
    }
}
