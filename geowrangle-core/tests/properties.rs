//! Property checks across the public API.

use geo::{Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon};
use geowrangle_core::codec;
use geowrangle_core::functions::neighbors::NeighborIndex;
use geowrangle_core::geometry::{GeometryFormat, GeometryValue};
use geowrangle_core::table::FieldValue;
use proptest::prelude::*;

fn coord() -> impl Strategy<Value = (f64, f64)> {
    (-180.0f64..180.0, -90.0f64..90.0)
}

fn line_string() -> impl Strategy<Value = LineString<f64>> {
    prop::collection::vec(coord(), 2..8).prop_map(LineString::from)
}

// Axis-aligned box, optionally with a hole in its middle third.
fn polygon() -> impl Strategy<Value = Polygon<f64>> {
    (-170.0f64..160.0, -80.0f64..70.0, 0.5f64..10.0, 0.5f64..10.0, any::<bool>()).prop_map(
        |(x, y, w, h, holed)| {
            let ring = |x0: f64, y0: f64, x1: f64, y1: f64| {
                LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)])
            };
            let holes = if holed {
                vec![ring(x + w / 3.0, y + h / 3.0, x + 2.0 * w / 3.0, y + 2.0 * h / 3.0)]
            } else {
                Vec::new()
            };
            Polygon::new(ring(x, y, x + w, y + h), holes)
        },
    )
}

fn geometry() -> impl Strategy<Value = GeometryValue> {
    prop_oneof![
        coord().prop_map(|(x, y)| GeometryValue::point(x, y)),
        line_string().prop_map(Geometry::LineString).prop_map(wrap),
        polygon().prop_map(Geometry::Polygon).prop_map(wrap),
        prop::collection::vec(coord(), 1..6)
            .prop_map(|pts| Geometry::MultiPoint(MultiPoint::from(pts)))
            .prop_map(wrap),
        prop::collection::vec(line_string(), 1..4)
            .prop_map(|lines| Geometry::MultiLineString(MultiLineString::new(lines)))
            .prop_map(wrap),
        prop::collection::vec(polygon(), 1..4)
            .prop_map(|polys| Geometry::MultiPolygon(MultiPolygon::new(polys)))
            .prop_map(wrap),
    ]
}

fn wrap(geometry: Geometry<f64>) -> GeometryValue {
    GeometryValue::new(geometry).unwrap()
}

proptest! {
    #[test]
    fn every_format_decodes_what_it_encodes(value in geometry()) {
        for format in [GeometryFormat::Wkb, GeometryFormat::Wkt, GeometryFormat::GeoJson] {
            let cell = codec::encode(&value, format).unwrap();
            prop_assert_eq!(codec::infer_format(&cell), format);
            let back = codec::try_decode(&cell, format).unwrap().unwrap();
            prop_assert!(back.approx_eq(&value, 1e-9), "{:?}: {:?} vs {:?}", format, back, value);
        }
    }

    #[test]
    fn hex_and_raw_wkb_agree(value in geometry()) {
        let FieldValue::Bytes(raw) = codec::encode(&value, GeometryFormat::Wkb).unwrap() else {
            panic!("WKB encodes to bytes");
        };
        let FieldValue::Text(hex) = codec::encode_hex_wkb(&value).unwrap() else {
            panic!("hex WKB encodes to text");
        };
        prop_assert_eq!(hex.to_ascii_lowercase(), raw.iter().map(|b| format!("{b:02x}")).collect::<String>());
    }

    #[test]
    fn knn_returns_min_of_k_and_available(
        points in prop::collection::vec(coord(), 0..40),
        query in coord(),
        k in 1usize..12,
    ) {
        let index = NeighborIndex::new(&points);
        let found = index.query(query, Some(k), None).unwrap();
        prop_assert_eq!(found.len(), k.min(points.len()));
        prop_assert!(found.windows(2).all(|w| w[0].distance <= w[1].distance));
        let q = Point::new(query.0, query.1);
        for n in &found {
            let p = Point::new(points[n.index].0, points[n.index].1);
            prop_assert!((n.distance - ((p.x() - q.x()).hypot(p.y() - q.y()))).abs() < 1e-9);
        }
    }
}
