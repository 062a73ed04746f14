//! (E)WKB codec.
//!
//! Wire format:
//!   [0x01|0x00]   byte order marker (little-endian or big-endian)
//!   [u32]         geometry type with flags (in the declared byte order)
//!                   Bit 29 (0x20000000): SRID present
//!                   Bit 31 (0x80000000): Z dimension
//!                   Bit 30 (0x40000000): M dimension
//!                   Bits 0–28: geometry type (1=Point, 2=LineString, …)
//!   [i32]         SRID (only when the SRID flag is set)
//!   …             ISO WKB geometry payload
//!
//! Cells may carry the blob as raw bytes or as hex text.

use geo::Geometry;
use geozero::wkb::Ewkb;
use geozero::{CoordDimensions, ToGeo, ToWkb};

use crate::error::{GeoWrangleError, Result};
use crate::geometry::GeometryValue;

pub const EWKB_SRID_FLAG: u32 = 0x20000000;
pub const EWKB_Z_FLAG: u32 = 0x80000000;
pub const EWKB_M_FLAG: u32 = 0x40000000;

const TYPE_MASK: u32 = 0x1FFF_FFFF;
const MAX_GEOMETRY_TYPE: u32 = 7;

/// Header fields preceding the coordinate payload.
#[derive(Debug, Clone, Copy)]
pub struct WkbHeader {
    pub geom_type: u32,
    pub srid: Option<i32>,
    pub has_z: bool,
    pub has_m: bool,
    pub little_endian: bool,
}

fn word(bytes: &[u8], little_endian: bool) -> u32 {
    let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if little_endian {
        u32::from_le_bytes(raw)
    } else {
        u32::from_be_bytes(raw)
    }
}

/// Peek at the header without parsing coordinates.
pub fn read_header(blob: &[u8]) -> Result<WkbHeader> {
    if blob.len() < 5 {
        return Err(GeoWrangleError::InvalidEwkb("blob too short"));
    }
    let little_endian = match blob[0] {
        0x01 => true,
        0x00 => false,
        _ => return Err(GeoWrangleError::InvalidEwkb("invalid byte order marker")),
    };
    let raw_type = word(&blob[1..5], little_endian);
    let geom_type = raw_type & TYPE_MASK;
    if geom_type == 0 || geom_type > MAX_GEOMETRY_TYPE {
        return Err(GeoWrangleError::InvalidEwkb("unknown geometry type code"));
    }

    let srid = if raw_type & EWKB_SRID_FLAG != 0 {
        if blob.len() < 9 {
            return Err(GeoWrangleError::InvalidEwkb(
                "SRID flag set but blob too short",
            ));
        }
        Some(word(&blob[5..9], little_endian) as i32)
    } else {
        None
    };

    Ok(WkbHeader {
        geom_type,
        srid,
        has_z: raw_type & EWKB_Z_FLAG != 0,
        has_m: raw_type & EWKB_M_FLAG != 0,
        little_endian,
    })
}

fn dimensions_label(has_z: bool, has_m: bool) -> &'static str {
    match (has_z, has_m) {
        (true, true) => "ZM",
        (true, false) => "Z",
        (false, true) => "M",
        (false, false) => "XY",
    }
}

/// Parse a blob into a value, keeping the embedded SRID.
pub fn decode_bytes(blob: &[u8]) -> Result<GeometryValue> {
    let header = read_header(blob)?;
    if header.has_z || header.has_m {
        return Err(GeoWrangleError::UnsupportedDimensions {
            dimensions: dimensions_label(header.has_z, header.has_m),
        });
    }
    let geom: Geometry<f64> = Ewkb(blob).to_geo()?;
    Ok(GeometryValue::new(geom)?.with_srid(header.srid))
}

/// Hex text (either case, optional `\x`/`0x` prefix) → blob.
pub fn hex_to_bytes(text: &str) -> Option<Vec<u8>> {
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix("\\x")
        .or_else(|| trimmed.strip_prefix("0x"))
        .unwrap_or(trimmed);
    if body.is_empty() || body.len() % 2 != 0 {
        return None;
    }
    hex::decode(body).ok()
}

pub fn decode_hex(text: &str) -> Result<GeometryValue> {
    let blob = hex_to_bytes(text).ok_or(GeoWrangleError::InvalidEwkb("not hex text"))?;
    decode_bytes(&blob)
}

fn with_srid_flag(iso_wkb: Vec<u8>, srid: i32) -> Result<Vec<u8>> {
    let header = read_header(&iso_wkb)?;
    let raw_type = word(&iso_wkb[1..5], header.little_endian) | EWKB_SRID_FLAG;

    // ISO: [order][type][payload]  →  EWKB: [order][type|flag][srid][payload]
    let mut out = Vec::with_capacity(iso_wkb.len() + 4);
    out.push(iso_wkb[0]);
    if header.little_endian {
        out.extend_from_slice(&raw_type.to_le_bytes());
        out.extend_from_slice(&srid.to_le_bytes());
    } else {
        out.extend_from_slice(&raw_type.to_be_bytes());
        out.extend_from_slice(&srid.to_be_bytes());
    }
    out.extend_from_slice(&iso_wkb[5..]);
    Ok(out)
}

/// Serialise to EWKB when an SRID is attached, ISO WKB otherwise.
pub fn encode_bytes(value: &GeometryValue) -> Result<Vec<u8>> {
    let iso = value.geometry().to_wkb(CoordDimensions::xy())?;
    match value.srid() {
        Some(srid) => with_srid_flag(iso, srid),
        None => Ok(iso),
    }
}

/// Upper-case hex of [`encode_bytes`].
pub fn encode_hex(value: &GeometryValue) -> Result<String> {
    Ok(hex::encode_upper(encode_bytes(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Point};

    fn le_point(x: f64, y: f64) -> Vec<u8> {
        let mut blob = vec![0x01];
        blob.extend_from_slice(&1u32.to_le_bytes());
        blob.extend_from_slice(&x.to_le_bytes());
        blob.extend_from_slice(&y.to_le_bytes());
        blob
    }

    #[test]
    fn header_rejects_short_and_bad_marker() {
        assert!(read_header(&[0x01, 0x02]).is_err());
        assert!(read_header(&[0x02, 0x01, 0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn header_rejects_unknown_type_code() {
        let mut blob = vec![0x01];
        blob.extend_from_slice(&42u32.to_le_bytes());
        assert!(read_header(&blob).is_err());
    }

    #[test]
    fn big_endian_point_with_srid() {
        let mut blob = vec![0x00];
        blob.extend_from_slice(&(1u32 | EWKB_SRID_FLAG).to_be_bytes());
        blob.extend_from_slice(&4326i32.to_be_bytes());
        blob.extend_from_slice(&10.0f64.to_be_bytes());
        blob.extend_from_slice(&(-20.0f64).to_be_bytes());

        let value = decode_bytes(&blob).unwrap();
        assert_eq!(value.srid(), Some(4326));
        assert_eq!(value.geometry(), &Geometry::Point(Point::new(10.0, -20.0)));
    }

    #[test]
    fn zm_payload_is_rejected() {
        let mut blob = vec![0x01];
        blob.extend_from_slice(&(1u32 | EWKB_Z_FLAG | EWKB_M_FLAG).to_le_bytes());
        for v in [1.0f64, 2.0, 3.0, 4.0] {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        let err = decode_bytes(&blob).unwrap_err();
        assert!(format!("{err}").contains("unsupported coordinate dimensions"));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        let mut blob = vec![0x01];
        blob.extend_from_slice(&2u32.to_le_bytes());
        blob.extend_from_slice(&1u32.to_le_bytes());
        assert!(decode_bytes(&blob).is_err());
    }

    #[test]
    fn encode_without_srid_is_iso_wkb() {
        let blob = encode_bytes(&GeometryValue::point(131.0, 31.0)).unwrap();
        assert_eq!(blob, le_point(131.0, 31.0));
        assert_eq!(blob.len(), 21);
    }

    #[test]
    fn encode_with_srid_sets_flag() {
        let value = GeometryValue::point(1.0, 2.0).with_srid(Some(4490));
        let blob = encode_bytes(&value).unwrap();
        assert_eq!(blob.len(), 25);
        assert_eq!(read_header(&blob).unwrap().srid, Some(4490));
        assert_eq!(decode_bytes(&blob).unwrap(), value);
    }

    #[test]
    fn hex_prefixes_and_case_are_accepted() {
        let hex_lower = hex::encode(le_point(131.0, 31.0));
        assert!(hex_to_bytes(&hex_lower).is_some());
        assert!(hex_to_bytes(&format!("\\x{hex_lower}")).is_some());
        assert!(hex_to_bytes(&format!("0x{}", hex_lower.to_uppercase())).is_some());
        assert!(hex_to_bytes("abc").is_none());
        assert!(hex_to_bytes("POINT(1 2)").is_none());
    }

    #[test]
    fn polygon_hex_round_trip() {
        let poly = polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0)];
        let value = GeometryValue::new(Geometry::Polygon(poly)).unwrap();
        let hex_text = encode_hex(&value).unwrap();
        assert!(hex_text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_eq!(decode_hex(&hex_text).unwrap(), value);
    }
}
