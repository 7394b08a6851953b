//! Helpers for PostGIS extended WKB values.

use bytes::Buf;
use geozero::wkb::Ewkb;
use geozero::{CoordDimensions, ToWkb};

const SRID_FLAG: u32 = 0x2000_0000;

/// Reads the SRID embedded in an EWKB header.
///
/// Returns `None` when the value carries no SRID or SRID 0 (unknown).
#[must_use]
pub fn ewkb_srid(ewkb: &[u8]) -> Option<i32> {
    let mut buf = ewkb;
    if buf.remaining() < 9 {
        return None;
    }

    let little_endian = buf.get_u8() == 1;
    let type_id = if little_endian {
        buf.get_u32_le()
    } else {
        buf.get_u32()
    };
    if type_id & SRID_FLAG == 0 {
        return None;
    }

    let srid = if little_endian {
        buf.get_i32_le()
    } else {
        buf.get_i32()
    };
    (srid > 0).then_some(srid)
}

/// Re-encodes an EWKB value as 2D ISO WKB.
///
/// Z and M ordinates are dropped; the SRID is dropped from the value and is
/// expected to travel with the column instead.
///
/// # Errors
///
/// Returns the parser message if the value is not valid EWKB.
pub fn ewkb_to_wkb(ewkb: &[u8]) -> Result<Vec<u8>, String> {
    Ewkb(ewkb)
        .to_wkb(CoordDimensions::xy())
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geozero::ToGeo;
    use geozero::wkb::Wkb;

    // POINT(10 -20) with SRID 4326
    const POINT_4326: [u8; 25] = [
        1, 1, 0, 0, 32, 230, 16, 0, 0, 0, 0, 0, 0, 0, 0, 36, 64, 0, 0, 0, 0, 0, 0, 52, 192,
    ];
    // POINT(10 -20) without SRID
    const POINT_PLAIN: [u8; 21] = [
        1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 36, 64, 0, 0, 0, 0, 0, 0, 52, 192,
    ];

    #[test]
    fn test_srid_little_endian() {
        assert_eq!(ewkb_srid(&POINT_4326), Some(4326));
    }

    #[test]
    fn test_srid_big_endian() {
        let header = [0, 0x20, 0, 0, 1, 0, 0, 0x0F, 0x6C];
        assert_eq!(ewkb_srid(&header), Some(3948));
    }

    #[test]
    fn test_srid_absent() {
        assert_eq!(ewkb_srid(&POINT_PLAIN), None);
        assert_eq!(ewkb_srid(&[1, 1]), None);
    }

    #[test]
    fn test_srid_zero_is_unknown() {
        let header = [1, 1, 0, 0, 32, 0, 0, 0, 0];
        assert_eq!(ewkb_srid(&header), None);
    }

    #[test]
    fn test_ewkb_to_wkb_strips_srid() {
        let wkb = ewkb_to_wkb(&POINT_4326).unwrap();
        assert_eq!(wkb, POINT_PLAIN.to_vec());

        let geometry = Wkb(wkb).to_geo().unwrap();
        assert_eq!(
            geometry,
            geo_types::Geometry::Point(geo_types::Point::new(10.0, -20.0))
        );
    }

    #[test]
    fn test_ewkb_to_wkb_invalid() {
        assert!(ewkb_to_wkb(&[1, 99, 0, 0, 0]).is_err());
    }
}
