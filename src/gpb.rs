//! GeoPackage binary geometry encoding.
// cf. https://www.geopackage.org/spec140/index.html#gpb_format

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{Result, SpatialError};

const HEADER_LEN: usize = 8;

fn envelope_size(flags: u8) -> Result<usize> {
    match flags & 0b00001110 {
        0b00000000 => Ok(0),  // no envelope
        0b00000010 => Ok(32), // [minx, maxx, miny, maxy]
        0b00000100 => Ok(48), // [minx, maxx, miny, maxy, minz, maxz]
        0b00000110 => Ok(48), // [minx, maxx, miny, maxy, minm, maxm]
        0b00001000 => Ok(64), // [minx, maxx, miny, maxy, minz, maxz, minm, maxm]
        _ => Err(SpatialError::InvalidGpkgGeometryFlags(flags)),
    }
}

fn check_header(b: &[u8]) -> Result<()> {
    if b.len() < HEADER_LEN {
        return Err(SpatialError::InvalidGpkgGeometryLength {
            len: b.len(),
            minimum: HEADER_LEN,
        });
    }
    Ok(())
}

/// Whether the blob starts with the `GP` magic.
pub(crate) fn is_gpb(b: &[u8]) -> bool {
    b.len() >= HEADER_LEN && b[0] == 0x47 && b[1] == 0x50
}

/// Borrow the WKB payload of a GeoPackage geometry blob.
pub(crate) fn gpb_to_wkb(b: &[u8]) -> Result<&[u8]> {
    check_header(b)?;
    let offset = HEADER_LEN + envelope_size(b[3])?;
    if b.len() < offset {
        return Err(SpatialError::InvalidGpkgGeometryEnvelope {
            len: b.len(),
            required: offset,
        });
    }
    Ok(&b[offset..])
}

/// Read the `srs_id` stored in a GeoPackage geometry header.
pub(crate) fn gpb_srs_id(b: &[u8]) -> Result<i32> {
    check_header(b)?;
    let bytes = &b[4..8];
    // bit 0 of the flags byte selects little endian for the header
    Ok(if b[3] & 0b00000001 == 1 {
        LittleEndian::read_i32(bytes)
    } else {
        BigEndian::read_i32(bytes)
    })
}

/// Wrap ISO WKB into a GeoPackage geometry blob without an envelope.
pub(crate) fn wkb_to_gpb(wkb: &[u8], srs_id: i32) -> Vec<u8> {
    let mut geom = Vec::with_capacity(wkb.len() + HEADER_LEN);
    geom.extend_from_slice(&[
        0x47u8, // magic
        0x50u8, // magic
        0x00u8, // version
        0x01u8, // flags (little endian SRS ID, no envelope)
    ]);
    geom.extend_from_slice(&srs_id.to_le_bytes());
    geom.extend_from_slice(wkb);
    geom
}

#[cfg(test)]
mod tests {
    use super::{gpb_srs_id, gpb_to_wkb, is_gpb, wkb_to_gpb};
    use crate::Result;
    use crate::error::SpatialError;
    use geo_types::Point;

    #[test]
    fn gpkg_geometry_roundtrip() -> Result<()> {
        let point = Point::new(3.0, -1.0);
        let mut wkb = Vec::new();
        wkb::writer::write_geometry(&mut wkb, &point, &Default::default())?;
        let blob = wkb_to_gpb(&wkb, 4326);

        assert!(is_gpb(&blob));
        assert_eq!(gpb_srs_id(&blob)?, 4326);
        assert_eq!(gpb_to_wkb(&blob)?, wkb.as_slice());
        Ok(())
    }

    #[test]
    fn gpkg_geometry_rejects_invalid_flags() {
        let mut blob = vec![0x47, 0x50, 0x00, 0x0A, 0, 0, 0, 0];
        blob.extend_from_slice(&[0; 16]);
        assert!(matches!(
            gpb_to_wkb(&blob),
            Err(SpatialError::InvalidGpkgGeometryFlags(0x0A))
        ));
    }

    #[test]
    fn gpkg_geometry_rejects_short_envelope() {
        // flags declare a 32 byte envelope but only 8 bytes follow
        let mut blob = vec![0x47, 0x50, 0x00, 0x03, 0, 0, 0, 0];
        blob.extend_from_slice(&[0; 8]);
        assert!(matches!(
            gpb_to_wkb(&blob),
            Err(SpatialError::InvalidGpkgGeometryEnvelope {
                len: 16,
                required: 40
            })
        ));
    }

    #[test]
    fn big_endian_srs_id() -> Result<()> {
        let blob = [0x47, 0x50, 0x00, 0x00, 0x00, 0x00, 0x10, 0xE6];
        assert_eq!(gpb_srs_id(&blob)?, 4326);
        Ok(())
    }
}
