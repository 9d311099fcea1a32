//! Header-level codec for PostGIS extended WKB.
//!
//! EWKB differs from ISO WKB only in the geometry type word: the high bits
//! carry Z/M/SRID flags and, when the SRID flag is set, a 4-byte SRID follows
//! the type word. Nested geometries repeat the flags but never the SRID.

use std::io::{Cursor, Read};

use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};

use crate::error::{Result, SpatialError};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct EwkbFlags: u32 {
        const HAS_BBOX = 0x1000_0000;
        const HAS_SRID = 0x2000_0000;
        const HAS_M = 0x4000_0000;
        const HAS_Z = 0x8000_0000;
    }
}

const FLAG_MASK: u32 = 0xF000_0000;
const HEADER_LEN: usize = 5;
const SRID_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub little_endian: bool,
    pub type_word: u32,
}

impl Header {
    pub fn flags(&self) -> EwkbFlags {
        EwkbFlags::from_bits_truncate(self.type_word & FLAG_MASK)
    }

    pub fn has_srid(&self) -> bool {
        self.flags().contains(EwkbFlags::HAS_SRID)
    }

    /// Geometry code (1..=7) and whether Z and M ordinates are present,
    /// accepting both EWKB flags and ISO thousands.
    pub fn geometry_code(&self) -> (u32, bool, bool) {
        let flags = self.flags();
        let iso = self.type_word & !FLAG_MASK;
        let (iso_z, iso_m) = match iso / 1000 {
            1 => (true, false),
            2 => (false, true),
            3 => (true, true),
            _ => (false, false),
        };
        (
            iso % 1000,
            iso_z || flags.contains(EwkbFlags::HAS_Z),
            iso_m || flags.contains(EwkbFlags::HAS_M),
        )
    }
}

pub(crate) fn read_header(buf: &[u8]) -> Option<Header> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let little_endian = match buf[0] {
        0 => false,
        1 => true,
        _ => return None,
    };
    let type_word = if little_endian {
        LittleEndian::read_u32(&buf[1..5])
    } else {
        BigEndian::read_u32(&buf[1..5])
    };
    Some(Header {
        little_endian,
        type_word,
    })
}

/// Read the SRID embedded in an EWKB buffer.
///
/// Returns `None` when the SRID flag is not set and `Some(0)` when the flag is
/// set but the buffer is truncated.
pub(crate) fn read_srid(buf: &[u8]) -> Option<i32> {
    let header = read_header(buf)?;
    if !header.has_srid() {
        return None;
    }
    if buf.len() < HEADER_LEN + SRID_LEN {
        return Some(0);
    }
    let bytes = &buf[HEADER_LEN..HEADER_LEN + SRID_LEN];
    Some(if header.little_endian {
        LittleEndian::read_i32(bytes)
    } else {
        BigEndian::read_i32(bytes)
    })
}

fn write_u32(out: &mut Vec<u8>, little_endian: bool, value: u32) {
    let mut word = [0u8; 4];
    if little_endian {
        LittleEndian::write_u32(&mut word, value);
    } else {
        BigEndian::write_u32(&mut word, value);
    }
    out.extend_from_slice(&word);
}

/// Remove the SRID (if any) from the top-level header, keeping the rest intact.
pub(crate) fn strip_srid(buf: &[u8]) -> Vec<u8> {
    let Some(header) = read_header(buf) else {
        return buf.to_vec();
    };
    if !header.has_srid() || buf.len() < HEADER_LEN + SRID_LEN {
        return buf.to_vec();
    }
    let mut out = Vec::with_capacity(buf.len() - SRID_LEN);
    out.push(buf[0]);
    let type_word = header.type_word & !EwkbFlags::HAS_SRID.bits();
    write_u32(&mut out, header.little_endian, type_word);
    out.extend_from_slice(&buf[HEADER_LEN + SRID_LEN..]);
    out
}

/// Set the top-level SRID, replacing any existing one.
///
/// ISO dimension thousands are converted into EWKB flags at the top level so
/// the result is a well-formed EWKB header.
pub(crate) fn inject_srid(buf: &[u8], srid: i32) -> Vec<u8> {
    let plain = strip_srid(buf);
    let Some(header) = read_header(&plain) else {
        return plain;
    };
    let (code, has_z, has_m) = header.geometry_code();
    let mut flags = header.flags() | EwkbFlags::HAS_SRID;
    flags.set(EwkbFlags::HAS_Z, has_z);
    flags.set(EwkbFlags::HAS_M, has_m);

    let mut out = Vec::with_capacity(plain.len() + SRID_LEN);
    out.push(plain[0]);
    write_u32(&mut out, header.little_endian, code | flags.bits());
    write_u32(&mut out, header.little_endian, srid as u32);
    out.extend_from_slice(&plain[HEADER_LEN..]);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Iso,
    Extended,
}

/// Rewrite an (E)WKB buffer as ISO WKB: drop SRIDs and turn Z/M flags into
/// type-code thousands, recursively.
pub(crate) fn to_iso(buf: &[u8]) -> Result<Vec<u8>> {
    rewrite(buf, Target::Iso, None)
}

/// Rewrite an (ISO or E)WKB buffer as EWKB with Z/M flags at every level and
/// `srid`, if any, on the outer header only.
pub(crate) fn to_extended(buf: &[u8], srid: Option<i32>) -> Result<Vec<u8>> {
    rewrite(buf, Target::Extended, srid)
}

fn rewrite(buf: &[u8], target: Target, srid: Option<i32>) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(buf);
    let mut out = Vec::with_capacity(buf.len() + SRID_LEN);
    copy_geometry(&mut cursor, &mut out, target, srid)?;
    Ok(out)
}

fn truncated() -> SpatialError {
    SpatialError::ShapeConversion("truncated WKB payload".to_string())
}

fn copy_geometry(
    cursor: &mut Cursor<&[u8]>,
    out: &mut Vec<u8>,
    target: Target,
    srid: Option<i32>,
) -> Result<()> {
    let order = cursor.read_u8().map_err(|_| truncated())?;
    let little_endian = match order {
        0 => false,
        1 => true,
        other => {
            return Err(SpatialError::ShapeConversion(format!(
                "invalid WKB byte order marker: {other}"
            )));
        }
    };
    let type_word = read_u32(cursor, little_endian)?;
    let header = Header {
        little_endian,
        type_word,
    };
    if header.has_srid() {
        read_u32(cursor, little_endian)?;
    }
    if header.flags().contains(EwkbFlags::HAS_BBOX) {
        return Err(SpatialError::ShapeConversion(
            "EWKB bounding boxes are not supported".to_string(),
        ));
    }

    let (code, has_z, has_m) = header.geometry_code();
    let ordinates = 2 + usize::from(has_z) + usize::from(has_m);
    let type_word = match target {
        Target::Iso => {
            code + match (has_z, has_m) {
                (true, true) => 3000,
                (true, false) => 1000,
                (false, true) => 2000,
                (false, false) => 0,
            }
        }
        Target::Extended => {
            let mut flags = EwkbFlags::empty();
            flags.set(EwkbFlags::HAS_Z, has_z);
            flags.set(EwkbFlags::HAS_M, has_m);
            flags.set(EwkbFlags::HAS_SRID, srid.is_some());
            code | flags.bits()
        }
    };
    out.push(order);
    write_u32(out, little_endian, type_word);
    if let (Target::Extended, Some(srid)) = (target, srid) {
        write_u32(out, little_endian, srid as u32);
    }

    match code {
        1 => copy_bytes(cursor, out, ordinates * 8),
        2 => copy_points(cursor, out, little_endian, ordinates),
        3 => {
            let rings = copy_count(cursor, out, little_endian)?;
            for _ in 0..rings {
                copy_points(cursor, out, little_endian, ordinates)?;
            }
            Ok(())
        }
        4..=7 => {
            let parts = copy_count(cursor, out, little_endian)?;
            for _ in 0..parts {
                copy_geometry(cursor, out, target, None)?;
            }
            Ok(())
        }
        other => Err(SpatialError::ShapeConversion(format!(
            "unsupported WKB geometry code: {other}"
        ))),
    }
}

fn read_u32(cursor: &mut Cursor<&[u8]>, little_endian: bool) -> Result<u32> {
    let value = if little_endian {
        cursor.read_u32::<LittleEndian>()
    } else {
        cursor.read_u32::<BigEndian>()
    };
    value.map_err(|_| truncated())
}

fn copy_count(cursor: &mut Cursor<&[u8]>, out: &mut Vec<u8>, little_endian: bool) -> Result<u32> {
    let count = read_u32(cursor, little_endian)?;
    write_u32(out, little_endian, count);
    Ok(count)
}

fn copy_points(
    cursor: &mut Cursor<&[u8]>,
    out: &mut Vec<u8>,
    little_endian: bool,
    ordinates: usize,
) -> Result<()> {
    let count = copy_count(cursor, out, little_endian)? as usize;
    copy_bytes(cursor, out, count * ordinates * 8)
}

fn copy_bytes(cursor: &mut Cursor<&[u8]>, out: &mut Vec<u8>, len: usize) -> Result<()> {
    let start = out.len();
    out.resize(start + len, 0);
    cursor.read_exact(&mut out[start..]).map_err(|_| truncated())
}
