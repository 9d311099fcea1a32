use crate::error::SpatialError;
use crate::types::{GeometryKind, GeometryTypeName};

#[inline]
pub(crate) fn geometry_kind_to_str(kind: GeometryKind) -> &'static str {
    match kind {
        GeometryKind::Geometry => "GEOMETRY",
        GeometryKind::Point => "POINT",
        GeometryKind::LineString => "LINESTRING",
        GeometryKind::Polygon => "POLYGON",
        GeometryKind::MultiPoint => "MULTIPOINT",
        GeometryKind::MultiLineString => "MULTILINESTRING",
        GeometryKind::MultiPolygon => "MULTIPOLYGON",
        GeometryKind::GeometryCollection => "GEOMETRYCOLLECTION",
        GeometryKind::Curve => "CURVE",
    }
}

#[inline]
pub(crate) fn geometry_kind_from_str(s: &str) -> Option<GeometryKind> {
    if s.eq_ignore_ascii_case("GEOMETRY") {
        Some(GeometryKind::Geometry)
    } else if s.eq_ignore_ascii_case("POINT") {
        Some(GeometryKind::Point)
    } else if s.eq_ignore_ascii_case("LINESTRING") {
        Some(GeometryKind::LineString)
    } else if s.eq_ignore_ascii_case("POLYGON") {
        Some(GeometryKind::Polygon)
    } else if s.eq_ignore_ascii_case("MULTIPOINT") {
        Some(GeometryKind::MultiPoint)
    } else if s.eq_ignore_ascii_case("MULTILINESTRING") {
        Some(GeometryKind::MultiLineString)
    } else if s.eq_ignore_ascii_case("MULTIPOLYGON") {
        Some(GeometryKind::MultiPolygon)
    } else if s.eq_ignore_ascii_case("GEOMETRYCOLLECTION") {
        Some(GeometryKind::GeometryCollection)
    } else if s.eq_ignore_ascii_case("CURVE") {
        Some(GeometryKind::Curve)
    } else {
        None
    }
}

/// Parse names such as `POINT`, `pointz`, `MULTIPOLYGONZM` or `LINESTRINGM`.
pub(crate) fn geometry_type_from_str(s: &str) -> Result<GeometryTypeName, SpatialError> {
    let upper = s.trim().to_ascii_uppercase();
    let candidates = [
        ("ZM", true, true),
        ("Z", true, false),
        ("M", false, true),
        ("", false, false),
    ];
    for (suffix, has_z, has_m) in candidates {
        let Some(base) = upper.strip_suffix(suffix) else {
            continue;
        };
        if let Some(kind) = geometry_kind_from_str(base) {
            return Ok(GeometryTypeName { kind, has_z, has_m });
        }
    }
    Err(SpatialError::InvalidGeometryType(s.to_string()))
}

#[inline]
pub(crate) fn zm_suffix(has_z: bool, has_m: bool) -> &'static str {
    match (has_z, has_m) {
        (true, true) => "ZM",
        (true, false) => "Z",
        (false, true) => "M",
        (false, false) => "",
    }
}

/// SpatiaLite `coord_dimension` text (`XY`, `XYZ`, `XYM`, `XYZM`).
#[inline]
pub(crate) fn coord_dimension_str(has_z: bool, has_m: bool) -> &'static str {
    match (has_z, has_m) {
        (true, true) => "XYZM",
        (true, false) => "XYZ",
        (false, true) => "XYM",
        (false, false) => "XY",
    }
}

#[inline]
pub(crate) fn dimension_from_zm(has_z: bool, has_m: bool) -> u8 {
    2 + u8::from(has_z) + u8::from(has_m)
}

/// GeoPackage `z`/`m` flags.
#[inline]
pub(crate) fn gpkg_zm_from_flags(z: i64, m: i64) -> Option<(bool, bool)> {
    match (z, m) {
        (0, 0) => Some((false, false)),
        (1, 0) => Some((true, false)),
        (0, 1) => Some((false, true)),
        (1, 1) => Some((true, true)),
        // 2 means "optional"; there is no column type for that, so treat as invalid
        _ => None,
    }
}

/// SpatiaLite 4 stores geometry types as integer codes: the last digit is the
/// base type and the thousands digit encodes Z (1), M (2) or ZM (3).
pub(crate) fn spatialite_type_from_code(code: i64) -> Option<GeometryTypeName> {
    let kind = match code % 1000 {
        0 => GeometryKind::Geometry,
        1 => GeometryKind::Point,
        2 => GeometryKind::LineString,
        3 => GeometryKind::Polygon,
        4 => GeometryKind::MultiPoint,
        5 => GeometryKind::MultiLineString,
        6 => GeometryKind::MultiPolygon,
        7 => GeometryKind::GeometryCollection,
        _ => return None,
    };
    let (has_z, has_m) = match code / 1000 {
        0 => (false, false),
        1 => (true, false),
        2 => (false, true),
        3 => (true, true),
        _ => return None,
    };
    Some(GeometryTypeName { kind, has_z, has_m })
}

/// SpatiaLite 3 `coord_dimension` values, either text or a plain number.
pub(crate) fn zm_from_coord_dimension(value: &str) -> Option<(bool, bool)> {
    let s = value.trim();
    if s.eq_ignore_ascii_case("XY") || s == "2" {
        Some((false, false))
    } else if s.eq_ignore_ascii_case("XYZ") || s == "3" {
        Some((true, false))
    } else if s.eq_ignore_ascii_case("XYM") {
        Some((false, true))
    } else if s.eq_ignore_ascii_case("XYZM") || s == "4" {
        Some((true, true))
    } else {
        None
    }
}

/// Whether a declared column type names a geometry type.
#[inline]
pub(crate) fn is_geometry_type_name(s: &str) -> bool {
    geometry_type_from_str(s).is_ok()
}
