//! Catalog of known spatial functions.
//!
//! The catalog only records what compilation needs: the return type of each
//! function and which argument positions take a geometry, so plain text or
//! bytes passed there are wrapped in a constructor. Functions missing from
//! the catalog are still callable through [`func`]; they compile under their
//! own name with an untyped result.

use crate::expr::{Expr, FunctionCall};
use crate::types::{SpatialKind, SpatialType, SqlType};

/// Declared result of a cataloged function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Geometry,
    Geography,
    Raster,
    Box2d,
    Box3d,
    GeometryDump,
    SummaryStats,
    Boolean,
    Integer,
    Real,
    Text,
    Blob,
}

impl ReturnType {
    pub fn to_sql_type(self) -> SqlType {
        match self {
            Self::Geometry => SqlType::Spatial(SpatialType::default_geometry()),
            Self::Geography => SqlType::Spatial(SpatialType::default_for(SpatialKind::Geography)),
            Self::Raster => SqlType::Spatial(SpatialType::raster()),
            Self::Box2d => SqlType::Box2d,
            Self::Box3d => SqlType::Box3d,
            Self::GeometryDump => SqlType::GeometryDump,
            Self::SummaryStats => SqlType::SummaryStats,
            Self::Boolean => SqlType::Boolean,
            Self::Integer => SqlType::Integer,
            Self::Real => SqlType::Real,
            Self::Text => SqlType::Text,
            Self::Blob => SqlType::Blob,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub return_type: ReturnType,
    /// Argument positions that take a geometry.
    pub spatial_args: &'static [usize],
}

const fn spec(
    name: &'static str,
    return_type: ReturnType,
    spatial_args: &'static [usize],
) -> FunctionSpec {
    FunctionSpec {
        name,
        return_type,
        spatial_args,
    }
}

const NONE: &[usize] = &[];
const FIRST: &[usize] = &[0];
const SECOND: &[usize] = &[1];
const BOTH: &[usize] = &[0, 1];

use ReturnType::*;

pub const CATALOG: &[FunctionSpec] = &[
    // constructors
    spec("ST_GeomFromText", Geometry, NONE),
    spec("ST_GeomFromEWKT", Geometry, NONE),
    spec("ST_GeomFromWKB", Geometry, NONE),
    spec("ST_GeomFromEWKB", Geometry, NONE),
    spec("ST_GeomFromGeoJSON", Geometry, NONE),
    spec("ST_GeogFromText", Geography, NONE),
    spec("ST_GeogFromWKB", Geography, NONE),
    spec("ST_MakePoint", Geometry, NONE),
    spec("ST_Point", Geometry, NONE),
    spec("ST_MakeEnvelope", Geometry, NONE),
    spec("ST_MakeLine", Geometry, BOTH),
    spec("ST_MakePolygon", Geometry, FIRST),
    // geometry processing
    spec("ST_Boundary", Geometry, FIRST),
    spec("ST_Buffer", Geometry, FIRST),
    spec("ST_Centroid", Geometry, FIRST),
    spec("ST_ClosestPoint", Geometry, BOTH),
    spec("ST_Collect", Geometry, BOTH),
    spec("ST_ConvexHull", Geometry, FIRST),
    spec("ST_Difference", Geometry, BOTH),
    spec("ST_EndPoint", Geometry, FIRST),
    spec("ST_Envelope", Geometry, FIRST),
    spec("ST_Expand", Geometry, FIRST),
    spec("ST_ExteriorRing", Geometry, FIRST),
    spec("ST_FlipCoordinates", Geometry, FIRST),
    spec("ST_Force2D", Geometry, FIRST),
    spec("ST_Force3D", Geometry, FIRST),
    spec("ST_GeometryN", Geometry, FIRST),
    spec("ST_InteriorRingN", Geometry, FIRST),
    spec("ST_Intersection", Geometry, BOTH),
    spec("ST_LineInterpolatePoint", Geometry, FIRST),
    spec("ST_LineMerge", Geometry, FIRST),
    spec("ST_MakeValid", Geometry, FIRST),
    spec("ST_Multi", Geometry, FIRST),
    spec("ST_PointN", Geometry, FIRST),
    spec("ST_PointOnSurface", Geometry, FIRST),
    spec("ST_Reverse", Geometry, FIRST),
    spec("ST_Rotate", Geometry, FIRST),
    spec("ST_Scale", Geometry, FIRST),
    spec("ST_Segmentize", Geometry, FIRST),
    spec("ST_SetSRID", Geometry, FIRST),
    spec("ST_ShortestLine", Geometry, BOTH),
    spec("ST_Simplify", Geometry, FIRST),
    spec("ST_SimplifyPreserveTopology", Geometry, FIRST),
    spec("ST_SnapToGrid", Geometry, FIRST),
    spec("ST_StartPoint", Geometry, FIRST),
    spec("ST_SymDifference", Geometry, BOTH),
    spec("ST_Transform", Geometry, FIRST),
    spec("ST_Translate", Geometry, FIRST),
    spec("ST_Union", Geometry, BOTH),
    // predicates
    spec("ST_Contains", Boolean, BOTH),
    spec("ST_ContainsProperly", Boolean, BOTH),
    spec("ST_CoveredBy", Boolean, BOTH),
    spec("ST_Covers", Boolean, BOTH),
    spec("ST_Crosses", Boolean, BOTH),
    spec("ST_DFullyWithin", Boolean, BOTH),
    spec("ST_DWithin", Boolean, BOTH),
    spec("ST_Disjoint", Boolean, BOTH),
    spec("ST_Equals", Boolean, BOTH),
    spec("ST_Intersects", Boolean, BOTH),
    spec("ST_OrderingEquals", Boolean, BOTH),
    spec("ST_Overlaps", Boolean, BOTH),
    spec("ST_Touches", Boolean, BOTH),
    spec("ST_Within", Boolean, BOTH),
    spec("ST_3DIntersects", Boolean, BOTH),
    spec("ST_IsClosed", Boolean, FIRST),
    spec("ST_IsEmpty", Boolean, FIRST),
    spec("ST_IsRing", Boolean, FIRST),
    spec("ST_IsSimple", Boolean, FIRST),
    spec("ST_IsValid", Boolean, FIRST),
    // measurements
    spec("ST_Area", Real, FIRST),
    spec("ST_Azimuth", Real, BOTH),
    spec("ST_Distance", Real, BOTH),
    spec("ST_DistanceSphere", Real, BOTH),
    spec("ST_HausdorffDistance", Real, BOTH),
    spec("ST_Length", Real, FIRST),
    spec("ST_LineLocatePoint", Real, BOTH),
    spec("ST_MaxDistance", Real, BOTH),
    spec("ST_Perimeter", Real, FIRST),
    spec("ST_3DDistance", Real, BOTH),
    spec("ST_X", Real, FIRST),
    spec("ST_Y", Real, FIRST),
    spec("ST_Z", Real, FIRST),
    spec("ST_M", Real, FIRST),
    spec("ST_XMin", Real, FIRST),
    spec("ST_XMax", Real, FIRST),
    spec("ST_YMin", Real, FIRST),
    spec("ST_YMax", Real, FIRST),
    // accessors
    spec("ST_CoordDim", Integer, FIRST),
    spec("ST_Dimension", Integer, FIRST),
    spec("ST_NDims", Integer, FIRST),
    spec("ST_NPoints", Integer, FIRST),
    spec("ST_NumGeometries", Integer, FIRST),
    spec("ST_NumInteriorRings", Integer, FIRST),
    spec("ST_SRID", Integer, FIRST),
    spec("ST_Zmflag", Integer, FIRST),
    spec("GeometryType", Text, FIRST),
    spec("ST_GeometryType", Text, FIRST),
    // output
    spec("ST_AsBinary", Blob, FIRST),
    spec("ST_AsEWKB", Blob, FIRST),
    spec("ST_AsTWKB", Blob, FIRST),
    spec("ST_AsEWKT", Text, FIRST),
    spec("ST_AsGeoJSON", Text, FIRST),
    spec("ST_AsGML", Text, FIRST),
    spec("ST_AsKML", Text, FIRST),
    spec("ST_AsSVG", Text, FIRST),
    spec("ST_AsText", Text, FIRST),
    spec("ST_GeoHash", Text, FIRST),
    // bounding boxes
    spec("Box2D", Box2d, FIRST),
    spec("Box3D", Box3d, FIRST),
    spec("ST_Extent", Box2d, FIRST),
    spec("ST_3DExtent", Box3d, FIRST),
    // composite results
    spec("ST_Dump", GeometryDump, FIRST),
    spec("ST_DumpPoints", GeometryDump, FIRST),
    spec("ST_DumpRings", GeometryDump, FIRST),
    // rasters
    spec("ST_AsRaster", Raster, FIRST),
    spec("ST_Band", Raster, NONE),
    spec("ST_Clip", Raster, SECOND),
    spec("ST_MapAlgebra", Raster, NONE),
    spec("ST_Resize", Raster, NONE),
    spec("ST_SummaryStats", SummaryStats, NONE),
    spec("ST_SummaryStatsAgg", SummaryStats, NONE),
    spec("ST_Value", Real, SECOND),
];

/// Look up a function by name, ignoring case.
pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    CATALOG
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(name))
}

/// Build a call to `name`; the result type comes from the catalog.
///
/// ```
/// use spatial_dialects::{Compiler, Expr, SpatialType, func, select_dialect, Backend};
///
/// let geom = Expr::column("lake", "geom", SpatialType::polygon(4326));
/// let expr = func("ST_Buffer", vec![geom, 2.0.into()]);
/// let compiled = Compiler::new(select_dialect(Backend::PostgreSQL)).compile_expr(&expr)?;
/// assert_eq!(compiled.sql, r#"ST_Buffer("lake"."geom", $1)"#);
/// # Ok::<(), spatial_dialects::SpatialError>(())
/// ```
pub fn func(name: &str, args: Vec<Expr>) -> Expr {
    Expr::Function(call(name, args))
}

/// Same as [`func`], returning the call itself so keyword arguments can be
/// added.
pub fn call(name: &str, args: Vec<Expr>) -> FunctionCall {
    let return_type = lookup(name)
        .map(|spec| spec.return_type.to_sql_type())
        .unwrap_or(SqlType::Untyped);
    FunctionCall {
        name: name.to_string(),
        args,
        kwargs: Vec::new(),
        return_type,
    }
}

/// Call `name` with an explicit result type.
pub fn typed_func(name: &str, args: Vec<Expr>, return_type: SqlType) -> Expr {
    Expr::Function(FunctionCall {
        return_type,
        ..call(name, args)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn catalog_names_are_unique() {
        let mut seen = HashSet::new();
        for spec in CATALOG {
            assert!(
                seen.insert(spec.name.to_ascii_lowercase()),
                "duplicate entry {}",
                spec.name
            );
        }
    }

    #[test]
    fn lookup_ignores_case() {
        let spec = lookup("st_buffer").unwrap();
        assert_eq!(spec.name, "ST_Buffer");
        assert_eq!(spec.spatial_args, &[0]);
        assert!(lookup("ST_NoSuchFunction").is_none());
    }

    #[test]
    fn unknown_function_is_untyped() {
        assert_eq!(func("ST_Whatever", Vec::new()).sql_type(), SqlType::Untyped);
        assert_eq!(
            typed_func("ST_Whatever", Vec::new(), SqlType::Integer).sql_type(),
            SqlType::Integer
        );
    }
}
