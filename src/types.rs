//! Spatial column types.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::Value;

use crate::conversions::{
    dimension_from_zm, geometry_kind_to_str, geometry_type_from_str, zm_suffix,
};
use crate::dialect::SpatialDialect;
use crate::elements::{RasterElement, SpatialElement, UNSET_SRID, WkbElement, WktElement};
use crate::error::{Result, SpatialError};
use crate::expr::Expr;

/// Which family of spatial values a column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialKind {
    Geometry,
    Geography,
    Raster,
}

/// Base geometry type, without dimension suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    Geometry,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
    Curve,
}

/// A geometry type constraint such as `POINT` or `POLYGONZM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryTypeName {
    pub kind: GeometryKind,
    pub has_z: bool,
    pub has_m: bool,
}

impl GeometryTypeName {
    pub fn new(kind: GeometryKind) -> Self {
        Self {
            kind,
            has_z: false,
            has_m: false,
        }
    }

    /// Name of the base type (`POINT` for `POINTZ`).
    pub fn base_name(&self) -> &'static str {
        geometry_kind_to_str(self.kind)
    }

    /// Coordinate dimension implied by the suffix.
    pub fn dimension(&self) -> u8 {
        dimension_from_zm(self.has_z, self.has_m)
    }
}

impl FromStr for GeometryTypeName {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self> {
        geometry_type_from_str(s)
    }
}

impl fmt::Display for GeometryTypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            self.base_name(),
            zm_suffix(self.has_z, self.has_m)
        )
    }
}

/// Column type descriptor for geometry, geography and raster columns.
///
/// Instances are built through [`SpatialTypeBuilder`], which validates the
/// combination of options, and are immutable afterwards.
///
/// ```
/// use spatial_dialects::SpatialType;
///
/// let ty = SpatialType::geometry("POLYGON", 4326)?;
/// assert_eq!(ty.get_col_spec(), "geometry(POLYGON,4326)");
///
/// let ty = SpatialType::builder(spatial_dialects::SpatialKind::Geometry)
///     .geometry_type("POINTZ")
///     .srid(4326)
///     .spatial_index(false)
///     .build()?;
/// assert_eq!(ty.dimension(), 3);
/// # Ok::<(), spatial_dialects::SpatialError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpatialType {
    kind: SpatialKind,
    geometry_type: Option<GeometryTypeName>,
    srid: i32,
    dimension: u8,
    spatial_index: bool,
    use_n_d_index: bool,
    use_typmod: Option<bool>,
    nullable: bool,
}

impl SpatialType {
    pub fn builder(kind: SpatialKind) -> SpatialTypeBuilder {
        SpatialTypeBuilder::new(kind)
    }

    /// A geometry column constrained to `geometry_type`.
    pub fn geometry(geometry_type: &str, srid: i32) -> Result<Self> {
        Self::builder(SpatialKind::Geometry)
            .geometry_type(geometry_type)
            .srid(srid)
            .build()
    }

    /// A geography column constrained to `geometry_type`.
    pub fn geography(geometry_type: &str, srid: i32) -> Result<Self> {
        Self::builder(SpatialKind::Geography)
            .geometry_type(geometry_type)
            .srid(srid)
            .build()
    }

    pub fn raster() -> Self {
        Self {
            kind: SpatialKind::Raster,
            geometry_type: None,
            srid: UNSET_SRID,
            dimension: 2,
            spatial_index: true,
            use_n_d_index: false,
            use_typmod: None,
            nullable: true,
        }
    }

    pub(crate) fn subtype(kind: GeometryKind, srid: i32) -> Self {
        Self {
            kind: SpatialKind::Geometry,
            geometry_type: Some(GeometryTypeName::new(kind)),
            srid,
            dimension: 2,
            spatial_index: true,
            use_n_d_index: false,
            use_typmod: None,
            nullable: true,
        }
    }

    pub fn point(srid: i32) -> Self {
        Self::subtype(GeometryKind::Point, srid)
    }

    pub fn linestring(srid: i32) -> Self {
        Self::subtype(GeometryKind::LineString, srid)
    }

    pub fn polygon(srid: i32) -> Self {
        Self::subtype(GeometryKind::Polygon, srid)
    }

    pub fn multipoint(srid: i32) -> Self {
        Self::subtype(GeometryKind::MultiPoint, srid)
    }

    pub fn multilinestring(srid: i32) -> Self {
        Self::subtype(GeometryKind::MultiLineString, srid)
    }

    pub fn multipolygon(srid: i32) -> Self {
        Self::subtype(GeometryKind::MultiPolygon, srid)
    }

    pub fn geometry_collection(srid: i32) -> Self {
        Self::subtype(GeometryKind::GeometryCollection, srid)
    }

    /// Untyped `GEOMETRY` column without SRID, the type of function results
    /// and bare element literals.
    pub fn default_geometry() -> Self {
        Self::subtype(GeometryKind::Geometry, UNSET_SRID)
    }

    pub(crate) fn default_for(kind: SpatialKind) -> Self {
        match kind {
            SpatialKind::Geometry => Self::default_geometry(),
            SpatialKind::Geography => Self {
                kind: SpatialKind::Geography,
                ..Self::default_geometry()
            },
            SpatialKind::Raster => Self::raster(),
        }
    }

    pub fn to_builder(&self) -> SpatialTypeBuilder {
        SpatialTypeBuilder {
            kind: self.kind,
            geometry_type: self.geometry_type.map(|ty| ty.to_string()),
            srid: self.srid,
            dimension: Some(self.dimension),
            spatial_index: self.spatial_index,
            use_n_d_index: self.use_n_d_index,
            use_typmod: self.use_typmod,
            nullable: self.nullable,
        }
    }

    pub fn kind(&self) -> SpatialKind {
        self.kind
    }

    pub fn geometry_type(&self) -> Option<GeometryTypeName> {
        self.geometry_type
    }

    pub fn srid(&self) -> i32 {
        self.srid
    }

    /// Whether the SRID is set to a usable value.
    pub fn has_srid(&self) -> bool {
        self.srid > 0
    }

    pub fn dimension(&self) -> u8 {
        self.dimension
    }

    pub fn spatial_index(&self) -> bool {
        self.spatial_index
    }

    pub fn use_n_d_index(&self) -> bool {
        self.use_n_d_index
    }

    pub fn use_typmod(&self) -> Option<bool> {
        self.use_typmod
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    /// SQL type name.
    pub fn name(&self) -> &'static str {
        match self.kind {
            SpatialKind::Geometry => "geometry",
            SpatialKind::Geography => "geography",
            SpatialKind::Raster => "raster",
        }
    }

    /// Constructor used for text input.
    pub fn from_text(&self) -> &'static str {
        match self.kind {
            SpatialKind::Geometry => "ST_GeomFromEWKT",
            SpatialKind::Geography => "ST_GeogFromText",
            SpatialKind::Raster => "raster",
        }
    }

    /// Constructor used for binary input.
    pub fn from_binary(&self, extended: bool) -> &'static str {
        match (self.kind, extended) {
            (SpatialKind::Geometry, true) => "ST_GeomFromEWKB",
            (SpatialKind::Geometry, false) => "ST_GeomFromWKB",
            (SpatialKind::Geography, _) => "ST_GeogFromWKB",
            (SpatialKind::Raster, _) => "raster",
        }
    }

    /// Function wrapping the column when it is read.
    pub fn as_binary(&self) -> &'static str {
        match self.kind {
            SpatialKind::Geometry => "ST_AsEWKB",
            SpatialKind::Geography => "ST_AsBinary",
            SpatialKind::Raster => "raster",
        }
    }

    /// Column type as written in PostGIS DDL, e.g. `geometry(POINTZ,4326)`.
    pub fn get_col_spec(&self) -> String {
        match self.geometry_type {
            None => self.name().to_string(),
            Some(geometry_type) => {
                format!("{}({},{})", self.name(), geometry_type, self.srid)
            }
        }
    }

    /// Turn a parameter value into what the driver receives for `dialect`.
    pub fn bind_processor<'a>(
        &'a self,
        dialect: &'a dyn SpatialDialect,
    ) -> impl Fn(&SpatialParam) -> Result<Value> + 'a {
        move |param| dialect.bind_processor(self, param)
    }

    /// Wrap a parameter value in the constructor `dialect` needs.
    pub fn bind_expression(
        &self,
        dialect: &dyn SpatialDialect,
        param: &SpatialParam,
    ) -> Result<Expr> {
        dialect.bind_expression(self, param)
    }

    /// Wrap a column (or any expression of this type) for reading.
    pub fn column_expression(&self, dialect: &dyn SpatialDialect, expr: Expr) -> Expr {
        dialect.column_expression(self, expr)
    }

    /// Turn a raw fetched value into an element.
    pub fn result_processor<'a>(
        &'a self,
        dialect: &'a dyn SpatialDialect,
    ) -> impl Fn(Value) -> Result<Option<SpatialElement>> + 'a {
        move |raw| dialect.result_processor(self, raw)
    }

    /// Render a parameter value inline, sharing the bind path's encoding.
    pub fn literal_processor<'a>(
        &'a self,
        dialect: &'a dyn SpatialDialect,
    ) -> impl Fn(&SpatialParam) -> Result<String> + 'a {
        move |param| {
            let expr = dialect.bind_expression(self, param)?;
            crate::compiler::Compiler::new(dialect)
                .literal_binds(true)
                .compile_expr(&expr)
                .map(|compiled| compiled.sql)
        }
    }
}

/// Validating builder for [`SpatialType`].
#[derive(Debug, Clone)]
pub struct SpatialTypeBuilder {
    kind: SpatialKind,
    geometry_type: Option<String>,
    srid: i32,
    dimension: Option<u8>,
    spatial_index: bool,
    use_n_d_index: bool,
    use_typmod: Option<bool>,
    nullable: bool,
}

impl SpatialTypeBuilder {
    pub fn new(kind: SpatialKind) -> Self {
        Self {
            kind,
            geometry_type: match kind {
                SpatialKind::Raster => None,
                _ => Some("GEOMETRY".to_string()),
            },
            srid: UNSET_SRID,
            dimension: None,
            spatial_index: true,
            use_n_d_index: false,
            use_typmod: None,
            nullable: true,
        }
    }

    pub fn geometry_type(mut self, geometry_type: &str) -> Self {
        self.geometry_type = Some(geometry_type.to_string());
        self
    }

    /// Accept any geometry type.
    pub fn any_geometry_type(mut self) -> Self {
        self.geometry_type = None;
        self
    }

    pub fn srid(mut self, srid: i32) -> Self {
        self.srid = srid;
        self
    }

    pub fn dimension(mut self, dimension: u8) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn spatial_index(mut self, spatial_index: bool) -> Self {
        self.spatial_index = spatial_index;
        self
    }

    pub fn use_n_d_index(mut self, use_n_d_index: bool) -> Self {
        self.use_n_d_index = use_n_d_index;
        self
    }

    pub fn use_typmod(mut self, use_typmod: bool) -> Self {
        self.use_typmod = Some(use_typmod);
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn build(self) -> Result<SpatialType> {
        if self.kind == SpatialKind::Raster {
            return Ok(SpatialType {
                srid: self.srid,
                spatial_index: self.spatial_index,
                nullable: self.nullable,
                ..SpatialType::raster()
            });
        }

        let geometry_type = self
            .geometry_type
            .as_deref()
            .map(geometry_type_from_str)
            .transpose()?;

        let dimension = match (geometry_type, self.dimension) {
            (Some(ty), None) => ty.dimension(),
            (Some(ty), Some(dimension)) if dimension == ty.dimension() => dimension,
            (None, None) => 2,
            (None, Some(dimension)) if (2..=4).contains(&dimension) => dimension,
            (ty, Some(dimension)) => {
                return Err(SpatialError::InvalidDimension {
                    geometry_type: ty.map(|ty| ty.to_string()),
                    dimension,
                });
            }
        };

        if geometry_type.is_none() && self.kind == SpatialKind::Geography {
            return Err(SpatialError::Configuration(
                "geography columns require a geometry type".to_string(),
            ));
        }
        if self.use_typmod.is_some() && !self.nullable {
            return Err(SpatialError::Configuration(
                "use_typmod cannot be combined with nullable=false".to_string(),
            ));
        }
        if self.use_n_d_index && !self.spatial_index {
            return Err(SpatialError::Configuration(
                "use_n_d_index requires spatial_index".to_string(),
            ));
        }
        if geometry_type.is_none() && self.srid > 0 {
            tracing::warn!(
                srid = self.srid,
                "SRID is not enforced on columns without a geometry type"
            );
        }

        Ok(SpatialType {
            kind: self.kind,
            geometry_type,
            srid: self.srid,
            dimension,
            spatial_index: self.spatial_index,
            use_n_d_index: self.use_n_d_index,
            use_typmod: self.use_typmod,
            nullable: self.nullable,
        })
    }
}

/// A value bound to a spatial column or spatial function argument.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialParam {
    /// WKT or EWKT text.
    Text(String),
    /// WKB or EWKB bytes.
    Bytes(Vec<u8>),
    Element(SpatialElement),
}

impl SpatialParam {
    /// Normalize into an element; text becomes WKT and bytes become WKB.
    pub fn to_element(&self) -> SpatialElement {
        match self {
            Self::Text(text) => WktElement::new(text.as_str()).into(),
            Self::Bytes(bytes) => WkbElement::new(bytes.clone()).into(),
            Self::Element(element) => element.clone(),
        }
    }
}

impl From<&str> for SpatialParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SpatialParam {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for SpatialParam {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<SpatialElement> for SpatialParam {
    fn from(value: SpatialElement) -> Self {
        Self::Element(value)
    }
}

impl From<WktElement> for SpatialParam {
    fn from(value: WktElement) -> Self {
        Self::Element(value.into())
    }
}

impl From<WkbElement> for SpatialParam {
    fn from(value: WkbElement) -> Self {
        Self::Element(value.into())
    }
}

impl From<RasterElement> for SpatialParam {
    fn from(value: RasterElement) -> Self {
        Self::Element(value.into())
    }
}

/// SQL types of expressions, as far as compilation cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlType {
    Spatial(SpatialType),
    Box2d,
    Box3d,
    /// Composite `(path integer[], geom geometry)`.
    GeometryDump,
    /// Composite raster band statistics.
    SummaryStats,
    Integer,
    Real,
    Text,
    Blob,
    Boolean,
    Untyped,
}

impl SqlType {
    pub fn spatial(&self) -> Option<&SpatialType> {
        match self {
            Self::Spatial(ty) => Some(ty),
            _ => None,
        }
    }

    /// Type of a field of a composite type.
    pub fn field_type(&self, field: &str) -> Option<SqlType> {
        match self {
            Self::GeometryDump => match field {
                "path" => Some(Self::Untyped),
                "geom" => Some(Self::Spatial(SpatialType::default_geometry())),
                _ => None,
            },
            Self::SummaryStats => match field {
                "count" => Some(Self::Integer),
                "sum" | "mean" | "stddev" | "min" | "max" => Some(Self::Real),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<SpatialType> for SqlType {
    fn from(value: SpatialType) -> Self {
        Self::Spatial(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn col_spec() -> Result<()> {
        assert_eq!(
            SpatialType::geometry("POINT", 900913)?.get_col_spec(),
            "geometry(POINT,900913)"
        );
        assert_eq!(
            SpatialType::geography("polygon", 4326)?.get_col_spec(),
            "geography(POLYGON,4326)"
        );
        let untyped = SpatialType::builder(SpatialKind::Geometry)
            .any_geometry_type()
            .build()?;
        assert_eq!(untyped.get_col_spec(), "geometry");
        assert_eq!(SpatialType::raster().get_col_spec(), "raster");
        assert_eq!(SpatialType::point(4326).get_col_spec(), "geometry(POINT,4326)");
        Ok(())
    }

    #[test]
    fn dimension_follows_suffix() -> Result<()> {
        let cases = [
            ("POINT", 2),
            ("POINTZ", 3),
            ("POINTM", 3),
            ("POINTZM", 4),
            ("MULTIPOLYGONZM", 4),
            ("CURVE", 2),
        ];
        for (name, dimension) in cases {
            let ty = SpatialType::geometry(name, 4326)?;
            assert_eq!(ty.dimension(), dimension, "{name}");
            let explicit = SpatialType::builder(SpatialKind::Geometry)
                .geometry_type(name)
                .dimension(dimension)
                .build()?;
            assert_eq!(explicit, ty.to_builder().srid(UNSET_SRID).build()?);
        }
        Ok(())
    }

    #[test]
    fn invalid_dimension_combinations() {
        let invalid = [
            (Some("POINT"), 3),
            (Some("POINTZ"), 2),
            (Some("POINTZ"), 4),
            (Some("POINTM"), 4),
            (Some("POINTZM"), 3),
            (None, 5),
            (None, 1),
        ];
        for (name, dimension) in invalid {
            let mut builder = SpatialType::builder(SpatialKind::Geometry).dimension(dimension);
            builder = match name {
                Some(name) => builder.geometry_type(name),
                None => builder.any_geometry_type(),
            };
            assert!(
                matches!(builder.build(), Err(SpatialError::InvalidDimension { .. })),
                "{name:?} {dimension}"
            );
        }

        for dimension in 2..=4 {
            assert!(
                SpatialType::builder(SpatialKind::Geometry)
                    .any_geometry_type()
                    .dimension(dimension)
                    .build()
                    .is_ok()
            );
        }
    }

    #[test]
    fn invalid_geometry_type_name() {
        assert!(matches!(
            SpatialType::geometry("CIRCLE", 4326),
            Err(SpatialError::InvalidGeometryType(_))
        ));
    }

    #[test]
    fn conflicting_options() {
        assert!(matches!(
            SpatialType::builder(SpatialKind::Geometry)
                .use_typmod(true)
                .nullable(false)
                .build(),
            Err(SpatialError::Configuration(_))
        ));
        assert!(matches!(
            SpatialType::builder(SpatialKind::Geometry)
                .spatial_index(false)
                .use_n_d_index(true)
                .build(),
            Err(SpatialError::Configuration(_))
        ));
        assert!(matches!(
            SpatialType::builder(SpatialKind::Geography)
                .any_geometry_type()
                .build(),
            Err(SpatialError::Configuration(_))
        ));
    }

    #[test]
    fn constructor_names() -> Result<()> {
        let geometry = SpatialType::geometry("POINT", 4326)?;
        assert_eq!(geometry.from_text(), "ST_GeomFromEWKT");
        assert_eq!(geometry.as_binary(), "ST_AsEWKB");
        let geography = SpatialType::geography("POINT", 4326)?;
        assert_eq!(geography.from_text(), "ST_GeogFromText");
        assert_eq!(geography.as_binary(), "ST_AsBinary");
        let raster = SpatialType::raster();
        assert_eq!(raster.from_text(), "raster");
        assert_eq!(raster.as_binary(), "raster");
        Ok(())
    }

    #[test]
    fn composite_fields() {
        assert!(matches!(
            SqlType::GeometryDump.field_type("geom"),
            Some(SqlType::Spatial(_))
        ));
        assert_eq!(SqlType::SummaryStats.field_type("mean"), Some(SqlType::Real));
        assert_eq!(SqlType::Box2d.field_type("geom"), None);
    }
}
