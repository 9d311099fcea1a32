//! SQL expression tree for spatial queries.
//!
//! This is the small expression language the compiler renders: column
//! references, bound values, element literals, function calls and operators.
//! [`SpatialComparator`] adds the spatial methods and operators to anything
//! that can stand for a spatial expression, so `column.st_contains(x)` and
//! `element.st_contains(x)` build the same tree.

use rusqlite::types::Value;

use crate::elements::{RasterElement, SpatialElement, WkbElement, WktElement};
use crate::functions::{func, lookup};
use crate::types::{GeometryKind, SpatialParam, SpatialType, SqlType};

/// Reference to a table column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
    pub sql_type: SqlType,
}

impl ColumnRef {
    pub fn new(table: Option<&str>, name: &str, sql_type: SqlType) -> Self {
        Self {
            table: table.map(str::to_string),
            name: name.to_string(),
            sql_type,
        }
    }
}

/// A (possibly remapped) SQL function call.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<Expr>,
    pub kwargs: Vec<(String, Expr)>,
    pub return_type: SqlType,
}

impl FunctionCall {
    /// Keyword argument by name.
    pub fn kwarg(&self, name: &str) -> Option<&Expr> {
        self.kwargs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }

    pub fn with_kwarg(mut self, name: &str, value: impl Into<Expr>) -> Self {
        self.kwargs.push((name.to_string(), value.into()));
        self
    }
}

/// Plain comparison and boolean operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn token(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// PostGIS bounding-box and distance operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpatialOperator {
    /// `&&`
    Intersects,
    /// `&&&`
    IntersectsNd,
    /// `&<`
    OverlapsOrToLeft,
    /// `&>`
    OverlapsOrToRight,
    /// `&<|`
    OverlapsOrBelow,
    /// `|&>`
    OverlapsOrAbove,
    /// `<<`
    ToLeft,
    /// `>>`
    ToRight,
    /// `<<|`
    Below,
    /// `|>>`
    Above,
    /// `@`
    Contained,
    /// `~`
    Contains,
    /// `~=`
    Same,
    /// `<->`
    DistanceCentroid,
    /// `<#>`
    DistanceBox,
}

impl SpatialOperator {
    pub fn token(&self) -> &'static str {
        match self {
            Self::Intersects => "&&",
            Self::IntersectsNd => "&&&",
            Self::OverlapsOrToLeft => "&<",
            Self::OverlapsOrToRight => "&>",
            Self::OverlapsOrBelow => "&<|",
            Self::OverlapsOrAbove => "|&>",
            Self::ToLeft => "<<",
            Self::ToRight => ">>",
            Self::Below => "<<|",
            Self::Above => "|>>",
            Self::Contained => "@",
            Self::Contains => "~",
            Self::Same => "~=",
            Self::DistanceCentroid => "<->",
            Self::DistanceBox => "<#>",
        }
    }

    /// Distance operators yield numbers, the rest booleans.
    pub fn result_type(&self) -> SqlType {
        match self {
            Self::DistanceCentroid | Self::DistanceBox => SqlType::Real,
            _ => SqlType::Boolean,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(ColumnRef),
    /// A value sent as a bound parameter.
    Bind(Value),
    /// A value rendered inline.
    Literal(Value),
    /// A value bound to a spatial type; compiled through the type's
    /// constructor for the target backend.
    SpatialBind {
        spatial_type: SpatialType,
        param: SpatialParam,
    },
    Element(SpatialElement),
    Function(FunctionCall),
    Spatial {
        op: SpatialOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    /// Field of a composite value, e.g. `(ST_Dump(geom)).geom`.
    Field {
        base: Box<Expr>,
        name: String,
        sql_type: SqlType,
    },
    Label {
        expr: Box<Expr>,
        name: String,
    },
}

impl Expr {
    pub fn column(table: &str, name: &str, sql_type: impl Into<SqlType>) -> Self {
        Self::Column(ColumnRef::new(Some(table), name, sql_type.into()))
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn sql_type(&self) -> SqlType {
        match self {
            Self::Column(column) => column.sql_type.clone(),
            Self::Bind(_) | Self::Literal(_) => SqlType::Untyped,
            Self::SpatialBind { spatial_type, .. } => SqlType::Spatial(spatial_type.clone()),
            Self::Element(element) => SqlType::Spatial(element_type(element)),
            Self::Function(call) => call.return_type.clone(),
            Self::Spatial { op, .. } => op.result_type(),
            Self::Binary { .. } | Self::IsNull { .. } => SqlType::Boolean,
            Self::Field { sql_type, .. } => sql_type.clone(),
            Self::Label { expr, .. } => expr.sql_type(),
        }
    }

    pub fn label(self, name: &str) -> Self {
        Self::Label {
            expr: Box::new(self),
            name: name.to_string(),
        }
    }

    /// `self = rhs`; plain text or bytes compared with a spatial expression go
    /// through its constructor, and `NULL` becomes `IS NULL`.
    pub fn equals(self, rhs: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::Eq, rhs.into())
    }

    pub fn not_equals(self, rhs: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::NotEq, rhs.into())
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::Lt, rhs.into())
    }

    pub fn gt(self, rhs: impl Into<Expr>) -> Self {
        self.compare(BinaryOp::Gt, rhs.into())
    }

    pub fn and(self, rhs: Expr) -> Self {
        Self::Binary {
            op: BinaryOp::And,
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }

    pub fn or(self, rhs: Expr) -> Self {
        Self::Binary {
            op: BinaryOp::Or,
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }

    pub fn is_null(self) -> Self {
        Self::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Self {
        Self::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// Access a field of a composite result.
    pub fn field(self, name: &str) -> Self {
        let sql_type = self.sql_type().field_type(name).unwrap_or(SqlType::Untyped);
        Self::Field {
            base: Box::new(self),
            name: name.to_string(),
            sql_type,
        }
    }

    fn compare(self, op: BinaryOp, rhs: Expr) -> Self {
        if matches!(rhs, Expr::Bind(Value::Null) | Expr::Literal(Value::Null)) {
            match op {
                BinaryOp::Eq => return self.is_null(),
                BinaryOp::NotEq => return self.is_not_null(),
                _ => {}
            }
        }
        let rhs = coerce_operand(&self.sql_type(), rhs);
        Self::Binary {
            op,
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }
}

fn element_type(element: &SpatialElement) -> SpatialType {
    match element {
        SpatialElement::Raster(_) => SpatialType::raster(),
        _ => SpatialType::subtype(GeometryKind::Geometry, element.srid()),
    }
}

/// Route a plain text/bytes operand through the spatial type of the other
/// side of a comparison.
pub(crate) fn coerce_operand(target: &SqlType, operand: Expr) -> Expr {
    let Some(spatial_type) = target.spatial() else {
        return operand;
    };
    match operand {
        Expr::Bind(Value::Text(text)) => Expr::SpatialBind {
            spatial_type: spatial_type.clone(),
            param: SpatialParam::Text(text),
        },
        Expr::Bind(Value::Blob(bytes)) => Expr::SpatialBind {
            spatial_type: spatial_type.clone(),
            param: SpatialParam::Bytes(bytes),
        },
        Expr::Element(element) => Expr::SpatialBind {
            spatial_type: spatial_type.clone(),
            param: SpatialParam::Element(element),
        },
        other => other,
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Self::Bind(value)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Self::Bind(Value::Integer(value))
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Self::Bind(Value::Integer(value.into()))
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Self::Bind(Value::Real(value))
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Self::Bind(Value::Text(value.to_string()))
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Self::Bind(Value::Text(value))
    }
}

impl From<Vec<u8>> for Expr {
    fn from(value: Vec<u8>) -> Self {
        Self::Bind(Value::Blob(value))
    }
}

impl From<SpatialElement> for Expr {
    fn from(value: SpatialElement) -> Self {
        Self::Element(value)
    }
}

impl From<WktElement> for Expr {
    fn from(value: WktElement) -> Self {
        Self::Element(value.into())
    }
}

impl From<WkbElement> for Expr {
    fn from(value: WkbElement) -> Self {
        Self::Element(value.into())
    }
}

impl From<RasterElement> for Expr {
    fn from(value: RasterElement) -> Self {
        Self::Element(value.into())
    }
}

impl From<ColumnRef> for Expr {
    fn from(value: ColumnRef) -> Self {
        Self::Column(value)
    }
}

impl From<FunctionCall> for Expr {
    fn from(value: FunctionCall) -> Self {
        Self::Function(value)
    }
}

/// Spatial methods and operators on anything that stands for a spatial
/// expression.
pub trait SpatialComparator {
    fn to_expr(&self) -> Expr;

    /// Call `name` with this expression as the first argument. Plain values
    /// at the other geometry positions take this expression's type.
    fn st(&self, name: &str, args: Vec<Expr>) -> Expr {
        let receiver = self.to_expr();
        let target = receiver.sql_type();
        let spatial_args = lookup(name).map_or(&[][..], |spec| spec.spatial_args);
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(receiver);
        for (i, arg) in args.into_iter().enumerate() {
            if spatial_args.contains(&(i + 1)) {
                all.push(coerce_operand(&target, arg));
            } else {
                all.push(arg);
            }
        }
        func(name, all)
    }

    fn operator(&self, op: SpatialOperator, other: impl Into<Expr>) -> Expr {
        let left = self.to_expr();
        let right = coerce_operand(&left.sql_type(), other.into());
        Expr::Spatial {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn intersects(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::Intersects, other)
    }

    fn intersects_nd(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::IntersectsNd, other)
    }

    fn overlaps_or_to_left(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::OverlapsOrToLeft, other)
    }

    fn overlaps_or_to_right(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::OverlapsOrToRight, other)
    }

    fn overlaps_or_below(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::OverlapsOrBelow, other)
    }

    fn overlaps_or_above(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::OverlapsOrAbove, other)
    }

    fn to_left(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::ToLeft, other)
    }

    fn to_right(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::ToRight, other)
    }

    fn below(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::Below, other)
    }

    fn above(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::Above, other)
    }

    fn contained(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::Contained, other)
    }

    fn contains(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::Contains, other)
    }

    fn same(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::Same, other)
    }

    fn distance_centroid(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::DistanceCentroid, other)
    }

    fn distance_box(&self, other: impl Into<Expr>) -> Expr {
        self.operator(SpatialOperator::DistanceBox, other)
    }

    fn st_intersects(&self, other: impl Into<Expr>) -> Expr {
        self.st("ST_Intersects", vec![other.into()])
    }

    fn st_contains(&self, other: impl Into<Expr>) -> Expr {
        self.st("ST_Contains", vec![other.into()])
    }

    fn st_within(&self, other: impl Into<Expr>) -> Expr {
        self.st("ST_Within", vec![other.into()])
    }

    fn st_equals(&self, other: impl Into<Expr>) -> Expr {
        self.st("ST_Equals", vec![other.into()])
    }

    fn st_touches(&self, other: impl Into<Expr>) -> Expr {
        self.st("ST_Touches", vec![other.into()])
    }

    fn st_crosses(&self, other: impl Into<Expr>) -> Expr {
        self.st("ST_Crosses", vec![other.into()])
    }

    fn st_disjoint(&self, other: impl Into<Expr>) -> Expr {
        self.st("ST_Disjoint", vec![other.into()])
    }

    fn st_overlaps(&self, other: impl Into<Expr>) -> Expr {
        self.st("ST_Overlaps", vec![other.into()])
    }

    fn st_covers(&self, other: impl Into<Expr>) -> Expr {
        self.st("ST_Covers", vec![other.into()])
    }

    fn st_covered_by(&self, other: impl Into<Expr>) -> Expr {
        self.st("ST_CoveredBy", vec![other.into()])
    }

    fn st_dwithin(&self, other: impl Into<Expr>, distance: impl Into<Expr>) -> Expr {
        self.st("ST_DWithin", vec![other.into(), distance.into()])
    }

    fn st_distance(&self, other: impl Into<Expr>) -> Expr {
        self.st("ST_Distance", vec![other.into()])
    }

    fn st_buffer(&self, distance: impl Into<Expr>) -> Expr {
        self.st("ST_Buffer", vec![distance.into()])
    }

    fn st_transform(&self, srid: i32) -> Expr {
        self.st("ST_Transform", vec![srid.into()])
    }

    fn st_area(&self) -> Expr {
        self.st("ST_Area", Vec::new())
    }

    fn st_length(&self) -> Expr {
        self.st("ST_Length", Vec::new())
    }

    fn st_srid(&self) -> Expr {
        self.st("ST_SRID", Vec::new())
    }

    fn st_envelope(&self) -> Expr {
        self.st("ST_Envelope", Vec::new())
    }

    fn st_centroid(&self) -> Expr {
        self.st("ST_Centroid", Vec::new())
    }

    fn st_as_text(&self) -> Expr {
        self.st("ST_AsText", Vec::new())
    }

    fn st_as_geojson(&self) -> Expr {
        self.st("ST_AsGeoJSON", Vec::new())
    }
}

impl SpatialComparator for Expr {
    fn to_expr(&self) -> Expr {
        self.clone()
    }
}

impl SpatialComparator for ColumnRef {
    fn to_expr(&self) -> Expr {
        Expr::Column(self.clone())
    }
}

impl SpatialComparator for SpatialElement {
    fn to_expr(&self) -> Expr {
        Expr::Element(self.clone())
    }
}

impl SpatialComparator for WktElement {
    fn to_expr(&self) -> Expr {
        Expr::Element(self.clone().into())
    }
}

impl SpatialComparator for WkbElement {
    fn to_expr(&self) -> Expr {
        Expr::Element(self.clone().into())
    }
}

impl SpatialComparator for RasterElement {
    fn to_expr(&self) -> Expr {
        Expr::Element(self.clone().into())
    }
}
