//! Backend identification and the per-backend adapters.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::Value;

use crate::connection::RawConnection;
use crate::ddl::{Column, Table};
use crate::elements::{RasterElement, SpatialElement, UNSET_SRID, WkbElement, WktElement};
use crate::error::{Result, SpatialError};
use crate::expr::{Expr, SpatialOperator};
use crate::functions::{func, typed_func};
use crate::reflection::{ColumnInfo, Reflection};
use crate::registry::FunctionName;
use crate::types::{SpatialKind, SpatialParam, SpatialType, SqlType};

mod geopackage;
mod mariadb;
mod mysql;
mod postgresql;
mod sqlite;

pub use geopackage::{GeoPackageDialect, GeoPackageMode, populate_spatial_ref_sys};
pub use mariadb::MariaDbDialect;
pub use mysql::MySqlDialect;
pub use postgresql::{PostgisOptions, PostgresDialect};
pub use sqlite::{
    InitMode, JournalMode, SPATIALITE_LIBRARY_PATH, SpatialiteOptions, SqliteDialect, init_spatialite,
};

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    PostgreSQL,
    MySQL,
    MariaDB,
    SQLite,
    GeoPackage,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Backend::PostgreSQL,
        Backend::MySQL,
        Backend::MariaDB,
        Backend::SQLite,
        Backend::GeoPackage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::MySQL => "mysql",
            Self::MariaDB => "mariadb",
            Self::SQLite => "sqlite",
            Self::GeoPackage => "geopackage",
        }
    }

    /// Backend of an engine URL scheme such as `postgresql+psycopg2`.
    pub fn from_url_scheme(scheme: &str) -> Result<Self> {
        let name = scheme.split('+').next().unwrap_or(scheme);
        name.parse()
    }

    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Self::MySQL | Self::MariaDB => format!("`{}`", ident.replace('`', "``")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }
}

impl FromStr for Backend {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("postgresql")
            || s.eq_ignore_ascii_case("postgres")
            || s.eq_ignore_ascii_case("postgis")
        {
            Ok(Self::PostgreSQL)
        } else if s.eq_ignore_ascii_case("mysql") {
            Ok(Self::MySQL)
        } else if s.eq_ignore_ascii_case("mariadb") {
            Ok(Self::MariaDB)
        } else if s.eq_ignore_ascii_case("sqlite") || s.eq_ignore_ascii_case("spatialite") {
            Ok(Self::SQLite)
        } else if s.eq_ignore_ascii_case("gpkg") || s.eq_ignore_ascii_case("geopackage") {
            Ok(Self::GeoPackage)
        } else {
            Err(SpatialError::UnknownBackend(s.to_string()))
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a spatial operator is rendered on a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorForm {
    /// `left <token> right`
    Infix(&'static str),
    /// `name(left, right)`
    Function(&'static str),
}

/// DDL contributed by one spatial column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnDdl {
    /// Column type (and constraints) inside `CREATE TABLE`; `None` leaves the
    /// column out of the statement.
    pub inline: Option<String>,
    pub before_create: Vec<String>,
    pub after_create: Vec<String>,
    pub before_drop: Vec<String>,
}

/// Backend-specific behavior of spatial types, functions and connections.
pub trait SpatialDialect: fmt::Debug + Send + Sync {
    fn backend(&self) -> Backend;

    fn quote_identifier(&self, ident: &str) -> String {
        self.backend().quote_identifier(ident)
    }

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    fn render_blob_literal(&self, bytes: &[u8]) -> String;

    /// Whether keyword arguments can be passed as `name => value`.
    fn supports_named_arguments(&self) -> bool {
        false
    }

    /// Default remap table for generic function names.
    fn function_names(&self) -> Vec<(&'static str, FunctionName)> {
        Vec::new()
    }

    fn operator(&self, op: SpatialOperator) -> OperatorForm {
        OperatorForm::Infix(op.token())
    }

    /// Rewrite the arguments of a call after its name was resolved.
    fn adapt_arguments(&self, _function: &str, args: Vec<Expr>, _return_type: &SqlType) -> Vec<Expr> {
        args
    }

    /// Value handed to the driver for `param` bound to a column of type `ty`.
    fn bind_processor(&self, ty: &SpatialType, param: &SpatialParam) -> Result<Value>;

    /// Constructor expression wrapping the processed value.
    fn bind_expression(&self, ty: &SpatialType, param: &SpatialParam) -> Result<Expr>;

    /// Expression used to read a column of type `ty`.
    fn column_expression(&self, ty: &SpatialType, expr: Expr) -> Expr {
        func(ty.as_binary(), vec![expr])
    }

    /// Whether values read back carry an embedded SRID.
    fn extended_results(&self) -> bool {
        true
    }

    fn result_processor(&self, ty: &SpatialType, raw: Value) -> Result<Option<SpatialElement>> {
        decode_result(ty, raw, self.extended_results())
    }

    /// Reject table layouts the backend cannot store.
    fn check_table(&self, _table: &Table) -> Result<()> {
        Ok(())
    }

    fn column_ddl(&self, table: &Table, column: &Column, ty: &SpatialType) -> Result<ColumnDdl>;

    /// Prepare a fresh connection for spatial use. Safe to call again on the
    /// same connection.
    fn setup_connection(&self, _conn: &dyn RawConnection) -> Result<()> {
        Ok(())
    }

    /// Last-minute conversion of parameters before a statement executes.
    fn prepare_parameters(&self, params: Vec<Value>) -> Vec<Value> {
        params
    }

    fn reflect_column(&self, conn: &dyn RawConnection, column: &ColumnInfo) -> Reflection;
}

static POSTGRESQL: PostgresDialect = PostgresDialect::new(PostgisOptions::new());
static MYSQL: MySqlDialect = MySqlDialect;
static MARIADB: MariaDbDialect = MariaDbDialect::new(true);
static SQLITE: SqliteDialect = SqliteDialect::new(SpatialiteOptions::new());
static GEOPACKAGE: GeoPackageDialect = GeoPackageDialect::new(GeoPackageMode::Native);

/// Default adapter for `backend`.
pub fn select_dialect(backend: Backend) -> &'static dyn SpatialDialect {
    match backend {
        Backend::PostgreSQL => &POSTGRESQL,
        Backend::MySQL => &MYSQL,
        Backend::MariaDB => &MARIADB,
        Backend::SQLite => &SQLITE,
        Backend::GeoPackage => &GEOPACKAGE,
    }
}

pub(crate) fn spatial_index_name(table: &str, column: &str) -> String {
    format!("idx_{table}_{column}")
}

pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// The bound value seen as an element, raster columns reading text as hex.
pub(crate) fn param_element(ty: &SpatialType, param: &SpatialParam) -> SpatialElement {
    match (ty.kind(), param) {
        (SpatialKind::Raster, SpatialParam::Text(text)) => RasterElement::new(text.as_str()).into(),
        (SpatialKind::Raster, SpatialParam::Bytes(bytes)) => RasterElement::new(bytes.clone()).into(),
        _ => param.to_element(),
    }
}

/// EWKT text, falling back to the column SRID for plain WKT.
pub(crate) fn ewkt_text(ty: &SpatialType, wkt: &WktElement) -> String {
    if wkt.extended() {
        return wkt.data().to_string();
    }
    let srid = if wkt.srid() > 0 { wkt.srid() } else { ty.srid() };
    if srid > 0 {
        format!("SRID={srid};{}", wkt.data())
    } else {
        wkt.data().to_string()
    }
}

/// EWKB, injecting the column SRID into plain WKB when it has none.
pub(crate) fn ewkb_element(ty: &SpatialType, wkb: &WkbElement) -> Result<WkbElement> {
    if wkb.extended() {
        return Ok(wkb.clone());
    }
    let srid = if wkb.srid() > 0 { wkb.srid() } else { ty.srid() };
    if srid > 0 {
        WkbElement::from_parts(wkb.data().clone(), Some(srid), Some(false)).as_ewkb()
    } else {
        Ok(wkb.clone())
    }
}

/// SRID to pass next to a plain payload: the value's own, else the column's.
pub(crate) fn explicit_srid(ty: &SpatialType, element_srid: i32) -> Option<i32> {
    if element_srid > 0 {
        Some(element_srid)
    } else if ty.has_srid() {
        Some(ty.srid())
    } else {
        None
    }
}

/// `name(value[, srid])` typed as the column.
pub(crate) fn constructor(ty: &SpatialType, name: &str, value: Expr, srid: Option<i32>) -> Expr {
    let mut args = vec![value];
    if let Some(srid) = srid {
        args.push(Expr::Literal(Value::Integer(srid.into())));
    }
    typed_func(name, args, SqlType::Spatial(ty.clone()))
}

fn decode_result(
    ty: &SpatialType,
    raw: Value,
    extended_results: bool,
) -> Result<Option<SpatialElement>> {
    let srid = ty.has_srid().then_some(ty.srid());
    let element: SpatialElement = match (ty.kind(), raw) {
        (_, Value::Null) => return Ok(None),
        (SpatialKind::Raster, Value::Blob(bytes)) => RasterElement::new(bytes).into(),
        (SpatialKind::Raster, Value::Text(text)) => RasterElement::new(text).into(),
        (kind, Value::Blob(bytes)) => {
            WkbElement::from_parts(bytes, srid, result_extended(kind, extended_results)).into()
        }
        (kind, Value::Text(text)) => {
            WkbElement::from_parts(text, srid, result_extended(kind, extended_results)).into()
        }
        (_, other) => {
            return Err(SpatialError::ShapeConversion(format!(
                "cannot read a spatial value from {:?}",
                other.data_type()
            )));
        }
    };
    Ok(Some(element))
}

fn result_extended(kind: SpatialKind, extended_results: bool) -> Option<bool> {
    if !extended_results {
        return None;
    }
    Some(kind == SpatialKind::Geometry)
}

/// Reject a value whose SRID differs from the column's.
pub(crate) fn check_srid(ty: &SpatialType, element: &SpatialElement) -> Result<()> {
    let srid = element.srid();
    if srid != UNSET_SRID && srid != ty.srid() {
        return Err(SpatialError::Argument(format!(
            "The SRID ({srid}) of the supplied value is different from the one of the column ({})",
            ty.srid()
        )));
    }
    Ok(())
}
