//! Spatial column types, geometry values and dialect-aware SQL for
//! PostgreSQL/PostGIS, MySQL, MariaDB, SQLite/SpatiaLite and GeoPackage.
//!
//! ## Overview
//!
//! - `SpatialType` describes a geometry, geography or raster column: subtype,
//!   SRID, dimension and index options. It is built through a validating
//!   builder and never changes afterwards.
//! - `WktElement`, `WkbElement` and `RasterElement` wrap spatial payloads as
//!   they travel to and from the database. The parsed shape is computed on
//!   first access and cached.
//! - `SpatialDialect` is implemented once per backend. It knows how to bind a
//!   value, how to read a column back, which DDL a spatial column needs, how
//!   to prepare a connection and how to reflect a column.
//! - `Compiler` renders an `Expr` into SQL text and parameters for a dialect,
//!   remapping generic function names (`ST_AsEWKB` becomes `AsEWKB` on
//!   SpatiaLite) and wrapping arguments in the right constructors.
//! - `SpatialEnginePlugin` attaches the dialect's connection hooks to an
//!   engine created from a URL.
//!
//! ## Short usage
//!
//! ```
//! use spatial_dialects::{Backend, Compiler, Expr, SpatialComparator, SpatialType, select_dialect};
//!
//! let geom = Expr::column("lake", "geom", SpatialType::polygon(4326));
//! let filter = geom.st_contains("POINT(1 1)");
//!
//! let postgres = Compiler::new(select_dialect(Backend::PostgreSQL)).compile_expr(&filter)?;
//! assert_eq!(postgres.sql, r#"ST_Contains("lake"."geom", ST_GeomFromEWKT($1))"#);
//!
//! let mysql = Compiler::new(select_dialect(Backend::MySQL)).compile_expr(&filter)?;
//! assert_eq!(mysql.sql, "ST_Contains(`lake`.`geom`, ST_GeomFromText(?, 4326))");
//! # Ok::<(), spatial_dialects::SpatialError>(())
//! ```
//!
//! ## GeoPackage without SpatiaLite
//!
//! The GeoPackage dialect defaults to a native mode: the format functions
//! (`GeomFromEWKT`, `AsEWKB`, `ST_MinX`, ...) are implemented in Rust and
//! registered on the rusqlite connection, and the `gpkg_*` tables are created
//! on connect.
//!
//! ```
//! use spatial_dialects::ddl::{Column, Table, create_table};
//! use spatial_dialects::plugin::SqliteEngine;
//! use spatial_dialects::{Backend, Compiler, Expr, SpatialType, SqlType, select_dialect};
//!
//! let engine = SqliteEngine::create("gpkg:///:memory:", &["spatial"])?;
//! let conn = engine.connect()?;
//!
//! let dialect = select_dialect(Backend::GeoPackage);
//! let table = Table::new("poi")
//!     .column(Column::new("fid", SqlType::Integer).primary_key())
//!     .column(Column::spatial("geom", SpatialType::point(4326)));
//! create_table(dialect, &table)?.execute(&conn)?;
//!
//! let insert = Compiler::new(dialect).compile_insert(&table, vec![("geom", Expr::from("POINT(1 2)"))])?;
//! engine.execute(&conn, &insert.sql, insert.params)?;
//! # Ok::<(), spatial_dialects::SpatialError>(())
//! ```
//!
//! ## Function names
//!
//! Generic names can be remapped per backend, either on an explicit
//! `FunctionRegistry` given to a compiler or on the process-wide default
//! with `register_function_mapping`. Registration is meant for setup time;
//! compilers take a snapshot when they are created.
mod error;
mod ewkb;
mod gpb;
mod shape;
mod sql_functions;

mod conversions;
mod ogc_sql;

pub mod compiler;
pub mod connection;
pub mod ddl;
pub mod dialect;
pub mod elements;
pub mod expr;
pub mod functions;
pub mod plugin;
pub mod reflection;
pub mod registry;
pub mod types;

pub use compiler::{CompiledSql, Compiler, ResultValue};
pub use connection::RawConnection;
pub use dialect::{Backend, SpatialDialect, select_dialect};
pub use elements::{RasterElement, SpatialElement, UNSET_SRID, WkbData, WkbElement, WktElement};
pub use error::{Result, SpatialError};
pub use expr::{ColumnRef, Expr, FunctionCall, SpatialComparator, SpatialOperator};
pub use functions::func;
pub use plugin::{PLUGIN_NAME, SpatialEnginePlugin};
pub use registry::{FunctionName, FunctionRegistry, register_function_mapping};
pub use shape::{Shape, from_shape};
pub use sql_functions::register_spatial_functions;
pub use types::{
    GeometryKind, GeometryTypeName, SpatialKind, SpatialParam, SpatialType, SpatialTypeBuilder,
    SqlType,
};
