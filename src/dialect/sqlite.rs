use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use rusqlite::types::Value;

use crate::connection::{RawConnection, tolerate_repeat};
use crate::conversions::{
    coord_dimension_str, geometry_type_from_str, is_geometry_type_name,
    spatialite_type_from_code, zm_from_coord_dimension,
};
use crate::ddl::{Column, Table};
use crate::elements::SpatialElement;
use crate::error::{Result, SpatialError};
use crate::expr::{Expr, SpatialOperator};
use crate::reflection::{ColumnInfo, Reflection, value_as_i64, value_as_string, value_truthy};
use crate::registry::FunctionName;
use crate::types::{GeometryTypeName, SpatialKind, SpatialParam, SpatialType};

use super::{
    Backend, ColumnDdl, OperatorForm, SpatialDialect, constructor, ewkb_element, ewkt_text,
    param_element, quote_literal, spatial_index_name,
};

/// Environment variable holding the path of the SpatiaLite library.
pub const SPATIALITE_LIBRARY_PATH: &str = "SPATIALITE_LIBRARY_PATH";

/// Which EPSG SRIDs `InitSpatialMetaData` loads; `None` on the options loads
/// all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    Wgs84,
    Empty,
}

impl FromStr for InitMode {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("WGS84") {
            Ok(Self::Wgs84)
        } else if s.eq_ignore_ascii_case("EMPTY") {
            Ok(Self::Empty)
        } else {
            Err(SpatialError::InvalidPluginArgument {
                name: "init_mode".to_string(),
                value: s.to_string(),
            })
        }
    }
}

impl fmt::Display for InitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wgs84 => "WGS84",
            Self::Empty => "EMPTY",
        })
    }
}

/// SQLite journal mode used while the metadata tables are created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    Wal,
    Off,
}

impl JournalMode {
    pub const ALL: [JournalMode; 6] = [
        JournalMode::Delete,
        JournalMode::Truncate,
        JournalMode::Persist,
        JournalMode::Memory,
        JournalMode::Wal,
        JournalMode::Off,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Persist => "PERSIST",
            Self::Memory => "MEMORY",
            Self::Wal => "WAL",
            Self::Off => "OFF",
        }
    }
}

impl FromStr for JournalMode {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SpatialError::InvalidPluginArgument {
                name: "journal_mode".to_string(),
                value: s.to_string(),
            })
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How SpatiaLite is loaded and initialized on new connections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpatialiteOptions {
    /// Library to load; falls back to `SPATIALITE_LIBRARY_PATH`.
    pub library_path: Option<PathBuf>,
    /// Run `InitSpatialMetaData` as a single transaction.
    pub transaction: bool,
    pub init_mode: Option<InitMode>,
    /// Journal mode while initializing; the previous mode is restored.
    pub journal_mode: Option<JournalMode>,
}

impl SpatialiteOptions {
    pub const fn new() -> Self {
        Self {
            library_path: None,
            transaction: false,
            init_mode: None,
            journal_mode: None,
        }
    }

    pub(crate) fn resolve_library_path(&self) -> Result<PathBuf> {
        resolve_library_path(self.library_path.as_deref())
    }
}

pub(super) fn resolve_library_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    std::env::var_os(SPATIALITE_LIBRARY_PATH)
        .map(PathBuf::from)
        .ok_or_else(|| {
            SpatialError::ConnectionSetup(format!(
                "the {SPATIALITE_LIBRARY_PATH} environment variable is not set"
            ))
        })
}

pub(super) fn load_spatialite(conn: &dyn RawConnection, path: &Path) -> Result<()> {
    tracing::debug!(path = %path.display(), "loading SpatiaLite");
    tolerate_repeat(conn.load_extension(path), "load SpatiaLite")
}

fn first_value(row: Option<Vec<Value>>) -> Option<Value> {
    row.and_then(|row| row.into_iter().next())
}

/// Create the SpatiaLite metadata tables unless they already exist.
pub fn init_spatialite(conn: &dyn RawConnection, options: &SpatialiteOptions) -> Result<()> {
    let status = first_value(conn.query_row("SELECT CheckSpatialMetaData()", &[])?)
        .as_ref()
        .and_then(value_as_i64)
        .unwrap_or(0);
    if status >= 1 {
        tracing::debug!(status, "SpatiaLite metadata already present");
        return Ok(());
    }

    let previous_journal_mode = match options.journal_mode {
        Some(mode) => {
            let current = first_value(conn.query_row("PRAGMA journal_mode", &[])?)
                .as_ref()
                .and_then(value_as_string);
            conn.execute_batch(&format!("PRAGMA journal_mode = {mode}"))?;
            current
        }
        None => None,
    };

    let mut args = vec![if options.transaction { "1" } else { "0" }.to_string()];
    if let Some(init_mode) = options.init_mode {
        args.push(quote_literal(&init_mode.to_string()));
    }
    tracing::debug!(args = %args.join(", "), "initializing SpatiaLite metadata");
    let init = conn.execute_batch(&format!("SELECT InitSpatialMetaData({})", args.join(", ")));
    let init = tolerate_repeat(init, "InitSpatialMetaData");

    if let Some(previous) = previous_journal_mode {
        let restored = conn.execute_batch(&format!("PRAGMA journal_mode = {previous}"));
        init?;
        return restored;
    }
    init
}

pub(super) fn spatialite_function_names() -> Vec<(&'static str, FunctionName)> {
    vec![
        ("ST_GeomFromEWKT", FunctionName::fixed("GeomFromEWKT")),
        ("ST_GeomFromEWKB", FunctionName::fixed("GeomFromEWKB")),
        ("ST_AsBinary", FunctionName::fixed("AsBinary")),
        ("ST_AsEWKB", FunctionName::fixed("AsEWKB")),
        ("ST_AsGeoJSON", FunctionName::fixed("AsGeoJSON")),
        (
            "ST_Buffer",
            FunctionName::resolver(|call| {
                if call.kwarg("side").is_some() {
                    "SingleSidedBuffer".to_string()
                } else {
                    "ST_Buffer".to_string()
                }
            }),
        ),
    ]
}

pub(super) fn spatialite_operator(op: SpatialOperator) -> OperatorForm {
    match op {
        SpatialOperator::Intersects => OperatorForm::Function("MbrIntersects"),
        SpatialOperator::Contains => OperatorForm::Function("MbrContains"),
        SpatialOperator::Contained => OperatorForm::Function("MbrWithin"),
        SpatialOperator::Same => OperatorForm::Function("MbrEqual"),
        SpatialOperator::DistanceCentroid => OperatorForm::Function("ST_Distance"),
        other => OperatorForm::Infix(other.token()),
    }
}

/// EWKT text, EWKB hex text, or the raster payload as is.
pub(super) fn spatialite_bind(ty: &SpatialType, param: &SpatialParam) -> Result<Value> {
    Ok(match param_element(ty, param) {
        SpatialElement::Wkt(wkt) => Value::Text(ewkt_text(ty, &wkt)),
        SpatialElement::Wkb(wkb) => Value::Text(ewkb_element(ty, &wkb)?.desc()),
        SpatialElement::Raster(raster) => Value::Text(raster.data().to_string()),
    })
}

pub(super) fn spatialite_bind_expression(
    dialect: &dyn SpatialDialect,
    ty: &SpatialType,
    param: &SpatialParam,
) -> Result<Expr> {
    let value = Expr::Bind(dialect.bind_processor(ty, param)?);
    Ok(match param_element(ty, param) {
        SpatialElement::Wkt(_) => constructor(ty, "ST_GeomFromEWKT", value, None),
        SpatialElement::Wkb(_) => constructor(ty, "ST_GeomFromEWKB", value, None),
        SpatialElement::Raster(_) => value,
    })
}

pub(super) fn reject_raster(ty: &SpatialType, column: &Column) -> Result<()> {
    if ty.kind() == SpatialKind::Raster {
        return Err(SpatialError::UnsupportedColumnType {
            column: column.name.clone(),
            declared_type: "raster".to_string(),
        });
    }
    Ok(())
}

/// Geometry type name and coordinate dimension (`XY`, `XYZ`, ...) of a column.
pub(super) fn type_and_dimension(ty: &SpatialType) -> (&'static str, &'static str) {
    match ty.geometry_type() {
        Some(geometry_type) => (
            geometry_type.base_name(),
            coord_dimension_str(geometry_type.has_z, geometry_type.has_m),
        ),
        None => (
            "GEOMETRY",
            match ty.dimension() {
                3 => "XYZ",
                4 => "XYZM",
                _ => "XY",
            },
        ),
    }
}

/// SQLite with the SpatiaLite extension.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect {
    options: SpatialiteOptions,
}

impl SqliteDialect {
    pub const fn new(options: SpatialiteOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SpatialiteOptions {
        &self.options
    }
}

impl SpatialDialect for SqliteDialect {
    fn backend(&self) -> Backend {
        Backend::SQLite
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }

    fn render_blob_literal(&self, bytes: &[u8]) -> String {
        format!("X'{}'", hex::encode(bytes))
    }

    fn function_names(&self) -> Vec<(&'static str, FunctionName)> {
        spatialite_function_names()
    }

    fn operator(&self, op: SpatialOperator) -> OperatorForm {
        spatialite_operator(op)
    }

    fn bind_processor(&self, ty: &SpatialType, param: &SpatialParam) -> Result<Value> {
        spatialite_bind(ty, param)
    }

    fn bind_expression(&self, ty: &SpatialType, param: &SpatialParam) -> Result<Expr> {
        spatialite_bind_expression(self, ty, param)
    }

    fn column_ddl(&self, table: &Table, column: &Column, ty: &SpatialType) -> Result<ColumnDdl> {
        reject_raster(ty, column)?;
        let t = quote_literal(&table.name);
        let c = quote_literal(&column.name);
        let (geometry_type, dimension) = type_and_dimension(ty);

        let mut ddl = ColumnDdl {
            inline: Some(if column.nullable {
                "GEOMETRY".to_string()
            } else {
                "GEOMETRY NOT NULL".to_string()
            }),
            ..ColumnDdl::default()
        };
        ddl.after_create.push(format!(
            "SELECT RecoverGeometryColumn({t}, {c}, {}, {}, {})",
            ty.srid(),
            quote_literal(geometry_type),
            quote_literal(dimension)
        ));
        if ty.spatial_index() {
            ddl.after_create
                .push(format!("SELECT CreateSpatialIndex({t}, {c})"));
            ddl.before_drop
                .push(format!("SELECT DisableSpatialIndex({t}, {c})"));
            ddl.before_drop.push(format!(
                "DROP TABLE IF EXISTS {}",
                self.quote_identifier(&spatial_index_name(&table.name, &column.name))
            ));
        }
        ddl.before_drop
            .push(format!("SELECT DiscardGeometryColumn({t}, {c})"));
        Ok(ddl)
    }

    fn setup_connection(&self, conn: &dyn RawConnection) -> Result<()> {
        let path = self.options.resolve_library_path()?;
        load_spatialite(conn, &path)?;
        init_spatialite(conn, &self.options)
    }

    fn reflect_column(&self, conn: &dyn RawConnection, column: &ColumnInfo) -> Reflection {
        if !is_geometry_type_name(&column.data_type) {
            return Reflection::NotSpatial;
        }
        let params = [
            Value::Text(column.table.clone()),
            Value::Text(column.name.clone()),
        ];
        let row = match conn.query_row(SQL_GEOMETRY_COLUMNS, &params) {
            Ok(Some(row)) => row,
            // not registered in geometry_columns
            Ok(None) => return Reflection::NotSpatial,
            Err(err) => return Reflection::skip(format!("geometry_columns lookup failed: {err}")),
        };
        let [geometry_type, coord_dimension, srid, spatial_index] = row.as_slice() else {
            return Reflection::skip("unexpected geometry_columns layout");
        };

        let geometry_type = match reflected_type(geometry_type, coord_dimension) {
            Ok(ty) => ty,
            Err(err) => return Reflection::skip(err.to_string()),
        };
        let Some(srid) = value_as_i64(srid).and_then(|srid| i32::try_from(srid).ok()) else {
            return Reflection::skip(format!("invalid SRID: {srid:?}"));
        };
        let built = SpatialType::builder(SpatialKind::Geometry)
            .geometry_type(&geometry_type.to_string())
            .srid(srid)
            .spatial_index(value_truthy(spatial_index))
            .nullable(column.nullable)
            .build();
        match built {
            Ok(ty) => Reflection::Spatial(ty),
            Err(err) => Reflection::skip(err.to_string()),
        }
    }
}

const SQL_GEOMETRY_COLUMNS: &str = "SELECT geometry_type, coord_dimension, srid, spatial_index_enabled
FROM geometry_columns
WHERE LOWER(f_table_name) = LOWER(?1) AND LOWER(f_geometry_column) = LOWER(?2)";

/// SpatiaLite 4+ stores integer type codes; older versions store a name and
/// a separate coordinate dimension.
fn reflected_type(geometry_type: &Value, coord_dimension: &Value) -> Result<GeometryTypeName> {
    if let Value::Integer(code) = geometry_type {
        return spatialite_type_from_code(*code)
            .ok_or_else(|| SpatialError::InvalidGeometryType(code.to_string()));
    }
    let name = value_as_string(geometry_type)
        .ok_or_else(|| SpatialError::InvalidGeometryType(format!("{geometry_type:?}")))?;
    let mut ty = geometry_type_from_str(&name)?;
    if let Some((has_z, has_m)) = value_as_string(coord_dimension)
        .as_deref()
        .and_then(zm_from_coord_dimension)
    {
        ty.has_z |= has_z;
        ty.has_m |= has_m;
    }
    Ok(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::connection::tests::MockConnection;
    use crate::elements::{RasterElement, WkbElement, WktElement};
    use crate::functions::call;

    fn options_with_path() -> SpatialiteOptions {
        SpatialiteOptions {
            library_path: Some(PathBuf::from("/usr/lib/mod_spatialite.so")),
            ..SpatialiteOptions::new()
        }
    }

    #[test]
    fn binds_use_generic_names_remapped_at_compile_time() -> Result<()> {
        let d = SqliteDialect::default();
        let ty = SpatialType::point(4326);

        let expr = d.bind_expression(&ty, &"POINT(1 2)".into())?;
        let compiled = Compiler::new(&d).compile_expr(&expr)?;
        assert_eq!(compiled.sql, "GeomFromEWKT(?1)");
        assert_eq!(compiled.params, vec![Value::Text("SRID=4326;POINT(1 2)".into())]);

        let wkb = hex::decode("0101000000000000000000f03f0000000000000040")?;
        let expr = d.bind_expression(&ty, &WkbElement::new(wkb).into())?;
        let compiled = Compiler::new(&d).compile_expr(&expr)?;
        assert_eq!(compiled.sql, "GeomFromEWKB(?1)");
        assert_eq!(
            compiled.params,
            vec![Value::Text("0101000020e6100000000000000000f03f0000000000000040".into())]
        );
        Ok(())
    }

    #[test]
    fn element_srid_wins_over_column() -> Result<()> {
        let ty = SpatialType::point(4326);
        let value = spatialite_bind(&ty, &WktElement::with_srid("POINT(1 2)", 3857).into())?;
        assert_eq!(value, Value::Text("SRID=3857;POINT(1 2)".into()));
        let value = spatialite_bind(&SpatialType::raster(), &RasterElement::new("0100").into())?;
        assert_eq!(value, Value::Text("0100".into()));
        Ok(())
    }

    #[test]
    fn buffer_name_depends_on_side_keyword() {
        let names = spatialite_function_names();
        let (_, buffer) = names
            .iter()
            .find(|(name, _)| *name == "ST_Buffer")
            .unwrap();
        let plain = call("ST_Buffer", vec![Expr::from("POINT(0 0)"), 2.into()]);
        assert_eq!(buffer.resolve(&plain), "ST_Buffer");
        let sided = plain.with_kwarg("side", "left");
        assert_eq!(buffer.resolve(&sided), "SingleSidedBuffer");
    }

    #[test]
    fn ddl_recovers_geometry_column() -> Result<()> {
        let ty = SpatialType::geometry("POINTZ", 4326)?;
        let table = Table::new("lake").column(Column::spatial("geom", ty.clone()));
        let ddl = SqliteDialect::default().column_ddl(&table, &table.columns[0], &ty)?;
        assert_eq!(ddl.inline.as_deref(), Some("GEOMETRY"));
        assert_eq!(
            ddl.after_create,
            vec![
                "SELECT RecoverGeometryColumn('lake', 'geom', 4326, 'POINT', 'XYZ')",
                "SELECT CreateSpatialIndex('lake', 'geom')",
            ]
        );
        assert_eq!(
            ddl.before_drop,
            vec![
                "SELECT DisableSpatialIndex('lake', 'geom')",
                r#"DROP TABLE IF EXISTS "idx_lake_geom""#,
                "SELECT DiscardGeometryColumn('lake', 'geom')",
            ]
        );
        Ok(())
    }

    #[test]
    fn setup_loads_and_initializes_once() -> Result<()> {
        let d = SqliteDialect::new(SpatialiteOptions {
            transaction: true,
            init_mode: Some(InitMode::Wgs84),
            journal_mode: Some(JournalMode::Off),
            ..options_with_path()
        });
        let conn = MockConnection::default()
            .with_row(vec![Value::Integer(0)])
            .with_row(vec![Value::Text("delete".into())]);
        d.setup_connection(&conn)?;
        assert_eq!(conn.loaded(), vec![PathBuf::from("/usr/lib/mod_spatialite.so")]);
        assert_eq!(
            conn.executed(),
            vec![
                "SELECT CheckSpatialMetaData()",
                "PRAGMA journal_mode",
                "PRAGMA journal_mode = OFF",
                "SELECT InitSpatialMetaData(1, 'WGS84')",
                "PRAGMA journal_mode = delete",
            ]
        );

        // metadata present: nothing else runs
        let conn = MockConnection::default().with_row(vec![Value::Integer(1)]);
        d.setup_connection(&conn)?;
        assert_eq!(conn.executed(), vec!["SELECT CheckSpatialMetaData()"]);
        Ok(())
    }

    #[test]
    fn failed_init_restores_journal_mode() {
        let options = SpatialiteOptions {
            journal_mode: Some(JournalMode::Off),
            ..options_with_path()
        };
        let conn = MockConnection::default()
            .with_row(vec![Value::Integer(0)])
            .with_row(vec![Value::Text("wal".into())])
            .with_batch_error(
                "SELECT InitSpatialMetaData",
                SpatialError::ConnectionSetup("disk I/O error".into()),
            );
        let err = init_spatialite(&conn, &options).unwrap_err();
        assert!(matches!(err, SpatialError::ConnectionSetup(_)));
        assert_eq!(conn.executed().last().map(String::as_str), Some("PRAGMA journal_mode = wal"));

        // an already initialized database is not an error
        let conn = MockConnection::default()
            .with_row(vec![Value::Integer(0)])
            .with_row(vec![Value::Text("wal".into())])
            .with_batch_error(
                "SELECT InitSpatialMetaData",
                SpatialError::AlreadyInitialized("metadata".into()),
            );
        assert!(init_spatialite(&conn, &options).is_ok());
        assert_eq!(conn.executed().last().map(String::as_str), Some("PRAGMA journal_mode = wal"));
    }

    #[test]
    fn setup_tolerates_repeat_load_only() {
        let d = SqliteDialect::new(options_with_path());
        let conn = MockConnection::default()
            .with_load_error(SpatialError::AlreadyInitialized("mod_spatialite".into()))
            .with_row(vec![Value::Integer(1)]);
        assert!(d.setup_connection(&conn).is_ok());

        let conn = MockConnection::default()
            .with_load_error(SpatialError::ConnectionSetup("cannot open shared object".into()));
        assert!(matches!(
            d.setup_connection(&conn),
            Err(SpatialError::ConnectionSetup(_))
        ));
    }

    #[test]
    fn option_values_parse() {
        assert_eq!("wgs84".parse::<InitMode>().ok(), Some(InitMode::Wgs84));
        assert_eq!("wal".parse::<JournalMode>().ok(), Some(JournalMode::Wal));
        assert!("fast".parse::<JournalMode>().is_err());
        assert!("ALL".parse::<InitMode>().is_err());
    }

    #[test]
    fn reflects_integer_codes() {
        let conn = MockConnection::default().with_row(vec![
            Value::Integer(1003),
            Value::Integer(3),
            Value::Integer(4326),
            Value::Integer(1),
        ]);
        let info = ColumnInfo::new("lake", "geom", "POLYGON");
        let Reflection::Spatial(ty) = SqliteDialect::default().reflect_column(&conn, &info) else {
            panic!("expected a spatial column");
        };
        assert_eq!(ty.get_col_spec(), "geometry(POLYGONZ,4326)");
        assert!(ty.spatial_index());
    }

    #[test]
    fn reflects_legacy_text_types() {
        let conn = MockConnection::default().with_row(vec![
            Value::Text("LINESTRING".into()),
            Value::Text("XYM".into()),
            Value::Integer(3857),
            Value::Integer(0),
        ]);
        let info = ColumnInfo::new("road", "geom", "LINESTRING");
        let Reflection::Spatial(ty) = SqliteDialect::default().reflect_column(&conn, &info) else {
            panic!("expected a spatial column");
        };
        assert_eq!(ty.get_col_spec(), "geometry(LINESTRINGM,3857)");
        assert_eq!(ty.dimension(), 3);
        assert!(!ty.spatial_index());
    }

    #[test]
    fn unregistered_and_plain_columns_are_not_spatial() {
        let conn = MockConnection::default().with_no_row();
        let d = SqliteDialect::default();
        assert_eq!(
            d.reflect_column(&conn, &ColumnInfo::new("t", "geom", "GEOMETRY")),
            Reflection::NotSpatial
        );
        assert_eq!(
            d.reflect_column(&conn, &ColumnInfo::new("t", "name", "TEXT")),
            Reflection::NotSpatial
        );
        assert_eq!(conn.executed().len(), 1);
    }

    #[test]
    fn bad_codes_are_skipped() {
        let conn = MockConnection::default().with_row(vec![
            Value::Integer(9),
            Value::Integer(2),
            Value::Integer(4326),
            Value::Integer(0),
        ]);
        assert!(matches!(
            SqliteDialect::default().reflect_column(&conn, &ColumnInfo::new("t", "g", "POINT")),
            Reflection::Skip { .. }
        ));
    }
}
