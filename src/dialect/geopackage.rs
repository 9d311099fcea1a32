use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use rusqlite::types::Value;

use crate::connection::{RawConnection, tolerate_repeat};
use crate::conversions::{geometry_type_from_str, gpkg_zm_from_flags, is_geometry_type_name};
use crate::ddl::{Column, Table};
use crate::error::{Result, SpatialError};
use crate::expr::{Expr, SpatialOperator};
use crate::ogc_sql::{
    RTREE_EXTENSION_NAME, initialize_gpkg, rtree_drop_sql, rtree_name, rtree_sqls,
    sql_insert_srs,
};
use crate::reflection::{ColumnInfo, Reflection, value_as_i64, value_as_string, value_truthy};
use crate::registry::FunctionName;
use crate::sql_functions::register_spatial_functions;
use crate::types::{SpatialKind, SpatialParam, SpatialType};

use super::sqlite::{
    load_spatialite, reject_raster, resolve_library_path, spatialite_bind,
    spatialite_bind_expression, spatialite_function_names, spatialite_operator,
};
use super::{Backend, ColumnDdl, OperatorForm, SpatialDialect, quote_literal};

/// Where the GeoPackage geometry functions come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeoPackageMode {
    /// Functions implemented in this crate; no extension is loaded.
    #[default]
    Native,
    /// SpatiaLite in GeoPackage amphibious mode.
    Spatialite,
}

impl FromStr for GeoPackageMode {
    type Err = SpatialError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("native") {
            Ok(Self::Native)
        } else if s.eq_ignore_ascii_case("spatialite") {
            Ok(Self::Spatialite)
        } else {
            Err(SpatialError::InvalidPluginArgument {
                name: "geopackage_mode".to_string(),
                value: s.to_string(),
            })
        }
    }
}

impl fmt::Display for GeoPackageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Native => "native",
            Self::Spatialite => "spatialite",
        })
    }
}

/// GeoPackage files, which only allow one geometry column per table.
#[derive(Debug, Clone, Default)]
pub struct GeoPackageDialect {
    mode: GeoPackageMode,
    library_path: Option<PathBuf>,
}

impl GeoPackageDialect {
    pub const fn new(mode: GeoPackageMode) -> Self {
        Self {
            mode,
            library_path: None,
        }
    }

    /// SpatiaLite library used in [`GeoPackageMode::Spatialite`].
    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    pub fn mode(&self) -> GeoPackageMode {
        self.mode
    }

    fn register_srs(&self, srid: i32) -> String {
        match self.mode {
            GeoPackageMode::Native => sql_insert_srs(
                &format!("EPSG:{srid}"),
                srid,
                "EPSG",
                "undefined",
                "",
            ),
            GeoPackageMode::Spatialite => format!(
                "SELECT gpkgInsertEpsgSRID({srid}) \
                 WHERE NOT EXISTS (SELECT 1 FROM gpkg_spatial_ref_sys WHERE srs_id = {srid})"
            ),
        }
    }

    fn setup_spatialite(&self, conn: &dyn RawConnection) -> Result<()> {
        let path = resolve_library_path(self.library_path.as_deref())?;
        load_spatialite(conn, &path)?;
        let status = conn
            .query_row("SELECT CheckGeoPackageMetaData()", &[])?
            .and_then(|row| row.into_iter().next())
            .as_ref()
            .and_then(value_as_i64)
            .unwrap_or(0);
        if status < 1 {
            // only works on the main database
            let created = conn.execute_batch("SELECT gpkgCreateBaseTables()");
            tolerate_repeat(created, "gpkgCreateBaseTables")?;
        }
        conn.execute_batch("SELECT AutoGpkgStart()")?;
        conn.execute_batch("SELECT EnableGpkgAmphibiousMode()")?;
        Ok(())
    }
}

impl SpatialDialect for GeoPackageDialect {
    fn backend(&self) -> Backend {
        Backend::GeoPackage
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

    fn check_table(&self, table: &Table) -> Result<()> {
        if table.spatial_columns().count() > 1 {
            return Err(SpatialError::MultipleGeometryColumns {
                table: table.name.clone(),
            });
        }
        Ok(())
    }

    fn column_ddl(&self, table: &Table, column: &Column, ty: &SpatialType) -> Result<ColumnDdl> {
        reject_raster(ty, column)?;
        let geometry_type = ty.geometry_type();
        let base_name = geometry_type.map_or("GEOMETRY", |ty| ty.base_name());
        let (has_z, has_m) = geometry_type.map_or((false, false), |ty| (ty.has_z, ty.has_m));
        let srid = ty.srid();
        let t = quote_literal(&table.name);
        let c = quote_literal(&column.name);

        let mut ddl = ColumnDdl {
            inline: Some(if column.nullable {
                base_name.to_string()
            } else {
                format!("{base_name} NOT NULL")
            }),
            ..ColumnDdl::default()
        };
        ddl.before_create.push(self.register_srs(srid));

        ddl.after_create.push(format!(
            "INSERT INTO gpkg_contents \
             (table_name, data_type, identifier, description, last_change, srs_id) \
             VALUES ({t}, 'features', {t}, '', strftime('%Y-%m-%dT%H:%M:%fZ', 'now'), {srid})"
        ));
        ddl.after_create.push(format!(
            "INSERT INTO gpkg_geometry_columns \
             (table_name, column_name, geometry_type_name, srs_id, z, m) \
             VALUES ({t}, {c}, {}, {srid}, {}, {})",
            quote_literal(base_name),
            i32::from(has_z),
            i32::from(has_m),
        ));
        match self.mode {
            GeoPackageMode::Native => {
                if ty.spatial_index() {
                    let id = table.primary_key().map_or("rowid", |pk| pk.name.as_str());
                    ddl.after_create
                        .extend(rtree_sqls(&table.name, &column.name, id));
                }
            }
            GeoPackageMode::Spatialite => {
                ddl.after_create
                    .push(format!("SELECT gpkgAddGeometryTriggers({t}, {c})"));
                if ty.spatial_index() {
                    ddl.after_create
                        .push(format!("SELECT gpkgAddSpatialIndex({t}, {c})"));
                }
            }
        }

        ddl.before_drop
            .push(rtree_drop_sql(&table.name, &column.name));
        let rtree = rtree_name(&table.name, &column.name);
        for shadow in ["node", "parent", "rowid"] {
            ddl.before_drop.push(format!(
                "DROP TABLE IF EXISTS {}",
                self.quote_identifier(&format!("{rtree}_{shadow}"))
            ));
        }
        ddl.before_drop.push(format!(
            "DELETE FROM gpkg_extensions WHERE LOWER(table_name) = LOWER({t}) AND column_name = {c}"
        ));
        ddl.before_drop.push(format!(
            "DELETE FROM gpkg_geometry_columns WHERE LOWER(table_name) = LOWER({t}) AND column_name = {c}"
        ));
        ddl.before_drop.push(format!(
            "DELETE FROM gpkg_contents WHERE LOWER(table_name) = LOWER({t})"
        ));
        Ok(ddl)
    }

    fn setup_connection(&self, conn: &dyn RawConnection) -> Result<()> {
        match self.mode {
            GeoPackageMode::Native => {
                let Some(sqlite) = conn.as_sqlite() else {
                    return Err(SpatialError::ConnectionSetup(
                        "native GeoPackage mode needs a SQLite connection".to_string(),
                    ));
                };
                register_spatial_functions(sqlite)?;
                initialize_gpkg(conn)
            }
            GeoPackageMode::Spatialite => self.setup_spatialite(conn),
        }
    }

    fn reflect_column(&self, conn: &dyn RawConnection, column: &ColumnInfo) -> Reflection {
        if !is_geometry_type_name(&column.data_type) {
            return Reflection::NotSpatial;
        }
        let params = [
            Value::Text(column.table.clone()),
            Value::Text(column.name.clone()),
            Value::Text(RTREE_EXTENSION_NAME.to_string()),
        ];
        let row = match conn.query_row(SQL_GEOMETRY_COLUMN, &params) {
            Ok(Some(row)) => row,
            Ok(None) => return Reflection::NotSpatial,
            Err(err) => {
                return Reflection::skip(format!("gpkg_geometry_columns lookup failed: {err}"));
            }
        };
        let [geometry_type, srid, z, m, has_index] = row.as_slice() else {
            return Reflection::skip("unexpected gpkg_geometry_columns layout");
        };

        let Some((has_z, has_m)) = value_as_i64(z)
            .zip(value_as_i64(m))
            .and_then(|(z, m)| gpkg_zm_from_flags(z, m))
        else {
            return Reflection::skip(format!("unsupported z/m flags: {z:?}/{m:?}"));
        };
        let mut geometry_type = match value_as_string(geometry_type)
            .ok_or_else(|| SpatialError::InvalidGeometryType(format!("{geometry_type:?}")))
            .and_then(|name| geometry_type_from_str(&name))
        {
            Ok(ty) => ty,
            Err(err) => return Reflection::skip(err.to_string()),
        };
        geometry_type.has_z = has_z;
        geometry_type.has_m = has_m;
        let Some(srid) = value_as_i64(srid).and_then(|srid| i32::try_from(srid).ok()) else {
            return Reflection::skip(format!("invalid SRID: {srid:?}"));
        };

        let built = SpatialType::builder(SpatialKind::Geometry)
            .geometry_type(&geometry_type.to_string())
            .srid(srid)
            .spatial_index(value_truthy(has_index))
            .nullable(column.nullable)
            .build();
        match built {
            Ok(ty) => Reflection::Spatial(ty),
            Err(err) => Reflection::skip(err.to_string()),
        }
    }
}

const SQL_GEOMETRY_COLUMN: &str = "SELECT
  g.geometry_type_name,
  g.srs_id,
  g.z,
  g.m,
  EXISTS (
    SELECT 1 FROM gpkg_extensions e
    WHERE LOWER(e.table_name) = LOWER(g.table_name)
      AND e.column_name = g.column_name
      AND e.extension_name = ?3
  )
FROM gpkg_geometry_columns g
WHERE LOWER(g.table_name) = LOWER(?1) AND g.column_name = ?2";

/// Create `spatial_ref_sys` and copy the GeoPackage SRS catalog into it, which
/// SpatiaLite's `ST_Transform` needs.
pub fn populate_spatial_ref_sys(conn: &dyn RawConnection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS spatial_ref_sys (
  srid INTEGER NOT NULL PRIMARY KEY,
  auth_name VARCHAR(256),
  auth_srid INTEGER,
  srtext VARCHAR(2048),
  proj4text VARCHAR(2048)
)",
    )?;
    conn.execute_batch(
        "INSERT INTO spatial_ref_sys
SELECT
  srs_id AS srid,
  organization AS auth_name,
  organization_coordsys_id AS auth_srid,
  definition AS srtext,
  NULL
FROM gpkg_spatial_ref_sys AS A
WHERE NOT EXISTS (SELECT srid FROM spatial_ref_sys WHERE srid = A.srs_id)",
    )?;
    Ok(())
}
