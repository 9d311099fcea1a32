// cf. https://www.geopackage.org/spec140/index.html#table_definition_sql
//
// The base tables are created with IF NOT EXISTS so that opening an existing
// GeoPackage leaves it untouched.

use crate::connection::RawConnection;
use crate::dialect::quote_literal;
use crate::error::Result;

/// `application_id` of a GeoPackage file ("GPKG").
pub(crate) const GPKG_APPLICATION_ID: i32 = 0x4750_4B47;
/// `user_version` for GeoPackage 1.4.0.
pub(crate) const GPKG_USER_VERSION: i32 = 10400;

pub(crate) const RTREE_EXTENSION_NAME: &str = "gpkg_rtree_index";
pub(crate) const RTREE_EXTENSION_DEFINITION: &str =
    "http://www.geopackage.org/spec120/#extension_rtree";

// Every srs_id used by a content or geometry column row points here.
const SPATIAL_REF_SYS_DDL: &str = "
CREATE TABLE IF NOT EXISTS gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition  TEXT NOT NULL,
  description TEXT
);
";

// One row per feature or tile table.
const CONTENTS_DDL: &str = "
CREATE TABLE IF NOT EXISTS gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
";

const GEOMETRY_COLUMNS_DDL: &str = "
CREATE TABLE IF NOT EXISTS gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT uk_gc_table_name UNIQUE (table_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
";

// Registered rtree indexes land here.
const EXTENSIONS_DDL: &str = "
CREATE TABLE IF NOT EXISTS gpkg_extensions (
  table_name TEXT,
  column_name TEXT,
  extension_name TEXT NOT NULL,
  definition TEXT NOT NULL,
  scope TEXT NOT NULL,
  CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
);
";

// gpkg_tile_matrix_set and gpkg_tile_matrix are required by the format even
// though only feature tables are managed here.
const TILE_MATRIX_SET_DDL: &str = "
CREATE TABLE IF NOT EXISTS gpkg_tile_matrix_set (
  table_name TEXT NOT NULL PRIMARY KEY,
  srs_id INTEGER NOT NULL,
  min_x DOUBLE NOT NULL,
  min_y DOUBLE NOT NULL,
  max_x DOUBLE NOT NULL,
  max_y DOUBLE NOT NULL,
  CONSTRAINT fk_gtms_table_name FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gtms_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
";

const TILE_MATRIX_DDL: &str = "
CREATE TABLE IF NOT EXISTS gpkg_tile_matrix (
  table_name TEXT NOT NULL,
  zoom_level INTEGER NOT NULL,
  matrix_width INTEGER NOT NULL,
  matrix_height INTEGER NOT NULL,
  tile_width INTEGER NOT NULL,
  tile_height INTEGER NOT NULL,
  pixel_x_size DOUBLE NOT NULL,
  pixel_y_size DOUBLE NOT NULL,
  CONSTRAINT pk_ttm PRIMARY KEY(table_name, zoom_level),
  CONSTRAINT fk_tmm_table_name FOREIGN KEY(table_name) REFERENCES gpkg_contents(table_name)
);
";

const EPSG4326_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;

/// `INSERT OR IGNORE` of one `gpkg_spatial_ref_sys` row.
pub(crate) fn sql_insert_srs(
    srs_name: &str,
    srs_id: i32,
    organization: &str,
    definition: &str,
    description: &str,
) -> String {
    format!(
        "INSERT OR IGNORE INTO gpkg_spatial_ref_sys \
         (srs_name, srs_id, organization, organization_coordsys_id, definition, description) \
         VALUES ({}, {srs_id}, {}, {srs_id}, {}, {})",
        quote_literal(srs_name),
        quote_literal(organization),
        quote_literal(definition),
        quote_literal(description),
    )
}

/// The three rows every GeoPackage must carry.
fn default_srs_rows() -> [String; 3] {
    [
        sql_insert_srs("WGS 84", 4326, "EPSG", EPSG4326_WKT, "WGS 84"),
        sql_insert_srs(
            "Undefined Cartesian SRS",
            -1,
            "NONE",
            "undefined",
            "undefined Cartesian coordinate reference system",
        ),
        sql_insert_srs(
            "Undefined geographic SRS",
            0,
            "NONE",
            "undefined",
            "undefined geographic coordinate reference system",
        ),
    ]
}

/// Create the GeoPackage base tables when they are missing.
pub(crate) fn initialize_gpkg(conn: &dyn RawConnection) -> Result<()> {
    conn.execute_batch(&format!("PRAGMA application_id = {GPKG_APPLICATION_ID}"))?;
    conn.execute_batch(&format!("PRAGMA user_version = {GPKG_USER_VERSION}"))?;
    conn.execute_batch(SPATIAL_REF_SYS_DDL)?;
    for sql in default_srs_rows() {
        conn.execute_batch(&sql)?;
    }
    for ddl in [
        CONTENTS_DDL,
        GEOMETRY_COLUMNS_DDL,
        TILE_MATRIX_SET_DDL,
        TILE_MATRIX_DDL,
        EXTENSIONS_DDL,
    ] {
        conn.execute_batch(ddl)?;
    }
    Ok(())
}

fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn rtree_name(table: &str, geom_column: &str) -> String {
    format!("rtree_{table}_{geom_column}")
}

/// Virtual table backing the `gpkg_rtree_index` extension for one column.
pub(crate) fn rtree_create_sql(table: &str, geom_column: &str) -> String {
    format!(
        "CREATE VIRTUAL TABLE {} USING rtree(id, minx, maxx, miny, maxy)",
        ident(&rtree_name(table, geom_column)),
    )
}

/// Dropping the virtual table also drops its shadow tables; the triggers go
/// with the user table.
pub(crate) fn rtree_drop_sql(table: &str, geom_column: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {}",
        ident(&rtree_name(table, geom_column))
    )
}

pub(crate) fn rtree_load_sql(table: &str, geom_column: &str, id_column: &str) -> String {
    format!(
        "INSERT OR REPLACE INTO {r}
  SELECT {i}, ST_MinX({c}), ST_MaxX({c}), ST_MinY({c}), ST_MaxY({c})
  FROM {t} WHERE {c} NOT NULL AND NOT ST_IsEmpty({c})",
        r = ident(&rtree_name(table, geom_column)),
        t = ident(table),
        c = ident(geom_column),
        i = ident(id_column),
    )
}

/// The insert, update and delete triggers that keep the rtree in sync.
pub(crate) fn rtree_triggers_sql(
    table: &str,
    geom_column: &str,
    id_column: &str,
) -> Vec<String> {
    let rtree = rtree_name(table, geom_column);
    let r = ident(&rtree);
    let t = ident(table);
    let c = ident(geom_column);
    let i = ident(id_column);
    let trigger = |suffix: &str| ident(&format!("{rtree}_{suffix}"));
    vec![
        format!(
            "CREATE TRIGGER {name} AFTER INSERT ON {t}
  WHEN (new.{c} NOT NULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END",
            name = trigger("insert"),
        ),
        format!(
            "CREATE TRIGGER {name} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END",
            name = trigger("update2"),
        ),
        format!(
            "CREATE TRIGGER {name} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} ISNULL OR ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id IN (OLD.{i}, NEW.{i});
END",
            name = trigger("update4"),
        ),
        format!(
            "CREATE TRIGGER {name} AFTER UPDATE ON {t}
  WHEN OLD.{i} != NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c}))
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
  INSERT OR REPLACE INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END",
            name = trigger("update5"),
        ),
        format!(
            "CREATE TRIGGER {name} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} NOTNULL AND NOT ST_IsEmpty(OLD.{c}))
BEGIN
  UPDATE {r} SET
    minx = ST_MinX(NEW.{c}),
    maxx = ST_MaxX(NEW.{c}),
    miny = ST_MinY(NEW.{c}),
    maxy = ST_MaxY(NEW.{c})
  WHERE id = NEW.{i};
END",
            name = trigger("update6"),
        ),
        format!(
            "CREATE TRIGGER {name} AFTER UPDATE OF {c} ON {t}
  WHEN OLD.{i} = NEW.{i} AND
       (NEW.{c} NOTNULL AND NOT ST_IsEmpty(NEW.{c})) AND
       (OLD.{c} ISNULL OR ST_IsEmpty(OLD.{c}))
BEGIN
  INSERT INTO {r} VALUES (
    NEW.{i},
    ST_MinX(NEW.{c}), ST_MaxX(NEW.{c}),
    ST_MinY(NEW.{c}), ST_MaxY(NEW.{c})
  );
END",
            name = trigger("update7"),
        ),
        format!(
            "CREATE TRIGGER {name} AFTER DELETE ON {t}
  WHEN old.{c} NOT NULL
BEGIN
  DELETE FROM {r} WHERE id = OLD.{i};
END",
            name = trigger("delete"),
        ),
    ]
}

/// Create, fill and wire the rtree of a geometry column.
pub(crate) fn rtree_sqls(table: &str, geom_column: &str, id_column: &str) -> Vec<String> {
    let mut sqls = vec![
        rtree_create_sql(table, geom_column),
        rtree_load_sql(table, geom_column, id_column),
    ];
    sqls.extend(rtree_triggers_sql(table, geom_column, id_column));
    sqls.push(format!(
        "INSERT OR IGNORE INTO gpkg_extensions \
         (table_name, column_name, extension_name, definition, scope) \
         VALUES ({}, {}, {}, {}, 'write-only')",
        quote_literal(table),
        quote_literal(geom_column),
        quote_literal(RTREE_EXTENSION_NAME),
        quote_literal(RTREE_EXTENSION_DEFINITION),
    ));
    sqls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_functions::register_spatial_functions;

    fn table_names(conn: &rusqlite::Connection) -> rusqlite::Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'gpkg_%' ORDER BY name",
        )?;
        stmt.query_map([], |row| row.get(0))?.collect()
    }

    #[test]
    fn initialize_is_idempotent() -> Result<()> {
        let conn = rusqlite::Connection::open_in_memory()?;
        initialize_gpkg(&conn)?;
        initialize_gpkg(&conn)?;

        assert_eq!(
            table_names(&conn)?,
            vec![
                "gpkg_contents",
                "gpkg_extensions",
                "gpkg_geometry_columns",
                "gpkg_spatial_ref_sys",
                "gpkg_tile_matrix",
                "gpkg_tile_matrix_set",
            ]
        );
        let srs_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM gpkg_spatial_ref_sys", [], |row| row.get(0))?;
        assert_eq!(srs_count, 3);
        let application_id: i32 =
            conn.query_row("PRAGMA application_id", [], |row| row.get(0))?;
        assert_eq!(application_id, GPKG_APPLICATION_ID);
        Ok(())
    }

    #[test]
    fn rtree_follows_inserts_and_drops() -> Result<()> {
        let conn = rusqlite::Connection::open_in_memory()?;
        register_spatial_functions(&conn)?;
        initialize_gpkg(&conn)?;
        conn.execute_batch("CREATE TABLE \"my lake\" (fid INTEGER PRIMARY KEY, geom BLOB)")?;
        for sql in rtree_sqls("my lake", "geom", "fid") {
            conn.execute_batch(&sql)?;
        }

        conn.execute_batch(
            "INSERT INTO \"my lake\" (geom) VALUES (GeomFromText('LINESTRING(0 0, 3 4)', 4326))",
        )?;
        let (minx, maxy): (f64, f64) = conn.query_row(
            "SELECT minx, maxy FROM \"rtree_my lake_geom\"",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!((minx, maxy), (0.0, 4.0));

        conn.execute_batch("DELETE FROM \"my lake\"")?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM \"rtree_my lake_geom\"", [], |row| row.get(0))?;
        assert_eq!(count, 0);

        conn.execute_batch(&rtree_drop_sql("my lake", "geom"))?;
        conn.execute_batch(&rtree_drop_sql("my lake", "geom"))?;
        Ok(())
    }
}
