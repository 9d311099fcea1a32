//! Reflection of spatial columns from the database catalogs.

use rusqlite::types::Value;

use crate::connection::RawConnection;
use crate::dialect::SpatialDialect;
use crate::error::{Result, SpatialError};
use crate::types::SpatialType;

/// A column as listed by the generic table inspection, before the spatial
/// catalogs are consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub table: String,
    pub schema: Option<String>,
    pub name: String,
    /// Declared type as reported by the database, e.g. `geometry(Point,4326)`
    /// on PostgreSQL or `POINT` on SQLite.
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(table: &str, name: &str, data_type: &str) -> Self {
        Self {
            table: table.to_string(),
            schema: None,
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// Outcome of reflecting one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Reflection {
    Spatial(SpatialType),
    /// The column looks spatial but its metadata is inconsistent.
    Skip {
        reason: String,
    },
    NotSpatial,
}

impl Reflection {
    pub fn skip(reason: impl Into<String>) -> Self {
        Self::Skip {
            reason: reason.into(),
        }
    }
}

/// Reflect every column, keeping the spatial ones.
///
/// Columns with inconsistent metadata are logged and left out.
pub fn reflect_table(
    dialect: &dyn SpatialDialect,
    conn: &dyn RawConnection,
    columns: &[ColumnInfo],
) -> Vec<(String, SpatialType)> {
    let mut spatial = Vec::new();
    for column in columns {
        match dialect.reflect_column(conn, column) {
            Reflection::Spatial(ty) => spatial.push((column.name.clone(), ty)),
            Reflection::Skip { reason } => {
                tracing::warn!(
                    backend = %dialect.backend(),
                    table = %column.table,
                    column = %column.name,
                    %reason,
                    "skipping spatial column"
                );
            }
            Reflection::NotSpatial => {}
        }
    }
    spatial
}

/// List the columns of a SQLite table.
pub fn sqlite_columns(conn: &rusqlite::Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare("SELECT name, type, \"notnull\" FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table], |row| {
            let name: String = row.get(0)?;
            let data_type: String = row.get(1)?;
            let not_null: i64 = row.get(2)?;
            Ok(ColumnInfo::new(table, &name, &data_type).nullable(not_null == 0))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if columns.is_empty() {
        return Err(SpatialError::Sql(rusqlite::Error::QueryReturnedNoRows));
    }
    Ok(columns)
}

pub(crate) fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Integer(i) => *i != 0,
        Value::Real(r) => *r != 0.0,
        Value::Text(text) => {
            let text = text.trim();
            text == "1" || text.eq_ignore_ascii_case("t") || text.eq_ignore_ascii_case("true")
        }
        Value::Null | Value::Blob(_) => false,
    }
}

pub(crate) fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Real(r) if r.fract() == 0.0 => Some(*r as i64),
        Value::Text(text) => text.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Text(text) => Some(text.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(r) => Some(r.to_string()),
        Value::Null | Value::Blob(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::MockConnection;
    use crate::dialect::{Backend, select_dialect};

    #[test]
    fn value_helpers() {
        assert!(value_truthy(&Value::Integer(1)));
        assert!(value_truthy(&Value::Text("t".into())));
        assert!(!value_truthy(&Value::Null));
        assert_eq!(value_as_i64(&Value::Text(" 4326 ".into())), Some(4326));
        assert_eq!(value_as_i64(&Value::Real(3.0)), Some(3));
        assert_eq!(value_as_string(&Value::Integer(2)), Some("2".into()));
        assert_eq!(value_as_string(&Value::Null), None);
    }

    #[test]
    fn reflect_table_keeps_spatial_columns_only() {
        let conn = MockConnection::default()
            .with_row(vec![Value::Integer(1)])
            .with_row(vec![Value::Integer(0)]);
        let columns = [
            ColumnInfo::new("lake", "id", "integer"),
            ColumnInfo::new("lake", "geom", "geometry(Polygon,4326)"),
            ColumnInfo::new("lake", "bad", "geometry(Circle,4326)"),
            ColumnInfo::new("lake", "name", "text"),
        ];
        let reflected = reflect_table(select_dialect(Backend::PostgreSQL), &conn, &columns);
        assert_eq!(reflected.len(), 1);
        assert_eq!(reflected[0].0, "geom");
        assert_eq!(reflected[0].1.srid(), 4326);
    }

    #[test]
    fn lists_sqlite_columns() -> Result<()> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch("CREATE TABLE lake (id INTEGER PRIMARY KEY, geom POINT NOT NULL)")?;
        let columns = sqlite_columns(&conn, "lake")?;
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[1].data_type, "POINT");
        assert!(!columns[1].nullable);
        assert!(sqlite_columns(&conn, "missing").is_err());
        Ok(())
    }
}
