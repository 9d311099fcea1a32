//! Table definitions and the statements that create or drop them.

use crate::connection::RawConnection;
use crate::dialect::{Backend, SpatialDialect};
use crate::error::{Result, SpatialError};
use crate::types::{SpatialType, SqlType};

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl Column {
    pub fn new(name: &str, sql_type: impl Into<SqlType>) -> Self {
        Self {
            name: name.to_string(),
            sql_type: sql_type.into(),
            nullable: true,
            primary_key: false,
        }
    }

    /// A spatial column; nullability follows the type.
    pub fn spatial(name: &str, ty: SpatialType) -> Self {
        Self {
            nullable: ty.nullable(),
            ..Self::new(name, ty)
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub schema: Option<String>,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            schema: None,
            columns: Vec::new(),
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Quoted, schema-qualified name.
    pub fn qualified_name(&self, dialect: &dyn SpatialDialect) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                dialect.quote_identifier(schema),
                dialect.quote_identifier(&self.name)
            ),
            None => dialect.quote_identifier(&self.name),
        }
    }

    pub fn spatial_columns(&self) -> impl Iterator<Item = (&Column, &SpatialType)> {
        self.columns
            .iter()
            .filter_map(|column| column.sql_type.spatial().map(|ty| (column, ty)))
    }

    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|column| column.primary_key)
    }
}

/// Statements to run, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DdlPlan {
    pub before: Vec<String>,
    pub main: String,
    pub after: Vec<String>,
}

impl DdlPlan {
    pub fn statements(&self) -> impl Iterator<Item = &str> {
        self.before
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.main.as_str()))
            .chain(self.after.iter().map(String::as_str))
    }

    pub fn execute(&self, conn: &dyn RawConnection) -> Result<()> {
        for sql in self.statements() {
            tracing::debug!(sql, "executing DDL");
            conn.execute_batch(sql)?;
        }
        Ok(())
    }
}

fn scalar_type(backend: Backend, column: &Column) -> Result<&'static str> {
    let name = match (&column.sql_type, backend) {
        (SqlType::Integer, _) => "INTEGER",
        (SqlType::Real, Backend::PostgreSQL) => "DOUBLE PRECISION",
        (SqlType::Real, Backend::MySQL | Backend::MariaDB) => "DOUBLE",
        (SqlType::Real, _) => "REAL",
        (SqlType::Text, _) => "TEXT",
        (SqlType::Blob, Backend::PostgreSQL) => "BYTEA",
        (SqlType::Blob, _) => "BLOB",
        (SqlType::Boolean, _) => "BOOLEAN",
        (other, _) => {
            return Err(SpatialError::UnsupportedColumnType {
                column: column.name.clone(),
                declared_type: format!("{other:?}"),
            });
        }
    };
    Ok(name)
}

/// Plan `CREATE TABLE` with the spatial management each column needs.
pub fn create_table(dialect: &dyn SpatialDialect, table: &Table) -> Result<DdlPlan> {
    dialect.check_table(table)?;

    let mut plan = DdlPlan::default();
    let mut defs = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        let name = dialect.quote_identifier(&column.name);
        match column.sql_type.spatial() {
            Some(ty) => {
                let ddl = dialect.column_ddl(table, column, ty)?;
                if let Some(inline) = ddl.inline {
                    defs.push(format!("{name} {inline}"));
                }
                plan.before.extend(ddl.before_create);
                plan.after.extend(ddl.after_create);
            }
            None => {
                let mut def = format!("{name} {}", scalar_type(dialect.backend(), column)?);
                if column.primary_key {
                    def.push_str(" PRIMARY KEY");
                } else if !column.nullable {
                    def.push_str(" NOT NULL");
                }
                defs.push(def);
            }
        }
    }
    plan.main = format!(
        "CREATE TABLE {} ({})",
        table.qualified_name(dialect),
        defs.join(", ")
    );
    Ok(plan)
}

/// Plan `DROP TABLE`, removing the spatial management first.
pub fn drop_table(dialect: &dyn SpatialDialect, table: &Table) -> Result<DdlPlan> {
    let mut plan = DdlPlan::default();
    for (column, ty) in table.spatial_columns() {
        plan.before
            .extend(dialect.column_ddl(table, column, ty)?.before_drop);
    }
    plan.main = format!("DROP TABLE {}", table.qualified_name(dialect));
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::tests::MockConnection;
    use crate::dialect::select_dialect;

    fn lake() -> Table {
        Table::new("lake")
            .column(Column::new("id", SqlType::Integer).primary_key())
            .column(Column::new("name", SqlType::Text).not_null())
            .column(Column::spatial("geom", SpatialType::polygon(4326)))
    }

    #[test]
    fn postgresql_plan() -> Result<()> {
        let plan = create_table(select_dialect(Backend::PostgreSQL), &lake())?;
        assert!(plan.before.is_empty());
        assert_eq!(
            plan.main,
            r#"CREATE TABLE "lake" ("id" INTEGER PRIMARY KEY, "name" TEXT NOT NULL, "geom" geometry(POLYGON,4326))"#
        );
        assert_eq!(plan.after.len(), 1);
        assert_eq!(plan.statements().count(), 2);
        Ok(())
    }

    #[test]
    fn mysql_plan() -> Result<()> {
        let plan = create_table(select_dialect(Backend::MySQL), &lake())?;
        assert_eq!(
            plan.main,
            "CREATE TABLE `lake` (`id` INTEGER PRIMARY KEY, `name` TEXT NOT NULL, `geom` POLYGON NOT NULL SRID 4326)"
        );
        Ok(())
    }

    #[test]
    fn drop_plan_runs_cleanup_first() -> Result<()> {
        let plan = drop_table(select_dialect(Backend::SQLite), &lake())?;
        assert_eq!(plan.main, r#"DROP TABLE "lake""#);
        assert_eq!(
            plan.before.last().map(String::as_str),
            Some("SELECT DiscardGeometryColumn('lake', 'geom')")
        );

        let conn = MockConnection::default();
        plan.execute(&conn)?;
        assert_eq!(conn.executed().last().map(String::as_str), Some(r#"DROP TABLE "lake""#));
        Ok(())
    }

    #[test]
    fn non_column_types_are_rejected() {
        let table = Table::new("t").column(Column::new("b", SqlType::Box2d));
        assert!(matches!(
            create_table(select_dialect(Backend::PostgreSQL), &table),
            Err(SpatialError::UnsupportedColumnType { .. })
        ));
    }
}
