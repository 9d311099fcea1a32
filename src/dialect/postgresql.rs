use rusqlite::types::Value;

use crate::connection::RawConnection;
use crate::ddl::{Column, Table};
use crate::elements::SpatialElement;
use crate::error::{Result, SpatialError};
use crate::expr::Expr;
use crate::reflection::{ColumnInfo, Reflection, value_truthy};
use crate::types::{SpatialKind, SpatialParam, SpatialType};

use super::{
    Backend, ColumnDdl, SpatialDialect, constructor, ewkt_text, explicit_srid, param_element,
    quote_literal, spatial_index_name,
};

/// Connection options for PostGIS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostgisOptions {
    /// Run `CREATE EXTENSION IF NOT EXISTS postgis` on connect.
    pub create_extension: bool,
}

impl PostgisOptions {
    pub const fn new() -> Self {
        Self {
            create_extension: false,
        }
    }
}

/// PostgreSQL with PostGIS.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect {
    options: PostgisOptions,
}

impl PostgresDialect {
    pub const fn new(options: PostgisOptions) -> Self {
        Self { options }
    }

    fn index_statement(&self, table: &Table, column: &Column, ty: &SpatialType) -> String {
        let name = self.quote_identifier(&spatial_index_name(&table.name, &column.name));
        let target = table.qualified_name(self);
        let col = self.quote_identifier(&column.name);
        match ty.kind() {
            SpatialKind::Raster => {
                format!("CREATE INDEX {name} ON {target} USING gist (ST_ConvexHull({col}))")
            }
            _ if ty.use_n_d_index() => {
                format!("CREATE INDEX {name} ON {target} USING gist ({col} gist_geometry_ops_nd)")
            }
            _ => format!("CREATE INDEX {name} ON {target} USING gist ({col})"),
        }
    }

    fn managed_args(&self, table: &Table, column: &Column) -> String {
        let mut args = Vec::new();
        if let Some(schema) = &table.schema {
            args.push(quote_literal(schema));
        }
        args.push(quote_literal(&table.name));
        args.push(quote_literal(&column.name));
        args.join(", ")
    }
}

fn is_managed(ty: &SpatialType) -> bool {
    ty.kind() == SpatialKind::Geometry && ty.use_typmod() == Some(false)
}

impl SpatialDialect for PostgresDialect {
    fn backend(&self) -> Backend {
        Backend::PostgreSQL
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn render_blob_literal(&self, bytes: &[u8]) -> String {
        format!("decode('{}', 'hex')", hex::encode(bytes))
    }

    fn supports_named_arguments(&self) -> bool {
        true
    }

    fn bind_processor(&self, ty: &SpatialType, param: &SpatialParam) -> Result<Value> {
        Ok(match param_element(ty, param) {
            SpatialElement::Wkt(wkt) => Value::Text(ewkt_text(ty, &wkt)),
            SpatialElement::Wkb(wkb) => Value::Blob(wkb.to_bytes()?),
            SpatialElement::Raster(raster) => Value::Text(raster.data().to_string()),
        })
    }

    fn bind_expression(&self, ty: &SpatialType, param: &SpatialParam) -> Result<Expr> {
        let value = Expr::Bind(self.bind_processor(ty, param)?);
        Ok(match param_element(ty, param) {
            SpatialElement::Wkt(_) => constructor(ty, ty.from_text(), value, None),
            SpatialElement::Wkb(wkb) if wkb.extended() || ty.kind() != SpatialKind::Geometry => {
                constructor(ty, ty.from_binary(true), value, None)
            }
            SpatialElement::Wkb(wkb) => constructor(
                ty,
                ty.from_binary(false),
                value,
                explicit_srid(ty, wkb.srid()),
            ),
            SpatialElement::Raster(_) => constructor(&SpatialType::raster(), "raster", value, None),
        })
    }

    fn column_ddl(&self, table: &Table, column: &Column, ty: &SpatialType) -> Result<ColumnDdl> {
        let mut ddl = ColumnDdl::default();

        if is_managed(ty) {
            let geometry_type = ty
                .geometry_type()
                .map(|ty| ty.to_string())
                .unwrap_or_else(|| "GEOMETRY".to_string());
            ddl.after_create.push(format!(
                "SELECT AddGeometryColumn({}, {}, {}, {}, false)",
                self.managed_args(table, column),
                ty.srid(),
                quote_literal(&geometry_type),
                ty.dimension(),
            ));
            ddl.before_drop.push(format!(
                "SELECT DropGeometryColumn({})",
                self.managed_args(table, column)
            ));
        } else {
            let mut spec = ty.get_col_spec();
            if !column.nullable {
                spec.push_str(" NOT NULL");
            }
            ddl.inline = Some(spec);
        }

        if ty.spatial_index() {
            ddl.after_create
                .push(self.index_statement(table, column, ty));
        }
        Ok(ddl)
    }

    fn setup_connection(&self, conn: &dyn RawConnection) -> Result<()> {
        if self.options.create_extension {
            tracing::debug!("creating the postgis extension");
            conn.execute_batch("CREATE EXTENSION IF NOT EXISTS postgis")?;
        }
        Ok(())
    }

    fn reflect_column(&self, conn: &dyn RawConnection, column: &ColumnInfo) -> Reflection {
        let parsed = match parse_type_name(&column.data_type) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => return Reflection::NotSpatial,
            Err(err) => return Reflection::skip(err.to_string()),
        };

        let mut builder = SpatialType::builder(parsed.kind)
            .srid(parsed.srid)
            .nullable(column.nullable);
        builder = match &parsed.geometry_type {
            Some(geometry_type) => builder.geometry_type(geometry_type),
            None if parsed.kind == SpatialKind::Raster => builder,
            None => builder.any_geometry_type(),
        };

        let mut params = vec![
            Value::Text(column.table.clone()),
            Value::Text(column.name.clone()),
        ];
        let mut sql = SQL_SPATIAL_INDEX.to_string();
        if let Some(schema) = &column.schema {
            sql.push_str(" AND n.nspname = $3");
            params.push(Value::Text(schema.clone()));
        }
        sql.push(')');
        let spatial_index = match conn.query_row(&sql, &params) {
            Ok(row) => row
                .and_then(|row| row.into_iter().next())
                .is_some_and(|value| value_truthy(&value)),
            Err(err) => return Reflection::skip(format!("spatial index lookup failed: {err}")),
        };

        match builder.spatial_index(spatial_index).build() {
            Ok(ty) => Reflection::Spatial(ty),
            Err(err) => Reflection::skip(err.to_string()),
        }
    }
}

const SQL_SPATIAL_INDEX: &str = "SELECT EXISTS (
  SELECT 1
  FROM pg_index i
  JOIN pg_class t ON t.oid = i.indrelid
  JOIN pg_namespace n ON n.oid = t.relnamespace
  JOIN pg_class ix ON ix.oid = i.indexrelid
  JOIN pg_am am ON am.oid = ix.relam
  WHERE am.amname = 'gist' AND t.relname = $1
    AND (
      EXISTS (
        SELECT 1 FROM pg_attribute a
        WHERE a.attrelid = t.oid AND a.attnum = ANY(i.indkey) AND a.attname = $2
      )
      OR pg_get_indexdef(i.indexrelid)
        ~ ('(^|[^a-zA-Z0-9_])\"?' || $2 || '\"?($|[^a-zA-Z0-9_])')
    )";

struct ParsedType {
    kind: SpatialKind,
    geometry_type: Option<String>,
    srid: i32,
}

/// Parse `format_type` output such as `geometry(PointZ,4326)` or `raster`.
fn parse_type_name(data_type: &str) -> Result<Option<ParsedType>> {
    let data_type = data_type.trim();
    let (name, modifiers) = match data_type.split_once('(') {
        Some((name, rest)) => {
            let Some(modifiers) = rest.strip_suffix(')') else {
                return Err(SpatialError::InvalidGeometryType(data_type.to_string()));
            };
            (name.trim(), Some(modifiers))
        }
        None => (data_type, None),
    };
    let kind = if name.eq_ignore_ascii_case("geometry") {
        SpatialKind::Geometry
    } else if name.eq_ignore_ascii_case("geography") {
        SpatialKind::Geography
    } else if name.eq_ignore_ascii_case("raster") {
        SpatialKind::Raster
    } else {
        return Ok(None);
    };

    let mut geometry_type = None;
    let mut srid = -1;
    if let Some(modifiers) = modifiers {
        let mut parts = modifiers.split(',').map(str::trim);
        geometry_type = parts.next().map(str::to_ascii_uppercase);
        if let Some(value) = parts.next() {
            srid = value
                .parse()
                .map_err(|_| SpatialError::Configuration(format!("invalid SRID: {value}")))?;
        }
    }
    Ok(Some(ParsedType {
        kind,
        geometry_type,
        srid,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::connection::tests::MockConnection;
    use crate::elements::{WkbElement, WktElement};

    fn dialect() -> PostgresDialect {
        PostgresDialect::default()
    }

    #[test]
    fn text_binds_become_ewkt() -> Result<()> {
        let ty = SpatialType::point(4326);
        let d = dialect();
        assert_eq!(
            d.bind_processor(&ty, &"POINT(1 2)".into())?,
            Value::Text("SRID=4326;POINT(1 2)".into())
        );
        assert_eq!(
            d.bind_processor(&ty, &"SRID=3857;POINT(1 2)".into())?,
            Value::Text("SRID=3857;POINT(1 2)".into())
        );
        let untyped = SpatialType::default_geometry();
        assert_eq!(
            d.bind_processor(&untyped, &"POINT(1 2)".into())?,
            Value::Text("POINT(1 2)".into())
        );
        Ok(())
    }

    #[test]
    fn bind_expression_depends_on_value() -> Result<()> {
        let ty = SpatialType::point(4326);
        let d = dialect();
        let compile = |param: SpatialParam| -> Result<String> {
            let expr = d.bind_expression(&ty, &param)?;
            Ok(Compiler::new(&d).compile_expr(&expr)?.sql)
        };
        assert_eq!(compile("POINT(1 2)".into())?, "ST_GeomFromEWKT($1)");
        assert_eq!(
            compile(WktElement::with_srid("POINT(1 2)", 4326).into())?,
            "ST_GeomFromEWKT($1)"
        );
        let ewkb = hex::decode("0101000020e6100000000000000000f03f0000000000000040")?;
        assert_eq!(compile(ewkb.into())?, "ST_GeomFromEWKB($1)");
        let wkb = hex::decode("0101000000000000000000f03f0000000000000040")?;
        assert_eq!(
            compile(WkbElement::new(wkb).into())?,
            "ST_GeomFromWKB($1, 4326)"
        );
        Ok(())
    }

    #[test]
    fn geography_uses_geography_constructors() -> Result<()> {
        let ty = SpatialType::geography("POINT", 4326)?;
        let d = dialect();
        let expr = d.bind_expression(&ty, &"POINT(1 2)".into())?;
        assert_eq!(Compiler::new(&d).compile_expr(&expr)?.sql, "ST_GeogFromText($1)");
        Ok(())
    }

    #[test]
    fn typmod_ddl_with_index() -> Result<()> {
        let table = Table::new("lake").column(Column::spatial("geom", SpatialType::polygon(4326)));
        let d = dialect();
        let ddl = d.column_ddl(&table, &table.columns[0], &SpatialType::polygon(4326))?;
        assert_eq!(ddl.inline.as_deref(), Some("geometry(POLYGON,4326)"));
        assert_eq!(
            ddl.after_create,
            vec![r#"CREATE INDEX "idx_lake_geom" ON "lake" USING gist ("geom")"#]
        );
        assert!(ddl.before_drop.is_empty());
        Ok(())
    }

    #[test]
    fn managed_ddl() -> Result<()> {
        let ty = SpatialType::builder(SpatialKind::Geometry)
            .geometry_type("POINTZ")
            .srid(4326)
            .use_typmod(false)
            .use_n_d_index(true)
            .build()?;
        let table = Table::new("lake")
            .schema("gis")
            .column(Column::spatial("geom", ty.clone()));
        let ddl = dialect().column_ddl(&table, &table.columns[0], &ty)?;
        assert_eq!(ddl.inline, None);
        assert_eq!(
            ddl.after_create,
            vec![
                "SELECT AddGeometryColumn('gis', 'lake', 'geom', 4326, 'POINTZ', 3, false)"
                    .to_string(),
                r#"CREATE INDEX "idx_lake_geom" ON "gis"."lake" USING gist ("geom" gist_geometry_ops_nd)"#
                    .to_string(),
            ]
        );
        assert_eq!(
            ddl.before_drop,
            vec!["SELECT DropGeometryColumn('gis', 'lake', 'geom')"]
        );
        Ok(())
    }

    #[test]
    fn raster_index_uses_convex_hull() -> Result<()> {
        let ty = SpatialType::raster();
        let table = Table::new("ocean").column(Column::spatial("rast", ty.clone()));
        let ddl = dialect().column_ddl(&table, &table.columns[0], &ty)?;
        assert_eq!(ddl.inline.as_deref(), Some("raster"));
        assert_eq!(
            ddl.after_create,
            vec![r#"CREATE INDEX "idx_ocean_rast" ON "ocean" USING gist (ST_ConvexHull("rast"))"#]
        );
        Ok(())
    }

    #[test]
    fn reflects_typmod_and_index() {
        let conn = MockConnection::default().with_row(vec![Value::Integer(1)]);
        let info = ColumnInfo::new("lake", "geom", "geometry(PolygonZ,4326)");
        let Reflection::Spatial(ty) = dialect().reflect_column(&conn, &info) else {
            panic!("expected a spatial column");
        };
        assert_eq!(ty.get_col_spec(), "geometry(POLYGONZ,4326)");
        assert_eq!(ty.dimension(), 3);
        assert!(ty.spatial_index());
        assert!(conn.executed()[0].contains("pg_index"));
    }

    #[test]
    fn reflects_untyped_and_raster_columns() {
        let conn = MockConnection::default().with_row(vec![Value::Integer(0)]);
        let Reflection::Spatial(ty) =
            dialect().reflect_column(&conn, &ColumnInfo::new("t", "g", "geometry"))
        else {
            panic!("expected a spatial column");
        };
        assert_eq!(ty.geometry_type(), None);
        assert!(!ty.spatial_index());

        let conn = MockConnection::default().with_row(vec![Value::Integer(1)]);
        let Reflection::Spatial(ty) =
            dialect().reflect_column(&conn, &ColumnInfo::new("t", "r", "raster"))
        else {
            panic!("expected a raster column");
        };
        assert_eq!(ty.kind(), SpatialKind::Raster);
    }

    #[test]
    fn index_lookup_matches_expression_indexes() {
        let conn = MockConnection::default().with_row(vec![Value::Integer(1)]);
        let info = ColumnInfo::new("ocean", "rast", "raster").schema("gis");
        let Reflection::Spatial(ty) = dialect().reflect_column(&conn, &info) else {
            panic!("expected a raster column");
        };
        assert!(ty.spatial_index());

        let sql = &conn.executed()[0];
        assert!(sql.contains("a.attnum = ANY(i.indkey) AND a.attname = $2"));
        assert!(sql.contains(
            r#"OR pg_get_indexdef(i.indexrelid)
        ~ ('(^|[^a-zA-Z0-9_])"?' || $2 || '"?($|[^a-zA-Z0-9_])')"#
        ));
        assert!(sql.ends_with(")\n    ) AND n.nspname = $3)"));
    }

    #[test]
    fn skips_inconsistent_metadata() {
        let conn = MockConnection::default();
        let info = ColumnInfo::new("lake", "geom", "geometry(CIRCLE,4326)");
        assert!(matches!(
            dialect().reflect_column(&conn, &info),
            Reflection::Skip { .. }
        ));
        let info = ColumnInfo::new("lake", "name", "text");
        assert_eq!(dialect().reflect_column(&conn, &info), Reflection::NotSpatial);
    }

    #[test]
    fn setup_creates_extension_when_asked() -> Result<()> {
        let conn = MockConnection::default();
        dialect().setup_connection(&conn)?;
        assert!(conn.executed().is_empty());

        let d = PostgresDialect::new(PostgisOptions {
            create_extension: true,
        });
        d.setup_connection(&conn)?;
        assert_eq!(conn.executed(), vec!["CREATE EXTENSION IF NOT EXISTS postgis"]);
        Ok(())
    }
}
