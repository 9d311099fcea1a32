use rusqlite::types::Value;

use crate::connection::RawConnection;
use crate::ddl::{Column, Table};
use crate::elements::SpatialElement;
use crate::error::{Result, SpatialError};
use crate::expr::{Expr, SpatialOperator};
use crate::reflection::{ColumnInfo, Reflection, value_as_i64, value_as_string};
use crate::registry::FunctionName;
use crate::types::{SpatialKind, SpatialParam, SpatialType};

use super::{
    Backend, ColumnDdl, OperatorForm, SpatialDialect, check_srid, constructor, explicit_srid,
    param_element,
};

/// MySQL 8 spatial support.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

pub(super) fn mysql_function_names() -> Vec<(&'static str, FunctionName)> {
    vec![
        ("ST_AsEWKB", FunctionName::fixed("ST_AsBinary")),
        ("ST_GeomFromEWKT", FunctionName::fixed("ST_GeomFromText")),
        ("ST_GeomFromEWKB", FunctionName::fixed("ST_GeomFromWKB")),
    ]
}

pub(super) fn mysql_operator(op: SpatialOperator) -> OperatorForm {
    match op {
        SpatialOperator::Intersects => OperatorForm::Function("MBRIntersects"),
        SpatialOperator::Contains => OperatorForm::Function("MBRContains"),
        SpatialOperator::Contained => OperatorForm::Function("MBRWithin"),
        SpatialOperator::Same => OperatorForm::Function("MBREquals"),
        SpatialOperator::DistanceCentroid => OperatorForm::Function("ST_Distance"),
        other => OperatorForm::Infix(other.token()),
    }
}

/// Text payload without any SRID prefix; the SRID travels as a separate
/// constructor argument.
pub(super) fn plain_text(ty: &SpatialType, element: &SpatialElement) -> Result<Option<String>> {
    check_srid(ty, element)?;
    Ok(match element {
        SpatialElement::Wkt(wkt) => Some(wkt.wkt_body().to_string()),
        _ => None,
    })
}

pub(super) fn reject_raster(ty: &SpatialType, backend: Backend) -> Result<()> {
    if ty.kind() == SpatialKind::Raster {
        return Err(SpatialError::UnsupportedColumnType {
            column: String::new(),
            declared_type: format!("raster on {backend}"),
        });
    }
    Ok(())
}

/// Inline column type, e.g. `POINT NOT NULL SRID 4326`.
pub(super) fn mysql_column_spec(
    ty: &SpatialType,
    column: &Column,
    with_srid: bool,
) -> Result<String> {
    if ty.kind() == SpatialKind::Raster {
        return Err(SpatialError::UnsupportedColumnType {
            column: column.name.clone(),
            declared_type: "raster".to_string(),
        });
    }
    let mut spec = ty
        .geometry_type()
        .map(|ty| ty.base_name().to_string())
        .unwrap_or_else(|| "GEOMETRY".to_string());
    // spatial indexes require NOT NULL columns
    if !column.nullable || ty.spatial_index() {
        spec.push_str(" NOT NULL");
    }
    if with_srid && ty.has_srid() {
        spec.push_str(&format!(" SRID {}", ty.srid()));
    }
    Ok(spec)
}

pub(super) fn mysql_index(dialect: &dyn SpatialDialect, table: &Table, column: &Column) -> String {
    format!(
        "ALTER TABLE {} ADD SPATIAL INDEX({})",
        table.qualified_name(dialect),
        dialect.quote_identifier(&column.name)
    )
}

pub(super) fn reflect_information_schema(
    conn: &dyn RawConnection,
    column: &ColumnInfo,
    srid_expression: &str,
) -> Reflection {
    let mut params = vec![
        Value::Text(column.table.clone()),
        Value::Text(column.name.clone()),
    ];
    let mut schema_filter = String::new();
    if let Some(schema) = &column.schema {
        schema_filter.push_str(" AND TABLE_SCHEMA = ?");
        params.push(Value::Text(schema.clone()));
    }

    let sql = format!(
        "SELECT DATA_TYPE, {srid_expression}, IS_NULLABLE FROM INFORMATION_SCHEMA.COLUMNS \
         WHERE TABLE_NAME = ? AND COLUMN_NAME = ?{schema_filter}"
    );
    let row = match conn.query_row(&sql, &params) {
        Ok(Some(row)) => row,
        Ok(None) => return Reflection::skip("column not found in INFORMATION_SCHEMA"),
        Err(err) => return Reflection::skip(format!("catalog lookup failed: {err}")),
    };
    let mut row = row.into_iter();
    let Some(data_type) = row.next().as_ref().and_then(value_as_string) else {
        return Reflection::skip("missing DATA_TYPE");
    };
    if !crate::conversions::is_geometry_type_name(&data_type) {
        return Reflection::NotSpatial;
    }
    let srid = row.next().as_ref().and_then(value_as_i64).unwrap_or(-1);
    let nullable = row
        .next()
        .as_ref()
        .and_then(value_as_string)
        .is_none_or(|value| value.eq_ignore_ascii_case("YES"));

    let sql = format!(
        "SELECT DISTINCT INDEX_TYPE FROM INFORMATION_SCHEMA.STATISTICS \
         WHERE TABLE_NAME = ? AND COLUMN_NAME = ?{schema_filter}"
    );
    let spatial_index = match conn.query_row(&sql, &params) {
        Ok(row) => row
            .and_then(|row| row.into_iter().next())
            .as_ref()
            .and_then(value_as_string)
            .is_some_and(|index_type| index_type.eq_ignore_ascii_case("SPATIAL")),
        Err(err) => return Reflection::skip(format!("index lookup failed: {err}")),
    };

    let srid = match i32::try_from(srid) {
        Ok(srid) => srid,
        Err(_) => return Reflection::skip(format!("SRID out of range: {srid}")),
    };
    // NOT NULL is forced on indexed columns, so nullability cannot be trusted there
    let built = SpatialType::builder(SpatialKind::Geometry)
        .geometry_type(&data_type)
        .srid(srid)
        .spatial_index(spatial_index)
        .nullable(nullable || spatial_index)
        .build();
    match built {
        Ok(ty) => Reflection::Spatial(ty),
        Err(err) => Reflection::skip(err.to_string()),
    }
}

impl SpatialDialect for MySqlDialect {
    fn backend(&self) -> Backend {
        Backend::MySQL
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn render_blob_literal(&self, bytes: &[u8]) -> String {
        format!("unhex('{}')", hex::encode(bytes))
    }

    fn function_names(&self) -> Vec<(&'static str, FunctionName)> {
        mysql_function_names()
    }

    fn operator(&self, op: SpatialOperator) -> OperatorForm {
        mysql_operator(op)
    }

    fn bind_processor(&self, ty: &SpatialType, param: &SpatialParam) -> Result<Value> {
        reject_raster(ty, self.backend())?;
        let element = param_element(ty, param);
        if let Some(text) = plain_text(ty, &element)? {
            return Ok(Value::Text(text));
        }
        match element {
            SpatialElement::Wkb(wkb) => Ok(Value::Blob(wkb.as_wkb()?.to_bytes()?)),
            _ => Err(SpatialError::UnsupportedColumnType {
                column: String::new(),
                declared_type: "raster".to_string(),
            }),
        }
    }

    fn bind_expression(&self, ty: &SpatialType, param: &SpatialParam) -> Result<Expr> {
        let value = Expr::Bind(self.bind_processor(ty, param)?);
        let element = param_element(ty, param);
        let srid = explicit_srid(ty, element.srid());
        Ok(match element {
            SpatialElement::Wkt(_) => constructor(ty, "ST_GeomFromText", value, srid),
            _ => constructor(ty, "ST_GeomFromWKB", value, srid),
        })
    }

    fn extended_results(&self) -> bool {
        false
    }

    fn column_ddl(&self, table: &Table, column: &Column, ty: &SpatialType) -> Result<ColumnDdl> {
        let mut ddl = ColumnDdl {
            inline: Some(mysql_column_spec(ty, column, true)?),
            ..ColumnDdl::default()
        };
        if ty.spatial_index() {
            ddl.after_create.push(mysql_index(self, table, column));
        }
        Ok(ddl)
    }

    fn reflect_column(&self, conn: &dyn RawConnection, column: &ColumnInfo) -> Reflection {
        reflect_information_schema(conn, column, "SRS_ID")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::connection::tests::MockConnection;
    use crate::elements::{WkbElement, WktElement};

    #[test]
    fn text_binds_pass_srid_separately() -> Result<()> {
        let ty = SpatialType::point(4326);
        let d = MySqlDialect;
        let param: SpatialParam = "SRID=4326;POINT(1 2)".into();
        assert_eq!(d.bind_processor(&ty, &param)?, Value::Text("POINT(1 2)".into()));
        let expr = d.bind_expression(&ty, &param)?;
        assert_eq!(
            Compiler::new(&d).compile_expr(&expr)?.sql,
            "ST_GeomFromText(?, 4326)"
        );
        Ok(())
    }

    #[test]
    fn mismatched_srid_is_rejected() {
        let ty = SpatialType::point(4326);
        let d = MySqlDialect;
        assert!(matches!(
            d.bind_processor(&ty, &"SRID=3857;POINT(1 2)".into()),
            Err(SpatialError::Argument(_))
        ));
        assert!(matches!(
            d.bind_processor(&ty, &WktElement::with_srid("POINT(1 2)", 3857).into()),
            Err(SpatialError::Argument(_))
        ));
    }

    #[test]
    fn binary_binds_are_plain_wkb() -> Result<()> {
        let ty = SpatialType::point(4326);
        let d = MySqlDialect;
        let ewkb = hex::decode("0101000020e6100000000000000000f03f0000000000000040")?;
        let param: SpatialParam = WkbElement::new(ewkb).into();
        assert_eq!(
            d.bind_processor(&ty, &param)?,
            Value::Blob(hex::decode("0101000000000000000000f03f0000000000000040")?)
        );
        let expr = d.bind_expression(&ty, &param)?;
        assert_eq!(
            Compiler::new(&d).compile_expr(&expr)?.sql,
            "ST_GeomFromWKB(?, 4326)"
        );
        Ok(())
    }

    #[test]
    fn column_spec_forces_not_null_for_indexes() -> Result<()> {
        let table = Table::new("lake");
        let ty = SpatialType::polygon(4326);
        let column = Column::spatial("geom", ty.clone());
        let ddl = MySqlDialect.column_ddl(&table, &column, &ty)?;
        assert_eq!(ddl.inline.as_deref(), Some("POLYGON NOT NULL SRID 4326"));
        assert_eq!(ddl.after_create, vec!["ALTER TABLE `lake` ADD SPATIAL INDEX(`geom`)"]);

        let ty = ty.to_builder().spatial_index(false).build()?;
        let column = Column::spatial("geom", ty.clone());
        let ddl = MySqlDialect.column_ddl(&table, &column, &ty)?;
        assert_eq!(ddl.inline.as_deref(), Some("POLYGON SRID 4326"));
        assert!(ddl.after_create.is_empty());
        Ok(())
    }

    #[test]
    fn raster_columns_are_unsupported() {
        let ty = SpatialType::raster();
        let column = Column::spatial("rast", ty.clone());
        assert!(matches!(
            MySqlDialect.column_ddl(&Table::new("t"), &column, &ty),
            Err(SpatialError::UnsupportedColumnType { .. })
        ));
    }

    #[test]
    fn reflects_information_schema() {
        let conn = MockConnection::default()
            .with_row(vec![
                Value::Text("point".into()),
                Value::Integer(4326),
                Value::Text("NO".into()),
            ])
            .with_row(vec![Value::Text("SPATIAL".into())]);
        let info = ColumnInfo::new("lake", "geom", "point");
        let Reflection::Spatial(ty) = MySqlDialect.reflect_column(&conn, &info) else {
            panic!("expected a spatial column");
        };
        assert_eq!(ty.get_col_spec(), "geometry(POINT,4326)");
        assert!(ty.spatial_index());
        assert!(conn.executed()[0].contains("SRS_ID"));
    }

    #[test]
    fn non_geometry_columns_are_ignored() {
        let conn = MockConnection::default().with_row(vec![
            Value::Text("varchar".into()),
            Value::Null,
            Value::Text("YES".into()),
        ]);
        let info = ColumnInfo::new("lake", "name", "varchar");
        assert_eq!(MySqlDialect.reflect_column(&conn, &info), Reflection::NotSpatial);
    }
}
