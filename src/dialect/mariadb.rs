use rusqlite::types::Value;

use crate::connection::RawConnection;
use crate::ddl::{Column, Table};
use crate::elements::{SpatialElement, WkbElement};
use crate::error::{Result, SpatialError};
use crate::expr::{Expr, SpatialOperator};
use crate::functions::func;
use crate::reflection::{ColumnInfo, Reflection};
use crate::registry::FunctionName;
use crate::types::{SpatialParam, SpatialType, SqlType};

use super::mysql::{
    mysql_column_spec, mysql_function_names, mysql_index, mysql_operator, plain_text,
    reflect_information_schema, reject_raster,
};
use super::{
    Backend, ColumnDdl, OperatorForm, SpatialDialect, constructor, explicit_srid, param_element,
};

/// MariaDB spatial support.
///
/// MariaDB drivers cannot pass raw binary parameters reliably, so WKB
/// travels as hex text and is decoded with `unhex` on the server.
#[derive(Debug, Clone, Copy)]
pub struct MariaDbDialect {
    convert_parameters: bool,
}

impl MariaDbDialect {
    /// `convert_parameters` turns binary parameters into WKB hex text right
    /// before execution.
    pub const fn new(convert_parameters: bool) -> Self {
        Self { convert_parameters }
    }
}

impl Default for MariaDbDialect {
    fn default() -> Self {
        Self::new(true)
    }
}

fn blob_as_hex(expr: Expr) -> Expr {
    match expr {
        Expr::Bind(Value::Blob(bytes)) => Expr::Bind(Value::Text(hex::encode(bytes))),
        Expr::Literal(Value::Blob(bytes)) => Expr::Literal(Value::Text(hex::encode(bytes))),
        other => other,
    }
}

fn is_unhex(expr: &Expr) -> bool {
    matches!(expr, Expr::Function(call) if call.name.eq_ignore_ascii_case("unhex"))
}

fn wkb_hex(bytes: Vec<u8>) -> String {
    match WkbElement::new(bytes.as_slice()).as_wkb() {
        Ok(wkb) => wkb.desc(),
        Err(_) => hex::encode(bytes),
    }
}

impl SpatialDialect for MariaDbDialect {
    fn backend(&self) -> Backend {
        Backend::MariaDB
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

    fn adapt_arguments(
        &self,
        function: &str,
        mut args: Vec<Expr>,
        return_type: &SqlType,
    ) -> Vec<Expr> {
        let srid = return_type.spatial().filter(|ty| ty.has_srid()).map(|ty| ty.srid());
        if function.eq_ignore_ascii_case("ST_GeomFromWKB") && !args.is_empty() {
            let first = args.remove(0);
            let first = if is_unhex(&first) {
                first
            } else {
                func("unhex", vec![blob_as_hex(first)])
            };
            args.insert(0, first);
        } else if !function.eq_ignore_ascii_case("ST_GeomFromText") {
            return args;
        }
        if let (1, Some(srid)) = (args.len(), srid) {
            args.push(Expr::Literal(Value::Integer(srid.into())));
        }
        args
    }

    fn bind_processor(&self, ty: &SpatialType, param: &SpatialParam) -> Result<Value> {
        reject_raster(ty, self.backend())?;
        let element = param_element(ty, param);
        if let Some(text) = plain_text(ty, &element)? {
            return Ok(Value::Text(text));
        }
        match element {
            SpatialElement::Wkb(wkb) => Ok(Value::Text(wkb.as_wkb()?.desc())),
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
            _ => constructor(ty, "ST_GeomFromWKB", func("unhex", vec![value]), srid),
        })
    }

    fn extended_results(&self) -> bool {
        false
    }

    fn column_ddl(&self, table: &Table, column: &Column, ty: &SpatialType) -> Result<ColumnDdl> {
        let mut ddl = ColumnDdl {
            inline: Some(mysql_column_spec(ty, column, false)?),
            ..ColumnDdl::default()
        };
        if ty.spatial_index() {
            ddl.after_create.push(mysql_index(self, table, column));
        }
        Ok(ddl)
    }

    fn prepare_parameters(&self, params: Vec<Value>) -> Vec<Value> {
        if !self.convert_parameters {
            return params;
        }
        params
            .into_iter()
            .map(|value| match value {
                Value::Blob(bytes) => Value::Text(wkb_hex(bytes)),
                other => other,
            })
            .collect()
    }

    fn reflect_column(&self, conn: &dyn RawConnection, column: &ColumnInfo) -> Reflection {
        reflect_information_schema(conn, column, "-1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::connection::tests::MockConnection;

    const EWKB: &str = "0101000020e6100000000000000000f03f0000000000000040";
    const WKB: &str = "0101000000000000000000f03f0000000000000040";

    #[test]
    fn wkb_travels_as_hex() -> Result<()> {
        let d = MariaDbDialect::default();
        let ty = SpatialType::point(4326);
        let param: SpatialParam = hex::decode(EWKB)?.into();
        assert_eq!(d.bind_processor(&ty, &param)?, Value::Text(WKB.to_string()));
        let expr = d.bind_expression(&ty, &param)?;
        assert_eq!(
            Compiler::new(&d).compile_expr(&expr)?.sql,
            "ST_GeomFromWKB(unhex(?), 4326)"
        );
        Ok(())
    }

    #[test]
    fn literal_wkb_is_unhexed_once() -> Result<()> {
        let d = MariaDbDialect::default();
        let ty = SpatialType::point(4326);
        let literal = ty.literal_processor(&d)(&hex::decode(WKB)?.into())?;
        assert_eq!(literal, format!("ST_GeomFromWKB(unhex('{WKB}'), 4326)"));
        Ok(())
    }

    #[test]
    fn generic_constructors_get_unhex_and_srid() -> Result<()> {
        let d = MariaDbDialect::default();
        let expr = crate::functions::typed_func(
            "ST_GeomFromEWKB",
            vec![Expr::Bind(Value::Blob(hex::decode(WKB)?))],
            SqlType::Spatial(SpatialType::point(4326)),
        );
        let compiled = Compiler::new(&d).compile_expr(&expr)?;
        assert_eq!(compiled.sql, "ST_GeomFromWKB(unhex(?), 4326)");
        assert_eq!(compiled.params, vec![Value::Text(WKB.to_string())]);
        Ok(())
    }

    #[test]
    fn wkt_gets_column_srid() -> Result<()> {
        let d = MariaDbDialect::default();
        let ty = SpatialType::point(4326);
        let expr = d.bind_expression(&ty, &"POINT(1 2)".into())?;
        let compiled = Compiler::new(&d).compile_expr(&expr)?;
        assert_eq!(compiled.sql, "ST_GeomFromText(?, 4326)");
        assert_eq!(compiled.params, vec![Value::Text("POINT(1 2)".into())]);
        Ok(())
    }

    #[test]
    fn parameters_are_converted_to_hex() -> Result<()> {
        let params = vec![Value::Blob(hex::decode(EWKB)?), Value::Integer(3)];
        assert_eq!(
            MariaDbDialect::default().prepare_parameters(params.clone()),
            vec![Value::Text(WKB.to_string()), Value::Integer(3)]
        );
        assert_eq!(MariaDbDialect::new(false).prepare_parameters(params.clone()), params);
        Ok(())
    }

    #[test]
    fn ddl_has_no_srid_clause() -> Result<()> {
        let ty = SpatialType::point(4326);
        let column = Column::spatial("geom", ty.clone());
        let ddl = MariaDbDialect::default().column_ddl(&Table::new("lake"), &column, &ty)?;
        assert_eq!(ddl.inline.as_deref(), Some("POINT NOT NULL"));
        Ok(())
    }

    #[test]
    fn reflection_has_no_srid() {
        let conn = MockConnection::default()
            .with_row(vec![
                Value::Text("polygon".into()),
                Value::Integer(-1),
                Value::Text("YES".into()),
            ])
            .with_row(vec![Value::Null]);
        let info = ColumnInfo::new("lake", "geom", "polygon");
        let Reflection::Spatial(ty) = MariaDbDialect::default().reflect_column(&conn, &info) else {
            panic!("expected a spatial column");
        };
        assert_eq!(ty.srid(), -1);
        assert!(!ty.spatial_index());
        assert!(conn.executed()[0].contains("-1"));
    }
}
