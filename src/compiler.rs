//! Rendering of expressions into backend SQL.
//!
//! A [`Compiler`] is bound to one dialect and a snapshot of the function
//! registry. It turns an [`Expr`] into SQL text plus the parameters to bind,
//! resolving function names, wrapping spatial arguments in the backend's
//! constructors and picking the backend's form of each spatial operator.
//!
//! ```
//! use spatial_dialects::{Backend, Compiler, Expr, SpatialComparator, SpatialType, select_dialect};
//!
//! let geom = Expr::column("lake", "geom", SpatialType::polygon(4326));
//! let sqlite = Compiler::new(select_dialect(Backend::SQLite));
//! let compiled = sqlite.compile_expr(&geom.intersects("POINT(1 1)"))?;
//! assert_eq!(compiled.sql, r#"MbrIntersects("lake"."geom", GeomFromEWKT(?1))"#);
//! # Ok::<(), spatial_dialects::SpatialError>(())
//! ```

use rusqlite::types::Value;

use crate::ddl::Table;
use crate::dialect::{OperatorForm, SpatialDialect, quote_literal};
use crate::elements::SpatialElement;
use crate::error::{Result, SpatialError};
use crate::expr::{BinaryOp, ColumnRef, Expr, FunctionCall, coerce_operand};
use crate::functions::lookup;
use crate::registry::{FunctionRegistry, default_registry};
use crate::types::{SpatialParam, SpatialType, SqlType};

/// SQL text with its parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSql {
    pub sql: String,
    pub params: Vec<Value>,
    /// Type of each selected column; empty for anything but a `SELECT`.
    pub result_types: Vec<SqlType>,
}

/// A fetched value after decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultValue {
    Plain(Value),
    Spatial(Option<SpatialElement>),
}

impl CompiledSql {
    /// Decode a fetched row, turning spatial columns into elements.
    pub fn decode_row(
        &self,
        dialect: &dyn SpatialDialect,
        row: Vec<Value>,
    ) -> Result<Vec<ResultValue>> {
        row.into_iter()
            .enumerate()
            .map(|(i, raw)| match self.result_types.get(i).and_then(SqlType::spatial) {
                Some(ty) => Ok(ResultValue::Spatial(dialect.result_processor(ty, raw)?)),
                None => Ok(ResultValue::Plain(raw)),
            })
            .collect()
    }
}

#[derive(Default)]
struct Output {
    sql: String,
    params: Vec<Value>,
}

/// Compiles expressions and simple statements for one dialect.
pub struct Compiler<'a> {
    dialect: &'a dyn SpatialDialect,
    registry: FunctionRegistry,
    literal_binds: bool,
}

impl<'a> Compiler<'a> {
    /// A compiler using a snapshot of the process-wide function registry.
    pub fn new(dialect: &'a dyn SpatialDialect) -> Self {
        Self {
            dialect,
            registry: default_registry(),
            literal_binds: false,
        }
    }

    pub fn with_registry(mut self, registry: FunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Render bound values inline instead of as placeholders.
    pub fn literal_binds(mut self, literal_binds: bool) -> Self {
        self.literal_binds = literal_binds;
        self
    }

    pub fn dialect(&self) -> &'a dyn SpatialDialect {
        self.dialect
    }

    pub fn compile_expr(&self, expr: &Expr) -> Result<CompiledSql> {
        let mut out = Output::default();
        self.render(expr, &mut out)?;
        Ok(self.finish(out, Vec::new()))
    }

    /// `SELECT columns FROM table [WHERE filter]`.
    ///
    /// Spatial columns are read through the dialect's column expression and
    /// keep their name as a label, so [`CompiledSql::decode_row`] can turn
    /// them into elements.
    pub fn compile_select(
        &self,
        columns: &[Expr],
        table: &Table,
        filter: Option<&Expr>,
    ) -> Result<CompiledSql> {
        let mut out = Output::default();
        let mut result_types = Vec::with_capacity(columns.len());
        out.sql.push_str("SELECT ");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                out.sql.push_str(", ");
            }
            let sql_type = column.sql_type();
            let selected = match sql_type.spatial() {
                Some(ty) => self.read_expression(ty, column.clone()),
                None => column.clone(),
            };
            self.render(&selected, &mut out)?;
            result_types.push(sql_type);
        }
        out.sql.push_str(" FROM ");
        out.sql.push_str(&table.qualified_name(self.dialect));
        if let Some(filter) = filter {
            out.sql.push_str(" WHERE ");
            self.render(filter, &mut out)?;
        }
        Ok(self.finish(out, result_types))
    }

    /// `INSERT INTO table (..) VALUES (..)`; plain values for spatial columns
    /// go through the column type's constructor.
    pub fn compile_insert(&self, table: &Table, values: Vec<(&str, Expr)>) -> Result<CompiledSql> {
        let mut names = Vec::with_capacity(values.len());
        let mut exprs = Vec::with_capacity(values.len());
        for (name, value) in values {
            let column = table
                .columns
                .iter()
                .find(|column| column.name == name)
                .ok_or_else(|| {
                    SpatialError::Argument(format!("no column {name} in table {}", table.name))
                })?;
            names.push(self.dialect.quote_identifier(name));
            exprs.push(coerce_operand(&column.sql_type, value));
        }

        let mut out = Output::default();
        out.sql = format!(
            "INSERT INTO {} ({}) VALUES (",
            table.qualified_name(self.dialect),
            names.join(", ")
        );
        self.render_list(&exprs, &mut out)?;
        out.sql.push(')');
        Ok(self.finish(out, Vec::new()))
    }

    fn finish(&self, out: Output, result_types: Vec<SqlType>) -> CompiledSql {
        tracing::trace!(backend = %self.dialect.backend(), sql = %out.sql, "compiled");
        CompiledSql {
            sql: out.sql,
            params: out.params,
            result_types,
        }
    }

    fn read_expression(&self, ty: &SpatialType, expr: Expr) -> Expr {
        match expr {
            Expr::Label { expr, name } => self.dialect.column_expression(ty, *expr).label(&name),
            Expr::Column(column) => {
                let name = column.name.clone();
                self.dialect
                    .column_expression(ty, Expr::Column(column))
                    .label(&name)
            }
            other => self.dialect.column_expression(ty, other),
        }
    }

    fn render(&self, expr: &Expr, out: &mut Output) -> Result<()> {
        match expr {
            Expr::Column(column) => out.sql.push_str(&self.column(column)),
            Expr::Bind(value) => self.bind(value.clone(), out),
            Expr::Literal(value) => out.sql.push_str(&self.inline_value(value)),
            Expr::SpatialBind {
                spatial_type,
                param,
            } => {
                let wrapped = self.dialect.bind_expression(spatial_type, param)?;
                self.render(&wrapped, out)?;
            }
            Expr::Element(element) => {
                let ty = match expr.sql_type() {
                    SqlType::Spatial(ty) => ty,
                    _ => SpatialType::default_geometry(),
                };
                let wrapped = self
                    .dialect
                    .bind_expression(&ty, &SpatialParam::Element(element.clone()))?;
                self.render(&wrapped, out)?;
            }
            Expr::Function(call) => self.render_function(call, out)?,
            Expr::Spatial { op, left, right } => match self.dialect.operator(*op) {
                OperatorForm::Infix(token) => {
                    self.render(left, out)?;
                    out.sql.push_str(&format!(" {token} "));
                    self.render(right, out)?;
                }
                OperatorForm::Function(name) => {
                    out.sql.push_str(name);
                    out.sql.push('(');
                    self.render(left, out)?;
                    out.sql.push_str(", ");
                    self.render(right, out)?;
                    out.sql.push(')');
                }
            },
            Expr::Binary { op, left, right } => {
                self.render_operand(*op, left, out)?;
                out.sql.push_str(&format!(" {} ", op.token()));
                self.render_operand(*op, right, out)?;
            }
            Expr::IsNull { expr, negated } => {
                self.render(expr, out)?;
                out.sql
                    .push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::Field { base, name, .. } => {
                out.sql.push('(');
                self.render(base, out)?;
                out.sql.push_str(").");
                out.sql.push_str(name);
            }
            Expr::Label { expr, name } => {
                self.render(expr, out)?;
                out.sql.push_str(" AS ");
                out.sql.push_str(&self.dialect.quote_identifier(name));
            }
        }
        Ok(())
    }

    /// Nested `AND`/`OR` of a different kind gets parentheses.
    fn render_operand(&self, parent: BinaryOp, expr: &Expr, out: &mut Output) -> Result<()> {
        let nested = matches!(
            expr,
            Expr::Binary { op: op @ (BinaryOp::And | BinaryOp::Or), .. } if *op != parent
        );
        if nested {
            out.sql.push('(');
            self.render(expr, out)?;
            out.sql.push(')');
            Ok(())
        } else {
            self.render(expr, out)
        }
    }

    fn render_function(&self, call: &FunctionCall, out: &mut Output) -> Result<()> {
        let name = self.registry.resolve(self.dialect.backend(), call);
        let spatial_args = lookup(&call.name).map_or(&[][..], |spec| spec.spatial_args);
        let args = call
            .args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                if spatial_args.contains(&i) {
                    spatial_argument(arg.clone())
                } else {
                    arg.clone()
                }
            })
            .collect();
        let args = self.dialect.adapt_arguments(&name, args, &call.return_type);

        out.sql.push_str(&name);
        out.sql.push('(');
        self.render_list(&args, out)?;
        for (i, (key, value)) in call.kwargs.iter().enumerate() {
            if i > 0 || !args.is_empty() {
                out.sql.push_str(", ");
            }
            if self.dialect.supports_named_arguments() {
                out.sql.push_str(key);
                out.sql.push_str(" => ");
            }
            self.render(value, out)?;
        }
        out.sql.push(')');
        Ok(())
    }

    fn render_list(&self, exprs: &[Expr], out: &mut Output) -> Result<()> {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                out.sql.push_str(", ");
            }
            self.render(expr, out)?;
        }
        Ok(())
    }

    fn column(&self, column: &ColumnRef) -> String {
        let name = self.dialect.quote_identifier(&column.name);
        match &column.table {
            Some(table) => format!("{}.{name}", self.dialect.quote_identifier(table)),
            None => name,
        }
    }

    fn bind(&self, value: Value, out: &mut Output) {
        if self.literal_binds {
            out.sql.push_str(&self.inline_value(&value));
        } else {
            out.params.push(value);
            out.sql.push_str(&self.dialect.placeholder(out.params.len()));
        }
    }

    fn inline_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Real(r) => format!("{r:?}"),
            Value::Text(text) => quote_literal(text),
            Value::Blob(bytes) => self.dialect.render_blob_literal(bytes),
        }
    }
}

/// Plain text or bytes at a geometry position become a geometry bind.
fn spatial_argument(arg: Expr) -> Expr {
    match arg {
        Expr::Bind(Value::Text(_)) | Expr::Bind(Value::Blob(_)) => {
            coerce_operand(&SqlType::Spatial(SpatialType::default_geometry()), arg)
        }
        other => other,
    }
}
