//! Maps a parsed [`ast::Statement`] to an executor tree or a `Store`/Catalog
//! side effect. `SELECT` builds the FROM-chain (joined left to right), then
//! an optional filter, then an optional sort, then the projection, in that
//! order; `INSERT` evaluates the VALUES list against an empty row before
//! type-checking and inserting.

use anyhow::{anyhow, bail, Context, Result};
use itertools::Itertools;

use crate::ast::{self, Expr, SelectItem, Statement};
use crate::executor::{BoxExecutor, Executor, Filter, NestedLoopJoin, Project, ReadFromRows, ReadFromTable, Sort};
use crate::expr::{self, SchemaAccessor};
use crate::pt_to_ast;
use crate::store::Store;
use crate::value::{ColumnSchema, ColumnType, Row, Schema, Value};

/// What running one statement produced: either a result set (`SELECT`) or a
/// bare acknowledgement (`CREATE`/`DROP`/`INSERT`).
pub enum ExecutionResult {
    Rows { schema: Schema, rows: Vec<Row> },
    Ack,
}

pub struct Interpreter {
    store: Store,
}

impl Interpreter {
    pub fn new(store: Store) -> Self {
        Interpreter { store }
    }

    /// Parses and runs one SQL statement end to end.
    pub fn execute(&self, sql: &str) -> Result<ExecutionResult> {
        let statement = pt_to_ast::parse_statement_to_ast(sql).context("parse error")?;
        log::debug!("executing statement: {statement:?}");
        self.execute_statement(&statement)
    }

    fn execute_statement(&self, statement: &Statement) -> Result<ExecutionResult> {
        match statement {
            Statement::Create(stmt) => self.execute_create(stmt),
            Statement::Drop(stmt) => self.execute_drop(stmt),
            Statement::Insert(stmt) => self.execute_insert(stmt),
            Statement::Select(stmt) => self.execute_select(stmt),
        }
    }

    fn execute_create(&self, stmt: &ast::CreateStatement) -> Result<ExecutionResult> {
        let mut columns = Vec::with_capacity(stmt.columns.len());
        for col in &stmt.columns {
            let column_type = ColumnType::parse(&col.type_name)
                .ok_or_else(|| anyhow!("unknown column type {:?} for column {:?}", col.type_name, col.name))?;
            columns.push(ColumnSchema::new(col.name.clone(), column_type));
        }
        let schema = Schema::new(columns)?;
        self.store.create_table(&stmt.table, schema)?;
        Ok(ExecutionResult::Ack)
    }

    fn execute_drop(&self, stmt: &ast::DropStatement) -> Result<ExecutionResult> {
        self.store.drop_table(&stmt.table)?;
        Ok(ExecutionResult::Ack)
    }

    fn execute_insert(&self, stmt: &ast::InsertStatement) -> Result<ExecutionResult> {
        let table = self.store.open_table(&stmt.table)?;
        let empty_schema = Schema::new(vec![])?;
        let empty_row = Row::new(vec![]);
        let accessor = SchemaAccessor::new(&empty_schema);
        for values in &stmt.rows {
            if values.len() != table.schema().len() {
                bail!(
                    "table {:?} has {} columns but {} values were given",
                    stmt.table,
                    table.schema().len(),
                    values.len()
                );
            }
            let evaluated = expr::evaluate_all(values, &empty_row, &accessor)?;
            // Arity was checked above, so every value has a matching column;
            // `zip_eq` documents that invariant instead of silently
            // truncating to the shorter side like `zip` would.
            let coerced: Vec<Value> = evaluated
                .values
                .into_iter()
                .zip_eq(table.schema().columns())
                .map(|(v, col)| coerce_to_column_type(v, &col.column_type).map_err(|v| (v, col.name.clone())))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|(v, name)| anyhow!("column {name:?} cannot hold value {v:?}"))?;
            table.insert_row(&Row::new(coerced))?;
        }
        Ok(ExecutionResult::Ack)
    }

    fn execute_select(&self, stmt: &ast::SelectStatement) -> Result<ExecutionResult> {
        let mut current: BoxExecutor = if stmt.from.is_empty() {
            Box::new(ReadFromRows::new(vec![Row::new(vec![])], Schema::new(vec![])?))
        } else {
            let mut tables = stmt.from.iter();
            let first = tables.next().expect("checked non-empty above");
            let mut acc: BoxExecutor = Box::new(ReadFromTable::new(self.store.open_table(first)?));
            for name in tables {
                let right: BoxExecutor = Box::new(ReadFromTable::new(self.store.open_table(name)?));
                acc = Box::new(NestedLoopJoin::new(acc, right)?);
            }
            acc
        };

        if let Some(predicate) = &stmt.r#where {
            current = Box::new(Filter::new(current, predicate.clone()));
        }

        if !stmt.order_by.is_empty() {
            current = Box::new(Sort::new(current, stmt.order_by.clone()));
        }

        let (exprs, output_schema) = build_projection(&stmt.projection, current.output_schema())?;
        let mut project = Project::new(current, exprs, output_schema.clone());

        let mut rows = Vec::new();
        while let Some(row) = project.next()? {
            rows.push(row);
        }
        Ok(ExecutionResult::Rows { schema: output_schema, rows })
    }

    /// Flushes every open table. Called from the owning `Database`'s `Drop`.
    pub fn flush_all(&self) -> Result<()> {
        self.store.flush_all()?;
        Ok(())
    }
}

fn coerce_to_column_type(value: Value, column_type: &ColumnType) -> Result<Value, Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    match (column_type, value) {
        (ColumnType::Boolean, Value::Boolean(b)) => Ok(Value::Boolean(b)),
        (ColumnType::Int64, Value::Int64(i)) => Ok(Value::Int64(i)),
        (ColumnType::Int64, Value::UInt64(u)) => i64::try_from(u).map(Value::Int64).map_err(|_| Value::UInt64(u)),
        (ColumnType::UInt64, Value::UInt64(u)) => Ok(Value::UInt64(u)),
        (ColumnType::UInt64, Value::Int64(i)) => u64::try_from(i).map(Value::UInt64).map_err(|_| Value::Int64(i)),
        (ColumnType::Varchar(n), Value::VarString(s)) => Ok(Value::FixedString(s, *n)),
        (ColumnType::Varchar(n), Value::FixedString(s, _)) => Ok(Value::FixedString(s, *n)),
        (ColumnType::String, Value::VarString(s)) => Ok(Value::VarString(s)),
        (ColumnType::String, Value::FixedString(s, _)) => Ok(Value::VarString(s)),
        (_, other) => Err(other),
    }
}

/// A conservative static type for an expression, used only to label the
/// final projected schema (nothing downstream evaluates against it — the
/// projection is always the pipeline's last stage).
fn infer_expr_type(expr: &Expr, input_schema: &Schema) -> ColumnType {
    match expr {
        Expr::Identifier(name) => input_schema
            .column_index(name)
            .and_then(|i| input_schema.column(i))
            .map(|c| c.column_type)
            .unwrap_or(ColumnType::String),
        Expr::IntLiteral(_) => ColumnType::Int64,
        Expr::StringLiteral(_) => ColumnType::String,
        Expr::BoolLiteral(_) => ColumnType::Boolean,
        Expr::NullLiteral => ColumnType::Boolean,
        Expr::Unary(ast::UnaryOp::Neg, _) => ColumnType::Int64,
        Expr::Unary(ast::UnaryOp::Not, _) => ColumnType::Boolean,
        Expr::Binary(lhs, op, _) => match op {
            ast::BinaryOp::Add | ast::BinaryOp::Sub | ast::BinaryOp::Mul | ast::BinaryOp::Div => {
                infer_expr_type(lhs, input_schema)
            }
            _ => ColumnType::Boolean,
        },
    }
}

fn build_projection(items: &[SelectItem], input_schema: &Schema) -> Result<(Vec<Expr>, Schema)> {
    let mut exprs = Vec::new();
    let mut columns = Vec::new();
    for item in items {
        match item {
            SelectItem::Star => {
                for col in input_schema.columns() {
                    exprs.push(Expr::Identifier(col.name.clone()));
                    columns.push(col.clone());
                }
            }
            SelectItem::Expr(e) => {
                let name = match e {
                    Expr::Identifier(n) => n.clone(),
                    other => other.to_string(),
                };
                let column_type = infer_expr_type(e, input_schema);
                exprs.push(e.clone());
                columns.push(ColumnSchema::new(name, column_type));
            }
        }
    }
    Ok((exprs, Schema::new(columns)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("ferrodb_interpreter_test_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&p);
        p
    }

    fn run(interp: &Interpreter, sql: &str) -> ExecutionResult {
        interp.execute(sql).unwrap_or_else(|e| panic!("{sql:?} failed: {e:#}"))
    }

    #[test]
    fn ddl_round_trip() {
        let dir = tmp_dir("ddl");
        let interp = Interpreter::new(Store::open(&dir, 8).unwrap());
        run(&interp, "CREATE TABLE t (id uint64, name string, nick varchar(44), flag boolean)");
        assert!(interp.store.table_exists("t"));
        run(&interp, "DROP TABLE t");
        assert!(!interp.store.table_exists("t"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn arithmetic_and_predicate_with_no_from() {
        let dir = tmp_dir("arith");
        let interp = Interpreter::new(Store::open(&dir, 8).unwrap());
        let result = run(&interp, "SELECT 11");
        match result {
            ExecutionResult::Rows { rows, .. } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].values[0], Value::Int64(11));
            }
            _ => panic!("expected rows"),
        }

        let result = run(&interp, "SELECT (50-30)*2 <= 1*2*3*4");
        match result {
            ExecutionResult::Rows { rows, .. } => assert_eq!(rows[0].values[0], Value::Boolean(false)),
            _ => panic!("expected rows"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn insert_then_scan_preserves_order() {
        let dir = tmp_dir("insert_scan");
        let interp = Interpreter::new(Store::open(&dir, 8).unwrap());
        run(&interp, "CREATE TABLE test_table (id int64, age int64, name string, girl boolean)");
        run(
            &interp,
            "INSERT test_table VALUES (0,20,'Ann',TRUE), (1,21,'Bob',FALSE), (2,19,'Sara',TRUE), (-2,19,'Sara',TRUE)",
        );
        let result = run(&interp, "SELECT * FROM test_table");
        match result {
            ExecutionResult::Rows { rows, .. } => {
                assert_eq!(rows.len(), 4);
                assert_eq!(rows[0].values[2], Value::VarString("Ann".to_string()));
                assert_eq!(rows[3].values[0], Value::Int64(-2));
            }
            _ => panic!("expected rows"),
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn order_by_is_stable_and_supports_desc() {
        let dir = tmp_dir("order_by");
        let interp = Interpreter::new(Store::open(&dir, 8).unwrap());
        run(&interp, "CREATE TABLE test_table (id int64, age int64, name string, girl boolean)");
        run(
            &interp,
            "INSERT test_table VALUES (0,20,'Ann',TRUE), (1,21,'Bob',FALSE), (2,19,'Sara',TRUE)",
        );
        let result = run(&interp, "SELECT name FROM test_table ORDER BY age DESC");
        let names: Vec<String> = match result {
            ExecutionResult::Rows { rows, .. } => {
                rows.into_iter().map(|r| r.values[0].as_str().unwrap().to_string()).collect()
            }
            _ => panic!("expected rows"),
        };
        assert_eq!(names, vec!["Bob", "Ann", "Sara"]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
