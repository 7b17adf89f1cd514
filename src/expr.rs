//! Expression evaluator: walks an [`ast::Expr`] against a row under a
//! [`SchemaAccessor`], producing a [`Value`]. Identifiers are resolved to a
//! column index once per `Filter`/`Project`/`Sort` executor build via
//! [`SchemaAccessor::column_index`], rather than re-resolved on every row.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::value::{sql_eq, sql_partial_cmp, Row, Schema, Value};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no column named {0}")]
    UnknownColumn(String),
    #[error("type mismatch evaluating `{op}`: {lhs:?}, {rhs:?}")]
    TypeMismatch { op: String, lhs: Value, rhs: Value },
    #[error("type mismatch evaluating unary `{op}`: {operand:?}")]
    UnaryTypeMismatch { op: String, operand: Value },
}

/// By-name column lookup against one schema, built once per executor rather
/// than searched afresh for every row.
pub struct SchemaAccessor<'a> {
    schema: &'a Schema,
}

impl<'a> SchemaAccessor<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        SchemaAccessor { schema }
    }

    pub fn column_index(&self, name: &str) -> Result<usize, Error> {
        self.schema
            .column_index(name)
            .ok_or_else(|| Error::UnknownColumn(name.to_string()))
    }

    pub fn schema(&self) -> &Schema {
        self.schema
    }
}

fn as_int(op: &str, v: &Value) -> Result<i64, Error> {
    v.as_i64().ok_or_else(|| Error::UnaryTypeMismatch { op: op.to_string(), operand: v.clone() })
}

fn as_bool(op: &str, v: &Value) -> Result<bool, Error> {
    v.as_bool().ok_or_else(|| Error::UnaryTypeMismatch { op: op.to_string(), operand: v.clone() })
}

/// Evaluates `expr` against `row`, resolving identifiers via `accessor`.
pub fn evaluate(expr: &Expr, row: &Row, accessor: &SchemaAccessor<'_>) -> Result<Value, Error> {
    match expr {
        Expr::Identifier(name) => {
            let idx = accessor.column_index(name)?;
            Ok(row.values[idx].clone())
        }
        Expr::IntLiteral(x) => Ok(Value::Int64(*x)),
        Expr::StringLiteral(s) => Ok(Value::VarString(s.clone())),
        Expr::BoolLiteral(b) => Ok(Value::Boolean(*b)),
        Expr::NullLiteral => Ok(Value::Null),
        Expr::Unary(op, inner) => {
            let v = evaluate(inner, row, accessor)?;
            match op {
                UnaryOp::Neg => Ok(Value::Int64(-as_int("-", &v)?)),
                UnaryOp::Not => Ok(Value::Boolean(!as_bool("NOT", &v)?)),
            }
        }
        Expr::Binary(lhs, op, rhs) => {
            let l = evaluate(lhs, row, accessor)?;
            let r = evaluate(rhs, row, accessor)?;
            evaluate_binary(*op, l, r)
        }
    }
}

fn evaluate_binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, Error> {
    use BinaryOp::*;
    let type_mismatch = |op: BinaryOp, l: &Value, r: &Value| Error::TypeMismatch {
        op: op.to_string(),
        lhs: l.clone(),
        rhs: r.clone(),
    };
    match op {
        Add | Sub | Mul | Div => {
            let (a, b) = (
                l.as_i64().ok_or_else(|| type_mismatch(op, &l, &r))?,
                r.as_i64().ok_or_else(|| type_mismatch(op, &l, &r))?,
            );
            let result = match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div => a / b,
                _ => unreachable!(),
            };
            Ok(Value::Int64(result))
        }
        And | Or => {
            let (a, b) = (
                l.as_bool().ok_or_else(|| type_mismatch(op, &l, &r))?,
                r.as_bool().ok_or_else(|| type_mismatch(op, &l, &r))?,
            );
            Ok(Value::Boolean(match op {
                And => a && b,
                Or => a || b,
                _ => unreachable!(),
            }))
        }
        Eq => Ok(Value::Boolean(sql_eq(&l, &r))),
        Ne => Ok(Value::Boolean(!sql_eq(&l, &r))),
        Lt | Le | Gt | Ge => {
            let ord = sql_partial_cmp(&l, &r);
            let matched = match (op, ord) {
                (Lt, Some(std::cmp::Ordering::Less)) => true,
                (Le, Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)) => true,
                (Gt, Some(std::cmp::Ordering::Greater)) => true,
                (Ge, Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)) => true,
                (_, None) => false,
                _ => false,
            };
            Ok(Value::Boolean(matched))
        }
    }
}

/// Evaluates every expression in `exprs` against `row`, producing a
/// projected row (used by `Project` and by `INSERT`'s VALUES list).
pub fn evaluate_all(exprs: &[Expr], row: &Row, accessor: &SchemaAccessor<'_>) -> Result<Row, Error> {
    let values = exprs
        .iter()
        .map(|e| evaluate(e, row, accessor))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Row::new(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ColumnSchema, ColumnType};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnSchema::new("a", ColumnType::Int64),
            ColumnSchema::new("name", ColumnType::String),
        ])
        .unwrap()
    }

    #[test]
    fn identifier_resolves_by_name() {
        let schema = schema();
        let accessor = SchemaAccessor::new(&schema);
        let row = Row::new(vec![Value::Int64(7), Value::VarString("x".to_string())]);
        let v = evaluate(&Expr::Identifier("a".to_string()), &row, &accessor).unwrap();
        assert_eq!(v, Value::Int64(7));
    }

    #[test]
    fn arithmetic_and_comparison() {
        let schema = schema();
        let accessor = SchemaAccessor::new(&schema);
        let row = Row::new(vec![Value::Int64(7), Value::VarString("x".to_string())]);
        let expr = Expr::Binary(
            Box::new(Expr::Binary(
                Box::new(Expr::Identifier("a".to_string())),
                BinaryOp::Add,
                Box::new(Expr::IntLiteral(3)),
            )),
            BinaryOp::Gt,
            Box::new(Expr::IntLiteral(9)),
        );
        assert_eq!(evaluate(&expr, &row, &accessor).unwrap(), Value::Boolean(true));
    }

    #[test]
    fn null_equality_is_false() {
        let schema = schema();
        let accessor = SchemaAccessor::new(&schema);
        let row = Row::new(vec![Value::Null, Value::VarString("x".to_string())]);
        let expr = Expr::Binary(
            Box::new(Expr::Identifier("a".to_string())),
            BinaryOp::Eq,
            Box::new(Expr::NullLiteral),
        );
        assert_eq!(evaluate(&expr, &row, &accessor).unwrap(), Value::Boolean(false));
    }

    #[test]
    fn unknown_identifier_is_an_error() {
        let schema = schema();
        let accessor = SchemaAccessor::new(&schema);
        let row = Row::new(vec![Value::Int64(1), Value::VarString("x".to_string())]);
        assert!(matches!(
            evaluate(&Expr::Identifier("nope".to_string()), &row, &accessor),
            Err(Error::UnknownColumn(_))
        ));
    }
}
