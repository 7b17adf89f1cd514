//! The pull-based ("Volcano style") executor pipeline. Every stage
//! implements [`Executor`]: `next()` pulls one row from its input(s),
//! `output_schema()` exposes the schema of whatever `next()` yields.

use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{Expr, OrderByItem};
use crate::expr::{self, SchemaAccessor};
use crate::table::Table;
use crate::value::{Row, Schema, Value};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Expr(#[from] crate::expr::Error),
    #[error(transparent)]
    Table(#[from] crate::table::Error),
    #[error("filter/sort/join expression did not evaluate to a boolean")]
    NotBoolean,
}

pub trait Executor {
    fn output_schema(&self) -> &Schema;
    fn next(&mut self) -> Result<Option<Row>, Error>;
}

pub type BoxExecutor = Box<dyn Executor>;

/// Yields a fixed, in-memory vector of rows — the source of an INSERT's
/// VALUES list, and of a `SELECT` with no `FROM` clause (a single empty row).
pub struct ReadFromRows {
    rows: std::vec::IntoIter<Row>,
    schema: Schema,
}

impl ReadFromRows {
    pub fn new(rows: Vec<Row>, schema: Schema) -> Self {
        ReadFromRows { rows: rows.into_iter(), schema }
    }
}

impl Executor for ReadFromRows {
    fn output_schema(&self) -> &Schema {
        &self.schema
    }

    fn next(&mut self) -> Result<Option<Row>, Error> {
        Ok(self.rows.next())
    }
}

/// Full scan over a table, skipping tombstoned rows (the table's own scan
/// already does this — see [`crate::table::Table::scan`]).
pub struct ReadFromTable {
    table: Rc<Table>,
    scan: crate::table::TableScan,
}

impl ReadFromTable {
    pub fn new(table: Rc<Table>) -> Self {
        let scan = table.scan();
        ReadFromTable { table, scan }
    }
}

impl Executor for ReadFromTable {
    fn output_schema(&self) -> &Schema {
        self.table.schema()
    }

    fn next(&mut self) -> Result<Option<Row>, Error> {
        Ok(self.scan.next().map(|(_, row)| row))
    }
}

/// Applies a fixed list of expressions to each input row.
pub struct Project {
    input: BoxExecutor,
    exprs: Vec<Expr>,
    output_schema: Schema,
}

impl Project {
    pub fn new(input: BoxExecutor, exprs: Vec<Expr>, output_schema: Schema) -> Self {
        Project { input, exprs, output_schema }
    }
}

impl Executor for Project {
    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    fn next(&mut self) -> Result<Option<Row>, Error> {
        match self.input.next()? {
            None => Ok(None),
            Some(row) => {
                let accessor = SchemaAccessor::new(self.input.output_schema());
                Ok(Some(expr::evaluate_all(&self.exprs, &row, &accessor)?))
            }
        }
    }
}

/// Consumes input rows until the predicate evaluates `true`.
pub struct Filter {
    input: BoxExecutor,
    predicate: Expr,
}

impl Filter {
    pub fn new(input: BoxExecutor, predicate: Expr) -> Self {
        Filter { input, predicate }
    }
}

impl Executor for Filter {
    fn output_schema(&self) -> &Schema {
        self.input.output_schema()
    }

    fn next(&mut self) -> Result<Option<Row>, Error> {
        loop {
            let Some(row) = self.input.next()? else { return Ok(None) };
            let accessor = SchemaAccessor::new(self.input.output_schema());
            let keep = match expr::evaluate(&self.predicate, &row, &accessor)? {
                Value::Boolean(b) => b,
                _ => return Err(Error::NotBoolean),
            };
            if keep {
                return Ok(Some(row));
            }
        }
    }
}

/// Consumes the input eagerly on the first pull, stable-sorts by a list of
/// `(expression, descending)` keys, then streams. Uses `slice::sort_by`,
/// which is stable, so rows with equal keys keep their relative order.
pub struct Sort {
    input: BoxExecutor,
    keys: Vec<OrderByItem>,
    output_schema: Schema,
    sorted: Option<std::vec::IntoIter<Row>>,
}

impl Sort {
    pub fn new(input: BoxExecutor, keys: Vec<OrderByItem>) -> Self {
        let output_schema = input.output_schema().clone();
        Sort { input, keys, output_schema, sorted: None }
    }

    fn materialize(&mut self) -> Result<(), Error> {
        let mut rows = Vec::new();
        while let Some(row) = self.input.next()? {
            rows.push(row);
        }
        let accessor = SchemaAccessor::new(&self.output_schema);
        let mut sort_error = None;
        rows.sort_by(|a, b| {
            for key in &self.keys {
                let (va, vb) = match (expr::evaluate(&key.expr, a, &accessor), expr::evaluate(&key.expr, b, &accessor)) {
                    (Ok(va), Ok(vb)) => (va, vb),
                    (Err(e), _) | (_, Err(e)) => {
                        sort_error.get_or_insert(e);
                        (Value::Null, Value::Null)
                    }
                };
                let ord = crate::value::sort_key_cmp(&va, &vb);
                let ord = if key.desc { ord.reverse() } else { ord };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        if let Some(e) = sort_error {
            return Err(e.into());
        }
        self.sorted = Some(rows.into_iter());
        Ok(())
    }
}

impl Executor for Sort {
    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    fn next(&mut self) -> Result<Option<Row>, Error> {
        if self.sorted.is_none() {
            self.materialize()?;
        }
        Ok(self.sorted.as_mut().unwrap().next())
    }
}

/// A hashable, structurally-equal projection of a row's join-key columns.
/// `Value` itself carries no `Eq`/`Hash` (its `PartialEq` is structural, but
/// it has no total-order-free key form for `String`-backed variants without
/// this), so the key columns are converted to this comparable shadow.
#[derive(Clone, PartialEq, Eq, Hash)]
enum JoinKeyValue {
    Null,
    Bool(bool),
    UInt(u64),
    Int(i64),
    Str(String),
}

fn join_key_value(v: &Value) -> JoinKeyValue {
    match v {
        Value::Null => JoinKeyValue::Null,
        Value::Boolean(b) => JoinKeyValue::Bool(*b),
        Value::UInt64(u) => JoinKeyValue::UInt(*u),
        Value::Int64(i) => JoinKeyValue::Int(*i),
        Value::FixedString(s, _) | Value::VarString(s) => JoinKeyValue::Str(s.clone()),
    }
}

/// Equi-join by column-name overlap: builds a hash map from the left input
/// keyed by the tuple of columns also present in the right schema; for each
/// right row, emits the cartesian product of its matching left bucket with
/// itself. Output schema is the left schema followed by the right's
/// non-shared columns. Walks the full matching bucket for each right row,
/// rather than stopping one short of it.
pub struct NestedLoopJoin {
    right: BoxExecutor,
    shared_left_idx: Vec<usize>,
    shared_right_idx: Vec<usize>,
    right_only_idx: Vec<usize>,
    buckets: HashMap<Vec<JoinKeyValue>, Vec<Row>>,
    output_schema: Schema,
    current_bucket: Vec<Row>,
    current_right_row: Option<Row>,
    bucket_pos: usize,
}

impl NestedLoopJoin {
    pub fn new(mut left: BoxExecutor, right: BoxExecutor) -> Result<Self, Error> {
        let left_schema = left.output_schema().clone();
        let right_schema = right.output_schema().clone();

        let shared_names: Vec<String> = left_schema
            .columns()
            .iter()
            .filter(|c| right_schema.column_index(&c.name).is_some())
            .map(|c| c.name.clone())
            .collect();
        let shared_left_idx: Vec<usize> = shared_names.iter().map(|n| left_schema.column_index(n).unwrap()).collect();
        let shared_right_idx: Vec<usize> = shared_names.iter().map(|n| right_schema.column_index(n).unwrap()).collect();
        let right_only_idx: Vec<usize> = (0..right_schema.len()).filter(|i| !shared_right_idx.contains(i)).collect();

        let mut output_columns = left_schema.columns().to_vec();
        output_columns.extend(right_only_idx.iter().map(|&i| right_schema[i].clone()));
        let output_schema = Schema::new(output_columns).expect("join output narrower than either input schema");

        let mut buckets: HashMap<Vec<JoinKeyValue>, Vec<Row>> = HashMap::new();
        while let Some(row) = left.next()? {
            let key: Vec<JoinKeyValue> = shared_left_idx.iter().map(|&i| join_key_value(&row.values[i])).collect();
            buckets.entry(key).or_default().push(row);
        }

        Ok(NestedLoopJoin {
            right,
            shared_left_idx,
            shared_right_idx,
            right_only_idx,
            buckets,
            output_schema,
            current_bucket: Vec::new(),
            current_right_row: None,
            bucket_pos: 0,
        })
    }

    fn combine(&self, left_row: &Row, right_row: &Row) -> Row {
        let mut values = left_row.values.clone();
        values.extend(self.right_only_idx.iter().map(|&i| right_row.values[i].clone()));
        Row::new(values)
    }
}

impl Executor for NestedLoopJoin {
    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }

    fn next(&mut self) -> Result<Option<Row>, Error> {
        loop {
            if self.bucket_pos < self.current_bucket.len() {
                let left_row = self.current_bucket[self.bucket_pos].clone();
                self.bucket_pos += 1;
                let right_row = self.current_right_row.clone().expect("bucket only populated alongside a right row");
                return Ok(Some(self.combine(&left_row, &right_row)));
            }
            let Some(right_row) = self.right.next()? else { return Ok(None) };
            let key: Vec<JoinKeyValue> =
                self.shared_right_idx.iter().map(|&i| join_key_value(&right_row.values[i])).collect();
            self.current_bucket = self.buckets.get(&key).cloned().unwrap_or_default();
            self.bucket_pos = 0;
            self.current_right_row = Some(right_row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BinaryOp;
    use crate::value::{ColumnSchema, ColumnType};

    fn int_schema(names: &[&str]) -> Schema {
        Schema::new(names.iter().map(|n| ColumnSchema::new(*n, ColumnType::Int64)).collect()).unwrap()
    }

    fn row(values: &[i64]) -> Row {
        Row::new(values.iter().map(|v| Value::Int64(*v)).collect())
    }

    #[test]
    fn filter_keeps_only_matching_rows() {
        let schema = int_schema(&["a"]);
        let rows = vec![row(&[1]), row(&[2]), row(&[3])];
        let source = Box::new(ReadFromRows::new(rows, schema));
        let predicate = Expr::Binary(
            Box::new(Expr::Identifier("a".to_string())),
            BinaryOp::Gt,
            Box::new(Expr::IntLiteral(1)),
        );
        let mut filter = Filter::new(source, predicate);
        let mut out = vec![];
        while let Some(r) = filter.next().unwrap() {
            out.push(r.values[0].as_i64().unwrap());
        }
        assert_eq!(out, vec![2, 3]);
    }

    #[test]
    fn project_evaluates_expressions_per_row() {
        let schema = int_schema(&["a"]);
        let rows = vec![row(&[1]), row(&[2])];
        let source = Box::new(ReadFromRows::new(rows, schema));
        let exprs = vec![Expr::Binary(
            Box::new(Expr::Identifier("a".to_string())),
            BinaryOp::Mul,
            Box::new(Expr::IntLiteral(10)),
        )];
        let mut project = Project::new(source, exprs, int_schema(&["a"]));
        let mut out = vec![];
        while let Some(r) = project.next().unwrap() {
            out.push(r.values[0].as_i64().unwrap());
        }
        assert_eq!(out, vec![10, 20]);
    }

    #[test]
    fn sort_is_stable_and_honors_descending() {
        let schema = Schema::new(vec![
            ColumnSchema::new("k", ColumnType::Int64),
            ColumnSchema::new("tag", ColumnType::Int64),
        ])
        .unwrap();
        let rows = vec![
            Row::new(vec![Value::Int64(1), Value::Int64(0)]),
            Row::new(vec![Value::Int64(2), Value::Int64(1)]),
            Row::new(vec![Value::Int64(1), Value::Int64(2)]),
        ];
        let source = Box::new(ReadFromRows::new(rows, schema));
        let keys = vec![OrderByItem { expr: Expr::Identifier("k".to_string()), desc: true }];
        let mut sort = Sort::new(source, keys);
        let mut out = vec![];
        while let Some(r) = sort.next().unwrap() {
            out.push((r.values[0].as_i64().unwrap(), r.values[1].as_i64().unwrap()));
        }
        assert_eq!(out, vec![(2, 1), (1, 0), (1, 2)]);
    }

    #[test]
    fn nested_loop_join_emits_matching_cartesian_product() {
        let left_schema = Schema::new(vec![
            ColumnSchema::new("id", ColumnType::Int64),
            ColumnSchema::new("tag", ColumnType::Int64),
        ])
        .unwrap();
        let right_schema = Schema::new(vec![
            ColumnSchema::new("id", ColumnType::Int64),
            ColumnSchema::new("val", ColumnType::Int64),
        ])
        .unwrap();
        let left = Box::new(ReadFromRows::new(
            vec![
                Row::new(vec![Value::Int64(1), Value::Int64(10)]),
                Row::new(vec![Value::Int64(1), Value::Int64(11)]),
                Row::new(vec![Value::Int64(2), Value::Int64(20)]),
            ],
            left_schema,
        ));
        let right = Box::new(ReadFromRows::new(
            vec![
                Row::new(vec![Value::Int64(1), Value::Int64(100)]),
                Row::new(vec![Value::Int64(3), Value::Int64(300)]),
            ],
            right_schema,
        ));
        let mut join = NestedLoopJoin::new(left, right).unwrap();
        let mut out = vec![];
        while let Some(r) = join.next().unwrap() {
            out.push((r.values[0].as_i64().unwrap(), r.values[1].as_i64().unwrap(), r.values[2].as_i64().unwrap()));
        }
        // id=1 appears twice on the left, so both rows join against the one
        // matching right row; id=2 (left-only) and id=3 (right-only) drop.
        assert_eq!(out, vec![(1, 10, 100), (1, 11, 100)]);
    }
}
