//! The core data model: values, rows, schemas, row ids and page indices.
//!
//! Ordering follows SQL three-valued logic collapsed to booleans: a comparison
//! involving `Value::Null` is never `true`, including `NULL = NULL`. The sort
//! executor needs a strict total order to drive a stable sort, so it uses
//! [`sort_key_cmp`] instead of `PartialOrd`, treating `Null` as least and equal
//! to itself only for ordering purposes.

use std::cmp::Ordering;

/// Fixed page size used throughout the storage layer.
pub const PAGE_SIZE: usize = 4096;

/// A schema may declare at most this many columns: the null bitmap is a
/// single 64-bit word and one bit is reserved.
pub const MAX_COLUMNS: usize = 63;

/// 32-bit page index. `INVALID_PAGE_INDEX` is the all-ones sentinel.
pub type PageIndex = u32;
pub const INVALID_PAGE_INDEX: PageIndex = u32::MAX;

/// Stable identifier for a row: the page it lives on and its slot within
/// that page. Not reissued until the page is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId {
    pub page_index: PageIndex,
    pub row_index: u32,
}

/// The declared type of a column. `Varchar` carries its fixed, zero-padded
/// length; `String` is the variable-length, tail-allocated form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    UInt64,
    Int64,
    Varchar(u16),
    String,
}

impl ColumnType {
    /// Name as it appears in CREATE TABLE / the catalog's `type` column.
    pub fn type_name(&self) -> String {
        match self {
            ColumnType::Boolean => "boolean".to_string(),
            ColumnType::UInt64 => "uint64".to_string(),
            ColumnType::Int64 => "int64".to_string(),
            ColumnType::Varchar(n) => format!("varchar({n})"),
            ColumnType::String => "string".to_string(),
        }
    }

    /// Parses a catalog/grammar type name back into a `ColumnType`.
    pub fn parse(name: &str) -> Option<ColumnType> {
        let name = name.trim();
        if let Some(inner) = name
            .strip_prefix("varchar(")
            .and_then(|s| s.strip_suffix(')'))
        {
            return inner.trim().parse::<u16>().ok().map(ColumnType::Varchar);
        }
        match name {
            "boolean" => Some(ColumnType::Boolean),
            "uint64" => Some(ColumnType::UInt64),
            "int64" => Some(ColumnType::Int64),
            "string" => Some(ColumnType::String),
            _ => None,
        }
    }

    /// True if values of this type are stored inline at a fixed width
    /// (everything except `String`, which stores a `(length, offset)` pair
    /// inline but appends its bytes to the page's tail region).
    pub fn is_fixed_width(&self) -> bool {
        !matches!(self, ColumnType::String)
    }
}

/// One column of a [`Schema`]: name, declared type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSchema {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnSchema {
            name: name.into(),
            column_type,
        }
    }
}

/// An ordered sequence of [`ColumnSchema`], at most [`MAX_COLUMNS`] long.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema(Vec<ColumnSchema>);

#[derive(thiserror::Error, Debug, Clone)]
pub enum SchemaError {
    #[error("schema has {0} columns, exceeding the {MAX_COLUMNS}-column limit")]
    TooManyColumns(usize),
    #[error("no column named {0}")]
    NoSuchColumn(String),
}

impl Schema {
    pub fn new(columns: Vec<ColumnSchema>) -> Result<Self, SchemaError> {
        if columns.len() > MAX_COLUMNS {
            return Err(SchemaError::TooManyColumns(columns.len()));
        }
        Ok(Schema(columns))
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|c| c.name == name)
    }

    pub fn column(&self, idx: usize) -> Option<&ColumnSchema> {
        self.0.get(idx)
    }

    /// A new schema that is `self` followed by `other`'s columns.
    pub fn concat(&self, other: &Schema) -> Schema {
        let mut cols = self.0.clone();
        cols.extend(other.0.iter().cloned());
        Schema(cols)
    }
}

impl std::ops::Index<usize> for Schema {
    type Output = ColumnSchema;
    fn index(&self, idx: usize) -> &ColumnSchema {
        &self.0[idx]
    }
}

impl<'a> IntoIterator for &'a Schema {
    type Item = &'a ColumnSchema;
    type IntoIter = std::slice::Iter<'a, ColumnSchema>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A single cell value. `FixedString` carries its declared (padded) length
/// so the marshal knows how many bytes to zero-pad to; the string itself is
/// never padded in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    UInt64(u64),
    Int64(i64),
    FixedString(String, u16),
    VarString(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            Value::UInt64(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::FixedString(s, _) | Value::VarString(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::UInt64(u) => write!(f, "{u}"),
            Value::Int64(i) => write!(f, "{i}"),
            Value::FixedString(s, _) => write!(f, "{s}"),
            Value::VarString(s) => write!(f, "{s}"),
        }
    }
}

/// SQL three-valued equality/order collapsed to a boolean: any comparison
/// touching `Null` is `false`, including `Null == Null`.
impl PartialEq<()> for Value {
    fn eq(&self, _other: &()) -> bool {
        false
    }
}

/// Ordering used for `<, <=, >, >=` in the expression evaluator. Returns
/// `None` whenever either side is `Null`, or when the variants otherwise
/// aren't comparable (a `TypeError` case the caller surfaces).
pub fn sql_partial_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    use Value::*;
    match (a, b) {
        (Null, _) | (_, Null) => None,
        (Boolean(x), Boolean(y)) => x.partial_cmp(y),
        (UInt64(x), UInt64(y)) => x.partial_cmp(y),
        (Int64(x), Int64(y)) => x.partial_cmp(y),
        (UInt64(x), Int64(y)) => i64::try_from(*x).ok()?.partial_cmp(y),
        (Int64(x), UInt64(y)) => x.partial_cmp(&i64::try_from(*y).ok()?),
        (FixedString(x, _), FixedString(y, _)) => x.partial_cmp(y),
        (VarString(x), VarString(y)) => x.partial_cmp(y),
        (FixedString(x, _), VarString(y)) | (VarString(x), FixedString(y, _)) => x.partial_cmp(y),
        _ => None,
    }
}

/// SQL equality: `false` whenever either side is `Null`.
pub fn sql_eq(a: &Value, b: &Value) -> bool {
    if a.is_null() || b.is_null() {
        return false;
    }
    sql_partial_cmp(a, b) == Some(Ordering::Equal)
}

/// Total order used by the sort executor and the B+tree key comparator:
/// `Null` sorts least and equal only to itself, everything else falls back
/// to [`sql_partial_cmp`]. Keys stored in a B+tree are never `Null`,
/// so in that context this never takes the `Null` branch.
pub fn sort_key_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => sql_partial_cmp(a, b).unwrap_or(Ordering::Equal),
    }
}

/// An ordered sequence of values, one per schema column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Row { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::ops::Index<usize> for Row {
    type Output = Value;
    fn index(&self, idx: usize) -> &Value {
        &self.values[idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_comparisons_are_false() {
        assert!(!sql_eq(&Value::Null, &Value::Null));
        assert_eq!(sql_partial_cmp(&Value::Null, &Value::Int64(1)), None);
    }

    #[test]
    fn sort_key_orders_null_least() {
        assert_eq!(sort_key_cmp(&Value::Null, &Value::Int64(0)), Ordering::Less);
        assert_eq!(sort_key_cmp(&Value::Null, &Value::Null), Ordering::Equal);
    }

    #[test]
    fn column_type_round_trips_varchar() {
        let t = ColumnType::Varchar(44);
        assert_eq!(ColumnType::parse(&t.type_name()), Some(t));
    }

    #[test]
    fn schema_rejects_too_many_columns() {
        let cols = (0..64)
            .map(|i| ColumnSchema::new(format!("c{i}"), ColumnType::UInt64))
            .collect();
        assert!(Schema::new(cols).is_err());
    }
}
