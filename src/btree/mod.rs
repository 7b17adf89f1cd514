//! B+tree index: an ordered, keyed secondary structure giving
//! point lookup, insert-with-split, remove and two flavors of ordered scan.
//! Built on the same [`crate::buffer_pool`]/[`crate::disk`] stack a
//! [`crate::table::Table`] uses, over its own page-ordered file — page 0 is
//! always the metadata page.

use crate::value::{Row, RowId};

pub mod index;
pub mod page;

pub use index::Index;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("key already present in index")]
    DuplicateKey,
    #[error(
        "index inconsistency: metadata page records key_size={meta_key_size}, max_page_size={meta_max_page_size}; constructor expected key_size={expected_key_size}, max_page_size={expected_max_page_size}"
    )]
    IndexInconsistency {
        meta_key_size: u32,
        meta_max_page_size: u32,
        expected_key_size: u32,
        expected_max_page_size: u32,
    },
    #[error("corrupt index: page {page} has unexpected page type {found}")]
    Corruption { page: u32, found: u32 },
    #[error(transparent)]
    BufferPool(#[from] crate::buffer_pool::Error),
    #[error(transparent)]
    Disk(#[from] crate::disk::Error),
    #[error(transparent)]
    Marshal(#[from] crate::marshal::Error),
}

/// A comparison used by [`index::Index::range_scan`] to bound and filter a
/// predicate-bounded scan, mirroring the source's `KeyConditions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Ne,
}

/// One `column {=,<,<=,>,>=,!=} value` condition against the key schema.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub column: String,
    pub comparator: Comparator,
    pub value: crate::value::Value,
}

/// Orders two key rows lexicographically, column by column, using
/// [`crate::value::sort_key_cmp`] per column (keys are never `Null`, but a
/// partial probe row built for a range scan's lower bound may pad trailing
/// columns with `Null`, which sorts least — see [`index::Index::range_scan`]).
pub fn compare_keys(a: &Row, b: &Row) -> std::cmp::Ordering {
    for i in 0..a.len().max(b.len()) {
        let av = a.values.get(i).unwrap_or(&crate::value::Value::Null);
        let bv = b.values.get(i).unwrap_or(&crate::value::Value::Null);
        let ord = crate::value::sort_key_cmp(av, bv);
        if ord != std::cmp::Ordering::Equal {
            return ord;
        }
    }
    std::cmp::Ordering::Equal
}

pub type IndexKey = Row;
pub type IndexRowId = RowId;
