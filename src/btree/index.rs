//! The B+tree index itself: lookup, insert-with-split, remove, and
//! the two ordered-scan traversals.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::buffer_pool::{BufferPool, PageHandle};
use crate::disk::DiskPagedFile;
use crate::marshal::RowMarshal;
use crate::value::{PageIndex, Row, RowId, Schema, INVALID_PAGE_INDEX, PAGE_SIZE};

use super::page::{self, InternalPage, LeafPage, PageType};
use super::{compare_keys, Comparator, Error, Predicate};

pub const METADATA_PAGE_INDEX: PageIndex = 0;

pub struct Index {
    key_marshal: RowMarshal,
    key_schema: Schema,
    max_page_size: u32,
    pool: Rc<RefCell<BufferPool>>,
}

impl Index {
    fn internal(&self) -> InternalPage<'_> {
        InternalPage::new(&self.key_marshal)
    }

    fn leaf(&self) -> LeafPage<'_> {
        LeafPage::new(&self.key_marshal)
    }

    fn natural_max_page_size(key_marshal: &RowMarshal) -> u32 {
        let internal_max = InternalPage::new(key_marshal).max_entries(PAGE_SIZE);
        let leaf_max = LeafPage::new(key_marshal).max_entries(PAGE_SIZE);
        internal_max.min(leaf_max) as u32
    }

    /// Creates a fresh index file: page 0 is the metadata page, page 1 an
    /// empty leaf root.
    pub fn create(path: impl AsRef<Path>, key_schema: Schema, num_frames: usize) -> Result<Self, Error> {
        let key_marshal = RowMarshal::new(key_schema.clone());
        let max_page_size = Self::natural_max_page_size(&key_marshal);
        let disk = DiskPagedFile::open(path, true)?;
        let pool = Rc::new(RefCell::new(BufferPool::new(disk, num_frames)));

        let meta_index = pool.borrow_mut().allocate_page()?;
        debug_assert_eq!(meta_index, METADATA_PAGE_INDEX);
        let root_index = pool.borrow_mut().allocate_page()?;

        {
            let root_handle = PageHandle::get(&pool, root_index)?;
            root_handle.with_bytes_mut(|b| {
                LeafPage::new(&key_marshal).init(b, INVALID_PAGE_INDEX, INVALID_PAGE_INDEX)
            });
        }
        {
            let meta_handle = PageHandle::get(&pool, meta_index)?;
            meta_handle.with_bytes_mut(|b| {
                page::metadata::init(b, root_index, key_marshal.fixed_row_space() as u32, max_page_size)
            });
        }

        Ok(Index {
            key_marshal,
            key_schema,
            max_page_size,
            pool,
        })
    }

    /// Opens an existing index file, checking the metadata page against
    /// the constructor's expectations, returning `IndexInconsistency` on mismatch.
    pub fn open(path: impl AsRef<Path>, key_schema: Schema, num_frames: usize) -> Result<Self, Error> {
        let key_marshal = RowMarshal::new(key_schema.clone());
        let expected_key_size = key_marshal.fixed_row_space() as u32;
        let expected_max_page_size = Self::natural_max_page_size(&key_marshal);
        let disk = DiskPagedFile::open(path, false)?;
        let pool = Rc::new(RefCell::new(BufferPool::new(disk, num_frames)));

        let (meta_key_size, meta_max_page_size) = {
            let handle = PageHandle::get(&pool, METADATA_PAGE_INDEX)?;
            handle.with_bytes(|b| (page::metadata::key_size_in_bytes(b), page::metadata::max_page_size(b)))
        };
        if meta_key_size != expected_key_size || meta_max_page_size != expected_max_page_size {
            return Err(Error::IndexInconsistency {
                meta_key_size,
                meta_max_page_size,
                expected_key_size,
                expected_max_page_size,
            });
        }

        Ok(Index {
            key_marshal,
            key_schema,
            max_page_size: expected_max_page_size,
            pool,
        })
    }

    pub fn key_schema(&self) -> &Schema {
        &self.key_schema
    }

    fn root_page_index(&self) -> Result<PageIndex, Error> {
        let handle = PageHandle::get(&self.pool, METADATA_PAGE_INDEX)?;
        Ok(handle.with_bytes(page::metadata::root_page_index))
    }

    fn set_root_page_index(&self, root: PageIndex) -> Result<(), Error> {
        let handle = PageHandle::get(&self.pool, METADATA_PAGE_INDEX)?;
        handle.with_bytes_mut(|b| page::metadata::set_root_page_index(b, root));
        Ok(())
    }

    fn require_page_type(&self, page_index: PageIndex) -> Result<PageType, Error> {
        let handle = PageHandle::get(&self.pool, page_index)?;
        handle.with_bytes(|b| page::page_type(b).map_err(|_| Error::Corruption { page: page_index, found: b[0] as u32 }))
    }

    /// Descend from the root, internal nodes via binary search,
    /// leaf via binary search for equality.
    pub fn lookup(&self, key: &Row) -> Result<Option<RowId>, Error> {
        let mut page_index = self.root_page_index()?;
        loop {
            match self.require_page_type(page_index)? {
                PageType::Internal => {
                    let handle = PageHandle::get(&self.pool, page_index)?;
                    page_index = handle.with_bytes(|b| self.internal().lookup(b, key))?;
                }
                PageType::Leaf => {
                    let handle = PageHandle::get(&self.pool, page_index)?;
                    return handle.with_bytes(|b| -> Result<Option<RowId>, Error> {
                        let leaf = self.leaf();
                        Ok(match leaf.find(b, key)? {
                            Ok(i) => Some(leaf.row_id_at(b, i)),
                            Err(_) => None,
                        })
                    });
                }
                other => return Err(Error::Corruption { page: page_index, found: other as u32 }),
            }
        }
    }

    /// Descend recording the path, then insert or split-and-propagate.
    pub fn insert(&self, key: &Row, row_id: RowId) -> Result<(), Error> {
        let mut path: Vec<(PageIndex, u32)> = Vec::new();
        let mut page_index = self.root_page_index()?;
        loop {
            match self.require_page_type(page_index)? {
                PageType::Internal => {
                    let handle = PageHandle::get(&self.pool, page_index)?;
                    let (child, idx) = handle.with_bytes(|b| self.internal().lookup_with_index(b, key))?;
                    path.push((page_index, idx));
                    page_index = child;
                }
                PageType::Leaf => break,
                other => return Err(Error::Corruption { page: page_index, found: other as u32 }),
            }
        }

        let leaf = self.leaf();
        let inserted = {
            let handle = PageHandle::get(&self.pool, page_index)?;
            handle.with_bytes_mut(|b| leaf.insert(b, key, row_id, PAGE_SIZE))?
        };
        if inserted {
            return Ok(());
        }

        // Leaf is full: split, relink siblings, insert into whichever half
        // the new key belongs to, then propagate the separator upward.
        let new_leaf_index = self.pool.borrow_mut().allocate_page()?;
        let (separator, prev_next) = {
            let old_handle = PageHandle::get(&self.pool, page_index)?;
            let new_handle = PageHandle::get(&self.pool, new_leaf_index)?;
            let separator = old_handle.with_bytes_mut(|old_buf| -> Result<Row, Error> {
                new_handle.with_bytes_mut(|new_buf| leaf.split(old_buf, new_buf))
            })?;
            let prev_next = old_handle.with_bytes(|b| leaf.next(b));
            (separator, prev_next)
        };
        {
            let old_handle = PageHandle::get(&self.pool, page_index)?;
            old_handle.with_bytes_mut(|b| leaf.set_next(b, new_leaf_index));
        }
        {
            let new_handle = PageHandle::get(&self.pool, new_leaf_index)?;
            new_handle.with_bytes_mut(|b| {
                leaf.set_prev(b, page_index);
                leaf.set_next(b, prev_next);
            });
        }
        if prev_next != INVALID_PAGE_INDEX {
            let next_handle = PageHandle::get(&self.pool, prev_next)?;
            next_handle.with_bytes_mut(|b| leaf.set_prev(b, new_leaf_index));
        }

        let goes_right = compare_keys(key, &separator) != std::cmp::Ordering::Less;
        let target = if goes_right { new_leaf_index } else { page_index };
        let target_handle = PageHandle::get(&self.pool, target)?;
        let ok = target_handle.with_bytes_mut(|b| leaf.insert(b, key, row_id, PAGE_SIZE))?;
        debug_assert!(ok, "freshly split leaf must have room");

        self.propagate_split(path, page_index, separator, new_leaf_index)
    }

    /// Pops the recorded path, inserting `(separator, right)` at each level
    /// and repointing `left`'s slot; splits the internal node itself if it
    /// has no room, recursing upward. Allocates a new root if the
    /// propagation reaches the top with a separator still pending.
    fn propagate_split(
        &self,
        mut path: Vec<(PageIndex, u32)>,
        mut left: PageIndex,
        mut separator: Row,
        mut right: PageIndex,
    ) -> Result<(), Error> {
        let internal = self.internal();
        while let Some((page_index, chosen_idx)) = path.pop() {
            let handle = PageHandle::get(&self.pool, page_index)?;
            let inserted = handle.with_bytes_mut(|b| {
                internal.set_child(b, chosen_idx, left);
                internal.insert_entry(b, chosen_idx + 1, &separator, right, PAGE_SIZE)
            })?;
            if inserted {
                return Ok(());
            }

            // This internal node is full too: split it and keep propagating.
            let new_internal_index = self.pool.borrow_mut().allocate_page()?;
            let promoted = {
                let new_handle = PageHandle::get(&self.pool, new_internal_index)?;
                handle.with_bytes_mut(|old_buf| -> Result<Row, Error> {
                    new_handle.with_bytes_mut(|new_buf| internal.split(old_buf, new_buf))
                })?
            };
            let goes_right = compare_keys(&separator, &promoted) != std::cmp::Ordering::Less;
            let target = if goes_right { new_internal_index } else { page_index };
            let target_handle = PageHandle::get(&self.pool, target)?;
            let (child, idx) = target_handle.with_bytes(|b| internal.lookup_with_index(b, &separator))?;
            let ok = target_handle.with_bytes_mut(|b| {
                internal.set_child(b, idx, child);
                internal.insert_entry(b, idx + 1, &separator, right, PAGE_SIZE)
            })?;
            debug_assert!(ok, "freshly split internal node must have room");

            left = page_index;
            separator = promoted;
            right = new_internal_index;
        }

        // Reached the root with a pending separator: allocate a new root.
        let new_root_index = self.pool.borrow_mut().allocate_page()?;
        {
            let handle = PageHandle::get(&self.pool, new_root_index)?;
            handle.with_bytes_mut(|b| internal.init_as_new_root(b, left, &separator, right))?;
        }
        self.set_root_page_index(new_root_index)
    }

    /// Remove from the leaf. No rebalancing on underflow — empty leaves
    /// are retained rather than merged with a sibling.
    pub fn remove(&self, key: &Row) -> Result<bool, Error> {
        let mut page_index = self.root_page_index()?;
        loop {
            match self.require_page_type(page_index)? {
                PageType::Internal => {
                    let handle = PageHandle::get(&self.pool, page_index)?;
                    page_index = handle.with_bytes(|b| self.internal().lookup(b, key))?;
                }
                PageType::Leaf => {
                    let handle = PageHandle::get(&self.pool, page_index)?;
                    return handle.with_bytes_mut(|b| self.leaf().remove(b, key));
                }
                other => return Err(Error::Corruption { page: page_index, found: other as u32 }),
            }
        }
    }

    fn leftmost_leaf(&self) -> Result<PageIndex, Error> {
        let mut page_index = self.root_page_index()?;
        loop {
            match self.require_page_type(page_index)? {
                PageType::Leaf => return Ok(page_index),
                PageType::Internal => {
                    let handle = PageHandle::get(&self.pool, page_index)?;
                    page_index = handle.with_bytes(|b| self.internal().child_at(b, 0));
                }
                other => return Err(Error::Corruption { page: page_index, found: other as u32 }),
            }
        }
    }

    /// Full ordered scan: a page-stack with a per-level child/entry cursor,
    /// visiting every leaf entry in key order.
    pub fn scan_ordered(&self) -> Result<OrderedScan<'_>, Error> {
        let root = self.root_page_index()?;
        Ok(OrderedScan {
            index: self,
            stack: vec![(root, 0)],
        })
    }

    /// Predicate-bounded scan: descends to the first leaf that could
    /// satisfy a lower bound on the key's leading column, then follows
    /// `next_page_index` until a `Lt`/`Le` upper bound is exceeded, applying
    /// every remaining predicate to each candidate row.
    pub fn range_scan(&self, predicates: Vec<Predicate>) -> Result<RangeScan<'_>, Error> {
        let lower = self.lower_bound_probe(&predicates);
        let start = match lower {
            Some(probe) => self.descend_to_lower_bound(&probe)?,
            None => self.leftmost_leaf()?,
        };
        Ok(RangeScan {
            index: self,
            predicates,
            page_index: start,
            slot: 0,
            done: false,
        })
    }

    fn lower_bound_probe(&self, predicates: &[Predicate]) -> Option<Row> {
        let first_col = self.key_schema.columns().first()?;
        predicates
            .iter()
            .filter(|p| p.column == first_col.name && matches!(p.comparator, Comparator::Eq | Comparator::Ge | Comparator::Gt))
            .map(|p| p.value.clone())
            .max_by(|a, b| crate::value::sort_key_cmp(a, b))
            .map(|v| Row::new(vec![v]))
    }

    fn descend_to_lower_bound(&self, probe: &Row) -> Result<PageIndex, Error> {
        let mut page_index = self.root_page_index()?;
        loop {
            match self.require_page_type(page_index)? {
                PageType::Leaf => return Ok(page_index),
                PageType::Internal => {
                    let handle = PageHandle::get(&self.pool, page_index)?;
                    page_index = handle.with_bytes(|b| self.internal().lookup(b, probe))?;
                }
                other => return Err(Error::Corruption { page: page_index, found: other as u32 }),
            }
        }
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.pool.borrow_mut().flush_all()?;
        Ok(())
    }
}

fn row_satisfies(row: &Row, schema: &Schema, predicates: &[Predicate]) -> bool {
    predicates.iter().all(|p| {
        let Some(idx) = schema.column_index(&p.column) else {
            return true;
        };
        let v = &row.values[idx];
        match p.comparator {
            Comparator::Eq => crate::value::sql_eq(v, &p.value),
            Comparator::Ne => !crate::value::sql_eq(v, &p.value),
            Comparator::Lt => crate::value::sql_partial_cmp(v, &p.value) == Some(std::cmp::Ordering::Less),
            Comparator::Le => matches!(
                crate::value::sql_partial_cmp(v, &p.value),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
            Comparator::Gt => crate::value::sql_partial_cmp(v, &p.value) == Some(std::cmp::Ordering::Greater),
            Comparator::Ge => matches!(
                crate::value::sql_partial_cmp(v, &p.value),
                Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal)
            ),
        }
    })
}

fn exceeds_upper_bound(row: &Row, schema: &Schema, predicates: &[Predicate]) -> bool {
    let Some(first_col) = schema.columns().first() else {
        return false;
    };
    predicates.iter().any(|p| {
        if p.column != first_col.name {
            return false;
        }
        let v = &row.values[0];
        match p.comparator {
            Comparator::Lt => !matches!(crate::value::sql_partial_cmp(v, &p.value), Some(std::cmp::Ordering::Less)),
            Comparator::Le => !matches!(
                crate::value::sql_partial_cmp(v, &p.value),
                Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal)
            ),
            _ => false,
        }
    })
}

pub struct OrderedScan<'a> {
    index: &'a Index,
    stack: Vec<(PageIndex, u32)>,
}

impl<'a> Iterator for OrderedScan<'a> {
    type Item = (Row, RowId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (page_index, cursor) = *self.stack.last()?;
            let page_type = self.index.require_page_type(page_index).ok()?;
            let handle = PageHandle::get(&self.index.pool, page_index).ok()?;
            match page_type {
                PageType::Leaf => {
                    let leaf = self.index.leaf();
                    let size = handle.with_bytes(|b| leaf.size(b));
                    if cursor >= size {
                        self.stack.pop();
                        if let Some(last) = self.stack.last_mut() {
                            last.1 += 1;
                        }
                        continue;
                    }
                    self.stack.last_mut().unwrap().1 += 1;
                    let key = handle.with_bytes(|b| leaf.key_at(b, cursor)).ok()?;
                    let row_id = handle.with_bytes(|b| leaf.row_id_at(b, cursor));
                    return Some((key, row_id));
                }
                PageType::Internal => {
                    let internal = self.index.internal();
                    let size = handle.with_bytes(|b| internal.size(b));
                    if cursor >= size {
                        self.stack.pop();
                        if let Some(last) = self.stack.last_mut() {
                            last.1 += 1;
                        }
                        continue;
                    }
                    let child = handle.with_bytes(|b| internal.child_at(b, cursor));
                    self.stack.push((child, 0));
                }
                _ => return None,
            }
        }
    }
}

pub struct RangeScan<'a> {
    index: &'a Index,
    predicates: Vec<Predicate>,
    page_index: PageIndex,
    slot: u32,
    done: bool,
}

impl<'a> Iterator for RangeScan<'a> {
    type Item = (Row, RowId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.page_index == INVALID_PAGE_INDEX {
                return None;
            }
            let leaf = self.index.leaf();
            let handle = PageHandle::get(&self.index.pool, self.page_index).ok()?;
            let size = handle.with_bytes(|b| leaf.size(b));
            if self.slot >= size {
                let next_page = handle.with_bytes(|b| leaf.next(b));
                self.page_index = next_page;
                self.slot = 0;
                continue;
            }
            let key = handle.with_bytes(|b| leaf.key_at(b, self.slot)).ok()?;
            let row_id = handle.with_bytes(|b| leaf.row_id_at(b, self.slot));
            self.slot += 1;
            if exceeds_upper_bound(&key, self.index.key_schema(), &self.predicates) {
                self.done = true;
                return None;
            }
            if row_satisfies(&key, self.index.key_schema(), &self.predicates) {
                return Some((key, row_id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ColumnSchema, ColumnType, Value};

    fn key_schema() -> Schema {
        Schema::new(vec![ColumnSchema::new("id", ColumnType::UInt64)]).unwrap()
    }

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("ferrodb_btree_test_{name}_{}", std::process::id()));
        let _ = std::fs::remove_file(&p);
        p
    }

    fn row_id(page_index: PageIndex) -> RowId {
        RowId { page_index, row_index: 0 }
    }

    #[test]
    fn lookup_after_insert_matches_every_key_even_across_splits() {
        let path = tmp_path("insert_lookup");
        let index = Index::create(&path, key_schema(), 8).unwrap();
        for i in 0..500u64 {
            let key = Row::new(vec![Value::UInt64(i)]);
            index.insert(&key, row_id(i as u32)).unwrap();
        }
        for i in 0..500u64 {
            let key = Row::new(vec![Value::UInt64(i)]);
            assert_eq!(index.lookup(&key).unwrap(), Some(row_id(i as u32)));
        }
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn inserting_a_duplicate_key_fails() {
        let path = tmp_path("dup");
        let index = Index::create(&path, key_schema(), 8).unwrap();
        let key = Row::new(vec![Value::UInt64(1)]);
        index.insert(&key, row_id(1)).unwrap();
        assert!(matches!(index.insert(&key, row_id(2)), Err(Error::DuplicateKey)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn full_ordered_scan_visits_every_key_in_sorted_order_for_any_insertion_permutation() {
        let path = tmp_path("ordered_scan");
        let index = Index::create(&path, key_schema(), 8).unwrap();
        let mut keys: Vec<u64> = (0..200).collect();
        // deterministic "shuffle" so the test doesn't depend on a disallowed
        // random source: reverse every other block of 7.
        for chunk in keys.chunks_mut(7) {
            chunk.reverse();
        }
        for &k in &keys {
            index.insert(&Row::new(vec![Value::UInt64(k)]), row_id(k as u32)).unwrap();
        }
        let scanned: Vec<u64> = index
            .scan_ordered()
            .unwrap()
            .map(|(row, _)| row.values[0].as_i64().unwrap() as u64)
            .collect();
        let mut expected: Vec<u64> = (0..200).collect();
        expected.sort_unstable();
        assert_eq!(scanned, expected);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn range_scan_returns_exactly_the_bounded_window() {
        let path = tmp_path("range_scan");
        let index = Index::create(&path, key_schema(), 8).unwrap();
        for i in 0..100u64 {
            index.insert(&Row::new(vec![Value::UInt64(i)]), row_id(i as u32)).unwrap();
        }
        let predicates = vec![
            Predicate { column: "id".to_string(), comparator: Comparator::Ge, value: Value::UInt64(20) },
            Predicate { column: "id".to_string(), comparator: Comparator::Lt, value: Value::UInt64(30) },
        ];
        let scanned: Vec<u64> = index
            .range_scan(predicates)
            .unwrap()
            .map(|(row, _)| row.values[0].as_i64().unwrap() as u64)
            .collect();
        assert_eq!(scanned, (20..30).collect::<Vec<_>>());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn leaf_link_chain_from_leftmost_leaf_visits_every_key_once() {
        let path = tmp_path("leaf_links");
        let index = Index::create(&path, key_schema(), 8).unwrap();
        for i in 0..150u64 {
            index.insert(&Row::new(vec![Value::UInt64(i)]), row_id(i as u32)).unwrap();
        }
        let via_links: Vec<u64> = index
            .range_scan(vec![])
            .unwrap()
            .map(|(row, _)| row.values[0].as_i64().unwrap() as u64)
            .collect();
        assert_eq!(via_links, (0..150).collect::<Vec<_>>());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn remove_deletes_the_key_without_merging_the_leaf() {
        let path = tmp_path("remove");
        let index = Index::create(&path, key_schema(), 8).unwrap();
        for i in 0..10u64 {
            index.insert(&Row::new(vec![Value::UInt64(i)]), row_id(i as u32)).unwrap();
        }
        let key = Row::new(vec![Value::UInt64(3)]);
        assert!(index.remove(&key).unwrap());
        assert_eq!(index.lookup(&key).unwrap(), None);
        assert!(!index.remove(&key).unwrap());
        std::fs::remove_file(&path).ok();
    }

    proptest::proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(16))]
        // For any set of unique keys, inserting them in an arbitrary
        // permutation and then running a full ordered scan yields them
        // back in sorted order.
        #[test]
        fn full_ordered_scan_is_sorted_for_any_permutation(
            mut keys in proptest::collection::vec(0u64..2000, 20..120)
                .prop_map(|mut v| { v.sort_unstable(); v.dedup(); v })
        ) {
            // shuffle deterministically within the proptest-generated
            // sequence itself by reversing alternating chunks, rather than
            // drawing from a second random source.
            for chunk in keys.chunks_mut(5) {
                chunk.reverse();
            }
            let path = tmp_path(&format!("prop_ordered_scan_{}", std::process::id()));
            let index = Index::create(&path, key_schema(), 8).unwrap();
            for (i, &k) in keys.iter().enumerate() {
                index.insert(&Row::new(vec![Value::UInt64(k)]), row_id(i as u32)).unwrap();
            }
            let scanned: Vec<u64> = index
                .scan_ordered()
                .unwrap()
                .map(|(row, _)| match row.values[0] { Value::UInt64(v) => v, _ => unreachable!() })
                .collect();
            let mut expected = keys.clone();
            expected.sort_unstable();
            proptest::prop_assert_eq!(scanned, expected);
            std::fs::remove_file(&path).ok();
        }
    }
}
