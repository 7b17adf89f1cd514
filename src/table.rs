//! Table: a logical, ordered sequence of pages bound to one page provider,
//! supporting insert/get/delete and a full scan.
//!
//! Each table owns its own file and its own buffer pool; the B+tree index
//! beside it is built the same way, over its own page-ordered file.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use crate::buffer_pool::{BufferPool, PageHandle};
use crate::disk::DiskPagedFile;
use crate::marshal::RowMarshal;
use crate::page::fixed::FixedRowPage;
use crate::page::flexible::FlexibleRowPage;
use crate::page::Layout;
use crate::value::{PageIndex, Row, RowId, Schema};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    BufferPool(#[from] crate::buffer_pool::Error),
    #[error(transparent)]
    Disk(#[from] crate::disk::Error),
    #[error(transparent)]
    Page(#[from] crate::page::Error),
    #[error("row {0:?} does not exist")]
    NoSuchRow(RowId),
}

pub struct Table {
    schema: Schema,
    layout: Layout,
    marshal: RowMarshal,
    pool: Rc<RefCell<BufferPool>>,
}

impl Table {
    fn open_with(path: impl AsRef<Path>, schema: Schema, layout: Layout, num_frames: usize, create: bool) -> Result<Self, Error> {
        let disk = DiskPagedFile::open(path, create)?;
        let pool = Rc::new(RefCell::new(BufferPool::new(disk, num_frames)));
        let marshal = RowMarshal::new(schema.clone());
        Ok(Table {
            schema,
            layout,
            marshal,
            pool,
        })
    }

    /// Creates a brand-new, empty table file.
    pub fn create(path: impl AsRef<Path>, schema: Schema, num_frames: usize) -> Result<Self, Error> {
        let layout = Layout::for_schema(&schema);
        Self::open_with(path, schema, layout, num_frames, true)
    }

    /// Opens an existing table file; `schema`/`layout` come from the
    /// catalog.
    pub fn open(path: impl AsRef<Path>, schema: Schema, layout: Layout, num_frames: usize) -> Result<Self, Error> {
        Self::open_with(path, schema, layout, num_frames, false)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    fn with_page<R>(&self, page_index: PageIndex, f: impl FnOnce(&PageHandle) -> R) -> Result<R, Error> {
        let handle = PageHandle::get(&self.pool, page_index)?;
        Ok(f(&handle))
    }

    /// Inserts `row` into the first page with room, or a freshly allocated
    /// page if none has it.
    pub fn insert_row(&self, row: &Row) -> Result<RowId, Error> {
        let page_count = self.pool.borrow().page_count();
        for page_index in 0..page_count {
            let handle = PageHandle::get(&self.pool, page_index)?;
            let has_room = match self.layout {
                Layout::Fixed => {
                    handle.with_bytes(|b| FixedRowPage::new(&self.marshal).can_insert(b))
                }
                Layout::Flexible => {
                    handle.with_bytes(|b| FlexibleRowPage::new(&self.marshal).can_insert(b, row))
                }
            };
            if has_room {
                let row_index = handle.with_bytes_mut(|b| -> Result<u32, Error> {
                    Ok(match self.layout {
                        Layout::Fixed => FixedRowPage::new(&self.marshal).insert(b, row)?,
                        Layout::Flexible => FlexibleRowPage::new(&self.marshal).insert(b, row)?,
                    })
                })?;
                return Ok(RowId {
                    page_index,
                    row_index,
                });
            }
        }
        let page_index = self.pool.borrow_mut().allocate_page()?;
        let handle = PageHandle::get(&self.pool, page_index)?;
        handle.with_bytes_mut(|b| match self.layout {
            Layout::Fixed => FixedRowPage::new(&self.marshal).init(b),
            Layout::Flexible => FlexibleRowPage::new(&self.marshal).init(b),
        });
        let row_index = handle.with_bytes_mut(|b| -> Result<u32, Error> {
            Ok(match self.layout {
                Layout::Fixed => FixedRowPage::new(&self.marshal).insert(b, row)?,
                Layout::Flexible => FlexibleRowPage::new(&self.marshal).insert(b, row)?,
            })
        })?;
        Ok(RowId {
            page_index,
            row_index,
        })
    }

    pub fn get_row(&self, row_id: RowId) -> Result<Option<Row>, Error> {
        if row_id.page_index >= self.pool.borrow().page_count() {
            return Ok(None);
        }
        self.with_page(row_id.page_index, |h| match self.layout {
            Layout::Fixed => {
                h.with_bytes(|b| FixedRowPage::new(&self.marshal).get_row(b, row_id.row_index))
            }
            Layout::Flexible => {
                h.with_bytes(|b| FlexibleRowPage::new(&self.marshal).get_row(b, row_id.row_index))
            }
        })
    }

    pub fn delete_row(&self, row_id: RowId) -> Result<bool, Error> {
        if row_id.page_index >= self.pool.borrow().page_count() {
            return Ok(false);
        }
        self.with_page(row_id.page_index, |h| {
            h.with_bytes_mut(|b| match self.layout {
                Layout::Fixed => FixedRowPage::new(&self.marshal).delete(b, row_id.row_index),
                Layout::Flexible => FlexibleRowPage::new(&self.marshal).delete(b, row_id.row_index),
            })
        })
    }

    /// Full scan over every non-tombstoned row, in insertion order.
    /// Owns a clone of the pool handle rather
    /// than borrowing `&self`, so it can outlive the call that built it —
    /// e.g. live inside a [`crate::executor::ReadFromTable`] alongside an
    /// `Rc<Table>` without a self-referential lifetime.
    pub fn scan(&self) -> TableScan {
        TableScan {
            pool: Rc::clone(&self.pool),
            layout: self.layout,
            marshal: RowMarshal::new(self.schema.clone()),
            page_index: 0,
            slot: 0,
            slots_on_current_page: None,
        }
    }

    pub fn flush(&self) -> Result<(), Error> {
        self.pool.borrow_mut().flush_all()?;
        Ok(())
    }
}

pub struct TableScan {
    pool: Rc<RefCell<BufferPool>>,
    layout: Layout,
    marshal: RowMarshal,
    page_index: PageIndex,
    slot: u32,
    slots_on_current_page: Option<u32>,
}

impl TableScan {
    fn row_count_of_page(&self, page_index: PageIndex) -> Result<u32, Error> {
        let handle = PageHandle::get(&self.pool, page_index)?;
        Ok(match self.layout {
            Layout::Fixed => handle.with_bytes(|b| FixedRowPage::new(&self.marshal).row_count(b)),
            Layout::Flexible => handle.with_bytes(|b| FlexibleRowPage::new(&self.marshal).row_count(b)),
        })
    }

    fn get_row(&self, row_id: RowId) -> Result<Option<Row>, Error> {
        if row_id.page_index >= self.pool.borrow().page_count() {
            return Ok(None);
        }
        let handle = PageHandle::get(&self.pool, row_id.page_index)?;
        Ok(match self.layout {
            Layout::Fixed => handle.with_bytes(|b| FixedRowPage::new(&self.marshal).get_row(b, row_id.row_index)),
            Layout::Flexible => handle.with_bytes(|b| FlexibleRowPage::new(&self.marshal).get_row(b, row_id.row_index)),
        })
    }
}

impl Iterator for TableScan {
    type Item = (RowId, Row);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let page_count = self.pool.borrow().page_count();
            if self.page_index >= page_count {
                return None;
            }
            if self.slots_on_current_page.is_none() {
                let n = self.row_count_of_page(self.page_index).ok()?;
                self.slots_on_current_page = Some(n);
            }
            let limit = self.slots_on_current_page.unwrap();
            if self.slot >= limit {
                self.page_index += 1;
                self.slot = 0;
                self.slots_on_current_page = None;
                continue;
            }
            let row_id = RowId {
                page_index: self.page_index,
                row_index: self.slot,
            };
            self.slot += 1;
            if let Ok(Some(row)) = self.get_row(row_id) {
                return Some((row_id, row));
            }
            // tombstoned or otherwise absent: keep scanning this page.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ColumnSchema, ColumnType, Value};

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnSchema::new("id", ColumnType::Int64),
            ColumnSchema::new("name", ColumnType::Varchar(16)),
        ])
        .unwrap()
    }

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("ferrodb_table_test_{name}_{}", std::process::id()));
        let _ = std::fs::remove_file(&p);
        p
    }

    #[test]
    fn insert_then_scan_preserves_insertion_order() {
        let path = tmp_path("scan_order");
        let table = Table::create(&path, schema(), 8).unwrap();
        let names = ["ann", "bob", "cid"];
        for (i, name) in names.iter().enumerate() {
            let row = Row::new(vec![
                Value::Int64(i as i64),
                Value::FixedString(name.to_string(), 16),
            ]);
            table.insert_row(&row).unwrap();
        }
        let scanned: Vec<String> = table
            .scan()
            .map(|(_, row)| row.values[1].as_str().unwrap().to_string())
            .collect();
        assert_eq!(scanned, vec!["ann", "bob", "cid"]);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn deleted_row_is_skipped_by_scan_but_row_count_holds() {
        let path = tmp_path("delete_tombstone");
        let table = Table::create(&path, schema(), 8).unwrap();
        let mut ids = vec![];
        for i in 0..3 {
            let row = Row::new(vec![
                Value::Int64(i),
                Value::FixedString("x".to_string(), 16),
            ]);
            ids.push(table.insert_row(&row).unwrap());
        }
        table.delete_row(ids[1]).unwrap();
        let remaining: Vec<i64> = table
            .scan()
            .map(|(_, row)| row.values[0].as_i64().unwrap())
            .collect();
        assert_eq!(remaining, vec![0, 2]);
        assert_eq!(table.get_row(ids[1]).unwrap(), None);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn allocates_a_new_page_once_the_first_is_full() {
        let path = tmp_path("spill_page");
        let table = Table::create(&path, schema(), 8).unwrap();
        let mut last_page = 0;
        for i in 0..500 {
            let row = Row::new(vec![
                Value::Int64(i),
                Value::FixedString("x".to_string(), 16),
            ]);
            let id = table.insert_row(&row).unwrap();
            last_page = id.page_index;
        }
        assert!(last_page >= 1, "expected insertion to spill onto a second page");
        std::fs::remove_file(&path).ok();
    }
}
