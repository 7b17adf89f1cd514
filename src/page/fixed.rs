//! Fixed-row table page: a slot directory at the page head, rows
//! laid out at a fixed stride equal to the marshal's fixed row space.
//! `row_count` is a tide-mark, not a live count — it never decreases, and a
//! deleted slot is tombstoned in place by overwriting its null bitmap.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::Error;
use crate::marshal::RowMarshal;
use crate::value::{Row, PAGE_SIZE};

/// `row_count: u32` then `free_space_offset: u32`.
const HEADER_SIZE: usize = 8;

pub struct FixedRowPage<'a> {
    marshal: &'a RowMarshal,
}

impl<'a> FixedRowPage<'a> {
    pub fn new(marshal: &'a RowMarshal) -> Self {
        FixedRowPage { marshal }
    }

    fn stride(&self) -> usize {
        self.marshal.fixed_row_space()
    }

    /// A fresh page with zero rows.
    pub fn init(&self, buf: &mut [u8]) {
        (&mut buf[0..4]).write_u32::<LittleEndian>(0).unwrap();
        (&mut buf[4..8])
            .write_u32::<LittleEndian>(HEADER_SIZE as u32)
            .unwrap();
    }

    pub fn row_count(&self, buf: &[u8]) -> u32 {
        (&buf[0..4]).read_u32::<LittleEndian>().unwrap()
    }

    fn set_row_count(&self, buf: &mut [u8], n: u32) {
        (&mut buf[0..4]).write_u32::<LittleEndian>(n).unwrap();
        let free_space_offset = HEADER_SIZE + n as usize * self.stride();
        (&mut buf[4..8])
            .write_u32::<LittleEndian>(free_space_offset as u32)
            .unwrap();
    }

    fn slot_offset(&self, slot: u32) -> usize {
        HEADER_SIZE + slot as usize * self.stride()
    }

    /// Every bit that a genuine row of this schema could set, used to mark
    /// a tombstone (all-null) without ambiguity against a merely sparse row.
    fn all_null_mask(&self) -> u64 {
        let n = self.marshal.schema().len();
        if n == 0 {
            0
        } else if n == 64 {
            u64::MAX
        } else {
            (1u64 << n) - 1
        }
    }

    pub fn can_insert(&self, buf: &[u8]) -> bool {
        let row_count = self.row_count(buf) as usize;
        HEADER_SIZE + self.stride() * (row_count + 1) <= PAGE_SIZE
    }

    /// Inserts at slot `row_count`, returning that slot index.
    pub fn insert(&self, buf: &mut [u8], row: &Row) -> Result<u32, Error> {
        if !self.can_insert(buf) {
            return Err(Error::PageFull);
        }
        let row_count = self.row_count(buf);
        let offset = self.slot_offset(row_count);
        let stride = self.stride();
        self.marshal
            .serialize(&mut buf[offset..offset + stride], row)?;
        self.set_row_count(buf, row_count + 1);
        Ok(row_count)
    }

    /// `None` for a slot beyond `row_count` or one that has been
    /// tombstoned.
    pub fn get_row(&self, buf: &[u8], slot: u32) -> Option<Row> {
        if slot >= self.row_count(buf) {
            return None;
        }
        let offset = self.slot_offset(slot);
        let stride = self.stride();
        let slot_bytes = &buf[offset..offset + stride];
        let nulls = (&slot_bytes[0..8]).read_u64::<LittleEndian>().ok()?;
        let mask = self.all_null_mask();
        if mask != 0 && nulls & mask == mask {
            return None;
        }
        self.marshal.deserialize(slot_bytes).ok()
    }

    /// Writes an all-null bitmap into the slot as a tombstone. Returns
    /// `false` if `slot` is beyond `row_count`.
    pub fn delete(&self, buf: &mut [u8], slot: u32) -> bool {
        if slot >= self.row_count(buf) {
            return false;
        }
        let offset = self.slot_offset(slot);
        (&mut buf[offset..offset + 8])
            .write_u64::<LittleEndian>(self.all_null_mask())
            .unwrap();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{ColumnSchema, ColumnType, Schema, Value};

    fn marshal() -> RowMarshal {
        RowMarshal::new(
            Schema::new(vec![
                ColumnSchema::new("id", ColumnType::Int64),
                ColumnSchema::new("name", ColumnType::Varchar(16)),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn insert_get_delete_round_trip() {
        let m = marshal();
        let page = FixedRowPage::new(&m);
        let mut buf = vec![0u8; PAGE_SIZE];
        page.init(&mut buf);

        let row = Row::new(vec![
            Value::Int64(42),
            Value::FixedString("ann".to_string(), 16),
        ]);
        let slot = page.insert(&mut buf, &row).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(page.row_count(&buf), 1);
        assert_eq!(page.get_row(&buf, 0), Some(row));

        assert!(page.delete(&mut buf, 0));
        assert_eq!(page.get_row(&buf, 0), None);
        // row_count never decreases on delete.
        assert_eq!(page.row_count(&buf), 1);
    }

    #[test]
    fn insertion_fails_exactly_at_the_boundary() {
        let m = marshal();
        let page = FixedRowPage::new(&m);
        let mut buf = vec![0u8; PAGE_SIZE];
        page.init(&mut buf);
        let stride = m.fixed_row_space();
        let max_rows = (PAGE_SIZE - HEADER_SIZE) / stride;
        for i in 0..max_rows {
            let row = Row::new(vec![
                Value::Int64(i as i64),
                Value::FixedString("x".to_string(), 16),
            ]);
            assert!(page.can_insert(&buf));
            page.insert(&mut buf, &row).unwrap();
        }
        assert!(!page.can_insert(&buf));
        let row = Row::new(vec![Value::Int64(999), Value::FixedString("x".to_string(), 16)]);
        assert!(matches!(page.insert(&mut buf, &row), Err(Error::PageFull)));
    }
}
