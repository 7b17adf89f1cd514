//! Flexible-row table page: header entries grow from the low end,
//! payloads are packed from the high end downward. `row_count` is defined
//! as `max_slot_id + 1`; deletion removes the header entry without
//! compacting the payload region (accepted as-is, no reclaim pass).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::Error;
use crate::marshal::RowMarshal;
use crate::value::{Row, PAGE_SIZE};

/// `count: u32` at the very start of the page.
const COUNT_FIELD_SIZE: usize = 4;
/// Each header entry is `(slot_id: u8, payload_ptr: u16)`.
const ENTRY_SIZE: usize = 3;
/// Minimum gap kept between the header's high-water mark and the payload
/// region's low-water mark, so pages never fill to the exact byte.
const SLACK: usize = 8;

pub struct FlexibleRowPage<'a> {
    marshal: &'a RowMarshal,
}

impl<'a> FlexibleRowPage<'a> {
    pub fn new(marshal: &'a RowMarshal) -> Self {
        FlexibleRowPage { marshal }
    }

    pub fn init(&self, buf: &mut [u8]) {
        (&mut buf[0..4]).write_u32::<LittleEndian>(0).unwrap();
    }

    fn count(&self, buf: &[u8]) -> u32 {
        (&buf[0..4]).read_u32::<LittleEndian>().unwrap()
    }

    fn set_count(&self, buf: &mut [u8], n: u32) {
        (&mut buf[0..4]).write_u32::<LittleEndian>(n).unwrap();
    }

    fn entry_offset(&self, i: u32) -> usize {
        COUNT_FIELD_SIZE + i as usize * ENTRY_SIZE
    }

    fn entry_at(&self, buf: &[u8], i: u32) -> (u8, u16) {
        let off = self.entry_offset(i);
        let slot_id = buf[off];
        let payload_ptr = (&buf[off + 1..off + 3]).read_u16::<LittleEndian>().unwrap();
        (slot_id, payload_ptr)
    }

    fn set_entry(&self, buf: &mut [u8], i: u32, slot_id: u8, payload_ptr: u16) {
        let off = self.entry_offset(i);
        buf[off] = slot_id;
        (&mut buf[off + 1..off + 3])
            .write_u16::<LittleEndian>(payload_ptr)
            .unwrap();
    }

    /// `max_slot_id + 1`, or 0 for an empty page.
    pub fn row_count(&self, buf: &[u8]) -> u32 {
        let count = self.count(buf);
        (0..count)
            .map(|i| self.entry_at(buf, i).0 as u32 + 1)
            .max()
            .unwrap_or(0)
    }

    fn low_water_mark(&self, buf: &[u8]) -> usize {
        let count = self.count(buf);
        (0..count)
            .map(|i| self.entry_at(buf, i).1 as usize)
            .min()
            .unwrap_or(PAGE_SIZE)
    }

    fn next_slot_id(&self, buf: &[u8]) -> Option<u8> {
        let count = self.count(buf);
        let max = (0..count).map(|i| self.entry_at(buf, i).0).max();
        match max {
            None => Some(0),
            Some(m) => m.checked_add(1),
        }
    }

    pub fn can_insert(&self, buf: &[u8], row: &Row) -> bool {
        let Ok(row_space) = self.marshal.row_space(row) else {
            return false;
        };
        let count = self.count(buf);
        let header_end = self.entry_offset(count + 1);
        let low_water = self.low_water_mark(buf);
        self.next_slot_id(buf).is_some() && header_end + row_space + SLACK <= low_water
    }

    /// Appends a new header entry with `slot_id = max_existing_slot + 1`
    /// and packs the payload just below the current low-water mark.
    pub fn insert(&self, buf: &mut [u8], row: &Row) -> Result<u32, Error> {
        if !self.can_insert(buf, row) {
            return Err(Error::PageFull);
        }
        let row_space = self.marshal.row_space(row)?;
        let count = self.count(buf);
        let low_water = self.low_water_mark(buf);
        let new_ptr = low_water - row_space;
        let slot_id = self.next_slot_id(buf).expect("checked by can_insert");
        self.marshal
            .serialize(&mut buf[new_ptr..new_ptr + row_space], row)?;
        self.set_entry(buf, count, slot_id, new_ptr as u16);
        self.set_count(buf, count + 1);
        Ok(slot_id as u32)
    }

    fn find_entry_index(&self, buf: &[u8], slot: u32) -> Option<u32> {
        let count = self.count(buf);
        (0..count).find(|&i| self.entry_at(buf, i).0 as u32 == slot)
    }

    /// `None` if `slot` has no header entry (never inserted, or deleted).
    pub fn get_row(&self, buf: &[u8], slot: u32) -> Option<Row> {
        let idx = self.find_entry_index(buf, slot)?;
        let (_, payload_ptr) = self.entry_at(buf, idx);
        self.marshal.deserialize(&buf[payload_ptr as usize..]).ok()
    }

    /// Removes the header entry for `slot`, shifting later entries down.
    /// Does not reclaim or compact the payload bytes it leaves behind.
    pub fn delete(&self, buf: &mut [u8], slot: u32) -> bool {
        let Some(idx) = self.find_entry_index(buf, slot) else {
            return false;
        };
        let count = self.count(buf);
        for i in idx..count - 1 {
            let next = self.entry_at(buf, i + 1);
            self.set_entry(buf, i, next.0, next.1);
        }
        self.set_count(buf, count - 1);
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
                ColumnSchema::new("bio", ColumnType::String),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn insert_get_delete_round_trip() {
        let m = marshal();
        let page = FlexibleRowPage::new(&m);
        let mut buf = vec![0u8; PAGE_SIZE];
        page.init(&mut buf);

        let row = Row::new(vec![Value::Int64(1), Value::VarString("hello".to_string())]);
        let slot = page.insert(&mut buf, &row).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(page.row_count(&buf), 1);
        assert_eq!(page.get_row(&buf, 0), Some(row));

        assert!(page.delete(&mut buf, 0));
        assert_eq!(page.get_row(&buf, 0), None);
    }

    #[test]
    fn row_count_is_max_slot_plus_one_and_ids_never_reused() {
        let m = marshal();
        let page = FlexibleRowPage::new(&m);
        let mut buf = vec![0u8; PAGE_SIZE];
        page.init(&mut buf);

        for i in 0..3 {
            let row = Row::new(vec![Value::Int64(i), Value::VarString("x".to_string())]);
            page.insert(&mut buf, &row).unwrap();
        }
        assert_eq!(page.row_count(&buf), 3);
        page.delete(&mut buf, 1);
        assert_eq!(page.row_count(&buf), 3);

        let row = Row::new(vec![Value::Int64(99), Value::VarString("y".to_string())]);
        let new_slot = page.insert(&mut buf, &row).unwrap();
        assert_eq!(new_slot, 3);
        assert_eq!(page.row_count(&buf), 4);
    }

    #[test]
    fn insertion_fails_when_slack_exhausted() {
        let m = marshal();
        let page = FlexibleRowPage::new(&m);
        let mut buf = vec![0u8; PAGE_SIZE];
        page.init(&mut buf);
        let big = "x".repeat(PAGE_SIZE);
        let row = Row::new(vec![Value::Int64(1), Value::VarString(big)]);
        assert!(!page.can_insert(&buf, &row));
        assert!(matches!(page.insert(&mut buf, &row), Err(Error::PageFull)));
    }
}
