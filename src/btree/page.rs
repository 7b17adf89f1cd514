//! B+tree page layouts: metadata, internal and leaf pages, all
//! sharing a `page_type: u32` tag at offset 0.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::Error;
use crate::marshal::RowMarshal;
use crate::value::{PageIndex, RowId, INVALID_PAGE_INDEX};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Invalid,
    Metadata,
    Internal,
    Leaf,
}

impl PageType {
    fn from_u32(v: u32) -> Option<PageType> {
        match v {
            0 => Some(PageType::Invalid),
            1 => Some(PageType::Metadata),
            2 => Some(PageType::Internal),
            3 => Some(PageType::Leaf),
            _ => None,
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            PageType::Invalid => 0,
            PageType::Metadata => 1,
            PageType::Internal => 2,
            PageType::Leaf => 3,
        }
    }
}

pub fn page_type(buf: &[u8]) -> Result<PageType, Error> {
    let raw = (&buf[0..4]).read_u32::<LittleEndian>().unwrap();
    PageType::from_u32(raw).ok_or(Error::Corruption { page: 0, found: raw })
}

fn set_page_type(buf: &mut [u8], t: PageType) {
    (&mut buf[0..4]).write_u32::<LittleEndian>(t.as_u32()).unwrap();
}

/// `page_type, root_page_index, key_size_in_bytes, max_page_size`, each u32.
pub mod metadata {
    use super::*;

    pub fn init(buf: &mut [u8], root_page_index: PageIndex, key_size_in_bytes: u32, max_page_size: u32) {
        set_page_type(buf, PageType::Metadata);
        set_root_page_index(buf, root_page_index);
        (&mut buf[8..12])
            .write_u32::<LittleEndian>(key_size_in_bytes)
            .unwrap();
        (&mut buf[12..16])
            .write_u32::<LittleEndian>(max_page_size)
            .unwrap();
    }

    pub fn root_page_index(buf: &[u8]) -> PageIndex {
        (&buf[4..8]).read_u32::<LittleEndian>().unwrap()
    }

    pub fn set_root_page_index(buf: &mut [u8], v: PageIndex) {
        (&mut buf[4..8]).write_u32::<LittleEndian>(v).unwrap();
    }

    pub fn key_size_in_bytes(buf: &[u8]) -> u32 {
        (&buf[8..12]).read_u32::<LittleEndian>().unwrap()
    }

    pub fn max_page_size(buf: &[u8]) -> u32 {
        (&buf[12..16]).read_u32::<LittleEndian>().unwrap()
    }
}

const INTERNAL_HEADER: usize = 8;
const LEAF_HEADER: usize = 16;

/// `(key_bytes, child_page_index: u32)`, `size` of them; entry 0's key is the
/// ignored "invalid" leftmost separator.
pub struct InternalPage<'a> {
    key_marshal: &'a RowMarshal,
}

impl<'a> InternalPage<'a> {
    pub fn new(key_marshal: &'a RowMarshal) -> Self {
        InternalPage { key_marshal }
    }

    fn key_size(&self) -> usize {
        self.key_marshal.fixed_row_space()
    }

    fn entry_size(&self) -> usize {
        self.key_size() + 4
    }

    pub fn max_entries(&self, page_size: usize) -> usize {
        (page_size - INTERNAL_HEADER) / self.entry_size()
    }

    pub fn init(&self, buf: &mut [u8]) {
        set_page_type(buf, PageType::Internal);
        self.set_size(buf, 0);
    }

    pub fn size(&self, buf: &[u8]) -> u32 {
        (&buf[4..8]).read_u32::<LittleEndian>().unwrap()
    }

    pub fn set_size(&self, buf: &mut [u8], n: u32) {
        (&mut buf[4..8]).write_u32::<LittleEndian>(n).unwrap();
    }

    fn entry_offset(&self, i: u32) -> usize {
        INTERNAL_HEADER + i as usize * self.entry_size()
    }

    pub fn key_at(&self, buf: &[u8], i: u32) -> Result<crate::value::Row, Error> {
        let off = self.entry_offset(i);
        let key_size = self.key_size();
        Ok(self.key_marshal.deserialize(&buf[off..off + key_size])?)
    }

    pub fn child_at(&self, buf: &[u8], i: u32) -> PageIndex {
        let off = self.entry_offset(i) + self.key_size();
        (&buf[off..off + 4]).read_u32::<LittleEndian>().unwrap()
    }

    fn set_child_at(&self, buf: &mut [u8], i: u32, child: PageIndex) {
        let off = self.entry_offset(i) + self.key_size();
        (&mut buf[off..off + 4]).write_u32::<LittleEndian>(child).unwrap();
    }

    fn write_entry(&self, buf: &mut [u8], i: u32, key: &crate::value::Row, child: PageIndex) -> Result<(), Error> {
        let off = self.entry_offset(i);
        let key_size = self.key_size();
        self.key_marshal.serialize(&mut buf[off..off + key_size], key)?;
        self.set_child_at(buf, i, child);
        Ok(())
    }

    /// Binary search for the greatest separator `<= search_key`, treating
    /// entry 0 as `-inf`. Returns its index.
    fn lookup_index(&self, buf: &[u8], search_key: &crate::value::Row) -> Result<u32, Error> {
        let size = self.size(buf);
        debug_assert!(size > 0);
        let mut lo = 1u32;
        let mut hi = size;
        // invariant: keys_at[lo-1] <= search_key (entry 0 counts as -inf)
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let k = self.key_at(buf, mid)?;
            if super::compare_keys(&k, search_key) != std::cmp::Ordering::Greater {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo - 1)
    }

    pub fn lookup(&self, buf: &[u8], search_key: &crate::value::Row) -> Result<PageIndex, Error> {
        let idx = self.lookup_index(buf, search_key)?;
        Ok(self.child_at(buf, idx))
    }

    pub fn lookup_with_index(&self, buf: &[u8], search_key: &crate::value::Row) -> Result<(PageIndex, u32), Error> {
        let idx = self.lookup_index(buf, search_key)?;
        Ok((self.child_at(buf, idx), idx))
    }

    pub fn can_insert(&self, buf: &[u8], page_size: usize) -> bool {
        (self.size(buf) as usize) < self.max_entries(page_size)
    }

    /// Sets up a fresh root with two children: `(invalid, left)` at entry 0
    /// and `(separator, right)` at entry 1.
    pub fn init_as_new_root(&self, buf: &mut [u8], left: PageIndex, separator: &crate::value::Row, right: PageIndex) -> Result<(), Error> {
        self.init(buf);
        self.write_entry(buf, 0, separator, left)?;
        self.write_entry(buf, 1, separator, right)?;
        self.set_size(buf, 2);
        Ok(())
    }

    /// Overwrites the child pointer at `index` (used to repoint the
    /// just-split child to its left half after insertion).
    pub fn set_child(&self, buf: &mut [u8], index: u32, child: PageIndex) {
        self.set_child_at(buf, index, child);
    }

    /// Inserts `(separator, child)` at `pos`, shifting later entries right.
    /// Fails (returns `false`, buffer unchanged) if the page has no room.
    pub fn insert_entry(&self, buf: &mut [u8], pos: u32, separator: &crate::value::Row, child: PageIndex, page_size: usize) -> Result<bool, Error> {
        if !self.can_insert(buf, page_size) {
            return Ok(false);
        }
        let size = self.size(buf);
        let mut i = size;
        while i > pos {
            let k = self.key_at(buf, i - 1)?;
            let c = self.child_at(buf, i - 1);
            self.write_entry(buf, i, &k, c)?;
            i -= 1;
        }
        self.write_entry(buf, pos, separator, child)?;
        self.set_size(buf, size + 1);
        Ok(true)
    }

    /// Splits the upper half of entries (from `size/2`) into `new_buf`,
    /// returning the smallest key of the new (right) half as the promoted
    /// separator for the caller to insert into the parent.
    pub fn split(&self, buf: &mut [u8], new_buf: &mut [u8]) -> Result<crate::value::Row, Error> {
        self.init(new_buf);
        let size = self.size(buf);
        let mid = size / 2;
        let mut j = 0u32;
        for i in mid..size {
            let k = self.key_at(buf, i)?;
            let c = self.child_at(buf, i);
            self.write_entry(new_buf, j, &k, c)?;
            j += 1;
        }
        self.set_size(new_buf, j);
        self.set_size(buf, mid);
        // entry 0 of the right half carries the real separator (its key
        // isn't "invalid" there, since it is no longer the leftmost child).
        self.key_at(new_buf, 0)
    }
}

/// `size, prev_page_index, next_page_index: u32`, then `size` entries of
/// `(key_bytes, row_id: {page_index: u32, row_index: u32})`.
pub struct LeafPage<'a> {
    key_marshal: &'a RowMarshal,
}

impl<'a> LeafPage<'a> {
    pub fn new(key_marshal: &'a RowMarshal) -> Self {
        LeafPage { key_marshal }
    }

    fn key_size(&self) -> usize {
        self.key_marshal.fixed_row_space()
    }

    fn entry_size(&self) -> usize {
        self.key_size() + 8
    }

    pub fn max_entries(&self, page_size: usize) -> usize {
        (page_size - LEAF_HEADER) / self.entry_size()
    }

    pub fn init(&self, buf: &mut [u8], prev: PageIndex, next: PageIndex) {
        set_page_type(buf, PageType::Leaf);
        self.set_size(buf, 0);
        self.set_prev(buf, prev);
        self.set_next(buf, next);
    }

    pub fn size(&self, buf: &[u8]) -> u32 {
        (&buf[4..8]).read_u32::<LittleEndian>().unwrap()
    }

    fn set_size(&self, buf: &mut [u8], n: u32) {
        (&mut buf[4..8]).write_u32::<LittleEndian>(n).unwrap();
    }

    pub fn prev(&self, buf: &[u8]) -> PageIndex {
        (&buf[8..12]).read_u32::<LittleEndian>().unwrap()
    }

    pub fn set_prev(&self, buf: &mut [u8], v: PageIndex) {
        (&mut buf[8..12]).write_u32::<LittleEndian>(v).unwrap();
    }

    pub fn next(&self, buf: &[u8]) -> PageIndex {
        (&buf[12..16]).read_u32::<LittleEndian>().unwrap()
    }

    pub fn set_next(&self, buf: &mut [u8], v: PageIndex) {
        (&mut buf[12..16]).write_u32::<LittleEndian>(v).unwrap();
    }

    fn entry_offset(&self, i: u32) -> usize {
        LEAF_HEADER + i as usize * self.entry_size()
    }

    pub fn key_at(&self, buf: &[u8], i: u32) -> Result<crate::value::Row, Error> {
        let off = self.entry_offset(i);
        let key_size = self.key_size();
        Ok(self.key_marshal.deserialize(&buf[off..off + key_size])?)
    }

    pub fn row_id_at(&self, buf: &[u8], i: u32) -> RowId {
        let off = self.entry_offset(i) + self.key_size();
        let page_index = (&buf[off..off + 4]).read_u32::<LittleEndian>().unwrap();
        let row_index = (&buf[off + 4..off + 8]).read_u32::<LittleEndian>().unwrap();
        RowId { page_index, row_index }
    }

    fn write_entry(&self, buf: &mut [u8], i: u32, key: &crate::value::Row, row_id: RowId) -> Result<(), Error> {
        let off = self.entry_offset(i);
        let key_size = self.key_size();
        self.key_marshal.serialize(&mut buf[off..off + key_size], key)?;
        (&mut buf[off + key_size..off + key_size + 4])
            .write_u32::<LittleEndian>(row_id.page_index)
            .unwrap();
        (&mut buf[off + key_size + 4..off + key_size + 8])
            .write_u32::<LittleEndian>(row_id.row_index)
            .unwrap();
        Ok(())
    }

    /// Binary search for `key`. `Ok(i)` is an exact match at entry `i`;
    /// `Err(i)` is the insertion point preserving sort order.
    pub fn find(&self, buf: &[u8], key: &crate::value::Row) -> Result<Result<u32, u32>, Error> {
        let size = self.size(buf);
        let mut lo = 0u32;
        let mut hi = size;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let k = self.key_at(buf, mid)?;
            match super::compare_keys(&k, key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }

    pub fn can_insert(&self, buf: &[u8], page_size: usize) -> bool {
        (self.size(buf) as usize) < self.max_entries(page_size)
    }

    /// Inserts `(key, row_id)` at its sorted position. `Ok(false)` if the
    /// page has no room; caller must split first.
    pub fn insert(&self, buf: &mut [u8], key: &crate::value::Row, row_id: RowId, page_size: usize) -> Result<bool, Error> {
        if !self.can_insert(buf, page_size) {
            return Ok(false);
        }
        let pos = match self.find(buf, key)? {
            Ok(_) => return Err(Error::DuplicateKey),
            Err(pos) => pos,
        };
        let size = self.size(buf);
        let mut i = size;
        while i > pos {
            let k = self.key_at(buf, i - 1)?;
            let r = self.row_id_at(buf, i - 1);
            self.write_entry(buf, i, &k, r)?;
            i -= 1;
        }
        self.write_entry(buf, pos, key, row_id)?;
        self.set_size(buf, size + 1);
        Ok(true)
    }

    pub fn remove(&self, buf: &mut [u8], key: &crate::value::Row) -> Result<bool, Error> {
        let pos = match self.find(buf, key)? {
            Ok(pos) => pos,
            Err(_) => return Ok(false),
        };
        let size = self.size(buf);
        for i in pos..size - 1 {
            let k = self.key_at(buf, i + 1)?;
            let r = self.row_id_at(buf, i + 1);
            self.write_entry(buf, i, &k, r)?;
        }
        self.set_size(buf, size - 1);
        Ok(true)
    }

    /// Moves the upper half of entries (from `size/2`) into `new_buf`,
    /// returning the first key of the new (right) half as the separator to
    /// propagate upward. Sibling links are left for the caller to fix up.
    pub fn split(&self, buf: &mut [u8], new_buf: &mut [u8]) -> Result<crate::value::Row, Error> {
        self.init(new_buf, INVALID_PAGE_INDEX, INVALID_PAGE_INDEX);
        let size = self.size(buf);
        let mid = size / 2;
        let mut j = 0u32;
        for i in mid..size {
            let k = self.key_at(buf, i)?;
            let r = self.row_id_at(buf, i);
            self.write_entry(new_buf, j, &k, r)?;
            j += 1;
        }
        self.set_size(new_buf, j);
        self.set_size(buf, mid);
        self.key_at(new_buf, 0)
    }
}
