//! The buffer pool: a bounded set of frames caching disk pages, evicted
//! under a clock-sweep policy.
//!
//! Releasing the last pin on a frame only clears its `pin_count`; the frame
//! stays resident until the clock hand actually selects it as an eviction
//! victim. Collapsing "not pinned" into "not cached" on last-unpin would
//! defeat the point of a cache: a second pass over a working set that fits
//! in the pool should cost zero further disk reads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::disk::DiskPagedFile;
use crate::value::{PageIndex, PAGE_SIZE};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("buffer pool exhausted: all {0} frames are pinned")]
    OutOfFrames(usize),
    #[error(transparent)]
    Disk(#[from] crate::disk::Error),
}

struct Frame {
    bytes: Box<[u8]>,
    page_id: Option<PageIndex>,
    pin_count: u32,
    referenced: bool,
    dirty: bool,
}

impl Frame {
    fn empty() -> Self {
        Frame {
            bytes: vec![0u8; PAGE_SIZE].into_boxed_slice(),
            page_id: None,
            pin_count: 0,
            referenced: false,
            dirty: false,
        }
    }
}

/// Fixed-size frame pool backed by one [`DiskPagedFile`].
pub struct BufferPool {
    disk: DiskPagedFile,
    frames: Vec<Frame>,
    resident: HashMap<PageIndex, usize>,
    hand: usize,
}

impl BufferPool {
    pub fn new(disk: DiskPagedFile, num_frames: usize) -> Self {
        assert!(num_frames > 0, "buffer pool needs at least one frame");
        BufferPool {
            disk,
            frames: (0..num_frames).map(|_| Frame::empty()).collect(),
            resident: HashMap::new(),
            hand: 0,
        }
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn page_count(&self) -> PageIndex {
        self.disk.page_count()
    }

    pub fn allocate_page(&mut self) -> Result<PageIndex, Error> {
        Ok(self.disk.allocate_page()?)
    }

    /// Clock sweep: advance past referenced/pinned slots, clearing the
    /// referenced bit as we pass, until an evictable slot is found. A full
    /// sweep that finds nothing evictable means every frame is pinned.
    fn find_victim(&mut self) -> Result<usize, Error> {
        let n = self.frames.len();
        let mut scanned = 0;
        loop {
            if scanned > 2 * n {
                return Err(Error::OutOfFrames(n));
            }
            let slot = self.hand;
            self.hand = (self.hand + 1) % n;
            let f = &mut self.frames[slot];
            if f.page_id.is_none() {
                return Ok(slot);
            }
            if f.pin_count > 0 {
                scanned += 1;
                continue;
            }
            if f.referenced {
                f.referenced = false;
                scanned += 1;
                continue;
            }
            return Ok(slot);
        }
    }

    fn evict(&mut self, slot: usize) -> Result<(), Error> {
        let page_id = self.frames[slot].page_id;
        if self.frames[slot].dirty {
            if let Some(page_id) = page_id {
                log::debug!("evicting dirty frame {slot} (page {page_id}), writing back");
                let bytes = self.frames[slot].bytes.clone();
                self.disk.write_page(page_id, &bytes)?;
            }
        }
        if let Some(page_id) = page_id {
            self.resident.remove(&page_id);
        }
        let f = &mut self.frames[slot];
        f.page_id = None;
        f.dirty = false;
        f.referenced = false;
        Ok(())
    }

    fn pin_slot(&mut self, page_id: PageIndex) -> Result<usize, Error> {
        if let Some(&slot) = self.resident.get(&page_id) {
            let f = &mut self.frames[slot];
            f.pin_count += 1;
            f.referenced = true;
            return Ok(slot);
        }
        log::debug!("page fault on page {page_id}");
        let slot = self.find_victim()?;
        self.evict(slot)?;
        self.disk.read_page(page_id, &mut self.frames[slot].bytes)?;
        let f = &mut self.frames[slot];
        f.page_id = Some(page_id);
        f.pin_count = 1;
        f.referenced = true;
        f.dirty = false;
        self.resident.insert(page_id, slot);
        Ok(slot)
    }

    fn unpin(&mut self, slot: usize) {
        debug_assert!(self.frames[slot].pin_count > 0);
        self.frames[slot].pin_count -= 1;
    }

    /// Flushes every resident dirty frame. There is no flush barrier during
    /// normal operation (writeback is lazy, tied to eviction); this is only
    /// called at database teardown.
    pub fn flush_all(&mut self) -> Result<(), Error> {
        for slot in 0..self.frames.len() {
            if self.frames[slot].dirty {
                if let Some(page_id) = self.frames[slot].page_id {
                    let bytes = self.frames[slot].bytes.clone();
                    self.disk.write_page(page_id, &bytes)?;
                    self.frames[slot].dirty = false;
                }
            }
        }
        self.disk.flush()?;
        Ok(())
    }
}

/// A pinned, reference-counted handle onto a resident page's bytes.
/// Dropping the handle releases the pin on every exit path, including
/// unwinding, since it is driven by `Drop` rather than explicit release
/// calls.
pub struct PageHandle {
    pool: Rc<RefCell<BufferPool>>,
    slot: usize,
    page_id: PageIndex,
}

impl PageHandle {
    pub fn get(pool: &Rc<RefCell<BufferPool>>, page_id: PageIndex) -> Result<Self, Error> {
        let slot = pool.borrow_mut().pin_slot(page_id)?;
        Ok(PageHandle {
            pool: Rc::clone(pool),
            slot,
            page_id,
        })
    }

    pub fn page_id(&self) -> PageIndex {
        self.page_id
    }

    /// Borrows the frame's bytes for the duration of `f`. Kept as a
    /// closure-scoped borrow rather than returning a `Ref` directly, since
    /// the bytes live behind the pool's `RefCell`, not the handle itself.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let pool = self.pool.borrow();
        f(&pool.frames[self.slot].bytes)
    }

    /// Mutably borrows the frame's bytes and marks it dirty.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut pool = self.pool.borrow_mut();
        pool.frames[self.slot].dirty = true;
        f(&mut pool.frames[self.slot].bytes)
    }
}

impl Drop for PageHandle {
    fn drop(&mut self) {
        self.pool.borrow_mut().unpin(self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskPagedFile;

    fn fresh_pool(num_frames: usize, num_pages: u32) -> Rc<RefCell<BufferPool>> {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "ferrodb_bp_test_{}_{}",
            num_pages,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let mut disk = DiskPagedFile::open(&path, true).unwrap();
        for _ in 0..num_pages {
            disk.allocate_page().unwrap();
        }
        Rc::new(RefCell::new(BufferPool::new(disk, num_frames)))
    }

    #[test]
    fn second_pass_over_resident_working_set_is_free() {
        let pool = fresh_pool(5, 5);
        for pass in 0..2 {
            for page in 0..5u32 {
                let h = PageHandle::get(&pool, page).unwrap();
                assert_eq!(h.page_id(), page);
                drop(h);
            }
            let _ = pass;
        }
        // With 5 frames and 5 distinct pages, nothing should ever have been
        // evicted, so this just needs to not return OutOfFrames.
    }

    #[test]
    fn pinning_every_frame_exhausts_the_pool() {
        let pool = fresh_pool(2, 3);
        let _h0 = PageHandle::get(&pool, 0).unwrap();
        let _h1 = PageHandle::get(&pool, 1).unwrap();
        let err = PageHandle::get(&pool, 2);
        assert!(matches!(err, Err(Error::OutOfFrames(2))));
    }

    #[test]
    fn dirty_frame_is_written_back_on_eviction() {
        let pool = fresh_pool(1, 2);
        {
            let h = PageHandle::get(&pool, 0).unwrap();
            h.with_bytes_mut(|b| b[0] = 0x42);
        }
        // Only one frame: pulling page 1 forces eviction of page 0.
        {
            let _h = PageHandle::get(&pool, 1).unwrap();
        }
        let h = PageHandle::get(&pool, 0).unwrap();
        h.with_bytes(|b| assert_eq!(b[0], 0x42));
    }
}
