//! The disk paged file: random-access read/write of fixed-size pages, keyed
//! by page index, with append-only allocation of new pages.
//!
//! This is the bottom of the storage stack: everything above it
//! (buffer pool, page providers) goes through here for the actual bytes.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::value::PageIndex;

pub const PAGE_SIZE: usize = crate::value::PAGE_SIZE;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to open database file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read page {page}: {source}")]
    Read {
        page: PageIndex,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write page {page}: {source}")]
    Write {
        page: PageIndex,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to extend file to allocate a new page: {0}")]
    Allocate(#[source] std::io::Error),
    #[error("page {0} does not exist in this file")]
    NoSuchPage(PageIndex),
}

/// Owns one open file and hands out fixed-size page buffers by index.
/// Page 0 is the first page of the file; there is no reserved header page
/// at this layer (any header-page convention is a concern of the layer
/// above, e.g. the B+tree's metadata page at index 0).
pub struct DiskPagedFile {
    file: File,
    page_count: PageIndex,
}

impl DiskPagedFile {
    /// Opens an existing file, or creates it if `create` is set. A freshly
    /// created file starts with zero pages.
    pub fn open(path: impl AsRef<Path>, create: bool) -> Result<Self, Error> {
        let path_ref = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path_ref)
            .map_err(|source| Error::Open {
                path: path_ref.display().to_string(),
                source,
            })?;
        let len = file
            .metadata()
            .map_err(|source| Error::Open {
                path: path_ref.display().to_string(),
                source,
            })?
            .len();
        let page_count = (len / PAGE_SIZE as u64) as PageIndex;
        log::debug!(
            "opened paged file {} with {} existing pages",
            path_ref.display(),
            page_count
        );
        Ok(DiskPagedFile { file, page_count })
    }

    pub fn page_count(&self) -> PageIndex {
        self.page_count
    }

    /// Reads page `index` into `buffer`, which must be exactly `PAGE_SIZE`
    /// bytes.
    pub fn read_page(&mut self, index: PageIndex, buffer: &mut [u8]) -> Result<(), Error> {
        debug_assert_eq!(buffer.len(), PAGE_SIZE);
        if index >= self.page_count {
            return Err(Error::NoSuchPage(index));
        }
        self.file
            .seek(SeekFrom::Start(index as u64 * PAGE_SIZE as u64))
            .map_err(|source| Error::Read { page: index, source })?;
        self.file
            .read_exact(buffer)
            .map_err(|source| Error::Read { page: index, source })
    }

    /// Writes `buffer` (exactly `PAGE_SIZE` bytes) to page `index`.
    pub fn write_page(&mut self, index: PageIndex, buffer: &[u8]) -> Result<(), Error> {
        debug_assert_eq!(buffer.len(), PAGE_SIZE);
        if index >= self.page_count {
            return Err(Error::NoSuchPage(index));
        }
        self.file
            .seek(SeekFrom::Start(index as u64 * PAGE_SIZE as u64))
            .map_err(|source| Error::Write { page: index, source })?;
        self.file
            .write_all(buffer)
            .map_err(|source| Error::Write { page: index, source })
    }

    /// Extends the file by one zero-filled page and returns its index.
    pub fn allocate_page(&mut self) -> Result<PageIndex, Error> {
        let new_index = self.page_count;
        self.file
            .seek(SeekFrom::Start(new_index as u64 * PAGE_SIZE as u64))
            .map_err(Error::Allocate)?;
        self.file
            .write_all(&[0u8; PAGE_SIZE])
            .map_err(Error::Allocate)?;
        self.page_count += 1;
        log::debug!("allocated page {new_index}");
        Ok(new_index)
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.file.flush().map_err(Error::Allocate)
    }
}
