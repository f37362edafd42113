use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager handles page-granular I/O against a single database file.
///
/// Page ids map directly to file offsets (`page_id * PAGE_SIZE`). Page 0 is
/// reserved for the header page; `allocate_page` hands out ids from 1 up.
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicI32,
}

impl DiskManager {
    /// Open (or create) the database file at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        // Resume id allocation after the last page present in the file.
        // Page 0 is always reserved for the header page.
        let file_size = file.metadata()?.len();
        let next_page_id = ((file_size as usize + PAGE_SIZE - 1) / PAGE_SIZE).max(1) as PageId;

        Ok(Self {
            db_file: Mutex::new(file),
            next_page_id: AtomicI32::new(next_page_id),
        })
    }

    /// Read a page from disk into `page`.
    ///
    /// Reading past the end of the file yields a zeroed page: the file grows
    /// lazily, so a freshly allocated id that was never written reads back
    /// as all zeros.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            page.reset(page_id);
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = [0u8; PAGE_SIZE];
        let available = ((file_size - offset) as usize).min(PAGE_SIZE);
        // A tail page written short by a crash reads back zero padded.
        file.read_exact(&mut buffer[..available])?;

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;
        Ok(())
    }

    /// Write a page to disk at its id's offset.
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = page.page_id as u64 * PAGE_SIZE as u64;
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;
        Ok(())
    }

    /// Allocate a new page id. Ids are monotonically increasing and never 0.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        Ok(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Deallocate a page. Freelist management on disk is not implemented;
    /// the id is simply never handed out again.
    pub fn deallocate_page(&self, _page_id: PageId) {}
}
