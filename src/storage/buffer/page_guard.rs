use std::cell::Cell;
use std::sync::Arc;

use log::debug;

use crate::common::types::{PageId, PagePtr, PageReadGuard, PageWriteGuard};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::BufferPoolManager;

/// Scoped pin on a buffer pool page.
///
/// The guard keeps the frame pinned for its lifetime and unpins on drop,
/// passing along the accumulated dirty flag. Latching is separate: callers
/// take the page latch through [`read`](Self::read) / [`write`](Self::write)
/// for as long (crabbing) or as briefly (iterator steps) as they need.
pub struct PageGuard {
    bpm: Arc<BufferPoolManager>,
    page: PagePtr,
    page_id: PageId,
    dirty: Cell<bool>,
}

impl PageGuard {
    /// Fetch and pin an existing page.
    pub fn fetch(bpm: Arc<BufferPoolManager>, page_id: PageId) -> Result<Self, BufferPoolError> {
        let page = bpm.fetch_page(page_id)?;
        Ok(Self {
            bpm,
            page,
            page_id,
            dirty: Cell::new(false),
        })
    }

    /// Allocate and pin a fresh page. New pages start dirty: their zeroed
    /// contents have never been written out.
    pub fn new_page(bpm: Arc<BufferPoolManager>) -> Result<Self, BufferPoolError> {
        let (page, page_id) = bpm.new_page()?;
        Ok(Self {
            bpm,
            page,
            page_id,
            dirty: Cell::new(true),
        })
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> &PagePtr {
        &self.page
    }

    /// Record that the caller modified the page; applied at unpin time.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    /// Take the page latch in shared mode. The returned guard owns its
    /// reference and may outlive borrows of `self`.
    pub fn read(&self) -> PageReadGuard {
        self.page.read_arc()
    }

    /// Take the page latch in exclusive mode.
    pub fn write(&self) -> PageWriteGuard {
        self.page.write_arc()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if let Err(e) = self.bpm.unpin_page(self.page_id, self.dirty.get()) {
            debug!("unpin of page {} on guard drop failed: {}", self.page_id, e);
        }
    }
}
