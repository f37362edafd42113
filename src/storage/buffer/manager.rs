use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// Per-frame bookkeeping, guarded by the pool latch.
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

/// Pool state that must change together: the page table, the free list, the
/// replacer and the frame metadata agree at every release of this latch.
struct PoolInner {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    frames: Vec<FrameMeta>,
}

/// BufferPoolManager brokers fixed-size in-memory frames against the disk
/// manager. Pages are pinned while in use; unpinned pages become eviction
/// candidates in LRU order. Victims come from the free list first, then the
/// replacer; dirty victims are written back before the frame is reused.
pub struct BufferPoolManager {
    pool_size: usize,
    pages: Vec<PagePtr>,
    inner: Mutex<PoolInner>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, disk_manager))
    }

    pub fn with_disk_manager(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        // Initially every frame is free.
        for frame_id in 0..pool_size {
            pages.push(Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            pages,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
                frames,
            }),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Fetch a page, pinning it. Resident pages are returned directly;
    /// otherwise a victim frame is freed up and the page is read from disk.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut inner = self.inner.lock();

        if let Some(frame_id) = inner.page_table.get(&page_id).copied() {
            inner.frames[frame_id].pin_count += 1;
            inner.replacer.pin(frame_id);
            return Ok(self.pages[frame_id].clone());
        }

        let frame_id = self.acquire_victim_frame(&mut inner)?;

        // Nobody can hold the frame's page latch here: the frame was either
        // free or had pin count zero, and latch holders keep a pin.
        {
            let mut page = self.pages[frame_id].write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                drop(page);
                inner.frames[frame_id].reset();
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }

        let meta = &mut inner.frames[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);

        Ok(self.pages[frame_id].clone())
    }

    /// Allocate a fresh zeroed page, pinned. Fails with `BufferPoolFull`
    /// exactly when no frame can be freed up.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.acquire_victim_frame(&mut inner)?;
        let page_id = match self.disk_manager.allocate_page() {
            Ok(pid) => pid,
            Err(e) => {
                inner.frames[frame_id].reset();
                inner.free_list.push_back(frame_id);
                return Err(e.into());
            }
        };

        self.pages[frame_id].write().reset(page_id);

        let meta = &mut inner.frames[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        inner.page_table.insert(page_id, frame_id);
        inner.replacer.pin(frame_id);

        Ok((self.pages[frame_id].clone(), page_id))
    }

    /// Drop one pin on a page. The dirty flag is sticky: once set it stays
    /// until the page is written back. When the pin count reaches zero the
    /// frame becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = *inner
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let meta = &mut inner.frames[frame_id];
        if meta.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }

        if is_dirty {
            meta.is_dirty = true;
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            inner.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a resident page's current bytes to disk and clear its dirty bit.
    ///
    /// The frame is pinned for the duration and the pool latch is dropped
    /// around the I/O, so a concurrent writer holding the page latch cannot
    /// deadlock against us.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let (frame_id, page) = {
            let mut inner = self.inner.lock();
            let frame_id = *inner
                .page_table
                .get(&page_id)
                .ok_or(BufferPoolError::PageNotFound(page_id))?;
            inner.frames[frame_id].pin_count += 1;
            inner.replacer.pin(frame_id);
            (frame_id, self.pages[frame_id].clone())
        };

        let result = {
            let guard = page.read();
            self.disk_manager.write_page(&guard)
        };

        let mut inner = self.inner.lock();
        let meta = &mut inner.frames[frame_id];
        if result.is_ok() {
            meta.is_dirty = false;
        }
        meta.pin_count -= 1;
        if meta.pin_count == 0 {
            inner.replacer.unpin(frame_id);
        }

        result.map_err(Into::into)
    }

    /// Flush every resident page.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let page_ids: Vec<PageId> = {
            let inner = self.inner.lock();
            inner.page_table.keys().copied().collect()
        };

        for page_id in page_ids {
            match self.flush_page(page_id) {
                Ok(()) => {}
                // Evicted between the snapshot and the flush; nothing to do.
                Err(BufferPoolError::PageNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Delete a page. Succeeds when the page is not resident or has no pins;
    /// on success the frame returns to the free list and the id is handed
    /// back to the disk manager.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = match inner.page_table.get(&page_id) {
            Some(&fid) => fid,
            None => {
                self.disk_manager.deallocate_page(page_id);
                return Ok(());
            }
        };

        if inner.frames[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        inner.page_table.remove(&page_id);
        inner.replacer.pin(frame_id);
        inner.frames[frame_id].reset();
        self.pages[frame_id].write().reset(INVALID_PAGE_ID);
        inner.free_list.push_back(frame_id);

        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Current pin count of a resident page (None when not resident).
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&fid| inner.frames[fid].pin_count)
    }

    /// Pick a frame for reuse: free list first, then LRU victim. A dirty
    /// victim is written back before its frame is handed out; on write-back
    /// failure the victim is returned to the replacer.
    fn acquire_victim_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            debug_assert_eq!(inner.frames[frame_id].page_id, INVALID_PAGE_ID);
            return Ok(frame_id);
        }

        let frame_id = inner
            .replacer
            .victim()
            .ok_or(BufferPoolError::BufferPoolFull)?;

        let meta = &inner.frames[frame_id];
        debug_assert_eq!(meta.pin_count, 0, "victim frame must be unpinned");

        let old_page_id = meta.page_id;
        if old_page_id != INVALID_PAGE_ID {
            if meta.is_dirty {
                // The victim is unpinned, so no one holds its page latch.
                let write_result = {
                    let guard = self.pages[frame_id].read();
                    self.disk_manager.write_page(&guard)
                };
                if let Err(e) = write_result {
                    inner.replacer.unpin(frame_id);
                    return Err(e.into());
                }
                inner.frames[frame_id].is_dirty = false;
            }
            inner.page_table.remove(&old_page_id);
            inner.frames[frame_id].page_id = INVALID_PAGE_ID;
        }

        Ok(frame_id)
    }
}
