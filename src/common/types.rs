use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type. Disk pages are addressed by non-negative ids.
pub type PageId = i32;

/// Sentinel for "no page".
pub const INVALID_PAGE_ID: PageId = -1;

/// Page 0 holds the index-name -> root-page-id records.
pub const HEADER_PAGE_ID: PageId = 0;

/// Buffer pool frame ID type (slot index, 0..pool_size)
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = u32;

/// Slot number within a page
pub type SlotId = u32;

/// Record identifier: a (page, slot) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: SlotId,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: SlotId) -> Self {
        Self { page_id, slot_num }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_num)
    }
}

/// Page structure: a fixed-size byte buffer plus its identity.
///
/// The surrounding `RwLock` in [`PagePtr`] is the page latch; frame
/// bookkeeping (pin count, dirty flag) lives with the buffer pool.
pub struct Page {
    pub page_id: PageId,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            data: [0; PAGE_SIZE],
        }
    }

    pub fn reset(&mut self, page_id: PageId) {
        self.page_id = page_id;
        self.data.fill(0);
    }
}

/// Smart pointer to a latched page
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read latch on a page, holdable across scopes (latch crabbing)
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned write latch on a page, holdable across scopes (latch crabbing)
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;
