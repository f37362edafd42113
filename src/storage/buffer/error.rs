use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::disk::DiskManagerError;

#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("page {0} is not resident in the buffer pool")]
    PageNotFound(PageId),

    #[error("page {0} is pinned")]
    PagePinned(PageId),

    #[error("page {0} is not pinned")]
    PageNotPinned(PageId),

    #[error("all frames are pinned, no page can be evicted")]
    BufferPoolFull,

    #[error("invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("disk error: {0}")]
    Disk(#[from] DiskManagerError),
}
