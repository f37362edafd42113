use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("page {page_id} is not a B+Tree page (type tag {page_type})")]
    InvalidPageFormat { page_id: PageId, page_type: u32 },

    #[error("buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}
