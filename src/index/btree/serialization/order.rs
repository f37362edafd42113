use crate::common::types::PAGE_SIZE;
use crate::index::btree::key::IndexKey;

use super::layout::{CHILD_SIZE, COMMON_HEADER_SIZE, LEAF_HEADER_SIZE, RID_SIZE};

/// Largest leaf max_size for which a full leaf (plus the transient overflow
/// entry held just before a split) still encodes into one page.
pub fn leaf_capacity<K: IndexKey>() -> usize {
    let per_entry = K::SIZE + RID_SIZE;
    ((PAGE_SIZE - LEAF_HEADER_SIZE) / per_entry).saturating_sub(1).max(2)
}

/// Largest internal max_size (child count) that still encodes into one page,
/// leaving room for the transient overflow entry held just before a split.
pub fn internal_capacity<K: IndexKey>() -> usize {
    let per_entry = K::SIZE + CHILD_SIZE;
    ((PAGE_SIZE - COMMON_HEADER_SIZE) / per_entry).saturating_sub(1).max(3)
}
