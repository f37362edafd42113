use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{BTreeNode, LeafNode, INTERNAL_PAGE_TYPE};
use crate::index::btree::serialization::decode_node;
use crate::storage::buffer::{BufferPoolManager, PageGuard};

use super::base::BPlusTree;

impl<K: IndexKey> BPlusTree<K> {
    /// Forward cursor over all entries, starting at the leftmost leaf.
    pub fn iter(&self) -> Result<IndexIterator<K>, BTreeError> {
        match self.find_leaf(None)? {
            Some(leaf) => Ok(IndexIterator::new(self.buffer_pool().clone(), leaf.page_id, 0)),
            None => Ok(IndexIterator::empty(self.buffer_pool().clone())),
        }
    }

    /// Forward cursor starting at the first entry with key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<IndexIterator<K>, BTreeError> {
        match self.find_leaf(Some(key))? {
            Some(leaf) => {
                let index = leaf.key_index(key);
                Ok(IndexIterator::new(self.buffer_pool().clone(), leaf.page_id, index))
            }
            None => Ok(IndexIterator::empty(self.buffer_pool().clone())),
        }
    }
}

/// Lazy forward traversal of the leaf chain.
///
/// Each step pins the current leaf, takes its read latch just long enough to
/// copy one entry, and unpins again, so a long scan never blocks writers for
/// more than a step. Concurrent modifications may therefore be partially
/// observed; this engine accepts that.
pub struct IndexIterator<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    current_page_id: PageId,
    current_index: usize,
    _key: PhantomData<fn() -> K>,
}

impl<K: IndexKey> IndexIterator<K> {
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        page_id: PageId,
        index: usize,
    ) -> Self {
        Self {
            buffer_pool,
            current_page_id: page_id,
            current_index: index,
            _key: PhantomData,
        }
    }

    pub(crate) fn empty(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self::new(buffer_pool, INVALID_PAGE_ID, 0)
    }

    /// True exactly on the tail leaf with the cursor past the last slot.
    pub fn is_end(&self) -> bool {
        if self.current_page_id == INVALID_PAGE_ID {
            return true;
        }
        match self.read_leaf() {
            Ok(leaf) => {
                leaf.next_page_id == INVALID_PAGE_ID && self.current_index >= leaf.size()
            }
            Err(_) => true,
        }
    }

    fn read_leaf(&self) -> Result<LeafNode<K>, BTreeError> {
        let guard = PageGuard::fetch(self.buffer_pool.clone(), self.current_page_id)?;
        let latch = guard.read();
        match decode_node::<K>(&latch)? {
            BTreeNode::Leaf(leaf) => Ok(leaf),
            BTreeNode::Internal(_) => Err(BTreeError::InvalidPageFormat {
                page_id: self.current_page_id,
                page_type: INTERNAL_PAGE_TYPE,
            }),
        }
    }
}

impl<K: IndexKey> Iterator for IndexIterator<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            if self.current_page_id == INVALID_PAGE_ID {
                return None;
            }
            let leaf = match self.read_leaf() {
                Ok(leaf) => leaf,
                Err(e) => {
                    debug!("index scan ended early: {}", e);
                    self.current_page_id = INVALID_PAGE_ID;
                    return None;
                }
            };

            if self.current_index < leaf.size() {
                let item = leaf.entries[self.current_index];
                self.current_index += 1;
                // Stepping off the last slot of a non-tail leaf lands on the
                // next leaf's first slot.
                if self.current_index >= leaf.size() && leaf.next_page_id != INVALID_PAGE_ID {
                    self.current_page_id = leaf.next_page_id;
                    self.current_index = 0;
                }
                return Some(item);
            }

            if leaf.next_page_id == INVALID_PAGE_ID {
                return None;
            }
            self.current_page_id = leaf.next_page_id;
            self.current_index = 0;
        }
    }
}
