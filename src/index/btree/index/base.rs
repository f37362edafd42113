use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};

use crate::common::types::{PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{BTreeNode, LeafNode};
use crate::index::btree::serialization::{
    decode_node, encode_node, internal_capacity, leaf_capacity,
};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager, PageGuard};
use crate::storage::page as header_page;

/// A pinned page together with its held write latch; the unit of the
/// crabbing chain on insert and delete descents.
///
/// Field order matters: the latch drops before the pin.
pub(crate) struct LatchedPage {
    latch: crate::common::types::PageWriteGuard,
    guard: PageGuard,
}

impl LatchedPage {
    /// Fetch and write-latch an existing page.
    pub(crate) fn acquire(
        bpm: &Arc<BufferPoolManager>,
        page_id: PageId,
    ) -> Result<Self, BufferPoolError> {
        let guard = PageGuard::fetch(bpm.clone(), page_id)?;
        let latch = guard.write();
        Ok(Self { latch, guard })
    }

    /// Allocate and write-latch a fresh page.
    pub(crate) fn allocate(bpm: &Arc<BufferPoolManager>) -> Result<Self, BufferPoolError> {
        let guard = PageGuard::new_page(bpm.clone())?;
        let latch = guard.write();
        Ok(Self { latch, guard })
    }

    pub(crate) fn page_id(&self) -> PageId {
        self.guard.page_id()
    }

    pub(crate) fn decode<K: IndexKey>(&self) -> Result<BTreeNode<K>, BTreeError> {
        decode_node(&self.latch)
    }

    pub(crate) fn write_node<K: IndexKey>(&mut self, node: &BTreeNode<K>) {
        encode_node(node, &mut self.latch);
        self.guard.mark_dirty();
    }

    /// Patch only the parent pointer; cheaper than a full re-encode when a
    /// split or merge reparents children wholesale.
    pub(crate) fn patch_parent(&mut self, parent: PageId) {
        crate::index::btree::serialization::write_parent_page_id(&mut self.latch, parent);
        self.guard.mark_dirty();
    }
}

/// Guard on the tree's root pointer. Write descents treat it as the zeroth
/// link of the latch chain: held until a safe child proves the root cannot
/// change, then released together with the ancestor latches.
pub(crate) type RootGuard<'a> = RwLockWriteGuard<'a, PageId>;

/// Locate a chain member by page id.
pub(crate) fn chain_entry(chain: &mut [LatchedPage], page_id: PageId) -> Option<&mut LatchedPage> {
    chain.iter_mut().find(|lp| lp.page_id() == page_id)
}

/// Detach a chain member (its latch and pin drop with the returned value).
pub(crate) fn chain_remove(chain: &mut Vec<LatchedPage>, page_id: PageId) -> Option<LatchedPage> {
    let pos = chain.iter().position(|lp| lp.page_id() == page_id)?;
    Some(chain.remove(pos))
}

/// B+Tree index over paged storage with latch-crabbing concurrency.
///
/// Keys are unique; leaf values are rids. The root page id is mirrored in
/// the header page record for `index_name` on every root change.
pub struct BPlusTree<K: IndexKey> {
    index_name: String,
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: RwLock<PageId>,
    leaf_max_size: usize,
    internal_max_size: usize,
    _key: PhantomData<fn() -> K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Open the index named `index_name`, creating its header record if this
    /// is the first time the name is seen. An existing record resumes the
    /// tree at its recorded root.
    pub fn new(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 2, "leaf_max_size must be at least 2");
        assert!(internal_max_size >= 3, "internal_max_size must be at least 3");
        assert!(
            leaf_max_size <= leaf_capacity::<K>(),
            "leaf_max_size {} exceeds page capacity {}",
            leaf_max_size,
            leaf_capacity::<K>()
        );
        assert!(
            internal_max_size <= internal_capacity::<K>(),
            "internal_max_size {} exceeds page capacity {}",
            internal_max_size,
            internal_capacity::<K>()
        );

        let index_name = index_name.into();

        let header = PageGuard::fetch(buffer_pool.clone(), HEADER_PAGE_ID)?;
        let root_page_id = {
            let mut page = header.write();
            match header_page::get_record(&page, &index_name) {
                Some(recorded) => recorded,
                None => {
                    let inserted =
                        header_page::insert_record(&mut page, &index_name, INVALID_PAGE_ID);
                    assert!(inserted, "header page cannot hold another index record");
                    header.mark_dirty();
                    INVALID_PAGE_ID
                }
            }
        };
        drop(header);

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: RwLock::new(root_page_id),
            leaf_max_size,
            internal_max_size,
            _key: PhantomData,
        })
    }

    /// Open with max sizes derived from the page capacity for `K`.
    pub fn with_default_sizes(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
    ) -> Result<Self, BTreeError> {
        let leaf_max = leaf_capacity::<K>();
        let internal_max = internal_capacity::<K>();
        Self::new(index_name, buffer_pool, leaf_max, internal_max)
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    pub(crate) fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.buffer_pool
    }

    pub(crate) fn leaf_max_size(&self) -> usize {
        self.leaf_max_size
    }

    pub(crate) fn internal_max_size(&self) -> usize {
        self.internal_max_size
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub(crate) fn lock_root_for_write(&self) -> RootGuard<'_> {
        self.root_page_id.write()
    }

    /// Point lookup with reader crabbing: latch the child, then release the
    /// parent, root to leaf.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let root_guard = self.root_page_id.read();
        let root_id = *root_guard;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = PageGuard::fetch(self.buffer_pool.clone(), root_id)?;
        let mut latch = guard.read();
        drop(root_guard);

        loop {
            match decode_node::<K>(&latch)? {
                BTreeNode::Leaf(leaf) => return Ok(leaf.lookup(key)),
                BTreeNode::Internal(internal) => {
                    let child_id = internal.lookup(key);
                    let child_guard = PageGuard::fetch(self.buffer_pool.clone(), child_id)?;
                    let child_latch = child_guard.read();
                    drop(latch);
                    drop(guard);
                    guard = child_guard;
                    latch = child_latch;
                }
            }
        }
    }

    /// Descend read-latched to a leaf: the leftmost one, or the one whose
    /// range covers `key`. Returns the leaf's page id and decoded contents.
    pub(crate) fn find_leaf(&self, key: Option<&K>) -> Result<Option<LeafNode<K>>, BTreeError> {
        let root_guard = self.root_page_id.read();
        let root_id = *root_guard;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = PageGuard::fetch(self.buffer_pool.clone(), root_id)?;
        let mut latch = guard.read();
        drop(root_guard);

        loop {
            match decode_node::<K>(&latch)? {
                BTreeNode::Leaf(leaf) => return Ok(Some(leaf)),
                BTreeNode::Internal(internal) => {
                    let child_id = match key {
                        Some(k) => internal.lookup(k),
                        None => internal.value_at(0),
                    };
                    let child_guard = PageGuard::fetch(self.buffer_pool.clone(), child_id)?;
                    let child_latch = child_guard.read();
                    drop(latch);
                    drop(guard);
                    guard = child_guard;
                    latch = child_latch;
                }
            }
        }
    }

    /// Mirror a root change into the header page record.
    pub(crate) fn update_root_record(&self, root_page_id: PageId) -> Result<(), BTreeError> {
        let header = PageGuard::fetch(self.buffer_pool.clone(), HEADER_PAGE_ID)?;
        {
            let mut page = header.write();
            if !header_page::update_record(&mut page, &self.index_name, root_page_id) {
                let inserted =
                    header_page::insert_record(&mut page, &self.index_name, root_page_id);
                assert!(inserted, "header page cannot hold another index record");
            }
        }
        header.mark_dirty();
        Ok(())
    }
}
