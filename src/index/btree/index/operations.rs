use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};

use super::base::{chain_entry, BPlusTree, LatchedPage, RootGuard};

impl<K: IndexKey> BPlusTree<K> {
    /// Insert a key/rid pair. Returns false when the key already exists.
    ///
    /// Writer crabbing: the root pointer guard and every ancestor write latch
    /// stay held until a child that cannot split (size < max_size) proves the
    /// ancestors safe, at which point all of them are released at once.
    pub fn insert(&self, key: &K, rid: Rid) -> Result<bool, BTreeError> {
        let mut root_guard = Some(self.lock_root_for_write());
        let root_id = **root_guard.as_ref().expect("root guard just taken");

        if root_id == INVALID_PAGE_ID {
            let mut guard = root_guard.take().expect("root guard just taken");
            self.start_new_tree(&mut guard, key, rid)?;
            return Ok(true);
        }

        let mut chain: Vec<LatchedPage> = Vec::new();
        chain.push(LatchedPage::acquire(self.buffer_pool(), root_id)?);

        loop {
            let node = chain.last().expect("chain never empty").decode::<K>()?;
            match node {
                BTreeNode::Leaf(_) => break,
                BTreeNode::Internal(internal) => {
                    let child_id = internal.lookup(key);
                    let child = LatchedPage::acquire(self.buffer_pool(), child_id)?;
                    if child.decode::<K>()?.is_insert_safe() {
                        chain.clear();
                        root_guard = None;
                    }
                    chain.push(child);
                }
            }
        }

        let leaf_entry = chain.last_mut().expect("chain never empty");
        let mut leaf = match leaf_entry.decode::<K>()? {
            BTreeNode::Leaf(leaf) => leaf,
            BTreeNode::Internal(_) => unreachable!("descent ended on an internal node"),
        };

        if leaf.lookup(key).is_some() {
            return Ok(false);
        }

        if leaf.size() < self.leaf_max_size() {
            leaf.insert(*key, rid);
            leaf_entry.write_node(&BTreeNode::Leaf(leaf));
            return Ok(true);
        }

        // Leaf full: take the overflow entry, carve off the upper half into a
        // fresh right sibling, and push the separator into the parent. The
        // separator is the new sibling's first key.
        leaf.insert(*key, rid);

        let mut sibling_page = LatchedPage::allocate(self.buffer_pool())?;
        let mut new_leaf = LeafNode::new(
            sibling_page.page_id(),
            leaf.parent_page_id,
            self.leaf_max_size(),
        );
        new_leaf.entries = leaf.split_off_upper_half();
        new_leaf.next_page_id = leaf.next_page_id;
        leaf.next_page_id = new_leaf.page_id;

        let separator = new_leaf.entries[0].0;
        let old_page_id = leaf.page_id;
        leaf_entry.write_node(&BTreeNode::Leaf(leaf));
        sibling_page.write_node(&BTreeNode::Leaf(new_leaf));

        self.insert_into_parent(&mut chain, &mut root_guard, old_page_id, separator, sibling_page)?;
        Ok(true)
    }

    /// First insert into an empty tree: the new root is a leaf.
    fn start_new_tree(
        &self,
        root_guard: &mut RootGuard<'_>,
        key: &K,
        rid: Rid,
    ) -> Result<(), BTreeError> {
        let mut root_page = LatchedPage::allocate(self.buffer_pool())?;
        let mut leaf = LeafNode::new(root_page.page_id(), INVALID_PAGE_ID, self.leaf_max_size());
        leaf.insert(*key, rid);
        root_page.write_node(&BTreeNode::Leaf(leaf));

        **root_guard = root_page.page_id();
        self.update_root_record(root_page.page_id())
    }

    /// Hook `new_sibling` (freshly split off `old_page_id`) into the parent,
    /// splitting the parent recursively when it overflows.
    fn insert_into_parent<'a>(
        &'a self,
        chain: &mut Vec<LatchedPage>,
        root_guard: &mut Option<RootGuard<'a>>,
        old_page_id: PageId,
        key: K,
        mut new_sibling: LatchedPage,
    ) -> Result<(), BTreeError> {
        let splitting_root = matches!(root_guard, Some(guard) if **guard == old_page_id);

        if splitting_root {
            let mut root_page = LatchedPage::allocate(self.buffer_pool())?;
            let mut root_node = InternalNode::new(
                root_page.page_id(),
                INVALID_PAGE_ID,
                self.internal_max_size(),
            );
            root_node.populate_new_root(old_page_id, key, new_sibling.page_id());
            root_page.write_node(&BTreeNode::Internal(root_node));

            chain_entry(chain, old_page_id)
                .expect("split node missing from latch chain")
                .patch_parent(root_page.page_id());
            new_sibling.patch_parent(root_page.page_id());

            let guard = root_guard.as_mut().expect("root split without root guard");
            **guard = root_page.page_id();
            self.update_root_record(root_page.page_id())?;
            return Ok(());
        }

        let parent_page_id = {
            let old_entry =
                chain_entry(chain, old_page_id).expect("split node missing from latch chain");
            old_entry.decode::<K>()?.parent_page_id()
        };

        let mut parent = {
            let parent_entry =
                chain_entry(chain, parent_page_id).expect("parent missing from latch chain");
            match parent_entry.decode::<K>()? {
                BTreeNode::Internal(internal) => internal,
                BTreeNode::Leaf(_) => unreachable!("leaf cannot be a parent"),
            }
        };

        parent.insert_node_after(old_page_id, key, new_sibling.page_id());

        if parent.size() <= self.internal_max_size() {
            chain_entry(chain, parent_page_id)
                .expect("parent missing from latch chain")
                .write_node(&BTreeNode::Internal(parent));
            return Ok(());
        }

        // Parent overflowed. The middle key moves up rather than staying in
        // either half; it survives as the (unused) key of the new sibling's
        // entry 0.
        let middle_key = parent.key_at(parent.size() / 2);
        let mut new_parent_page = LatchedPage::allocate(self.buffer_pool())?;
        let mut new_parent = InternalNode::new(
            new_parent_page.page_id(),
            parent.parent_page_id,
            self.internal_max_size(),
        );
        new_parent.entries = parent.split_off_upper_half();
        debug_assert_eq!(new_parent.entries[0].0, middle_key);

        for child_id in new_parent.children().collect::<Vec<_>>() {
            if child_id == new_sibling.page_id() {
                new_sibling.patch_parent(new_parent_page.page_id());
            } else {
                self.reparent_child(chain, child_id, new_parent_page.page_id())?;
            }
        }

        chain_entry(chain, parent_page_id)
            .expect("parent missing from latch chain")
            .write_node(&BTreeNode::Internal(parent));
        new_parent_page.write_node(&BTreeNode::Internal(new_parent));

        self.insert_into_parent(chain, root_guard, parent_page_id, middle_key, new_parent_page)
    }

    /// Point a child's parent pointer at `new_parent`, reusing the held latch
    /// when the child sits on our own chain.
    pub(crate) fn reparent_child(
        &self,
        chain: &mut [LatchedPage],
        child_id: PageId,
        new_parent: PageId,
    ) -> Result<(), BTreeError> {
        if let Some(entry) = chain_entry(chain, child_id) {
            entry.patch_parent(new_parent);
            return Ok(());
        }
        let mut child = LatchedPage::acquire(self.buffer_pool(), child_id)?;
        child.patch_parent(new_parent);
        Ok(())
    }
}
