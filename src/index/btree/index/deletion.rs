use log::debug;

use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::BufferPoolError;

use super::base::{chain_entry, chain_remove, BPlusTree, LatchedPage, RootGuard};

impl<K: IndexKey> BPlusTree<K> {
    /// Remove a key. Absent keys are a no-op.
    ///
    /// Writer crabbing as on insert, with the delete-safety test: ancestors
    /// are released once a child with size > min_size proves the deletion
    /// cannot propagate past it.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut root_guard = Some(self.lock_root_for_write());
        let root_id = **root_guard.as_ref().expect("root guard just taken");
        if root_id == INVALID_PAGE_ID {
            return Ok(());
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
                    if child.decode::<K>()?.is_delete_safe() {
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

        if !leaf.remove(key) {
            return Ok(());
        }
        let leaf_page_id = leaf.page_id;
        leaf_entry.write_node(&BTreeNode::Leaf(leaf));

        self.coalesce_or_redistribute(&mut chain, &mut root_guard, leaf_page_id)
    }

    /// Restore the occupancy invariant for an underflowing node, borrowing
    /// from or merging with a sibling and recursing on the parent.
    fn coalesce_or_redistribute<'a>(
        &'a self,
        chain: &mut Vec<LatchedPage>,
        root_guard: &mut Option<RootGuard<'a>>,
        node_page_id: PageId,
    ) -> Result<(), BTreeError> {
        let node = chain_entry(chain, node_page_id)
            .expect("underflow node missing from latch chain")
            .decode::<K>()?;

        if node.size() >= node.min_size() {
            return Ok(());
        }

        if matches!(root_guard, Some(guard) if **guard == node_page_id) {
            return self.adjust_root(chain, root_guard, node_page_id);
        }

        let parent_page_id = node.parent_page_id();
        let mut parent = {
            let parent_entry =
                chain_entry(chain, parent_page_id).expect("parent missing from latch chain");
            match parent_entry.decode::<K>()? {
                BTreeNode::Internal(internal) => internal,
                BTreeNode::Leaf(_) => unreachable!("leaf cannot be a parent"),
            }
        };

        let arr_id = parent
            .value_index(node_page_id)
            .expect("child missing from its parent");

        // Prefer the left sibling; only the leftmost child pairs rightward.
        let (sibling_index, node_is_right) = if arr_id >= 1 {
            (arr_id - 1, true)
        } else {
            (1, false)
        };
        let sibling_page_id = parent.value_at(sibling_index);
        // Latched under the held parent latch, so structural writers
        // targeting this sibling are already excluded.
        let mut sibling_page = LatchedPage::acquire(self.buffer_pool(), sibling_page_id)?;

        match (node, sibling_page.decode::<K>()?) {
            (BTreeNode::Leaf(mut node), BTreeNode::Leaf(mut sibling)) => {
                if node.size() + sibling.size() > node.max_size {
                    // Redistribute: one entry crosses the boundary and the
                    // separator follows the new first key.
                    if node_is_right {
                        sibling.move_last_to_front_of(&mut node);
                        parent.set_key_at(arr_id, node.entries[0].0);
                    } else {
                        sibling.move_first_to_end_of(&mut node);
                        parent.set_key_at(sibling_index, sibling.entries[0].0);
                    }
                    chain_entry(chain, node_page_id)
                        .expect("underflow node missing from latch chain")
                        .write_node(&BTreeNode::Leaf(node));
                    sibling_page.write_node(&BTreeNode::Leaf(sibling));
                    chain_entry(chain, parent_page_id)
                        .expect("parent missing from latch chain")
                        .write_node(&BTreeNode::Internal(parent));
                    return Ok(());
                }

                // Coalesce into whichever of the pair sits on the left; the
                // survivor inherits the sibling link of the deleted leaf.
                if node_is_right {
                    node.move_all_to(&mut sibling);
                    sibling_page.write_node(&BTreeNode::Leaf(sibling));
                    parent.remove_at(arr_id);
                    chain_entry(chain, parent_page_id)
                        .expect("parent missing from latch chain")
                        .write_node(&BTreeNode::Internal(parent));
                    drop(sibling_page);
                    let deleted = chain_remove(chain, node_page_id)
                        .expect("underflow node missing from latch chain");
                    drop(deleted);
                    self.delete_tree_page(node_page_id)?;
                } else {
                    sibling.move_all_to(&mut node);
                    chain_entry(chain, node_page_id)
                        .expect("underflow node missing from latch chain")
                        .write_node(&BTreeNode::Leaf(node));
                    parent.remove_at(sibling_index);
                    chain_entry(chain, parent_page_id)
                        .expect("parent missing from latch chain")
                        .write_node(&BTreeNode::Internal(parent));
                    drop(sibling_page);
                    self.delete_tree_page(sibling_page_id)?;
                }
            }
            (BTreeNode::Internal(mut node), BTreeNode::Internal(mut sibling)) => {
                if node.size() + sibling.size() > node.max_size {
                    // Redistribute one child through the parent separator.
                    if node_is_right {
                        let middle_key = parent.key_at(arr_id);
                        let new_separator = sibling.move_last_to_front_of(&mut node, middle_key);
                        parent.set_key_at(arr_id, new_separator);
                        let moved_child = node.value_at(0);
                        self.reparent_child(chain, moved_child, node.page_id)?;
                    } else {
                        let middle_key = parent.key_at(sibling_index);
                        let new_separator = sibling.move_first_to_end_of(&mut node, middle_key);
                        parent.set_key_at(sibling_index, new_separator);
                        let moved_child = node.value_at(node.size() - 1);
                        self.reparent_child(chain, moved_child, node.page_id)?;
                    }
                    chain_entry(chain, node_page_id)
                        .expect("underflow node missing from latch chain")
                        .write_node(&BTreeNode::Internal(node));
                    sibling_page.write_node(&BTreeNode::Internal(sibling));
                    chain_entry(chain, parent_page_id)
                        .expect("parent missing from latch chain")
                        .write_node(&BTreeNode::Internal(parent));
                    return Ok(());
                }

                // Coalesce, pulling the separator down between the halves.
                if node_is_right {
                    let middle_key = parent.key_at(arr_id);
                    let moved: Vec<PageId> = node.children().collect();
                    node.move_all_to(&mut sibling, middle_key);
                    for child in moved {
                        self.reparent_child(chain, child, sibling.page_id)?;
                    }
                    sibling_page.write_node(&BTreeNode::Internal(sibling));
                    parent.remove_at(arr_id);
                    chain_entry(chain, parent_page_id)
                        .expect("parent missing from latch chain")
                        .write_node(&BTreeNode::Internal(parent));
                    drop(sibling_page);
                    let deleted = chain_remove(chain, node_page_id)
                        .expect("underflow node missing from latch chain");
                    drop(deleted);
                    self.delete_tree_page(node_page_id)?;
                } else {
                    let middle_key = parent.key_at(sibling_index);
                    let moved: Vec<PageId> = sibling.children().collect();
                    sibling.move_all_to(&mut node, middle_key);
                    for child in moved {
                        self.reparent_child(chain, child, node.page_id)?;
                    }
                    chain_entry(chain, node_page_id)
                        .expect("underflow node missing from latch chain")
                        .write_node(&BTreeNode::Internal(node));
                    parent.remove_at(sibling_index);
                    chain_entry(chain, parent_page_id)
                        .expect("parent missing from latch chain")
                        .write_node(&BTreeNode::Internal(parent));
                    drop(sibling_page);
                    self.delete_tree_page(sibling_page_id)?;
                }
            }
            _ => panic!("sibling node kind differs from node at page {}", node_page_id),
        }

        self.coalesce_or_redistribute(chain, root_guard, parent_page_id)
    }

    /// Shrink the root: an internal root down to one child promotes that
    /// child; an emptied leaf root leaves the tree empty.
    fn adjust_root(
        &self,
        chain: &mut Vec<LatchedPage>,
        root_guard: &mut Option<RootGuard<'_>>,
        root_page_id: PageId,
    ) -> Result<(), BTreeError> {
        let root = chain_entry(chain, root_page_id)
            .expect("root missing from latch chain")
            .decode::<K>()?;

        match root {
            BTreeNode::Internal(node) if node.size() == 1 => {
                let child_id = node.value_at(0);
                self.reparent_child(chain, child_id, INVALID_PAGE_ID)?;

                let guard = root_guard.as_mut().expect("root change without root guard");
                **guard = child_id;
                self.update_root_record(child_id)?;

                let old_root = chain_remove(chain, root_page_id)
                    .expect("root missing from latch chain");
                drop(old_root);
                self.delete_tree_page(root_page_id)
            }
            BTreeNode::Leaf(node) if node.size() == 0 => {
                let guard = root_guard.as_mut().expect("root change without root guard");
                **guard = INVALID_PAGE_ID;
                self.update_root_record(INVALID_PAGE_ID)?;

                let old_root = chain_remove(chain, root_page_id)
                    .expect("root missing from latch chain");
                drop(old_root);
                self.delete_tree_page(root_page_id)
            }
            _ => Ok(()),
        }
    }

    /// Delete an emptied node page. A transient pin from a concurrent scan
    /// leaves the page orphaned instead of failing the structural operation.
    fn delete_tree_page(&self, page_id: PageId) -> Result<(), BTreeError> {
        match self.buffer_pool().delete_page(page_id) {
            Ok(()) => Ok(()),
            Err(BufferPoolError::PagePinned(_)) => {
                debug!("page {} still pinned by a scan, skipping delete", page_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
