use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PAGE_SIZE};
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{BTreeNode, INTERNAL_PAGE_TYPE, LEAF_PAGE_TYPE};

use super::layout::*;

/// Serialize a node to its page, overwriting the previous contents.
///
/// Panics if the node does not fit: the tree's max sizes are validated
/// against the page capacity at construction, so an overflow here is a
/// structural invariant violation.
pub fn encode_node<K: IndexKey>(node: &BTreeNode<K>, page: &mut Page) {
    page.data.fill(0);

    let (page_type, size, max_size, parent, page_id) = match node {
        BTreeNode::Leaf(n) => (LEAF_PAGE_TYPE, n.size(), n.max_size, n.parent_page_id, n.page_id),
        BTreeNode::Internal(n) => {
            (INTERNAL_PAGE_TYPE, n.size(), n.max_size, n.parent_page_id, n.page_id)
        }
    };

    LittleEndian::write_u32(&mut page.data[PAGE_TYPE_OFFSET..], page_type);
    LittleEndian::write_u32(&mut page.data[LSN_OFFSET..], 0);
    LittleEndian::write_i32(&mut page.data[SIZE_OFFSET..], size as i32);
    LittleEndian::write_i32(&mut page.data[MAX_SIZE_OFFSET..], max_size as i32);
    LittleEndian::write_i32(&mut page.data[PARENT_PAGE_ID_OFFSET..], parent);
    LittleEndian::write_i32(&mut page.data[PAGE_ID_OFFSET..], page_id);

    match node {
        BTreeNode::Leaf(n) => {
            LittleEndian::write_i32(&mut page.data[NEXT_PAGE_ID_OFFSET..], n.next_page_id);

            let entry_size = K::SIZE + RID_SIZE;
            assert!(
                LEAF_HEADER_SIZE + n.size() * entry_size <= PAGE_SIZE,
                "leaf node overflows page {}",
                n.page_id
            );
            let mut offset = LEAF_HEADER_SIZE;
            for (key, rid) in &n.entries {
                key.write_to(&mut page.data[offset..offset + K::SIZE]);
                offset += K::SIZE;
                LittleEndian::write_i32(&mut page.data[offset..], rid.page_id);
                LittleEndian::write_u32(&mut page.data[offset + 4..], rid.slot_num);
                offset += RID_SIZE;
            }
        }
        BTreeNode::Internal(n) => {
            let entry_size = K::SIZE + CHILD_SIZE;
            assert!(
                COMMON_HEADER_SIZE + n.size() * entry_size <= PAGE_SIZE,
                "internal node overflows page {}",
                n.page_id
            );
            let mut offset = COMMON_HEADER_SIZE;
            for (key, child) in &n.entries {
                key.write_to(&mut page.data[offset..offset + K::SIZE]);
                offset += K::SIZE;
                LittleEndian::write_i32(&mut page.data[offset..], *child);
                offset += CHILD_SIZE;
            }
        }
    }
}

/// Patch only the parent pointer of an already-encoded node page. Used when
/// a split or merge reparents children wholesale.
pub fn write_parent_page_id(page: &mut Page, parent_page_id: i32) {
    LittleEndian::write_i32(&mut page.data[PARENT_PAGE_ID_OFFSET..], parent_page_id);
}
