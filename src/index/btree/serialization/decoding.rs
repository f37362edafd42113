use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, Rid};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{
    BTreeNode, InternalNode, LeafNode, INTERNAL_PAGE_TYPE, LEAF_PAGE_TYPE,
};

use super::layout::*;

/// The raw type tag of a node page.
pub fn read_page_type(page: &Page) -> u32 {
    LittleEndian::read_u32(&page.data[PAGE_TYPE_OFFSET..])
}

/// Deserialize a node from its page.
pub fn decode_node<K: IndexKey>(page: &Page) -> Result<BTreeNode<K>, BTreeError> {
    let page_type = read_page_type(page);
    let size = LittleEndian::read_i32(&page.data[SIZE_OFFSET..]) as usize;
    let max_size = LittleEndian::read_i32(&page.data[MAX_SIZE_OFFSET..]) as usize;
    let parent_page_id = LittleEndian::read_i32(&page.data[PARENT_PAGE_ID_OFFSET..]);
    let page_id = LittleEndian::read_i32(&page.data[PAGE_ID_OFFSET..]);

    match page_type {
        LEAF_PAGE_TYPE => {
            let next_page_id = LittleEndian::read_i32(&page.data[NEXT_PAGE_ID_OFFSET..]);
            let mut entries = Vec::with_capacity(size);
            let mut offset = LEAF_HEADER_SIZE;
            for _ in 0..size {
                let key = K::read_from(&page.data[offset..offset + K::SIZE]);
                offset += K::SIZE;
                let rid_page = LittleEndian::read_i32(&page.data[offset..]);
                let rid_slot = LittleEndian::read_u32(&page.data[offset + 4..]);
                offset += RID_SIZE;
                entries.push((key, Rid::new(rid_page, rid_slot)));
            }
            Ok(BTreeNode::Leaf(LeafNode {
                page_id,
                parent_page_id,
                max_size,
                next_page_id,
                entries,
            }))
        }
        INTERNAL_PAGE_TYPE => {
            let mut entries = Vec::with_capacity(size);
            let mut offset = COMMON_HEADER_SIZE;
            for _ in 0..size {
                let key = K::read_from(&page.data[offset..offset + K::SIZE]);
                offset += K::SIZE;
                let child = LittleEndian::read_i32(&page.data[offset..]);
                offset += CHILD_SIZE;
                entries.push((key, child));
            }
            Ok(BTreeNode::Internal(InternalNode {
                page_id,
                parent_page_id,
                max_size,
                entries,
            }))
        }
        other => Err(BTreeError::InvalidPageFormat {
            page_id: page.page_id,
            page_type: other,
        }),
    }
}
