pub mod error;
pub mod index;
pub mod key;
pub mod node;
pub mod serialization;

pub use error::BTreeError;
pub use index::{BPlusTree, IndexIterator};
pub use key::{GenericKey, IndexKey};
pub use node::{BTreeNode, InternalNode, LeafNode};
pub use serialization::{decode_node, encode_node, internal_capacity, leaf_capacity};
