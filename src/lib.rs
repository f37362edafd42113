// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::{BPlusTree, BTreeError, GenericKey, IndexIterator, IndexKey};
pub use storage::buffer::{BufferPoolError, BufferPoolManager, PageGuard};
pub use storage::disk::DiskManager;
pub use transaction::{LockManager, Transaction, TransactionManager, TransactionState};
