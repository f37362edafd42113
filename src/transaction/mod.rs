pub mod concurrency;

pub use concurrency::lock_manager::{LockManager, LockMode};
pub use concurrency::transaction::{Transaction, TransactionError, TransactionState};
pub use concurrency::transaction_manager::TransactionManager;
