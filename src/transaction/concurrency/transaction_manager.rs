use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    Transaction, TransactionError, TransactionState,
};

/// Creates and tracks transactions. Commit and abort both run the 2PL
/// shrinking phase: every held lock is released through the lock manager
/// before the transaction reaches its terminal state.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Begin a new transaction; ids are monotonically increasing, so the
    /// largest id in any deadlock is the youngest participant.
    pub fn begin(&self) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id));
        self.active_transactions
            .lock()
            .insert(txn_id, txn.clone());
        txn
    }

    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Commit: release all locks, mark COMMITTED, retire the transaction.
    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if self.get_transaction(txn.id()).is_none() {
            return Err(TransactionError::NotFound(txn.id()));
        }

        self.release_all_locks(txn);
        txn.set_state(TransactionState::Committed);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    /// Abort: mark ABORTED first so concurrent lock waits bail out, then
    /// release everything the transaction still holds.
    pub fn abort(&self, txn: &Arc<Transaction>) -> Result<(), TransactionError> {
        if self.get_transaction(txn.id()).is_none() {
            return Err(TransactionError::NotFound(txn.id()));
        }

        txn.set_state(TransactionState::Aborted);
        self.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        Ok(())
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        let mut ids: Vec<TxnId> = self.active_transactions.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        // Snapshot first: unlock mutates the sets under the table latch.
        for rid in txn.locked_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Rid;
    use std::time::Duration;

    fn setup() -> (Arc<LockManager>, TransactionManager) {
        let lm = Arc::new(LockManager::new(Duration::from_millis(50)));
        let tm = TransactionManager::new(lm.clone());
        (lm, tm)
    }

    #[test]
    fn test_begin_assigns_increasing_ids() {
        let (_, tm) = setup();
        let t1 = tm.begin();
        let t2 = tm.begin();
        assert!(t2.id() > t1.id());
        assert_eq!(tm.active_transaction_ids(), vec![t1.id(), t2.id()]);
    }

    #[test]
    fn test_commit_releases_locks() {
        let (lm, tm) = setup();
        let t1 = tm.begin();
        let t2 = tm.begin();
        let rid = Rid::new(1, 0);

        assert!(lm.lock_exclusive(&t1, rid).unwrap());
        tm.commit(&t1).unwrap();
        assert_eq!(t1.state(), TransactionState::Committed);
        assert!(tm.get_transaction(t1.id()).is_none());

        // the released lock is immediately grantable
        assert!(lm.lock_exclusive(&t2, rid).unwrap());
    }

    #[test]
    fn test_abort_releases_locks() {
        let (lm, tm) = setup();
        let t1 = tm.begin();
        let t2 = tm.begin();
        let rid = Rid::new(2, 5);

        assert!(lm.lock_shared(&t1, rid).unwrap());
        tm.abort(&t1).unwrap();
        assert_eq!(t1.state(), TransactionState::Aborted);
        assert!(!t1.is_shared_locked(rid));

        assert!(lm.lock_exclusive(&t2, rid).unwrap());
    }

    #[test]
    fn test_commit_unknown_transaction_fails() {
        let (_, tm) = setup();
        let txn = tm.begin();
        tm.commit(&txn).unwrap();
        assert!(matches!(
            tm.commit(&txn),
            Err(TransactionError::NotFound(_))
        ));
    }
}
