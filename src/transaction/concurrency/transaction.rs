use std::collections::HashSet;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Rid, TxnId};

/// Transaction lifecycle under strict two-phase locking: locks are only
/// acquired while GROWING; the first unlock moves the transaction to
/// SHRINKING. COMMITTED and ABORTED are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Abort-signalling policy violations. By the time one of these surfaces,
/// the offending transaction has already been marked ABORTED.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("transaction {0} aborted: lock requested while shrinking")]
    LockOnShrinking(TxnId),

    #[error("transaction {0} aborted: upgrade conflict on rid {1}")]
    UpgradeConflict(TxnId, Rid),

    #[error("transaction {0} not found")]
    NotFound(TxnId),
}

/// An active transaction: its 2PL state plus the rid sets it holds locks on.
///
/// The lock manager mutates the lock sets under its table latch; the state
/// is also flipped by the deadlock detector, so both live behind their own
/// locks and the struct is shared as `Arc<Transaction>`.
pub struct Transaction {
    id: TxnId,
    state: Mutex<TransactionState>,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
}

impl Transaction {
    pub fn new(id: TxnId) -> Self {
        Self {
            id,
            state: Mutex::new(TransactionState::Growing),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    /// Snapshot of every rid this transaction holds a lock on.
    pub fn locked_rids(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids.sort();
        rids.dedup();
        rids
    }

    pub(crate) fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub(crate) fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    /// Move a rid from the shared to the exclusive set (lock upgrade).
    pub(crate) fn promote_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
        self.exclusive_lock_set.lock().insert(rid);
    }

    /// Drop a rid from both sets; true when something was held.
    pub(crate) fn remove_lock(&self, rid: Rid) -> bool {
        let shared = self.shared_lock_set.lock().remove(&rid);
        let exclusive = self.exclusive_lock_set.lock().remove(&rid);
        shared || exclusive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert!(txn.locked_rids().is_empty());
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(2);
        let r1 = Rid::new(1, 1);
        let r2 = Rid::new(1, 2);

        txn.add_shared_lock(r1);
        txn.add_exclusive_lock(r2);
        assert!(txn.is_shared_locked(r1));
        assert!(txn.is_exclusive_locked(r2));
        assert_eq!(txn.locked_rids(), vec![r1, r2]);

        txn.promote_lock(r1);
        assert!(!txn.is_shared_locked(r1));
        assert!(txn.is_exclusive_locked(r1));

        assert!(txn.remove_lock(r1));
        assert!(!txn.remove_lock(r1));
    }
}
