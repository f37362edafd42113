use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{
    Transaction, TransactionError, TransactionState,
};
use crate::transaction::concurrency::transaction_manager::TransactionManager;

/// Row lock modes. Shared locks are mutually compatible; everything else
/// conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct LockRequestQueue {
    queue: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
        }
    }
}

struct LockManagerInner {
    /// Per-rid queues; entries accumulate for the life of the process even
    /// after all requests drain.
    lock_table: HashMap<Rid, LockRequestQueue>,
    /// txn -> transactions it waits for. BTreeMap so detection walks
    /// vertices in id order.
    waits_for: BTreeMap<TxnId, Vec<TxnId>>,
}

/// Strict two-phase lock manager over rids, with a background wait-for-graph
/// cycle detector that aborts the youngest transaction of any deadlocked set.
///
/// Grant discipline is FIFO per rid: a shared request is granted once no
/// exclusive request is queued ahead of it, an exclusive request once it
/// reaches the queue head. A request that arrives behind a waiting writer
/// therefore never overtakes it.
pub struct LockManager {
    inner: Mutex<LockManagerInner>,
    cycle_detection_interval: Duration,
    detector: Mutex<Option<JoinHandle<()>>>,
    stop_flag: Mutex<bool>,
    stop_cv: Condvar,
}

impl LockManager {
    pub fn new(cycle_detection_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(LockManagerInner {
                lock_table: HashMap::new(),
                waits_for: BTreeMap::new(),
            }),
            cycle_detection_interval,
            detector: Mutex::new(None),
            stop_flag: Mutex::new(false),
            stop_cv: Condvar::new(),
        }
    }

    /// Acquire a shared lock, blocking while an exclusive request is ahead
    /// in the rid's queue. Returns false when the transaction is (or
    /// becomes, via the deadlock detector) aborted.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionError> {
        let mut inner = self.inner.lock();

        match txn.state() {
            TransactionState::Aborted => return Ok(false),
            TransactionState::Shrinking => {
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::LockOnShrinking(txn.id()));
            }
            _ => {}
        }

        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(true);
        }

        let cv = {
            let queue = inner
                .lock_table
                .entry(rid)
                .or_insert_with(LockRequestQueue::new);
            queue.queue.push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Shared,
                granted: false,
            });
            queue.cv.clone()
        };

        loop {
            let no_writer_ahead = {
                let queue = &inner.lock_table[&rid];
                let mut ok = true;
                for request in &queue.queue {
                    if request.txn_id == txn.id() {
                        break;
                    }
                    if request.mode == LockMode::Exclusive {
                        ok = false;
                        break;
                    }
                }
                ok
            };
            if no_writer_ahead || txn.state() == TransactionState::Aborted {
                break;
            }
            cv.wait(&mut inner);
        }

        self.finish_wait(inner, txn, rid, LockMode::Shared, &cv)
    }

    /// Acquire an exclusive lock, blocking until the request reaches the
    /// head of the rid's queue. Returns false when the transaction is
    /// aborted.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionError> {
        match txn.state() {
            TransactionState::Aborted => return Ok(false),
            TransactionState::Shrinking => {
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::LockOnShrinking(txn.id()));
            }
            _ => {}
        }

        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        // An X request on top of an own shared lock is an upgrade; queueing
        // a second request would wait on the transaction's own grant.
        if txn.is_shared_locked(rid) {
            return self.lock_upgrade(txn, rid);
        }

        let mut inner = self.inner.lock();

        let cv = {
            let queue = inner
                .lock_table
                .entry(rid)
                .or_insert_with(LockRequestQueue::new);
            queue.queue.push_back(LockRequest {
                txn_id: txn.id(),
                mode: LockMode::Exclusive,
                granted: false,
            });
            queue.cv.clone()
        };

        loop {
            let at_head = {
                let queue = &inner.lock_table[&rid];
                queue
                    .queue
                    .front()
                    .map(|request| request.txn_id == txn.id())
                    .unwrap_or(false)
            };
            if at_head || txn.state() == TransactionState::Aborted {
                break;
            }
            cv.wait(&mut inner);
        }

        self.finish_wait(inner, txn, rid, LockMode::Exclusive, &cv)
    }

    /// Promote a held shared lock to exclusive. Conflicts with any other
    /// granted holder on the rid: the requester is aborted rather than
    /// risking an upgrade deadlock.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> Result<bool, TransactionError> {
        let mut inner = self.inner.lock();

        match txn.state() {
            TransactionState::Aborted => return Ok(false),
            TransactionState::Shrinking => {
                txn.set_state(TransactionState::Aborted);
                return Err(TransactionError::LockOnShrinking(txn.id()));
            }
            _ => {}
        }

        if txn.is_exclusive_locked(rid) {
            return Ok(true);
        }
        if !txn.is_shared_locked(rid) {
            return Ok(false);
        }

        let queue = match inner.lock_table.get_mut(&rid) {
            Some(queue) => queue,
            None => return Ok(false),
        };

        let other_holder = queue
            .queue
            .iter()
            .any(|request| request.granted && request.txn_id != txn.id());
        if other_holder {
            txn.set_state(TransactionState::Aborted);
            queue.queue.retain(|request| request.txn_id != txn.id());
            queue.cv.notify_all();
            return Err(TransactionError::UpgradeConflict(txn.id(), rid));
        }

        if let Some(request) = queue
            .queue
            .iter_mut()
            .find(|request| request.txn_id == txn.id())
        {
            request.mode = LockMode::Exclusive;
            request.granted = true;
        }
        txn.promote_lock(rid);
        queue.cv.notify_all();
        Ok(true)
    }

    /// Release a held lock. The first unlock moves a GROWING transaction to
    /// SHRINKING. False when the rid is not held by `txn`.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        let mut inner = self.inner.lock();

        if !txn.remove_lock(rid) {
            return false;
        }

        if let Some(queue) = inner.lock_table.get_mut(&rid) {
            queue.queue.retain(|request| request.txn_id != txn.id());
            queue.cv.notify_all();
        }

        if txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }
        true
    }

    /// Shared epilogue of a lock wait: either the grant condition held, or
    /// the transaction was aborted while waiting and its request is removed.
    fn finish_wait(
        &self,
        mut inner: MutexGuard<'_, LockManagerInner>,
        txn: &Transaction,
        rid: Rid,
        mode: LockMode,
        cv: &Arc<Condvar>,
    ) -> Result<bool, TransactionError> {
        if txn.state() == TransactionState::Aborted {
            if let Some(queue) = inner.lock_table.get_mut(&rid) {
                queue.queue.retain(|request| request.txn_id != txn.id());
                queue.cv.notify_all();
            }
            return Ok(false);
        }

        if let Some(queue) = inner.lock_table.get_mut(&rid) {
            if let Some(request) = queue
                .queue
                .iter_mut()
                .find(|request| request.txn_id == txn.id())
            {
                request.granted = true;
            }
        }
        match mode {
            LockMode::Shared => txn.add_shared_lock(rid),
            LockMode::Exclusive => txn.add_exclusive_lock(rid),
        }
        cv.notify_all();
        Ok(true)
    }

    // --- wait-for graph -------------------------------------------------

    pub fn add_edge(&self, t1: TxnId, t2: TxnId) {
        let mut inner = self.inner.lock();
        let edges = inner.waits_for.entry(t1).or_default();
        if !edges.contains(&t2) {
            edges.push(t2);
        }
    }

    pub fn remove_edge(&self, t1: TxnId, t2: TxnId) {
        let mut inner = self.inner.lock();
        if let Some(edges) = inner.waits_for.get_mut(&t1) {
            edges.retain(|&t| t != t2);
        }
    }

    /// All edges, ordered by source id.
    pub fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let inner = self.inner.lock();
        let mut edges = Vec::new();
        for (&t1, targets) in &inner.waits_for {
            for &t2 in targets {
                edges.push((t1, t2));
            }
        }
        edges
    }

    /// Detect a cycle in the current wait-for graph. Returns the victim:
    /// the largest (youngest) transaction id on the cycle.
    pub fn has_cycle(&self) -> Option<TxnId> {
        let inner = self.inner.lock();
        Self::find_cycle(&inner.waits_for)
    }

    /// One full detection pass: rebuild the graph from the lock table, then
    /// break every cycle by aborting its youngest member, purging its
    /// requests and waking the affected waiters.
    pub fn detect_deadlocks(&self, txn_manager: &TransactionManager) {
        let mut inner = self.inner.lock();

        loop {
            Self::rebuild_wait_graph(&mut inner);
            let victim_id = match Self::find_cycle(&inner.waits_for) {
                Some(id) => id,
                None => break,
            };

            debug!("deadlock detected, aborting youngest transaction {}", victim_id);
            if let Some(victim) = txn_manager.get_transaction(victim_id) {
                victim.set_state(TransactionState::Aborted);
            }

            inner.waits_for.remove(&victim_id);
            for queue in inner.lock_table.values_mut() {
                queue.queue.retain(|request| request.txn_id != victim_id);
                queue.cv.notify_all();
            }
        }
    }

    /// Start the background detector. One detector per manager; a second
    /// call is a no-op until the first is stopped.
    pub fn start_cycle_detection(self: &Arc<Self>, txn_manager: Arc<TransactionManager>) {
        let mut detector = self.detector.lock();
        if detector.is_some() {
            return;
        }
        *self.stop_flag.lock() = false;

        let manager = Arc::clone(self);
        let handle = std::thread::spawn(move || loop {
            {
                // Sleep outside every latch; the stop signal cuts the nap short.
                let mut stopped = manager.stop_flag.lock();
                if !*stopped {
                    let _ = manager
                        .stop_cv
                        .wait_for(&mut stopped, manager.cycle_detection_interval);
                }
                if *stopped {
                    break;
                }
            }
            manager.detect_deadlocks(&txn_manager);
        });
        *detector = Some(handle);
    }

    /// Stop and join the background detector. The detector thread keeps the
    /// manager alive through its `Arc`, so this must be called for teardown.
    pub fn stop_cycle_detection(&self) {
        let handle = self.detector.lock().take();
        if let Some(handle) = handle {
            *self.stop_flag.lock() = true;
            self.stop_cv.notify_all();
            let _ = handle.join();
        }
    }

    fn rebuild_wait_graph(inner: &mut LockManagerInner) {
        inner.waits_for.clear();
        for queue in inner.lock_table.values() {
            let mut earlier: Vec<TxnId> = Vec::new();
            for request in &queue.queue {
                for &ahead in &earlier {
                    if ahead != request.txn_id {
                        let edges = inner.waits_for.entry(request.txn_id).or_default();
                        if !edges.contains(&ahead) {
                            edges.push(ahead);
                        }
                    }
                }
                earlier.push(request.txn_id);
            }
        }
    }

    fn find_cycle(waits_for: &BTreeMap<TxnId, Vec<TxnId>>) -> Option<TxnId> {
        let mut visited: HashSet<TxnId> = HashSet::new();
        for &start in waits_for.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut path: Vec<TxnId> = Vec::new();
            let mut on_path: HashSet<TxnId> = HashSet::new();
            if let Some(victim) =
                Self::dfs(start, waits_for, &mut visited, &mut path, &mut on_path)
            {
                return Some(victim);
            }
        }
        None
    }

    fn dfs(
        txn_id: TxnId,
        waits_for: &BTreeMap<TxnId, Vec<TxnId>>,
        visited: &mut HashSet<TxnId>,
        path: &mut Vec<TxnId>,
        on_path: &mut HashSet<TxnId>,
    ) -> Option<TxnId> {
        visited.insert(txn_id);
        path.push(txn_id);
        on_path.insert(txn_id);

        if let Some(targets) = waits_for.get(&txn_id) {
            for &next in targets {
                if on_path.contains(&next) {
                    let cycle_start = path
                        .iter()
                        .position(|&t| t == next)
                        .expect("back edge target must be on the path");
                    return path[cycle_start..].iter().copied().max();
                }
                if !visited.contains(&next) {
                    if let Some(victim) = Self::dfs(next, waits_for, visited, path, on_path) {
                        return Some(victim);
                    }
                }
            }
        }

        path.pop();
        on_path.remove(&txn_id);
        None
    }
}
