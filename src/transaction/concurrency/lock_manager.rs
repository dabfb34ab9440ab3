use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::debug;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TxnId, INVALID_TXN_ID};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Lock modes a transaction can request on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Why a lock request aborted its transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Acquisition attempted after the transaction started releasing
    LockOnShrinking,
    /// Shared locks are meaningless under READ UNCOMMITTED
    LockSharedOnReadUncommitted,
    /// Another transaction is already upgrading on this record
    UpgradeConflict,
    /// Externally aborted while waiting (deadlock resolution)
    Deadlock,
}

#[derive(Error, Debug)]
#[error("Transaction {txn_id} aborted: {reason:?}")]
pub struct TransactionAbortError {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// Result type for lock acquisition
pub type LockResult = Result<(), TransactionAbortError>;

/// One pending or granted request in a record's queue
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

impl LockRequest {
    fn new(txn_id: TxnId, mode: LockMode) -> Self {
        Self {
            txn_id,
            mode,
            granted: false,
        }
    }
}

struct QueueState {
    requests: VecDeque<LockRequest>,
    /// Granted shared locks on this record
    shared_count: u32,
    /// Whether an exclusive lock is currently granted
    exclusive: bool,
    /// The one transaction allowed to be upgrading, if any
    upgrading: TxnId,
}

impl Default for QueueState {
    fn default() -> Self {
        Self {
            requests: VecDeque::new(),
            shared_count: 0,
            exclusive: false,
            upgrading: INVALID_TXN_ID,
        }
    }
}

/// Per-record wait queue: its own mutex plus a condition variable so
/// waiters on different records never disturb each other.
#[derive(Default)]
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

/// Two-phase lock manager over record ids.
///
/// Requests block until compatible; there is no deadlock detector, so a
/// wait-for cycle is only broken by aborting one participant from outside
/// (which wakes its waits through [`LockManager::wake_waiters`]).
pub struct LockManager {
    lock_table: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            lock_table: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a shared lock on `rid`, blocking while an exclusive lock is
    /// held.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> LockResult {
        if txn.state() == TransactionState::Shrinking {
            return Err(self.abort(txn, AbortReason::LockOnShrinking));
        }
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            return Err(self.abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }

        let queue = self.queue_for(rid);
        let mut state = queue.state.lock();
        state
            .requests
            .push_back(LockRequest::new(txn.id(), LockMode::Shared));

        while state.exclusive && txn.state() != TransactionState::Aborted {
            queue.cv.wait(&mut state);
        }
        if txn.state() == TransactionState::Aborted {
            Self::drop_request(&mut state, txn.id());
            return Err(TransactionAbortError {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }

        state.shared_count += 1;
        Self::grant(&mut state, txn.id());
        txn.add_shared_lock(rid);
        Ok(())
    }

    /// Acquire an exclusive lock on `rid`, blocking while any lock is held.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> LockResult {
        if txn.state() == TransactionState::Shrinking {
            return Err(self.abort(txn, AbortReason::LockOnShrinking));
        }

        let queue = self.queue_for(rid);
        let mut state = queue.state.lock();
        state
            .requests
            .push_back(LockRequest::new(txn.id(), LockMode::Exclusive));

        while (state.exclusive || state.shared_count > 0)
            && txn.state() != TransactionState::Aborted
        {
            queue.cv.wait(&mut state);
        }
        if txn.state() == TransactionState::Aborted {
            Self::drop_request(&mut state, txn.id());
            return Err(TransactionAbortError {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }

        state.exclusive = true;
        Self::grant(&mut state, txn.id());
        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Upgrade a held shared lock to exclusive. At most one transaction
    /// may be upgrading a given record; a second concurrent upgrader
    /// aborts immediately.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> LockResult {
        if txn.state() == TransactionState::Shrinking {
            return Err(self.abort(txn, AbortReason::LockOnShrinking));
        }

        let queue = self.queue_for(rid);
        let mut state = queue.state.lock();

        if state.upgrading != INVALID_TXN_ID {
            return Err(self.abort(txn, AbortReason::UpgradeConflict));
        }
        state.upgrading = txn.id();

        // Wait out every holder except our own shared lock
        while (state.exclusive || state.shared_count > 1)
            && txn.state() != TransactionState::Aborted
        {
            queue.cv.wait(&mut state);
        }
        if txn.state() == TransactionState::Aborted {
            state.upgrading = INVALID_TXN_ID;
            return Err(TransactionAbortError {
                txn_id: txn.id(),
                reason: AbortReason::Deadlock,
            });
        }

        state.upgrading = INVALID_TXN_ID;
        state.shared_count -= 1;
        state.exclusive = true;
        if let Some(request) = state
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn.id())
        {
            request.mode = LockMode::Exclusive;
            request.granted = true;
        }

        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Release the lock this transaction holds on `rid`.
    ///
    /// Returns false when the transaction has no request on the record.
    /// Releasing moves the transaction into its shrinking phase, except
    /// for shared locks under READ COMMITTED, which may be let go eagerly.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        let queue = match self.lock_table.lock().get(&rid) {
            Some(queue) => queue.clone(),
            None => return false,
        };

        let mut state = queue.state.lock();
        let position = match state.requests.iter().position(|r| r.txn_id == txn.id()) {
            Some(position) => position,
            None => return false,
        };
        let request = match state.requests.remove(position) {
            Some(request) => request,
            None => return false,
        };

        txn.remove_shared_lock(rid);
        txn.remove_exclusive_lock(rid);

        match request.mode {
            LockMode::Shared => state.shared_count = state.shared_count.saturating_sub(1),
            LockMode::Exclusive => state.exclusive = false,
        }

        let txn_state = txn.state();
        let eager_shared_release = txn_state == TransactionState::Growing
            && txn.isolation_level() == IsolationLevel::ReadCommitted
            && request.mode == LockMode::Shared;
        if !eager_shared_release && txn_state != TransactionState::Aborted {
            txn.set_state(TransactionState::Shrinking);
        }

        // Wake waiters that this release may have unblocked: anyone after
        // an exclusive, an exclusive requester after the last shared, or a
        // pending upgrader once only its own shared lock remains
        if request.mode == LockMode::Exclusive || state.shared_count <= 1 {
            queue.cv.notify_all();
        }

        true
    }

    /// Re-evaluate every wait predicate. Called after a transaction is
    /// aborted from outside so its blocked requests return.
    ///
    /// Notifying under the queue lock orders the abort against a waiter
    /// that has checked its predicate but not yet gone to sleep.
    pub fn wake_waiters(&self) {
        let queues: Vec<Arc<LockRequestQueue>> =
            self.lock_table.lock().values().cloned().collect();
        for queue in queues {
            let _state = queue.state.lock();
            queue.cv.notify_all();
        }
    }

    fn queue_for(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut table = self.lock_table.lock();
        table.entry(rid).or_default().clone()
    }

    fn abort(&self, txn: &Transaction, reason: AbortReason) -> TransactionAbortError {
        debug!("aborting transaction {}: {:?}", txn.id(), reason);
        txn.set_state(TransactionState::Aborted);
        TransactionAbortError {
            txn_id: txn.id(),
            reason,
        }
    }

    fn grant(state: &mut QueueState, txn_id: TxnId) {
        if let Some(request) = state.requests.iter_mut().find(|r| r.txn_id == txn_id) {
            request.granted = true;
        }
    }

    fn drop_request(state: &mut QueueState, txn_id: TxnId) {
        if let Some(position) = state.requests.iter().position(|r| r.txn_id == txn_id) {
            state.requests.remove(position);
        }
    }
}
