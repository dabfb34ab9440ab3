use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, Rid, TxnId};
use crate::transaction::wal::{LogRecordType, LogSink};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states.
///
/// A transaction acquires locks while `Growing`; the first release (other
/// than an eager shared release under `ReadCommitted`) moves it to
/// `Shrinking`, after which any further acquisition aborts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Errors that can occur during transaction processing
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Transaction {0} is already finished")]
    InvalidState(TxnId),

    #[error("Transaction {0} not found")]
    NotFound(TxnId),

    #[error("Failed to write to WAL: {0}")]
    LogError(String),
}

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, TransactionError>;

/// An active database transaction.
///
/// The state and lock sets sit behind their own locks because other
/// threads read them: lock-wait predicates poll the state, and the lock
/// manager maintains the sets as locks are granted and released.
pub struct Transaction {
    /// Transaction ID
    id: TxnId,

    /// Current two-phase-locking state
    state: Mutex<TransactionState>,

    /// Isolation level for this transaction
    isolation_level: IsolationLevel,

    /// Record ids this transaction holds shared locks on
    shared_lock_set: Mutex<HashSet<Rid>>,

    /// Record ids this transaction holds exclusive locks on
    exclusive_lock_set: Mutex<HashSet<Rid>>,

    /// Log sink reference, when the engine runs with a WAL
    log_sink: Option<Arc<LogSink>>,

    /// First LSN of this transaction
    first_lsn: AtomicU64,

    /// Last LSN of this transaction
    last_lsn: AtomicU64,
}

impl Transaction {
    /// Create a new transaction with the given ID
    pub fn new(id: TxnId, isolation_level: IsolationLevel, log_sink: Option<Arc<LogSink>>) -> Self {
        Self {
            id,
            state: Mutex::new(TransactionState::Growing),
            isolation_level,
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            log_sink,
            first_lsn: AtomicU64::new(0),
            last_lsn: AtomicU64::new(0),
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

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    /// Write a BEGIN record to the log
    pub fn begin(&self) -> Result<Lsn> {
        let lsn = self.append_log(LogRecordType::Begin)?;
        self.first_lsn.store(lsn, Ordering::SeqCst);
        self.last_lsn.store(lsn, Ordering::SeqCst);
        Ok(lsn)
    }

    /// Commit the transaction
    pub fn commit(&self) -> Result<Lsn> {
        let state = self.state();
        if state == TransactionState::Committed || state == TransactionState::Aborted {
            return Err(TransactionError::InvalidState(self.id));
        }

        let lsn = self.append_log(LogRecordType::Commit)?;
        self.last_lsn.store(lsn, Ordering::SeqCst);
        self.set_state(TransactionState::Committed);
        Ok(lsn)
    }

    /// Abort the transaction. Aborting an already-aborted transaction is
    /// allowed: the lock manager flips the state first when it rejects a
    /// request, and the owner still has to run its cleanup.
    pub fn abort(&self) -> Result<Lsn> {
        if self.state() == TransactionState::Committed {
            return Err(TransactionError::InvalidState(self.id));
        }

        let lsn = self.append_log(LogRecordType::Abort)?;
        self.last_lsn.store(lsn, Ordering::SeqCst);
        self.set_state(TransactionState::Aborted);
        Ok(lsn)
    }

    pub fn is_shared_locked(&self, rid: Rid) -> bool {
        self.shared_lock_set.lock().contains(&rid)
    }

    pub fn is_exclusive_locked(&self, rid: Rid) -> bool {
        self.exclusive_lock_set.lock().contains(&rid)
    }

    pub fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().remove(&rid);
    }

    pub fn remove_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().remove(&rid);
    }

    /// Snapshot of every record id this transaction currently holds a lock
    /// on, shared and exclusive
    pub fn held_locks(&self) -> Vec<Rid> {
        let mut rids: Vec<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids
    }

    /// Get the first LSN of this transaction
    pub fn first_lsn(&self) -> Lsn {
        self.first_lsn.load(Ordering::SeqCst)
    }

    /// Get the last LSN of this transaction
    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn.load(Ordering::SeqCst)
    }

    fn append_log(&self, record_type: LogRecordType) -> Result<Lsn> {
        match &self.log_sink {
            Some(sink) => sink
                .append(self.id, record_type)
                .map_err(|e| TransactionError::LogError(e.to_string())),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1, IsolationLevel::ReadCommitted, None);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::ReadCommitted);
        assert!(txn.held_locks().is_empty());
    }

    #[test]
    fn test_commit_is_final() {
        let txn = Transaction::new(2, IsolationLevel::RepeatableRead, None);
        txn.begin().unwrap();
        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);

        assert!(matches!(
            txn.commit(),
            Err(TransactionError::InvalidState(2))
        ));
        assert!(matches!(txn.abort(), Err(TransactionError::InvalidState(2))));
    }

    #[test]
    fn test_abort_is_idempotent() {
        let txn = Transaction::new(3, IsolationLevel::RepeatableRead, None);
        txn.begin().unwrap();
        txn.set_state(TransactionState::Aborted);

        // External abort already flipped the state; cleanup abort succeeds
        txn.abort().unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert!(matches!(
            txn.commit(),
            Err(TransactionError::InvalidState(3))
        ));
    }

    #[test]
    fn test_lock_set_bookkeeping() {
        let txn = Transaction::new(4, IsolationLevel::RepeatableRead, None);
        let rid = Rid::new(1, 1);

        txn.add_shared_lock(rid);
        assert!(txn.is_shared_locked(rid));
        assert!(!txn.is_exclusive_locked(rid));

        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);
        assert!(!txn.is_shared_locked(rid));
        assert!(txn.is_exclusive_locked(rid));
        assert_eq!(txn.held_locks(), vec![rid]);
    }

    #[test]
    fn test_lsns_recorded_with_sink() {
        let file = NamedTempFile::new().unwrap();
        let sink = Arc::new(LogSink::new(file.path()).unwrap());
        let txn = Transaction::new(5, IsolationLevel::ReadCommitted, Some(sink));

        let begin_lsn = txn.begin().unwrap();
        assert!(begin_lsn > 0);
        assert_eq!(txn.first_lsn(), begin_lsn);

        let commit_lsn = txn.commit().unwrap();
        assert!(commit_lsn > begin_lsn);
        assert_eq!(txn.last_lsn(), commit_lsn);
    }
}
