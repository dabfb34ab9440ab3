use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionError,
};
use crate::transaction::wal::LogSink;

/// Transaction manager - responsible for creating and tracking transactions
pub struct TransactionManager {
    /// Next transaction ID to assign
    next_txn_id: AtomicU32,

    /// Lock manager releasing this manager's locks on commit/abort
    lock_manager: Arc<LockManager>,

    /// Log sink reference, when the engine runs with a WAL
    log_sink: Option<Arc<LogSink>>,

    /// Active transactions map (txn_id -> Transaction)
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    /// Create a new transaction manager
    pub fn new(lock_manager: Arc<LockManager>, log_sink: Option<Arc<LogSink>>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1), // Start from 1
            lock_manager,
            log_sink,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    /// Begin a new transaction
    pub fn begin(&self, isolation_level: IsolationLevel) -> Result<Arc<Transaction>, TransactionError> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);

        let txn = Arc::new(Transaction::new(
            txn_id,
            isolation_level,
            self.log_sink.clone(),
        ));
        txn.begin()?;

        self.active_transactions.lock().insert(txn_id, txn.clone());
        Ok(txn)
    }

    /// Commit a transaction, releasing every lock it still holds
    pub fn commit(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .active_transactions
            .lock()
            .remove(&txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;

        self.release_all_locks(&txn);
        txn.commit()?;
        Ok(())
    }

    /// Abort a transaction: mark it aborted, wake any of its blocked lock
    /// requests, then release everything it holds
    pub fn abort(&self, txn_id: TxnId) -> Result<(), TransactionError> {
        let txn = self
            .active_transactions
            .lock()
            .remove(&txn_id)
            .ok_or(TransactionError::NotFound(txn_id))?;

        txn.abort()?;
        self.lock_manager.wake_waiters();
        self.release_all_locks(&txn);
        Ok(())
    }

    /// Get a transaction by ID
    pub fn get_transaction(&self, txn_id: TxnId) -> Option<Arc<Transaction>> {
        self.active_transactions.lock().get(&txn_id).cloned()
    }

    /// Get all active transaction IDs
    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }

    fn release_all_locks(&self, txn: &Arc<Transaction>) {
        for rid in txn.held_locks() {
            self.lock_manager.unlock(txn, rid);
        }
    }
}
