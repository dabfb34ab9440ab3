pub mod concurrency;
pub mod wal;

// Public exports
pub use concurrency::lock_manager;
pub use concurrency::lock_manager::{AbortReason, LockManager, LockMode, TransactionAbortError};
pub use concurrency::transaction_manager::TransactionManager;
pub use concurrency::{IsolationLevel, Transaction, TransactionError, TransactionState};
pub use wal::{LogRecordType, LogSink};
