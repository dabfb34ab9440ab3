// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::{BufferPoolError, BufferPoolInstance, ParallelBufferPool};
pub use storage::disk::DiskManager;

pub use index::hash::ExtendibleHashIndex;

pub use transaction::lock_manager::LockManager;
pub use transaction::{IsolationLevel, Transaction, TransactionManager, TransactionState};
