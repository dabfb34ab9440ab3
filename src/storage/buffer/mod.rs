pub mod error;
pub mod instance;
pub mod parallel;
pub mod replacer;

pub use error::BufferPoolError;
pub use instance::BufferPoolInstance;
pub use parallel::ParallelBufferPool;
pub use replacer::LruReplacer;
