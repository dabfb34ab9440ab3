use thiserror::Error;

use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum HashIndexError {
    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Key/value pair already present")]
    DuplicateEntry,

    #[error("Key/value pair not found")]
    EntryNotFound,

    #[error("Directory is at maximum size; cannot split further")]
    DirectorySaturated,

    #[error("Bucket still full after split")]
    BucketStillFull,
}
