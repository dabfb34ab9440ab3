use std::sync::Arc;

use anyhow::Result;
use tempfile::NamedTempFile;

use kestreldb::index::hash::KeyHasher;
use kestreldb::storage::buffer::{BufferPoolInstance, ParallelBufferPool};
use kestreldb::storage::disk::DiskManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a standalone buffer pool instance over a temporary database
#[allow(dead_code)]
pub fn create_test_instance(pool_size: usize) -> Result<(Arc<BufferPoolInstance>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk = Arc::new(DiskManager::new(path)?);
    Ok((Arc::new(BufferPoolInstance::new(pool_size, disk, None)), file))
}

// Create a sharded buffer pool over a temporary database
#[allow(dead_code)]
pub fn create_test_parallel_pool(
    num_instances: usize,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPool>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let disk = Arc::new(DiskManager::new(path)?);
    Ok((
        Arc::new(ParallelBufferPool::new(num_instances, pool_size, disk, None)),
        file,
    ))
}

/// Identity hash over u32 keys, so tests can steer keys into specific
/// buckets
#[allow(dead_code)]
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityHasher;

impl KeyHasher<u32> for IdentityHasher {
    fn hash_key(&self, key: &u32) -> u32 {
        *key
    }
}
