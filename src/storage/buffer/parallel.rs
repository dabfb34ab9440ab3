use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::{FramePtr, PageId};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::instance::BufferPoolInstance;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::LogSink;

/// A buffer pool sharded over several instances.
///
/// Page ids are routed by `page_id % num_instances`, so each instance's
/// latch covers a disjoint set of pages and operations on different shards
/// never contend. The shards share one disk manager.
pub struct ParallelBufferPool {
    instances: Vec<Arc<BufferPoolInstance>>,
    /// Round-robin start position for `new_page`
    next_instance: Mutex<usize>,
}

impl ParallelBufferPool {
    /// Build `num_instances` shards of `pool_size` frames each
    pub fn new(
        num_instances: usize,
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_sink: Option<Arc<LogSink>>,
    ) -> Self {
        assert!(num_instances > 0, "parallel pool needs at least one instance");

        let instances = (0..num_instances)
            .map(|i| {
                Arc::new(BufferPoolInstance::new_sharded(
                    pool_size,
                    num_instances as u32,
                    i as u32,
                    disk_manager.clone(),
                    log_sink.clone(),
                ))
            })
            .collect();

        Self {
            instances,
            next_instance: Mutex::new(0),
        }
    }

    /// Total frames across all shards
    pub fn pool_size(&self) -> usize {
        self.instances.iter().map(|i| i.pool_size()).sum()
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// The shard responsible for a page id
    pub fn owner(&self, page_id: PageId) -> &Arc<BufferPoolInstance> {
        &self.instances[page_id as usize % self.instances.len()]
    }

    /// A shard by position (mainly for inspection in tests)
    pub fn instance(&self, index: usize) -> &Arc<BufferPoolInstance> {
        &self.instances[index]
    }

    pub fn fetch_page(&self, page_id: PageId) -> Result<FramePtr, BufferPoolError> {
        self.owner(page_id).fetch_page(page_id)
    }

    /// Create a page on the first shard with a frame to spare.
    ///
    /// The scan starts at a cursor that advances on every call, so
    /// consecutive allocations spread across shards instead of piling onto
    /// the first one.
    pub fn new_page(&self) -> Result<(FramePtr, PageId), BufferPoolError> {
        let start = {
            let mut cursor = self.next_instance.lock();
            let start = *cursor;
            *cursor = (*cursor + 1) % self.instances.len();
            start
        };

        for offset in 0..self.instances.len() {
            let index = (start + offset) % self.instances.len();
            match self.instances[index].new_page() {
                Ok(result) => return Ok(result),
                Err(BufferPoolError::PoolExhausted) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(BufferPoolError::PoolExhausted)
    }

    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.owner(page_id).unpin_page(page_id, is_dirty)
    }

    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.owner(page_id).flush_page(page_id)
    }

    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.owner(page_id).delete_page(page_id)
    }
}
