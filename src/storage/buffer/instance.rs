use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

use crate::common::types::{Frame, FrameId, FramePtr, PageId, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;
use crate::transaction::wal::LogSink;

/// Mutable pool state, all guarded by one latch so that every operation is
/// atomic with respect to the page table, the free list and frame metadata.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
}

/// Where a victim frame came from, so a failed write-back can put it back.
enum VictimSource {
    FreeList,
    Replacer,
}

/// One buffer pool instance: a fixed array of frames caching pages of a
/// single disk file.
///
/// When several instances front the same file, each owns the page ids
/// congruent to its `instance_index` modulo `num_instances`; ids are
/// allocated locally so the owner never has to coordinate with its
/// siblings.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    frames: Vec<FramePtr>,
    replacer: LruReplacer,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
    log_sink: Option<Arc<LogSink>>,
}

impl BufferPoolInstance {
    /// Create a standalone instance owning every page id
    pub fn new(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_sink: Option<Arc<LogSink>>,
    ) -> Self {
        Self::new_sharded(pool_size, 1, 0, disk_manager, log_sink)
    }

    /// Create one shard of a parallel pool.
    ///
    /// `instance_index` must be below `num_instances`; allocated page ids
    /// satisfy `page_id % num_instances == instance_index`.
    pub fn new_sharded(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
        log_sink: Option<Arc<LogSink>>,
    ) -> Self {
        assert!(num_instances > 0, "buffer pool needs at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index {} out of range for {} instances",
            instance_index,
            num_instances
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(Arc::new(parking_lot::RwLock::new(Frame::new(frame_id))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            frames,
            replacer: LruReplacer::new(pool_size),
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                next_page_id: instance_index,
            }),
            disk_manager,
            log_sink,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn instance_index(&self) -> u32 {
        self.instance_index
    }

    pub fn log_sink(&self) -> Option<&Arc<LogSink>> {
        self.log_sink.as_ref()
    }

    /// Fetch a page, pinning it. The caller must pair this with exactly one
    /// `unpin_page`.
    pub fn fetch_page(&self, page_id: PageId) -> Result<FramePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::PageNotFound(page_id));
        }

        let mut state = self.state.lock();

        // Already cached: bump the pin count and shield it from eviction
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let frame = self.frames[frame_id].clone();
            frame.write().pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(frame);
        }

        // Not cached: take a frame, evict its current page, read from disk
        let (frame_id, source) = self.take_victim(&mut state)?;
        let frame = self.frames[frame_id].clone();
        {
            let mut guard = frame.write();

            if guard.is_dirty {
                if let Err(e) = self.disk_manager.write_page(&guard.page) {
                    // Frame stays dirty; give it back so accounting holds
                    self.restore_victim(&mut state, frame_id, source);
                    return Err(e.into());
                }
                debug!(
                    "instance {}: wrote back dirty page {} during fetch of {}",
                    self.instance_index, guard.page.page_id, page_id
                );
                guard.is_dirty = false;
            }

            let old_page_id = guard.page.page_id;
            state.page_table.remove(&old_page_id);

            if let Err(e) = self.disk_manager.read_page(page_id, &mut guard.page) {
                guard.page.page_id = INVALID_PAGE_ID;
                guard.pin_count = 0;
                guard.is_dirty = false;
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }

            guard.pin_count = 1;
            guard.is_dirty = false;
            state.page_table.insert(page_id, frame_id);
            self.replacer.pin(frame_id);
        }

        Ok(frame)
    }

    /// Create a page with a freshly allocated id, pinning it with a zeroed
    /// payload. Fails with `PoolExhausted` when every frame is pinned.
    pub fn new_page(&self) -> Result<(FramePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();

        if state.free_list.is_empty() && self.replacer.size() == 0 {
            return Err(BufferPoolError::PoolExhausted);
        }

        let page_id = self.allocate_page_id(&mut state);
        let (frame_id, source) = self.take_victim(&mut state)?;
        let frame = self.frames[frame_id].clone();
        {
            let mut guard = frame.write();

            if guard.is_dirty {
                if let Err(e) = self.disk_manager.write_page(&guard.page) {
                    self.restore_victim(&mut state, frame_id, source);
                    return Err(e.into());
                }
                guard.is_dirty = false;
            }

            let old_page_id = guard.page.page_id;
            state.page_table.remove(&old_page_id);
            state.page_table.insert(page_id, frame_id);

            guard.page.reset();
            guard.page.page_id = page_id;
            guard.pin_count = 1;
            guard.is_dirty = false;
            self.replacer.pin(frame_id);
        }

        Ok((frame, page_id))
    }

    /// Drop one pin on a page, recording whether the caller dirtied it.
    /// The dirty bit only ever ORs in `true`; it is cleared by flushing.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let mut guard = self.frames[frame_id].write();
        if is_dirty {
            guard.is_dirty = true;
        }
        if guard.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        guard.pin_count -= 1;
        if guard.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a page back to disk if dirty. Legal while pinned; pin state is
    /// untouched.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Err(BufferPoolError::PageNotFound(page_id)),
        };

        let mut guard = self.frames[frame_id].write();
        if guard.is_dirty {
            self.disk_manager.write_page(&guard.page)?;
            guard.is_dirty = false;
        }

        Ok(())
    }

    /// Flush every page currently in the page table
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let state = self.state.lock();

        for &frame_id in state.page_table.values() {
            let mut guard = self.frames[frame_id].write();
            if guard.is_dirty {
                self.disk_manager.write_page(&guard.page)?;
                guard.is_dirty = false;
            }
        }

        Ok(())
    }

    /// Drop a page from the pool and hand its id back to the disk manager.
    ///
    /// Deleting a page that is not cached succeeds vacuously; deleting a
    /// pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();

        let frame_id = match state.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };

        let mut guard = self.frames[frame_id].write();
        if guard.pin_count > 0 {
            warn!(
                "instance {}: refusing to delete pinned page {}",
                self.instance_index, page_id
            );
            return Err(BufferPoolError::PagePinned(page_id));
        }

        state.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        guard.page.reset();
        guard.page.page_id = INVALID_PAGE_ID;
        guard.is_dirty = false;
        state.free_list.push_back(frame_id);
        drop(guard);

        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Hand out the next id owned by this shard
    fn allocate_page_id(&self, state: &mut PoolState) -> PageId {
        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances;
        debug_assert_eq!(page_id % self.num_instances, self.instance_index);
        page_id
    }

    /// Pick a frame to (re)use: the free list first, then the replacer
    fn take_victim(&self, state: &mut PoolState) -> Result<(FrameId, VictimSource), BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok((frame_id, VictimSource::FreeList));
        }
        if let Some(frame_id) = self.replacer.victim() {
            return Ok((frame_id, VictimSource::Replacer));
        }
        Err(BufferPoolError::PoolExhausted)
    }

    fn restore_victim(&self, state: &mut PoolState, frame_id: FrameId, source: VictimSource) {
        match source {
            VictimSource::FreeList => state.free_list.push_front(frame_id),
            VictimSource::Replacer => self.replacer.unpin(frame_id),
        }
    }
}
