use linked_hash_map::LinkedHashMap;
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU (Least Recently Used) page replacement policy.
///
/// Tracks unpinned frames in recency order: a frame enters the victim set
/// when its pin count drops to zero and leaves it when pinned again. The
/// least recently unpinned frame is evicted first.
///
/// The ordered set is a `LinkedHashMap`, so victim, pin and unpin are all
/// O(1). The replacer carries its own mutex and is safe to call from any
/// thread.
pub struct LruReplacer {
    inner: Mutex<LinkedHashMap<FrameId, ()>>,
    num_frames: usize,
}

impl LruReplacer {
    pub fn new(num_frames: usize) -> Self {
        Self {
            inner: Mutex::new(LinkedHashMap::with_capacity(num_frames)),
            num_frames,
        }
    }

    /// Remove and return the least recently unpinned frame, or `None` when
    /// no frame is evictable.
    pub fn victim(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        inner.pop_front().map(|(frame_id, ())| frame_id)
    }

    /// Take a frame out of the victim set (it has been pinned).
    pub fn pin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        inner.remove(&frame_id);
    }

    /// Add a frame to the victim set as the most recently unpinned entry.
    /// Re-unpinning a tracked frame does not change its position.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if inner.contains_key(&frame_id) {
            return;
        }
        if inner.len() == self.num_frames {
            inner.pop_front();
        }
        inner.insert(frame_id, ());
    }

    /// Number of frames currently evictable
    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }
}
