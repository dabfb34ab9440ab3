use std::sync::Arc;

use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Sentinel for "no page". Real ids are handed out from 0 upward, so the
/// all-ones value is never allocated.
pub const INVALID_PAGE_ID: PageId = PageId::MAX;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = u32;

/// Sentinel for "no transaction"
pub const INVALID_TXN_ID: TxnId = TxnId::MAX;

/// LSN (Log Sequence Number) type
pub type Lsn = u64;

/// Record ID: the page holding the record plus its slot within that page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot)
    }
}

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: 0,
        }
    }

    /// Zero the payload, keeping the id
    pub fn reset(&mut self) {
        self.data = [0; PAGE_SIZE];
        self.lsn = 0;
    }
}

/// Buffer pool frame structure: one page plus its residency metadata.
///
/// The pin count and dirty bit are mutated only while the owning buffer
/// pool instance holds its latch. Callers must drop any guard on the frame
/// before calling back into the buffer pool (e.g. `unpin_page`).
#[derive(Debug)]
pub struct Frame {
    pub page: Page,
    pub frame_id: FrameId,
    pub pin_count: u32,
    pub is_dirty: bool,
}

impl Frame {
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            page: Page::new(INVALID_PAGE_ID),
            frame_id,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

/// Smart pointer to a frame
pub type FramePtr = Arc<RwLock<Frame>>;
