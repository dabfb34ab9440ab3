pub mod types;

pub use types::{Frame, FramePtr, Page, Rid};
pub use types::{FrameId, Lsn, PageId, TxnId};
pub use types::{INVALID_PAGE_ID, INVALID_TXN_ID, PAGE_SIZE};
