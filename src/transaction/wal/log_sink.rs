use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Lsn, TxnId};

#[derive(Error, Debug)]
pub enum WalError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

/// Kinds of transaction records the sink accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogRecordType {
    Begin = 1,
    Commit = 2,
    Abort = 3,
}

/// Append-only transaction log.
///
/// Recovery and replay live outside this crate; the sink exists so that
/// transactions and the buffer pool have a log reference to hand records
/// to. Each record is a fixed 13-byte little-endian block:
/// `{lsn: u64, txn_id: u32, type: u8}`.
pub struct LogSink {
    log_file: Mutex<File>,
    next_lsn: AtomicU64,
}

const RECORD_SIZE: usize = 13;

impl LogSink {
    pub fn new(log_path: impl AsRef<Path>) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(log_path)?;

        Ok(Self {
            log_file: Mutex::new(file),
            next_lsn: AtomicU64::new(1),
        })
    }

    /// Append one record, returning its assigned LSN
    pub fn append(&self, txn_id: TxnId, record_type: LogRecordType) -> Result<Lsn, WalError> {
        let lsn = self.next_lsn.fetch_add(1, Ordering::SeqCst);

        let mut record = [0u8; RECORD_SIZE];
        LittleEndian::write_u64(&mut record[0..8], lsn);
        LittleEndian::write_u32(&mut record[8..12], txn_id);
        record[12] = record_type as u8;

        let mut file = self.log_file.lock();
        file.write_all(&record)?;

        Ok(lsn)
    }

    /// Force buffered records to stable storage
    pub fn flush(&self) -> Result<(), WalError> {
        let mut file = self.log_file.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// The LSN that the next appended record will receive
    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn.load(Ordering::SeqCst)
    }
}
