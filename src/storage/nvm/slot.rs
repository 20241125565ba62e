//! A single cell of the NVM ring buffer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::storage::wal::LogRecord;

/// One ring position: a record reference and its durability flag.
///
/// Invariant: `durable` is only true while `record` is populated. Writers
/// store the record before raising the flag and lower the flag before
/// dropping the record.
#[derive(Debug, Default)]
pub struct LogRecordSlot {
    durable: AtomicBool,
    record: Mutex<Option<Arc<LogRecord>>>,
}

impl LogRecordSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once the record's payload and flag have both been written.
    #[must_use]
    pub fn is_durable(&self) -> bool {
        self.durable.load(Ordering::Acquire)
    }

    /// Returns the stored record, if any.
    #[must_use]
    pub fn record(&self) -> Option<Arc<LogRecord>> {
        self.record.lock().clone()
    }

    /// Returns true if a record is stored.
    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.record.lock().is_some()
    }

    pub(crate) fn store(&self, record: Arc<LogRecord>) {
        *self.record.lock() = Some(record);
    }

    pub(crate) fn mark_durable(&self) {
        self.durable.store(true, Ordering::Release);
    }

    pub(crate) fn clear(&self) {
        self.durable.store(false, Ordering::Release);
        self.record.lock().take();
    }
}
