//! Bidirectional scan over the retained log window.

use std::sync::Arc;

use crate::storage::nvm::ring_buffer::{LogRingBuffer, WindowSnapshot};
use crate::storage::wal::LogRecord;
use crate::types::Lsn;

/// Cursor over `[head, tail)` of a ring snapshot.
///
/// [`Iterator::next`] walks newest to oldest (undo order);
/// [`LogScanIterator::previous`] walks back toward the newest record (redo
/// order).
///
/// The iterator takes no locks. A retention pass that clears slots inside the
/// snapshot invalidates it; reaching a cleared slot ends the scan.
pub struct LogScanIterator<'a> {
    ring: &'a LogRingBuffer,
    window: WindowSnapshot,
    /// LSN of the last record returned; `upper` before the first `next`.
    cursor: i64,
}

impl<'a> LogScanIterator<'a> {
    pub(crate) fn new(ring: &'a LogRingBuffer, window: WindowSnapshot) -> Self {
        Self {
            ring,
            window,
            cursor: window.tail.lsn.val(),
        }
    }

    /// Oldest LSN the scan can reach.
    #[must_use]
    pub fn lower(&self) -> Lsn {
        self.window.head.lsn
    }

    /// One past the newest LSN the scan can reach.
    #[must_use]
    pub fn upper(&self) -> Lsn {
        self.window.tail.lsn
    }

    /// Returns true if `next` would move to an older record.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.cursor > self.lower().val()
    }

    /// Returns true if `previous` would move to a newer record.
    #[must_use]
    pub fn has_previous(&self) -> bool {
        self.cursor + 1 < self.upper().val()
    }

    /// Moves to the next newer record and returns it.
    pub fn previous(&mut self) -> Option<Arc<LogRecord>> {
        if !self.has_previous() {
            return None;
        }
        self.cursor += 1;
        self.record(self.cursor)
    }

    fn record(&self, lsn: i64) -> Option<Arc<LogRecord>> {
        let offset = (lsn - self.lower().val()) as usize;
        let idx = self.ring.index_after(self.window.head.idx, offset);
        self.ring.slot(idx).record()
    }
}

impl Iterator for LogScanIterator<'_> {
    type Item = Arc<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }
        self.cursor -= 1;
        self.record(self.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::nvm::latency::LatencyModel;
    use crate::storage::nvm::ring_buffer::LogPointer;
    use std::collections::HashSet;

    fn ring_with_window(first: i64, txs: &[i64]) -> LogRingBuffer {
        let origin = LogPointer::new(2, Lsn::new(first));
        let ring = LogRingBuffer::with_pointers(8, origin, origin, LatencyModel::None).unwrap();
        for (i, &tx) in txs.iter().enumerate() {
            ring.insert(Arc::new(LogRecord::start(tx)), Lsn::new(first + i as i64))
                .unwrap();
        }
        ring.move_tail_forward();
        ring
    }

    #[test]
    fn test_next_then_previous() {
        let ring = ring_with_window(10, &[10, 11, 12, 13]);
        let mut iter = ring.iter();
        assert_eq!(iter.lower(), Lsn::new(10));
        assert_eq!(iter.upper(), Lsn::new(14));

        let backward: Vec<_> = iter.by_ref().map(|r| r.tx_number()).collect();
        assert_eq!(backward, vec![13, 12, 11, 10]);
        assert!(!iter.has_next());

        let mut forward = Vec::new();
        for _ in 0..3 {
            forward.push(iter.previous().unwrap().tx_number());
        }
        assert_eq!(forward, vec![11, 12, 13]);
        assert!(!iter.has_previous());
        assert!(iter.previous().is_none());
    }

    #[test]
    fn test_records_carry_lsn_positions() {
        let ring = ring_with_window(10, &[1, 2]);
        let records: Vec<_> = ring.iter().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(ring.record_at(Lsn::new(11)).unwrap().tx_number(), 2);
        assert_eq!(records[0].tx_number(), 2);
    }

    #[test]
    fn test_empty_window() {
        let ring = ring_with_window(0, &[]);
        let mut iter = ring.iter();
        assert!(!iter.has_next());
        assert!(!iter.has_previous());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_fresh_iterator_has_no_previous() {
        let ring = ring_with_window(0, &[5, 6]);
        let mut iter = ring.iter();
        assert!(iter.previous().is_none());
        assert_eq!(iter.next().unwrap().tx_number(), 6);
        assert!(!iter.has_previous());
    }

    #[test]
    fn test_cleared_slot_ends_scan() {
        let ring = ring_with_window(0, &[1, 2, 3]);
        let mut iter = ring.iter();
        ring.move_head_forward(&HashSet::new());
        assert!(iter.next().is_none());
    }
}
