//! Fixed-capacity circular log buffer living in persistent memory.
//!
//! The ring holds log records between two moving boundaries:
//!
//! - **head**: the oldest record still needed for recovery. Only retention
//!   ([`LogRingBuffer::move_head_forward`]) moves it.
//! - **tail**: the first LSN not yet confirmed durable. It advances through
//!   contiguous runs of durable slots ([`LogRingBuffer::move_tail_forward`]).
//!
//! `head.lsn <= tail.lsn` always holds and the window `tail.lsn - head.lsn`
//! never exceeds the capacity.
//!
//! # Locking
//!
//! The head pointer sits behind a reader/writer lock: inserts share it,
//! retention takes it exclusively. The tail pointer has its own mutex, so
//! advancing the tail never blocks inserts. Both LSNs are also published
//! through atomics for lock-free polling.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{NvWalError, Result};
use crate::storage::nvm::iterator::LogScanIterator;
use crate::storage::nvm::latency::LatencyModel;
use crate::storage::nvm::slot::LogRecordSlot;
use crate::storage::wal::{LogOp, LogPosition, LogRecord, LogWriter};
use crate::types::{Lsn, TxNumber, Value};

/// A ring boundary: slot index plus the LSN stored there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogPointer {
    /// Slot index, always below the ring capacity.
    pub idx: usize,
    /// LSN of the record at `idx`.
    pub lsn: Lsn,
}

impl LogPointer {
    /// Creates a pointer.
    #[must_use]
    pub const fn new(idx: usize, lsn: Lsn) -> Self {
        Self { idx, lsn }
    }
}

/// Consistent view of both boundaries at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Oldest retained record.
    pub head: LogPointer,
    /// First LSN not yet durable.
    pub tail: LogPointer,
}

impl WindowSnapshot {
    /// Number of records in `[head, tail)`.
    #[must_use]
    pub fn len(&self) -> usize {
        (self.tail.lsn.val() - self.head.lsn.val()) as usize
    }

    /// Returns true if the window holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.head.lsn == self.tail.lsn
    }
}

/// Outcome of rebuilding the ring from the disk log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    /// Persisted head LSN.
    pub head_lsn: Lsn,
    /// Persisted tail LSN.
    pub tail_lsn: Lsn,
    /// LSN the backward scan stopped at; `head_lsn - 1` on success.
    pub reached_lsn: Lsn,
    /// Number of records restored into slots.
    pub restored: usize,
    /// Head LSN after rebuild; above `head_lsn` if the window was truncated.
    pub effective_head_lsn: Lsn,
}

impl RebuildReport {
    /// Returns true if every slot in the persisted window was restored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.reached_lsn.val() == self.head_lsn.val() - 1
    }
}

/// Outcome of draining the ring into the disk log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Window that was drained.
    pub window: WindowSnapshot,
    /// Number of records appended to the disk log.
    pub records: usize,
    /// Position of the last appended entry, if any.
    pub last_position: Option<LogPosition>,
}

/// Circular buffer of log records with durability and retention pointers.
pub struct LogRingBuffer {
    /// Number of slots; fixed for the ring's lifetime.
    capacity: usize,
    /// Slot array, never reallocated.
    slots: Box<[LogRecordSlot]>,
    /// Oldest retained record.
    head: RwLock<LogPointer>,
    /// First non-durable record.
    tail: Mutex<LogPointer>,
    /// Published copy of `head.lsn`.
    head_lsn: AtomicI64,
    /// Published copy of `tail.lsn`.
    tail_lsn: AtomicI64,
    /// Simulated device latency.
    latency: LatencyModel,
}

impl LogRingBuffer {
    /// Creates an empty ring with both pointers at slot 0, LSN 0.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is zero.
    pub fn new(capacity: usize, latency: LatencyModel) -> Result<Self> {
        let origin = LogPointer::new(0, Lsn::ZERO);
        Self::with_pointers(capacity, origin, origin, latency)
    }

    /// Creates an empty ring whose pointers were restored from control state.
    ///
    /// The slots are empty; call [`LogRingBuffer::rebuild`] to repopulate
    /// `[head, tail)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pointers are inconsistent with each other or
    /// with `capacity`.
    pub fn with_pointers(
        capacity: usize,
        head: LogPointer,
        tail: LogPointer,
        latency: LatencyModel,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(NvWalError::InvalidConfig(
                "Ring buffer capacity must be greater than 0".into(),
            ));
        }
        validate_pointers(capacity, head, tail)?;

        let slots = (0..capacity).map(|_| LogRecordSlot::new()).collect();

        Ok(Self {
            capacity,
            slots,
            head: RwLock::new(head),
            tail: Mutex::new(tail),
            head_lsn: AtomicI64::new(head.lsn.val()),
            tail_lsn: AtomicI64::new(tail.lsn.val()),
            latency,
        })
    }

    /// Returns the number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the latency model charged on every persistent write.
    #[must_use]
    pub fn latency(&self) -> LatencyModel {
        self.latency
    }

    /// Returns the current head pointer.
    #[must_use]
    pub fn head(&self) -> LogPointer {
        *self.head.read()
    }

    /// Returns the current tail pointer.
    #[must_use]
    pub fn tail(&self) -> LogPointer {
        *self.tail.lock()
    }

    /// Returns the slot index of the head.
    #[must_use]
    pub fn head_idx(&self) -> usize {
        self.head().idx
    }

    /// Returns the head LSN.
    #[must_use]
    pub fn head_lsn(&self) -> Lsn {
        Lsn::new(self.head_lsn.load(Ordering::Acquire))
    }

    /// Returns the slot index of the tail.
    #[must_use]
    pub fn tail_idx(&self) -> usize {
        self.tail().idx
    }

    /// Returns the tail LSN.
    #[must_use]
    pub fn tail_lsn(&self) -> Lsn {
        Lsn::new(self.tail_lsn.load(Ordering::Acquire))
    }

    /// Returns a consistent snapshot of both pointers.
    #[must_use]
    pub fn snapshot(&self) -> WindowSnapshot {
        let head = self.head.read();
        let tail = *self.tail.lock();
        WindowSnapshot { head: *head, tail }
    }

    /// Returns the slot at `idx`.
    ///
    /// # Panics
    ///
    /// Panics if `idx >= capacity`.
    #[must_use]
    pub fn slot(&self, idx: usize) -> &LogRecordSlot {
        &self.slots[idx]
    }

    /// Returns the record stored for `lsn`, if it is inside the retained
    /// window and has been inserted.
    #[must_use]
    pub fn record_at(&self, lsn: Lsn) -> Option<Arc<LogRecord>> {
        let head = self.head.read();
        let offset = lsn.val() - head.lsn.val();
        if offset < 0 || offset >= self.capacity as i64 {
            return None;
        }
        self.slots[self.index_after(head.idx, offset as usize)].record()
    }

    /// Returns a newest-first scan over the current `[head, tail)` window.
    #[must_use]
    pub fn iter(&self) -> LogScanIterator<'_> {
        LogScanIterator::new(self, self.snapshot())
    }

    #[inline]
    pub(crate) fn index_after(&self, idx: usize, offset: usize) -> usize {
        (idx + offset) % self.capacity
    }

    /// Stores `record` in the slot for `lsn` and marks it durable.
    ///
    /// Payload and flag are persisted by separate barriers: a crash between
    /// them leaves the slot non-durable, which rebuild treats as absent.
    ///
    /// # Errors
    ///
    /// Returns [`NvWalError::RingOverflow`] if `lsn` lies outside
    /// `[head.lsn, head.lsn + capacity)`. No slot or pointer is touched in
    /// that case.
    pub fn insert(&self, record: Arc<LogRecord>, lsn: Lsn) -> Result<()> {
        let head = self.head.read();
        let offset = lsn.val() - head.lsn.val();
        if offset < 0 || offset >= self.capacity as i64 {
            return Err(NvWalError::RingOverflow {
                lsn,
                head_lsn: head.lsn,
                capacity: self.capacity,
            });
        }

        let slot = &self.slots[self.index_after(head.idx, offset as usize)];
        slot.store(record);
        self.latency.persist_barrier();
        slot.mark_durable();
        self.latency.persist_barrier();
        Ok(())
    }

    /// Blocks until every record up to and including `lsn` is durable.
    ///
    /// Spins on [`LogRingBuffer::move_tail_forward`]. There is no timeout: if
    /// `lsn` is never inserted this never returns.
    pub fn check_persistence(&self, lsn: Lsn) {
        while lsn >= self.tail_lsn() {
            if self.move_tail_forward() > lsn {
                break;
            }
            std::thread::yield_now();
        }
    }

    /// Advances the tail over the contiguous run of durable slots.
    ///
    /// Returns the new tail LSN.
    pub fn move_tail_forward(&self) -> Lsn {
        let mut tail = self.tail.lock();

        // A stale head only makes the bound tighter.
        let limit = self.head_lsn.load(Ordering::Acquire) + self.capacity as i64;
        let mut idx = tail.idx;
        let mut lsn = tail.lsn.val();
        while lsn < limit && self.slots[idx].is_durable() {
            idx = self.index_after(idx, 1);
            lsn += 1;
        }

        if lsn != tail.lsn.val() {
            self.latency.persist_barrier();
            tail.idx = idx;
            self.latency.persist_barrier();
            tail.lsn = Lsn::new(lsn);
            self.tail_lsn.store(lsn, Ordering::Release);
        }
        tail.lsn
    }

    /// Reclaims slots older than the oldest start record of an active
    /// transaction.
    ///
    /// Scans forward from the head, clearing slots, until it reaches the tail
    /// or a [`LogOp::Start`] record whose transaction is in `active`. Blocks
    /// all inserts while running. Returns the new head LSN.
    pub fn move_head_forward(&self, active: &HashSet<TxNumber>) -> Lsn {
        let mut head = self.head.write();
        let tail_lsn = self.tail_lsn.load(Ordering::Acquire);

        let mut idx = head.idx;
        let mut lsn = head.lsn.val();
        while lsn < tail_lsn {
            let slot = &self.slots[idx];
            if let Some(record) = slot.record() {
                if record.op() == LogOp::Start && active.contains(&record.tx_number()) {
                    break;
                }
            }
            slot.clear();
            idx = self.index_after(idx, 1);
            lsn += 1;
        }

        if lsn != head.lsn.val() {
            tracing::debug!(
                from = head.lsn.val(),
                to = lsn,
                "moved NVM log head forward"
            );
            self.latency.persist_barrier();
            head.idx = idx;
            self.latency.persist_barrier();
            head.lsn = Lsn::new(lsn);
            self.head_lsn.store(lsn, Ordering::Release);
        }
        head.lsn
    }

    /// Repopulates `[head, tail)` from disk log entries given newest first.
    ///
    /// Each decoded record is stamped with its LSN, counting down from
    /// `tail.lsn - 1`, and inserted. If the entries run out before reaching
    /// the head, the mismatch is logged and the head is moved up to the
    /// oldest restored record so the window only covers populated slots.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry cannot be read or decoded.
    pub fn rebuild<I>(&self, entries: I) -> Result<RebuildReport>
    where
        I: IntoIterator<Item = Result<Vec<Value>>>,
    {
        let WindowSnapshot { head, tail } = self.snapshot();

        let mut lsn = tail.lsn.val() - 1;
        let mut restored = 0;
        for entry in entries {
            if lsn < head.lsn.val() {
                break;
            }
            let record = LogRecord::from_values(&entry?)?;
            record.set_lsn(Lsn::new(lsn))?;
            self.insert(Arc::new(record), Lsn::new(lsn))?;
            lsn -= 1;
            restored += 1;
        }

        let mut report = RebuildReport {
            head_lsn: head.lsn,
            tail_lsn: tail.lsn,
            reached_lsn: Lsn::new(lsn),
            restored,
            effective_head_lsn: head.lsn,
        };

        tracing::info!(
            head_lsn = head.lsn.val(),
            tail_lsn = tail.lsn.val(),
            restored,
            "rebuilt NVM log ring from disk log"
        );

        if !report.is_complete() {
            tracing::warn!(
                reached_lsn = lsn,
                expected_lsn = head.lsn.val() - 1,
                "NVM log rebuild stopped early; retained window truncated"
            );
            report.effective_head_lsn = self.truncate_head_to(Lsn::new(lsn + 1));
        }

        Ok(report)
    }

    /// Moves the head to `lsn` without inspecting records.
    fn truncate_head_to(&self, lsn: Lsn) -> Lsn {
        let mut head = self.head.write();
        let tail_lsn = self.tail_lsn.load(Ordering::Acquire);
        let target = lsn.val().clamp(head.lsn.val(), tail_lsn);

        for offset in 0..(target - head.lsn.val()) as usize {
            self.slots[self.index_after(head.idx, offset)].clear();
        }
        head.idx = self.index_after(head.idx, (target - head.lsn.val()) as usize);
        head.lsn = Lsn::new(target);
        self.head_lsn.store(target, Ordering::Release);
        head.lsn
    }

    /// Captures the window and clones out its records.
    ///
    /// The head read lock is held only while the records are collected, so
    /// retention waits for the copy but not for any disk I/O that follows.
    ///
    /// # Errors
    ///
    /// Returns an error if a slot inside the window is empty.
    pub fn capture_window(&self) -> Result<CapturedWindow> {
        let head = self.head.read();
        let window = WindowSnapshot {
            head: *head,
            tail: *self.tail.lock(),
        };

        let records = (0..window.len())
            .map(|offset| {
                let idx = self.index_after(window.head.idx, offset);
                self.slots[idx].record().ok_or_else(|| {
                    NvWalError::CorruptedLog(format!(
                        "Empty slot {idx} inside retained window at LSN {}",
                        window.head.lsn.val() + offset as i64
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CapturedWindow { window, records })
    }

    /// Folds every record in `[head, tail)` into the disk log.
    ///
    /// # Errors
    ///
    /// Returns an error if appending or flushing fails. The ring itself is
    /// not modified, so the call can be retried.
    pub fn persist(&self, writer: &mut LogWriter) -> Result<PersistOutcome> {
        self.capture_window()?.drain_into(writer)
    }
}

/// Records of one window, in LSN order, detached from the ring.
#[derive(Debug)]
pub struct CapturedWindow {
    window: WindowSnapshot,
    records: Vec<Arc<LogRecord>>,
}

impl CapturedWindow {
    /// Returns the captured window.
    #[must_use]
    pub fn snapshot(&self) -> WindowSnapshot {
        self.window
    }

    /// Returns the captured records, oldest first.
    #[must_use]
    pub fn records(&self) -> &[Arc<LogRecord>] {
        &self.records
    }

    /// Appends every record to `writer` in LSN order, then flushes once.
    ///
    /// # Errors
    ///
    /// Returns an error if the disk log fails.
    pub fn drain_into(self, writer: &mut LogWriter) -> Result<PersistOutcome> {
        let mut last_position = None;
        for record in &self.records {
            last_position = Some(writer.append(&record.build_record())?);
        }

        if let Some(position) = last_position {
            writer.flush(position)?;
        }

        Ok(PersistOutcome {
            window: self.window,
            records: self.records.len(),
            last_position,
        })
    }
}

fn validate_pointers(capacity: usize, head: LogPointer, tail: LogPointer) -> Result<()> {
    if head.idx >= capacity || tail.idx >= capacity {
        return Err(NvWalError::CorruptedLog(format!(
            "Ring pointer index out of range (head {}, tail {}, capacity {capacity})",
            head.idx, tail.idx
        )));
    }

    let window = tail.lsn.val() - head.lsn.val();
    if head.lsn.val() < 0 || window < 0 || window > capacity as i64 {
        return Err(NvWalError::CorruptedLog(format!(
            "Ring window [{}, {}) invalid for capacity {capacity}",
            head.lsn.val(),
            tail.lsn.val()
        )));
    }

    if (head.idx + window as usize) % capacity != tail.idx {
        return Err(NvWalError::CorruptedLog(format!(
            "Tail index {} does not match head index {} plus window {window}",
            tail.idx, head.idx
        )));
    }

    Ok(())
}
