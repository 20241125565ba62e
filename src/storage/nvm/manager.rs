//! Orchestrates the NVM ring, LSN assignment and per-transaction lists.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{NvWalError, Result};
use crate::storage::nvm::control::ControlState;
use crate::storage::nvm::iterator::LogScanIterator;
use crate::storage::nvm::ring_buffer::{LogRingBuffer, PersistOutcome, RebuildReport};
use crate::storage::nvm::NvmLogConfig;
use crate::storage::wal::{LogReader, LogRecord, LogWriter};
use crate::types::{Lsn, TxNumber};

/// How the manager reached its ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    /// No control file: empty ring, LSNs start at 0.
    Fresh,
    /// Control file found: ring reopened and rebuilt from the disk log.
    Rebuilt(RebuildReport),
}

/// First startup phase: decide between a fresh ring and a rebuild.
enum StartupPlan {
    Fresh,
    Rebuild(ControlState),
}

impl StartupPlan {
    fn detect(config: &NvmLogConfig) -> Result<Self> {
        Ok(match ControlState::read(&config.control_path())? {
            None => StartupPlan::Fresh,
            Some(state) => StartupPlan::Rebuild(state),
        })
    }
}

/// NVM log manager.
///
/// Owns the ring buffer, the global LSN counter, the per-transaction record
/// lists used for fast undo, and the disk log the ring is folded into.
pub struct NvmLogManager {
    /// Configuration the manager was opened with.
    config: NvmLogConfig,
    /// The NVM ring.
    ring: LogRingBuffer,
    /// Next LSN to hand out.
    next_lsn: AtomicI64,
    /// Records appended by each live transaction, oldest first.
    tx_logs: RwLock<HashMap<TxNumber, Vec<Arc<LogRecord>>>>,
    /// Disk log; the mutex also serializes persisters.
    disk_log: Mutex<LogWriter>,
    /// Startup path taken by `open`.
    startup: Startup,
}

impl NvmLogManager {
    /// Opens the manager, rebuilding the ring if a control file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the control file or
    /// disk log cannot be read, or the persisted state is inconsistent. A
    /// disk log shorter than the persisted window is not an error; see
    /// [`RebuildReport::is_complete`].
    pub fn open(config: NvmLogConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.log_dir).map_err(|e| {
            NvWalError::StorageError(format!("Failed to create log directory: {e}"))
        })?;

        let (ring, next_lsn, startup) = match StartupPlan::detect(&config)? {
            StartupPlan::Fresh => {
                tracing::info!(capacity = config.capacity, "starting fresh NVM log");
                let ring = LogRingBuffer::new(config.capacity, config.latency)?;
                (ring, Lsn::ZERO, Startup::Fresh)
            }
            StartupPlan::Rebuild(state) => Self::rebuild(&config, state)?,
        };

        let disk_log = LogWriter::open(&config.disk_log_path(), config.enable_checksums)?;

        Ok(Self {
            config,
            ring,
            next_lsn: AtomicI64::new(next_lsn.val()),
            tx_logs: RwLock::new(HashMap::new()),
            disk_log: Mutex::new(disk_log),
            startup,
        })
    }

    /// Second startup phase for a reopened ring.
    fn rebuild(
        config: &NvmLogConfig,
        state: ControlState,
    ) -> Result<(LogRingBuffer, Lsn, Startup)> {
        tracing::info!(
            global_lsn = state.global_lsn.val(),
            capacity = state.capacity,
            head_idx = state.head.idx,
            head_lsn = state.head.lsn.val(),
            tail_idx = state.tail.idx,
            tail_lsn = state.tail.lsn.val(),
            "rebuilding NVM log from control state"
        );

        if state.capacity != config.capacity {
            tracing::warn!(
                persisted = state.capacity,
                configured = config.capacity,
                "persisted ring capacity overrides configuration"
            );
        }

        if state.global_lsn < state.tail.lsn {
            return Err(NvWalError::CorruptedLog(format!(
                "Global LSN {} behind durable tail {}",
                state.global_lsn, state.tail.lsn
            )));
        }
        let next_lsn = if state.global_lsn > state.tail.lsn {
            tracing::warn!(
                global_lsn = state.global_lsn.val(),
                tail_lsn = state.tail.lsn.val(),
                "discarding LSNs that were never durable"
            );
            state.tail.lsn
        } else {
            state.global_lsn
        };

        let ring =
            LogRingBuffer::with_pointers(state.capacity, state.head, state.tail, config.latency)?;

        let report = if state.head.lsn == state.tail.lsn {
            ring.rebuild(std::iter::empty())?
        } else {
            let mut reader = LogReader::open(&config.disk_log_path())?;
            ring.rebuild(reader.backward())?
        };

        Ok((ring, next_lsn, Startup::Rebuilt(report)))
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &NvmLogConfig {
        &self.config
    }

    /// Returns how the manager started.
    #[must_use]
    pub fn startup(&self) -> Startup {
        self.startup
    }

    /// Returns the ring buffer.
    #[must_use]
    pub fn ring(&self) -> &LogRingBuffer {
        &self.ring
    }

    /// Returns the LSN the next append will receive.
    #[must_use]
    pub fn next_lsn(&self) -> Lsn {
        Lsn::new(self.next_lsn.load(Ordering::Acquire))
    }

    /// Appends a record and returns its LSN.
    ///
    /// The record is stamped with the next LSN, written into the ring and
    /// then added to its transaction's list. It is not durable until
    /// [`NvmLogManager::flush`] returns for that LSN.
    ///
    /// # Errors
    ///
    /// Returns [`NvWalError::InvalidRecord`] if the record already carries an
    /// LSN, and [`NvWalError::RingOverflow`] if the ring cannot hold it. A
    /// rejected record takes no LSN and is not added to its transaction's
    /// list.
    pub fn append(&self, record: LogRecord) -> Result<Lsn> {
        if let Some(lsn) = record.lsn() {
            return Err(NvWalError::InvalidRecord(format!(
                "Record already stamped with LSN {lsn}"
            )));
        }

        let lsn = self.reserve_lsn()?;
        record.set_lsn(lsn)?;
        let record = Arc::new(record);
        self.ring.insert(Arc::clone(&record), lsn)?;

        self.tx_logs
            .write()
            .entry(record.tx_number())
            .or_default()
            .push(record);
        Ok(lsn)
    }

    /// Takes the next LSN, refusing one the ring could not hold.
    ///
    /// The head only moves forward, so an LSN inside the window when it is
    /// reserved stays inside it until inserted.
    fn reserve_lsn(&self) -> Result<Lsn> {
        let capacity = self.ring.capacity();
        let mut next = self.next_lsn.load(Ordering::Acquire);
        loop {
            let head_lsn = self.ring.head_lsn();
            if next - head_lsn.val() >= capacity as i64 {
                return Err(NvWalError::RingOverflow {
                    lsn: Lsn::new(next),
                    head_lsn,
                    capacity,
                });
            }
            match self.next_lsn.compare_exchange_weak(
                next,
                next + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(Lsn::new(next)),
                Err(current) => next = current,
            }
        }
    }

    /// Blocks until every record up to and including `lsn` is durable.
    pub fn flush(&self, lsn: Lsn) {
        self.ring.check_persistence(lsn);
    }

    /// Drops the record list of a finished transaction.
    pub fn remove_tx_log_list(&self, tx_number: TxNumber) -> Option<Vec<Arc<LogRecord>>> {
        self.tx_logs.write().remove(&tx_number)
    }

    /// Returns a transaction's records, newest first.
    ///
    /// The iterator works on a copy, so later appends do not show up in it.
    #[must_use]
    pub fn tx_log_record_iterator(
        &self,
        tx_number: TxNumber,
    ) -> Option<impl Iterator<Item = Arc<LogRecord>>> {
        self.tx_logs
            .read()
            .get(&tx_number)
            .map(|records| records.clone().into_iter().rev())
    }

    /// Returns a newest-first scan over the retained window.
    #[must_use]
    pub fn log_record_iterator(&self) -> LogScanIterator<'_> {
        self.ring.iter()
    }

    /// Reclaims log space no longer needed by `active` transactions.
    ///
    /// `active` must be captured atomically with respect to transaction
    /// starts. Returns the new head LSN.
    pub fn checkpoint(&self, active: &[TxNumber]) -> Lsn {
        let active: HashSet<TxNumber> = active.iter().copied().collect();
        let head_lsn = self.ring.move_head_forward(&active);
        tracing::info!(
            head_lsn = head_lsn.val(),
            active = active.len(),
            "NVM log checkpoint complete"
        );
        head_lsn
    }

    /// Writes control state, then folds `[head, tail)` into the disk log.
    ///
    /// The control state and the drained records come from one capture of
    /// the window. Retention is held off only while the records are copied
    /// out; neither fsync runs under the head lock.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the control file or the disk log fails.
    /// The ring is unchanged, so the call can be retried.
    pub fn persist(&self) -> Result<PersistOutcome> {
        let mut disk_log = self.disk_log.lock();
        let window = self.ring.capture_window()?;

        let state = ControlState::new(self.next_lsn(), self.ring.capacity(), window.snapshot());
        state.write(&self.config.control_path())?;
        let outcome = window.drain_into(&mut disk_log)?;

        tracing::info!(
            records = outcome.records,
            head_lsn = outcome.window.head.lsn.val(),
            tail_lsn = outcome.window.tail.lsn.val(),
            "persisted NVM log buffer"
        );
        Ok(outcome)
    }

    /// Fraction of the ring occupied by the retained window, in `0..=1`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        let head = self.ring.head_lsn().val();
        let tail = self.ring.tail_lsn().val();
        (tail - head) as f64 / self.ring.capacity() as f64
    }
}
