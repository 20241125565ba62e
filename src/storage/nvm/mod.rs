//! NVM-resident staging buffer for the write-ahead log.
//!
//! Transactions append records into a fixed-size ring that models
//! byte-addressable persistent memory. The ring tracks which prefix of the
//! log is durable, drops entries once no checkpoint needs them, and is
//! periodically folded into the disk log ([`crate::storage::wal`]).
//!
//! # Startup
//!
//! [`NvmLogManager::open`] either starts fresh (no control file) or rebuilds
//! the ring: the control file restores the head/tail pointers, then the disk
//! log is scanned newest-first to repopulate the slots.
//!
//! # Example
//!
//! ```ignore
//! let manager = NvmLogManager::open(NvmLogConfig::new().with_log_dir(dir))?;
//! let lsn = manager.append(LogRecord::start(1))?;
//! manager.flush(lsn);
//! ```

mod checkpointer;
mod control;
mod iterator;
mod latency;
mod manager;
mod ring_buffer;
mod slot;
mod task;

pub use checkpointer::{
    CheckpointConfig, CheckpointInfo, CheckpointPolicy, Checkpointer, TransactionCoordinator,
};
pub use control::ControlState;
pub use iterator::LogScanIterator;
pub use latency::LatencyModel;
pub use manager::{NvmLogManager, Startup};
pub use ring_buffer::{
    CapturedWindow, LogPointer, LogRingBuffer, PersistOutcome, RebuildReport, WindowSnapshot,
};
pub use slot::LogRecordSlot;
pub use task::{CheckpointTask, PersistSchedule, PersistTask, TaskHandle};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NvWalError, Result};

/// Default ring capacity in slots.
pub const DEFAULT_RING_CAPACITY: usize = 10_000_000;

/// Default control file name.
pub const DEFAULT_CONTROL_FILE: &str = "nvm.bin";

/// Default disk log file name.
pub const DEFAULT_DISK_LOG_FILE: &str = "nvm.log";

/// Configuration for the NVM log manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvmLogConfig {
    /// Directory holding the control file and the disk log.
    pub log_dir: PathBuf,
    /// Control file name inside `log_dir` (default: `nvm.bin`).
    pub control_file: String,
    /// Disk log file name inside `log_dir` (default: `nvm.log`).
    pub disk_log_file: String,
    /// Number of ring slots (default: 10,000,000).
    pub capacity: usize,
    /// Simulated NVM write latency (default: 400ns spin).
    pub latency: LatencyModel,
    /// Whether new disk logs checksum their entries (default: true).
    pub enable_checksums: bool,
}

impl Default for NvmLogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("data/log"),
            control_file: DEFAULT_CONTROL_FILE.to_string(),
            disk_log_file: DEFAULT_DISK_LOG_FILE.to_string(),
            capacity: DEFAULT_RING_CAPACITY,
            latency: LatencyModel::nvm_default(),
            enable_checksums: true,
        }
    }
}

impl NvmLogConfig {
    /// Creates a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log directory.
    #[must_use]
    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    /// Sets the ring capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the simulated write latency.
    #[must_use]
    pub fn with_latency(mut self, latency: LatencyModel) -> Self {
        self.latency = latency;
        self
    }

    /// Sets the control file name.
    #[must_use]
    pub fn with_control_file(mut self, name: impl Into<String>) -> Self {
        self.control_file = name.into();
        self
    }

    /// Sets the disk log file name.
    #[must_use]
    pub fn with_disk_log_file(mut self, name: impl Into<String>) -> Self {
        self.disk_log_file = name.into();
        self
    }

    /// Sets whether new disk logs carry checksums.
    #[must_use]
    pub fn with_checksums(mut self, enable_checksums: bool) -> Self {
        self.enable_checksums = enable_checksums;
        self
    }

    /// Returns the full path of the control file.
    #[must_use]
    pub fn control_path(&self) -> PathBuf {
        self.log_dir.join(&self.control_file)
    }

    /// Returns the full path of the disk log.
    #[must_use]
    pub fn disk_log_path(&self) -> PathBuf {
        self.log_dir.join(&self.disk_log_file)
    }

    /// Returns the log directory.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity is zero or does not fit the control
    /// file's 32-bit field, or if the file names are empty or equal.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(NvWalError::InvalidConfig(
                "Ring buffer capacity must be greater than 0".into(),
            ));
        }
        if i32::try_from(self.capacity).is_err() {
            return Err(NvWalError::InvalidConfig(format!(
                "Ring buffer capacity {} exceeds {}",
                self.capacity,
                i32::MAX
            )));
        }
        if self.control_file.is_empty() || self.disk_log_file.is_empty() {
            return Err(NvWalError::InvalidConfig("File names must not be empty".into()));
        }
        if self.control_file == self.disk_log_file {
            return Err(NvWalError::InvalidConfig(
                "Control file and disk log must be different files".into(),
            ));
        }
        Ok(())
    }
}
