//! nvwal - write-ahead log staging buffer for persistent memory
//!
//! Log records are appended into a fixed-capacity ring that models
//! byte-addressable non-volatile memory. A commit only waits for its records
//! to become durable in the ring; background tasks later reclaim space behind
//! the oldest active transaction and fold the ring into an ordinary disk log.
//! After a restart the ring is rebuilt from a small control file plus a
//! backward scan of that disk log.
//!
//! ```ignore
//! use nvwal::{LogRecord, NvmLogConfig, NvmLogManager};
//!
//! let manager = NvmLogManager::open(NvmLogConfig::new().with_log_dir("data/log"))?;
//! manager.append(LogRecord::start(1))?;
//! let lsn = manager.append(LogRecord::commit(1))?;
//! manager.flush(lsn);
//! manager.remove_tx_log_list(1);
//! ```

pub mod error;
pub mod storage;
pub mod types;

pub use error::{NvWalError, Result};
pub use storage::nvm::{
    CheckpointConfig, CheckpointInfo, CheckpointPolicy, CheckpointTask, Checkpointer,
    ControlState, LatencyModel, LogPointer, LogRingBuffer, LogScanIterator, NvmLogConfig,
    NvmLogManager, PersistOutcome, PersistSchedule, PersistTask, RebuildReport, Startup,
    TaskHandle, TransactionCoordinator, WindowSnapshot,
};
pub use storage::wal::{LogOp, LogReader, LogRecord, LogWriter};
pub use types::{Lsn, TxNumber, Value};
