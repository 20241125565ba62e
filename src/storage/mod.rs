//! Storage layer for nvwal.
//!
//! - NVM-resident ring buffer and its manager ([`nvm`])
//! - Append-only disk log the ring is folded into ([`wal`])

pub mod nvm;
pub mod wal;

pub use nvm::{
    CheckpointConfig, CheckpointPolicy, CheckpointTask, Checkpointer, LatencyModel,
    LogRingBuffer, NvmLogConfig, NvmLogManager, PersistSchedule, PersistTask, Startup,
    TaskHandle, TransactionCoordinator,
};
pub use wal::{LogHeader, LogOp, LogReader, LogRecord, LogWriter};
