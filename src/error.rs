//! Error types for nvwal operations.

use thiserror::Error;

use crate::types::Lsn;

/// Result type alias using [`NvWalError`].
pub type Result<T> = std::result::Result<T, NvWalError>;

/// Error types for nvwal operations.
#[derive(Debug, Error)]
pub enum NvWalError {
    // ==================== Ring Buffer Errors ====================
    /// An LSN fell outside the window the ring can hold.
    ///
    /// This is fatal for the caller: the upstream producer outran retention,
    /// or the ring was configured too small.
    #[error("Ring overflow: LSN {lsn} outside window starting at {head_lsn} (capacity {capacity})")]
    RingOverflow {
        lsn: Lsn,
        head_lsn: Lsn,
        capacity: usize,
    },

    /// Invalid log record (bad encoding, LSN already assigned, ...).
    #[error("Invalid log record: {0}")]
    InvalidRecord(String),

    // ==================== Storage Errors ====================
    /// General storage/I/O error.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Disk log errors.
    #[error("WAL error: {0}")]
    WalError(String),

    /// Checksum validation failure.
    #[error("Checksum mismatch: {0}")]
    ChecksumError(String),

    /// Control state or log contents are inconsistent.
    #[error("Corrupted log: {0}")]
    CorruptedLog(String),

    /// Unsupported disk log version.
    #[error("Unsupported log version: {version} (max supported: {max_supported})")]
    UnsupportedVersion { version: u32, max_supported: u32 },

    // ==================== Configuration Errors ====================
    /// Configuration rejected by validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Background task could not be started or panicked.
    #[error("Background task error: {0}")]
    TaskError(String),
}
