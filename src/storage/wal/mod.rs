//! Disk-resident log that receives records folded out of the NVM ring.
//!
//! # File Layout
//!
//! - A header with magic bytes, version, log ID and checksum flag
//! - Length-framed entries, each holding one record's value sequence
//!
//! Every entry is framed as `[len][data][crc32?][len]`. The trailing length
//! lets [`LogReader`] walk the log newest-first, which is the order the ring
//! buffer is rebuilt in.

mod reader;
mod record;
mod writer;

pub use reader::{BackwardEntries, LogReader};
pub use record::{LogOp, LogRecord};
pub use writer::{LogPosition, LogWriter};

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{NvWalError, Result};

/// Magic bytes for disk log identification.
pub const LOG_MAGIC: &[u8; 8] = b"NVWALLOG";

/// Current disk log format version.
pub const LOG_VERSION: u32 = 1;

/// Header stored at the beginning of the disk log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHeader {
    /// Magic bytes for file identification.
    pub magic: [u8; 8],
    /// Log format version.
    pub version: u32,
    /// Identifier assigned when the log file was created.
    pub log_id: uuid::Uuid,
    /// Whether entries carry a CRC32 checksum.
    pub enable_checksums: bool,
}

impl LogHeader {
    /// Creates a new log header.
    #[must_use]
    pub fn new(log_id: uuid::Uuid, enable_checksums: bool) -> Self {
        Self {
            magic: *LOG_MAGIC,
            version: LOG_VERSION,
            log_id,
            enable_checksums,
        }
    }

    /// Validates the header.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic bytes or version are not recognized.
    pub fn validate(&self) -> Result<()> {
        if self.magic != *LOG_MAGIC {
            return Err(NvWalError::WalError("Invalid log magic bytes".into()));
        }

        if self.version > LOG_VERSION {
            return Err(NvWalError::UnsupportedVersion {
                version: self.version,
                max_supported: LOG_VERSION,
            });
        }

        Ok(())
    }

    /// Returns the serialized size of the header.
    #[must_use]
    pub const fn serialized_size() -> usize {
        8  // magic
        + 4  // version
        + 16 // log_id
        + 1 // enable_checksums
    }

    pub(crate) fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = Vec::with_capacity(Self::serialized_size());
        buf.extend_from_slice(&self.magic);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(self.log_id.as_bytes());
        buf.push(u8::from(self.enable_checksums));

        writer
            .write_all(&buf)
            .map_err(|e| NvWalError::StorageError(format!("Failed to write log header: {e}")))
    }

    pub(crate) fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; Self::serialized_size()];
        reader
            .read_exact(&mut buf)
            .map_err(|e| NvWalError::StorageError(format!("Failed to read log header: {e}")))?;

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[0..8]);
        let mut version = [0u8; 4];
        version.copy_from_slice(&buf[8..12]);
        let mut log_id = [0u8; 16];
        log_id.copy_from_slice(&buf[12..28]);

        Ok(Self {
            magic,
            version: u32::from_le_bytes(version),
            log_id: uuid::Uuid::from_bytes(log_id),
            enable_checksums: buf[28] != 0,
        })
    }
}

/// Returns the offset one past the last entry whose framing is complete.
///
/// Walks length prefixes forward from the header. The first entry that runs
/// past `file_len`, or whose trailing length disagrees with its prefix, is a
/// torn append and ends the log. Checksums are not verified here.
pub(crate) fn complete_entries_end<R: Read + Seek>(
    reader: &mut R,
    header: &LogHeader,
    file_len: u64,
) -> Result<u64> {
    let checksum_len = if header.enable_checksums { 4 } else { 0 };
    let mut pos = LogHeader::serialized_size() as u64;
    let mut len_bytes = [0u8; 4];

    while pos + 4 <= file_len {
        reader
            .seek(SeekFrom::Start(pos))
            .map_err(|e| NvWalError::StorageError(format!("Failed to seek log: {e}")))?;
        reader
            .read_exact(&mut len_bytes)
            .map_err(|e| NvWalError::StorageError(format!("Failed to read entry length: {e}")))?;
        let len = u64::from(u32::from_le_bytes(len_bytes));

        let entry_end = pos + 4 + len + checksum_len + 4;
        if entry_end > file_len {
            break;
        }

        reader
            .seek(SeekFrom::Start(entry_end - 4))
            .map_err(|e| NvWalError::StorageError(format!("Failed to seek log: {e}")))?;
        reader
            .read_exact(&mut len_bytes)
            .map_err(|e| NvWalError::StorageError(format!("Failed to read entry trailer: {e}")))?;
        if u64::from(u32::from_le_bytes(len_bytes)) != len {
            break;
        }

        pos = entry_end;
    }

    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = LogHeader::new(uuid::Uuid::new_v4(), true);
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), LogHeader::serialized_size());

        let restored = LogHeader::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(restored, header);
        restored.validate().unwrap();
    }

    #[test]
    fn test_header_rejects_bad_magic_and_version() {
        let mut header = LogHeader::new(uuid::Uuid::nil(), false);
        header.magic = *b"NOTALOG!";
        assert!(header.validate().is_err());

        let mut header = LogHeader::new(uuid::Uuid::nil(), false);
        header.version = LOG_VERSION + 1;
        assert!(matches!(
            header.validate(),
            Err(NvWalError::UnsupportedVersion { .. })
        ));
    }
}
