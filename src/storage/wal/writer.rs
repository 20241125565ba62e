//! Disk log writer for append-only log writing.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{NvWalError, Result};
use crate::storage::wal::{complete_entries_end, LogHeader};
use crate::types::Value;

/// Byte offset of an entry in the disk log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPosition(u64);

impl LogPosition {
    /// Returns the byte offset of the entry.
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.0
    }
}

/// Writer for appending folded records to the disk log.
pub struct LogWriter {
    /// Path to the log file.
    path: PathBuf,
    /// Buffered writer for efficient I/O.
    writer: BufWriter<File>,
    /// File header (existing or freshly written).
    header: LogHeader,
    /// Offset one past the last appended entry.
    end_offset: u64,
    /// Offset up to which the file has been fsynced.
    synced_offset: u64,
}

impl LogWriter {
    /// Creates a new log file or opens an existing one for appending.
    ///
    /// An existing file keeps its own checksum setting; `enable_checksums`
    /// only applies to new files.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created, opened or has an
    /// invalid header.
    pub fn open(path: &Path, enable_checksums: bool) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| NvWalError::StorageError(format!("Failed to open log file: {e}")))?;

        let file_len = file
            .metadata()
            .map_err(|e| NvWalError::StorageError(format!("Failed to get log metadata: {e}")))?
            .len();

        let header = if file_len == 0 {
            let header = LogHeader::new(uuid::Uuid::new_v4(), enable_checksums);
            header.write_to(&mut file)?;
            file.sync_all()
                .map_err(|e| NvWalError::StorageError(format!("Failed to sync log header: {e}")))?;
            header
        } else {
            let header = LogHeader::read_from(&mut file)?;
            header.validate()?;

            let data_end = complete_entries_end(&mut file, &header, file_len)?;
            if data_end < file_len {
                tracing::warn!(
                    path = %path.display(),
                    torn_bytes = file_len - data_end,
                    "truncating torn entry at end of disk log"
                );
                file.set_len(data_end).map_err(|e| {
                    NvWalError::StorageError(format!("Failed to truncate torn log tail: {e}"))
                })?;
                file.sync_all()
                    .map_err(|e| NvWalError::StorageError(format!("Failed to sync log: {e}")))?;
            }
            header
        };

        let end_offset = file
            .seek(SeekFrom::End(0))
            .map_err(|e| NvWalError::StorageError(format!("Failed to seek log: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            header,
            end_offset,
            synced_offset: end_offset,
        })
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the log header.
    #[must_use]
    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    /// Returns the offset one past the last appended entry.
    #[must_use]
    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    /// Appends one record's values to the log.
    ///
    /// Returns the position of the new entry. The entry is buffered until
    /// [`LogWriter::flush`] is called with this (or a later) position.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn append(&mut self, values: &[Value]) -> Result<LogPosition> {
        let data = bincode::serialize(values).map_err(|e| {
            NvWalError::WalError(format!("Failed to serialize log entry: {e}"))
        })?;
        let len = u32::try_from(data.len()).map_err(|_| {
            NvWalError::WalError(format!("Log entry too large: {} bytes", data.len()))
        })?;
        let len_bytes = len.to_le_bytes();

        self.writer
            .write_all(&len_bytes)
            .map_err(|e| NvWalError::StorageError(format!("Failed to write entry length: {e}")))?;
        self.writer
            .write_all(&data)
            .map_err(|e| NvWalError::StorageError(format!("Failed to write entry data: {e}")))?;

        let mut entry_len = 4 + u64::from(len) + 4;
        if self.header.enable_checksums {
            let checksum = crc32fast::hash(&data);
            self.writer
                .write_all(&checksum.to_le_bytes())
                .map_err(|e| NvWalError::StorageError(format!("Failed to write checksum: {e}")))?;
            entry_len += 4;
        }

        self.writer
            .write_all(&len_bytes)
            .map_err(|e| NvWalError::StorageError(format!("Failed to write entry trailer: {e}")))?;

        let position = LogPosition(self.end_offset);
        self.end_offset += entry_len;
        Ok(position)
    }

    /// Makes every entry up to and including `position` durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or fsync fails.
    pub fn flush(&mut self, position: LogPosition) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| NvWalError::StorageError(format!("Failed to flush log: {e}")))?;

        if position.offset() >= self.synced_offset {
            self.sync()?;
        }
        Ok(())
    }

    /// Flushes buffered writes and fsyncs the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| NvWalError::StorageError(format!("Failed to flush log: {e}")))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| NvWalError::StorageError(format!("Failed to sync log: {e}")))?;
        self.synced_offset = self.end_offset;
        Ok(())
    }
}
