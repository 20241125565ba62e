//! Disk log reader for forward and backward scans.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{NvWalError, Result};
use crate::storage::wal::{complete_entries_end, LogHeader};
use crate::types::Value;

/// Reader for disk log files.
pub struct LogReader {
    /// Path to the log file.
    path: PathBuf,
    /// Buffered reader.
    reader: BufReader<File>,
    /// Log header.
    header: LogHeader,
    /// Current position for forward reads.
    position: u64,
    /// End of the last complete entry; torn bytes past it are ignored.
    data_end: u64,
}

impl LogReader {
    /// Opens a log file for reading.
    ///
    /// A torn entry at the end of the file is skipped by both forward and
    /// backward scans.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or has an invalid header.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| NvWalError::StorageError(format!("Failed to open log file: {e}")))?;
        let file_len = file
            .metadata()
            .map_err(|e| NvWalError::StorageError(format!("Failed to get log metadata: {e}")))?
            .len();

        let mut reader = BufReader::new(file);
        let header = LogHeader::read_from(&mut reader)?;
        header.validate()?;

        let data_end = complete_entries_end(&mut reader, &header, file_len)?;
        if data_end < file_len {
            tracing::warn!(
                path = %path.display(),
                torn_bytes = file_len - data_end,
                "ignoring torn entry at end of disk log"
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            header,
            position: LogHeader::serialized_size() as u64,
            data_end,
        })
    }

    /// Returns the log header.
    #[must_use]
    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn checksum_len(&self) -> u64 {
        if self.header.enable_checksums {
            4
        } else {
            0
        }
    }

    /// Reads the next entry in file order.
    ///
    /// Returns `None` at end of file, including when the last entry was torn
    /// by a crash mid-append.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is corrupted.
    pub fn read_next(&mut self) -> Result<Option<Vec<Value>>> {
        self.reader
            .seek(SeekFrom::Start(self.position))
            .map_err(|e| NvWalError::StorageError(format!("Failed to seek log: {e}")))?;

        let mut len_bytes = [0u8; 4];
        match self.reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None);
            }
            Err(e) => {
                return Err(NvWalError::StorageError(format!(
                    "Failed to read entry length: {e}"
                )));
            }
        }
        let len = u64::from(u32::from_le_bytes(len_bytes));

        let entry_len = 4 + len + self.checksum_len() + 4;
        if self.position + entry_len > self.data_end {
            return Ok(None);
        }

        let values = self.read_entry_body(self.position, len)?;
        self.position += entry_len;
        Ok(Some(values))
    }

    /// Reads all entries in file order.
    ///
    /// # Errors
    ///
    /// Returns an error if any entry cannot be read.
    pub fn read_all(&mut self) -> Result<Vec<Vec<Value>>> {
        let mut entries = Vec::new();

        while let Some(entry) = self.read_next()? {
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Resets forward reads to the first entry.
    pub fn reset(&mut self) {
        self.position = LogHeader::serialized_size() as u64;
    }

    /// Returns an iterator over entries, newest first.
    pub fn backward(&mut self) -> BackwardEntries<'_> {
        let end = self.data_end;
        BackwardEntries { reader: self, end }
    }

    /// Reads the entry that ends at byte offset `end`.
    ///
    /// Returns the entry and the offset at which it starts.
    fn read_entry_ending_at(&mut self, end: u64) -> Result<(Vec<Value>, u64)> {
        let header_size = LogHeader::serialized_size() as u64;
        if end < header_size + 8 {
            return Err(NvWalError::CorruptedLog(format!(
                "Truncated log entry ending at offset {end}"
            )));
        }

        self.reader
            .seek(SeekFrom::Start(end - 4))
            .map_err(|e| NvWalError::StorageError(format!("Failed to seek log: {e}")))?;
        let mut len_bytes = [0u8; 4];
        self.reader
            .read_exact(&mut len_bytes)
            .map_err(|e| NvWalError::StorageError(format!("Failed to read entry trailer: {e}")))?;
        let len = u64::from(u32::from_le_bytes(len_bytes));

        let entry_len = 4 + len + self.checksum_len() + 4;
        let start = end
            .checked_sub(entry_len)
            .filter(|&start| start >= header_size)
            .ok_or_else(|| {
                NvWalError::CorruptedLog(format!(
                    "Log entry trailer at offset {} points before the header",
                    end - 4
                ))
            })?;

        self.reader
            .seek(SeekFrom::Start(start))
            .map_err(|e| NvWalError::StorageError(format!("Failed to seek log: {e}")))?;
        self.reader
            .read_exact(&mut len_bytes)
            .map_err(|e| NvWalError::StorageError(format!("Failed to read entry length: {e}")))?;
        if u64::from(u32::from_le_bytes(len_bytes)) != len {
            return Err(NvWalError::CorruptedLog(format!(
                "Log entry at offset {start} has mismatched length framing"
            )));
        }

        let values = self.read_entry_body(start, len)?;
        Ok((values, start))
    }

    /// Reads data and checksum of an entry whose length prefix was just
    /// consumed.
    fn read_entry_body(&mut self, start: u64, len: u64) -> Result<Vec<Value>> {
        let mut data = vec![0u8; len as usize];
        self.reader
            .read_exact(&mut data)
            .map_err(|e| NvWalError::StorageError(format!("Failed to read entry data: {e}")))?;

        if self.header.enable_checksums {
            let mut checksum_bytes = [0u8; 4];
            self.reader
                .read_exact(&mut checksum_bytes)
                .map_err(|e| NvWalError::StorageError(format!("Failed to read checksum: {e}")))?;

            let expected_checksum = u32::from_le_bytes(checksum_bytes);
            let actual_checksum = crc32fast::hash(&data);

            if expected_checksum != actual_checksum {
                return Err(NvWalError::ChecksumError(format!(
                    "Log entry at offset {start}"
                )));
            }
        }

        bincode::deserialize(&data).map_err(|e| {
            NvWalError::WalError(format!("Failed to deserialize log entry at offset {start}: {e}"))
        })
    }
}

/// Iterator over log entries from newest to oldest.
pub struct BackwardEntries<'a> {
    reader: &'a mut LogReader,
    end: u64,
}

impl Iterator for BackwardEntries<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.end <= LogHeader::serialized_size() as u64 {
            return None;
        }

        match self.reader.read_entry_ending_at(self.end) {
            Ok((values, start)) => {
                self.end = start;
                Some(Ok(values))
            }
            Err(e) => {
                // Stop after the first error.
                self.end = 0;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::wal::writer::LogWriter;
    use crate::storage::wal::LogRecord;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_log_with_records(records: &[LogRecord], checksums: bool) -> (PathBuf, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let log_path = temp_dir.path().join("nvm.log");

        let mut writer = LogWriter::open(&log_path, checksums).unwrap();
        for record in records {
            writer.append(&record.build_record()).unwrap();
        }
        writer.sync().unwrap();

        (log_path, temp_dir)
    }

    #[test]
    fn test_read_empty_log() {
        let (log_path, _temp) = create_log_with_records(&[], true);

        let mut reader = LogReader::open(&log_path).unwrap();
        assert!(reader.read_all().unwrap().is_empty());
        assert_eq!(reader.backward().count(), 0);
    }

    #[test]
    fn test_read_forward() {
        let records = vec![LogRecord::start(1), LogRecord::commit(1)];
        let (log_path, _temp) = create_log_with_records(&records, true);

        let mut reader = LogReader::open(&log_path).unwrap();
        let entries = reader.read_all().unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], records[0].build_record());
        assert_eq!(entries[1], records[1].build_record());
    }

    #[test]
    fn test_read_backward() {
        for checksums in [true, false] {
            let records = vec![
                LogRecord::start(1),
                LogRecord::update(1, vec![Value::String("x".into())]),
                LogRecord::commit(1),
            ];
            let (log_path, _temp) = create_log_with_records(&records, checksums);

            let mut reader = LogReader::open(&log_path).unwrap();
            let entries: Vec<_> = reader.backward().collect::<Result<_>>().unwrap();

            assert_eq!(entries.len(), 3);
            assert_eq!(entries[0], records[2].build_record());
            assert_eq!(entries[2], records[0].build_record());
        }
    }

    #[test]
    fn test_reset_rereads_from_start() {
        let records = vec![LogRecord::start(5)];
        let (log_path, _temp) = create_log_with_records(&records, true);

        let mut reader = LogReader::open(&log_path).unwrap();
        assert!(reader.read_next().unwrap().is_some());
        assert!(reader.read_next().unwrap().is_none());

        reader.reset();
        assert!(reader.read_next().unwrap().is_some());
    }

    #[test]
    fn test_torn_tail_ends_forward_scan() {
        let records = vec![LogRecord::start(1)];
        let (log_path, _temp) = create_log_with_records(&records, true);

        // Length prefix of an entry whose body never made it to disk
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        drop(file);

        let mut reader = LogReader::open(&log_path).unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_torn_tail_ends_backward_scan() {
        for checksums in [true, false] {
            let records = vec![LogRecord::start(1), LogRecord::commit(1)];
            let (log_path, _temp) = create_log_with_records(&records, checksums);

            // A fold that crashed mid-entry: prefix plus a few body bytes.
            let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
            file.write_all(&[40, 0, 0, 0, 1, 2, 3]).unwrap();
            drop(file);

            let mut reader = LogReader::open(&log_path).unwrap();
            let entries: Vec<_> = reader.backward().collect::<Result<_>>().unwrap();
            assert_eq!(entries.len(), 2);
            assert_eq!(entries[0], records[1].build_record());
            assert_eq!(entries[1], records[0].build_record());
        }
    }

    #[test]
    fn test_torn_tail_with_bad_trailer_is_skipped() {
        let records = vec![LogRecord::start(7)];
        let (log_path, _temp) = create_log_with_records(&records, true);

        // Full-length garbage whose trailer does not match its prefix.
        let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
        file.write_all(&2u32.to_le_bytes()).unwrap();
        file.write_all(&[0u8; 2 + 4]).unwrap();
        file.write_all(&9u32.to_le_bytes()).unwrap();
        drop(file);

        let mut reader = LogReader::open(&log_path).unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 1);
        let newest = reader.backward().next().unwrap().unwrap();
        assert_eq!(newest, records[0].build_record());
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let records = vec![LogRecord::update(1, vec![Value::Int64(12345)])];
        let (log_path, _temp) = create_log_with_records(&records, true);

        // Flip a byte inside the entry data
        let mut bytes = std::fs::read(&log_path).unwrap();
        let data_offset = LogHeader::serialized_size() + 4;
        bytes[data_offset + 2] ^= 0xFF;
        std::fs::write(&log_path, bytes).unwrap();

        let mut reader = LogReader::open(&log_path).unwrap();
        let first = reader.backward().next().unwrap();
        assert!(matches!(first, Err(NvWalError::ChecksumError(_))));
    }
}
