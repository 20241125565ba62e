//! Fixed-layout control record used to reopen the ring after a restart.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use crate::error::{NvWalError, Result};
use crate::storage::nvm::ring_buffer::{LogPointer, WindowSnapshot};
use crate::types::Lsn;

/// Minimal state needed to reopen the ring without replaying the whole log.
///
/// Layout (big-endian): `global_lsn: i64, capacity: i32, tail_idx: i32,
/// tail_lsn: i64, head_idx: i32, head_lsn: i64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlState {
    /// Next LSN the manager would have handed out.
    pub global_lsn: Lsn,
    /// Ring capacity in slots.
    pub capacity: usize,
    /// Tail pointer.
    pub tail: LogPointer,
    /// Head pointer.
    pub head: LogPointer,
}

impl ControlState {
    /// Serialized size in bytes.
    pub const SERIALIZED_SIZE: usize = 8 + 4 + 4 + 8 + 4 + 8;

    /// Builds control state from a window snapshot.
    #[must_use]
    pub fn new(global_lsn: Lsn, capacity: usize, window: WindowSnapshot) -> Self {
        Self {
            global_lsn,
            capacity,
            tail: window.tail,
            head: window.head,
        }
    }

    /// Encodes the state into its fixed layout.
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity or an index does not fit in an `i32`.
    pub fn encode(&self) -> Result<[u8; Self::SERIALIZED_SIZE]> {
        let mut buf = [0u8; Self::SERIALIZED_SIZE];
        let mut pos = 0;

        self.global_lsn.write_to(&mut buf, pos)?;
        pos += Lsn::SIZE;
        put_i32(&mut buf, &mut pos, self.capacity, "capacity")?;
        put_i32(&mut buf, &mut pos, self.tail.idx, "tail index")?;
        self.tail.lsn.write_to(&mut buf, pos)?;
        pos += Lsn::SIZE;
        put_i32(&mut buf, &mut pos, self.head.idx, "head index")?;
        self.head.lsn.write_to(&mut buf, pos)?;

        Ok(buf)
    }

    /// Decodes the fixed layout.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` has the wrong size or holds negative sizes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::SERIALIZED_SIZE {
            return Err(NvWalError::CorruptedLog(format!(
                "Control state is {} bytes, expected {}",
                buf.len(),
                Self::SERIALIZED_SIZE
            )));
        }

        let mut pos = 0;
        let global_lsn = Lsn::read_from(buf, pos)?;
        pos += Lsn::SIZE;
        let capacity = get_i32(buf, &mut pos, "capacity")?;
        let tail_idx = get_i32(buf, &mut pos, "tail index")?;
        let tail_lsn = Lsn::read_from(buf, pos)?;
        pos += Lsn::SIZE;
        let head_idx = get_i32(buf, &mut pos, "head index")?;
        let head_lsn = Lsn::read_from(buf, pos)?;

        Ok(Self {
            global_lsn,
            capacity,
            tail: LogPointer::new(tail_idx, tail_lsn),
            head: LogPointer::new(head_idx, head_lsn),
        })
    }

    /// Reads the control file, returning `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        match fs::read(path) {
            Ok(bytes) => Self::decode(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NvWalError::StorageError(format!(
                "Failed to read control file: {e}"
            ))),
        }
    }

    /// Writes the control file atomically (temp file, fsync, rename).
    ///
    /// # Errors
    ///
    /// Returns an error if any step of the write fails; the previous control
    /// file is left intact in that case.
    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.encode()?;
        let tmp_path = path.with_extension("tmp");

        let mut file = File::create(&tmp_path)
            .map_err(|e| NvWalError::StorageError(format!("Failed to create control file: {e}")))?;
        file.write_all(&bytes)
            .map_err(|e| NvWalError::StorageError(format!("Failed to write control file: {e}")))?;
        file.sync_all()
            .map_err(|e| NvWalError::StorageError(format!("Failed to sync control file: {e}")))?;
        drop(file);

        fs::rename(&tmp_path, path)
            .map_err(|e| NvWalError::StorageError(format!("Failed to install control file: {e}")))
    }
}

fn put_i32(buf: &mut [u8], pos: &mut usize, value: usize, field: &str) -> Result<()> {
    let value = i32::try_from(value).map_err(|_| {
        NvWalError::StorageError(format!("Control field {field} too large: {value}"))
    })?;
    buf[*pos..*pos + 4].copy_from_slice(&value.to_be_bytes());
    *pos += 4;
    Ok(())
}

fn get_i32(buf: &[u8], pos: &mut usize, field: &str) -> Result<usize> {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[*pos..*pos + 4]);
    *pos += 4;
    let value = i32::from_be_bytes(raw);
    usize::try_from(value)
        .map_err(|_| NvWalError::CorruptedLog(format!("Control field {field} is negative: {value}")))
}
