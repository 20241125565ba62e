//! Log sequence numbers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NvWalError, Result};

/// Position of a record in the logical log stream.
///
/// LSNs are totally ordered by value. [`Lsn::NONE`] stands for "no LSN".
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(i64);

impl Lsn {
    /// Size of the fixed-width binary form in bytes.
    pub const SIZE: usize = 8;

    /// Sentinel meaning "none".
    pub const NONE: Lsn = Lsn(-1);

    /// The first LSN handed out by a fresh log.
    pub const ZERO: Lsn = Lsn(0);

    /// Creates an LSN from its raw value.
    #[must_use]
    pub const fn new(val: i64) -> Self {
        Lsn(val)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn val(self) -> i64 {
        self.0
    }

    /// Returns true unless this is [`Lsn::NONE`].
    #[must_use]
    pub const fn is_some(self) -> bool {
        self.0 != Self::NONE.0
    }

    /// Reads an LSN stored big-endian at `pos`.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` is too short.
    pub fn read_from(buf: &[u8], pos: usize) -> Result<Self> {
        let bytes = buf
            .get(pos..pos + Self::SIZE)
            .ok_or_else(|| out_of_bounds(buf.len(), pos))?;
        let mut raw = [0u8; Self::SIZE];
        raw.copy_from_slice(bytes);
        Ok(Lsn(i64::from_be_bytes(raw)))
    }

    /// Writes this LSN big-endian at `pos`.
    ///
    /// # Errors
    ///
    /// Returns an error if `buf` is too short.
    pub fn write_to(self, buf: &mut [u8], pos: usize) -> Result<()> {
        let len = buf.len();
        let bytes = buf
            .get_mut(pos..pos + Self::SIZE)
            .ok_or_else(|| out_of_bounds(len, pos))?;
        bytes.copy_from_slice(&self.0.to_be_bytes());
        Ok(())
    }
}

fn out_of_bounds(len: usize, pos: usize) -> NvWalError {
    NvWalError::StorageError(format!(
        "LSN field at offset {pos} exceeds buffer of {len} bytes"
    ))
}

impl From<i64> for Lsn {
    fn from(val: i64) -> Self {
        Lsn(val)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        assert!(Lsn::NONE < Lsn::ZERO);
        assert!(Lsn::new(5) < Lsn::new(6));
        assert_eq!(Lsn::new(3).max(Lsn::new(9)), Lsn::new(9));
    }

    #[test]
    fn test_none_sentinel() {
        assert!(!Lsn::NONE.is_some());
        assert!(Lsn::ZERO.is_some());
        assert_eq!(Lsn::NONE.val(), -1);
    }

    #[test]
    fn test_binary_field_is_big_endian() {
        let mut buf = [0u8; 12];
        Lsn::new(0x0102).write_to(&mut buf, 2).unwrap();
        assert_eq!(&buf[2..10], &[0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(Lsn::read_from(&buf, 2).unwrap(), Lsn::new(0x0102));
    }

    #[test]
    fn test_binary_field_out_of_bounds() {
        let mut buf = [0u8; 7];
        assert!(Lsn::ZERO.write_to(&mut buf, 0).is_err());
        assert!(Lsn::read_from(&buf, 0).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Lsn::new(42).to_string(), "[42]");
    }
}
