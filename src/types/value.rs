//! Typed values carried by log records.
//!
//! A log record is folded into the disk log as an ordered sequence of
//! [`Value`]s; the first two are always the operation code and the
//! transaction number.

use serde::{Deserialize, Serialize};

/// Runtime value container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 32-bit signed integer value.
    Int32(i32),
    /// 64-bit signed integer value.
    Int64(i64),
    /// 64-bit floating point value.
    Float64(f64),
    /// Boolean value.
    Bool(bool),
    /// String value.
    String(String),
    /// Raw byte value.
    Bytes(Vec<u8>),
    /// Null value.
    Null,
}

impl Value {
    /// Attempts to extract an i32 value.
    #[must_use]
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Value::Int32(i) => Some(*i),
            _ => None,
        }
    }

    /// Attempts to extract an i64 value.
    #[must_use]
    pub fn as_int64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            _ => None,
        }
    }
}
