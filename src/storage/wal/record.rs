//! Log record types and their value encoding.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{NvWalError, Result};
use crate::types::{Lsn, TxNumber, Value};

/// Operation code of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum LogOp {
    /// Transaction start.
    Start = 1,
    /// Transaction commit.
    Commit = 2,
    /// Transaction rollback.
    Rollback = 3,
    /// Checkpoint marker listing the active transactions.
    Checkpoint = 4,
    /// Data modification with undo/redo images.
    Update = 10,
}

impl LogOp {
    /// Returns the stable numeric code written to the disk log.
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for LogOp {
    type Error = ();

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(LogOp::Start),
            2 => Ok(LogOp::Commit),
            3 => Ok(LogOp::Rollback),
            4 => Ok(LogOp::Checkpoint),
            10 => Ok(LogOp::Update),
            _ => Err(()),
        }
    }
}

/// A single log record.
///
/// The LSN is not part of the encoded form: it is implied by the record's
/// position in the log and stamped exactly once, either on append or when the
/// ring buffer is rebuilt from the disk log.
#[derive(Debug)]
pub struct LogRecord {
    op: LogOp,
    tx_number: TxNumber,
    body: Vec<Value>,
    lsn: OnceLock<Lsn>,
}

impl LogRecord {
    /// Creates a new log record.
    #[must_use]
    pub fn new(op: LogOp, tx_number: TxNumber, body: Vec<Value>) -> Self {
        Self {
            op,
            tx_number,
            body,
            lsn: OnceLock::new(),
        }
    }

    /// Creates a start record.
    #[must_use]
    pub fn start(tx_number: TxNumber) -> Self {
        Self::new(LogOp::Start, tx_number, Vec::new())
    }

    /// Creates a commit record.
    #[must_use]
    pub fn commit(tx_number: TxNumber) -> Self {
        Self::new(LogOp::Commit, tx_number, Vec::new())
    }

    /// Creates a rollback record.
    #[must_use]
    pub fn rollback(tx_number: TxNumber) -> Self {
        Self::new(LogOp::Rollback, tx_number, Vec::new())
    }

    /// Creates an update record carrying arbitrary undo/redo values.
    #[must_use]
    pub fn update(tx_number: TxNumber, values: Vec<Value>) -> Self {
        Self::new(LogOp::Update, tx_number, values)
    }

    /// Creates a checkpoint record listing the active transactions.
    #[must_use]
    pub fn checkpoint(tx_number: TxNumber, active: &[TxNumber]) -> Self {
        let body = active.iter().map(|&tx| Value::Int64(tx)).collect();
        Self::new(LogOp::Checkpoint, tx_number, body)
    }

    /// Returns the operation code.
    #[must_use]
    pub fn op(&self) -> LogOp {
        self.op
    }

    /// Returns the owning transaction number.
    #[must_use]
    pub fn tx_number(&self) -> TxNumber {
        self.tx_number
    }

    /// Returns the record body (everything after op code and tx number).
    #[must_use]
    pub fn body(&self) -> &[Value] {
        &self.body
    }

    /// Returns true if this is the start record of `tx_number`.
    #[must_use]
    pub fn is_start_of(&self, tx_number: TxNumber) -> bool {
        self.op == LogOp::Start && self.tx_number == tx_number
    }

    /// Returns the stamped LSN, if any.
    #[must_use]
    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn.get().copied()
    }

    /// Stamps the record's LSN.
    ///
    /// # Errors
    ///
    /// Returns an error if an LSN was already stamped.
    pub fn set_lsn(&self, lsn: Lsn) -> Result<()> {
        self.lsn.set(lsn).map_err(|_| {
            NvWalError::InvalidRecord(format!(
                "LSN already assigned ({}), cannot stamp {lsn}",
                self.lsn().unwrap_or(Lsn::NONE)
            ))
        })
    }

    /// Serializes the record into the ordered values stored by the disk log.
    #[must_use]
    pub fn build_record(&self) -> Vec<Value> {
        let mut values = Vec::with_capacity(self.body.len() + 2);
        values.push(Value::Int32(self.op.code()));
        values.push(Value::Int64(self.tx_number));
        values.extend(self.body.iter().cloned());
        values
    }

    /// Decodes a record from the values produced by [`LogRecord::build_record`].
    ///
    /// # Errors
    ///
    /// Returns an error if the op code or transaction number is missing or
    /// malformed.
    pub fn from_values(values: &[Value]) -> Result<Self> {
        let code = values.first().and_then(Value::as_int32).ok_or_else(|| {
            NvWalError::InvalidRecord("missing operation code".into())
        })?;
        let op = LogOp::try_from(code)
            .map_err(|()| NvWalError::InvalidRecord(format!("unknown operation code {code}")))?;
        let tx_number = values.get(1).and_then(Value::as_int64).ok_or_else(|| {
            NvWalError::InvalidRecord("missing transaction number".into())
        })?;

        Ok(Self::new(op, tx_number, values[2..].to_vec()))
    }

    /// Returns the active transactions listed by a checkpoint record.
    #[must_use]
    pub fn checkpoint_tx_numbers(&self) -> Option<Vec<TxNumber>> {
        if self.op != LogOp::Checkpoint {
            return None;
        }
        self.body.iter().map(Value::as_int64).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_code_conversion() {
        assert_eq!(LogOp::try_from(1), Ok(LogOp::Start));
        assert_eq!(LogOp::try_from(2), Ok(LogOp::Commit));
        assert_eq!(LogOp::try_from(10), Ok(LogOp::Update));
        assert!(LogOp::try_from(99).is_err());
    }

    #[test]
    fn test_start_record() {
        let record = LogRecord::start(42);
        assert_eq!(record.op(), LogOp::Start);
        assert_eq!(record.tx_number(), 42);
        assert!(record.is_start_of(42));
        assert!(!record.is_start_of(43));
        assert_eq!(record.lsn(), None);
    }

    #[test]
    fn test_lsn_is_set_once() {
        let record = LogRecord::commit(1);
        record.set_lsn(Lsn::new(5)).unwrap();
        assert_eq!(record.lsn(), Some(Lsn::new(5)));

        let err = record.set_lsn(Lsn::new(6)).unwrap_err();
        assert!(matches!(err, NvWalError::InvalidRecord(_)));
        assert_eq!(record.lsn(), Some(Lsn::new(5)));
    }

    #[test]
    fn test_build_record_layout() {
        let record = LogRecord::update(9, vec![Value::String("t".into()), Value::Int64(3)]);
        let values = record.build_record();

        assert_eq!(values[0], Value::Int32(LogOp::Update.code()));
        assert_eq!(values[1], Value::Int64(9));
        assert_eq!(&values[2..], record.body());

        let decoded = LogRecord::from_values(&values).unwrap();
        assert_eq!(decoded.op(), LogOp::Update);
        assert_eq!(decoded.tx_number(), 9);
        assert_eq!(decoded.body(), record.body());
        assert_eq!(decoded.lsn(), None);
    }

    #[test]
    fn test_from_values_rejects_garbage() {
        assert!(LogRecord::from_values(&[]).is_err());
        assert!(LogRecord::from_values(&[Value::Int32(77), Value::Int64(1)]).is_err());
        assert!(LogRecord::from_values(&[Value::Int32(1)]).is_err());
        assert!(LogRecord::from_values(&[Value::Int64(1), Value::Int64(1)]).is_err());
    }

    #[test]
    fn test_checkpoint_record_lists_active() {
        let record = LogRecord::checkpoint(0, &[3, 5]);
        assert_eq!(record.checkpoint_tx_numbers(), Some(vec![3, 5]));
        assert_eq!(LogRecord::start(3).checkpoint_tx_numbers(), None);
    }
}
