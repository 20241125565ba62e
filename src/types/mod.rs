//! Core value types: log sequence numbers and record values.

mod lsn;
mod value;

pub use lsn::Lsn;
pub use value::Value;

/// Transaction number as assigned by the transaction manager.
pub type TxNumber = i64;
