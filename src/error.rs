use crate::protocol::{ExtError, OpCode, ProgressField, ResultCode};
use thiserror::Error;

pub type DfuResult<T> = Result<T, DfuError>;

/// Errors surfaced by the DFU protocol engine
#[derive(Error, Debug)]
pub enum DfuError {
    /// Write, subscribe or notification stream failure reported by the link
    #[error("link error: {0:#}")]
    Link(#[source] anyhow::Error),

    #[error("timed out waiting for {opcode} response")]
    Timeout { opcode: OpCode },

    /// The target answered with a result code other than success
    #[error("{opcode} failed: {result}{}", .ext.as_ref().map(|e| format!(" ({e})")).unwrap_or_default())]
    CommandRejected {
        opcode: OpCode,
        result: ResultCode,
        ext: Option<ExtError>,
    },

    /// Locally tracked progress disagrees with the target
    #[error("{field} mismatch: expected {expected:#010x}, target reported {actual:#010x}")]
    ValidationFailed {
        field: ProgressField,
        expected: u32,
        actual: u32,
    },

    #[error("invalid response to {opcode}: {reason}")]
    InvalidResponse { opcode: OpCode, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("transfer aborted")]
    Aborted,
}

impl DfuError {
    /// Object-level failures worth another create/stream/execute attempt
    pub fn is_retriable(&self) -> bool {
        !matches!(self, DfuError::InvalidArgument(_) | DfuError::Aborted)
    }
}
