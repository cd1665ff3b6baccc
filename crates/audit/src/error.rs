//! Audit log errors

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid audit file at line {line}: {reason}")]
    InvalidFile { line: usize, reason: String },

    #[error("Sequence out of order: {previous} followed by {found}")]
    OutOfOrder { previous: u64, found: u64 },
}
