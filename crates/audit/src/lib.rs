//! Coldsign Audit - append-only compliance record
//!
//! Every call into the quorum tracker, expiration monitor and cancellation
//! handler leaves an entry here, accepted or rejected. Each entry carries a
//! global sequence number so the order per request can be rebuilt even when
//! entries of different requests interleave.

mod entry;
mod error;
mod log;
mod sink;

pub use entry::{AuditAction, AuditEntry, AuditRecord};
pub use error::AuditError;
pub use log::{read_entries, verify_order, AuditLog};
pub use sink::{AuditSink, FileSink};
