//! Audit sinks
//!
//! A sink either takes a whole batch of lines or none of it. A half-written
//! batch would leave a sequence number on disk that the log never handed out.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Durable destination for sealed entries
pub trait AuditSink: Send {
    /// Write `batch` completely, or fail and leave the destination as it was.
    fn append(&mut self, batch: &[u8]) -> io::Result<()>;
}

/// JSONL file opened for append
pub struct FileSink {
    file: File,
    /// Length of the file after the last complete batch
    len: u64,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl AuditSink for FileSink {
    fn append(&mut self, batch: &[u8]) -> io::Result<()> {
        // no userspace buffer: a failed write cannot resurface with the next batch
        let written = self
            .file
            .write_all(batch)
            .and_then(|_| self.file.sync_data());

        match written {
            Ok(()) => {
                self.len += batch.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(truncate) = self.file.set_len(self.len) {
                    tracing::error!(error = %truncate, "Failed to cut back partial audit write");
                }
                Err(e)
            }
        }
    }
}
