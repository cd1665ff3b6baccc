//! Append-only audit log
//!
//! JSONL on disk is the source of truth. Memory holds each request's own
//! trail for per-request reads; the full log is always read back from disk.
//! Entries are never rewritten, summarized or compacted.

use crate::entry::{AuditEntry, AuditRecord};
use crate::error::AuditError;
use crate::sink::{AuditSink, FileSink};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

struct Inner {
    sink: Option<Box<dyn AuditSink>>,
    next_sequence: u64,
    count: usize,
    by_request: HashMap<String, Vec<AuditEntry>>,
}

impl Inner {
    fn new(sink: Option<Box<dyn AuditSink>>) -> Self {
        Self {
            sink,
            next_sequence: 1,
            count: 0,
            by_request: HashMap::new(),
        }
    }

    fn index(&mut self, entry: AuditEntry) {
        self.next_sequence = entry.sequence + 1;
        self.count += 1;
        self.by_request
            .entry(entry.request_id.clone())
            .or_default()
            .push(entry);
    }
}

/// Ordered, append-only record of every transition and rejected attempt
pub struct AuditLog {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl AuditLog {
    /// Open (or create) the log at `path`, replaying what is already there.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let existing = if path.exists() {
            read_entries(&path)?
        } else {
            Vec::new()
        };
        verify_order(&existing)?;

        let mut inner = Inner::new(Some(Box::new(FileSink::open(&path)?)));
        for entry in existing {
            inner.index(entry);
        }

        tracing::debug!(
            path = %path.display(),
            entries = inner.count,
            "Audit log opened"
        );

        Ok(Self {
            path: Some(path),
            inner: Mutex::new(inner),
        })
    }

    /// Memory-only log (for testing)
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner::new(None)),
        }
    }

    /// Empty log writing to a custom sink
    pub fn with_sink(sink: Box<dyn AuditSink>) -> Self {
        Self {
            path: None,
            inner: Mutex::new(Inner::new(Some(sink))),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append one entry; the sequence is assigned here.
    pub fn append(&self, record: AuditRecord, at: DateTime<Utc>) -> Result<AuditEntry, AuditError> {
        let mut sealed = self.append_all(vec![record], at)?;
        sealed
            .pop()
            .ok_or_else(|| AuditError::Io(std::io::Error::other("empty audit batch")))
    }

    /// Append entries with consecutive sequences, all or nothing.
    ///
    /// The batch reaches the sink before any entry becomes visible to readers.
    /// On failure nothing is indexed and no sequence number is consumed.
    pub fn append_all(
        &self,
        records: Vec<AuditRecord>,
        at: DateTime<Utc>,
    ) -> Result<Vec<AuditEntry>, AuditError> {
        let mut inner = self.inner.lock();
        let first = inner.next_sequence;
        let entries: Vec<AuditEntry> = records
            .into_iter()
            .zip(first..)
            .map(|(record, sequence)| record.seal(sequence, at))
            .collect();

        if let Some(sink) = inner.sink.as_mut() {
            let mut batch = Vec::new();
            for entry in &entries {
                serde_json::to_writer(&mut batch, entry)?;
                batch.push(b'\n');
            }
            sink.append(&batch)?;
        }

        for entry in &entries {
            inner.index(entry.clone());
        }
        Ok(entries)
    }

    /// Entries of one request, in sequence order
    pub fn for_request(&self, request_id: &str) -> Vec<AuditEntry> {
        self.inner
            .lock()
            .by_request
            .get(request_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every entry in sequence order; read from disk when file-backed
    pub fn all(&self) -> Result<Vec<AuditEntry>, AuditError> {
        if let Some(path) = &self.path {
            let _writing = self.inner.lock();
            return read_entries(path);
        }

        let mut entries: Vec<AuditEntry> = self
            .inner
            .lock()
            .by_request
            .values()
            .flatten()
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read every entry of a JSONL audit file
pub fn read_entries(path: impl AsRef<Path>) -> Result<Vec<AuditEntry>, AuditError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry =
            serde_json::from_str(&line).map_err(|e| AuditError::InvalidFile {
                line: i + 1,
                reason: e.to_string(),
            })?;
        entries.push(entry);
    }

    Ok(entries)
}

/// Sequence numbers must be strictly increasing
pub fn verify_order(entries: &[AuditEntry]) -> Result<(), AuditError> {
    for pair in entries.windows(2) {
        if pair[1].sequence <= pair[0].sequence {
            return Err(AuditError::OutOfOrder {
                previous: pair[0].sequence,
                found: pair[1].sequence,
            });
        }
    }
    Ok(())
}
