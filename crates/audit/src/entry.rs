//! Audit entry types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// What happened to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    QrGenerated,
    SignatureAccepted,
    SignatureRejected,
    Completed,
    Expired,
    Cancelled,
    CancelRejected,
}

/// One immutable line of the compliance record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Global, strictly increasing
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub action: AuditAction,
    pub actor_id: String,
    pub actor_name: String,
    pub detail: String,
}

/// Entry contents before the log assigns sequence and timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub request_id: String,
    pub action: AuditAction,
    pub actor_id: String,
    pub actor_name: String,
    pub detail: String,
}

impl AuditRecord {
    pub fn new(request_id: impl Into<String>, action: AuditAction) -> Self {
        Self {
            request_id: request_id.into(),
            action,
            actor_id: "system".to_string(),
            actor_name: "system".to_string(),
            detail: String::new(),
        }
    }

    pub fn actor(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.actor_id = id.into();
        self.actor_name = name.into();
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub(crate) fn seal(self, sequence: u64, timestamp: DateTime<Utc>) -> AuditEntry {
        AuditEntry {
            sequence,
            timestamp,
            request_id: self.request_id,
            action: self.action,
            actor_id: self.actor_id,
            actor_name: self.actor_name,
            detail: self.detail,
        }
    }
}
