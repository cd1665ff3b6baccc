//! Coordinator error taxonomy
//!
//! Every rejection a caller can see, each with a stable `code()` the UI maps
//! to an operator action (retry, re-scan, escalate).

use crate::store::StoreError;
use coldsign_audit::AuditError;
use coldsign_codec::CodecError;
use coldsign_core::{RequestError, RequestStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Signing request not found: {0}")]
    NotFound(String),

    #[error("Signing request {request_id} is already {status}")]
    AlreadyFinalized {
        request_id: String,
        status: RequestStatus,
    },

    #[error("Signing request {0} has expired")]
    ExpiredRequest(String),

    #[error("Signer {signer_id} is not part of request {request_id}")]
    UnknownSigner {
        request_id: String,
        signer_id: String,
    },

    #[error("Signer {signer_id} has already signed request {request_id}")]
    DuplicateSignature {
        request_id: String,
        signer_id: String,
    },

    #[error("Signature from {signer_id} does not match request {request_id}")]
    Verification {
        request_id: String,
        signer_id: String,
    },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Payload of {size} bytes exceeds carrier capacity of {capacity} bytes")]
    PayloadTooLarge { size: usize, capacity: usize },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordinatorError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            CoordinatorError::InvalidRequest(_) => "invalid_request",
            CoordinatorError::NotFound(_) => "not_found",
            CoordinatorError::AlreadyFinalized { .. } => "already_finalized",
            CoordinatorError::ExpiredRequest(_) => "expired_request",
            CoordinatorError::UnknownSigner { .. } => "unknown_signer",
            CoordinatorError::DuplicateSignature { .. } => "duplicate_signature",
            CoordinatorError::Verification { .. } => "verification_failed",
            CoordinatorError::MalformedPayload(_) => "malformed_payload",
            CoordinatorError::PayloadTooLarge { .. } => "payload_too_large",
            CoordinatorError::Store(_) => "storage_error",
            CoordinatorError::Audit(_) => "audit_error",
            CoordinatorError::Internal(_) => "internal_error",
        }
    }

    /// Infrastructure failures; the only ones worth retrying unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinatorError::Store(_) | CoordinatorError::Audit(_))
    }
}

impl From<CodecError> for CoordinatorError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::PayloadTooLarge { size, capacity } => {
                CoordinatorError::PayloadTooLarge { size, capacity }
            }
            CodecError::Malformed(reason) => CoordinatorError::MalformedPayload(reason),
        }
    }
}

impl From<RequestError> for CoordinatorError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Invalid(reason) => CoordinatorError::InvalidRequest(reason),
            other => CoordinatorError::Internal(other.to_string()),
        }
    }
}
