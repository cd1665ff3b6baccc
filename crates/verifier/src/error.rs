//! Verifier errors

use coldsign_core::SignatureScheme;
use thiserror::Error;

/// Structural problems only. A well-formed signature that does not match is
/// reported as `Ok(false)`, never as an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },

    #[error("No verifier registered for scheme {0}")]
    UnsupportedScheme(SignatureScheme),
}

impl VerifyError {
    pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        VerifyError::Malformed {
            field,
            reason: reason.into(),
        }
    }
}
