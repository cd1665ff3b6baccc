//! Codec errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Payload of {size} bytes exceeds carrier capacity of {capacity} bytes")]
    PayloadTooLarge { size: usize, capacity: usize },

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl CodecError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        CodecError::Malformed(reason.into())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Malformed(err.to_string())
    }
}
