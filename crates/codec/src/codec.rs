//! Payload codec
//!
//! Pure transformations between records and carrier frames. Nothing here
//! touches storage or clocks.

use crate::carrier::{self, DEFAULT_CAPACITY, INBOUND_PREFIX, OUTBOUND_PREFIX};
use crate::error::CodecError;
use crate::payload::{OutboundPayload, SignedSubmission};

/// Encoder/decoder bound to one carrier capacity
#[derive(Debug, Clone, Copy)]
pub struct PayloadCodec {
    capacity: usize,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl PayloadCodec {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Outbound record → frame. Fails with `PayloadTooLarge` when the caller
    /// needs to split the work into smaller requests.
    pub fn encode_outbound(&self, payload: &OutboundPayload) -> Result<String, CodecError> {
        payload.validate()?;
        let body = serde_json::to_vec(payload)?;
        carrier::frame(OUTBOUND_PREFIX, &body, self.capacity)
    }

    /// Frame → outbound record (device side)
    pub fn decode_outbound(&self, frame: &str) -> Result<OutboundPayload, CodecError> {
        let body = carrier::unframe(OUTBOUND_PREFIX, frame, self.capacity)?;
        let payload: OutboundPayload = serde_json::from_slice(&body)?;
        payload.validate()?;
        Ok(payload)
    }

    /// Signed submission → frame (device side)
    pub fn encode_submission(&self, submission: &SignedSubmission) -> Result<String, CodecError> {
        submission.validate()?;
        let body = serde_json::to_vec(submission)?;
        carrier::frame(INBOUND_PREFIX, &body, self.capacity)
    }

    /// Frame → signed submission, checked for structure only
    pub fn decode_submission(&self, frame: &str) -> Result<SignedSubmission, CodecError> {
        let body = carrier::unframe(INBOUND_PREFIX, frame, self.capacity)?;
        let submission: SignedSubmission = serde_json::from_slice(&body)?;
        submission.validate()?;
        Ok(submission)
    }
}
