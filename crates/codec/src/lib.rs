//! Coldsign Codec - relay payloads for the air-gapped channel
//!
//! Serializes a signing request into a bounded, self-describing frame for the
//! offline device and parses the signed submission it returns.
//!
//! Frames are plain text (`CSO1:` outbound, `CSS1:` inbound) and never exceed
//! the configured carrier capacity.

pub mod carrier;
mod codec;
mod error;
mod payload;

pub use codec::PayloadCodec;
pub use error::CodecError;
pub use payload::{
    OutboundBundle, OutboundPayload, OutboundSigner, SignedBundle, SignedSubmission,
    PAYLOAD_VERSION,
};
