//! Carrier framing
//!
//! A frame is `<prefix><base64url body>`. The alphabet survives QR byte mode,
//! removable media and manual transcription unchanged, so a frame round-trips
//! byte-for-byte through any of them.

use crate::error::CodecError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Coordinator → device
pub const OUTBOUND_PREFIX: &str = "CSO1:";

/// Device → coordinator
pub const INBOUND_PREFIX: &str = "CSS1:";

/// Byte capacity of a version 40 QR symbol at error-correction level L
pub const DEFAULT_CAPACITY: usize = 2_953;

/// Wrap `body` in a frame, failing if the frame would not fit the carrier.
pub fn frame(prefix: &str, body: &[u8], capacity: usize) -> Result<String, CodecError> {
    let size = prefix.len() + base64::encoded_len(body.len(), false).unwrap_or(usize::MAX);
    if size > capacity {
        return Err(CodecError::PayloadTooLarge { size, capacity });
    }

    let mut out = String::with_capacity(size);
    out.push_str(prefix);
    URL_SAFE_NO_PAD.encode_string(body, &mut out);
    Ok(out)
}

/// Strip and check the prefix, then decode the body.
pub fn unframe(prefix: &str, text: &str, capacity: usize) -> Result<Vec<u8>, CodecError> {
    let text = text.trim();
    if text.len() > capacity {
        return Err(CodecError::PayloadTooLarge {
            size: text.len(),
            capacity,
        });
    }

    let body = text.strip_prefix(prefix).ok_or_else(|| {
        CodecError::malformed(format!("frame does not start with {prefix}"))
    })?;
    if body.is_empty() {
        return Err(CodecError::malformed("empty frame body"));
    }

    URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|e| CodecError::malformed(format!("invalid frame encoding: {e}")))
}
