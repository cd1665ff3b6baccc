//! Canonical request digest
//!
//! Every signer signs the same 32 bytes, derived only from data the
//! coordinator stored at creation:
//!
//! `SHA-256("coldsign/v1" ‖ len‖request_id ‖ (len‖bundle_id ‖ SHA-256(unsigned_payload))*)`
//!
//! Lengths are u64 little-endian so no two different requests can collide by
//! shifting bytes between fields.

use coldsign_core::SigningRequest;
use sha2::{Digest, Sha256};

const DOMAIN_TAG: &[u8] = b"coldsign/v1";

pub type RequestDigest = [u8; 32];

/// Digest over a request id and its `(bundle_id, unsigned_payload)` pairs, in order.
pub fn compute_digest<'a>(
    request_id: &str,
    bundles: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> RequestDigest {
    let mut hasher = Sha256::new();
    hasher.update(DOMAIN_TAG);
    update_field(&mut hasher, request_id.as_bytes());

    for (bundle_id, unsigned_payload) in bundles {
        update_field(&mut hasher, bundle_id.as_bytes());
        hasher.update(Sha256::digest(unsigned_payload.as_bytes()));
    }

    hasher.finalize().into()
}

/// Digest of a stored request
pub fn request_digest(request: &SigningRequest) -> RequestDigest {
    compute_digest(
        &request.id,
        request
            .transaction_bundles
            .iter()
            .map(|b| (b.id.as_str(), b.unsigned_payload.as_str())),
    )
}

pub fn digest_hex(digest: &RequestDigest) -> String {
    hex::encode(digest)
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
