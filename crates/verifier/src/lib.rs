//! Coldsign Verifier - signature checks for submitted device signatures
//!
//! `verify(publicKey, digest, signature) → bool`, with the digest always
//! recomputed from the stored request and the key always the signer's
//! registered one. Backends are pluggable per [`SignatureScheme`]:
//! - Ed25519 (`ed25519-dalek`)
//! - ECDSA secp256k1 (`k256`), prehashed, low-S
//!
//! [`SignatureScheme`]: coldsign_core::SignatureScheme

pub mod device;
pub mod digest;
mod error;
pub mod schemes;
mod verifier;

pub use device::DeviceKey;
pub use digest::{compute_digest, digest_hex, request_digest, RequestDigest};
pub use error::VerifyError;
pub use schemes::{Ed25519Verifier, SchemeVerifier, Secp256k1Verifier};
pub use verifier::SignatureVerifier;
