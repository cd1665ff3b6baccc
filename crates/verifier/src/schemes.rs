//! Scheme backends
//!
//! Each backend knows how to parse keys and signatures of one curve and check
//! a signature over a 32-byte digest.

use crate::digest::RequestDigest;
use crate::error::VerifyError;
use coldsign_core::SignatureScheme;
use ed25519_dalek::{Signature as EdSignature, VerifyingKey as EdVerifyingKey};
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{Signature as EcdsaSignature, VerifyingKey as EcdsaVerifyingKey};

/// One signature algorithm
pub trait SchemeVerifier: Send + Sync {
    fn scheme(&self) -> SignatureScheme;

    /// Parse a public key and return its one canonical encoding.
    ///
    /// Two encodings of the same point must map to the same bytes.
    fn canonical_public_key(&self, public_key: &[u8]) -> Result<Vec<u8>, VerifyError>;

    /// `Ok(false)` for a well-formed signature that does not match.
    fn verify(
        &self,
        public_key: &[u8],
        digest: &RequestDigest,
        signature: &[u8],
    ) -> Result<bool, VerifyError>;
}

/// Ed25519 (Solana and default family)
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Verifier;

impl Ed25519Verifier {
    fn parse_key(public_key: &[u8]) -> Result<EdVerifyingKey, VerifyError> {
        let bytes: [u8; 32] = public_key
            .try_into()
            .map_err(|_| VerifyError::malformed("public key", "Ed25519 key must be 32 bytes"))?;
        EdVerifyingKey::from_bytes(&bytes)
            .map_err(|e| VerifyError::malformed("public key", e.to_string()))
    }
}

impl SchemeVerifier for Ed25519Verifier {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Ed25519
    }

    fn canonical_public_key(&self, public_key: &[u8]) -> Result<Vec<u8>, VerifyError> {
        Ok(Self::parse_key(public_key)?.to_bytes().to_vec())
    }

    fn verify(
        &self,
        public_key: &[u8],
        digest: &RequestDigest,
        signature: &[u8],
    ) -> Result<bool, VerifyError> {
        let key = Self::parse_key(public_key)?;
        let bytes: [u8; 64] = signature
            .try_into()
            .map_err(|_| VerifyError::malformed("signature", "Ed25519 signature must be 64 bytes"))?;
        let signature = EdSignature::from_bytes(&bytes);

        Ok(key.verify_strict(digest, &signature).is_ok())
    }
}

/// ECDSA over secp256k1 (Bitcoin and Ethereum families)
///
/// Keys are SEC1 (33-byte compressed or 65-byte uncompressed), signatures are
/// 64-byte compact `r ‖ s`. High-S signatures do not verify.
#[derive(Debug, Default, Clone, Copy)]
pub struct Secp256k1Verifier;

impl Secp256k1Verifier {
    fn parse_key(public_key: &[u8]) -> Result<EcdsaVerifyingKey, VerifyError> {
        if public_key.len() != 33 && public_key.len() != 65 {
            return Err(VerifyError::malformed(
                "public key",
                "secp256k1 key must be 33 or 65 bytes",
            ));
        }
        EcdsaVerifyingKey::from_sec1_bytes(public_key)
            .map_err(|_| VerifyError::malformed("public key", "not a point on secp256k1"))
    }
}

impl SchemeVerifier for Secp256k1Verifier {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Secp256k1
    }

    /// Compressed SEC1, whichever form was registered
    fn canonical_public_key(&self, public_key: &[u8]) -> Result<Vec<u8>, VerifyError> {
        let key = Self::parse_key(public_key)?;
        Ok(key.to_encoded_point(true).as_bytes().to_vec())
    }

    fn verify(
        &self,
        public_key: &[u8],
        digest: &RequestDigest,
        signature: &[u8],
    ) -> Result<bool, VerifyError> {
        let key = Self::parse_key(public_key)?;
        if signature.len() != 64 {
            return Err(VerifyError::malformed(
                "signature",
                "secp256k1 signature must be 64 bytes",
            ));
        }
        let signature = EcdsaSignature::from_slice(signature)
            .map_err(|_| VerifyError::malformed("signature", "scalar out of range"))?;

        Ok(key.verify_prehash(digest, &signature).is_ok())
    }
}
