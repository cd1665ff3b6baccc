//! Signature verifier
//!
//! Stateless apart from the immutable backend table, so one instance is shared
//! across all worker threads without locking.

use crate::digest::{request_digest, RequestDigest};
use crate::error::VerifyError;
use crate::schemes::{Ed25519Verifier, SchemeVerifier, Secp256k1Verifier};
use coldsign_core::{SignatureScheme, Signer, SigningRequest};
use std::collections::HashMap;
use std::sync::Arc;

/// Dispatches verification to the backend of the signer's scheme
#[derive(Clone)]
pub struct SignatureVerifier {
    backends: HashMap<SignatureScheme, Arc<dyn SchemeVerifier>>,
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier {
    /// Verifier with the Ed25519 and secp256k1 backends
    pub fn new() -> Self {
        Self::empty()
            .with_backend(Arc::new(Ed25519Verifier))
            .with_backend(Arc::new(Secp256k1Verifier))
    }

    /// Verifier with no backends; every call fails with `UnsupportedScheme`
    pub fn empty() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    /// Register (or replace) the backend for its scheme
    pub fn with_backend(mut self, backend: Arc<dyn SchemeVerifier>) -> Self {
        self.backends.insert(backend.scheme(), backend);
        self
    }

    pub fn supports(&self, scheme: SignatureScheme) -> bool {
        self.backends.contains_key(&scheme)
    }

    fn backend(&self, scheme: SignatureScheme) -> Result<&dyn SchemeVerifier, VerifyError> {
        self.backends
            .get(&scheme)
            .map(|b| b.as_ref())
            .ok_or(VerifyError::UnsupportedScheme(scheme))
    }

    /// Parse a hex public key for `scheme` and return its canonical hex form.
    ///
    /// Keys are stored in this form so that one device key registered under
    /// two encodings is caught as a duplicate.
    pub fn canonical_public_key(
        &self,
        scheme: SignatureScheme,
        public_key_hex: &str,
    ) -> Result<String, VerifyError> {
        let key = decode_hex("public key", public_key_hex)?;
        let canonical = self.backend(scheme)?.canonical_public_key(&key)?;
        Ok(hex::encode(canonical))
    }

    /// `verify(publicKey, digest, signature) → bool`
    pub fn verify(
        &self,
        scheme: SignatureScheme,
        public_key_hex: &str,
        digest: &RequestDigest,
        signature_hex: &str,
    ) -> Result<bool, VerifyError> {
        let backend = self.backend(scheme)?;
        let key = decode_hex("public key", public_key_hex)?;
        let signature = decode_hex("signature", signature_hex)?;
        backend.verify(&key, digest, &signature)
    }

    /// Verify a signature from `signer` over `request`.
    ///
    /// The digest is recomputed from the stored request and the key is the one
    /// registered on the signer; nothing from the submission other than the
    /// signature bytes is trusted.
    pub fn verify_signer(
        &self,
        request: &SigningRequest,
        signer: &Signer,
        signature_hex: &str,
    ) -> Result<bool, VerifyError> {
        let digest = request_digest(request);
        self.verify(signer.scheme, &signer.public_key, &digest, signature_hex)
    }
}

fn decode_hex(field: &'static str, value: &str) -> Result<Vec<u8>, VerifyError> {
    hex::decode(value.trim()).map_err(|e| VerifyError::malformed(field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKey;
    use crate::digest::compute_digest;
    use chrono::{DateTime, Duration, Utc};
    use coldsign_core::{Amount, RequestKind, RequestMetadata, TransactionBundle};
    use rust_decimal_macros::dec;

    fn request_with(keys: &[(&str, &DeviceKey)], unsigned: &str) -> SigningRequest {
        let created = DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap();
        SigningRequest::new(
            "SR-VERIFY",
            RequestKind::Rebalancing,
            vec![TransactionBundle::new(
                "b1",
                "BTC",
                Amount::new(dec!(0.5)).unwrap(),
                Amount::new(dec!(0.00002)).unwrap(),
                "bc1qcold",
                "bc1qhot",
                unsigned,
            )],
            keys.iter()
                .map(|(id, key)| Signer::new(*id, *id, key.public_key_hex(), key.scheme()))
                .collect(),
            1,
            created,
            created + Duration::hours(1),
            RequestMetadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_signatures_verify() {
        let verifier = SignatureVerifier::new();
        for scheme in [SignatureScheme::Ed25519, SignatureScheme::Secp256k1] {
            let key = DeviceKey::generate(scheme);
            let request = request_with(&[("alice", &key)], "psbt-original");
            let signature = key.sign_digest(&request_digest(&request)).unwrap();

            let signer = &request.signers[0];
            assert!(verifier.verify_signer(&request, signer, &signature).unwrap(), "{scheme}");
        }
    }

    #[test]
    fn test_signature_over_other_payload_is_false() {
        let verifier = SignatureVerifier::new();
        for scheme in [SignatureScheme::Ed25519, SignatureScheme::Secp256k1] {
            let key = DeviceKey::generate(scheme);
            let request = request_with(&[("alice", &key)], "psbt-original");
            let forged = compute_digest("SR-VERIFY", [("b1", "psbt-tampered")]);
            let signature = key.sign_digest(&forged).unwrap();

            let result = verifier.verify_signer(&request, &request.signers[0], &signature);
            assert_eq!(result, Ok(false), "{scheme}");
        }
    }

    #[test]
    fn test_registered_key_is_authoritative() {
        let verifier = SignatureVerifier::new();
        let alice = DeviceKey::generate(SignatureScheme::Ed25519);
        let mallory = DeviceKey::generate(SignatureScheme::Ed25519);
        let request = request_with(&[("alice", &alice)], "psbt-original");

        // mallory signs the right digest with her own key, claiming to be alice
        let signature = mallory.sign_digest(&request_digest(&request)).unwrap();
        let result = verifier.verify_signer(&request, &request.signers[0], &signature);
        assert_eq!(result, Ok(false));
    }

    #[test]
    fn test_structural_problems_are_errors() {
        let verifier = SignatureVerifier::new();
        let key = DeviceKey::generate(SignatureScheme::Secp256k1);
        let request = request_with(&[("alice", &key)], "psbt-original");
        let signer = &request.signers[0];

        for bad in ["zz", "abcd", &"00".repeat(64)] {
            let result = verifier.verify_signer(&request, signer, bad);
            assert!(matches!(result, Err(VerifyError::Malformed { .. })), "{bad}");
        }
    }

    #[test]
    fn test_canonical_public_key() {
        let verifier = SignatureVerifier::new();
        let ed = DeviceKey::generate(SignatureScheme::Ed25519);
        let ec = DeviceKey::generate(SignatureScheme::Secp256k1);

        assert_eq!(
            verifier
                .canonical_public_key(SignatureScheme::Ed25519, &ed.public_key_hex().to_uppercase())
                .unwrap(),
            ed.public_key_hex()
        );
        assert_eq!(
            verifier
                .canonical_public_key(SignatureScheme::Secp256k1, &ec.public_key_hex())
                .unwrap(),
            ec.public_key_hex()
        );
        assert!(verifier
            .canonical_public_key(SignatureScheme::Secp256k1, &ed.public_key_hex())
            .is_err());
        assert!(verifier
            .canonical_public_key(SignatureScheme::Secp256k1, &format!("02{}", "ff".repeat(32)))
            .is_err());
    }

    #[test]
    fn test_missing_backend() {
        let verifier = SignatureVerifier::empty().with_backend(Arc::new(Ed25519Verifier));
        assert!(!verifier.supports(SignatureScheme::Secp256k1));
        assert_eq!(
            verifier.canonical_public_key(SignatureScheme::Secp256k1, "02aa"),
            Err(VerifyError::UnsupportedScheme(SignatureScheme::Secp256k1))
        );
    }
}
