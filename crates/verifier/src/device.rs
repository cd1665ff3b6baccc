//! Device-side keys
//!
//! What the offline signer runs: hold a secret, sign a request digest. Used by
//! the `coldsign keygen` / `coldsign sign` helpers and by tests; the
//! coordinator itself never holds a secret key.

use crate::digest::RequestDigest;
use crate::error::VerifyError;
use coldsign_core::SignatureScheme;
use ed25519_dalek::Signer as _;
use k256::ecdsa::signature::hazmat::PrehashSigner;

enum Secret {
    Ed25519(ed25519_dalek::SigningKey),
    Secp256k1(k256::ecdsa::SigningKey),
}

/// Signing key of an offline device
pub struct DeviceKey {
    secret: Secret,
}

impl DeviceKey {
    /// Generate a new random key
    pub fn generate(scheme: SignatureScheme) -> Self {
        let mut rng = rand::rngs::OsRng;
        let secret = match scheme {
            SignatureScheme::Ed25519 => Secret::Ed25519(ed25519_dalek::SigningKey::generate(&mut rng)),
            SignatureScheme::Secp256k1 => {
                Secret::Secp256k1(k256::ecdsa::SigningKey::random(&mut rng))
            }
        };
        Self { secret }
    }

    /// Restore from a 32-byte hex secret
    pub fn from_hex(scheme: SignatureScheme, secret_hex: &str) -> Result<Self, VerifyError> {
        let bytes = hex::decode(secret_hex.trim())
            .map_err(|e| VerifyError::malformed("secret key", e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| VerifyError::malformed("secret key", "must be 32 bytes"))?;

        let secret = match scheme {
            SignatureScheme::Ed25519 => Secret::Ed25519(ed25519_dalek::SigningKey::from_bytes(&seed)),
            SignatureScheme::Secp256k1 => Secret::Secp256k1(
                k256::ecdsa::SigningKey::from_slice(&seed)
                    .map_err(|_| VerifyError::malformed("secret key", "scalar out of range"))?,
            ),
        };
        Ok(Self { secret })
    }

    pub fn scheme(&self) -> SignatureScheme {
        match self.secret {
            Secret::Ed25519(_) => SignatureScheme::Ed25519,
            Secret::Secp256k1(_) => SignatureScheme::Secp256k1,
        }
    }

    /// Secret as hex, for writing to the device's key file
    pub fn secret_hex(&self) -> String {
        match &self.secret {
            Secret::Ed25519(key) => hex::encode(key.to_bytes()),
            Secret::Secp256k1(key) => hex::encode(key.to_bytes()),
        }
    }

    /// Public key as registered with the coordinator (compressed SEC1 for secp256k1)
    pub fn public_key_hex(&self) -> String {
        match &self.secret {
            Secret::Ed25519(key) => hex::encode(key.verifying_key().to_bytes()),
            Secret::Secp256k1(key) => {
                hex::encode(key.verifying_key().to_encoded_point(true).as_bytes())
            }
        }
    }

    /// Hex signature over a request digest
    pub fn sign_digest(&self, digest: &RequestDigest) -> Result<String, VerifyError> {
        match &self.secret {
            Secret::Ed25519(key) => Ok(hex::encode(key.sign(digest).to_bytes())),
            Secret::Secp256k1(key) => {
                let signature: k256::ecdsa::Signature = key
                    .sign_prehash(digest)
                    .map_err(|e| VerifyError::malformed("digest", e.to_string()))?;
                Ok(hex::encode(signature.to_bytes()))
            }
        }
    }
}
