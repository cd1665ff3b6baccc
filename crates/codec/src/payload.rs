//! Relay payload records
//!
//! Outbound: everything the offline device needs to show the operator and to
//! sign. Inbound: what the device hands back.

use crate::error::CodecError;
use chrono::{DateTime, Utc};
use coldsign_core::{Amount, RequestKind, Signer, SigningRequest, TransactionBundle};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Current record version for both directions
pub const PAYLOAD_VERSION: u8 = 1;

/// One transaction as shown on the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutboundBundle {
    pub bundle_id: String,
    pub asset_symbol: String,
    pub amount: Amount,
    pub fee: Amount,
    pub from_address: String,
    pub to_address: String,
    pub unsigned_payload: String,
}

impl From<&TransactionBundle> for OutboundBundle {
    fn from(bundle: &TransactionBundle) -> Self {
        Self {
            bundle_id: bundle.id.clone(),
            asset_symbol: bundle.asset_symbol.clone(),
            amount: bundle.amount,
            fee: bundle.fee,
            from_address: bundle.from_address.clone(),
            to_address: bundle.to_address.clone(),
            unsigned_payload: bundle.unsigned_payload.clone(),
        }
    }
}

/// Who may sign; lets the device pick the right key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutboundSigner {
    pub signer_id: String,
    pub display_name: String,
}

impl From<&Signer> for OutboundSigner {
    fn from(signer: &Signer) -> Self {
        Self {
            signer_id: signer.id.clone(),
            display_name: signer.display_name.clone(),
        }
    }
}

/// Coordinator → device record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutboundPayload {
    pub version: u8,
    pub request_id: String,
    pub kind: RequestKind,
    pub bundles: Vec<OutboundBundle>,
    pub signers: Vec<OutboundSigner>,
    pub required_signatures: u32,
    pub expires_at: DateTime<Utc>,
    /// Hex SHA-256 digest the device signs
    pub digest: String,
}

impl OutboundPayload {
    pub fn new(
        request_id: impl Into<String>,
        kind: RequestKind,
        bundles: &[TransactionBundle],
        signers: &[Signer],
        required_signatures: u32,
        expires_at: DateTime<Utc>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            request_id: request_id.into(),
            kind,
            bundles: bundles.iter().map(OutboundBundle::from).collect(),
            signers: signers.iter().map(OutboundSigner::from).collect(),
            required_signatures,
            expires_at,
            digest: digest.into(),
        }
    }

    pub fn for_request(request: &SigningRequest, digest: impl Into<String>) -> Self {
        Self::new(
            request.id.clone(),
            request.kind,
            &request.transaction_bundles,
            &request.signers,
            request.required_signatures,
            request.expires_at,
            digest,
        )
    }

    pub(crate) fn validate(&self) -> Result<(), CodecError> {
        check_version(self.version)?;
        require_text("requestId", &self.request_id)?;
        if self.bundles.is_empty() {
            return Err(CodecError::malformed("payload lists no bundles"));
        }
        if self.required_signatures == 0 {
            return Err(CodecError::malformed("requiredSignatures must be at least 1"));
        }
        require_hex("digest", &self.digest)?;
        Ok(())
    }
}

/// Signed transaction for one bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SignedBundle {
    pub bundle_id: String,
    pub signed_payload: String,
}

/// Device → coordinator record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SignedSubmission {
    pub version: u8,
    pub request_id: String,
    pub signer_id: String,
    /// Hex signature over the request digest
    pub signature: String,
    pub bundles: Vec<SignedBundle>,
    /// Device clock; advisory only
    #[serde(default)]
    pub signed_at: Option<DateTime<Utc>>,
}

impl SignedSubmission {
    pub fn new(
        request_id: impl Into<String>,
        signer_id: impl Into<String>,
        signature: impl Into<String>,
        bundles: Vec<SignedBundle>,
        signed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            request_id: request_id.into(),
            signer_id: signer_id.into(),
            signature: signature.into(),
            bundles,
            signed_at,
        }
    }

    /// Bundle id → signed transaction
    pub fn signed_payloads(&self) -> BTreeMap<String, String> {
        self.bundles
            .iter()
            .map(|b| (b.bundle_id.clone(), b.signed_payload.clone()))
            .collect()
    }

    pub(crate) fn validate(&self) -> Result<(), CodecError> {
        check_version(self.version)?;
        require_text("requestId", &self.request_id)?;
        require_text("signerId", &self.signer_id)?;
        require_hex("signature", &self.signature)?;
        if self.bundles.is_empty() {
            return Err(CodecError::malformed("submission carries no signed bundles"));
        }

        let mut seen = HashSet::new();
        for bundle in &self.bundles {
            require_text("bundleId", &bundle.bundle_id)?;
            require_text("signedPayload", &bundle.signed_payload)?;
            if !seen.insert(bundle.bundle_id.as_str()) {
                return Err(CodecError::malformed(format!(
                    "bundle {} signed more than once",
                    bundle.bundle_id
                )));
            }
        }
        Ok(())
    }
}

fn check_version(version: u8) -> Result<(), CodecError> {
    if version != PAYLOAD_VERSION {
        return Err(CodecError::malformed(format!(
            "unsupported payload version {version}"
        )));
    }
    Ok(())
}

fn require_text(field: &str, value: &str) -> Result<(), CodecError> {
    if value.trim().is_empty() {
        return Err(CodecError::malformed(format!("{field} is empty")));
    }
    Ok(())
}

fn require_hex(field: &str, value: &str) -> Result<(), CodecError> {
    require_text(field, value)?;
    if hex::decode(value).is_err() {
        return Err(CodecError::malformed(format!("{field} is not valid hex")));
    }
    Ok(())
}
