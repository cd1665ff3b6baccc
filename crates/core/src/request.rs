//! Signing request aggregate
//!
//! A `SigningRequest` is created once by the rebalancing/withdrawal engine and
//! afterwards only finalized, never deleted. All mutation helpers here keep the
//! aggregate invariants; callers are expected to hold the per-request lock.

use crate::amount::Amount;
use crate::scheme::SignatureScheme;
use crate::status::{RequestKind, RequestStatus, TransitionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Errors raised by aggregate construction and mutation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Unknown signer: {0}")]
    UnknownSigner(String),

    #[error("Signer {0} has already signed")]
    AlreadySigned(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// One unsigned transaction to be carried to the offline device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionBundle {
    pub id: String,
    pub asset_symbol: String,
    pub amount: Amount,
    pub fee: Amount,
    pub from_address: String,
    pub to_address: String,
    /// Asset-specific encoding (PSBT, RLP, serialized message...), opaque here
    pub unsigned_payload: String,
    /// Latest signed transaction returned by a device for this bundle
    #[serde(default)]
    pub signed_payload: Option<String>,
}

impl TransactionBundle {
    pub fn new(
        id: impl Into<String>,
        asset_symbol: impl Into<String>,
        amount: Amount,
        fee: Amount,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        unsigned_payload: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            asset_symbol: asset_symbol.into().trim().to_ascii_uppercase(),
            amount,
            fee,
            from_address: from_address.into(),
            to_address: to_address.into(),
            unsigned_payload: unsigned_payload.into(),
            signed_payload: None,
        }
    }
}

/// A designated key holder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signer {
    pub id: String,
    pub display_name: String,
    /// Registered public key (hex). The only key a signature is checked against.
    pub public_key: String,
    pub scheme: SignatureScheme,
    #[serde(default)]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl Signer {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        public_key: impl Into<String>,
        scheme: SignatureScheme,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            public_key: public_key.into().trim().to_ascii_lowercase(),
            scheme,
            signed_at: None,
            signature: None,
        }
    }

    pub fn has_signed(&self) -> bool {
        self.signed_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Free-form context supplied by the triggering engine
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Record of an operator cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cancellation {
    pub reason: String,
    pub actor_id: String,
}

/// Aggregate root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequest {
    pub id: String,
    pub kind: RequestKind,
    pub transaction_bundles: Vec<TransactionBundle>,
    pub signers: Vec<Signer>,
    pub required_signatures: u32,
    pub obtained_signatures: u32,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: RequestMetadata,
    /// When the request reached a terminal status
    #[serde(default)]
    pub finalized_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancellation: Option<Cancellation>,
}

impl SigningRequest {
    /// Build a fresh `pending` request, validating the creation invariants.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        kind: RequestKind,
        transaction_bundles: Vec<TransactionBundle>,
        signers: Vec<Signer>,
        required_signatures: u32,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        metadata: RequestMetadata,
    ) -> Result<Self, RequestError> {
        let request = Self {
            id: id.into(),
            kind,
            transaction_bundles,
            signers,
            required_signatures,
            obtained_signatures: 0,
            status: RequestStatus::Pending,
            created_at,
            expires_at,
            metadata,
            finalized_at: None,
            cancellation: None,
        };

        request.validate_creation()?;
        Ok(request)
    }

    fn validate_creation(&self) -> Result<(), RequestError> {
        let invalid = |msg: String| Err(RequestError::Invalid(msg));

        if self.id.trim().is_empty() {
            return invalid("id cannot be empty".to_string());
        }
        if self.transaction_bundles.is_empty() {
            return invalid("at least one transaction bundle is required".to_string());
        }
        if self.expires_at <= self.created_at {
            return invalid("expiry must be after creation".to_string());
        }

        let mut bundle_ids = HashSet::new();
        for bundle in &self.transaction_bundles {
            if bundle.id.trim().is_empty() {
                return invalid("bundle id cannot be empty".to_string());
            }
            if !bundle_ids.insert(bundle.id.as_str()) {
                return invalid(format!("duplicate bundle id {}", bundle.id));
            }
            if bundle.asset_symbol.is_empty() {
                return invalid(format!("bundle {} has no asset symbol", bundle.id));
            }
            if !bundle.amount.is_positive() {
                return invalid(format!("bundle {} amount must be positive", bundle.id));
            }
            if bundle.from_address.trim().is_empty() || bundle.to_address.trim().is_empty() {
                return invalid(format!("bundle {} needs both addresses", bundle.id));
            }
            if bundle.unsigned_payload.trim().is_empty() {
                return invalid(format!("bundle {} has an empty unsigned payload", bundle.id));
            }
            if bundle.signed_payload.is_some() {
                return invalid(format!("bundle {} is already signed", bundle.id));
            }
        }

        let mut signer_ids = HashSet::new();
        let mut keys = HashSet::new();
        for signer in &self.signers {
            if signer.id.trim().is_empty() {
                return invalid("signer id cannot be empty".to_string());
            }
            if !signer_ids.insert(signer.id.as_str()) {
                return invalid(format!("duplicate signer id {}", signer.id));
            }
            if !keys.insert(signer.public_key.as_str()) {
                return invalid(format!("signer {} reuses another signer's key", signer.id));
            }
            if signer.has_signed() || signer.signature.is_some() {
                return invalid(format!("signer {} cannot be pre-signed", signer.id));
            }
        }

        self.check_invariants()
    }

    /// Invariants that must hold after every committed transition.
    pub fn check_invariants(&self) -> Result<(), RequestError> {
        let signed = self.signers.iter().filter(|s| s.has_signed()).count() as u32;
        if self.obtained_signatures != signed {
            return Err(RequestError::Invalid(format!(
                "obtained_signatures {} does not match {} signed signers",
                self.obtained_signatures, signed
            )));
        }
        if self.required_signatures < 1 {
            return Err(RequestError::Invalid(
                "required_signatures must be at least 1".to_string(),
            ));
        }
        if self.required_signatures as usize > self.signers.len() {
            return Err(RequestError::Invalid(format!(
                "required_signatures {} exceeds {} signers",
                self.required_signatures,
                self.signers.len()
            )));
        }
        if !self.status.is_terminal()
            && self.status != RequestStatus::for_progress(signed, self.required_signatures)
        {
            return Err(RequestError::Invalid(format!(
                "status {} disagrees with {}/{} signatures",
                self.status, signed, self.required_signatures
            )));
        }
        Ok(())
    }

    pub fn signer(&self, signer_id: &str) -> Option<&Signer> {
        self.signers.iter().find(|s| s.id == signer_id)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Deadline has passed and nothing has finalized the request yet
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && now >= self.expires_at
    }

    pub fn signatures_remaining(&self) -> u32 {
        self.required_signatures.saturating_sub(self.obtained_signatures)
    }

    pub fn bundle_ids(&self) -> impl Iterator<Item = &str> {
        self.transaction_bundles.iter().map(|b| b.id.as_str())
    }

    /// Record an already-verified signature and move the status forward.
    ///
    /// `signed_payloads` maps bundle id to the signed transaction returned by
    /// the device. Returns the resulting status.
    pub fn record_signature(
        &mut self,
        signer_id: &str,
        signature: &str,
        signed_payloads: &BTreeMap<String, String>,
        at: DateTime<Utc>,
    ) -> Result<RequestStatus, RequestError> {
        let signer = self
            .signers
            .iter_mut()
            .find(|s| s.id == signer_id)
            .ok_or_else(|| RequestError::UnknownSigner(signer_id.to_string()))?;
        if signer.has_signed() {
            return Err(RequestError::AlreadySigned(signer_id.to_string()));
        }

        let obtained = self.obtained_signatures + 1;
        let next = RequestStatus::for_progress(obtained, self.required_signatures);
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            }
            .into());
        }

        signer.signed_at = Some(at);
        signer.signature = Some(signature.to_ascii_lowercase());
        for bundle in &mut self.transaction_bundles {
            if let Some(signed) = signed_payloads.get(&bundle.id) {
                bundle.signed_payload = Some(signed.clone());
            }
        }
        self.obtained_signatures = obtained;
        self.status = next;
        if next.is_terminal() {
            self.finalized_at = Some(at);
        }
        Ok(next)
    }

    /// Move into `expired`.
    pub fn expire(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.finalize(RequestStatus::Expired, at)
    }

    /// Move into `cancelled`, keeping the operator's reason.
    pub fn cancel(
        &mut self,
        reason: &str,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.finalize(RequestStatus::Cancelled, at)?;
        self.cancellation = Some(Cancellation {
            reason: reason.to_string(),
            actor_id: actor_id.to_string(),
        });
        Ok(())
    }

    fn finalize(&mut self, to: RequestStatus, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.finalized_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap()
    }

    fn bundle(id: &str) -> TransactionBundle {
        TransactionBundle::new(
            id,
            "btc",
            Amount::new(dec!(1.5)).unwrap(),
            Amount::new(dec!(0.0001)).unwrap(),
            "bc1qcold",
            "bc1qhot",
            format!("psbt-{id}"),
        )
    }

    fn signer(id: &str) -> Signer {
        Signer::new(id, id.to_uppercase(), format!("{id}{id}"), SignatureScheme::Ed25519)
    }

    fn request(required: u32) -> SigningRequest {
        SigningRequest::new(
            "SR-1",
            RequestKind::Rebalancing,
            vec![bundle("b1"), bundle("b2")],
            vec![signer("a"), signer("b"), signer("c")],
            required,
            now(),
            now() + Duration::hours(1),
            RequestMetadata::default(),
        )
        .unwrap()
    }

    fn payloads(req: &SigningRequest) -> BTreeMap<String, String> {
        req.bundle_ids()
            .map(|id| (id.to_string(), format!("signed-{id}")))
            .collect()
    }

    #[test]
    fn test_new_request_is_pending() {
        let req = request(2);
        assert_eq!(req.status, RequestStatus::Pending);
        assert_eq!(req.obtained_signatures, 0);
        assert_eq!(req.signatures_remaining(), 2);
        assert_eq!(req.transaction_bundles[0].asset_symbol, "BTC");
        assert!(req.check_invariants().is_ok());
    }

    #[test]
    fn test_creation_rejects_bad_quorum() {
        for required in [0, 4] {
            let result = SigningRequest::new(
                "SR-1",
                RequestKind::Maintenance,
                vec![bundle("b1")],
                vec![signer("a"), signer("b"), signer("c")],
                required,
                now(),
                now() + Duration::hours(1),
                RequestMetadata::default(),
            );
            assert!(matches!(result, Err(RequestError::Invalid(_))), "required={required}");
        }
    }

    #[test]
    fn test_creation_rejects_duplicates_and_empties() {
        let dup_signers = SigningRequest::new(
            "SR-1",
            RequestKind::Maintenance,
            vec![bundle("b1")],
            vec![signer("a"), signer("a")],
            1,
            now(),
            now() + Duration::hours(1),
            RequestMetadata::default(),
        );
        assert!(matches!(dup_signers, Err(RequestError::Invalid(_))));

        let no_bundles = SigningRequest::new(
            "SR-1",
            RequestKind::Maintenance,
            vec![],
            vec![signer("a")],
            1,
            now(),
            now() + Duration::hours(1),
            RequestMetadata::default(),
        );
        assert!(matches!(no_bundles, Err(RequestError::Invalid(_))));

        let mut shared_key = signer("b");
        shared_key.public_key = "aa".to_string();
        let reused = SigningRequest::new(
            "SR-1",
            RequestKind::Maintenance,
            vec![bundle("b1")],
            vec![signer("a"), shared_key],
            1,
            now(),
            now() + Duration::hours(1),
            RequestMetadata::default(),
        );
        assert!(matches!(reused, Err(RequestError::Invalid(_))));

        let already_expired = SigningRequest::new(
            "SR-1",
            RequestKind::Maintenance,
            vec![bundle("b1")],
            vec![signer("a")],
            1,
            now(),
            now(),
            RequestMetadata::default(),
        );
        assert!(matches!(already_expired, Err(RequestError::Invalid(_))));
    }

    #[test]
    fn test_record_signature_progresses_status() {
        let mut req = request(2);
        let signed = payloads(&req);

        let status = req.record_signature("a", "AB01", &signed, now()).unwrap();
        assert_eq!(status, RequestStatus::Partial);
        assert_eq!(req.obtained_signatures, 1);
        assert_eq!(req.signer("a").unwrap().signature.as_deref(), Some("ab01"));
        assert_eq!(
            req.transaction_bundles[1].signed_payload.as_deref(),
            Some("signed-b2")
        );
        assert!(req.finalized_at.is_none());

        let status = req.record_signature("b", "cd02", &signed, now()).unwrap();
        assert_eq!(status, RequestStatus::Completed);
        assert_eq!(req.finalized_at, Some(now()));
        assert!(req.check_invariants().is_ok());
    }

    #[test]
    fn test_record_signature_rejects_repeat_and_unknown() {
        let mut req = request(3);
        let signed = payloads(&req);
        req.record_signature("a", "01", &signed, now()).unwrap();

        let repeat = req.record_signature("a", "01", &signed, now());
        assert_eq!(repeat, Err(RequestError::AlreadySigned("a".to_string())));
        assert_eq!(req.obtained_signatures, 1);

        let unknown = req.record_signature("mallory", "01", &signed, now());
        assert_eq!(unknown, Err(RequestError::UnknownSigner("mallory".to_string())));
    }

    #[test]
    fn test_terminal_request_cannot_change() {
        let mut req = request(2);
        req.cancel("duplicate request", "ops-1", now()).unwrap();
        assert_eq!(req.status, RequestStatus::Cancelled);
        assert_eq!(req.cancellation.as_ref().unwrap().reason, "duplicate request");

        assert!(req.expire(now()).is_err());
        let signed = payloads(&req);
        assert!(matches!(
            req.record_signature("a", "01", &signed, now()),
            Err(RequestError::Transition(_))
        ));
        assert_eq!(req.obtained_signatures, 0);
        assert_eq!(req.status, RequestStatus::Cancelled);
    }

    #[test]
    fn test_is_overdue() {
        let mut req = request(2);
        assert!(!req.is_overdue(now()));
        assert!(req.is_overdue(req.expires_at));
        req.expire(req.expires_at).unwrap();
        assert!(!req.is_overdue(req.expires_at + Duration::hours(1)));
    }

    #[test]
    fn test_invariant_check_detects_count_drift() {
        let mut req = request(2);
        req.obtained_signatures = 1;
        assert!(req.check_invariants().is_err());
    }

    #[test]
    fn test_serde_shape() {
        let req = request(2);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["requiredSignatures"], 2);
        assert_eq!(json["kind"], "rebalancing");
        assert_eq!(json["transactionBundles"][0]["amount"], "1.5");
        let back: SigningRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }
}
