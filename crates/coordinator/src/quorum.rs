//! Quorum tracker
//!
//! Applies a device signature to a request. The order of checks decides which
//! rejection the operator sees: terminal, then expired, then unknown signer,
//! then duplicate, then bundle set, and only then the signature itself.

use crate::error::CoordinatorError;
use crate::events::CoordinatorEvent;
use crate::expiry::expire_overdue;
use crate::registry::{RequestRegistry, Transition};
use chrono::{DateTime, Utc};
use coldsign_audit::{AuditAction, AuditRecord};
use coldsign_codec::SignedSubmission;
use coldsign_core::{Clock, RequestStatus, SigningRequest};
use coldsign_verifier::SignatureVerifier;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A signature as it reaches the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureSubmission {
    pub request_id: String,
    pub signer_id: String,
    /// Hex signature over the request digest
    pub signature: String,
    /// Signed transaction per bundle id
    pub signed_payloads: BTreeMap<String, String>,
    /// Device clock; advisory only
    pub claimed_signed_at: Option<DateTime<Utc>>,
}

impl From<SignedSubmission> for SignatureSubmission {
    fn from(submission: SignedSubmission) -> Self {
        Self {
            signed_payloads: submission.signed_payloads(),
            request_id: submission.request_id,
            signer_id: submission.signer_id,
            signature: submission.signature,
            claimed_signed_at: submission.signed_at,
        }
    }
}

pub struct QuorumTracker {
    registry: Arc<RequestRegistry>,
    verifier: SignatureVerifier,
    clock: Arc<dyn Clock>,
}

impl QuorumTracker {
    pub fn new(
        registry: Arc<RequestRegistry>,
        verifier: SignatureVerifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            verifier,
            clock,
        }
    }

    /// `submitSignature(requestId, signerId, signature, signedPayload)`
    ///
    /// Every call leaves an audit entry, including rejections.
    pub fn submit_signature(
        &self,
        submission: &SignatureSubmission,
    ) -> Result<SigningRequest, CoordinatorError> {
        let now = self.clock.now();
        let result = self.registry.update(&submission.request_id, now, |request| {
            self.apply(request, submission, now)
        });

        if let Err(error @ CoordinatorError::NotFound(_)) = &result {
            tracing::warn!(
                request_id = %submission.request_id,
                signer_id = %submission.signer_id,
                reason = error.code(),
                "Signature rejected"
            );
            self.registry
                .record(rejection_record(None, submission, error), now)?;
        }
        result
    }

    fn apply(
        &self,
        request: &mut SigningRequest,
        submission: &SignatureSubmission,
        now: DateTime<Utc>,
    ) -> Transition<SigningRequest> {
        if request.is_terminal() {
            return reject(
                request,
                submission,
                CoordinatorError::AlreadyFinalized {
                    request_id: request.id.clone(),
                    status: request.status,
                },
            );
        }

        if request.is_overdue(now) {
            return match expire_overdue(request, now) {
                Ok((record, event)) => {
                    let error = CoordinatorError::ExpiredRequest(request.id.clone());
                    let rejected = rejection_record(Some(request), submission, &error);
                    warn_rejected(request, submission, &error);
                    Transition::reject(error)
                        .audit(record)
                        .audit(rejected)
                        .publish(event)
                }
                Err(e) => Transition::reject(e),
            };
        }

        let Some(signer) = request.signer(&submission.signer_id) else {
            return reject(
                request,
                submission,
                CoordinatorError::UnknownSigner {
                    request_id: request.id.clone(),
                    signer_id: submission.signer_id.clone(),
                },
            );
        };

        if signer.has_signed() {
            return reject(
                request,
                submission,
                CoordinatorError::DuplicateSignature {
                    request_id: request.id.clone(),
                    signer_id: submission.signer_id.clone(),
                },
            );
        }

        if let Some(mismatch) = bundle_mismatch(request, submission) {
            return reject(request, submission, CoordinatorError::MalformedPayload(mismatch));
        }

        match self.verifier.verify_signer(request, signer, &submission.signature) {
            Ok(true) => {}
            Ok(false) => {
                return reject(
                    request,
                    submission,
                    CoordinatorError::Verification {
                        request_id: request.id.clone(),
                        signer_id: submission.signer_id.clone(),
                    },
                )
            }
            Err(e) => {
                return reject(
                    request,
                    submission,
                    CoordinatorError::MalformedPayload(e.to_string()),
                )
            }
        }

        let display_name = signer.display_name.clone();
        let status = match request.record_signature(
            &submission.signer_id,
            &submission.signature,
            &submission.signed_payloads,
            now,
        ) {
            Ok(status) => status,
            Err(e) => return Transition::reject(e.into()),
        };

        let mut detail = format!(
            "signature {} of {} required",
            request.obtained_signatures, request.required_signatures
        );
        if let Some(claimed) = submission.claimed_signed_at {
            detail.push_str(&format!(", device time {}", claimed.to_rfc3339()));
        }
        tracing::info!(
            request_id = %request.id,
            signer_id = %submission.signer_id,
            obtained = request.obtained_signatures,
            required = request.required_signatures,
            "Signature accepted"
        );

        let mut transition = Transition::accept(request.clone()).audit(
            AuditRecord::new(&request.id, AuditAction::SignatureAccepted)
                .actor(&submission.signer_id, display_name)
                .detail(detail),
        );

        if status == RequestStatus::Completed {
            transition = transition
                .audit(
                    AuditRecord::new(&request.id, AuditAction::Completed).detail(format!(
                        "quorum of {} reached",
                        request.required_signatures
                    )),
                )
                .publish(CoordinatorEvent::Completed {
                    request_id: request.id.clone(),
                    at: now,
                });
        }
        transition
    }
}

/// The submission must carry exactly one signed transaction per bundle.
fn bundle_mismatch(request: &SigningRequest, submission: &SignatureSubmission) -> Option<String> {
    let expected: BTreeSet<&str> = request.bundle_ids().collect();
    let submitted: BTreeSet<&str> = submission.signed_payloads.keys().map(String::as_str).collect();
    (expected != submitted).then(|| {
        format!(
            "signed bundles {:?} do not match request bundles {:?}",
            submitted, expected
        )
    })
}

fn reject(
    request: &SigningRequest,
    submission: &SignatureSubmission,
    error: CoordinatorError,
) -> Transition<SigningRequest> {
    warn_rejected(request, submission, &error);
    let record = rejection_record(Some(request), submission, &error);
    Transition::reject(error).audit(record)
}

fn warn_rejected(request: &SigningRequest, submission: &SignatureSubmission, error: &CoordinatorError) {
    tracing::warn!(
        request_id = %request.id,
        signer_id = %submission.signer_id,
        status = %request.status,
        reason = error.code(),
        "Signature rejected"
    );
}

fn rejection_record(
    request: Option<&SigningRequest>,
    submission: &SignatureSubmission,
    error: &CoordinatorError,
) -> AuditRecord {
    let actor_name = request
        .and_then(|r| r.signer(&submission.signer_id))
        .map(|s| s.display_name.clone())
        .unwrap_or_else(|| "unknown".to_string());
    AuditRecord::new(&submission.request_id, AuditAction::SignatureRejected)
        .actor(&submission.signer_id, actor_name)
        .detail(format!("{}: {}", error.code(), error))
}
