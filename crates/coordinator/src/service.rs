//! Coordinator facade
//!
//! Wires registry, codec, verifier, quorum tracker, expiration monitor and
//! cancellation handler around one clock, one audit log and one event bus.
//! This is the API the HTTP layer and the CLI talk to.

use crate::cancel::{CancelCommand, CancellationHandler};
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::events::{CoordinatorEvent, EventBus};
use crate::expiry::{ExpirationMonitor, SweepGuard, SweepReport};
use crate::quorum::{QuorumTracker, SignatureSubmission};
use crate::registry::{ListQuery, RegistryStats, RequestPage, RequestRegistry};
use crate::store::RequestStore;
use chrono::Duration;
use coldsign_audit::{AuditAction, AuditEntry, AuditLog, AuditRecord};
use coldsign_codec::{OutboundPayload, PayloadCodec};
use coldsign_core::{
    Amount, AssetFamily, Clock, RequestKind, RequestMetadata, SignatureScheme, Signer,
    SigningRequest, TransactionBundle,
};
use coldsign_verifier::{digest_hex, request_digest, SignatureVerifier};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

pub const REQUESTS_DB: &str = "requests.db";
pub const AUDIT_FILE: &str = "audit.jsonl";

/// Who is acting; defaults to the system actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }

    pub fn system() -> Self {
        Self::new("system", "system")
    }

    fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::system()
    }
}

/// Bundle as submitted by the triggering engine
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBundle {
    pub id: String,
    pub asset_symbol: String,
    pub amount: Amount,
    pub fee: Amount,
    pub from_address: String,
    pub to_address: String,
    pub unsigned_payload: String,
}

/// Signer as submitted by the triggering engine
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSigner {
    pub id: String,
    pub display_name: String,
    pub public_key: String,
    /// Inferred from the first bundle's asset family when absent
    #[serde(default)]
    pub scheme: Option<SignatureScheme>,
}

/// Creation input
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSigningRequest {
    pub kind: RequestKind,
    pub transaction_bundles: Vec<NewBundle>,
    pub signers: Vec<NewSigner>,
    pub required_signatures: u32,
    /// Falls back to the configured default TTL
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub metadata: RequestMetadata,
    #[serde(default)]
    pub requested_by: Option<Actor>,
}

/// Relay frame ready for the carrier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    pub request_id: String,
    pub frame: String,
    /// Hex digest the device signs
    pub digest: String,
    pub size: usize,
    pub capacity: usize,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<RequestRegistry>,
    audit: Arc<AuditLog>,
    events: EventBus,
    codec: PayloadCodec,
    verifier: SignatureVerifier,
    quorum: QuorumTracker,
    cancellation: CancellationHandler,
    expiry: Arc<ExpirationMonitor>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        store: RequestStore,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoordinatorError> {
        config
            .validate()
            .map_err(|e| CoordinatorError::Internal(e.to_string()))?;

        let events = EventBus::default();
        let registry = Arc::new(RequestRegistry::load(
            store,
            Arc::clone(&audit),
            events.clone(),
        )?);
        let verifier = SignatureVerifier::new();

        Ok(Self {
            codec: PayloadCodec::new(config.carrier_capacity),
            quorum: QuorumTracker::new(Arc::clone(&registry), verifier.clone(), Arc::clone(&clock)),
            cancellation: CancellationHandler::new(Arc::clone(&registry), Arc::clone(&clock)),
            expiry: Arc::new(ExpirationMonitor::new(Arc::clone(&registry), Arc::clone(&clock))),
            config,
            clock,
            registry,
            audit,
            events,
            verifier,
        })
    }

    /// Memory-only coordinator (for testing)
    pub fn in_memory(
        config: CoordinatorConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoordinatorError> {
        Self::new(
            config,
            RequestStore::in_memory()?,
            Arc::new(AuditLog::in_memory()),
            clock,
        )
    }

    /// Coordinator persisting under `data_dir`
    pub fn open(
        config: CoordinatorConfig,
        data_dir: &Path,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoordinatorError> {
        std::fs::create_dir_all(data_dir).map_err(|e| CoordinatorError::Audit(e.into()))?;
        let store = RequestStore::open(data_dir.join(REQUESTS_DB))?;
        let audit = Arc::new(AuditLog::open(data_dir.join(AUDIT_FILE))?);
        tracing::info!(data_dir = %data_dir.display(), "Coordinator storage opened");
        Self::new(config, store, audit, clock)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Validate and register a new `pending` request.
    pub fn create_request(
        &self,
        input: NewSigningRequest,
    ) -> Result<SigningRequest, CoordinatorError> {
        let now = self.clock.now();
        let ttl = match input.ttl_secs {
            None => self.config.default_ttl(),
            Some(0) => {
                return Err(CoordinatorError::InvalidRequest(
                    "ttl must be positive".to_string(),
                ))
            }
            Some(secs) if secs > self.config.max_ttl_secs => {
                return Err(CoordinatorError::InvalidRequest(format!(
                    "ttl of {}s exceeds the maximum of {}s",
                    secs, self.config.max_ttl_secs
                )))
            }
            Some(secs) => Duration::seconds(secs as i64),
        };

        let fallback_scheme = input
            .transaction_bundles
            .first()
            .map(|b| AssetFamily::from_symbol(&b.asset_symbol).default_scheme())
            .unwrap_or(SignatureScheme::Ed25519);

        let mut signers = Vec::with_capacity(input.signers.len());
        for signer in input.signers {
            let scheme = signer.scheme.unwrap_or(fallback_scheme);
            // canonical form, so key uniqueness holds across encodings
            let public_key = self
                .verifier
                .canonical_public_key(scheme, &signer.public_key)
                .map_err(|e| {
                    CoordinatorError::InvalidRequest(format!("signer {}: {}", signer.id, e))
                })?;
            signers.push(Signer::new(signer.id, signer.display_name, public_key, scheme));
        }

        let bundles = input
            .transaction_bundles
            .into_iter()
            .map(|b| {
                TransactionBundle::new(
                    b.id,
                    b.asset_symbol,
                    b.amount,
                    b.fee,
                    b.from_address,
                    b.to_address,
                    b.unsigned_payload,
                )
            })
            .collect();

        let request = SigningRequest::new(
            new_request_id(),
            input.kind,
            bundles,
            signers,
            input.required_signatures,
            now,
            now + ttl,
            input.metadata,
        )?;

        let actor = input.requested_by.unwrap_or_default();
        let record = AuditRecord::new(&request.id, AuditAction::Created)
            .actor(&actor.id, actor.name())
            .detail(format!(
                "{} with {} bundle(s), {} of {} signers, expires {}",
                request.kind,
                request.transaction_bundles.len(),
                request.required_signatures,
                request.signers.len(),
                request.expires_at.to_rfc3339()
            ));
        self.registry.create(request, record, now)
    }

    /// Encode the relay frame for the offline device.
    pub fn outbound_payload(
        &self,
        request_id: &str,
        actor: &Actor,
    ) -> Result<OutboundFrame, CoordinatorError> {
        let now = self.clock.now();
        let request = self
            .registry
            .get(request_id)
            .ok_or_else(|| CoordinatorError::NotFound(request_id.to_string()))?;
        if request.is_terminal() {
            return Err(CoordinatorError::AlreadyFinalized {
                request_id: request.id,
                status: request.status,
            });
        }
        if request.is_overdue(now) {
            return Err(CoordinatorError::ExpiredRequest(request.id));
        }

        let digest = digest_hex(&request_digest(&request));
        let frame = self
            .codec
            .encode_outbound(&OutboundPayload::for_request(&request, digest.clone()))
            .inspect_err(|e| {
                tracing::warn!(request_id, error = %e, "Outbound payload rejected");
            })?;

        self.registry.record(
            AuditRecord::new(request_id, AuditAction::QrGenerated)
                .actor(&actor.id, actor.name())
                .detail(format!("{} byte frame, digest {}", frame.len(), digest)),
            now,
        )?;
        tracing::info!(request_id, size = frame.len(), "Outbound payload generated");

        Ok(OutboundFrame {
            request_id: request_id.to_string(),
            size: frame.len(),
            capacity: self.codec.capacity(),
            frame,
            digest,
        })
    }

    /// Decode a scanned or uploaded frame and hand it to the quorum tracker.
    pub fn submit_payload(
        &self,
        request_id: &str,
        frame: &str,
    ) -> Result<SigningRequest, CoordinatorError> {
        let submission = match self.codec.decode_submission(frame) {
            Ok(decoded) => SignatureSubmission::from(decoded),
            Err(e) => {
                let error = if self.registry.contains(request_id) {
                    CoordinatorError::from(e)
                } else {
                    CoordinatorError::NotFound(request_id.to_string())
                };
                return Err(self.reject_frame(request_id, "unknown", error));
            }
        };

        if submission.request_id != request_id {
            let error = CoordinatorError::MalformedPayload(format!(
                "payload belongs to request {}",
                submission.request_id
            ));
            return Err(self.reject_frame(request_id, &submission.signer_id, error));
        }

        self.quorum.submit_signature(&submission)
    }

    /// Apply an already-decoded submission
    pub fn submit_signature(
        &self,
        submission: &SignatureSubmission,
    ) -> Result<SigningRequest, CoordinatorError> {
        self.quorum.submit_signature(submission)
    }

    fn reject_frame(
        &self,
        request_id: &str,
        signer_id: &str,
        error: CoordinatorError,
    ) -> CoordinatorError {
        tracing::warn!(request_id, signer_id, reason = error.code(), "Signed payload rejected");
        let record = AuditRecord::new(request_id, AuditAction::SignatureRejected)
            .actor(signer_id, "unknown")
            .detail(format!("{}: {}", error.code(), error));
        match self.registry.record(record, self.clock.now()) {
            Ok(()) => error,
            Err(audit_error) => audit_error,
        }
    }

    pub fn cancel(
        &self,
        request_id: &str,
        command: &CancelCommand,
    ) -> Result<SigningRequest, CoordinatorError> {
        self.cancellation.cancel(request_id, command)
    }

    /// Full aggregate, including signer progress. Never mutates.
    pub fn get(&self, request_id: &str) -> Result<SigningRequest, CoordinatorError> {
        self.registry
            .get(request_id)
            .ok_or_else(|| CoordinatorError::NotFound(request_id.to_string()))
    }

    pub fn list(&self, query: &ListQuery) -> RequestPage {
        self.registry.list(query)
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Ordered audit entries of one request
    pub fn audit_trail(&self, request_id: &str) -> Result<Vec<AuditEntry>, CoordinatorError> {
        if !self.registry.contains(request_id) {
            return Err(CoordinatorError::NotFound(request_id.to_string()));
        }
        Ok(self.audit.for_request(request_id))
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Run one expiration sweep now
    pub fn sweep_expired(&self) -> SweepReport {
        self.expiry.sweep()
    }

    /// Start the periodic sweep at the configured interval
    pub fn spawn_expiry_sweep(&self) -> SweepGuard {
        Arc::clone(&self.expiry).spawn(self.config.sweep_interval())
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }
}

fn new_request_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("SR-{}", id[..12].to_ascii_uppercase())
}
