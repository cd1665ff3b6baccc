//! Cancellation handler
//!
//! Operator-initiated early finalization. Immediate and irreversible; there is
//! no soft-cancel state.

use crate::error::CoordinatorError;
use crate::events::CoordinatorEvent;
use crate::expiry::expire_overdue;
use crate::registry::{RequestRegistry, Transition};
use chrono::{DateTime, Utc};
use coldsign_audit::{AuditAction, AuditRecord};
use coldsign_core::{Clock, SigningRequest};
use serde::Deserialize;
use std::sync::Arc;

/// Operator's cancellation order
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelCommand {
    #[serde(default)]
    pub reason: String,
    pub actor_id: String,
    #[serde(default)]
    pub actor_name: Option<String>,
}

impl CancelCommand {
    pub fn new(reason: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            actor_id: actor_id.into(),
            actor_name: None,
        }
    }

    pub fn with_actor_name(mut self, name: impl Into<String>) -> Self {
        self.actor_name = Some(name.into());
        self
    }

    fn actor_name(&self) -> &str {
        self.actor_name.as_deref().unwrap_or(&self.actor_id)
    }

    fn rejection(&self, request_id: &str, error: &CoordinatorError) -> AuditRecord {
        AuditRecord::new(request_id, AuditAction::CancelRejected)
            .actor(&self.actor_id, self.actor_name())
            .detail(format!("{}: {}", error.code(), error))
    }
}

pub struct CancellationHandler {
    registry: Arc<RequestRegistry>,
    clock: Arc<dyn Clock>,
}

impl CancellationHandler {
    pub fn new(registry: Arc<RequestRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    /// `cancel(requestId, reason, actorId)`
    pub fn cancel(
        &self,
        request_id: &str,
        command: &CancelCommand,
    ) -> Result<SigningRequest, CoordinatorError> {
        let now = self.clock.now();
        let result = self
            .registry
            .update(request_id, now, |request| apply(request, command, now));

        if let Err(error @ CoordinatorError::NotFound(_)) = &result {
            tracing::warn!(request_id, actor_id = %command.actor_id, reason = error.code(), "Cancellation rejected");
            self.registry
                .record(command.rejection(request_id, error), now)?;
        }
        result
    }
}

fn apply(
    request: &mut SigningRequest,
    command: &CancelCommand,
    now: DateTime<Utc>,
) -> Transition<SigningRequest> {
    if request.is_terminal() {
        let error = CoordinatorError::AlreadyFinalized {
            request_id: request.id.clone(),
            status: request.status,
        };
        return reject(request, command, error);
    }

    if request.is_overdue(now) {
        return match expire_overdue(request, now) {
            Ok((expired, event)) => {
                let error = CoordinatorError::ExpiredRequest(request.id.clone());
                warn_rejected(request, command, &error);
                let rejected = command.rejection(&request.id, &error);
                Transition::reject(error)
                    .audit(expired)
                    .audit(rejected)
                    .publish(event)
            }
            Err(e) => Transition::reject(e),
        };
    }

    let reason = command.reason.trim();
    if reason.is_empty() {
        return reject(
            request,
            command,
            CoordinatorError::InvalidRequest("cancellation reason is required".to_string()),
        );
    }
    if command.actor_id.trim().is_empty() {
        return reject(
            request,
            command,
            CoordinatorError::InvalidRequest("cancelling actor is required".to_string()),
        );
    }

    if let Err(e) = request.cancel(reason, &command.actor_id, now) {
        return Transition::reject(CoordinatorError::Internal(e.to_string()));
    }
    tracing::info!(
        request_id = %request.id,
        actor_id = %command.actor_id,
        reason,
        "Signing request cancelled"
    );

    Transition::accept(request.clone())
        .audit(
            AuditRecord::new(&request.id, AuditAction::Cancelled)
                .actor(&command.actor_id, command.actor_name())
                .detail(reason),
        )
        .publish(CoordinatorEvent::Cancelled {
            request_id: request.id.clone(),
            reason: reason.to_string(),
            actor_id: command.actor_id.clone(),
            at: now,
        })
}

fn reject(
    request: &SigningRequest,
    command: &CancelCommand,
    error: CoordinatorError,
) -> Transition<SigningRequest> {
    warn_rejected(request, command, &error);
    let record = command.rejection(&request.id, &error);
    Transition::reject(error).audit(record)
}

fn warn_rejected(request: &SigningRequest, command: &CancelCommand, error: &CoordinatorError) {
    tracing::warn!(
        request_id = %request.id,
        actor_id = %command.actor_id,
        status = %request.status,
        reason = error.code(),
        "Cancellation rejected"
    );
}
