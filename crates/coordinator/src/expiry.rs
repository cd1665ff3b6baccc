//! Expiration monitor
//!
//! Timeouts are detected two ways: lazily by any mutation that finds its
//! request overdue, and eagerly by a periodic sweep. Both go through
//! [`expire_overdue`] under the request lock, so they converge on the same
//! terminal state and a second pass is a no-op.

use crate::error::CoordinatorError;
use crate::events::CoordinatorEvent;
use crate::registry::{RequestRegistry, Transition};
use chrono::{DateTime, Utc};
use coldsign_audit::{AuditAction, AuditRecord};
use coldsign_core::{Clock, SigningRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Move an overdue request into `expired`, returning its audit entry and event.
pub(crate) fn expire_overdue(
    request: &mut SigningRequest,
    now: DateTime<Utc>,
) -> Result<(AuditRecord, CoordinatorEvent), CoordinatorError> {
    request
        .expire(now)
        .map_err(|e| CoordinatorError::Internal(e.to_string()))?;

    let record = AuditRecord::new(&request.id, AuditAction::Expired).detail(format!(
        "expired at {} with {} of {} signatures",
        request.expires_at.to_rfc3339(),
        request.obtained_signatures,
        request.required_signatures
    ));
    let event = CoordinatorEvent::Expired {
        request_id: request.id.clone(),
        at: now,
    };
    Ok((record, event))
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Requests this sweep moved into `expired`
    pub expired: Vec<String>,
    /// Requests that could not be committed; retried next sweep
    pub failed: usize,
}

pub struct ExpirationMonitor {
    registry: Arc<RequestRegistry>,
    clock: Arc<dyn Clock>,
}

impl ExpirationMonitor {
    pub fn new(registry: Arc<RequestRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    /// Expire every non-terminal request whose deadline has passed.
    pub fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for id in self.registry.overdue_ids(now) {
            // re-checked under the lock; a concurrent call may have finalized it
            let result = self.registry.update(&id, now, |request| {
                if !request.is_overdue(now) {
                    return Transition::accept(false);
                }
                match expire_overdue(request, now) {
                    Ok((record, event)) => Transition::accept(true).audit(record).publish(event),
                    Err(e) => Transition::reject(e),
                }
            });

            match result {
                Ok(true) => report.expired.push(id),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(request_id = %id, error = %e, "Failed to expire request");
                    report.failed += 1;
                }
            }
        }

        if report.expired.is_empty() && report.failed == 0 {
            tracing::debug!("Expiration sweep found nothing to do");
        } else {
            tracing::info!(
                expired = report.expired.len(),
                failed = report.failed,
                "Expiration sweep finished"
            );
        }
        report
    }

    /// Sweep every `period` until the task is aborted
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let monitor = Arc::clone(&self);
            if let Err(e) = tokio::task::spawn_blocking(move || monitor.sweep()).await {
                tracing::error!(error = %e, "Expiration sweep panicked");
            }
        }
    }

    /// Start the periodic sweep; it stops when the returned guard is dropped
    pub fn spawn(self: Arc<Self>, period: Duration) -> SweepGuard {
        tracing::info!(interval_secs = period.as_secs(), "Starting expiration sweep");
        SweepGuard {
            handle: tokio::spawn(self.run(period)),
        }
    }
}

/// Aborts the sweep task on drop
pub struct SweepGuard {
    handle: JoinHandle<()>,
}

impl SweepGuard {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SweepGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
