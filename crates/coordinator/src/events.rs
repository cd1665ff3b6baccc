//! In-process event bus for finalized requests
//!
//! Events are published only after the transition is committed to storage and
//! the audit log. The bus keeps no history; the audit log is the record.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coldsign_core::RequestStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const DEFAULT_CAPACITY: usize = 256;

/// A request reached a terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// Quorum reached; the external engine may broadcast the signed bundles
    Completed {
        request_id: String,
        at: DateTime<Utc>,
    },
    Expired {
        request_id: String,
        at: DateTime<Utc>,
    },
    Cancelled {
        request_id: String,
        reason: String,
        actor_id: String,
        at: DateTime<Utc>,
    },
}

impl CoordinatorEvent {
    pub fn request_id(&self) -> &str {
        match self {
            CoordinatorEvent::Completed { request_id, .. }
            | CoordinatorEvent::Expired { request_id, .. }
            | CoordinatorEvent::Cancelled { request_id, .. } => request_id,
        }
    }

    pub fn status(&self) -> RequestStatus {
        match self {
            CoordinatorEvent::Completed { .. } => RequestStatus::Completed,
            CoordinatorEvent::Expired { .. } => RequestStatus::Expired,
            CoordinatorEvent::Cancelled { .. } => RequestStatus::Cancelled,
        }
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Subscriber '{name}' failed: {reason}")]
    SubscriberFailed { name: String, reason: String },
}

/// Broadcast channel of coordinator events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoordinatorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, event: CoordinatorEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("No event subscribers attached");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Consumer of coordinator events
///
/// Handlers should be idempotent; a lagging subscriber skips events rather
/// than blocking the coordinator.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn handle(&self, event: &CoordinatorEvent) -> Result<(), EventError>;
}

/// Drive `subscriber` from the bus until the bus is dropped
pub fn spawn_subscriber(bus: &EventBus, subscriber: Arc<dyn EventSubscriber>) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    if let Err(e) = subscriber.handle(&event).await {
                        tracing::warn!(
                            subscriber = subscriber.name(),
                            request_id = event.request_id(),
                            error = %e,
                            "Event subscriber failed"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        subscriber = subscriber.name(),
                        skipped,
                        "Event subscriber lagged"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// Logs finalized requests; completed ones are ready for broadcast
#[derive(Debug, Default)]
pub struct LoggingSubscriber;

#[async_trait]
impl EventSubscriber for LoggingSubscriber {
    fn name(&self) -> &str {
        "logging"
    }

    async fn handle(&self, event: &CoordinatorEvent) -> Result<(), EventError> {
        match event {
            CoordinatorEvent::Completed { request_id, at } => {
                tracing::info!(request_id = %request_id, at = %at, "Signing request ready for broadcast");
            }
            CoordinatorEvent::Expired { request_id, at } => {
                tracing::info!(request_id = %request_id, at = %at, "Signing request expired");
            }
            CoordinatorEvent::Cancelled {
                request_id,
                reason,
                actor_id,
                ..
            } => {
                tracing::info!(
                    request_id = %request_id,
                    actor_id = %actor_id,
                    reason = %reason,
                    "Signing request cancelled"
                );
            }
        }
        Ok(())
    }
}
