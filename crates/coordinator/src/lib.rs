//! Coldsign Coordinator - air-gap threshold signing
//!
//! Collects an m-of-n quorum of signatures produced on offline devices for a
//! signing request, under strict ordering guarantees:
//! - `RequestRegistry`: source of truth and single writer, one lock per request
//! - `QuorumTracker`: verifies and applies device signatures
//! - `ExpirationMonitor`: lazy and periodic TTL enforcement
//! - `CancellationHandler`: operator-initiated finalization
//!
//! Every call into the last three leaves an entry in the audit log, accepted
//! or rejected. `Coordinator` ties them together.

pub mod cancel;
pub mod config;
pub mod error;
pub mod events;
pub mod expiry;
pub mod quorum;
pub mod registry;
mod service;
pub mod store;

pub use cancel::{CancelCommand, CancellationHandler};
pub use config::{ConfigError, CoordinatorConfig};
pub use error::CoordinatorError;
pub use events::{
    spawn_subscriber, CoordinatorEvent, EventBus, EventError, EventSubscriber, LoggingSubscriber,
};
pub use expiry::{ExpirationMonitor, SweepGuard, SweepReport};
pub use quorum::{QuorumTracker, SignatureSubmission};
pub use registry::{ListQuery, RegistryStats, RequestPage, RequestRegistry, Transition};
pub use service::{
    Actor, Coordinator, NewBundle, NewSigner, NewSigningRequest, OutboundFrame, AUDIT_FILE,
    REQUESTS_DB,
};
pub use store::{RequestStore, StoreError};
