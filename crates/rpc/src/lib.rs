//! Coldsign RPC - HTTP service boundary and CLI
//!
//! Exposes the coordinator over axum and carries the offline-device helpers
//! (`keygen`, `sign`) and the audit trail reader used by the `coldsign` binary.

pub mod commands;
pub mod config;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use routes::create_router;
pub use state::AppState;
