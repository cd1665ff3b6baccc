//! API Routes

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Signing requests
        .route(
            "/signing-requests",
            get(handlers::list_requests).post(handlers::create_request),
        )
        .route("/signing-requests/stats", get(handlers::request_stats))
        .route("/signing-requests/:id", get(handlers::get_request))
        // Air-gap relay
        .route(
            "/signing-requests/:id/outbound-payload",
            post(handlers::outbound_payload),
        )
        .route(
            "/signing-requests/:id/signatures",
            post(handlers::submit_signature),
        )
        // Operator actions
        .route("/signing-requests/:id/cancel", post(handlers::cancel_request))
        .route("/signing-requests/:id/audit", get(handlers::audit_trail))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
