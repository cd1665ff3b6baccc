//! API Handlers

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use coldsign_coordinator::{
    Actor, CancelCommand, CoordinatorError, ListQuery, NewSigningRequest,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

// ============ Response Types ============

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    /// Machine-readable rejection code
    pub code: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        })
    }

    pub fn error(code: &str, message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(message.into()),
            code: Some(code.to_string()),
        })
    }
}

/// Coordinator failure rendered as an HTTP response
pub struct ApiError(CoordinatorError);

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        Self(err)
    }
}

/// HTTP status per rejection; operators read the `code`, clients the status.
pub fn status_for(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::InvalidRequest(_) | CoordinatorError::MalformedPayload(_) => {
            StatusCode::BAD_REQUEST
        }
        CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
        CoordinatorError::AlreadyFinalized { .. } | CoordinatorError::DuplicateSignature { .. } => {
            StatusCode::CONFLICT
        }
        CoordinatorError::ExpiredRequest(_) => StatusCode::GONE,
        CoordinatorError::UnknownSigner { .. } => StatusCode::FORBIDDEN,
        CoordinatorError::Verification { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CoordinatorError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        CoordinatorError::Store(_) | CoordinatorError::Audit(_) | CoordinatorError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, ApiResponse::<()>::error(self.0.code(), self.0.to_string())).into_response()
    }
}

type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ApiError>;

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, ApiResponse::success(data)))
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    ApiError(CoordinatorError::InvalidRequest(rejection.body_text()))
}

// ============ Request Types ============

/// Scanned or uploaded inbound frame
#[derive(Debug, Deserialize)]
pub struct SubmitPayloadRequest {
    pub payload: String,
}

// ============ Handlers ============

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp(),
        "requests": state.coordinator.stats().total,
    }))
}

/// Create a signing request
pub async fn create_request(
    State(state): State<AppState>,
    body: Result<Json<NewSigningRequest>, JsonRejection>,
) -> ApiResult<coldsign_core::SigningRequest> {
    let Json(input) = body.map_err(bad_body)?;
    let request = state.coordinator.create_request(input)?;
    Ok((StatusCode::CREATED, ApiResponse::success(request)))
}

/// Filtered listing
pub async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<coldsign_coordinator::RequestPage> {
    ok(state.coordinator.list(&query))
}

/// Counts per status
pub async fn request_stats(
    State(state): State<AppState>,
) -> ApiResult<coldsign_coordinator::RegistryStats> {
    ok(state.coordinator.stats())
}

/// Full aggregate with signer progress
pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<coldsign_core::SigningRequest> {
    ok(state.coordinator.get(&id)?)
}

/// Produce the relay frame for the offline device
pub async fn outbound_payload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    actor: Option<Json<Actor>>,
) -> ApiResult<coldsign_coordinator::OutboundFrame> {
    let actor = actor.map(|Json(a)| a).unwrap_or_default();
    ok(state.coordinator.outbound_payload(&id, &actor)?)
}

/// Submit a signed frame returned by a device
pub async fn submit_signature(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SubmitPayloadRequest>, JsonRejection>,
) -> ApiResult<coldsign_core::SigningRequest> {
    let Json(body) = body.map_err(bad_body)?;
    ok(state.coordinator.submit_payload(&id, &body.payload)?)
}

/// Cancel with a mandatory reason
pub async fn cancel_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<CancelCommand>, JsonRejection>,
) -> ApiResult<coldsign_core::SigningRequest> {
    let Json(command) = body.map_err(bad_body)?;
    ok(state.coordinator.cancel(&id, &command)?)
}

/// Ordered audit entries of one request
pub async fn audit_trail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<coldsign_audit::AuditEntry>> {
    ok(state.coordinator.audit_trail(&id)?)
}
