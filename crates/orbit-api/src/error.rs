use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orbit_common::OrbitError;
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    request_id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

pub fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
            request_id: format!("req_{}", Uuid::new_v4()),
        },
    };
    (status, Json(body)).into_response()
}

/// Handler error, rendered as the JSON error body.
#[derive(Debug)]
pub struct ApiError(pub OrbitError);

impl From<OrbitError> for ApiError {
    fn from(e: OrbitError) -> Self {
        Self(e)
    }
}

pub fn status_of(e: &OrbitError) -> StatusCode {
    match e {
        OrbitError::Validation(_) | OrbitError::Quota { .. } => StatusCode::BAD_REQUEST,
        OrbitError::Ownership(_) => StatusCode::FORBIDDEN,
        OrbitError::NotFound(_) | OrbitError::NotOwner(_) => StatusCode::NOT_FOUND,
        OrbitError::DomainConflict(_) => StatusCode::CONFLICT,
        OrbitError::Scheduler(_) | OrbitError::Upstream(_) => StatusCode::BAD_GATEWAY,
        OrbitError::Template(_) | OrbitError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        error_response(status, self.0.code(), &self.0.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
