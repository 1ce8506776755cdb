//! Error-to-HTTP mapping for the operator API.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use bm_domain::error::Error;

/// Wrapper turning the shared error type into an HTTP response.
///
/// Upstream and internal failures are scrubbed: the caller sees a generic
/// message, the detail goes to the log.
pub struct ApiError(pub Error);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::Validation(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Error::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            Error::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            Error::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            Error::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            Error::PortExhausted(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string())
            }
            Error::BadGateway(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            Error::GatewayTimeout(m) => (StatusCode::GATEWAY_TIMEOUT, m.clone()),
            other => {
                tracing::error!(error = %other, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
