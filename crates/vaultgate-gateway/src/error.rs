//! Error-to-response mapping for the HTTP surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use vaultgate_types::{ErrorEnvelope, GatewayError};

/// A taxonomized error bound to the request it failed.
#[derive(Debug)]
pub struct ApiError {
    /// The underlying taxonomized error.
    pub error: GatewayError,
    /// Correlation identifier echoed in the envelope.
    pub request_id: Uuid,
}

impl ApiError {
    /// Bind an error to a request.
    pub fn new(error: GatewayError, request_id: Uuid) -> Self {
        Self { error, request_id }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let GatewayError::Internal(ref detail) = self.error {
            error!(request_id = %self.request_id, detail, "internal error");
        }
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope::new(
            self.error.code(),
            self.error.safe_message(),
            self.request_id,
            Utc::now(),
        );
        (status, Json(envelope)).into_response()
    }
}

/// Shorthand for handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
