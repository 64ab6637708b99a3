//! Closed error taxonomy surfaced to callers.
//!
//! Every error leaving a vaultgate service is one of the [`ErrorCode`]s
//! below, wrapped in the uniform [`ErrorEnvelope`]. Messages are safe by
//! construction: no secrets, tokens, vault paths, or stack traces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of error codes shared by every vaultgate surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Bad vendor credentials.
    AuthError,
    /// Malformed, expired, or untrusted token.
    InvalidToken,
    /// Token lacks the capability the path requires.
    InsufficientPermissions,
    /// Per-client rate limit exceeded.
    RateLimited,
    /// Vault, cache, or downstream unavailable.
    UpstreamUnavailable,
    /// Request body or parameters rejected.
    ValidationError,
    /// Catch-all for programmer errors surfacing at the boundary.
    InternalError,
}

impl ErrorCode {
    /// Fixed HTTP status for each code.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::AuthError => 401,
            ErrorCode::InvalidToken => 401,
            ErrorCode::InsufficientPermissions => 403,
            ErrorCode::RateLimited => 429,
            ErrorCode::UpstreamUnavailable => 503,
            ErrorCode::ValidationError => 400,
            ErrorCode::InternalError => 500,
        }
    }

    /// Wire form of the code (`AUTH_ERROR`, …).
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::AuthError => "AUTH_ERROR",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform JSON error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    /// One of the closed [`ErrorCode`]s.
    pub error_code: ErrorCode,
    /// Human-readable, secret-free message.
    pub message: String,
    /// Correlation identifier echoed from (or generated for) the request.
    pub request_id: Uuid,
    /// When the error was produced.
    pub timestamp: DateTime<Utc>,
}

impl ErrorEnvelope {
    /// Build an envelope stamped with `now`.
    pub fn new(code: ErrorCode, message: impl Into<String>, request_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            error_code: code,
            message: message.into(),
            request_id,
            timestamp: now,
        }
    }
}

/// Internal error type carried through the gateway and downstream services.
///
/// Variants map onto the taxonomy; `status_override` handles the one place
/// the contract departs from the default mapping (an active-rotation
/// conflict answers `409` while keeping the `VALIDATION_ERROR` code).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Presented credentials did not match any active version.
    #[error("invalid client credentials")]
    InvalidCredentials,
    /// Token failed validation.
    #[error("token rejected: {0}")]
    InvalidToken(String),
    /// Token valid but missing the required capability.
    #[error("missing required permission: {0}")]
    InsufficientPermissions(String),
    /// Client exceeded its request quota.
    #[error("rate limit exceeded")]
    RateLimited,
    /// A collaborator (vault, cache, downstream) is unavailable.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    /// Request body or parameters rejected.
    #[error("validation failed: {0}")]
    Validation(String),
    /// A conflicting resource already exists (e.g. an active rotation).
    #[error("conflict: {0}")]
    Conflict(String),
    /// Unexpected internal failure; the detail stays in the logs.
    #[error("internal error")]
    Internal(String),
}

impl GatewayError {
    /// Taxonomy code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            GatewayError::InvalidCredentials => ErrorCode::AuthError,
            GatewayError::InvalidToken(_) => ErrorCode::InvalidToken,
            GatewayError::InsufficientPermissions(_) => ErrorCode::InsufficientPermissions,
            GatewayError::RateLimited => ErrorCode::RateLimited,
            GatewayError::UpstreamUnavailable(_) => ErrorCode::UpstreamUnavailable,
            GatewayError::Validation(_) => ErrorCode::ValidationError,
            GatewayError::Conflict(_) => ErrorCode::ValidationError,
            GatewayError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// HTTP status, honouring the conflict override.
    pub fn http_status(&self) -> u16 {
        match self {
            GatewayError::Conflict(_) => 409,
            other => other.code().http_status(),
        }
    }

    /// Message safe to put in the envelope. Internal details are replaced
    /// by a generic string; the source stays available for logging.
    pub fn safe_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Wrap any error as an internal failure.
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        GatewayError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_is_fixed() {
        assert_eq!(ErrorCode::AuthError.http_status(), 401);
        assert_eq!(ErrorCode::InvalidToken.http_status(), 401);
        assert_eq!(ErrorCode::InsufficientPermissions.http_status(), 403);
        assert_eq!(ErrorCode::RateLimited.http_status(), 429);
        assert_eq!(ErrorCode::UpstreamUnavailable.http_status(), 503);
        assert_eq!(ErrorCode::ValidationError.http_status(), 400);
        assert_eq!(ErrorCode::InternalError.http_status(), 500);
    }

    #[test]
    fn envelope_serializes_camel_case() {
        let env = ErrorEnvelope::new(
            ErrorCode::AuthError,
            "invalid client credentials",
            Uuid::nil(),
            Utc::now(),
        );
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["errorCode"], "AUTH_ERROR");
        assert!(json["requestId"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn conflict_overrides_status_but_keeps_code() {
        let err = GatewayError::Conflict("active rotation exists".into());
        assert_eq!(err.http_status(), 409);
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[test]
    fn internal_message_is_scrubbed() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "token=abc secret leak");
        let err = GatewayError::internal(io);
        assert_eq!(err.safe_message(), "internal error");
    }
}
