//! Capability enforcement middleware.
//!
//! One middleware computes the required capability from the static path
//! table and calls the token engine exactly once per request. Renewal-on-use
//! attaches a fresh token to the response authorization header; the current
//! request proceeds on the old token.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use tracing::{debug, warn};

use vaultgate_token::{Claims, ValidationOutcome};
use vaultgate_types::{AuditEventType, ErrorCode, ErrorEnvelope, GatewayError};

use crate::AppState;

/// Seam to the facade's renewal endpoint.
#[async_trait]
pub trait TokenRenewer: Send + Sync {
    /// Exchange a token for a fresh one.
    async fn renew(&self, raw: &str) -> Result<String, GatewayError>;
}

/// Renewer calling the facade's `POST /tokens/refresh`.
pub struct GatewayRenewer {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayRenewer {
    /// Renewer against the facade at `base_url`.
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TokenRenewer for GatewayRenewer {
    async fn renew(&self, raw: &str) -> Result<String, GatewayError> {
        let url = format!("{}/tokens/refresh", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .body(raw.to_string())
            .send()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(GatewayError::InvalidToken("renewal refused".into()));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::UpstreamUnavailable(e.to_string()))?;
        body.get("token")
            .and_then(|t| t.as_str())
            .map(str::to_owned)
            .ok_or_else(|| GatewayError::UpstreamUnavailable("renewal answer malformed".into()))
    }
}

/// Capability required for a path, from the static table.
pub fn required_capability(method: &Method, path: &str) -> Option<&'static str> {
    match *method {
        Method::POST if path == "/internal/v1/payments" => Some("process_payment"),
        Method::GET if path.starts_with("/internal/v1/payments/") => Some("view_status"),
        _ => None,
    }
}

fn reject(code: ErrorCode, message: &str, request_id: uuid::Uuid) -> Response {
    let status =
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let envelope = ErrorEnvelope::new(code, message, request_id, Utc::now());
    (status, Json(envelope)).into_response()
}

/// The single admission check in front of every business handler.
pub async fn require_capability(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let audit = state.request_audit(request.headers());
    let request_id = audit.request_id();

    let capability = required_capability(request.method(), request.uri().path());

    let Some(bearer) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
    else {
        return reject(ErrorCode::InvalidToken, "bearer token required", request_id);
    };

    let outcome = match state.engine.verify(&bearer, capability).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(error = %err, "verification keys unavailable");
            return reject(
                ErrorCode::UpstreamUnavailable,
                "token verification unavailable",
                request_id,
            );
        }
    };

    let (claims, renewed_token) = match outcome {
        ValidationOutcome::Valid(claims) => {
            let renewed = maybe_renew_on_use(&state, &bearer, &claims).await;
            (claims, renewed)
        }
        ValidationOutcome::Expired => {
            // One renewal attempt for a well-formed token under a trusted
            // signature; anything else is a plain 401.
            if !state.renewal_enabled() {
                audit
                    .emit(
                        AuditEventType::TokenRejected,
                        None,
                        None,
                        HashMap::from([("outcome".to_string(), "EXPIRED".to_string())]),
                    )
                    .await;
                return reject(ErrorCode::InvalidToken, "token expired", request_id);
            }
            match state.renewer.renew(&bearer).await {
                Ok(new_raw) => match state.engine.verify(&new_raw, capability).await {
                    Ok(ValidationOutcome::Valid(claims)) => {
                        audit
                            .emit_simple(
                                AuditEventType::TokenRenewed,
                                Some(&claims.sub),
                                Some(&claims.jti),
                            )
                            .await;
                        (claims, Some(new_raw))
                    }
                    Ok(ValidationOutcome::Forbidden { missing_permission }) => {
                        return reject(
                            ErrorCode::InsufficientPermissions,
                            &format!("missing required permission: {missing_permission}"),
                            request_id,
                        );
                    }
                    _ => {
                        return reject(
                            ErrorCode::InvalidToken,
                            "token expired and renewal failed",
                            request_id,
                        )
                    }
                },
                Err(err) => {
                    debug!(error = %err, "renewal attempt for expired token failed");
                    audit
                        .emit(
                            AuditEventType::TokenRejected,
                            None,
                            None,
                            HashMap::from([("outcome".to_string(), "EXPIRED".to_string())]),
                        )
                        .await;
                    return reject(ErrorCode::InvalidToken, "token expired", request_id);
                }
            }
        }
        ValidationOutcome::Forbidden { missing_permission } => {
            audit
                .emit(
                    AuditEventType::TokenRejected,
                    None,
                    None,
                    HashMap::from([
                        ("outcome".to_string(), "FORBIDDEN".to_string()),
                        ("missing_permission".to_string(), missing_permission.clone()),
                    ]),
                )
                .await;
            return reject(
                ErrorCode::InsufficientPermissions,
                &format!("missing required permission: {missing_permission}"),
                request_id,
            );
        }
        other => {
            audit
                .emit(
                    AuditEventType::TokenRejected,
                    None,
                    None,
                    HashMap::from([("outcome".to_string(), other.code().to_string())]),
                )
                .await;
            return reject(
                ErrorCode::InvalidToken,
                &format!("token rejected: {}", other.code()),
                request_id,
            );
        }
    };

    audit
        .emit_simple(AuditEventType::TokenValidated, Some(&claims.sub), Some(&claims.jti))
        .await;
    request.extensions_mut().insert(claims);

    let mut response = next.run(request).await;
    if let Some(token) = renewed_token {
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
            response.headers_mut().insert(AUTHORIZATION, value);
        }
    }
    response
}

/// Renew a still-valid token that is close to expiry. Failures are logged
/// and ignored; the request proceeds on the presented token.
async fn maybe_renew_on_use(state: &AppState, bearer: &str, claims: &Claims) -> Option<String> {
    if !state.renewal_enabled() || !state.engine.should_renew(claims, state.clock.now()) {
        return None;
    }
    match state.renewer.renew(bearer).await {
        Ok(new_raw) => {
            let audit = state.operation_audit();
            audit
                .emit_simple(AuditEventType::TokenRenewed, Some(&claims.sub), Some(&claims.jti))
                .await;
            Some(new_raw)
        }
        Err(err) => {
            debug!(error = %err, subject = %claims.sub, "renewal-on-use failed, request proceeds");
            None
        }
    }
}
