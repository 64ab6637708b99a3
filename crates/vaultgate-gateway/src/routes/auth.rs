//! Vendor-facing authentication and token endpoints.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vaultgate_token::ValidationOutcome;
use vaultgate_types::GatewayError;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// `POST /authenticate` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthenticateRequest {
    /// Vendor client identifier.
    pub client_id: String,
    /// Vendor client secret.
    pub client_secret: String,
}

/// Issued-token payload, shared by authenticate and refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Compact bearer token.
    pub token: String,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
    /// Always `Bearer`.
    pub token_type: &'static str,
}

/// `POST /tokens/validate` answer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    /// Whether the request carrying the token may proceed.
    pub valid: bool,
    /// Outcome code (`VALID`, `EXPIRED`, `FORBIDDEN`, …).
    pub outcome: String,
    /// Subject, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Expiry, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Extract vendor credentials from the JSON body or the legacy headers.
fn extract_credentials(
    state: &AppState,
    headers: &HeaderMap,
    body: Option<AuthenticateRequest>,
) -> Result<(String, String), GatewayError> {
    if let Some(body) = body {
        return Ok((body.client_id, body.client_secret));
    }
    let id_header = &state.config.header_auth.client_id_header;
    let secret_header = &state.config.header_auth.client_secret_header;
    let client_id = headers
        .get(id_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let client_secret = headers
        .get(secret_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    match (client_id, client_secret) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => Ok((id, secret)),
        _ => Err(GatewayError::Validation(format!(
            "credentials required: JSON body or {id_header} + {secret_header} headers"
        ))),
    }
}

/// `POST /authenticate`.
pub async fn authenticate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<AuthenticateRequest>>,
) -> ApiResult<Json<TokenResponse>> {
    let audit = state.request_audit(&headers);
    let request_id = audit.request_id();

    let (client_id, client_secret) = extract_credentials(&state, &headers, body.map(|b| b.0))
        .map_err(|e| ApiError::new(e, request_id))?;

    let token = state
        .authenticator
        .clone()
        .authenticate(&client_id, &client_secret, &audit)
        .await
        .map_err(|e| ApiError::new(e, request_id))?;

    Ok(Json(TokenResponse {
        token: token.raw,
        expires_at: token.expires_at,
        token_type: "Bearer",
    }))
}

/// Strip an optional `Bearer ` prefix from a token presented in a body.
fn strip_bearer(raw: &str) -> &str {
    raw.trim()
        .strip_prefix("Bearer ")
        .unwrap_or_else(|| raw.trim())
}

/// `POST /tokens/validate`.
pub async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<ValidateResponse>> {
    let audit = state.request_audit(&headers);
    let request_id = audit.request_id();

    let required_permission = headers
        .get("X-Required-Permission")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let outcome = state
        .authenticator
        .validate(strip_bearer(&body), required_permission.as_deref(), &audit)
        .await
        .map_err(|e| ApiError::new(e, request_id))?;

    let response = match &outcome {
        ValidationOutcome::Valid(claims) => ValidateResponse {
            valid: true,
            outcome: outcome.code().to_string(),
            subject: Some(claims.sub.clone()),
            expires_at: DateTime::from_timestamp(claims.exp.min(i64::MAX as u64) as i64, 0),
        },
        other => ValidateResponse {
            valid: false,
            outcome: other.code().to_string(),
            subject: None,
            expires_at: None,
        },
    };
    Ok(Json(response))
}

/// `POST /tokens/refresh`.
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<TokenResponse>> {
    let audit = state.request_audit(&headers);
    let request_id = audit.request_id();

    let renewed = state
        .authenticator
        .renew(strip_bearer(&body), &audit)
        .await
        .map_err(|e| ApiError::new(e, request_id))?;

    Ok(Json(TokenResponse {
        token: renewed.raw,
        expires_at: renewed.expires_at,
        token_type: "Bearer",
    }))
}
