//! Business-path forwarding.
//!
//! Any path not claimed by the facade's own routes is proxied to the
//! downstream processing service with a capability token attached. Callers
//! present either a bearer token (used as-is) or, while backward
//! compatibility is enabled, the legacy credential headers, which the
//! facade exchanges for a token internally. Request bodies pass through
//! byte-for-byte so unknown fields are preserved.

use std::collections::HashMap;

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::response::Response;
use tracing::{debug, warn};

use vaultgate_types::{AuditEventType, GatewayError};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Bodies above this size are rejected rather than buffered.
const MAX_FORWARD_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Fallback handler for every business path.
pub async fn forward(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<Response> {
    let audit = state.request_audit(&headers);
    let request_id = audit.request_id();

    let token = resolve_bearer(&state, &headers, &audit)
        .await
        .map_err(|e| ApiError::new(e, request_id))?;

    let body_bytes = to_bytes(body, MAX_FORWARD_BODY_BYTES)
        .await
        .map_err(|_| {
            ApiError::new(
                GatewayError::Validation("request body too large".into()),
                request_id,
            )
        })?;

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(uri.path());
    let url = format!(
        "{}{}",
        state.config.downstream.base_url.trim_end_matches('/'),
        path_and_query
    );
    debug!(%method, url, "forwarding business request");

    let mut outbound = state
        .forward_http
        .request(method, &url)
        .bearer_auth(&token)
        .header("X-Request-ID", request_id.to_string());
    if let Some(content_type) = headers.get(CONTENT_TYPE) {
        outbound = outbound.header(CONTENT_TYPE, content_type.clone());
    }
    if !body_bytes.is_empty() {
        outbound = outbound.body(body_bytes.to_vec());
    }

    let upstream = match outbound.send().await {
        Ok(response) => response,
        Err(err) if err.is_timeout() => {
            audit
                .emit(
                    AuditEventType::OperationCancelled,
                    None,
                    None,
                    HashMap::from([("operation".to_string(), "downstream_forward".to_string())]),
                )
                .await;
            return Err(ApiError::new(
                GatewayError::UpstreamUnavailable("downstream timed out".into()),
                request_id,
            ));
        }
        Err(err) => {
            warn!(error = %err, "downstream forward failed");
            return Err(ApiError::new(
                GatewayError::UpstreamUnavailable("downstream unavailable".into()),
                request_id,
            ));
        }
    };

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    // Renewal-on-use: a refreshed token travels back on the authorization
    // header; preserve it for the caller to adopt.
    let renewed_authorization = upstream
        .headers()
        .get(AUTHORIZATION.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let payload = upstream.bytes().await.unwrap_or_default();

    let mut builder = Response::builder().status(status);
    if let Some(content_type) = content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    if let Some(authorization) = renewed_authorization {
        builder = builder.header(AUTHORIZATION, authorization);
    }
    builder
        .body(Body::from(payload))
        .map_err(|e| ApiError::new(GatewayError::internal(e), request_id))
}

/// Find or mint the bearer token for a business request.
async fn resolve_bearer(
    state: &AppState,
    headers: &HeaderMap,
    audit: &vaultgate_types::RequestAudit,
) -> Result<String, GatewayError> {
    if let Some(bearer) = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Ok(bearer.to_string());
    }

    if !state.config.backward_compatibility.enabled {
        return Err(GatewayError::InvalidToken("bearer token required".into()));
    }

    let id_header = &state.config.header_auth.client_id_header;
    let secret_header = &state.config.header_auth.client_secret_header;
    let client_id = headers.get(id_header.as_str()).and_then(|v| v.to_str().ok());
    let client_secret = headers
        .get(secret_header.as_str())
        .and_then(|v| v.to_str().ok());
    let (Some(client_id), Some(client_secret)) = (client_id, client_secret) else {
        return Err(GatewayError::InvalidToken(
            "bearer token or vendor credential headers required".into(),
        ));
    };

    let token = state
        .authenticator
        .clone()
        .authenticate(client_id, client_secret, audit)
        .await?;
    Ok(token.raw)
}
