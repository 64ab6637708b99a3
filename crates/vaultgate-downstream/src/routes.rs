//! Business and token endpoints.
//!
//! Payment handlers return synthetic status: actual processing is another
//! system's job, this service is the trust boundary in front of it.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vaultgate_token::{Claims, ValidationOutcome};
use vaultgate_types::{ErrorCode, ErrorEnvelope};

use crate::AppState;

/// `POST /internal/v1/payments` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PaymentRequest {
    /// Amount in minor units.
    pub amount: i64,
    /// ISO currency code.
    pub currency: String,
    /// Caller reference.
    #[serde(default)]
    pub reference: Option<String>,
}

/// Synthetic payment record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    /// Assigned payment identifier.
    pub payment_id: Uuid,
    /// Synthetic processing status.
    pub status: &'static str,
    /// Subject the payment was accepted for.
    pub client_id: String,
    /// When the service handled the request.
    pub processed_at: DateTime<Utc>,
}

/// `POST /internal/v1/payments`.
pub async fn create_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(_request): Json<PaymentRequest>,
) -> (StatusCode, Json<PaymentResponse>) {
    let response = PaymentResponse {
        payment_id: Uuid::new_v4(),
        status: "ACCEPTED",
        client_id: claims.sub,
        processed_at: state.clock.now(),
    };
    (StatusCode::CREATED, Json(response))
}

/// `GET /internal/v1/payments/{paymentId}`.
pub async fn get_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(payment_id): Path<Uuid>,
) -> Json<PaymentResponse> {
    Json(PaymentResponse {
        payment_id,
        status: "SETTLED",
        client_id: claims.sub,
        processed_at: state.clock.now(),
    })
}

/// `POST /internal/v1/tokens/validate` answer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    /// Whether the token admits the caller.
    pub valid: bool,
    /// Outcome code.
    pub outcome: String,
    /// Subject, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

/// `POST /internal/v1/tokens/validate`.
pub async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<ValidateResponse>, (StatusCode, Json<ErrorEnvelope>)> {
    let audit = state.request_audit(&headers);
    let required = headers
        .get("X-Required-Permission")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let raw = body.trim().strip_prefix("Bearer ").unwrap_or(body.trim());

    let outcome = state
        .engine
        .verify(raw, required.as_deref())
        .await
        .map_err(|_| {
            let envelope = ErrorEnvelope::new(
                ErrorCode::UpstreamUnavailable,
                "token verification unavailable",
                audit.request_id(),
                Utc::now(),
            );
            (StatusCode::SERVICE_UNAVAILABLE, Json(envelope))
        })?;

    let response = match &outcome {
        ValidationOutcome::Valid(claims) => ValidateResponse {
            valid: true,
            outcome: outcome.code().to_string(),
            subject: Some(claims.sub.clone()),
        },
        other => ValidateResponse {
            valid: false,
            outcome: other.code().to_string(),
            subject: None,
        },
    };
    Ok(Json(response))
}

/// Renewed-token answer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewResponse {
    /// Fresh bearer token.
    pub token: String,
    /// Always `Bearer`.
    pub token_type: &'static str,
}

/// `POST /internal/v1/tokens/renew` – delegates to the facade, which owns
/// minting.
pub async fn renew(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<RenewResponse>, (StatusCode, Json<ErrorEnvelope>)> {
    let audit = state.request_audit(&headers);
    let raw = body.trim().strip_prefix("Bearer ").unwrap_or(body.trim());

    match state.renewer.renew(raw).await {
        Ok(token) => Ok(Json(RenewResponse {
            token,
            token_type: "Bearer",
        })),
        Err(err) => {
            let code = err.code();
            let status = StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let envelope =
                ErrorEnvelope::new(code, err.safe_message(), audit.request_id(), Utc::now());
            Err((status, Json(envelope)))
        }
    }
}

/// Health probe payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// `GET /healthz`.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
