//! Rotation admin surface.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vaultgate_rotation::RotationError;
use vaultgate_types::{GatewayError, RotationRecord};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// `POST /rotations/initiate` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InitiateRequest {
    /// Client whose secret should rotate.
    pub client_id: String,
    /// Operator-supplied reason.
    pub reason: String,
    /// Dual-validity window; defaults to the configured window.
    pub transition_period_seconds: Option<i64>,
    /// Supersede an active rotation.
    #[serde(default)]
    pub forced: bool,
}

/// Wire view of a rotation record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationView {
    /// Rotation identifier.
    pub rotation_id: Uuid,
    /// Client the rotation belongs to.
    pub client_id: String,
    /// Current state (`INITIATED`, …).
    pub state: String,
    /// Outgoing version.
    pub old_version: String,
    /// Incoming version.
    pub new_version: String,
    /// Start instant.
    pub started_at: DateTime<Utc>,
    /// Completion instant, when terminal-successful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Configured dual-validity window in seconds.
    pub transition_period_seconds: i64,
    /// Operator reason.
    pub reason: String,
    /// Whether this rotation superseded another.
    pub forced: bool,
    /// Progress / failure message.
    pub message: String,
    /// Rotation that superseded this one, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<Uuid>,
}

impl From<RotationRecord> for RotationView {
    fn from(record: RotationRecord) -> Self {
        Self {
            rotation_id: record.rotation_id,
            client_id: record.client_id,
            state: record.state.to_string(),
            old_version: record.old_version,
            new_version: record.new_version,
            started_at: record.started_at,
            completed_at: record.completed_at,
            transition_period_seconds: record.transition_window.num_seconds(),
            reason: record.reason,
            forced: record.forced,
            message: record.message,
            superseded_by: record.superseded_by,
        }
    }
}

/// `POST /rotations/initiate` answer: the record plus the new secret, which
/// appears here exactly once for out-of-band delivery to the vendor.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateResponse {
    /// The created record.
    #[serde(flatten)]
    pub rotation: RotationView,
    /// Plaintext of the new secret. Never persisted.
    pub new_secret: String,
}

/// `PUT /rotations/{id}/cancel` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CancelRequest {
    /// Why the rotation is being aborted.
    pub reason: String,
}

fn map_rotation_error(err: RotationError) -> GatewayError {
    match err {
        RotationError::ActiveRotationExists(id) => {
            GatewayError::Conflict(format!("active rotation {id} exists for this client"))
        }
        RotationError::NotFound(id) => GatewayError::Validation(format!("rotation {id} not found")),
        RotationError::UnknownClient(client) => {
            GatewayError::Validation(format!("unknown client {client}"))
        }
        RotationError::InvalidTransition { from, to } => {
            GatewayError::Conflict(format!("cannot transition from {from} to {to}"))
        }
        RotationError::PreconditionFailed(why) => GatewayError::Conflict(why),
        RotationError::Vault(err) => GatewayError::UpstreamUnavailable(err.to_string()),
        other => GatewayError::internal(other),
    }
}

/// `POST /rotations/initiate`.
pub async fn initiate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<InitiateRequest>,
) -> ApiResult<Json<InitiateResponse>> {
    let audit = state.request_audit(&headers);
    let request_id = audit.request_id();

    let window = request.transition_period_seconds.map(Duration::seconds);
    let outcome = state
        .rotations
        .initiate(&request.client_id, &request.reason, window, request.forced)
        .await
        .map_err(|e| ApiError::new(map_rotation_error(e), request_id))?;

    Ok(Json(InitiateResponse {
        rotation: outcome.record.into(),
        new_secret: outcome.new_secret.expose_secret().clone(),
    }))
}

/// `GET /rotations/{rotationId}`.
pub async fn get_rotation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(rotation_id): Path<Uuid>,
) -> ApiResult<Json<RotationView>> {
    let audit = state.request_audit(&headers);
    let request_id = audit.request_id();

    let record = state
        .rotations
        .store()
        .get(rotation_id)
        .await
        .map_err(|e| ApiError::new(map_rotation_error(e), request_id))?
        .ok_or_else(|| {
            ApiError::new(
                GatewayError::Validation(format!("rotation {rotation_id} not found")),
                request_id,
            )
        })?;
    Ok(Json(record.into()))
}

/// `GET /rotations/client/{clientId}`.
pub async fn client_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> ApiResult<Json<Vec<RotationView>>> {
    let audit = state.request_audit(&headers);
    let request_id = audit.request_id();

    let history = state
        .rotations
        .store()
        .history_for_client(&client_id)
        .await
        .map_err(|e| ApiError::new(map_rotation_error(e), request_id))?;
    Ok(Json(history.into_iter().map(RotationView::from).collect()))
}

/// `PUT /rotations/{rotationId}/complete`.
pub async fn complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(rotation_id): Path<Uuid>,
) -> ApiResult<Json<RotationView>> {
    let audit = state.request_audit(&headers);
    let request_id = audit.request_id();

    let record = state
        .rotations
        .complete(rotation_id)
        .await
        .map_err(|e| ApiError::new(map_rotation_error(e), request_id))?;
    Ok(Json(record.into()))
}

/// `PUT /rotations/{rotationId}/cancel`.
pub async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(rotation_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Json<RotationView>> {
    let audit = state.request_audit(&headers);
    let request_id = audit.request_id();

    let record = state
        .rotations
        .cancel(rotation_id, &request.reason)
        .await
        .map_err(|e| ApiError::new(map_rotation_error(e), request_id))?;
    Ok(Json(record.into()))
}
