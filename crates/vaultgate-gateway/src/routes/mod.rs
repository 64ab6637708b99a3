//! HTTP route handlers.

pub mod auth;
pub mod forward;
pub mod rotations;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::AppState;

/// Health probe payload.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    vault_healthy: bool,
}

/// Liveness / readiness probe.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        vault_healthy: state.vault.is_healthy(),
    })
}
