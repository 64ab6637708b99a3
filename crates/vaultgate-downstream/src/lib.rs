#![forbid(unsafe_code)]

//! **vaultgate-downstream** – The internal payment-processing service.
//!
//! Trusts capability tokens only: every business request passes through one
//! admission middleware that resolves the required capability from a static
//! path table and asks the token engine once. Near-expiry tokens are
//! renewed on use, with the fresh token attached to the response
//! authorization header for the caller to adopt.

pub mod auth;
pub mod config;
pub mod routes;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use axum::http::HeaderMap;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use chrono::Duration;
use secrecy::SecretString;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use vaultgate_token::{TokenEngine, TokenEngineConfig, VaultKeyStore};
use vaultgate_types::{AuditSink, Clock, RequestAudit, SystemClock, TracingAuditSink};
use vaultgate_vault::{HttpVaultClient, SecretsVault, VaultClientConfig};

use crate::auth::{GatewayRenewer, TokenRenewer};
use crate::config::DownstreamConfig;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<DownstreamConfig>,
    /// Verify-side token engine.
    pub engine: Arc<TokenEngine>,
    /// Renewal seam to the facade.
    pub renewer: Arc<dyn TokenRenewer>,
    /// Audit sink.
    pub audit: Arc<dyn AuditSink>,
    /// Injected clock.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Whether renewal-on-use is switched on.
    pub fn renewal_enabled(&self) -> bool {
        self.config.token.renewal.enabled
    }

    /// Per-request audit emitter.
    pub fn request_audit(&self, headers: &HeaderMap) -> RequestAudit {
        let request_id = headers
            .get("X-Request-ID")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .unwrap_or_else(Uuid::new_v4);
        RequestAudit::new(request_id, self.audit.clone(), self.clock.clone())
    }

    /// Audit emitter for work not bound to an inbound request.
    pub fn operation_audit(&self) -> RequestAudit {
        RequestAudit::new(Uuid::new_v4(), self.audit.clone(), self.clock.clone())
    }
}

/// Assemble the router over a prepared state.
pub fn build_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/internal/v1/payments", post(routes::create_payment))
        .route("/internal/v1/payments/:payment_id", get(routes::get_payment))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_capability,
        ));

    Router::new()
        .merge(guarded)
        .route("/internal/v1/tokens/validate", post(routes::validate))
        .route("/internal/v1/tokens/renew", post(routes::renew))
        .route("/healthz", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wire the production service from configuration.
pub async fn build(config: DownstreamConfig) -> anyhow::Result<(AppState, Arc<HttpVaultClient>)> {
    let config = Arc::new(config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

    let vault_config = VaultClientConfig::new(
        config.vault.url.clone(),
        config.vault.account.clone(),
        SecretString::new(config.vault.identity.clone()),
    );
    let vault_client = Arc::new(HttpVaultClient::new(
        vault_config,
        clock.clone(),
        audit.clone(),
    )?);
    let vault: Arc<dyn SecretsVault> = vault_client.clone();

    let keys = Arc::new(VaultKeyStore::new(vault, Duration::seconds(300), clock.clone()));
    let mut engine_config = TokenEngineConfig::new(
        config
            .token
            .accepted_issuers
            .first()
            .cloned()
            .unwrap_or_else(|| "vaultgate".into()),
        config.token.audience.clone(),
    );
    engine_config.accepted_issuers = config.token.accepted_issuers.clone();
    engine_config.iat_skew = Duration::seconds(config.token.clock_skew_seconds);
    engine_config.exp_skew = Duration::seconds(config.token.expiry_grace_seconds);
    engine_config.renewal_threshold = Duration::seconds(config.token.renewal.threshold_seconds);
    let engine = Arc::new(TokenEngine::new(engine_config, keys, clock.clone()));

    let http = reqwest::Client::builder()
        .connect_timeout(StdDuration::from_millis(config.gateway.connect_timeout_ms))
        .timeout(StdDuration::from_millis(config.gateway.read_timeout_ms))
        .build()
        .context("building facade client")?;
    let renewer: Arc<dyn TokenRenewer> =
        Arc::new(GatewayRenewer::new(http, config.gateway.base_url.clone()));

    Ok((
        AppState {
            config,
            engine,
            renewer,
            audit,
            clock,
        },
        vault_client,
    ))
}
