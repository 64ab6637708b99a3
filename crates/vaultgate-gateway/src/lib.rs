#![forbid(unsafe_code)]

//! **vaultgate-gateway** – The vendor-facing security facade.
//!
//! Vendors keep their existing contract: `X-Client-ID` / `X-Client-Secret`
//! headers (or the `POST /authenticate` body). The facade authenticates
//! those credentials against the vault, mints a short-lived capability
//! token, and forwards business traffic to the downstream processing
//! service, which trusts only the tokens. The rotation admin surface and
//! the rotation controller's background reconciliation also live in this
//! process.
//!
//! ## Surfaces
//!
//! - `POST /authenticate`, `POST /tokens/validate`, `POST /tokens/refresh`
//! - `POST /rotations/initiate`, `GET /rotations/{id}`,
//!   `GET /rotations/client/{id}`, `PUT /rotations/{id}/complete`,
//!   `PUT /rotations/{id}/cancel`
//! - `GET /healthz`
//! - every other path: authenticated forward to the downstream service

pub mod authenticator;
pub mod config;
pub mod credentials;
pub mod error;
pub mod ratelimit;
pub mod routes;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;
use chrono::Duration;
use secrecy::SecretString;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use vaultgate_cache::{
    CredentialCache, MemoryCacheConfig, MemoryCredentialCache, MemoryTokenCache, TokenCache,
};
use vaultgate_rotation::{
    MemoryRotationStore, RotationController, RotationControllerConfig, RotationStore,
};
use vaultgate_store::SqliteStore;
use vaultgate_token::{TokenEngine, TokenEngineConfig, VaultKeyStore};
use vaultgate_types::{
    AuditSink, Clock, FanoutAuditSink, RequestAudit, SystemClock, TracingAuditSink,
};
use vaultgate_vault::{
    BreakerConfig, HttpVaultClient, RetryPolicy, SecretsVault, VaultClientConfig,
};

use crate::authenticator::Authenticator;
use crate::config::GatewayConfig;
use crate::credentials::CredentialResolver;
use crate::ratelimit::ClientRateLimiter;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GatewayConfig>,
    /// The facade authenticator.
    pub authenticator: Arc<Authenticator>,
    /// The rotation controller.
    pub rotations: Arc<RotationController>,
    /// Vault handle, for health reporting.
    pub vault: Arc<dyn SecretsVault>,
    /// Audit sink shared by all emitters.
    pub audit: Arc<dyn AuditSink>,
    /// Injected clock.
    pub clock: Arc<dyn Clock>,
    /// Client used to forward business traffic downstream.
    pub forward_http: reqwest::Client,
}

impl AppState {
    /// Per-request audit emitter: echoes `X-Request-ID` when present and
    /// parseable, otherwise generates one.
    pub fn request_audit(&self, headers: &HeaderMap) -> RequestAudit {
        let request_id = headers
            .get("X-Request-ID")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .unwrap_or_else(Uuid::new_v4);
        RequestAudit::new(request_id, self.audit.clone(), self.clock.clone())
    }
}

/// Assemble the router over a prepared state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/authenticate", post(routes::auth::authenticate))
        .route("/tokens/validate", post(routes::auth::validate))
        .route("/tokens/refresh", post(routes::auth::refresh))
        .route("/healthz", get(routes::health))
        .route("/rotations/initiate", post(routes::rotations::initiate))
        .route("/rotations/:rotation_id", get(routes::rotations::get_rotation))
        .route("/rotations/client/:client_id", get(routes::rotations::client_history))
        .route("/rotations/:rotation_id/complete", put(routes::rotations::complete))
        .route("/rotations/:rotation_id/cancel", put(routes::rotations::cancel))
        .fallback(routes::forward::forward)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A fully wired gateway with handles for the background tasks.
pub struct Gateway {
    /// Router state.
    pub state: AppState,
    /// Production vault client, for the identity-refresh task.
    pub vault_client: Arc<HttpVaultClient>,
    /// Token cache, for the sweep task.
    pub token_cache: Arc<MemoryTokenCache>,
}

/// Wire the production gateway from configuration.
pub async fn build(config: GatewayConfig) -> anyhow::Result<Gateway> {
    let config = Arc::new(config);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let persistence = if config.database.path.is_empty() {
        None
    } else {
        Some(
            SqliteStore::open(&config.database.path)
                .await
                .with_context(|| format!("opening database at {}", config.database.path))?,
        )
    };
    let audit: Arc<dyn AuditSink> = match &persistence {
        Some(store) => {
            let sinks: Vec<Arc<dyn AuditSink>> =
                vec![Arc::new(TracingAuditSink), Arc::new(store.clone())];
            Arc::new(FanoutAuditSink::new(sinks))
        }
        None => Arc::new(TracingAuditSink),
    };

    let mut vault_config = VaultClientConfig::new(
        config.vault.url.clone(),
        config.vault.account.clone(),
        SecretString::new(config.vault.identity.clone()),
    );
    vault_config.connect_timeout = StdDuration::from_millis(config.vault.connect_timeout_ms);
    vault_config.read_timeout = StdDuration::from_millis(config.vault.read_timeout_ms);
    vault_config.retry = RetryPolicy {
        max_attempts: config.vault.retry.count,
        base_backoff: StdDuration::from_millis(config.vault.retry.base_backoff_ms),
        backoff_multiplier: config.vault.retry.backoff_multiplier,
        jitter: 0.2,
    };
    vault_config.breaker = BreakerConfig {
        window_size: config.circuit_breaker.window_size,
        min_calls: config.circuit_breaker.window_size,
        failure_threshold: config.circuit_breaker.failure_threshold,
        open_cooldown: StdDuration::from_secs(config.circuit_breaker.open_cooldown_seconds),
    };
    let vault_client = Arc::new(HttpVaultClient::new(
        vault_config,
        clock.clone(),
        audit.clone(),
    )?);
    let vault: Arc<dyn SecretsVault> = vault_client.clone();

    let token_cache = Arc::new(MemoryTokenCache::with_clock(
        MemoryCacheConfig {
            max_entry_ttl: Duration::seconds(config.cache.max_entry_ttl_seconds),
            sweep_interval: StdDuration::from_secs(60),
        },
        clock.clone(),
    ));
    let credential_cache: Arc<dyn CredentialCache> =
        Arc::new(MemoryCredentialCache::with_clock(clock.clone()));

    let keys = Arc::new(VaultKeyStore::new(
        vault.clone(),
        Duration::seconds(300),
        clock.clone(),
    ));
    let mut engine_config =
        TokenEngineConfig::new(config.token.issuer.clone(), config.token.audience.clone());
    engine_config.default_ttl = Duration::seconds(config.token.ttl_seconds);
    engine_config.iat_skew = Duration::seconds(config.token.clock_skew_seconds);
    engine_config.exp_skew = Duration::seconds(config.token.expiry_grace_seconds);
    engine_config.renewal_threshold = Duration::seconds(config.token.renewal.threshold_seconds);
    let engine = Arc::new(TokenEngine::new(engine_config, keys, clock.clone()));

    let rotation_store: Arc<dyn RotationStore> = match &persistence {
        Some(store) => Arc::new(store.clone()),
        None => Arc::new(MemoryRotationStore::new()),
    };
    let rotations = Arc::new(RotationController::new(
        vault.clone(),
        token_cache.clone() as Arc<dyn TokenCache>,
        credential_cache.clone(),
        rotation_store,
        audit.clone(),
        clock.clone(),
        RotationControllerConfig {
            default_transition_window: Duration::seconds(config.rotation.default_transition_seconds),
            promote_hold: Duration::zero(),
            check_interval: StdDuration::from_secs(config.rotation.check_interval_seconds),
            watchdog: Duration::seconds(config.rotation.watchdog_seconds),
        },
    ));

    let resolver = CredentialResolver::new(
        vault.clone(),
        credential_cache,
        Duration::seconds(config.cache.credential_serve_seconds),
        Duration::seconds(config.cache.credential_freshness_seconds),
        clock.clone(),
    );
    let limiter = ClientRateLimiter::new(&config.rate_limit);
    let authenticator = Arc::new(Authenticator::new(
        resolver,
        engine,
        token_cache.clone() as Arc<dyn TokenCache>,
        limiter,
        persistence,
        config.token.renewal.enabled,
        clock.clone(),
    ));

    let forward_http = reqwest::Client::builder()
        .connect_timeout(StdDuration::from_millis(config.downstream.connect_timeout_ms))
        .timeout(StdDuration::from_millis(config.downstream.read_timeout_ms))
        .build()
        .context("building downstream client")?;

    let state = AppState {
        config,
        authenticator,
        rotations,
        vault,
        audit,
        clock,
        forward_http,
    };

    Ok(Gateway {
        state,
        vault_client,
        token_cache,
    })
}
