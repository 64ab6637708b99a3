//! HTTP client for the vault's REST key/value surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vaultgate_types::{AuditEventType, AuditSink, Clock, RequestAudit};

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::retry::{self, RetryPolicy};
use crate::{Result, SecretVersion, SecretsVault, VaultError};

/// Connection settings for [`HttpVaultClient`].
#[derive(Debug, Clone)]
pub struct VaultClientConfig {
    /// Base URL of the vault, e.g. `https://vault.internal:8200`.
    pub url: String,
    /// Vault account (tenant) the service belongs to.
    pub account: String,
    /// Service identity credential presented at login.
    pub identity: SecretString,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Per-request read timeout.
    pub read_timeout: Duration,
    /// Retry policy wrapped around every call.
    pub retry: RetryPolicy,
    /// Circuit breaker configuration.
    pub breaker: BreakerConfig,
    /// Fraction of the identity TTL after which a refresh is attempted.
    pub identity_refresh_threshold: f64,
}

impl VaultClientConfig {
    /// Reasonable defaults for everything but the connection identity.
    pub fn new(url: impl Into<String>, account: impl Into<String>, identity: SecretString) -> Self {
        Self {
            url: url.into(),
            account: account.into(),
            identity,
            connect_timeout: Duration::from_millis(2_000),
            read_timeout: Duration::from_millis(5_000),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            identity_refresh_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone)]
struct Session {
    token: SecretString,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Session {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    fn needs_refresh(&self, now: DateTime<Utc>, threshold: f64) -> bool {
        let lifetime = (self.expires_at - self.acquired_at).num_milliseconds() as f64;
        let elapsed = (now - self.acquired_at).num_milliseconds() as f64;
        lifetime > 0.0 && elapsed / lifetime >= threshold
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    account: &'a str,
    identity: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
    ttl_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct SecretResponse {
    data: String,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    version: String,
}

#[derive(Debug, Deserialize)]
struct VersionsResponse {
    versions: Vec<SecretVersion>,
}

/// Production vault client.
///
/// Wraps every operation in the retry policy and the circuit breaker. The
/// service identity is acquired lazily on first use and refreshed before
/// expiry by [`spawn_identity_refresh`]; a refresh failure leaves in-flight
/// requests on the current identity until it expires, after which the
/// client reports unhealthy and emits `VAULT_IDENTITY_EXPIRED`.
///
/// [`spawn_identity_refresh`]: HttpVaultClient::spawn_identity_refresh
pub struct HttpVaultClient {
    config: VaultClientConfig,
    http: reqwest::Client,
    session: Arc<RwLock<Option<Session>>>,
    breaker: CircuitBreaker,
    degraded: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl HttpVaultClient {
    /// Build a client; no network traffic happens until the first call.
    pub fn new(
        config: VaultClientConfig,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            .build()?;
        let breaker = CircuitBreaker::new("vault", config.breaker, clock.clone());
        Ok(Self {
            config,
            http,
            session: Arc::new(RwLock::new(None)),
            breaker,
            degraded: Arc::new(AtomicBool::new(false)),
            clock,
            audit,
        })
    }

    /// Breaker handle, for callers that decide on cache fallback.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Whether the service identity has expired without a successful refresh.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Authenticate against the vault, replacing the current session.
    pub async fn login(&self) -> Result<()> {
        let url = format!("{}/v1/auth/login", self.config.url);
        let body = LoginRequest {
            account: &self.config.account,
            identity: self.config.identity.expose_secret(),
        };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VaultError::Unavailable(e.to_string()))?;

        match response.status() {
            s if s.is_success() => {
                let login: LoginResponse = response
                    .json()
                    .await
                    .map_err(|e| VaultError::Unavailable(e.to_string()))?;
                let now = self.clock.now();
                let session = Session {
                    token: SecretString::new(login.token),
                    acquired_at: now,
                    expires_at: now + chrono::Duration::seconds(login.ttl_seconds as i64),
                };
                info!(ttl_seconds = login.ttl_seconds, "vault identity acquired");
                *self.session.write().await = Some(session);
                self.degraded.store(false, Ordering::SeqCst);
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(VaultError::Denied("identity rejected at login".into()))
            }
            s => Err(VaultError::Unavailable(format!("login failed with status {s}"))),
        }
    }

    /// Spawn the background identity-refresh task.
    pub fn spawn_identity_refresh(self: Arc<Self>, check_interval: Duration) -> tokio::task::JoinHandle<()> {
        let client = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                client.refresh_identity_if_needed().await;
            }
        })
    }

    async fn refresh_identity_if_needed(&self) {
        let now = self.clock.now();
        let snapshot = self.session.read().await.clone();
        let Some(session) = snapshot else { return };

        if session.needs_refresh(now, self.config.identity_refresh_threshold) {
            if let Err(err) = self.login().await {
                // In-flight requests continue on the current identity until
                // it expires; only then do we degrade.
                if session.is_expired(self.clock.now()) {
                    self.mark_identity_expired(&err).await;
                } else {
                    warn!(error = %err, "vault identity refresh failed, current identity still valid");
                }
            }
        }
    }

    async fn mark_identity_expired(&self, err: &VaultError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            error!(error = %err, "vault identity expired without successful refresh");
            let audit = RequestAudit::new(Uuid::new_v4(), self.audit.clone(), self.clock.clone());
            audit
                .emit_simple(AuditEventType::VaultIdentityExpired, None, None)
                .await;
        }
    }

    async fn session_token(&self) -> Result<SecretString> {
        let now = self.clock.now();
        {
            let guard = self.session.read().await;
            if let Some(session) = guard.as_ref() {
                if !session.is_expired(now) {
                    return Ok(session.token.clone());
                }
            }
        }
        // No session or expired: authenticate inline.
        match self.login().await {
            Ok(()) => {
                let guard = self.session.read().await;
                guard
                    .as_ref()
                    .map(|s| s.token.clone())
                    .ok_or_else(|| VaultError::Unavailable("no session after login".into()))
            }
            Err(err) => {
                let had_session = self.session.read().await.is_some();
                if had_session {
                    self.mark_identity_expired(&err).await;
                }
                Err(err)
            }
        }
    }

    /// Run one HTTP call under breaker + retry, recording outcomes.
    async fn guarded<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if !self.breaker.allow() {
            debug!("vault breaker open, failing fast");
            return Err(VaultError::Unavailable("circuit breaker open".into()));
        }
        let mut operation = operation;
        let result = retry::execute(&self.config.retry, || operation()).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(err) if err.is_transient() => self.breaker.record_failure(),
            // Definitive answers (NotFound, Denied) mean the vault is up.
            Err(_) => self.breaker.record_success(),
        }
        result
    }

    fn classify(status: StatusCode, path: &str) -> VaultError {
        match status {
            StatusCode::NOT_FOUND => VaultError::NotFound(path.to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                VaultError::Denied(format!("status {status}"))
            }
            s => VaultError::Unavailable(format!("status {s}")),
        }
    }

    async fn send_authed(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.session_token().await?;
        request
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|e| VaultError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl SecretsVault for HttpVaultClient {
    async fn get_secret(&self, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/secrets/{}", self.config.url, path);
        self.guarded(|| {
            let url = url.clone();
            let path = path.to_string();
            async move {
                let response = self.send_authed(self.http.get(&url)).await?;
                if !response.status().is_success() {
                    return Err(Self::classify(response.status(), &path));
                }
                let body: SecretResponse = response
                    .json()
                    .await
                    .map_err(|e| VaultError::Unavailable(e.to_string()))?;
                BASE64
                    .decode(body.data.as_bytes())
                    .map_err(|e| VaultError::Unavailable(format!("undecodable secret payload: {e}")))
            }
        })
        .await
    }

    async fn get_secret_version(&self, path: &str, version: &str) -> Result<Vec<u8>> {
        let url = format!("{}/v1/secrets/{}/versions/{}/data", self.config.url, path, version);
        self.guarded(|| {
            let url = url.clone();
            let path = path.to_string();
            async move {
                let response = self.send_authed(self.http.get(&url)).await?;
                if !response.status().is_success() {
                    return Err(Self::classify(response.status(), &path));
                }
                let body: SecretResponse = response
                    .json()
                    .await
                    .map_err(|e| VaultError::Unavailable(e.to_string()))?;
                BASE64
                    .decode(body.data.as_bytes())
                    .map_err(|e| VaultError::Unavailable(format!("undecodable secret payload: {e}")))
            }
        })
        .await
    }

    async fn put_secret(&self, path: &str, value: &[u8]) -> Result<String> {
        let url = format!("{}/v1/secrets/{}", self.config.url, path);
        let encoded = BASE64.encode(value);
        self.guarded(|| {
            let url = url.clone();
            let path = path.to_string();
            let body = serde_json::json!({ "data": encoded.as_str() });
            async move {
                let response = self.send_authed(self.http.post(&url).json(&body)).await?;
                if !response.status().is_success() {
                    return Err(Self::classify(response.status(), &path));
                }
                let body: PutResponse = response
                    .json()
                    .await
                    .map_err(|e| VaultError::Unavailable(e.to_string()))?;
                Ok(body.version)
            }
        })
        .await
    }

    async fn list_versions(&self, path: &str) -> Result<Vec<SecretVersion>> {
        let url = format!("{}/v1/secrets/{}/versions", self.config.url, path);
        self.guarded(|| {
            let url = url.clone();
            let path = path.to_string();
            async move {
                let response = self.send_authed(self.http.get(&url)).await?;
                if !response.status().is_success() {
                    return Err(Self::classify(response.status(), &path));
                }
                let body: VersionsResponse = response
                    .json()
                    .await
                    .map_err(|e| VaultError::Unavailable(e.to_string()))?;
                Ok(body.versions)
            }
        })
        .await
    }

    async fn set_version_state(&self, path: &str, version: &str, enabled: bool) -> Result<()> {
        let url = format!("{}/v1/secrets/{}/versions/{}", self.config.url, path, version);
        self.guarded(|| {
            let url = url.clone();
            let path = path.to_string();
            let body = serde_json::json!({ "enabled": enabled });
            async move {
                let response = self.send_authed(self.http.put(&url).json(&body)).await?;
                if !response.status().is_success() {
                    return Err(Self::classify(response.status(), &path));
                }
                Ok(())
            }
        })
        .await
    }

    async fn delete_version(&self, path: &str, version: &str) -> Result<()> {
        let url = format!("{}/v1/secrets/{}/versions/{}", self.config.url, path, version);
        self.guarded(|| {
            let url = url.clone();
            let path = path.to_string();
            async move {
                let response = self.send_authed(self.http.delete(&url)).await?;
                if !response.status().is_success() {
                    return Err(Self::classify(response.status(), &path));
                }
                Ok(())
            }
        })
        .await
    }

    fn is_healthy(&self) -> bool {
        !self.is_degraded() && self.breaker.state() == crate::BreakerState::Closed
    }
}

impl std::fmt::Debug for HttpVaultClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpVaultClient")
            .field("url", &self.config.url)
            .field("account", &self.config.account)
            .field("identity", &"<redacted>")
            .field("degraded", &self.is_degraded())
            .finish()
    }
}
