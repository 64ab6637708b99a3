//! The facade authentication algorithm.
//!
//! Steps for `authenticate(client_id, client_secret)`:
//!
//! 1. per-client rate limit, before any vault traffic;
//! 2. resolve the client's active credential versions (cache → vault, with
//!    degraded fallback);
//! 3. constant-time comparison of the presented secret against *every*
//!    active version, so timing does not reveal which version matched;
//! 4. under a striped per-fingerprint lock: serve a live cached token for
//!    the fingerprint, or mint once, insert with `put_if_absent`, and emit
//!    `TOKEN_ISSUED`.
//!
//! A signed token is never discarded on a cancelled request: it is either
//! returned or inserted and left to invalidation.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use vaultgate_cache::{CachedToken, TokenCache};
use vaultgate_rotation::verify_client_secret;
use vaultgate_store::SqliteStore;
use vaultgate_token::{
    credential_fingerprint, KeyError, TokenEngine, TokenError, ValidationOutcome,
};
use vaultgate_types::{AuditEventType, Clock, GatewayError, RequestAudit};

use crate::credentials::CredentialResolver;
use crate::ratelimit::ClientRateLimiter;

const LOCK_STRIPES: usize = 64;

/// Facade authenticator.
pub struct Authenticator {
    resolver: CredentialResolver,
    engine: Arc<TokenEngine>,
    tokens: Arc<dyn TokenCache>,
    limiter: ClientRateLimiter,
    persistence: Option<SqliteStore>,
    renewal_enabled: bool,
    clock: Arc<dyn Clock>,
    mint_locks: Vec<Mutex<()>>,
}

impl Authenticator {
    /// Wire the authenticator over its collaborators. `persistence` is
    /// optional; without it token records are cache-only.
    pub fn new(
        resolver: CredentialResolver,
        engine: Arc<TokenEngine>,
        tokens: Arc<dyn TokenCache>,
        limiter: ClientRateLimiter,
        persistence: Option<SqliteStore>,
        renewal_enabled: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            engine,
            tokens,
            limiter,
            persistence,
            renewal_enabled,
            clock,
            mint_locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Token engine handle, shared with the validation endpoints.
    pub fn engine(&self) -> &Arc<TokenEngine> {
        &self.engine
    }

    /// Token cache handle.
    pub fn tokens(&self) -> &Arc<dyn TokenCache> {
        &self.tokens
    }

    /// Authenticate vendor credentials and return a capability token.
    pub async fn authenticate(
        self: Arc<Self>,
        client_id: &str,
        client_secret: &str,
        audit: &RequestAudit,
    ) -> Result<CachedToken, GatewayError> {
        if !self.limiter.check(client_id) {
            debug!(client_id, "rate limit exceeded");
            return Err(GatewayError::RateLimited);
        }

        let record = match self.resolver.resolve(client_id, audit).await {
            Ok(record) => record,
            Err(err) => {
                if matches!(err, GatewayError::InvalidCredentials) {
                    self.emit_auth_failure(client_id, "unknown client", audit).await;
                }
                return Err(err);
            }
        };

        // Compare against every active version; no early exit, so the
        // timing is uniform across match position and match/mismatch.
        let now = self.clock.now();
        let mut matched_version: Option<String> = None;
        for version in record.active_versions(now) {
            let ok = verify_client_secret(client_secret, &version.secret_hash);
            if ok && matched_version.is_none() {
                matched_version = Some(version.version.clone());
            }
        }
        let Some(version) = matched_version else {
            self.emit_auth_failure(client_id, "secret mismatch", audit).await;
            return Err(GatewayError::InvalidCredentials);
        };

        audit
            .emit(
                AuditEventType::AuthSuccess,
                Some(client_id),
                None,
                HashMap::from([("version".to_string(), version.clone())]),
            )
            .await;

        // The lock-check-mint-insert section runs on its own task: once a
        // token is signed it is always inserted and audited, even if the
        // inbound request is cancelled mid-way.
        let this = Arc::clone(&self);
        let audit = audit.clone();
        let client = client_id.to_string();
        let permissions = record.permissions.clone();
        let handle = tokio::spawn(async move {
            this.mint_or_reuse(&client, &version, permissions, &audit).await
        });
        match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(GatewayError::internal(join_err)),
        }
    }

    async fn mint_or_reuse(
        &self,
        client_id: &str,
        version: &str,
        permissions: Vec<String>,
        audit: &RequestAudit,
    ) -> Result<CachedToken, GatewayError> {
        let fingerprint = credential_fingerprint(client_id, version);
        let _guard = self.mint_locks[stripe_of(&fingerprint)].lock().await;

        // Another task may have minted for this fingerprint while we waited.
        if let Some(existing) = self.tokens.get_by_fingerprint(&fingerprint).await {
            if existing.expires_at > self.clock.now() {
                debug!(client_id, "serving cached token for fingerprint");
                return Ok(existing);
            }
        }

        let minted = self
            .engine
            .mint(client_id, permissions, None)
            .await
            .map_err(|err| match err {
                TokenError::Key(KeyError::Unavailable(why)) => {
                    GatewayError::UpstreamUnavailable(format!("token signing key unavailable: {why}"))
                }
                other => GatewayError::internal(other),
            })?;

        let cached = CachedToken {
            jti: minted.claims.jti.clone(),
            raw: minted.raw.clone(),
            client_id: client_id.to_string(),
            credential_version: version.to_string(),
            fingerprint: fingerprint.clone(),
            issued_at: timestamp(minted.claims.iat),
            expires_at: timestamp(minted.claims.exp),
        };
        let token = match self.tokens.put_if_absent(cached.clone()).await {
            Some(existing) => existing,
            None => cached,
        };
        self.persist_token(&token).await;

        info!(client_id, version, "token issued");
        audit
            .emit(
                AuditEventType::TokenIssued,
                Some(client_id),
                Some(&token.jti),
                HashMap::from([("version".to_string(), version.to_string())]),
            )
            .await;
        Ok(token)
    }

    /// Validate a presented token, optionally against a required capability.
    pub async fn validate(
        &self,
        raw: &str,
        required_permission: Option<&str>,
        audit: &RequestAudit,
    ) -> Result<ValidationOutcome, GatewayError> {
        let outcome = self
            .engine
            .verify(raw, required_permission)
            .await
            .map_err(|err| GatewayError::UpstreamUnavailable(err.to_string()))?;

        match &outcome {
            ValidationOutcome::Valid(claims) => {
                audit
                    .emit_simple(
                        AuditEventType::TokenValidated,
                        Some(&claims.sub),
                        Some(&claims.jti),
                    )
                    .await;
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
            }
        }
        Ok(outcome)
    }

    /// Renew a token presented as the credential.
    ///
    /// Accepts a `Valid` token, or an `Expired` one whose signature still
    /// verifies and whose expiry lies within the renewal threshold (a stale
    /// token cannot be resurrected arbitrarily late).
    pub async fn renew(
        &self,
        raw: &str,
        audit: &RequestAudit,
    ) -> Result<CachedToken, GatewayError> {
        let outcome = self
            .engine
            .verify(raw, None)
            .await
            .map_err(|err| GatewayError::UpstreamUnavailable(err.to_string()))?;

        let claims = match outcome {
            ValidationOutcome::Valid(claims) => claims,
            ValidationOutcome::Expired => {
                if !self.renewal_enabled {
                    return Err(GatewayError::InvalidToken("token expired".into()));
                }
                let view = self
                    .engine
                    .parse(raw)
                    .map_err(GatewayError::InvalidToken)?;
                let now = self.clock.now();
                let expired_for = now - timestamp(view.claims.exp);
                if expired_for > self.engine.config().renewal_threshold {
                    return Err(GatewayError::InvalidToken("token expired too long ago".into()));
                }
                view.claims
            }
            other => {
                return Err(GatewayError::InvalidToken(other.code().to_string()));
            }
        };

        let minted = self
            .engine
            .renew_from(&claims)
            .await
            .map_err(GatewayError::internal)?;

        // Inherit the credential version from the replaced token when it is
        // still cached so rotation evidence stays accurate.
        let version = self
            .tokens
            .get(&claims.jti)
            .await
            .map(|t| t.credential_version)
            .unwrap_or_else(|| "renewed".to_string());
        let fingerprint = credential_fingerprint(&claims.sub, &version);
        let cached = CachedToken {
            jti: minted.claims.jti.clone(),
            raw: minted.raw.clone(),
            client_id: claims.sub.clone(),
            credential_version: version,
            fingerprint,
            issued_at: timestamp(minted.claims.iat),
            expires_at: timestamp(minted.claims.exp),
        };
        self.tokens.put(cached.clone()).await;
        self.persist_token(&cached).await;

        audit
            .emit_simple(AuditEventType::TokenRenewed, Some(&claims.sub), Some(&cached.jti))
            .await;
        Ok(cached)
    }

    async fn emit_auth_failure(&self, client_id: &str, reason: &str, audit: &RequestAudit) {
        audit
            .emit(
                AuditEventType::AuthFailure,
                Some(client_id),
                None,
                HashMap::from([("reason".to_string(), reason.to_string())]),
            )
            .await;
    }

    async fn persist_token(&self, token: &CachedToken) {
        if let Some(store) = &self.persistence {
            // Best-effort; the issued token is already live in the cache.
            if let Err(err) = store.record_token(token).await {
                tracing::warn!(error = %err, "failed to persist token record");
            }
        }
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator").finish()
    }
}

fn stripe_of(fingerprint: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    fingerprint.hash(&mut hasher);
    (hasher.finish() as usize) % LOCK_STRIPES
}

fn timestamp(secs: u64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(secs.min(i64::MAX as u64) as i64, 0)
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MAX_UTC)
}

