#![forbid(unsafe_code)]

//! **vaultgate-cache** – Process-shared store of minted tokens and credential
//! metadata.
//!
//! The cache is *not* a source of truth: a miss must always fall through to
//! vault lookup plus token verification. What it guarantees:
//!
//! * per-entry TTL equal to the token's remaining lifetime, capped at a
//!   configured maximum;
//! * `put_if_absent` keyed by token id, which underpins the
//!   at-most-one-mint-per-fingerprint invariant;
//! * `invalidate_by_client` that is best-effort but monotonic – a token it
//!   removed is never resurrected by the same call – and observes every
//!   write committed before it began;
//! * evidence queries the rotation controller uses to decide `retire` and
//!   `complete`.
//!
//! The contract is a pair of traits so a networked cluster backend can be
//! wired behind the same seam; the shipped backend is the in-process
//! [`MemoryTokenCache`] / [`MemoryCredentialCache`].

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use vaultgate_types::ClientRecord;

pub use memory::{CacheStats, MemoryCacheConfig, MemoryCredentialCache, MemoryTokenCache};

/// A minted token as the cache stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    /// Token identifier (`jti` claim).
    pub jti: String,
    /// Compact serialized token.
    pub raw: String,
    /// Subject client.
    pub client_id: String,
    /// Credential version the authentication matched.
    pub credential_version: String,
    /// Fingerprint of `client_id` + `credential_version` the mint was keyed on.
    pub fingerprint: String,
    /// Issuance instant.
    pub issued_at: DateTime<Utc>,
    /// Expiry instant.
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Remaining lifetime at `now`; zero when expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Whether the token is still in the first half of its lifetime.
    pub fn within_first_half_of_ttl(&self, now: DateTime<Utc>) -> bool {
        let half = (self.expires_at - self.issued_at) / 2;
        now < self.issued_at + half
    }
}

/// Credential metadata as cached by the facade, with its fetch instant so
/// callers can apply a freshness window during vault outages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCredentials {
    /// The client record as last read from the vault.
    pub record: ClientRecord,
    /// When the record was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl CachedCredentials {
    /// Whether the entry is still within `freshness` at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, freshness: Duration) -> bool {
        now - self.fetched_at <= freshness
    }
}

/// Token store seam.
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Insert unless a live entry with the same `jti` exists; returns the
    /// existing entry if there was one. The client and fingerprint indexes
    /// are updated in the same call.
    async fn put_if_absent(&self, token: CachedToken) -> Option<CachedToken>;

    /// Unconditional insert (last-write-wins by `jti`).
    async fn put(&self, token: CachedToken);

    /// Look up by token id. Expired entries answer `None`.
    async fn get(&self, jti: &str) -> Option<CachedToken>;

    /// Look up the live token minted under `fingerprint`, if any.
    async fn get_by_fingerprint(&self, fingerprint: &str) -> Option<CachedToken>;

    /// Remove one token.
    async fn invalidate(&self, jti: &str) -> bool;

    /// Remove every token whose subject is `client_id`; returns how many
    /// entries were removed.
    async fn invalidate_by_client(&self, client_id: &str) -> usize;

    /// Number of live tokens for `client_id` minted against `version`.
    async fn outstanding_for_version(&self, client_id: &str, version: &str) -> usize;

    /// Number of live tokens for `client_id` minted against `version` that
    /// are still within the first half of their TTL.
    async fn young_tokens_for_version(&self, client_id: &str, version: &str) -> usize;
}

/// Credential-metadata store seam.
#[async_trait]
pub trait CredentialCache: Send + Sync {
    /// Cached record for `client_id`, regardless of freshness.
    async fn get(&self, client_id: &str) -> Option<CachedCredentials>;

    /// Replace the cached record.
    async fn put(&self, record: ClientRecord);

    /// Drop the cached record.
    async fn invalidate(&self, client_id: &str);
}
