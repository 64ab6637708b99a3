//! In-process cache backend on concurrent maps.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use vaultgate_types::{Clock, ClientRecord, SystemClock};

use crate::{CachedCredentials, CachedToken, CredentialCache, TokenCache};

/// Tuning for the in-memory token cache.
#[derive(Debug, Clone, Copy)]
pub struct MemoryCacheConfig {
    /// Ceiling on any entry's TTL, regardless of token lifetime.
    pub max_entry_ttl: Duration,
    /// How often the background sweep evicts expired entries.
    pub sweep_interval: std::time::Duration,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            max_entry_ttl: Duration::hours(1),
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }
}

/// Counters exposed for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Live token entries.
    pub tokens: usize,
    /// Clients with at least one indexed token.
    pub indexed_clients: usize,
    /// Cached credential records.
    pub credentials: usize,
}

#[derive(Debug, Clone)]
struct Entry {
    token: CachedToken,
    /// Eviction instant: token expiry capped by `max_entry_ttl`.
    cache_expires_at: DateTime<Utc>,
}

/// Token cache on dashmaps with a client index and a fingerprint index.
pub struct MemoryTokenCache {
    tokens: DashMap<String, Entry>,
    by_client: DashMap<String, HashSet<String>>,
    by_fingerprint: DashMap<String, String>,
    config: MemoryCacheConfig,
    clock: Arc<dyn Clock>,
}

impl MemoryTokenCache {
    /// Cache on the system clock with default tuning.
    pub fn new() -> Self {
        Self::with_clock(MemoryCacheConfig::default(), Arc::new(SystemClock))
    }

    /// Cache with explicit tuning and clock.
    pub fn with_clock(config: MemoryCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: DashMap::new(),
            by_client: DashMap::new(),
            by_fingerprint: DashMap::new(),
            config,
            clock,
        }
    }

    /// Spawn the periodic expired-entry sweep.
    pub fn spawn_sweeper(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = cache.sweep();
                if evicted > 0 {
                    debug!(evicted, "token cache sweep");
                }
            }
        })
    }

    /// Evict every entry past its cache expiry; returns the count.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<(String, CachedToken)> = self
            .tokens
            .iter()
            .filter(|e| e.value().cache_expires_at <= now)
            .map(|e| (e.key().clone(), e.value().token.clone()))
            .collect();
        for (jti, token) in &expired {
            self.remove_entry(jti, token);
        }
        expired.len()
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            tokens: self.tokens.len(),
            indexed_clients: self.by_client.len(),
            credentials: 0,
        }
    }

    fn cache_expiry(&self, token: &CachedToken, now: DateTime<Utc>) -> DateTime<Utc> {
        token.expires_at.min(now + self.config.max_entry_ttl)
    }

    fn index(&self, token: &CachedToken) {
        self.by_client
            .entry(token.client_id.clone())
            .or_default()
            .insert(token.jti.clone());
        self.by_fingerprint
            .insert(token.fingerprint.clone(), token.jti.clone());
    }

    fn remove_entry(&self, jti: &str, token: &CachedToken) {
        self.tokens.remove(jti);
        if let Some(mut set) = self.by_client.get_mut(&token.client_id) {
            set.remove(jti);
        }
        // Only unlink the fingerprint if it still points at this token;
        // a newer mint may have re-bound it.
        self.by_fingerprint
            .remove_if(&token.fingerprint, |_, mapped| mapped == jti);
    }

    fn live_entry(&self, jti: &str) -> Option<CachedToken> {
        let now = self.clock.now();
        let entry = self.tokens.get(jti)?;
        if entry.cache_expires_at <= now {
            let token = entry.token.clone();
            drop(entry);
            self.remove_entry(jti, &token);
            return None;
        }
        Some(entry.token.clone())
    }

    fn live_tokens_for_client(&self, client_id: &str) -> Vec<CachedToken> {
        let jtis: Vec<String> = self
            .by_client
            .get(client_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        jtis.iter().filter_map(|jti| self.live_entry(jti)).collect()
    }
}

impl Default for MemoryTokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
    async fn put_if_absent(&self, token: CachedToken) -> Option<CachedToken> {
        let now = self.clock.now();
        // Drop a dead entry under the same id first so it cannot satisfy
        // the absence check.
        let _ = self.live_entry(&token.jti);

        match self.tokens.entry(token.jti.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                Some(existing.get().token.clone())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let entry = Entry {
                    cache_expires_at: self.cache_expiry(&token, now),
                    token: token.clone(),
                };
                slot.insert(entry);
                self.index(&token);
                None
            }
        }
    }

    async fn put(&self, token: CachedToken) {
        let now = self.clock.now();
        let entry = Entry {
            cache_expires_at: self.cache_expiry(&token, now),
            token: token.clone(),
        };
        self.tokens.insert(token.jti.clone(), entry);
        self.index(&token);
    }

    async fn get(&self, jti: &str) -> Option<CachedToken> {
        self.live_entry(jti)
    }

    async fn get_by_fingerprint(&self, fingerprint: &str) -> Option<CachedToken> {
        let jti = self.by_fingerprint.get(fingerprint)?.clone();
        self.live_entry(&jti)
    }

    async fn invalidate(&self, jti: &str) -> bool {
        match self.tokens.get(jti).map(|e| e.token.clone()) {
            Some(token) => {
                self.remove_entry(jti, &token);
                true
            }
            None => false,
        }
    }

    async fn invalidate_by_client(&self, client_id: &str) -> usize {
        // Snapshot the index first: every token whose insert completed
        // before this call began is in the snapshot. Tokens inserted
        // concurrently may or may not be removed (best-effort), but a
        // removed token is never re-added by this call.
        let jtis: Vec<String> = self
            .by_client
            .get(client_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        let mut removed = 0;
        for jti in jtis {
            if let Some(token) = self.tokens.get(&jti).map(|e| e.token.clone()) {
                self.remove_entry(&jti, &token);
                removed += 1;
            }
        }
        removed
    }

    async fn outstanding_for_version(&self, client_id: &str, version: &str) -> usize {
        self.live_tokens_for_client(client_id)
            .iter()
            .filter(|t| t.credential_version == version)
            .count()
    }

    async fn young_tokens_for_version(&self, client_id: &str, version: &str) -> usize {
        let now = self.clock.now();
        self.live_tokens_for_client(client_id)
            .iter()
            .filter(|t| t.credential_version == version && t.within_first_half_of_ttl(now))
            .count()
    }
}

/// Credential-metadata cache on a dashmap.
pub struct MemoryCredentialCache {
    records: DashMap<String, CachedCredentials>,
    clock: Arc<dyn Clock>,
}

impl MemoryCredentialCache {
    /// Empty cache on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty cache on an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            clock,
        }
    }
}

impl Default for MemoryCredentialCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialCache for MemoryCredentialCache {
    async fn get(&self, client_id: &str) -> Option<CachedCredentials> {
        self.records.get(client_id).map(|r| r.clone())
    }

    async fn put(&self, record: ClientRecord) {
        let cached = CachedCredentials {
            fetched_at: self.clock.now(),
            record,
        };
        self.records.insert(cached.record.client_id.clone(), cached);
    }

    async fn invalidate(&self, client_id: &str) {
        self.records.remove(client_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultgate_types::ManualClock;

    fn token(jti: &str, client: &str, version: &str, ttl_secs: i64, now: DateTime<Utc>) -> CachedToken {
        CachedToken {
            jti: jti.into(),
            raw: format!("header.body.{jti}"),
            client_id: client.into(),
            credential_version: version.into(),
            fingerprint: format!("fp-{client}-{version}"),
            issued_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
        }
    }

    fn cache_on(clock: &ManualClock) -> MemoryTokenCache {
        MemoryTokenCache::with_clock(MemoryCacheConfig::default(), Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn put_if_absent_returns_existing() {
        let clock = ManualClock::from_system();
        let cache = cache_on(&clock);
        let now = clock.now();

        let first = token("jti-1", "vendor-A", "v1", 3600, now);
        assert!(cache.put_if_absent(first.clone()).await.is_none());

        let duplicate = token("jti-1", "vendor-A", "v1", 3600, now);
        let existing = cache.put_if_absent(duplicate).await;
        assert_eq!(existing, Some(first));
    }

    #[tokio::test]
    async fn expired_entries_miss_and_are_evicted() {
        let clock = ManualClock::from_system();
        let cache = cache_on(&clock);
        let now = clock.now();

        cache.put(token("jti-1", "vendor-A", "v1", 60, now)).await;
        assert!(cache.get("jti-1").await.is_some());

        clock.advance(Duration::seconds(61));
        assert!(cache.get("jti-1").await.is_none());
        // A later put_if_absent under the same id succeeds.
        let now = clock.now();
        assert!(cache.put_if_absent(token("jti-1", "vendor-A", "v1", 60, now)).await.is_none());
    }

    #[tokio::test]
    async fn entry_ttl_is_capped() {
        let clock = ManualClock::from_system();
        let config = MemoryCacheConfig {
            max_entry_ttl: Duration::seconds(30),
            ..MemoryCacheConfig::default()
        };
        let cache = MemoryTokenCache::with_clock(config, Arc::new(clock.clone()));
        let now = clock.now();

        cache.put(token("jti-1", "vendor-A", "v1", 3600, now)).await;
        clock.advance(Duration::seconds(31));
        assert!(cache.get("jti-1").await.is_none(), "cap must bound the entry lifetime");
    }

    #[tokio::test]
    async fn invalidate_by_client_removes_all_and_only_that_client() {
        let clock = ManualClock::from_system();
        let cache = cache_on(&clock);
        let now = clock.now();

        cache.put(token("a-1", "vendor-A", "v1", 3600, now)).await;
        cache.put(token("a-2", "vendor-A", "v1", 3600, now)).await;
        cache.put(token("b-1", "vendor-B", "v1", 3600, now)).await;

        let removed = cache.invalidate_by_client("vendor-A").await;
        assert_eq!(removed, 2);
        assert!(cache.get("a-1").await.is_none());
        assert!(cache.get("a-2").await.is_none());
        assert!(cache.get("b-1").await.is_some());
    }

    #[tokio::test]
    async fn fingerprint_lookup_follows_latest_mint() {
        let clock = ManualClock::from_system();
        let cache = cache_on(&clock);
        let now = clock.now();

        let first = token("jti-1", "vendor-A", "v1", 3600, now);
        let fingerprint = first.fingerprint.clone();
        cache.put(first).await;
        assert_eq!(cache.get_by_fingerprint(&fingerprint).await.unwrap().jti, "jti-1");

        cache.put(token("jti-2", "vendor-A", "v1", 3600, now)).await;
        assert_eq!(cache.get_by_fingerprint(&fingerprint).await.unwrap().jti, "jti-2");
    }

    #[tokio::test]
    async fn version_evidence_counts() {
        let clock = ManualClock::from_system();
        let cache = cache_on(&clock);
        let now = clock.now();

        cache.put(token("a-1", "vendor-A", "v1", 3600, now)).await;
        cache.put(token("a-2", "vendor-A", "v2", 3600, now)).await;

        assert_eq!(cache.outstanding_for_version("vendor-A", "v1").await, 1);
        assert_eq!(cache.outstanding_for_version("vendor-A", "v2").await, 1);
        assert_eq!(cache.young_tokens_for_version("vendor-A", "v1").await, 1);

        // Past the half-life, the v1 token stops counting as young.
        clock.advance(Duration::seconds(1801));
        assert_eq!(cache.young_tokens_for_version("vendor-A", "v1").await, 0);
        assert_eq!(cache.outstanding_for_version("vendor-A", "v1").await, 1);

        // Past expiry, it stops counting entirely.
        clock.advance(Duration::seconds(1800));
        assert_eq!(cache.outstanding_for_version("vendor-A", "v1").await, 0);
    }

    #[tokio::test]
    async fn sweep_evicts_expired_entries() {
        let clock = ManualClock::from_system();
        let cache = cache_on(&clock);
        let now = clock.now();

        cache.put(token("a-1", "vendor-A", "v1", 60, now)).await;
        cache.put(token("a-2", "vendor-A", "v1", 3600, now)).await;
        clock.advance(Duration::seconds(120));

        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.stats().tokens, 1);
    }

    #[tokio::test]
    async fn credential_cache_freshness() {
        let clock = ManualClock::from_system();
        let cache = MemoryCredentialCache::with_clock(Arc::new(clock.clone()));
        cache
            .put(ClientRecord {
                client_id: "vendor-A".into(),
                permissions: vec!["process_payment".into()],
                versions: vec![],
            })
            .await;

        let cached = cache.get("vendor-A").await.unwrap();
        clock.advance(Duration::seconds(120));
        assert!(cached.is_fresh(clock.now(), Duration::seconds(300)));
        assert!(!cached.is_fresh(clock.now(), Duration::seconds(60)));
    }
}
