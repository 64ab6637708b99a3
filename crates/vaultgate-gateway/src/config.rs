//! Gateway configuration.
//!
//! Settings layer a TOML file under `VAULTGATE_` environment overrides
//! (`VAULTGATE_VAULT__URL`, `VAULTGATE_RATE_LIMIT__PER_MINUTE`, …); every
//! field has a default so a bare config file is enough for local runs.

use serde::Deserialize;

/// Top-level gateway settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Vault connection.
    pub vault: VaultSettings,
    /// Token minting and validation.
    pub token: TokenSettings,
    /// Cache backend and freshness windows.
    pub cache: CacheSettings,
    /// Rotation controller cadence.
    pub rotation: RotationSettings,
    /// Circuit breaker applied to the vault upstream.
    pub circuit_breaker: BreakerSettings,
    /// Legacy header-credential acceptance.
    pub backward_compatibility: BackwardCompatibilitySettings,
    /// Names of the vendor credential headers.
    pub header_auth: HeaderAuthSettings,
    /// Per-client rate limiting.
    pub rate_limit: RateLimitSettings,
    /// Downstream processing service the facade forwards to.
    pub downstream: DownstreamSettings,
    /// Relational store.
    pub database: DatabaseSettings,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            vault: VaultSettings::default(),
            token: TokenSettings::default(),
            cache: CacheSettings::default(),
            rotation: RotationSettings::default(),
            circuit_breaker: BreakerSettings::default(),
            backward_compatibility: BackwardCompatibilitySettings::default(),
            header_auth: HeaderAuthSettings::default(),
            rate_limit: RateLimitSettings::default(),
            downstream: DownstreamSettings::default(),
            database: DatabaseSettings::default(),
        }
    }
}

impl GatewayConfig {
    /// Load from an optional file plus `VAULTGATE_` environment overrides.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("VAULTGATE").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Vault connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Vault base URL.
    pub url: String,
    /// Vault account (tenant).
    pub account: String,
    /// Service identity credential presented at login.
    pub identity: String,
    /// TCP connect timeout.
    pub connect_timeout_ms: u64,
    /// Per-request read timeout.
    pub read_timeout_ms: u64,
    /// Retry policy.
    pub retry: VaultRetrySettings,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8200".into(),
            account: "payments".into(),
            identity: String::new(),
            connect_timeout_ms: 2_000,
            read_timeout_ms: 5_000,
            retry: VaultRetrySettings::default(),
        }
    }
}

/// Vault retry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultRetrySettings {
    /// Attempts, including the first.
    pub count: u32,
    /// Backoff before the second attempt, in milliseconds.
    pub base_backoff_ms: u64,
    /// Multiplier per subsequent attempt.
    pub backoff_multiplier: f64,
}

impl Default for VaultRetrySettings {
    fn default() -> Self {
        Self {
            count: 3,
            base_backoff_ms: 100,
            backoff_multiplier: 1.5,
        }
    }
}

/// Token engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    /// `iss` on minted tokens.
    pub issuer: String,
    /// `aud` on minted tokens.
    pub audience: String,
    /// Token lifetime in seconds.
    pub ttl_seconds: i64,
    /// Symmetric clock-skew tolerance in seconds (future `iat`).
    pub clock_skew_seconds: i64,
    /// Grace after expiry in seconds.
    pub expiry_grace_seconds: i64,
    /// Renewal-on-use policy.
    pub renewal: RenewalSettings,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            issuer: "vaultgate".into(),
            audience: "payments-internal".into(),
            ttl_seconds: 3600,
            clock_skew_seconds: 60,
            expiry_grace_seconds: 30,
            renewal: RenewalSettings::default(),
        }
    }
}

/// Renewal-on-use settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenewalSettings {
    /// Whether near-expiry tokens are renewed on use.
    pub enabled: bool,
    /// Remaining lifetime under which renewal kicks in, in seconds.
    pub threshold_seconds: i64,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_seconds: 300,
        }
    }
}

/// Cache settings. Connection fields describe a networked backend wired
/// behind the cache traits; the in-process backend ignores them.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Cache host.
    pub host: String,
    /// Cache port.
    pub port: u16,
    /// Cache password.
    pub password: String,
    /// Whether the connection uses TLS.
    pub ssl: bool,
    /// Logical database index.
    pub db: u32,
    /// Connection pool floor.
    pub pool_min: u32,
    /// Connection pool ceiling.
    pub pool_max: u32,
    /// How long a cached credential is served without consulting the vault.
    pub credential_serve_seconds: i64,
    /// How old a cached credential may be and still authenticate while the
    /// vault is unavailable.
    pub credential_freshness_seconds: i64,
    /// Ceiling on token cache entry TTL in seconds.
    pub max_entry_ttl_seconds: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 6379,
            password: String::new(),
            ssl: false,
            db: 0,
            pool_min: 1,
            pool_max: 16,
            credential_serve_seconds: 60,
            credential_freshness_seconds: 300,
            max_entry_ttl_seconds: 3600,
        }
    }
}

/// Rotation controller settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    /// Default dual-validity window in seconds.
    pub default_transition_seconds: i64,
    /// Reconciliation sweep period in seconds.
    pub check_interval_seconds: u64,
    /// Watchdog ceiling on rotation duration in seconds.
    pub watchdog_seconds: i64,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            default_transition_seconds: 300,
            check_interval_seconds: 300,
            watchdog_seconds: 86_400,
        }
    }
}

/// Circuit breaker settings for the vault upstream.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Calls in the sliding window.
    pub window_size: usize,
    /// Failure ratio that trips the breaker.
    pub failure_threshold: f64,
    /// Seconds the breaker stays open before probing.
    pub open_cooldown_seconds: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            window_size: 20,
            failure_threshold: 0.5,
            open_cooldown_seconds: 30,
        }
    }
}

/// Legacy compatibility switches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackwardCompatibilitySettings {
    /// Whether header credentials are accepted on business paths.
    pub enabled: bool,
}

impl Default for BackwardCompatibilitySettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Names of the vendor credential headers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeaderAuthSettings {
    /// Client identifier header.
    pub client_id_header: String,
    /// Client secret header.
    pub client_secret_header: String,
}

impl Default for HeaderAuthSettings {
    fn default() -> Self {
        Self {
            client_id_header: "X-Client-ID".into(),
            client_secret_header: "X-Client-Secret".into(),
        }
    }
}

/// Per-client rate limiting settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Sustained requests per minute per client.
    pub per_minute: u32,
    /// Burst capacity per client.
    pub burst: u32,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            per_minute: 60,
            burst: 10,
        }
    }
}

/// Downstream processing service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownstreamSettings {
    /// Base URL requests are forwarded to.
    pub base_url: String,
    /// TCP connect timeout.
    pub connect_timeout_ms: u64,
    /// Per-request read timeout; also the default outbound deadline.
    pub read_timeout_ms: u64,
}

impl Default for DownstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".into(),
            connect_timeout_ms: 2_000,
            read_timeout_ms: 10_000,
        }
    }
}

/// Relational store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// SQLite database path; empty disables persistence.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "data/vaultgate.db".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_contract() {
        let config = GatewayConfig::default();
        assert_eq!(config.token.ttl_seconds, 3600);
        assert_eq!(config.token.clock_skew_seconds, 60);
        assert_eq!(config.token.expiry_grace_seconds, 30);
        assert_eq!(config.rotation.default_transition_seconds, 300);
        assert_eq!(config.rotation.check_interval_seconds, 300);
        assert_eq!(config.circuit_breaker.window_size, 20);
        assert_eq!(config.circuit_breaker.open_cooldown_seconds, 30);
        assert_eq!(config.header_auth.client_id_header, "X-Client-ID");
        assert_eq!(config.cache.credential_freshness_seconds, 300);
    }
}
