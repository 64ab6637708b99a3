//! Downstream service configuration.

use serde::Deserialize;

/// Top-level downstream settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Token validation policy.
    pub token: TokenSettings,
    /// Vault connection, for verification keys.
    pub vault: VaultSettings,
    /// The facade, for token renewal.
    pub gateway: GatewaySettings,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            token: TokenSettings::default(),
            vault: VaultSettings::default(),
            gateway: GatewaySettings::default(),
        }
    }
}

impl DownstreamConfig {
    /// Load from an optional file plus `VAULTGATE_DOWNSTREAM_` environment
    /// overrides.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("VAULTGATE_DOWNSTREAM").separator("__"),
            )
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
            port: 8081,
        }
    }
}

/// Token validation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenSettings {
    /// Audience this service answers to.
    pub audience: String,
    /// Issuers whose tokens are accepted.
    pub accepted_issuers: Vec<String>,
    /// Future-`iat` tolerance in seconds.
    pub clock_skew_seconds: i64,
    /// Post-expiry grace in seconds.
    pub expiry_grace_seconds: i64,
    /// Renewal-on-use policy.
    pub renewal: RenewalSettings,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            audience: "payments-internal".into(),
            accepted_issuers: vec!["vaultgate".into()],
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
    /// Whether near-expiry and freshly-expired tokens are renewed on use.
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

/// Vault connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Vault base URL.
    pub url: String,
    /// Vault account.
    pub account: String,
    /// Service identity credential.
    pub identity: String,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8200".into(),
            account: "payments".into(),
            identity: String::new(),
        }
    }
}

/// Facade connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Base URL of the facade's token endpoints.
    pub base_url: String,
    /// TCP connect timeout.
    pub connect_timeout_ms: u64,
    /// Per-request read timeout.
    pub read_timeout_ms: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            connect_timeout_ms: 2_000,
            read_timeout_ms: 5_000,
        }
    }
}
