#![forbid(unsafe_code)]

//! **vaultgate-vault** – Authenticated access to the centralized secrets vault.
//!
//! The vault is an external collaborator; this crate specifies the narrow
//! interface the trust plane needs ([`SecretsVault`]) and provides:
//!
//! * [`HttpVaultClient`] – the production client over the vault's REST
//!   key/value surface, with certificate-bound service identity that is
//!   acquired on startup and refreshed before expiry.
//! * [`RetryPolicy`] / [`retry::execute`] – exponential backoff with jitter
//!   around every call.
//! * [`CircuitBreaker`] – trips on a failure-rate window, probes half-open
//!   after a cool-down, and lets callers fail fast while the vault is down.
//! * [`MemoryVault`] – an in-memory implementation for tests and local
//!   development, with failure injection.
//!
//! Logical secret paths used by the platform are defined in [`paths`].

pub mod breaker;
pub mod client;
pub mod memory;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use breaker::{BreakerConfig, BreakerState, CircuitBreaker};
pub use client::{HttpVaultClient, VaultClientConfig};
pub use memory::MemoryVault;
pub use retry::RetryPolicy;

/// Outcome of a failed vault operation.
///
/// `NotFound` is a definitive answer and is never retried; `Unavailable`
/// covers transport failures, timeouts, 5xx answers, and an open breaker.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The path (or version) does not exist.
    #[error("secret not found: {0}")]
    NotFound(String),
    /// The vault could not be reached or answered with a server error.
    #[error("vault unavailable: {0}")]
    Unavailable(String),
    /// The vault rejected our service identity.
    #[error("vault denied access: {0}")]
    Denied(String),
}

impl VaultError {
    /// Whether a retry can possibly help.
    pub fn is_transient(&self) -> bool {
        matches!(self, VaultError::Unavailable(_))
    }
}

/// Crate result alias.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Metadata for one stored version of a secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretVersion {
    /// Version tag, ordered oldest to newest in listings.
    pub version: String,
    /// Whether the version is enabled for reads.
    pub enabled: bool,
    /// When the version was written.
    pub created_at: DateTime<Utc>,
}

/// Narrow interface to the vault's authenticated key/value surface.
///
/// All operations are idempotent by vault semantics except [`put_secret`],
/// which creates a new version on every call.
///
/// [`put_secret`]: SecretsVault::put_secret
#[async_trait]
pub trait SecretsVault: Send + Sync {
    /// Read the current (newest enabled) value at `path`.
    async fn get_secret(&self, path: &str) -> Result<Vec<u8>>;

    /// Read one specific version at `path`, enabled or not.
    async fn get_secret_version(&self, path: &str, version: &str) -> Result<Vec<u8>>;

    /// Write a new version at `path`, returning its version tag.
    async fn put_secret(&self, path: &str, value: &[u8]) -> Result<String>;

    /// List all versions at `path`, oldest first.
    async fn list_versions(&self, path: &str) -> Result<Vec<SecretVersion>>;

    /// Enable or disable one version. A disabled version stays present and
    /// listable but is no longer served by [`get_secret`].
    ///
    /// [`get_secret`]: SecretsVault::get_secret
    async fn set_version_state(&self, path: &str, version: &str, enabled: bool) -> Result<()>;

    /// Remove one version permanently.
    async fn delete_version(&self, path: &str, version: &str) -> Result<()>;

    /// Cheap health probe; `false` while degraded or the breaker is open.
    fn is_healthy(&self) -> bool;
}

/// Logical vault paths used by the trust plane.
pub mod paths {
    /// Current credential record for a client.
    pub fn credentials_current(client_id: &str) -> String {
        format!("credentials/{client_id}/current")
    }

    /// Pending (incoming) credential version during a rotation.
    pub fn credentials_pending(client_id: &str) -> String {
        format!("credentials/{client_id}/pending")
    }

    /// Persisted rotation-state document for a client.
    pub fn rotation_state(client_id: &str) -> String {
        format!("credentials/{client_id}/rotation-state")
    }

    /// Symmetric token signing key.
    pub const TOKEN_SIGNING_KEY: &str = "tokens/signing-key";

    /// Verification key (same material for the symmetric scheme, kept as a
    /// distinct path so an asymmetric scheme can split them).
    pub const TOKEN_VERIFICATION_KEY: &str = "tokens/verification-key";
}
