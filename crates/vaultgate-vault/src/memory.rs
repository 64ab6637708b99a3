//! In-memory vault for tests and local development.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use vaultgate_types::{Clock, SystemClock};

use crate::{Result, SecretVersion, SecretsVault, VaultError};

#[derive(Debug, Clone)]
struct StoredVersion {
    meta: SecretVersion,
    data: Vec<u8>,
}

/// Versioned in-memory secret store with failure injection.
///
/// Semantics mirror the HTTP client: `get_secret` serves the newest enabled
/// version, `put_secret` appends a `v{n}` version, disabled versions stay
/// present and listable.
pub struct MemoryVault {
    secrets: DashMap<String, Vec<StoredVersion>>,
    unavailable: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl MemoryVault {
    /// Empty vault on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty vault on an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            secrets: DashMap::new(),
            unavailable: AtomicBool::new(false),
            clock,
        }
    }

    /// Toggle failure injection: while set, every operation answers
    /// `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(VaultError::Unavailable("injected outage".into()))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryVault {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretsVault for MemoryVault {
    async fn get_secret(&self, path: &str) -> Result<Vec<u8>> {
        self.check_available()?;
        let versions = self
            .secrets
            .get(path)
            .ok_or_else(|| VaultError::NotFound(path.to_string()))?;
        versions
            .iter()
            .rev()
            .find(|v| v.meta.enabled)
            .map(|v| v.data.clone())
            .ok_or_else(|| VaultError::NotFound(path.to_string()))
    }

    async fn get_secret_version(&self, path: &str, version: &str) -> Result<Vec<u8>> {
        self.check_available()?;
        let versions = self
            .secrets
            .get(path)
            .ok_or_else(|| VaultError::NotFound(path.to_string()))?;
        versions
            .iter()
            .find(|v| v.meta.version == version)
            .map(|v| v.data.clone())
            .ok_or_else(|| VaultError::NotFound(format!("{path}@{version}")))
    }

    async fn put_secret(&self, path: &str, value: &[u8]) -> Result<String> {
        self.check_available()?;
        let mut entry = self.secrets.entry(path.to_string()).or_default();
        let version = format!("v{}", entry.len() + 1);
        entry.push(StoredVersion {
            meta: SecretVersion {
                version: version.clone(),
                enabled: true,
                created_at: self.clock.now(),
            },
            data: value.to_vec(),
        });
        Ok(version)
    }

    async fn list_versions(&self, path: &str) -> Result<Vec<SecretVersion>> {
        self.check_available()?;
        let versions = self
            .secrets
            .get(path)
            .ok_or_else(|| VaultError::NotFound(path.to_string()))?;
        Ok(versions.iter().map(|v| v.meta.clone()).collect())
    }

    async fn set_version_state(&self, path: &str, version: &str, enabled: bool) -> Result<()> {
        self.check_available()?;
        let mut entry = self
            .secrets
            .get_mut(path)
            .ok_or_else(|| VaultError::NotFound(path.to_string()))?;
        let stored = entry
            .iter_mut()
            .find(|v| v.meta.version == version)
            .ok_or_else(|| VaultError::NotFound(format!("{path}@{version}")))?;
        stored.meta.enabled = enabled;
        Ok(())
    }

    async fn delete_version(&self, path: &str, version: &str) -> Result<()> {
        self.check_available()?;
        let mut entry = self
            .secrets
            .get_mut(path)
            .ok_or_else(|| VaultError::NotFound(path.to_string()))?;
        let before = entry.len();
        entry.retain(|v| v.meta.version != version);
        if entry.len() == before {
            return Err(VaultError::NotFound(format!("{path}@{version}")));
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }
}
