//! Credential resolution: cache-first, vault on staleness, cached fallback
//! while the vault is down.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, warn};

use vaultgate_cache::CredentialCache;
use vaultgate_types::{
    AuditEventType, Clock, ClientRecord, CredentialVersion, GatewayError, RequestAudit,
    StoredCredential,
};
use vaultgate_vault::{paths, SecretsVault, VaultError};

/// Resolves a client's active credential versions.
pub struct CredentialResolver {
    vault: Arc<dyn SecretsVault>,
    cache: Arc<dyn CredentialCache>,
    /// Cache entries younger than this are served without a vault call.
    serve_window: Duration,
    /// Cache entries younger than this may authenticate while the vault is
    /// unavailable.
    freshness_window: Duration,
    clock: Arc<dyn Clock>,
}

impl CredentialResolver {
    /// Resolver over a vault and a credential cache.
    pub fn new(
        vault: Arc<dyn SecretsVault>,
        cache: Arc<dyn CredentialCache>,
        serve_window: Duration,
        freshness_window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            vault,
            cache,
            serve_window,
            freshness_window,
            clock,
        }
    }

    /// Resolve `client_id` to its record.
    ///
    /// An unknown client maps to `InvalidCredentials` so callers cannot
    /// distinguish a missing client from a wrong secret. A vault outage
    /// falls back to the cached record when it is within the freshness
    /// window, emitting `VAULT_DEGRADED`.
    pub async fn resolve(
        &self,
        client_id: &str,
        audit: &RequestAudit,
    ) -> Result<ClientRecord, GatewayError> {
        let now = self.clock.now();
        let cached = self.cache.get(client_id).await;

        if let Some(ref entry) = cached {
            if entry.is_fresh(now, self.serve_window) {
                return Ok(entry.record.clone());
            }
        }

        match self.fetch_from_vault(client_id).await {
            Ok(record) => {
                self.cache.put(record.clone()).await;
                Ok(record)
            }
            Err(VaultError::NotFound(_)) => Err(GatewayError::InvalidCredentials),
            Err(VaultError::Denied(why)) => Err(GatewayError::UpstreamUnavailable(format!(
                "vault denied access: {why}"
            ))),
            Err(VaultError::Unavailable(why)) => {
                if let Some(entry) = cached {
                    if entry.is_fresh(now, self.freshness_window) {
                        warn!(client_id, why, "vault unavailable, serving cached credentials");
                        let mut attributes = HashMap::new();
                        attributes.insert(
                            "cache_age_seconds".into(),
                            (now - entry.fetched_at).num_seconds().to_string(),
                        );
                        audit
                            .emit(
                                AuditEventType::VaultDegraded,
                                Some(client_id),
                                None,
                                attributes,
                            )
                            .await;
                        return Ok(entry.record);
                    }
                }
                Err(GatewayError::UpstreamUnavailable("vault unavailable".into()))
            }
        }
    }

    /// Drop the cached record, forcing the next resolve through the vault.
    pub async fn invalidate(&self, client_id: &str) {
        self.cache.invalidate(client_id).await;
    }

    async fn fetch_from_vault(&self, client_id: &str) -> Result<ClientRecord, VaultError> {
        let current_path = paths::credentials_current(client_id);
        let versions = self.vault.list_versions(&current_path).await?;

        let mut credential_versions = Vec::with_capacity(versions.len());
        let mut permissions: Vec<String> = Vec::new();
        for version in &versions {
            // Disabled versions are listed but never authenticate; skipping
            // their documents keeps the hot path at one read per live version.
            if !version.enabled {
                credential_versions.push(CredentialVersion {
                    client_id: client_id.to_string(),
                    secret_hash: String::new(),
                    version: version.version.clone(),
                    active: false,
                    created_at: version.created_at,
                    expires_at: None,
                });
                continue;
            }
            let raw = self
                .vault
                .get_secret_version(&current_path, &version.version)
                .await?;
            let doc: StoredCredential = serde_json::from_slice(&raw).map_err(|e| {
                VaultError::Unavailable(format!("credential document malformed: {e}"))
            })?;
            permissions = doc.permissions.clone();
            credential_versions.push(CredentialVersion {
                client_id: client_id.to_string(),
                secret_hash: doc.secret_hash,
                version: version.version.clone(),
                active: true,
                created_at: doc.created_at,
                expires_at: None,
            });
        }

        if !credential_versions.iter().any(|v| v.active) {
            return Err(VaultError::NotFound(current_path));
        }

        let record = ClientRecord {
            client_id: client_id.to_string(),
            permissions,
            versions: credential_versions,
        };
        if let Err(why) = record.validate() {
            return Err(VaultError::Unavailable(format!(
                "credential record invalid: {why}"
            )));
        }
        debug!(client_id, versions = record.versions.len(), "credentials fetched from vault");
        Ok(record)
    }
}
