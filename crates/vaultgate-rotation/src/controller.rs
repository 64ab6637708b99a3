//! The rotation controller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use dashmap::DashMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vaultgate_cache::{CredentialCache, TokenCache};
use vaultgate_types::{
    AuditEventType, AuditSink, Clock, RequestAudit, RotationRecord, RotationState, StoredCredential,
};
use vaultgate_vault::{paths, SecretsVault, VaultError};

use crate::secret::{generate_client_secret, hash_client_secret};
use crate::store::RotationStore;
use crate::{Result, RotationError};

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct RotationControllerConfig {
    /// Dual-validity window when the operator does not specify one.
    pub default_transition_window: Duration,
    /// Hold between `INITIATED` and automatic promotion.
    pub promote_hold: Duration,
    /// Reconciliation sweep period.
    pub check_interval: std::time::Duration,
    /// Ceiling on any rotation's total duration before it is failed.
    pub watchdog: Duration,
}

impl Default for RotationControllerConfig {
    fn default() -> Self {
        Self {
            default_transition_window: Duration::seconds(300),
            promote_hold: Duration::zero(),
            check_interval: std::time::Duration::from_secs(300),
            watchdog: Duration::hours(24),
        }
    }
}

/// What `initiate` hands back: the record, and the plaintext secret exactly
/// once, for out-of-band delivery to the vendor. The secret is never
/// persisted or logged.
#[derive(Debug)]
pub struct InitiateOutcome {
    /// The freshly inserted record.
    pub record: RotationRecord,
    /// The new client secret.
    pub new_secret: SecretString,
}

/// Marker written at `credentials/{clientId}/pending` while a rotation has
/// an unpromoted version.
#[derive(Debug, Serialize, Deserialize)]
struct PendingMarker {
    version: String,
    rotation_id: Uuid,
}

/// Drives every rotation in the process; sole writer of credentials and
/// rotation records.
pub struct RotationController {
    vault: Arc<dyn SecretsVault>,
    tokens: Arc<dyn TokenCache>,
    credentials: Arc<dyn CredentialCache>,
    store: Arc<dyn RotationStore>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    config: RotationControllerConfig,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RotationController {
    /// Wire a controller over its collaborators.
    pub fn new(
        vault: Arc<dyn SecretsVault>,
        tokens: Arc<dyn TokenCache>,
        credentials: Arc<dyn CredentialCache>,
        store: Arc<dyn RotationStore>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        config: RotationControllerConfig,
    ) -> Self {
        Self {
            vault,
            tokens,
            credentials,
            store,
            audit,
            clock,
            config,
            locks: DashMap::new(),
        }
    }

    /// Record store, for the read-only admin surface.
    pub fn store(&self) -> &Arc<dyn RotationStore> {
        &self.store
    }

    fn client_lock(&self, client_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn operation_audit(&self) -> RequestAudit {
        RequestAudit::new(Uuid::new_v4(), self.audit.clone(), self.clock.clone())
    }

    fn rotation_attributes(record: &RotationRecord) -> HashMap<String, String> {
        let mut attributes = HashMap::new();
        attributes.insert("rotation_id".into(), record.rotation_id.to_string());
        attributes.insert("state".into(), record.state.to_string());
        attributes.insert("old_version".into(), record.old_version.clone());
        attributes.insert("new_version".into(), record.new_version.clone());
        attributes
    }

    async fn persist_rotation_state(&self, record: &RotationRecord) -> Result<()> {
        let doc = serde_json::to_vec(record)
            .map_err(|e| RotationError::Store(e.to_string()))?;
        self.vault
            .put_secret(&paths::rotation_state(&record.client_id), &doc)
            .await?;
        Ok(())
    }

    /// Begin a rotation for `client_id`.
    ///
    /// Fails with [`RotationError::ActiveRotationExists`] unless `forced`,
    /// in which case the prior record is atomically superseded (it
    /// transitions to `FAILED` with `superseded_by` pointing at the new
    /// record). The new secret is generated here, written to the vault as a
    /// disabled version, and returned exactly once.
    pub async fn initiate(
        &self,
        client_id: &str,
        reason: &str,
        transition_window: Option<Duration>,
        forced: bool,
    ) -> Result<InitiateOutcome> {
        let lock = self.client_lock(client_id);
        let _guard = lock.lock().await;
        let audit = self.operation_audit();

        let prior = self.store.active_for_client(client_id).await?;
        if let Some(ref prior) = prior {
            if !forced {
                return Err(RotationError::ActiveRotationExists(prior.rotation_id));
            }
        }

        // Resolve the outgoing version and the client's capabilities.
        let current_path = paths::credentials_current(client_id);
        let versions = match self.vault.list_versions(&current_path).await {
            Ok(versions) => versions,
            Err(VaultError::NotFound(_)) => {
                return Err(RotationError::UnknownClient(client_id.to_string()))
            }
            Err(err) => return Err(err.into()),
        };
        let old_version = versions
            .iter()
            .rev()
            .find(|v| v.enabled)
            .map(|v| v.version.clone())
            .ok_or_else(|| RotationError::UnknownClient(client_id.to_string()))?;
        let current_doc: StoredCredential = serde_json::from_slice(
            &self.vault.get_secret(&current_path).await?,
        )
        .map_err(|e| RotationError::Store(format!("credential document malformed: {e}")))?;

        // Write the incoming version, disabled until promotion.
        let new_secret = generate_client_secret();
        let secret_hash =
            hash_client_secret(&new_secret).map_err(RotationError::Hashing)?;
        let new_doc = StoredCredential {
            secret_hash,
            permissions: current_doc.permissions.clone(),
            created_at: self.clock.now(),
        };
        let doc_bytes =
            serde_json::to_vec(&new_doc).map_err(|e| RotationError::Store(e.to_string()))?;
        let new_version = self.vault.put_secret(&current_path, &doc_bytes).await?;
        self.vault
            .set_version_state(&current_path, &new_version, false)
            .await?;

        let window = transition_window.unwrap_or(self.config.default_transition_window);
        let mut record = RotationRecord::new(
            client_id,
            old_version,
            new_version.clone(),
            window,
            reason,
            forced,
            self.clock.now(),
        );
        record.message = "new credential version written, awaiting promotion".into();

        // Supersede the prior record only after the vault writes succeeded.
        if let Some(mut prior) = prior {
            prior.state = RotationState::Failed;
            prior.superseded_by = Some(record.rotation_id);
            prior.message = "superseded by forced rotation".into();
            self.store.update(prior.clone()).await?;
            audit
                .emit(
                    AuditEventType::RotationFailed,
                    Some(client_id),
                    None,
                    Self::rotation_attributes(&prior),
                )
                .await;
        }

        let marker = PendingMarker {
            version: new_version,
            rotation_id: record.rotation_id,
        };
        self.vault
            .put_secret(
                &paths::credentials_pending(client_id),
                &serde_json::to_vec(&marker).map_err(|e| RotationError::Store(e.to_string()))?,
            )
            .await?;

        self.store.insert(record.clone()).await?;
        self.persist_rotation_state(&record).await?;
        info!(client_id, rotation_id = %record.rotation_id, reason, forced, "rotation initiated");
        audit
            .emit(
                AuditEventType::RotationStarted,
                Some(client_id),
                None,
                Self::rotation_attributes(&record),
            )
            .await;

        Ok(InitiateOutcome { record, new_secret })
    }

    /// Promote `INITIATED → DUAL_ACTIVE`: the incoming version becomes valid
    /// for authentication alongside the outgoing one.
    pub async fn promote(&self, rotation_id: Uuid) -> Result<RotationRecord> {
        let mut record = self.fetch(rotation_id).await?;
        let lock = self.client_lock(&record.client_id);
        let _guard = lock.lock().await;
        record = self.fetch(rotation_id).await?;
        if let Err(err) = self.promote_locked(&mut record).await {
            self.abort_on_vault_failure(&mut record, &err).await;
            return Err(err);
        }
        Ok(record)
    }

    /// A transition that failed at a vault write aborts: the record lands in
    /// `FAILED`, the prior version stays authoritative, and no automatic
    /// retry happens. Operators resume by initiating a fresh rotation.
    async fn abort_on_vault_failure(&self, record: &mut RotationRecord, err: &RotationError) {
        if !matches!(err, RotationError::Vault(_)) {
            return;
        }
        if record.state.is_terminal() {
            return;
        }
        record.state = RotationState::Failed;
        record.message = format!("aborted at vault write: {err}");
        if let Err(store_err) = self.store.update(record.clone()).await {
            error!(rotation_id = %record.rotation_id, error = %store_err, "could not record rotation abort");
            return;
        }
        self.credentials.invalidate(&record.client_id).await;
        self.operation_audit()
            .emit(
                AuditEventType::RotationFailed,
                Some(&record.client_id),
                None,
                Self::rotation_attributes(record),
            )
            .await;
    }

    async fn promote_locked(&self, record: &mut RotationRecord) -> Result<()> {
        self.require_edge(record, RotationState::DualActive)?;
        let current_path = paths::credentials_current(&record.client_id);
        self.vault
            .set_version_state(&current_path, &record.new_version, true)
            .await?;
        self.advance(record, RotationState::DualActive, "both versions accepted")
            .await
    }

    /// Retire `DUAL_ACTIVE → OLD_DEPRECATED` once the transition window has
    /// elapsed and no old-version token is still within the first half of
    /// its TTL.
    async fn retire_locked(&self, record: &mut RotationRecord) -> Result<()> {
        self.require_edge(record, RotationState::OldDeprecated)?;

        let now = self.clock.now();
        if now - record.started_at < record.transition_window {
            return Err(RotationError::PreconditionFailed(
                "transition window still open".into(),
            ));
        }
        let young = self
            .tokens
            .young_tokens_for_version(&record.client_id, &record.old_version)
            .await;
        if young > 0 {
            return Err(RotationError::PreconditionFailed(format!(
                "{young} old-version tokens still within half of their TTL"
            )));
        }

        let current_path = paths::credentials_current(&record.client_id);
        self.vault
            .set_version_state(&current_path, &record.old_version, false)
            .await?;

        // The vault must confirm disabled-but-present before we commit the
        // transition.
        let versions = self.vault.list_versions(&current_path).await?;
        let confirmed = versions
            .iter()
            .any(|v| v.version == record.old_version && !v.enabled);
        if !confirmed {
            return Err(RotationError::PreconditionFailed(
                "vault did not confirm the old version as disabled-but-present".into(),
            ));
        }

        self.advance(record, RotationState::OldDeprecated, "old version disabled for new mints")
            .await
    }

    /// Complete the rotation. Idempotent on a `NEW_ACTIVE` record. If the
    /// record is still `DUAL_ACTIVE`, this first attempts `retire` so an
    /// operator-driven completion advances as far as the evidence allows.
    pub async fn complete(&self, rotation_id: Uuid) -> Result<RotationRecord> {
        let mut record = self.fetch(rotation_id).await?;
        let lock = self.client_lock(&record.client_id);
        let _guard = lock.lock().await;
        record = self.fetch(rotation_id).await?;

        if record.state == RotationState::NewActive {
            return Ok(record);
        }
        if record.state == RotationState::DualActive {
            if let Err(err) = self.retire_locked(&mut record).await {
                self.abort_on_vault_failure(&mut record, &err).await;
                return Err(err);
            }
        }
        if let Err(err) = self.complete_locked(&mut record).await {
            self.abort_on_vault_failure(&mut record, &err).await;
            return Err(err);
        }
        Ok(record)
    }

    async fn complete_locked(&self, record: &mut RotationRecord) -> Result<()> {
        if record.state == RotationState::NewActive {
            return Ok(());
        }
        self.require_edge(record, RotationState::NewActive)?;

        let outstanding = self
            .tokens
            .outstanding_for_version(&record.client_id, &record.old_version)
            .await;
        if outstanding > 0 {
            return Err(RotationError::PreconditionFailed(format!(
                "{outstanding} tokens still outstanding against the old version"
            )));
        }

        let current_path = paths::credentials_current(&record.client_id);
        self.vault
            .delete_version(&current_path, &record.old_version)
            .await?;
        let invalidated = self.tokens.invalidate_by_client(&record.client_id).await;
        debug!(client_id = %record.client_id, invalidated, "lingering tokens invalidated at completion");

        record.state = RotationState::NewActive;
        // Set exactly once; re-completion keeps the original instant.
        if record.completed_at.is_none() {
            record.completed_at = Some(self.clock.now());
        }
        record.message = "rotation completed, old version removed".into();
        self.store.update(record.clone()).await?;
        self.persist_rotation_state(record).await?;
        self.credentials.invalidate(&record.client_id).await;

        info!(client_id = %record.client_id, rotation_id = %record.rotation_id, "rotation completed");
        self.operation_audit()
            .emit(
                AuditEventType::RotationCompleted,
                Some(&record.client_id),
                None,
                Self::rotation_attributes(record),
            )
            .await;
        Ok(())
    }

    /// Abort a non-terminal rotation. The incoming version is removed from
    /// the vault and, if the old version had already been deprecated, it is
    /// re-enabled: the prior credential remains authoritative.
    pub async fn cancel(&self, rotation_id: Uuid, reason: &str) -> Result<RotationRecord> {
        let mut record = self.fetch(rotation_id).await?;
        let lock = self.client_lock(&record.client_id);
        let _guard = lock.lock().await;
        record = self.fetch(rotation_id).await?;
        self.cancel_locked(&mut record, reason).await?;
        Ok(record)
    }

    async fn cancel_locked(&self, record: &mut RotationRecord, reason: &str) -> Result<()> {
        if record.state.is_terminal() {
            return Err(RotationError::InvalidTransition {
                from: record.state,
                to: RotationState::Failed,
            });
        }

        let current_path = paths::credentials_current(&record.client_id);
        if record.state == RotationState::OldDeprecated {
            self.vault
                .set_version_state(&current_path, &record.old_version, true)
                .await?;
        }
        match self.vault.delete_version(&current_path, &record.new_version).await {
            Ok(()) => {}
            // Already gone is fine for an abort path.
            Err(VaultError::NotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        record.state = RotationState::Failed;
        record.message = reason.to_string();
        self.store.update(record.clone()).await?;
        self.persist_rotation_state(record).await?;
        self.credentials.invalidate(&record.client_id).await;

        warn!(client_id = %record.client_id, rotation_id = %record.rotation_id, reason, "rotation cancelled");
        self.operation_audit()
            .emit(
                AuditEventType::RotationFailed,
                Some(&record.client_id),
                None,
                Self::rotation_attributes(record),
            )
            .await;
        Ok(())
    }

    /// One reconciliation sweep: advance every open record as far as its
    /// time- and evidence-based conditions allow, and fail any record past
    /// the watchdog. Returns the number of transitions applied.
    pub async fn reconcile_once(&self) -> usize {
        let open = match self.store.open_records().await {
            Ok(open) => open,
            Err(err) => {
                error!(error = %err, "reconciliation could not list open rotations");
                return 0;
            }
        };

        let mut transitions = 0;
        for stale in open {
            let lock = self.client_lock(&stale.client_id);
            let _guard = lock.lock().await;
            let mut record = match self.fetch(stale.rotation_id).await {
                Ok(record) if !record.state.is_terminal() => record,
                _ => continue,
            };

            let now = self.clock.now();
            if now - record.started_at > self.config.watchdog {
                if let Err(err) = self
                    .cancel_locked(&mut record, "maximum rotation duration exceeded")
                    .await
                {
                    error!(rotation_id = %record.rotation_id, error = %err, "watchdog cancellation failed");
                } else {
                    transitions += 1;
                }
                continue;
            }

            // Cascade as far as conditions allow within this sweep.
            loop {
                let step = match record.state {
                    RotationState::Initiated => {
                        if now - record.started_at >= self.config.promote_hold {
                            self.promote_locked(&mut record).await
                        } else {
                            Err(RotationError::PreconditionFailed("promotion hold open".into()))
                        }
                    }
                    RotationState::DualActive => self.retire_locked(&mut record).await,
                    RotationState::OldDeprecated => self.complete_locked(&mut record).await,
                    _ => break,
                };
                match step {
                    Ok(()) => transitions += 1,
                    Err(RotationError::PreconditionFailed(why)) => {
                        debug!(rotation_id = %record.rotation_id, why, "rotation waiting");
                        break;
                    }
                    Err(err) => {
                        error!(rotation_id = %record.rotation_id, error = %err, "rotation transition failed");
                        self.abort_on_vault_failure(&mut record, &err).await;
                        break;
                    }
                }
            }
        }
        transitions
    }

    /// Spawn the periodic reconciliation sweep.
    pub fn spawn_reconciler(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let controller = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(controller.config.check_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let transitions = controller.reconcile_once().await;
                if transitions > 0 {
                    info!(transitions, "rotation reconciliation advanced records");
                }
            }
        })
    }

    async fn fetch(&self, rotation_id: Uuid) -> Result<RotationRecord> {
        self.store
            .get(rotation_id)
            .await?
            .ok_or(RotationError::NotFound(rotation_id))
    }

    fn require_edge(&self, record: &RotationRecord, to: RotationState) -> Result<()> {
        if record.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(RotationError::InvalidTransition {
                from: record.state,
                to,
            })
        }
    }

    async fn advance(
        &self,
        record: &mut RotationRecord,
        to: RotationState,
        message: &str,
    ) -> Result<()> {
        let from = record.state;
        record.state = to;
        record.message = message.to_string();
        self.store.update(record.clone()).await?;
        self.persist_rotation_state(record).await?;
        self.credentials.invalidate(&record.client_id).await;

        info!(client_id = %record.client_id, rotation_id = %record.rotation_id, %from, %to, "rotation advanced");
        let mut attributes = Self::rotation_attributes(record);
        attributes.insert("from".into(), from.to_string());
        self.operation_audit()
            .emit(
                AuditEventType::RotationAdvanced,
                Some(&record.client_id),
                None,
                attributes,
            )
            .await;
        Ok(())
    }
}

impl std::fmt::Debug for RotationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationController")
            .field("config", &self.config)
            .finish()
    }
}
