use std::sync::Arc;

use chrono::Duration;
use secrecy::ExposeSecret;

use vaultgate_cache::{
    CachedToken, MemoryCacheConfig, MemoryCredentialCache, MemoryTokenCache, TokenCache,
};
use vaultgate_rotation::{
    MemoryRotationStore, RotationController, RotationControllerConfig, RotationError,
    RotationStore, hash_client_secret, verify_client_secret,
};
use vaultgate_types::{
    AuditEventType, Clock, ManualClock, RecordingAuditSink, RotationState, StoredCredential,
};
use vaultgate_vault::{paths, MemoryVault, SecretsVault};

struct Harness {
    vault: Arc<MemoryVault>,
    tokens: Arc<MemoryTokenCache>,
    store: Arc<MemoryRotationStore>,
    audit: Arc<RecordingAuditSink>,
    clock: ManualClock,
    controller: RotationController,
}

async fn harness() -> Harness {
    harness_with(RotationControllerConfig {
        default_transition_window: Duration::seconds(60),
        ..RotationControllerConfig::default()
    })
    .await
}

async fn harness_with(config: RotationControllerConfig) -> Harness {
    let clock = ManualClock::from_system();
    let vault = Arc::new(MemoryVault::with_clock(Arc::new(clock.clone())));
    let tokens = Arc::new(MemoryTokenCache::with_clock(
        MemoryCacheConfig {
            max_entry_ttl: Duration::hours(2),
            ..MemoryCacheConfig::default()
        },
        Arc::new(clock.clone()),
    ));
    let credentials = Arc::new(MemoryCredentialCache::with_clock(Arc::new(clock.clone())));
    let store = Arc::new(MemoryRotationStore::new());
    let audit = Arc::new(RecordingAuditSink::default());

    let secret = hash_client_secret(&secrecy::SecretString::new("s3cret!".into())).unwrap();
    let doc = StoredCredential {
        secret_hash: secret,
        permissions: vec!["process_payment".into(), "view_status".into()],
        created_at: clock.now(),
    };
    vault
        .put_secret(
            &paths::credentials_current("vendor-A"),
            &serde_json::to_vec(&doc).unwrap(),
        )
        .await
        .unwrap();

    let controller = RotationController::new(
        vault.clone(),
        tokens.clone(),
        credentials.clone(),
        store.clone(),
        audit.clone(),
        Arc::new(clock.clone()),
        config,
    );

    Harness {
        vault,
        tokens,
        store,
        audit,
        clock,
        controller,
    }
}

async fn enabled_versions(vault: &MemoryVault, client: &str) -> Vec<String> {
    vault
        .list_versions(&paths::credentials_current(client))
        .await
        .unwrap()
        .into_iter()
        .filter(|v| v.enabled)
        .map(|v| v.version)
        .collect()
}

fn cached_token(h: &Harness, jti: &str, version: &str, ttl_secs: i64) -> CachedToken {
    let now = h.clock.now();
    CachedToken {
        jti: jti.into(),
        raw: format!("h.b.{jti}"),
        client_id: "vendor-A".into(),
        credential_version: version.into(),
        fingerprint: format!("fp-{version}"),
        issued_at: now,
        expires_at: now + Duration::seconds(ttl_secs),
    }
}

#[tokio::test]
async fn initiate_leaves_only_the_old_version_valid() {
    let h = harness().await;
    let outcome = h
        .controller
        .initiate("vendor-A", "scheduled", Some(Duration::seconds(60)), false)
        .await
        .unwrap();

    assert_eq!(outcome.record.state, RotationState::Initiated);
    assert_eq!(outcome.record.old_version, "v1");
    assert_eq!(outcome.record.new_version, "v2");
    assert!(!outcome.new_secret.expose_secret().is_empty());

    // The incoming version exists but is not yet valid for authentication.
    assert_eq!(enabled_versions(&h.vault, "vendor-A").await, vec!["v1"]);

    let started = h.audit.of_type(AuditEventType::RotationStarted);
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].client_id.as_deref(), Some("vendor-A"));
}

#[tokio::test]
async fn second_initiate_requires_forced() {
    let h = harness().await;
    let first = h
        .controller
        .initiate("vendor-A", "scheduled", None, false)
        .await
        .unwrap();

    let err = h
        .controller
        .initiate("vendor-A", "again", None, false)
        .await
        .unwrap_err();
    match err {
        RotationError::ActiveRotationExists(id) => assert_eq!(id, first.record.rotation_id),
        other => panic!("expected ActiveRotationExists, got {other}"),
    }
}

#[tokio::test]
async fn forced_initiate_supersedes_the_prior_record() {
    let h = harness().await;
    let first = h
        .controller
        .initiate("vendor-A", "scheduled", None, false)
        .await
        .unwrap();
    let second = h
        .controller
        .initiate("vendor-A", "compromised", None, true)
        .await
        .unwrap();

    let prior = h.store.get(first.record.rotation_id).await.unwrap().unwrap();
    assert_eq!(prior.state, RotationState::Failed);
    assert_eq!(prior.superseded_by, Some(second.record.rotation_id));
    assert_eq!(second.record.state, RotationState::Initiated);
    assert!(second.record.forced);

    // At most one non-terminal record per client.
    let open = h.store.open_records().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].rotation_id, second.record.rotation_id);
}

#[tokio::test]
async fn initiate_then_cancel_restores_the_prior_state() {
    let h = harness().await;
    let before = h
        .vault
        .list_versions(&paths::credentials_current("vendor-A"))
        .await
        .unwrap();

    let outcome = h
        .controller
        .initiate("vendor-A", "scheduled", None, false)
        .await
        .unwrap();
    let cancelled = h
        .controller
        .cancel(outcome.record.rotation_id, "operator abort")
        .await
        .unwrap();

    assert_eq!(cancelled.state, RotationState::Failed);
    assert_eq!(cancelled.message, "operator abort");

    // Active credentials unchanged and no pending version left behind.
    let after = h
        .vault
        .list_versions(&paths::credentials_current("vendor-A"))
        .await
        .unwrap();
    assert_eq!(after.len(), before.len());
    assert_eq!(enabled_versions(&h.vault, "vendor-A").await, vec!["v1"]);
    assert_eq!(h.audit.of_type(AuditEventType::RotationFailed).len(), 1);
}

#[tokio::test]
async fn unknown_client_cannot_rotate() {
    let h = harness().await;
    let err = h
        .controller
        .initiate("vendor-Z", "scheduled", None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, RotationError::UnknownClient(_)));
}

#[tokio::test]
async fn reconciliation_walks_the_happy_path() {
    let h = harness().await;
    let outcome = h
        .controller
        .initiate("vendor-A", "scheduled", Some(Duration::seconds(60)), false)
        .await
        .unwrap();
    let id = outcome.record.rotation_id;

    // First sweep: promotion only; the transition window is still open.
    h.controller.reconcile_once().await;
    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, RotationState::DualActive);
    let mut enabled = enabled_versions(&h.vault, "vendor-A").await;
    enabled.sort();
    assert_eq!(enabled, vec!["v1", "v2"]);

    // Window elapses with no old-version tokens: retire and complete cascade.
    h.clock.advance(Duration::seconds(61));
    h.controller.reconcile_once().await;
    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, RotationState::NewActive);
    assert!(record.completed_at.is_some());

    // Old version removed from the vault entirely.
    let versions = h
        .vault
        .list_versions(&paths::credentials_current("vendor-A"))
        .await
        .unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].version, "v2");
    assert_eq!(h.audit.of_type(AuditEventType::RotationCompleted).len(), 1);
}

#[tokio::test]
async fn retire_waits_for_old_tokens_to_age() {
    let h = harness().await;
    let outcome = h
        .controller
        .initiate("vendor-A", "scheduled", Some(Duration::seconds(60)), false)
        .await
        .unwrap();
    let id = outcome.record.rotation_id;

    h.controller.reconcile_once().await;
    // A token minted against the old version, 1 h TTL.
    h.tokens.put(cached_token(&h, "jti-old", "v1", 3600)).await;

    // Window elapsed, but the token is still in the first half of its TTL.
    h.clock.advance(Duration::seconds(61));
    h.controller.reconcile_once().await;
    assert_eq!(
        h.store.get(id).await.unwrap().unwrap().state,
        RotationState::DualActive
    );

    // Past the half-life: retire proceeds, completion still blocked.
    h.clock.advance(Duration::seconds(1800));
    h.controller.reconcile_once().await;
    assert_eq!(
        h.store.get(id).await.unwrap().unwrap().state,
        RotationState::OldDeprecated
    );

    // Past expiry: zero outstanding, completion lands.
    h.clock.advance(Duration::seconds(1800));
    h.controller.reconcile_once().await;
    assert_eq!(
        h.store.get(id).await.unwrap().unwrap().state,
        RotationState::NewActive
    );
}

#[tokio::test]
async fn complete_is_idempotent() {
    let h = harness().await;
    let outcome = h
        .controller
        .initiate("vendor-A", "scheduled", Some(Duration::seconds(60)), false)
        .await
        .unwrap();
    let id = outcome.record.rotation_id;

    h.controller.reconcile_once().await;
    h.clock.advance(Duration::seconds(61));
    h.controller.reconcile_once().await;

    let first = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(first.state, RotationState::NewActive);

    let second = h.controller.complete(id).await.unwrap();
    assert_eq!(second.state, RotationState::NewActive);
    assert_eq!(second.completed_at, first.completed_at);
}

#[tokio::test]
async fn operator_complete_advances_through_retire() {
    let h = harness().await;
    let outcome = h
        .controller
        .initiate("vendor-A", "scheduled", Some(Duration::seconds(60)), false)
        .await
        .unwrap();
    let id = outcome.record.rotation_id;

    h.controller.reconcile_once().await;
    h.clock.advance(Duration::seconds(61));

    let record = h.controller.complete(id).await.unwrap();
    assert_eq!(record.state, RotationState::NewActive);
}

#[tokio::test]
async fn operator_complete_respects_evidence() {
    let h = harness().await;
    let outcome = h
        .controller
        .initiate("vendor-A", "scheduled", Some(Duration::seconds(60)), false)
        .await
        .unwrap();
    let id = outcome.record.rotation_id;
    h.controller.reconcile_once().await;
    h.tokens.put(cached_token(&h, "jti-old", "v1", 3600)).await;
    h.clock.advance(Duration::seconds(61));

    let err = h.controller.complete(id).await.unwrap_err();
    assert!(matches!(err, RotationError::PreconditionFailed(_)));
}

#[tokio::test]
async fn cancel_after_retire_reenables_the_old_version() {
    let h = harness().await;
    let outcome = h
        .controller
        .initiate("vendor-A", "scheduled", Some(Duration::seconds(60)), false)
        .await
        .unwrap();
    let id = outcome.record.rotation_id;

    h.controller.reconcile_once().await;
    h.clock.advance(Duration::seconds(61));
    // Block completion so the sweep stops at OLD_DEPRECATED.
    h.tokens.put(cached_token(&h, "jti-old", "v1", 7200)).await;
    h.clock.advance(Duration::seconds(3601));
    h.controller.reconcile_once().await;
    assert_eq!(
        h.store.get(id).await.unwrap().unwrap().state,
        RotationState::OldDeprecated
    );

    h.controller.cancel(id, "rollback").await.unwrap();
    assert_eq!(enabled_versions(&h.vault, "vendor-A").await, vec!["v1"]);
}

#[tokio::test]
async fn vault_write_failure_aborts_the_rotation() {
    let h = harness().await;
    let outcome = h
        .controller
        .initiate("vendor-A", "scheduled", None, false)
        .await
        .unwrap();

    h.vault.set_unavailable(true);
    h.controller.reconcile_once().await;

    let record = h.store.get(outcome.record.rotation_id).await.unwrap().unwrap();
    assert_eq!(record.state, RotationState::Failed);
    assert!(record.message.contains("aborted at vault write"));
    assert!(!h.audit.of_type(AuditEventType::RotationFailed).is_empty());
}

#[tokio::test]
async fn watchdog_fails_stuck_rotations() {
    let h = harness_with(RotationControllerConfig {
        default_transition_window: Duration::seconds(60),
        watchdog: Duration::seconds(600),
        ..RotationControllerConfig::default()
    })
    .await;

    let outcome = h
        .controller
        .initiate("vendor-A", "scheduled", None, false)
        .await
        .unwrap();
    let id = outcome.record.rotation_id;
    h.controller.reconcile_once().await;

    // Keep an old-version token perpetually young by never expiring it in
    // time; the watchdog fires first.
    h.tokens.put(cached_token(&h, "jti-old", "v1", 7200)).await;
    h.clock.advance(Duration::seconds(601));
    h.controller.reconcile_once().await;

    let record = h.store.get(id).await.unwrap().unwrap();
    assert_eq!(record.state, RotationState::Failed);
    assert_eq!(record.message, "maximum rotation duration exceeded");
    assert_eq!(enabled_versions(&h.vault, "vendor-A").await, vec!["v1"]);
}

#[tokio::test]
async fn cancelled_rotation_keeps_old_secret_verifiable() {
    let h = harness().await;
    let outcome = h
        .controller
        .initiate("vendor-A", "scheduled", None, false)
        .await
        .unwrap();
    h.controller
        .cancel(outcome.record.rotation_id, "operator abort")
        .await
        .unwrap();

    let doc: StoredCredential = serde_json::from_slice(
        &h.vault
            .get_secret(&paths::credentials_current("vendor-A"))
            .await
            .unwrap(),
    )
    .unwrap();
    assert!(verify_client_secret("s3cret!", &doc.secret_hash));
}
