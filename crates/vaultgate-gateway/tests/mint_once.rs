//! At-most-one-mint-per-fingerprint under concurrency.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Duration;

use vaultgate_cache::{CredentialCache, MemoryCacheConfig, MemoryCredentialCache, MemoryTokenCache, TokenCache};
use vaultgate_gateway::authenticator::Authenticator;
use vaultgate_gateway::config::RateLimitSettings;
use vaultgate_gateway::credentials::CredentialResolver;
use vaultgate_gateway::ratelimit::ClientRateLimiter;
use vaultgate_rotation::hash_client_secret;
use vaultgate_token::{TokenEngine, TokenEngineConfig, VaultKeyStore};
use vaultgate_types::{
    AuditEventType, Clock, RecordingAuditSink, RequestAudit, StoredCredential, SystemClock,
};
use vaultgate_vault::{paths, MemoryVault, SecretsVault};

async fn authenticator() -> (Arc<Authenticator>, Arc<RecordingAuditSink>, Arc<dyn Clock>) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let vault = Arc::new(MemoryVault::new());
    let audit = Arc::new(RecordingAuditSink::default());

    let doc = StoredCredential {
        secret_hash: hash_client_secret(&secrecy::SecretString::new("s3cret!".into())).unwrap(),
        permissions: vec!["process_payment".into()],
        created_at: clock.now(),
    };
    vault
        .put_secret(
            &paths::credentials_current("vendor-A"),
            &serde_json::to_vec(&doc).unwrap(),
        )
        .await
        .unwrap();
    let key_doc = serde_json::json!({ "kid": "kid-1", "key": BASE64.encode([7u8; 32]) });
    vault
        .put_secret(paths::TOKEN_SIGNING_KEY, key_doc.to_string().as_bytes())
        .await
        .unwrap();
    vault
        .put_secret(
            paths::TOKEN_VERIFICATION_KEY,
            serde_json::json!([key_doc]).to_string().as_bytes(),
        )
        .await
        .unwrap();

    let vault_dyn: Arc<dyn SecretsVault> = vault;
    let token_cache = Arc::new(MemoryTokenCache::with_clock(
        MemoryCacheConfig::default(),
        clock.clone(),
    ));
    let credential_cache: Arc<dyn CredentialCache> =
        Arc::new(MemoryCredentialCache::with_clock(clock.clone()));
    let keys = Arc::new(VaultKeyStore::new(
        vault_dyn.clone(),
        Duration::seconds(300),
        clock.clone(),
    ));
    let engine = Arc::new(TokenEngine::new(
        TokenEngineConfig::new("vaultgate", "payments-internal"),
        keys,
        clock.clone(),
    ));
    let resolver = CredentialResolver::new(
        vault_dyn,
        credential_cache,
        Duration::seconds(60),
        Duration::seconds(300),
        clock.clone(),
    );
    let authenticator = Arc::new(Authenticator::new(
        resolver,
        engine,
        token_cache as Arc<dyn TokenCache>,
        ClientRateLimiter::new(&RateLimitSettings {
            per_minute: 1000,
            burst: 1000,
        }),
        None,
        true,
        clock.clone(),
    ));
    (authenticator, audit, clock)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_identical_authentications_mint_once() {
    let (authenticator, audit, clock) = authenticator().await;

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let authenticator = authenticator.clone();
            let sink = audit.clone();
            let clock = clock.clone();
            tokio::spawn(async move {
                let request = RequestAudit::new(uuid::Uuid::new_v4(), sink, clock);
                authenticator
                    .authenticate("vendor-A", "s3cret!", &request)
                    .await
            })
        })
        .collect();

    let mut jtis = Vec::new();
    for task in tasks {
        let token = task.await.unwrap().expect("authentication must succeed");
        jtis.push(token.jti);
    }

    jtis.sort();
    jtis.dedup();
    assert_eq!(jtis.len(), 1, "every caller must receive the same live token");
    assert_eq!(
        audit.of_type(AuditEventType::TokenIssued).len(),
        1,
        "the engine must be invoked at most once while the token is live"
    );
}
