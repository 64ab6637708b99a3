//! Signing-key resolution through the vault.
//!
//! The signing key lives at `tokens/signing-key` as a JSON document
//! `{"kid": "...", "key": "<base64>"}`; `tokens/verification-key` holds the
//! list of currently trusted verification keys in the same shape (the
//! signing key plus any predecessor still inside its overlap window). Keys
//! are cached with a freshness window so verification does not hit the
//! vault per request.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use vaultgate_types::Clock;
use vaultgate_vault::{paths, SecretsVault, VaultError};

/// Key material addressed by `kid`. `Debug` never prints the bytes.
#[derive(Clone)]
pub struct SigningKey {
    /// Stable key identifier carried in token headers.
    pub kid: String,
    /// Raw symmetric key bytes.
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("bytes", &"<redacted>")
            .finish()
    }
}

/// Key resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The vault could not serve the key.
    #[error("signing key unavailable: {0}")]
    Unavailable(String),
    /// The stored key document is not in the expected shape.
    #[error("signing key document malformed: {0}")]
    Malformed(String),
}

impl From<VaultError> for KeyError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::NotFound(path) => KeyError::Unavailable(format!("missing {path}")),
            other => KeyError::Unavailable(other.to_string()),
        }
    }
}

/// Seam between the engine and wherever keys live.
#[async_trait]
pub trait SigningKeys: Send + Sync {
    /// Current signing key.
    async fn signing_key(&self) -> Result<SigningKey, KeyError>;

    /// All keys trusted for verification, by `kid`.
    async fn trusted_keys(&self) -> Result<HashMap<String, Vec<u8>>, KeyError>;
}

#[derive(Debug, Deserialize)]
struct KeyDocument {
    kid: String,
    key: String,
}

fn decode_document(doc: &KeyDocument) -> Result<SigningKey, KeyError> {
    let bytes = BASE64
        .decode(doc.key.as_bytes())
        .map_err(|e| KeyError::Malformed(format!("key material not base64: {e}")))?;
    if bytes.len() < 32 {
        return Err(KeyError::Malformed("key material shorter than 256 bits".into()));
    }
    Ok(SigningKey {
        kid: doc.kid.clone(),
        bytes,
    })
}

#[derive(Default)]
struct KeyCacheState {
    signing: Option<(SigningKey, DateTime<Utc>)>,
    trusted: Option<(HashMap<String, Vec<u8>>, DateTime<Utc>)>,
}

/// Vault-backed key store with a freshness-window cache.
pub struct VaultKeyStore {
    vault: Arc<dyn SecretsVault>,
    cache: RwLock<KeyCacheState>,
    freshness: Duration,
    clock: Arc<dyn Clock>,
}

impl VaultKeyStore {
    /// Store reading through `vault`, caching keys for `freshness`.
    pub fn new(vault: Arc<dyn SecretsVault>, freshness: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            vault,
            cache: RwLock::new(KeyCacheState::default()),
            freshness,
            clock,
        }
    }

    fn fresh<T: Clone>(&self, slot: &Option<(T, DateTime<Utc>)>) -> Option<T> {
        let now = self.clock.now();
        slot.as_ref()
            .filter(|(_, at)| now - *at <= self.freshness)
            .map(|(value, _)| value.clone())
    }
}

impl std::fmt::Debug for VaultKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKeyStore")
            .field("freshness", &self.freshness)
            .finish()
    }
}

#[async_trait]
impl SigningKeys for VaultKeyStore {
    async fn signing_key(&self) -> Result<SigningKey, KeyError> {
        if let Some(key) = self.fresh(&self.cache.read().await.signing) {
            return Ok(key);
        }
        let raw = self.vault.get_secret(paths::TOKEN_SIGNING_KEY).await?;
        let doc: KeyDocument = serde_json::from_slice(&raw)
            .map_err(|e| KeyError::Malformed(e.to_string()))?;
        let key = decode_document(&doc)?;
        debug!(kid = %key.kid, "signing key refreshed from vault");
        self.cache.write().await.signing = Some((key.clone(), self.clock.now()));
        Ok(key)
    }

    async fn trusted_keys(&self) -> Result<HashMap<String, Vec<u8>>, KeyError> {
        if let Some(keys) = self.fresh(&self.cache.read().await.trusted) {
            return Ok(keys);
        }
        let raw = self.vault.get_secret(paths::TOKEN_VERIFICATION_KEY).await?;
        let docs: Vec<KeyDocument> = serde_json::from_slice(&raw)
            .map_err(|e| KeyError::Malformed(e.to_string()))?;
        let mut keys = HashMap::with_capacity(docs.len() + 1);
        for doc in &docs {
            let key = decode_document(doc)?;
            keys.insert(key.kid, key.bytes);
        }
        // The active signing key always verifies, even if the verification
        // document lags one rotation behind.
        let signing = self.signing_key().await?;
        keys.entry(signing.kid).or_insert(signing.bytes);
        self.cache.write().await.trusted = Some((keys.clone(), self.clock.now()));
        Ok(keys)
    }
}

/// Fixed in-memory keys for tests.
#[derive(Clone)]
pub struct StaticKeys {
    signing: SigningKey,
    trusted: HashMap<String, Vec<u8>>,
}

impl StaticKeys {
    /// Single key trusted for both signing and verification.
    pub fn single(kid: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let signing = SigningKey {
            kid: kid.into(),
            bytes: bytes.into(),
        };
        let mut trusted = HashMap::new();
        trusted.insert(signing.kid.clone(), signing.bytes.clone());
        Self { signing, trusted }
    }

    /// Add an extra verification-only key.
    pub fn with_trusted(mut self, kid: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.trusted.insert(kid.into(), bytes.into());
        self
    }
}

impl std::fmt::Debug for StaticKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticKeys")
            .field("kid", &self.signing.kid)
            .finish()
    }
}

#[async_trait]
impl SigningKeys for StaticKeys {
    async fn signing_key(&self) -> Result<SigningKey, KeyError> {
        Ok(self.signing.clone())
    }

    async fn trusted_keys(&self) -> Result<HashMap<String, Vec<u8>>, KeyError> {
        Ok(self.trusted.clone())
    }
}
