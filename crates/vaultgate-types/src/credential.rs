//! Client credential model.
//!
//! A client (vendor) owns one [`ClientRecord`] holding up to two active
//! [`CredentialVersion`]s: exactly one outside a rotation, the outgoing and
//! incoming versions while a rotation's dual-validity window is open. The
//! raw secret never appears here – only its salted, constant-time-comparable
//! digest in PHC string form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on client identifier length.
pub const MAX_CLIENT_ID_LEN: usize = 50;

/// One version of a client's credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialVersion {
    /// Opaque client identifier, unique across the platform.
    pub client_id: String,
    /// Salted argon2 digest of the secret in PHC string format.
    pub secret_hash: String,
    /// Monotonic version tag per client (e.g. `v1`, `v2`).
    pub version: String,
    /// Whether this version is currently accepted for authentication.
    pub active: bool,
    /// When this version was written to the vault.
    pub created_at: DateTime<Utc>,
    /// Optional hard expiry for this version.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialVersion {
    /// Whether this version may authenticate at `now`: it must be active and
    /// not past its hard expiry.
    pub fn accepts_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// Everything the facade needs to know about one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    /// Opaque client identifier.
    pub client_id: String,
    /// Capability strings granted to tokens minted for this client
    /// (e.g. `process_payment`, `view_status`).
    pub permissions: Vec<String>,
    /// Credential versions, newest last. At most two may be active.
    pub versions: Vec<CredentialVersion>,
}

impl ClientRecord {
    /// Validate structural invariants: identifier length and the two-active
    /// ceiling.
    pub fn validate(&self) -> Result<(), String> {
        if self.client_id.trim().is_empty() {
            return Err("client identifier cannot be empty".into());
        }
        if self.client_id.len() > MAX_CLIENT_ID_LEN {
            return Err(format!(
                "client identifier too long ({} > {})",
                self.client_id.len(),
                MAX_CLIENT_ID_LEN
            ));
        }
        let active = self.versions.iter().filter(|v| v.active).count();
        if active > 2 {
            return Err(format!("{active} active credential versions, at most 2 allowed"));
        }
        Ok(())
    }

    /// Versions currently accepted for authentication.
    pub fn active_versions(&self, now: DateTime<Utc>) -> Vec<&CredentialVersion> {
        self.versions.iter().filter(|v| v.accepts_at(now)).collect()
    }

    /// Look up a version by tag.
    pub fn version(&self, tag: &str) -> Option<&CredentialVersion> {
        self.versions.iter().find(|v| v.version == tag)
    }
}

/// Vault-stored document for one credential version.
///
/// Each vault version at `credentials/{clientId}/current` holds one of
/// these; the version tag and enabled flag live in the vault's version
/// metadata, not in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Salted argon2 digest of the secret, PHC string format.
    pub secret_hash: String,
    /// Capabilities granted to tokens minted for this client.
    pub permissions: Vec<String>,
    /// When the version was created.
    pub created_at: DateTime<Utc>,
}

/// Mask an identifier to its first four and last four characters.
///
/// Identifiers shorter than nine characters are fully masked so the mask
/// never reveals more than half of the original.
pub fn mask_identifier(id: &str) -> String {
    if id.len() < 9 {
        return "***".to_string();
    }
    let head: String = id.chars().take(4).collect();
    let tail: String = id.chars().skip(id.chars().count() - 4).collect();
    format!("{head}***{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(tag: &str, active: bool) -> CredentialVersion {
        CredentialVersion {
            client_id: "vendor-A".into(),
            secret_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".into(),
            version: tag.into(),
            active,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[test]
    fn masks_long_identifiers() {
        assert_eq!(mask_identifier("abcdefghijklmnopqrstuvwxyz"), "abcd***wxyz");
    }

    #[test]
    fn masks_short_identifiers_entirely() {
        assert_eq!(mask_identifier("short"), "***");
        assert_eq!(mask_identifier("12345678"), "***");
        assert_eq!(mask_identifier("123456789"), "1234***6789");
    }

    #[test]
    fn rejects_more_than_two_active_versions() {
        let record = ClientRecord {
            client_id: "vendor-A".into(),
            permissions: vec!["process_payment".into()],
            versions: vec![version("v1", true), version("v2", true), version("v3", true)],
        };
        assert!(record.validate().is_err());
    }

    #[test]
    fn dual_active_is_allowed() {
        let record = ClientRecord {
            client_id: "vendor-A".into(),
            permissions: vec![],
            versions: vec![version("v1", true), version("v2", true)],
        };
        assert!(record.validate().is_ok());
        assert_eq!(record.active_versions(Utc::now()).len(), 2);
    }

    #[test]
    fn expired_version_not_accepted() {
        let mut v = version("v1", true);
        v.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(!v.accepts_at(Utc::now()));
    }

    #[test]
    fn rejects_overlong_client_id() {
        let record = ClientRecord {
            client_id: "x".repeat(MAX_CLIENT_ID_LEN + 1),
            permissions: vec![],
            versions: vec![],
        };
        assert!(record.validate().is_err());
    }
}
