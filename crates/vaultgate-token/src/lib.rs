#![forbid(unsafe_code)]

//! **vaultgate-token** – Compact signed capability tokens.
//!
//! The engine mints, parses, and validates three-part `header.body.signature`
//! tokens (base64url without padding, HS256 over `header.body`). The signing
//! key lives in the vault and is addressed by a stable `kid`; it is never
//! logged, compared, or serialized outside the signing routine.
//!
//! Callers never reason over booleans: every validation answers with the
//! [`ValidationOutcome`] sum, and temporal checks run against the injected
//! clock with a configurable skew policy (future `iat` tolerance and
//! post-`exp` grace are separate knobs).

pub mod engine;
pub mod keys;

use serde::{Deserialize, Serialize};

pub use engine::{MintedToken, TokenEngine, TokenEngineConfig, TokenError, TokenView};
pub use keys::{KeyError, SigningKey, SigningKeys, StaticKeys, VaultKeyStore};

/// Claim set embedded in every capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer.
    pub iss: String,
    /// Subject – the client identifier.
    pub sub: String,
    /// Audience the token is scoped to.
    pub aud: String,
    /// Absolute expiry (seconds since Unix epoch).
    pub exp: u64,
    /// Issued-at (seconds since Unix epoch).
    pub iat: u64,
    /// Unique token identifier for audit and replay protection.
    pub jti: String,
    /// Capability strings, matched case-sensitively with no hierarchy.
    pub permissions: Vec<String>,
}

impl Claims {
    /// Exact, case-sensitive capability check.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Result of validating a presented token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Token is authentic, timely, and (if requested) capable.
    Valid(Claims),
    /// Token is authentic but past its expiry grace.
    Expired,
    /// Token is valid but lacks the required capability.
    Forbidden {
        /// The capability the caller asked for and the token lacks.
        missing_permission: String,
    },
    /// Token could not be parsed, or its claims are incoherent.
    Malformed {
        /// Safe description of what was wrong.
        reason: String,
    },
    /// Issuer is not in the accepted set.
    UntrustedIssuer,
    /// Audience does not match the validator's.
    UntrustedAudience,
    /// Signature did not verify under any trusted key.
    SignatureMismatch,
    /// Validation succeeded and produced a replacement token
    /// (renewal-on-use); the caller should adopt `token`.
    Renewed {
        /// Fresh compact token.
        token: String,
        /// Claims of the fresh token.
        claims: Claims,
    },
}

impl ValidationOutcome {
    /// Whether the request carrying the token may proceed.
    pub fn is_admitted(&self) -> bool {
        matches!(self, ValidationOutcome::Valid(_) | ValidationOutcome::Renewed { .. })
    }

    /// Short code for audit attributes and error envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationOutcome::Valid(_) => "VALID",
            ValidationOutcome::Expired => "EXPIRED",
            ValidationOutcome::Forbidden { .. } => "FORBIDDEN",
            ValidationOutcome::Malformed { .. } => "MALFORMED",
            ValidationOutcome::UntrustedIssuer => "UNTRUSTED_ISSUER",
            ValidationOutcome::UntrustedAudience => "UNTRUSTED_AUDIENCE",
            ValidationOutcome::SignatureMismatch => "SIGNATURE_MISMATCH",
            ValidationOutcome::Renewed { .. } => "RENEWED",
        }
    }
}

/// Deterministic fingerprint of a client identifier plus the credential
/// version that authenticated it. Keys the at-most-one-mint guarantee.
pub fn credential_fingerprint(client_id: &str, version: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(client_id.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(version.as_bytes());
    hex::encode(hasher.finalize())
}
