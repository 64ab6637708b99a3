//! Mint, parse, and validate compact signed tokens.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Deserialize;
use uuid::Uuid;

use vaultgate_types::Clock;

use crate::keys::{KeyError, SigningKeys};
use crate::{Claims, ValidationOutcome};

/// Engine behaviour knobs. Skews are asymmetric on purpose: a token may be
/// *issued* up to `iat_skew` in the future (fleet clock drift on the minter)
/// and *accepted* up to `exp_skew` past expiry (drift on the validator).
#[derive(Debug, Clone)]
pub struct TokenEngineConfig {
    /// `iss` stamped on minted tokens.
    pub issuer: String,
    /// `aud` stamped on minted tokens and required on verification.
    pub audience: String,
    /// Issuers accepted on verification.
    pub accepted_issuers: Vec<String>,
    /// Lifetime of minted tokens unless the caller overrides it.
    pub default_ttl: Duration,
    /// Tolerance for `iat` lying in the future.
    pub iat_skew: Duration,
    /// Grace after `exp` during which a token is still accepted.
    pub exp_skew: Duration,
    /// Remaining lifetime under which a token should be renewed on use.
    pub renewal_threshold: Duration,
}

impl TokenEngineConfig {
    /// Spec defaults: 1 h tokens, 60 s future-`iat` tolerance, 30 s expiry
    /// grace, 5 min renewal threshold.
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        let issuer = issuer.into();
        Self {
            accepted_issuers: vec![issuer.clone()],
            issuer,
            audience: audience.into(),
            default_ttl: Duration::seconds(3600),
            iat_skew: Duration::seconds(60),
            exp_skew: Duration::seconds(30),
            renewal_threshold: Duration::seconds(300),
        }
    }
}

/// Token minting / signing failures.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The signing key could not be resolved.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// The JWT library refused to sign.
    #[error("signing failed: {0}")]
    Signing(String),
}

/// A freshly minted token with its claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedToken {
    /// Compact serialized form.
    pub raw: String,
    /// The claims that were signed.
    pub claims: Claims,
}

/// Header fields exposed by [`TokenEngine::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParsedHeader {
    /// Signature algorithm tag.
    pub alg: String,
    /// Token type tag.
    #[serde(default)]
    pub typ: Option<String>,
    /// Key identifier.
    #[serde(default)]
    pub kid: Option<String>,
}

/// Parsed-but-unverified view of a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenView {
    /// Decoded header.
    pub header: ParsedHeader,
    /// Decoded claims. Untrusted until verified.
    pub claims: Claims,
}

/// Signs, parses, validates, and renews capability tokens.
pub struct TokenEngine {
    config: TokenEngineConfig,
    keys: Arc<dyn SigningKeys>,
    clock: Arc<dyn Clock>,
}

impl TokenEngine {
    /// Engine over a key store and clock.
    pub fn new(config: TokenEngineConfig, keys: Arc<dyn SigningKeys>, clock: Arc<dyn Clock>) -> Self {
        Self { config, keys, clock }
    }

    /// Engine configuration.
    pub fn config(&self) -> &TokenEngineConfig {
        &self.config
    }

    /// Mint a token for `subject` with `permissions`, using `ttl` or the
    /// configured default.
    pub async fn mint(
        &self,
        subject: &str,
        permissions: Vec<String>,
        ttl: Option<Duration>,
    ) -> Result<MintedToken, TokenError> {
        let now = self.clock.now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let claims = Claims {
            iss: self.config.issuer.clone(),
            sub: subject.to_string(),
            aud: self.config.audience.clone(),
            iat: now.timestamp().max(0) as u64,
            exp: (now + ttl).timestamp().max(0) as u64,
            jti: Uuid::new_v4().to_string(),
            permissions,
        };
        let raw = self.sign(&claims).await?;
        Ok(MintedToken { raw, claims })
    }

    /// Sign `claims` under the current vault key. The key bytes never leave
    /// this routine.
    pub async fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let key = self.keys.signing_key().await?;
        let mut header = Header::new(Algorithm::HS256);
        header.typ = Some("JWT".into());
        header.kid = Some(key.kid.clone());
        encode(&header, claims, &EncodingKey::from_secret(&key.bytes))
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Decode the three-part form without verifying the signature.
    pub fn parse(&self, raw: &str) -> Result<TokenView, String> {
        let mut parts = raw.split('.');
        let (header_b64, body_b64, signature_b64) =
            match (parts.next(), parts.next(), parts.next(), parts.next()) {
                (Some(h), Some(b), Some(s), None) => (h, b, s),
                _ => return Err("token is not three dot-separated parts".into()),
            };
        if signature_b64.is_empty() {
            return Err("empty signature part".into());
        }
        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64.as_bytes())
            .map_err(|_| "header is not base64url".to_string())?;
        let body_bytes = URL_SAFE_NO_PAD
            .decode(body_b64.as_bytes())
            .map_err(|_| "body is not base64url".to_string())?;
        let header: ParsedHeader =
            serde_json::from_slice(&header_bytes).map_err(|_| "header is not valid JSON".to_string())?;
        let claims: Claims =
            serde_json::from_slice(&body_bytes).map_err(|_| "claims are not valid JSON".to_string())?;
        Ok(TokenView { header, claims })
    }

    /// Resolve trusted keys, then validate.
    pub async fn verify(
        &self,
        raw: &str,
        required_permission: Option<&str>,
    ) -> Result<ValidationOutcome, KeyError> {
        let trusted = self.keys.trusted_keys().await?;
        Ok(self.verify_with_keys(raw, &trusted, required_permission))
    }

    /// Validate `raw` against an explicit trusted-key set.
    ///
    /// The checks run in fixed order: structure, key trust, signature,
    /// issuer, audience, issuance skew, expiry, capability. The first
    /// failure wins.
    pub fn verify_with_keys(
        &self,
        raw: &str,
        trusted: &HashMap<String, Vec<u8>>,
        required_permission: Option<&str>,
    ) -> ValidationOutcome {
        let view = match self.parse(raw) {
            Ok(view) => view,
            Err(reason) => return ValidationOutcome::Malformed { reason },
        };
        let Some(kid) = view.header.kid.as_deref() else {
            return ValidationOutcome::Malformed {
                reason: "header has no kid".into(),
            };
        };
        let Some(key_bytes) = trusted.get(kid) else {
            return ValidationOutcome::SignatureMismatch;
        };

        // Signature only; temporal checks run below against our clock.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims = Default::default();
        let claims = match decode::<Claims>(raw, &DecodingKey::from_secret(key_bytes), &validation) {
            Ok(data) => data.claims,
            Err(err) => {
                return match err.kind() {
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        ValidationOutcome::SignatureMismatch
                    }
                    _ => ValidationOutcome::Malformed {
                        reason: "undecodable token".into(),
                    },
                }
            }
        };

        if !self.config.accepted_issuers.iter().any(|iss| *iss == claims.iss) {
            return ValidationOutcome::UntrustedIssuer;
        }
        if claims.aud != self.config.audience {
            return ValidationOutcome::UntrustedAudience;
        }
        if claims.exp <= claims.iat {
            return ValidationOutcome::Malformed {
                reason: "expiry not after issuance".into(),
            };
        }

        let now = self.clock.now();
        let issued_at = timestamp_to_instant(claims.iat);
        if issued_at - now > self.config.iat_skew {
            return ValidationOutcome::Malformed {
                reason: "issued in the future beyond skew".into(),
            };
        }
        if self.is_expired_with_grace(&claims, now) {
            return ValidationOutcome::Expired;
        }

        if let Some(required) = required_permission {
            if !claims.has_permission(required) {
                return ValidationOutcome::Forbidden {
                    missing_permission: required.to_string(),
                };
            }
        }
        ValidationOutcome::Valid(claims)
    }

    /// Strict expiry: a token exactly at `exp` is already expired.
    pub fn is_expired(&self, claims: &Claims, now: DateTime<Utc>) -> bool {
        now >= timestamp_to_instant(claims.exp)
    }

    /// Expiry with the configured post-`exp` grace applied.
    fn is_expired_with_grace(&self, claims: &Claims, now: DateTime<Utc>) -> bool {
        now >= timestamp_to_instant(claims.exp) + self.config.exp_skew
    }

    /// Whether the token is close enough to expiry to renew on use.
    pub fn should_renew(&self, claims: &Claims, now: DateTime<Utc>) -> bool {
        timestamp_to_instant(claims.exp) - now <= self.config.renewal_threshold
    }

    /// Mint a replacement token carrying the same subject and capabilities.
    pub async fn renew_from(&self, claims: &Claims) -> Result<MintedToken, TokenError> {
        self.mint(&claims.sub, claims.permissions.clone(), None).await
    }
}

impl std::fmt::Debug for TokenEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEngine")
            .field("issuer", &self.config.issuer)
            .field("audience", &self.config.audience)
            .finish()
    }
}

fn timestamp_to_instant(secs: u64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs.min(i64::MAX as u64) as i64, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
