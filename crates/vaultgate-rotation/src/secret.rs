//! Client secret generation and hashing.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};

/// Generate a fresh client secret: 32 random bytes, base64url.
pub fn generate_client_secret() -> SecretString {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    SecretString::new(URL_SAFE_NO_PAD.encode(bytes))
}

/// Hash a client secret into a salted PHC string.
pub fn hash_client_secret(secret: &SecretString) -> Result<String, String> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| e.to_string())?;
    Argon2::default()
        .hash_password(secret.expose_secret().as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| e.to_string())
}

/// Constant-time verification of a presented secret against a PHC string.
pub fn verify_client_secret(presented: &str, phc_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(phc_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(presented.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secrets_are_unique_and_hashable() {
        let a = generate_client_secret();
        let b = generate_client_secret();
        assert_ne!(a.expose_secret(), b.expose_secret());

        let hash = hash_client_secret(&a).unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_client_secret(a.expose_secret(), &hash));
        assert!(!verify_client_secret(b.expose_secret(), &hash));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_client_secret("anything", "not-a-phc-string"));
    }
}
