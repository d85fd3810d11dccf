use crate::error::{AppError, Result};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, ParamsBuilder,
};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

/// The memory cost for Argon2 in MB.
const ARGON2_MEMORY_MB: u32 = 19;
/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 3;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 6;

/// Injected credential-hashing capability.
///
/// The gate never commits to a hashing algorithm; it delegates to
/// whatever implementation is wired in at startup. Calls are CPU-bound
/// and should be moved off the async executor by the caller
/// (`tokio::task::spawn_blocking`).
pub trait CredentialHasher: Send + Sync {
    /// Hashes a password into PHC string format.
    fn hash(&self, password: &str) -> Result<String>;
    /// Verifies a password against a stored hash.
    fn verify(&self, password: &str, hash: &str) -> Result<bool>;
}

/// Argon2id-backed `CredentialHasher`.
pub struct Argon2Hasher;

impl Argon2Hasher {
    fn argon2() -> Result<Argon2<'static>> {
        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            ParamsBuilder::new()
                .m_cost(ARGON2_MEMORY_MB * 1024)
                .t_cost(ARGON2_ITERATIONS)
                .p_cost(ARGON2_PARALLELISM)
                .build()
                .map_err(|e| AppError::Crypto(format!("Argon2 params: {}", e)))?,
        ))
    }
}

impl CredentialHasher for Argon2Hasher {
    fn hash(&self, password: &str) -> Result<String> {
        let mut password_bytes = password.as_bytes().to_vec();

        let mut salt_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut salt_bytes);

        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| AppError::Crypto(format!("Salt encoding error: {}", e)))?;

        let hash = Self::argon2()?
            .hash_password(&password_bytes, &salt)
            .map_err(|e| AppError::Crypto(format!("Argon2 hash error: {}", e)))?
            .to_string();

        password_bytes.zeroize();
        tracing::debug!("Password hashed with Argon2id");
        Ok(hash)
    }

    fn verify(&self, password: &str, hash: &str) -> Result<bool> {
        let mut password_bytes = password.as_bytes().to_vec();
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| AppError::Crypto(format!("Hash parse error: {}", e)))?;

        let result = Argon2::default()
            .verify_password(&password_bytes, &parsed_hash)
            .is_ok();

        password_bytes.zeroize();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_roundtrip() {
        let hasher = Argon2Hasher;
        let hash = hasher.hash("correct horse battery staple").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hasher.verify("correct horse battery staple", &hash).unwrap());
        assert!(!hasher.verify("wrong password", &hash).unwrap());
    }

    #[test]
    fn hashes_are_salted() {
        let hasher = Argon2Hasher;
        let a = hasher.hash("same password").unwrap();
        let b = hasher.hash("same password").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn garbage_hash_is_an_error_not_a_match() {
        let hasher = Argon2Hasher;
        assert!(hasher.verify("anything", "not-a-phc-string").is_err());
    }
}
