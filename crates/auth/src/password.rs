//! Password hashing.
//!
//! Stored hashes are PHC strings (`$argon2id$v=19$m=...,t=...,p=...$salt$hash`),
//! so every hash carries its own parameters and old hashes keep verifying
//! after the configured cost changes.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher as _, PasswordVerifier as _, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;

use crate::error::PasswordError;

/// Shortest password accepted at registration or on change.
pub const MIN_PASSWORD_LEN: usize = 6;

pub trait PasswordHasher: Send + Sync {
    /// Hash `plaintext` with a fresh random salt.
    fn hash(&self, plaintext: &str) -> Result<String, PasswordError>;

    /// Does `plaintext` match `stored`? A malformed `stored` never matches.
    fn verify(&self, plaintext: &str, stored: &str) -> bool;
}

/// Argon2id in PHC format.
pub struct Argon2Hasher {
    argon2: Argon2<'static>,
}

impl core::fmt::Debug for Argon2Hasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let params = self.argon2.params();
        f.debug_struct("Argon2Hasher")
            .field("memory_kib", &params.m_cost())
            .field("iterations", &params.t_cost())
            .field("parallelism", &params.p_cost())
            .finish()
    }
}

impl Argon2Hasher {
    pub const DEFAULT_MEMORY_KIB: u32 = 64 * 1024;
    pub const DEFAULT_ITERATIONS: u32 = 3;
    pub const DEFAULT_PARALLELISM: u32 = 4;
    const OUTPUT_LEN: usize = 32;

    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, PasswordError> {
        let params = Params::new(memory_kib, iterations, parallelism, Some(Self::OUTPUT_LEN))
            .map_err(|e| PasswordError::Params(e.to_string()))?;
        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        let params = Params::new(
            Self::DEFAULT_MEMORY_KIB,
            Self::DEFAULT_ITERATIONS,
            Self::DEFAULT_PARALLELISM,
            Some(Self::OUTPUT_LEN),
        )
        .unwrap_or_default();
        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(plaintext.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| PasswordError::Hash(e.to_string()))
    }

    fn verify(&self, plaintext: &str, stored: &str) -> bool {
        match PasswordHash::new(stored) {
            Ok(parsed) => self.argon2.verify_password(plaintext.as_bytes(), &parsed).is_ok(),
            Err(_) => false,
        }
    }
}

pub fn validate_password(plaintext: &str) -> Result<(), PasswordError> {
    if plaintext.chars().count() < MIN_PASSWORD_LEN {
        return Err(PasswordError::TooShort(MIN_PASSWORD_LEN));
    }
    Ok(())
}

/// 16 random bytes, hex-encoded. Used when no initial password is configured.
pub fn random_password() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> Argon2Hasher {
        Argon2Hasher::new(64, 1, 1).unwrap()
    }

    #[test]
    fn hashes_verify_and_reject_other_passwords() {
        let hasher = cheap();
        let stored = hasher.hash("correct horse").unwrap();
        assert!(stored.starts_with("$argon2id$v=19$m=64,t=1,p=1$"));
        assert!(hasher.verify("correct horse", &stored));
        assert!(!hasher.verify("battery staple", &stored));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let hasher = cheap();
        assert_ne!(hasher.hash("same").unwrap(), hasher.hash("same").unwrap());
    }

    #[test]
    fn old_hashes_verify_after_parameters_change() {
        let stored = cheap().hash("s3cret!").unwrap();
        let stronger = Argon2Hasher::new(128, 2, 1).unwrap();
        assert!(stronger.verify("s3cret!", &stored));
    }

    #[test]
    fn malformed_hashes_never_match() {
        assert!(!cheap().verify("anything", "not-a-phc-string"));
        assert!(!cheap().verify("", ""));
    }

    #[test]
    fn rejects_unusable_parameters_and_short_passwords() {
        assert!(matches!(Argon2Hasher::new(1, 0, 1), Err(PasswordError::Params(_))));
        assert!(matches!(validate_password("12345"), Err(PasswordError::TooShort(6))));
        validate_password("123456").unwrap();
    }

    #[test]
    fn random_passwords_are_long_and_distinct() {
        let (a, b) = (random_password(), random_password());
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        validate_password(&a).unwrap();
    }

    #[test]
    fn default_parameters() {
        let params = Argon2Hasher::default().argon2.params().clone();
        assert_eq!(params.m_cost(), 65536);
        assert_eq!(params.t_cost(), 3);
        assert_eq!(params.p_cost(), 4);
    }
}
