use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier, Version};
use password_hash::{PasswordHash, SaltString};

use crate::error::{AppError, AppResult};

/// Argon2id hasher producing PHC strings.
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl Default for PasswordHasher {
    fn default() -> Self { Self { params: Params::default() } }
}

impl PasswordHasher {
    /// Minimal-cost parameters. Only for tests and local fixtures.
    pub fn low_cost() -> Self {
        let params = Params::new(Params::MIN_M_COST, 1, 1, None).unwrap_or_default();
        Self { params }
    }

    pub fn hash(&self, password: &str) -> AppResult<String> {
        let mut salt_bytes = [0u8; 16];
        getrandom::getrandom(&mut salt_bytes).map_err(|e| AppError::internal("rng_unavailable", &e.to_string()))?;
        let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AppError::internal("salt_encoding", &e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let phc = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AppError::internal("hash_failed", &e.to_string()))?
            .to_string();
        Ok(phc)
    }
}

/// Verify against a PHC string; the cost parameters come from the hash itself.
pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}
