use anyhow::Context;
use argon2::{Config, Variant};
use rand::RngCore;

use super::AppError;

/// Turns passwords into stored credentials and checks them back.
pub trait CredentialHasher: Send + Sync {
    fn hash(&self, password: &str) -> Result<String, AppError>;
    fn verify(&self, password: &str, credential: &str) -> bool;
}

/// Argon2id, stored as a PHC string (`$argon2id$v=19$m=...`).
#[derive(Debug, Clone, Copy)]
pub struct Argon2CredentialHasher {
    mem_cost: u32,
    time_cost: u32,
}

impl Argon2CredentialHasher {
    /// Memory cost in KiB and number of passes.
    pub fn with_cost(mem_cost: u32, time_cost: u32) -> Self {
        Self {
            mem_cost: mem_cost.max(8),
            time_cost: time_cost.max(1),
        }
    }
}

impl Default for Argon2CredentialHasher {
    fn default() -> Self {
        Self::with_cost(19 * 1024, 2)
    }
}

impl CredentialHasher for Argon2CredentialHasher {
    fn hash(&self, password: &str) -> Result<String, AppError> {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);

        let config = Config {
            variant: Variant::Argon2id,
            mem_cost: self.mem_cost,
            time_cost: self.time_cost,
            lanes: 1,
            ..Config::default()
        };
        let encoded = argon2::hash_encoded(password.as_bytes(), &salt, &config)
            .context("Failed to hash password")?;
        Ok(encoded)
    }

    fn verify(&self, password: &str, credential: &str) -> bool {
        // Costs are read back from the stored string
        argon2::verify_encoded(credential, password.as_bytes()).unwrap_or(false)
    }
}
