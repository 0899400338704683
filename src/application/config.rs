use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime settings for the ledger. Loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// Upper bound on waiting for a single account lock
    pub lock_timeout: Duration,
    /// Account-number draws before giving up
    pub account_number_attempts: u32,
    /// Recent transactions and sessions shown on the dashboard
    pub recent_limit: usize,
    pub customer_history_limit: usize,
    pub admin_history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: database_url_for("bankcore.db"),
            max_connections: 5,
            lock_timeout: Duration::from_secs(5),
            account_number_attempts: 16,
            recent_limit: 10,
            customer_history_limit: 50,
            admin_history_limit: 100,
        }
    }
}

impl EngineConfig {
    /// Read `BANKCORE_*` variables, falling back to defaults for anything
    /// missing or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            database_url: lookup("BANKCORE_DATABASE_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.database_url),
            max_connections: parsed("BANKCORE_MAX_CONNECTIONS")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.max_connections),
            lock_timeout: parsed("BANKCORE_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            account_number_attempts: parsed("BANKCORE_ACCOUNT_NUMBER_ATTEMPTS")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.account_number_attempts),
            recent_limit: parsed("BANKCORE_RECENT_LIMIT")
                .map(|v| v as usize)
                .unwrap_or(defaults.recent_limit),
            customer_history_limit: parsed("BANKCORE_CUSTOMER_HISTORY_LIMIT")
                .map(|v| v as usize)
                .unwrap_or(defaults.customer_history_limit),
            admin_history_limit: parsed("BANKCORE_ADMIN_HISTORY_LIMIT")
                .map(|v| v as usize)
                .unwrap_or(defaults.admin_history_limit),
        }
    }

    /// Point the config at a database file, creating it on first use.
    pub fn with_database_path(mut self, path: &str) -> Self {
        self.database_url = database_url_for(path);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }
}

fn database_url_for(path: &str) -> String {
    format!("sqlite:{}?mode=rwc", path)
}
