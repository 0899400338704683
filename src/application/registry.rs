use std::sync::Arc;

use crate::domain::{Account, AccountId, Customer, CustomerId, generate_account_number};
use crate::storage::Repository;

use super::AppError;

/// Account numbering and account lookups.
#[derive(Clone)]
pub struct AccountRegistry {
    repo: Arc<Repository>,
    attempts: u32,
}

impl AccountRegistry {
    pub fn new(repo: Arc<Repository>, attempts: u32) -> Self {
        Self {
            repo,
            attempts: attempts.max(1),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Draw account numbers until one is not taken.
    ///
    /// The check is advisory: a concurrent opener can still claim the same
    /// number before our insert, which the unique index turns into a
    /// `Conflict` for the caller to retry.
    pub async fn generate_unique_account_number(&self) -> Result<String, AppError> {
        for attempt in 1..=self.attempts {
            let candidate = generate_account_number(&mut rand::thread_rng());
            if !self.repo.account_number_exists(&candidate).await? {
                return Ok(candidate);
            }
            tracing::debug!(attempt, "account number already taken, drawing again");
        }

        Err(AppError::internal(format!(
            "no free account number after {} attempts",
            self.attempts
        )))
    }

    pub async fn account(&self, id: AccountId) -> Result<Account, AppError> {
        self.repo
            .get_account(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {}", id)))
    }

    pub async fn account_by_number(&self, number: &str) -> Result<Account, AppError> {
        self.repo
            .get_account_by_number(number.trim())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {}", number.trim())))
    }

    pub async fn accounts_for_customer(
        &self,
        customer_id: CustomerId,
    ) -> Result<Vec<Account>, AppError> {
        Ok(self.repo.list_accounts_for_customer(customer_id).await?)
    }

    pub async fn customer(&self, id: CustomerId) -> Result<Customer, AppError> {
        self.repo
            .get_customer(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("customer {}", id)))
    }
}
