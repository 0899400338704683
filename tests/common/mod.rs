// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use bankcore::application::{Argon2CredentialHasher, EngineConfig, LedgerService, NewCustomer};
use bankcore::domain::{Account, AccountType, Cents, Principal};
use tempfile::TempDir;

pub const ADMIN_EMAIL: &str = "admin@bank.test";
pub const ADMIN_PASSWORD: &str = "admin-secret";
pub const STAFF_EMAIL: &str = "teller@bank.test";
pub const STAFF_PASSWORD: &str = "teller-secret";
pub const CUSTOMER_PASSWORD: &str = "customer-secret";

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with(EngineConfig::default()).await
}

pub async fn test_service_with(config: EngineConfig) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let config = config.with_database_path(db_path.to_str().unwrap());
    // Low argon2 cost keeps the suite fast; verification reads costs from the hash
    let service = LedgerService::with_config(config)
        .await?
        .with_hasher(Argon2CredentialHasher::with_cost(64, 1));
    Ok((service, temp_dir))
}

/// Test fixture: a bank with one admin and one teller
pub struct TestBank {
    pub service: LedgerService,
    pub admin: Principal,
    pub staff: Principal,
    pub temp_dir: TempDir,
}

impl TestBank {
    pub async fn new() -> Result<Self> {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Result<Self> {
        let (service, temp_dir) = test_service_with(config).await?;

        service
            .bootstrap_admin("Ada Admin", ADMIN_EMAIL, ADMIN_PASSWORD)
            .await?;
        let admin = service
            .authenticate(ADMIN_EMAIL, ADMIN_PASSWORD)
            .await?
            .expect("admin can authenticate");

        service
            .provision_staff(&admin, "Tom Teller", STAFF_EMAIL, STAFF_PASSWORD)
            .await?;
        let staff = service
            .authenticate(STAFF_EMAIL, STAFF_PASSWORD)
            .await?
            .expect("staff can authenticate");

        Ok(Self {
            service,
            admin,
            staff,
            temp_dir,
        })
    }

    /// Provision an active customer with a checking account.
    pub async fn customer(&self, name: &str, email: &str, initial: Cents) -> Result<(Principal, Account)> {
        let provisioned = self
            .service
            .provision_customer(
                &self.staff,
                NewCustomer {
                    name: name.to_string(),
                    email: email.to_string(),
                    password: CUSTOMER_PASSWORD.to_string(),
                    ..Default::default()
                },
                AccountType::Checking,
                initial,
            )
            .await?;

        let principal = self
            .service
            .authenticate(email, CUSTOMER_PASSWORD)
            .await?
            .expect("provisioned customer can authenticate");
        Ok((principal, provisioned.account))
    }

    /// Open another account for the owner of `existing`.
    pub async fn second_account(&self, existing: &Account, initial: Cents) -> Result<Account> {
        let opened = self
            .service
            .open_account(&self.staff, existing.customer_id, AccountType::Savings, initial)
            .await?;
        Ok(opened.account)
    }

    pub async fn balance(&self, account: &Account) -> Result<Cents> {
        Ok(self
            .service
            .get_account(&self.staff, account.id)
            .await?
            .balance_cents)
    }

    pub async fn history_len(&self, account: &Account) -> Result<usize> {
        Ok(self
            .service
            .account_transactions(&self.staff, account.id, None)
            .await?
            .len())
    }
}
