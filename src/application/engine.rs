//! The ledger engine: every balance change and its transaction record commit
//! together, or not at all.
//!
//! Each operation follows the same shape:
//!
//! 1. lock the accounts involved (ascending id order, bounded wait),
//! 2. validate against the committed state while the locks are held,
//! 3. open a database transaction whose first statement is a guarded
//!    balance `UPDATE`, append the log row, commit.
//!
//! The guard (`status = 'active' AND balance >= amount`) re-asserts the
//! checks in SQL, so a writer outside this process can only make the unit
//! roll back, never drive a balance negative.

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqliteConnection;

use crate::domain::{
    Account, AccountId, AccountStatus, AccountType, Cents, CustomerId, Transaction,
    format_cents,
};
use crate::storage::{Repository, is_unique_violation};

use super::{AccountLocks, AccountRegistry, AppError};

/// Result of a deposit or withdrawal
#[derive(Debug, Clone)]
pub struct PostingResult {
    pub account: Account,
    pub transaction: Transaction,
}

/// Result of a transfer between two accounts
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub source: Account,
    pub destination: Account,
    pub transaction: Transaction,
}

/// Result of opening an account
#[derive(Debug, Clone)]
pub struct OpenAccountResult {
    pub account: Account,
    /// Present when the account was opened with a positive balance
    pub initial_deposit: Option<Transaction>,
}

pub struct LedgerEngine {
    repo: Arc<Repository>,
    registry: AccountRegistry,
    locks: AccountLocks,
    lock_timeout: Duration,
}

impl LedgerEngine {
    pub fn new(repo: Arc<Repository>, registry: AccountRegistry, lock_timeout: Duration) -> Self {
        Self {
            repo,
            registry,
            locks: AccountLocks::new(),
            lock_timeout,
        }
    }

    pub fn registry(&self) -> &AccountRegistry {
        &self.registry
    }

    // ========================
    // Deposit / withdraw
    // ========================

    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Cents,
        description: Option<String>,
    ) -> Result<PostingResult, AppError> {
        let _guard = self.locks.acquire(&[account_id], self.lock_timeout).await?;

        let account = self.registry.account(account_id).await?;
        ensure_active(&account)?;
        ensure_positive(amount)?;
        if account.balance_cents.checked_add(amount).is_none() {
            return Err(AppError::InvalidAmount(format!(
                "deposit of {} would overflow the balance",
                format_cents(amount)
            )));
        }

        let description = description_or(description, || "Deposit".to_string());
        let mut transaction = Transaction::deposit(account_id, amount, description);

        let mut tx = self.repo.begin().await?;
        if !Repository::credit_account(&mut tx, account_id, amount).await? {
            drop(tx);
            return Err(self.diagnose_rejected_write(account_id, None).await);
        }
        Repository::insert_transaction(&mut tx, &mut transaction).await?;
        let account = self.reload(&mut tx, account_id).await?;
        tx.commit().await?;

        tracing::info!(
            account = %account.account_number,
            amount = amount,
            balance = account.balance_cents,
            sequence = transaction.sequence,
            "deposit committed"
        );
        Ok(PostingResult {
            account,
            transaction,
        })
    }

    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Cents,
        description: Option<String>,
    ) -> Result<PostingResult, AppError> {
        let _guard = self.locks.acquire(&[account_id], self.lock_timeout).await?;

        let account = self.registry.account(account_id).await?;
        ensure_active(&account)?;
        ensure_positive(amount)?;
        ensure_funds(&account, amount)?;

        let description = description_or(description, || "Withdrawal".to_string());
        let mut transaction = Transaction::withdrawal(account_id, amount, description);

        let mut tx = self.repo.begin().await?;
        if !Repository::debit_account(&mut tx, account_id, amount).await? {
            drop(tx);
            return Err(self.diagnose_rejected_write(account_id, Some(amount)).await);
        }
        Repository::insert_transaction(&mut tx, &mut transaction).await?;
        let account = self.reload(&mut tx, account_id).await?;
        tx.commit().await?;

        tracing::info!(
            account = %account.account_number,
            amount = amount,
            balance = account.balance_cents,
            sequence = transaction.sequence,
            "withdrawal committed"
        );
        Ok(PostingResult {
            account,
            transaction,
        })
    }

    // ========================
    // Transfer
    // ========================

    pub async fn transfer(
        &self,
        from_account_id: AccountId,
        to_account_number: &str,
        amount: Cents,
        description: Option<String>,
    ) -> Result<TransferResult, AppError> {
        // Ids and numbers never change, so resolving them before locking is safe
        let source = self.registry.account(from_account_id).await?;
        let destination = self.registry.account_by_number(to_account_number).await?;
        if source.id == destination.id {
            return Err(AppError::InvalidOperation(
                "cannot transfer to the same account".to_string(),
            ));
        }

        let _guard = self
            .locks
            .acquire(&[source.id, destination.id], self.lock_timeout)
            .await?;

        let source = self.registry.account(source.id).await?;
        let destination = self.registry.account(destination.id).await?;
        ensure_active(&source)?;
        ensure_active(&destination)?;
        ensure_positive(amount)?;
        ensure_funds(&source, amount)?;
        if destination.balance_cents.checked_add(amount).is_none() {
            return Err(AppError::InvalidAmount(format!(
                "transfer of {} would overflow the destination balance",
                format_cents(amount)
            )));
        }

        let description = description_or(description, || {
            format!("Transfer to {}", destination.account_number)
        });
        let mut transaction = Transaction::transfer(source.id, destination.id, amount, description);

        let mut tx = self.repo.begin().await?;
        if !Repository::debit_account(&mut tx, source.id, amount).await? {
            drop(tx);
            return Err(self.diagnose_rejected_write(source.id, Some(amount)).await);
        }
        if !Repository::credit_account(&mut tx, destination.id, amount).await? {
            drop(tx);
            return Err(self.diagnose_rejected_write(destination.id, None).await);
        }
        Repository::insert_transaction(&mut tx, &mut transaction).await?;
        let source = self.reload(&mut tx, source.id).await?;
        let destination = self.reload(&mut tx, destination.id).await?;
        tx.commit().await?;

        tracing::info!(
            from = %source.account_number,
            to = %destination.account_number,
            amount = amount,
            sequence = transaction.sequence,
            "transfer committed"
        );
        Ok(TransferResult {
            source,
            destination,
            transaction,
        })
    }

    // ========================
    // Account lifecycle
    // ========================

    /// Open an account for an existing customer, recording the initial
    /// balance as a deposit in the same unit.
    pub async fn open_account(
        &self,
        customer_id: CustomerId,
        account_type: AccountType,
        initial_balance: Cents,
    ) -> Result<OpenAccountResult, AppError> {
        self.registry.customer(customer_id).await?;
        ensure_opening_balance(initial_balance)?;

        for attempt in 1..=self.registry.attempts() {
            let number = self.registry.generate_unique_account_number().await?;

            let mut tx = self.repo.begin().await?;
            match Self::open_account_in(&mut tx, customer_id, number, account_type, initial_balance)
                .await
            {
                Ok(opened) => {
                    tx.commit().await?;
                    tracing::info!(
                        account = %opened.account.account_number,
                        customer_id = %customer_id,
                        initial_balance,
                        "account opened"
                    );
                    return Ok(opened);
                }
                Err(AppError::Conflict(reason)) => {
                    tracing::warn!(attempt, %reason, "account number collision, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        Err(AppError::internal("account number allocation kept colliding"))
    }

    /// Insert an account (and its initial deposit) inside an open unit.
    /// A lost race on the account number surfaces as `Conflict`; the caller
    /// rolls back and retries with a fresh number.
    pub(crate) async fn open_account_in(
        conn: &mut SqliteConnection,
        customer_id: CustomerId,
        account_number: String,
        account_type: AccountType,
        initial_balance: Cents,
    ) -> Result<OpenAccountResult, AppError> {
        ensure_opening_balance(initial_balance)?;
        let account = Account::new(customer_id, account_number, account_type, initial_balance);

        if let Err(err) = Repository::insert_account(&mut *conn, &account).await {
            if is_unique_violation(&err, "accounts.account_number") {
                return Err(AppError::Conflict(format!(
                    "account number {} already taken",
                    account.account_number
                )));
            }
            return Err(err.into());
        }

        let initial_deposit = if initial_balance > 0 {
            let mut deposit = Transaction::deposit(account.id, initial_balance, "Initial deposit");
            Repository::insert_transaction(&mut *conn, &mut deposit).await?;
            Some(deposit)
        } else {
            None
        };

        Ok(OpenAccountResult {
            account,
            initial_deposit,
        })
    }

    /// Move an account between active and blocked, or close it for good.
    pub async fn set_account_status(
        &self,
        account_id: AccountId,
        status: AccountStatus,
    ) -> Result<Account, AppError> {
        let _guard = self.locks.acquire(&[account_id], self.lock_timeout).await?;

        let account = self.registry.account(account_id).await?;
        if account.status == status {
            return Ok(account);
        }
        if account.status == AccountStatus::Closed {
            return Err(AppError::InvalidOperation(format!(
                "account {} is closed",
                account.account_number
            )));
        }
        if status == AccountStatus::Closed && account.balance_cents != 0 {
            return Err(AppError::InvalidOperation(format!(
                "account {} still holds {}",
                account.account_number,
                format_cents(account.balance_cents)
            )));
        }

        let mut tx = self.repo.begin().await?;
        Repository::set_account_status(&mut tx, account_id, status).await?;
        let account = self.reload(&mut tx, account_id).await?;
        tx.commit().await?;

        tracing::info!(account = %account.account_number, %status, "account status changed");
        Ok(account)
    }

    // ========================
    // Helpers
    // ========================

    async fn reload(
        &self,
        conn: &mut SqliteConnection,
        account_id: AccountId,
    ) -> Result<Account, AppError> {
        Repository::fetch_account(&mut *conn, account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {}", account_id)))
    }

    /// A guarded update matched no row although validation passed under the
    /// lock. Re-read the account to report what changed underneath us.
    async fn diagnose_rejected_write(
        &self,
        account_id: AccountId,
        required: Option<Cents>,
    ) -> AppError {
        tracing::warn!(account_id = %account_id, "guarded balance update rejected, re-checking account");

        let account = match self.registry.account(account_id).await {
            Ok(account) => account,
            Err(err) => return err,
        };
        if let Err(err) = ensure_active(&account) {
            return err;
        }
        if let Some(required) = required {
            if let Err(err) = ensure_funds(&account, required) {
                return err;
            }
        }
        AppError::internal(format!(
            "balance update for account {} was rejected",
            account.account_number
        ))
    }
}

fn ensure_active(account: &Account) -> Result<(), AppError> {
    if account.is_active() {
        Ok(())
    } else {
        Err(AppError::InvalidState(format!(
            "account {} is {}",
            account.account_number, account.status
        )))
    }
}

fn ensure_positive(amount: Cents) -> Result<(), AppError> {
    if amount > 0 {
        Ok(())
    } else {
        Err(AppError::InvalidAmount(format!(
            "amount must be positive, got {}",
            format_cents(amount)
        )))
    }
}

fn ensure_opening_balance(initial_balance: Cents) -> Result<(), AppError> {
    if initial_balance < 0 {
        return Err(AppError::InvalidAmount(format!(
            "initial balance cannot be negative, got {}",
            format_cents(initial_balance)
        )));
    }
    Ok(())
}

fn ensure_funds(account: &Account, required: Cents) -> Result<(), AppError> {
    if account.balance_cents < required {
        return Err(AppError::InsufficientFunds {
            account_number: account.account_number.clone(),
            balance: account.balance_cents,
            required,
        });
    }
    Ok(())
}

fn description_or(description: Option<String>, default: impl FnOnce() -> String) -> String {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(default)
}
