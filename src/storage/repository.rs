use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Executor, Row, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, AccountStatus, AccountType, Cents, Customer, CustomerId, CustomerProfile,
    Role, Session, SessionSummary, Transaction, TransactionType, TransactionView, User, UserId,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_SESSIONS};

/// A database transaction: the atomic unit every ledger mutation runs in.
pub type DbTransaction = sqlx::Transaction<'static, Sqlite>;

/// Aggregate counters for the admin dashboard.
#[derive(Debug, Clone, Default)]
pub struct DashboardCounts {
    pub total_users: i64,
    pub total_customers: i64,
    pub total_staff: i64,
    pub total_accounts: i64,
    pub total_balance: Cents,
    pub total_transactions: i64,
}

const USER_COLUMNS: &str =
    "id, name, email, password_hash, role, is_active, created_by, created_at";

/// A customer who registered themselves and has not been reviewed yet.
const PENDING_USER_GUARD: &str = "role = 'customer' AND is_active = 0 AND created_by IS NULL";

const ACCOUNT_COLUMNS: &str =
    "id, customer_id, account_number, balance_cents, account_type, status, created_at";

const TRANSACTION_COLUMNS: &str =
    "id, sequence, from_account_id, to_account_id, amount_cents, transaction_type, timestamp, description";

const TRANSACTION_VIEW_SELECT: &str = r#"
    SELECT t.id, t.sequence, t.from_account_id, t.to_account_id, t.amount_cents,
           t.transaction_type, t.timestamp, t.description,
           fa.account_number AS from_number, ta.account_number AS to_number
    FROM transactions t
    LEFT JOIN accounts fa ON fa.id = t.from_account_id
    LEFT JOIN accounts ta ON ta.id = t.to_account_id
"#;

/// Repository for persisting and querying the ledger.
///
/// Reads that do not gate a mutation go through the pool (`&self` methods).
/// Writes are associated functions taking a connection, so callers can group
/// them into one atomic unit via [`Repository::begin`].
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database.
    /// Creates the database file if it doesn't exist when `create` is set.
    pub async fn connect(database_url: &str, max_connections: u32, create: bool) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url: {}", database_url))?
            .create_if_missing(create)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations. Safe to run more than once.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::query(MIGRATION_002_SESSIONS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str, max_connections: u32) -> Result<Self> {
        let repo = Self::connect(database_url, max_connections, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    /// Start an atomic unit. Dropping it without `commit` rolls back.
    pub async fn begin(&self) -> Result<DbTransaction> {
        self.pool.begin().await.context("Failed to begin transaction")
    }

    // ========================
    // User operations
    // ========================

    pub async fn insert_user(conn: &mut SqliteConnection, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, password_hash, role, is_active, created_by, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.to_string())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.is_active)
        .bind(user.created_by.map(|id| id.to_string()))
        .bind(encode_ts(&user.created_at))
        .execute(conn)
        .await
        .context("Failed to save user")?;
        Ok(())
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by email")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM users ORDER BY created_at, email",
            USER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list users")?;

        rows.iter().map(Self::row_to_user).collect()
    }

    pub async fn count_users_with_role(&self, role: Role) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users WHERE role = ?")
            .bind(role.as_str())
            .fetch_one(&self.pool)
            .await
            .context("Failed to count users")?;
        Ok(row.get("count"))
    }

    /// Returns false if no such user exists.
    pub async fn set_user_active(
        conn: &mut SqliteConnection,
        id: UserId,
        is_active: bool,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(is_active)
            .bind(id.to_string())
            .execute(conn)
            .await
            .context("Failed to update user status")?;
        Ok(result.rows_affected() == 1)
    }

    /// Activate a self-registered customer. Returns false unless the user is
    /// still pending when the write lands.
    pub async fn activate_pending_user(conn: &mut SqliteConnection, id: UserId) -> Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE users SET is_active = 1 WHERE id = ? AND {}",
            PENDING_USER_GUARD
        ))
        .bind(id.to_string())
        .execute(conn)
        .await
        .context("Failed to activate user")?;
        Ok(result.rows_affected() == 1)
    }

    /// Take the write lock on a pending user ahead of deleting it.
    /// Returns false unless the user is still pending.
    pub async fn claim_pending_user(conn: &mut SqliteConnection, id: UserId) -> Result<bool> {
        let result = sqlx::query(&format!(
            "UPDATE users SET is_active = 0 WHERE id = ? AND {}",
            PENDING_USER_GUARD
        ))
        .bind(id.to_string())
        .execute(conn)
        .await
        .context("Failed to claim pending user")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_user(conn: &mut SqliteConnection, id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to delete sessions")?;
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to delete user")?;
        Ok(())
    }

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        let role_str: String = row.get("role");
        let created_by: Option<String> = row.get("created_by");

        Ok(User {
            id: decode_id(row, "id")?,
            name: row.get("name"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            role: Role::from_str(&role_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid role: {}", role_str))?,
            is_active: row.get::<i64, _>("is_active") != 0,
            created_by: created_by
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .context("Invalid created_by ID")?,
            created_at: decode_ts(row, "created_at")?,
        })
    }

    // ========================
    // Customer operations
    // ========================

    pub async fn insert_customer(conn: &mut SqliteConnection, customer: &Customer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO customers (id, user_id, phone, address, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(customer.id.to_string())
        .bind(customer.user_id.to_string())
        .bind(&customer.phone)
        .bind(&customer.address)
        .bind(encode_ts(&customer.created_at))
        .execute(conn)
        .await
        .context("Failed to save customer")?;
        Ok(())
    }

    pub async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        let row = sqlx::query(
            "SELECT id, user_id, phone, address, created_at FROM customers WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch customer")?;

        row.as_ref().map(Self::row_to_customer).transpose()
    }

    pub async fn get_customer_by_user(&self, user_id: UserId) -> Result<Option<Customer>> {
        let row = sqlx::query(
            "SELECT id, user_id, phone, address, created_at FROM customers WHERE user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch customer by user")?;

        row.as_ref().map(Self::row_to_customer).transpose()
    }

    /// List customer profiles joined with their users.
    /// With `pending_only`, only inactive self-registered customers are returned.
    pub async fn list_customer_profiles(&self, pending_only: bool) -> Result<Vec<CustomerProfile>> {
        let mut query = String::from(
            r#"
            SELECT c.id, c.user_id, c.phone, c.address, c.created_at,
                   u.name, u.email, u.is_active
            FROM customers c
            JOIN users u ON u.id = c.user_id
            WHERE u.role = 'customer'
            "#,
        );
        if pending_only {
            query.push_str(" AND u.is_active = 0 AND u.created_by IS NULL");
        }
        query.push_str(" ORDER BY c.created_at, u.email");

        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list customers")?;

        rows.iter()
            .map(|row| {
                Ok(CustomerProfile {
                    customer: Self::row_to_customer(row)?,
                    name: row.get("name"),
                    email: row.get("email"),
                    is_active: row.get::<i64, _>("is_active") != 0,
                })
            })
            .collect()
    }

    pub async fn delete_customer(conn: &mut SqliteConnection, id: CustomerId) -> Result<()> {
        sqlx::query("DELETE FROM customers WHERE id = ?")
            .bind(id.to_string())
            .execute(conn)
            .await
            .context("Failed to delete customer")?;
        Ok(())
    }

    fn row_to_customer(row: &SqliteRow) -> Result<Customer> {
        Ok(Customer {
            id: decode_id(row, "id")?,
            user_id: decode_id(row, "user_id")?,
            phone: row.get("phone"),
            address: row.get("address"),
            created_at: decode_ts(row, "created_at")?,
        })
    }

    // ========================
    // Account operations
    // ========================

    pub async fn insert_account(conn: &mut SqliteConnection, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (id, customer_id, account_number, balance_cents, account_type, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(account.customer_id.to_string())
        .bind(&account.account_number)
        .bind(account.balance_cents)
        .bind(account.account_type.as_str())
        .bind(account.status.as_str())
        .bind(encode_ts(&account.created_at))
        .execute(conn)
        .await
        .context("Failed to save account")?;
        Ok(())
    }

    /// Fetch an account through any executor (pool or open transaction).
    pub async fn fetch_account<'e, E>(executor: E, id: AccountId) -> Result<Option<Account>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row = sqlx::query(&format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS))
            .bind(id.to_string())
            .fetch_optional(executor)
            .await
            .context("Failed to fetch account")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        Self::fetch_account(&self.pool, id).await
    }

    pub async fn get_account_by_number(&self, number: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE account_number = ?",
            ACCOUNT_COLUMNS
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account by number")?;

        row.as_ref().map(Self::row_to_account).transpose()
    }

    pub async fn account_number_exists(&self, number: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM accounts WHERE account_number = ?")
            .bind(number)
            .fetch_one(&self.pool)
            .await
            .context("Failed to check account number")?;
        Ok(row.get::<i64, _>("count") > 0)
    }

    pub async fn list_accounts_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts WHERE customer_id = ? ORDER BY created_at, account_number",
            ACCOUNT_COLUMNS
        ))
        .bind(customer_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts for customer")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM accounts ORDER BY created_at, account_number",
            ACCOUNT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list accounts")?;

        rows.iter().map(Self::row_to_account).collect()
    }

    /// The user that owns an account, through its customer profile.
    pub async fn get_account_owner(&self, account_id: AccountId) -> Result<Option<UserId>> {
        let row = sqlx::query(
            r#"
            SELECT c.user_id
            FROM accounts a
            JOIN customers c ON c.id = a.customer_id
            WHERE a.id = ?
            "#,
        )
        .bind(account_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch account owner")?;

        row.as_ref().map(|r| decode_id(r, "user_id")).transpose()
    }

    /// Add to an active account's balance.
    /// Returns false if the account is missing or not active.
    pub async fn credit_account(
        conn: &mut SqliteConnection,
        id: AccountId,
        amount: Cents,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents + ?
            WHERE id = ? AND status = 'active'
            "#,
        )
        .bind(amount)
        .bind(id.to_string())
        .execute(conn)
        .await
        .context("Failed to credit account")?;
        Ok(result.rows_affected() == 1)
    }

    /// Subtract from an active account's balance, never below zero.
    /// Returns false if the account is missing, not active, or short of funds.
    pub async fn debit_account(
        conn: &mut SqliteConnection,
        id: AccountId,
        amount: Cents,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance_cents = balance_cents - ?
            WHERE id = ? AND status = 'active' AND balance_cents >= ?
            "#,
        )
        .bind(amount)
        .bind(id.to_string())
        .bind(amount)
        .execute(conn)
        .await
        .context("Failed to debit account")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_account_status(
        conn: &mut SqliteConnection,
        id: AccountId,
        status: AccountStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE accounts SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(conn)
            .await
            .context("Failed to update account status")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete_accounts_for_customer(
        conn: &mut SqliteConnection,
        customer_id: CustomerId,
    ) -> Result<u64> {
        let result = sqlx::query("DELETE FROM accounts WHERE customer_id = ?")
            .bind(customer_id.to_string())
            .execute(conn)
            .await
            .context("Failed to delete accounts")?;
        Ok(result.rows_affected())
    }

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let account_type_str: String = row.get("account_type");
        let status_str: String = row.get("status");

        Ok(Account {
            id: decode_id(row, "id")?,
            customer_id: decode_id(row, "customer_id")?,
            account_number: row.get("account_number"),
            balance_cents: row.get("balance_cents"),
            account_type: AccountType::from_str(&account_type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account type: {}", account_type_str))?,
            status: AccountStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid account status: {}", status_str))?,
            created_at: decode_ts(row, "created_at")?,
        })
    }

    // ========================
    // Transaction log
    // ========================

    /// Append a transaction to the log.
    /// Assigns the next sequence number within the caller's atomic unit.
    pub async fn insert_transaction(
        conn: &mut SqliteConnection,
        transaction: &mut Transaction,
    ) -> Result<()> {
        transaction.sequence = Self::next_sequence(&mut *conn).await?;

        sqlx::query(
            r#"
            INSERT INTO transactions (id, sequence, from_account_id, to_account_id, amount_cents, transaction_type, timestamp, description)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(transaction.id.to_string())
        .bind(transaction.sequence)
        .bind(transaction.from_account.map(|id| id.to_string()))
        .bind(transaction.to_account.map(|id| id.to_string()))
        .bind(transaction.amount_cents)
        .bind(transaction.transaction_type.as_str())
        .bind(encode_ts(&transaction.timestamp))
        .bind(&transaction.description)
        .execute(conn)
        .await
        .context("Failed to save transaction")?;

        Ok(())
    }

    /// Get the next sequence number and increment the counter.
    async fn next_sequence(conn: &mut SqliteConnection) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(conn)
        .await
        .context("Failed to get next sequence number")?;

        Ok(row.get("value"))
    }

    /// Every transaction touching an account, most recent first.
    pub async fn list_transactions_for_account(
        &self,
        account_id: AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionView>> {
        let query = format!(
            "{} WHERE t.from_account_id = ? OR t.to_account_id = ? \
             ORDER BY t.timestamp DESC, t.sequence DESC LIMIT ?",
            TRANSACTION_VIEW_SELECT
        );

        let rows = sqlx::query(&query)
            .bind(account_id.to_string())
            .bind(account_id.to_string())
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions for account")?;

        rows.iter().map(Self::row_to_transaction_view).collect()
    }

    /// Every transaction touching any of a customer's accounts, most recent first.
    pub async fn list_transactions_for_customer(
        &self,
        customer_id: CustomerId,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionView>> {
        let query = format!(
            "{} WHERE t.from_account_id IN (SELECT id FROM accounts WHERE customer_id = ?) \
             OR t.to_account_id IN (SELECT id FROM accounts WHERE customer_id = ?) \
             ORDER BY t.timestamp DESC, t.sequence DESC LIMIT ?",
            TRANSACTION_VIEW_SELECT
        );

        let rows = sqlx::query(&query)
            .bind(customer_id.to_string())
            .bind(customer_id.to_string())
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions for customer")?;

        rows.iter().map(Self::row_to_transaction_view).collect()
    }

    /// Most recent transactions across the bank.
    pub async fn list_recent_transactions(&self, limit: Option<usize>) -> Result<Vec<TransactionView>> {
        let query = format!(
            "{} ORDER BY t.timestamp DESC, t.sequence DESC LIMIT ?",
            TRANSACTION_VIEW_SELECT
        );

        let rows = sqlx::query(&query)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list recent transactions")?;

        rows.iter().map(Self::row_to_transaction_view).collect()
    }

    /// The whole log in commit order, for replay.
    pub async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions ORDER BY sequence",
            TRANSACTION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list transactions")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// Transfers that moved money between a customer's accounts and an
    /// account held by someone else.
    pub async fn count_external_transfers(
        conn: &mut SqliteConnection,
        customer_id: CustomerId,
    ) -> Result<i64> {
        let id = customer_id.to_string();
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM transactions
            WHERE (from_account_id IN (SELECT id FROM accounts WHERE customer_id = ?)
                   AND to_account_id IS NOT NULL
                   AND to_account_id NOT IN (SELECT id FROM accounts WHERE customer_id = ?))
               OR (to_account_id IN (SELECT id FROM accounts WHERE customer_id = ?)
                   AND from_account_id IS NOT NULL
                   AND from_account_id NOT IN (SELECT id FROM accounts WHERE customer_id = ?))
            "#,
        )
        .bind(&id)
        .bind(&id)
        .bind(&id)
        .bind(&id)
        .fetch_one(conn)
        .await
        .context("Failed to count external transfers")?;
        Ok(row.get("count"))
    }

    /// Remove the log rows of a customer's accounts. Only used when a pending
    /// registration is rejected, before the customer ever went live, and only
    /// once `count_external_transfers` is zero.
    pub async fn delete_transactions_for_customer(
        conn: &mut SqliteConnection,
        customer_id: CustomerId,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM transactions
            WHERE from_account_id IN (SELECT id FROM accounts WHERE customer_id = ?)
               OR to_account_id IN (SELECT id FROM accounts WHERE customer_id = ?)
            "#,
        )
        .bind(customer_id.to_string())
        .bind(customer_id.to_string())
        .execute(conn)
        .await
        .context("Failed to delete transactions")?;
        Ok(result.rows_affected())
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let type_str: String = row.get("transaction_type");

        Ok(Transaction {
            id: decode_id(row, "id")?,
            sequence: row.get("sequence"),
            from_account: decode_opt_id(row, "from_account_id")?,
            to_account: decode_opt_id(row, "to_account_id")?,
            amount_cents: row.get("amount_cents"),
            transaction_type: TransactionType::from_str(&type_str)
                .ok_or_else(|| anyhow::anyhow!("Invalid transaction type: {}", type_str))?,
            timestamp: decode_ts(row, "timestamp")?,
            description: row.get("description"),
        })
    }

    fn row_to_transaction_view(row: &SqliteRow) -> Result<TransactionView> {
        Ok(TransactionView {
            transaction: Self::row_to_transaction(row)?,
            from_number: row.get("from_number"),
            to_number: row.get("to_number"),
        })
    }

    // ========================
    // Sessions
    // ========================

    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, login_time, logout_time, duration_seconds)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(session.user_id.to_string())
        .bind(encode_ts(&session.login_time))
        .bind(session.logout_time.as_ref().map(encode_ts))
        .bind(session.duration_seconds)
        .execute(&self.pool)
        .await
        .context("Failed to save session")?;
        Ok(())
    }

    pub async fn latest_open_session(&self, user_id: UserId) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, login_time, logout_time, duration_seconds
            FROM sessions
            WHERE user_id = ? AND logout_time IS NULL
            ORDER BY login_time DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch open session")?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    /// Close an open session. Returns false if it was already closed.
    pub async fn close_session(&self, session: &Session) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET logout_time = ?, duration_seconds = ?
            WHERE id = ? AND logout_time IS NULL
            "#,
        )
        .bind(session.logout_time.as_ref().map(encode_ts))
        .bind(session.duration_seconds)
        .bind(session.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to close session")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn list_recent_sessions(&self, limit: Option<usize>) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.user_id, s.login_time, s.logout_time, s.duration_seconds, u.name
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            ORDER BY s.login_time DESC
            LIMIT ?
            "#,
        )
        .bind(sql_limit(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list sessions")?;

        rows.iter()
            .map(|row| {
                Ok(SessionSummary {
                    session: Self::row_to_session(row)?,
                    user_name: row.get("name"),
                })
            })
            .collect()
    }

    fn row_to_session(row: &SqliteRow) -> Result<Session> {
        let logout_time: Option<String> = row.get("logout_time");

        Ok(Session {
            id: decode_id(row, "id")?,
            user_id: decode_id(row, "user_id")?,
            login_time: decode_ts(row, "login_time")?,
            logout_time: logout_time
                .map(|s| parse_ts(&s))
                .transpose()
                .context("Invalid logout_time")?,
            duration_seconds: row.get("duration_seconds"),
        })
    }

    // ========================
    // Statistics
    // ========================

    pub async fn dashboard_counts(&self) -> Result<DashboardCounts> {
        let users = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN role = 'customer' THEN 1 ELSE 0 END), 0) AS customers,
                COALESCE(SUM(CASE WHEN role = 'staff' THEN 1 ELSE 0 END), 0) AS staff
            FROM users
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count users")?;

        let accounts = sqlx::query(
            "SELECT COUNT(*) AS count, COALESCE(SUM(balance_cents), 0) AS balance FROM accounts",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count accounts")?;

        let transactions: i64 = sqlx::query("SELECT COUNT(*) AS count FROM transactions")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count transactions")?
            .get("count");

        Ok(DashboardCounts {
            total_users: users.get("total"),
            total_customers: users.get("customers"),
            total_staff: users.get("staff"),
            total_accounts: accounts.get("count"),
            total_balance: accounts.get("balance"),
            total_transactions: transactions,
        })
    }
}

/// Returns true if `err` is a unique-constraint violation on `column`
/// (e.g. `"accounts.account_number"`).
pub fn is_unique_violation(err: &anyhow::Error, column: &str) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db_err)) => {
            db_err.is_unique_violation() && db_err.message().contains(column)
        }
        _ => false,
    }
}

/// SQLite treats a negative LIMIT as "no limit".
fn sql_limit(limit: Option<usize>) -> i64 {
    limit
        .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
        .unwrap_or(-1)
}

/// Fixed-width timestamps so text ordering matches time ordering.
fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp: {}", s))?
        .with_timezone(&Utc))
}

fn decode_ts(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let value: String = row.get(column);
    parse_ts(&value).with_context(|| format!("Invalid {}", column))
}

fn decode_id(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let value: String = row.get(column);
    Uuid::parse_str(&value).with_context(|| format!("Invalid {}", column))
}

fn decode_opt_id(row: &SqliteRow, column: &str) -> Result<Option<Uuid>> {
    let value: Option<String> = row.get(column);
    value
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .with_context(|| format!("Invalid {}", column))
}
