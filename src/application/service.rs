use std::sync::Arc;

use sqlx::sqlite::SqliteConnection;

use crate::domain::{
    AccessPolicy, Account, AccountId, AccountStatus, AccountType, Cents, Customer, CustomerId,
    CustomerProfile, Decision, Operation, Principal, Role, Session, Transaction, TransactionView,
    User, UserId, ledger_now, normalize_email,
};
use crate::storage::{Repository, is_unique_violation};

use super::{
    AccountRegistry, AppError, CredentialHasher, EngineConfig, LedgerEngine, OpenAccountResult,
    PostingResult, Argon2CredentialHasher, TransferResult,
};

/// Application service providing the gated operations of the bank.
/// This is the primary interface for any client (CLI, API, TUI, etc.).
///
/// Every operation takes the caller's [`Principal`], checks that the acting
/// user is still active, and asks the [`AccessPolicy`] before touching data.
pub struct LedgerService {
    pub(super) repo: Arc<Repository>,
    engine: LedgerEngine,
    policy: AccessPolicy,
    hasher: Box<dyn CredentialHasher>,
    pub(super) config: EngineConfig,
}

/// Identity and contact details for a new customer
#[derive(Debug, Clone, Default)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Result of staff provisioning a customer
#[derive(Debug, Clone)]
pub struct ProvisionedCustomer {
    pub user: User,
    pub customer: Customer,
    pub account: Account,
    pub initial_deposit: Option<Transaction>,
}

/// Result of a successful login
#[derive(Debug, Clone)]
pub struct LoginResult {
    pub user: User,
    pub session: Session,
}

impl LoginResult {
    pub fn principal(&self) -> Principal {
        self.user.principal()
    }
}

/// What happened to a pending registration
#[derive(Debug, Clone)]
pub enum ReviewOutcome {
    Approved(User),
    Rejected {
        user: User,
        accounts_removed: u64,
        transactions_removed: u64,
    },
}

impl LedgerService {
    /// Create a new ledger service over an already migrated repository.
    pub fn new(repo: Repository, config: EngineConfig) -> Self {
        let repo = Arc::new(repo);
        let registry = AccountRegistry::new(repo.clone(), config.account_number_attempts);
        let engine = LedgerEngine::new(repo.clone(), registry, config.lock_timeout);

        Self {
            repo,
            engine,
            policy: AccessPolicy::new(),
            hasher: Box::new(Argon2CredentialHasher::default()),
            config,
        }
    }

    /// Swap the credential hasher.
    pub fn with_hasher(mut self, hasher: impl CredentialHasher + 'static) -> Self {
        self.hasher = Box::new(hasher);
        self
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, AppError> {
        Self::with_config(EngineConfig::default().with_database_path(database_path)).await
    }

    /// Open (creating and migrating if needed) the database named by the config.
    pub async fn with_config(config: EngineConfig) -> Result<Self, AppError> {
        let repo = Repository::init(&config.database_url, config.max_connections).await?;
        Ok(Self::new(repo, config))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, AppError> {
        let config = EngineConfig::default();
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url, config.max_connections, false).await?;
        Ok(Self::new(
            repo,
            EngineConfig {
                database_url: db_url,
                ..config
            },
        ))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================
    // Access helpers
    // ========================

    /// The stored user behind a principal. Unknown or inactive users may do nothing.
    pub(super) async fn acting_user(&self, principal: &Principal) -> Result<User, AppError> {
        let user = self
            .repo
            .get_user(principal.user_id)
            .await?
            .ok_or_else(|| AppError::Forbidden("unknown user".to_string()))?;

        if !user.is_active {
            return Err(AppError::Forbidden(format!("user {} is not active", user.email)));
        }
        Ok(user)
    }

    pub(super) fn check(&self, user: &User, operation: Operation) -> Result<(), AppError> {
        match self.policy.authorize(&user.principal(), &operation) {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => {
                tracing::warn!(user = %user.email, operation = operation.name(), "access denied");
                Err(AppError::Forbidden(reason))
            }
        }
    }

    pub(super) async fn authorize(
        &self,
        principal: &Principal,
        operation: Operation,
    ) -> Result<User, AppError> {
        let user = self.acting_user(principal).await?;
        self.check(&user, operation)?;
        Ok(user)
    }

    /// The user owning an account. A missing account is `NotFound` for everyone.
    pub(super) async fn account_owner(&self, account_id: AccountId) -> Result<UserId, AppError> {
        self.repo
            .get_account_owner(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {}", account_id)))
    }

    async fn customer_of(&self, user: &User) -> Result<Customer, AppError> {
        self.repo
            .get_customer_by_user(user.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("customer profile for {}", user.email)))
    }

    async fn ensure_email_available(&self, email: &str) -> Result<(), AppError> {
        if self.repo.get_user_by_email(email).await?.is_some() {
            return Err(AppError::InvalidOperation(format!(
                "email {} is already registered",
                email
            )));
        }
        Ok(())
    }

    /// Insert a user, turning an email race lost at insert time into the
    /// same error as the up-front check.
    async fn insert_user(conn: &mut SqliteConnection, user: &User) -> Result<(), AppError> {
        match Repository::insert_user(conn, user).await {
            Ok(()) => Ok(()),
            Err(err) if is_unique_violation(&err, "users.email") => Err(
                AppError::InvalidOperation(format!("email {} is already registered", user.email)),
            ),
            Err(err) => Err(err.into()),
        }
    }

    // ========================
    // Identity operations
    // ========================

    /// Public self-registration. The customer stays inactive until staff
    /// approves them.
    pub async fn register(&self, new_customer: NewCustomer) -> Result<User, AppError> {
        validate_identity(&new_customer.name, &new_customer.email, &new_customer.password)?;
        let email = normalize_email(&new_customer.email);
        self.ensure_email_available(&email).await?;

        let user = User::new(
            new_customer.name.trim().to_string(),
            email,
            self.hasher.hash(&new_customer.password)?,
            Role::Customer,
        )
        .inactive();
        let customer =
            Customer::new(user.id).with_contact(new_customer.phone, new_customer.address);

        let mut tx = self.repo.begin().await?;
        Self::insert_user(&mut tx, &user).await?;
        Repository::insert_customer(&mut tx, &customer).await?;
        tx.commit().await?;

        tracing::info!(user = %user.email, "customer registered, awaiting approval");
        Ok(user)
    }

    /// Staff onboarding: an active customer with a first account, in one unit.
    pub async fn provision_customer(
        &self,
        principal: &Principal,
        new_customer: NewCustomer,
        account_type: AccountType,
        initial_balance: Cents,
    ) -> Result<ProvisionedCustomer, AppError> {
        let staff = self.authorize(principal, Operation::ProvisionCustomer).await?;
        validate_identity(&new_customer.name, &new_customer.email, &new_customer.password)?;
        if initial_balance < 0 {
            return Err(AppError::InvalidAmount(
                "initial balance cannot be negative".to_string(),
            ));
        }
        let email = normalize_email(&new_customer.email);
        self.ensure_email_available(&email).await?;

        let user = User::new(
            new_customer.name.trim().to_string(),
            email,
            self.hasher.hash(&new_customer.password)?,
            Role::Customer,
        )
        .with_created_by(staff.id);
        let customer =
            Customer::new(user.id).with_contact(new_customer.phone, new_customer.address);

        let registry = self.engine.registry();
        for attempt in 1..=registry.attempts() {
            let number = registry.generate_unique_account_number().await?;

            let mut tx = self.repo.begin().await?;
            Self::insert_user(&mut tx, &user).await?;
            Repository::insert_customer(&mut tx, &customer).await?;
            match LedgerEngine::open_account_in(
                &mut tx,
                customer.id,
                number,
                account_type,
                initial_balance,
            )
            .await
            {
                Ok(opened) => {
                    tx.commit().await?;
                    tracing::info!(
                        user = %user.email,
                        account = %opened.account.account_number,
                        staff = %staff.email,
                        "customer provisioned"
                    );
                    return Ok(ProvisionedCustomer {
                        user,
                        customer,
                        account: opened.account,
                        initial_deposit: opened.initial_deposit,
                    });
                }
                Err(AppError::Conflict(reason)) => {
                    tracing::warn!(attempt, %reason, "account number collision, retrying");
                }
                Err(err) => return Err(err),
            }
        }

        Err(AppError::internal("account number allocation kept colliding"))
    }

    pub async fn provision_staff(
        &self,
        principal: &Principal,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AppError> {
        let admin = self.authorize(principal, Operation::ProvisionStaff).await?;
        validate_identity(name, email, password)?;
        let email = normalize_email(email);
        self.ensure_email_available(&email).await?;

        let user = User::new(
            name.trim().to_string(),
            email,
            self.hasher.hash(password)?,
            Role::Staff,
        )
        .with_created_by(admin.id);

        let mut tx = self.repo.begin().await?;
        Self::insert_user(&mut tx, &user).await?;
        tx.commit().await?;

        tracing::info!(user = %user.email, admin = %admin.email, "staff provisioned");
        Ok(user)
    }

    /// Create the first admin. Returns `None` when an admin already exists.
    pub async fn bootstrap_admin(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AppError> {
        if self.repo.count_users_with_role(Role::Admin).await? > 0 {
            return Ok(None);
        }
        validate_identity(name, email, password)?;
        let email = normalize_email(email);
        self.ensure_email_available(&email).await?;

        let user = User::new(
            name.trim().to_string(),
            email,
            self.hasher.hash(password)?,
            Role::Admin,
        );

        let mut tx = self.repo.begin().await?;
        Self::insert_user(&mut tx, &user).await?;
        tx.commit().await?;

        tracing::info!(user = %user.email, "admin bootstrapped");
        Ok(Some(user))
    }

    pub async fn pending_customers(
        &self,
        principal: &Principal,
    ) -> Result<Vec<CustomerProfile>, AppError> {
        self.authorize(principal, Operation::ListCustomers).await?;
        Ok(self.repo.list_customer_profiles(true).await?)
    }

    pub async fn list_customers(
        &self,
        principal: &Principal,
    ) -> Result<Vec<CustomerProfile>, AppError> {
        self.authorize(principal, Operation::ListCustomers).await?;
        Ok(self.repo.list_customer_profiles(false).await?)
    }

    pub async fn list_users(&self, principal: &Principal) -> Result<Vec<User>, AppError> {
        self.authorize(principal, Operation::ListUsers).await?;
        Ok(self.repo.list_users().await?)
    }

    /// Approve (activate) or reject (delete) a pending self-registration.
    pub async fn review_registration(
        &self,
        principal: &Principal,
        user_id: UserId,
        approve: bool,
    ) -> Result<ReviewOutcome, AppError> {
        let reviewer = self
            .authorize(principal, Operation::ReviewRegistration)
            .await?;

        let target = self.pending_registration(user_id).await?;

        if approve {
            let mut tx = self.repo.begin().await?;
            if !Repository::activate_pending_user(&mut tx, target.id).await? {
                drop(tx);
                return Err(self.diagnose_review(user_id).await);
            }
            tx.commit().await?;

            tracing::info!(user = %target.email, reviewer = %reviewer.email, "registration approved");
            let user = User {
                is_active: true,
                ..target
            };
            return Ok(ReviewOutcome::Approved(user));
        }

        let customer = self.repo.get_customer_by_user(target.id).await?;

        let mut tx = self.repo.begin().await?;
        if !Repository::claim_pending_user(&mut tx, target.id).await? {
            drop(tx);
            return Err(self.diagnose_review(user_id).await);
        }

        let (mut accounts_removed, mut transactions_removed) = (0, 0);
        if let Some(customer) = &customer {
            // Log rows shared with other customers' accounts must stay
            if Repository::count_external_transfers(&mut tx, customer.id).await? > 0 {
                return Err(AppError::InvalidOperation(format!(
                    "{} has transfers with other customers; block the accounts instead",
                    target.email
                )));
            }
            transactions_removed =
                Repository::delete_transactions_for_customer(&mut tx, customer.id).await?;
            accounts_removed = Repository::delete_accounts_for_customer(&mut tx, customer.id).await?;
            Repository::delete_customer(&mut tx, customer.id).await?;
        }
        Repository::delete_user(&mut tx, target.id).await?;
        tx.commit().await?;

        tracing::info!(
            user = %target.email,
            reviewer = %reviewer.email,
            accounts_removed,
            transactions_removed,
            "registration rejected"
        );
        Ok(ReviewOutcome::Rejected {
            user: target,
            accounts_removed,
            transactions_removed,
        })
    }

    /// A customer user still awaiting review.
    async fn pending_registration(&self, user_id: UserId) -> Result<User, AppError> {
        let target = self
            .repo
            .get_user(user_id)
            .await?
            .filter(|u| u.role == Role::Customer)
            .ok_or_else(|| AppError::NotFound(format!("customer user {}", user_id)))?;
        if !target.is_pending() {
            return Err(AppError::InvalidOperation(format!(
                "{} is not a pending registration",
                target.email
            )));
        }
        Ok(target)
    }

    /// A guarded review write matched nothing: another reviewer got there first.
    async fn diagnose_review(&self, user_id: UserId) -> AppError {
        tracing::warn!(user_id = %user_id, "registration changed during review");
        match self.pending_registration(user_id).await {
            Err(err) => err,
            Ok(user) => AppError::internal(format!("review of {} was rejected", user.email)),
        }
    }

    /// Activate or deactivate a user. Admins cannot change their own status.
    pub async fn set_user_status(
        &self,
        principal: &Principal,
        user_id: UserId,
        active: bool,
    ) -> Result<User, AppError> {
        let admin = self.authorize(principal, Operation::SetUserStatus).await?;
        if admin.id == user_id {
            return Err(AppError::InvalidOperation(
                "cannot change your own status".to_string(),
            ));
        }

        let target = self
            .repo
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user {}", user_id)))?;

        let mut tx = self.repo.begin().await?;
        if !Repository::set_user_active(&mut tx, target.id, active).await? {
            return Err(AppError::NotFound(format!("user {}", user_id)));
        }
        tx.commit().await?;

        tracing::info!(user = %target.email, active, admin = %admin.email, "user status changed");
        Ok(User {
            is_active: active,
            ..target
        })
    }

    // ========================
    // Authentication
    // ========================

    /// Check credentials. Only active users authenticate.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<Principal>, AppError> {
        Ok(self
            .verified_user(email, password)
            .await?
            .map(|user| user.principal()))
    }

    async fn verified_user(&self, email: &str, password: &str) -> Result<Option<User>, AppError> {
        let user = match self.repo.get_user_by_email(&normalize_email(email)).await? {
            Some(user) => user,
            None => return Ok(None),
        };
        if !user.is_active || !self.hasher.verify(password, &user.password_hash) {
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// Authenticate and open an audit session.
    pub async fn login(&self, email: &str, password: &str) -> Result<Option<LoginResult>, AppError> {
        let Some(user) = self.verified_user(email, password).await? else {
            tracing::debug!("login rejected");
            return Ok(None);
        };

        let session = Session::open(user.id, ledger_now());
        self.repo.insert_session(&session).await?;

        tracing::info!(user = %user.email, "logged in");
        Ok(Some(LoginResult { user, session }))
    }

    /// Close the caller's most recent open session, if any.
    pub async fn logout(&self, principal: &Principal) -> Result<Option<Session>, AppError> {
        let Some(mut session) = self.repo.latest_open_session(principal.user_id).await? else {
            return Ok(None);
        };

        session.close(ledger_now());
        self.repo.close_session(&session).await?;

        tracing::info!(user_id = %principal.user_id, duration = ?session.duration_seconds, "logged out");
        Ok(Some(session))
    }

    // ========================
    // Customer operations
    // ========================

    pub async fn my_accounts(&self, principal: &Principal) -> Result<Vec<Account>, AppError> {
        let user = self.authorize(principal, Operation::ListOwnAccounts).await?;
        let customer = self.customer_of(&user).await?;
        self.engine.registry().accounts_for_customer(customer.id).await
    }

    /// Recent transactions across all of the caller's accounts.
    pub async fn my_transactions(
        &self,
        principal: &Principal,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionView>, AppError> {
        let user = self
            .authorize(principal, Operation::ListOwnTransactions)
            .await?;
        let customer = self.customer_of(&user).await?;
        let limit = limit.unwrap_or(self.config.customer_history_limit);
        Ok(self
            .repo
            .list_transactions_for_customer(customer.id, Some(limit))
            .await?)
    }

    /// Move money from an account the caller owns to any active account.
    pub async fn transfer(
        &self,
        principal: &Principal,
        from_account_id: AccountId,
        to_account_number: &str,
        amount: Cents,
        description: Option<String>,
    ) -> Result<TransferResult, AppError> {
        let user = self.acting_user(principal).await?;
        let source_owner = self.account_owner(from_account_id).await?;
        self.check(&user, Operation::Transfer { source_owner })?;

        self.engine
            .transfer(from_account_id, to_account_number, amount, description)
            .await
    }

    // ========================
    // Account views
    // ========================

    pub async fn get_account(
        &self,
        principal: &Principal,
        account_id: AccountId,
    ) -> Result<Account, AppError> {
        let user = self.acting_user(principal).await?;
        let owner = self.account_owner(account_id).await?;
        self.check(&user, Operation::ViewAccount { owner })?;
        self.engine.registry().account(account_id).await
    }

    pub async fn account_by_number(
        &self,
        principal: &Principal,
        number: &str,
    ) -> Result<Account, AppError> {
        let user = self.acting_user(principal).await?;
        let account = self.engine.registry().account_by_number(number).await?;
        let owner = self.account_owner(account.id).await?;
        self.check(&user, Operation::ViewAccount { owner })?;
        Ok(account)
    }

    /// Every transaction touching an account, most recent first.
    pub async fn account_transactions(
        &self,
        principal: &Principal,
        account_id: AccountId,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionView>, AppError> {
        let user = self.acting_user(principal).await?;
        let owner = self.account_owner(account_id).await?;
        self.check(&user, Operation::ViewAccount { owner })?;
        Ok(self
            .repo
            .list_transactions_for_account(account_id, limit)
            .await?)
    }

    // ========================
    // Staff operations
    // ========================

    pub async fn deposit(
        &self,
        principal: &Principal,
        account_id: AccountId,
        amount: Cents,
        description: Option<String>,
    ) -> Result<PostingResult, AppError> {
        self.authorize(principal, Operation::Deposit).await?;
        self.engine.deposit(account_id, amount, description).await
    }

    pub async fn withdraw(
        &self,
        principal: &Principal,
        account_id: AccountId,
        amount: Cents,
        description: Option<String>,
    ) -> Result<PostingResult, AppError> {
        self.authorize(principal, Operation::Withdraw).await?;
        self.engine.withdraw(account_id, amount, description).await
    }

    pub async fn open_account(
        &self,
        principal: &Principal,
        customer_id: CustomerId,
        account_type: AccountType,
        initial_balance: Cents,
    ) -> Result<OpenAccountResult, AppError> {
        self.authorize(principal, Operation::OpenAccount).await?;
        self.engine
            .open_account(customer_id, account_type, initial_balance)
            .await
    }

    pub async fn customer_accounts(
        &self,
        principal: &Principal,
        customer_id: CustomerId,
    ) -> Result<Vec<Account>, AppError> {
        self.authorize(principal, Operation::ListCustomerAccounts)
            .await?;
        let registry = self.engine.registry();
        registry.customer(customer_id).await?;
        registry.accounts_for_customer(customer_id).await
    }

    /// Look up a customer profile by the email of its user.
    pub async fn customer_by_email(
        &self,
        principal: &Principal,
        email: &str,
    ) -> Result<CustomerProfile, AppError> {
        self.authorize(principal, Operation::ListCustomers).await?;
        let email = normalize_email(email);
        self.repo
            .list_customer_profiles(false)
            .await?
            .into_iter()
            .find(|profile| profile.email == email)
            .ok_or_else(|| AppError::NotFound(format!("customer {}", email)))
    }

    pub async fn set_account_status(
        &self,
        principal: &Principal,
        account_id: AccountId,
        status: AccountStatus,
    ) -> Result<Account, AppError> {
        self.authorize(principal, Operation::SetAccountStatus).await?;
        self.engine.set_account_status(account_id, status).await
    }

    // ========================
    // Admin operations
    // ========================

    /// Most recent transactions across the bank.
    pub async fn all_transactions(
        &self,
        principal: &Principal,
        limit: Option<usize>,
    ) -> Result<Vec<TransactionView>, AppError> {
        self.authorize(principal, Operation::ListAllTransactions)
            .await?;
        let limit = limit.unwrap_or(self.config.admin_history_limit);
        Ok(self.repo.list_recent_transactions(Some(limit)).await?)
    }
}

fn validate_identity(name: &str, email: &str, password: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::InvalidOperation("name is required".to_string()));
    }

    let email = normalize_email(email);
    let plausible = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    };
    if !plausible {
        return Err(AppError::InvalidOperation(format!(
            "invalid email address: {}",
            email
        )));
    }

    if password.is_empty() {
        return Err(AppError::InvalidOperation("password is required".to_string()));
    }
    Ok(())
}
