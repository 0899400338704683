use std::fs::File;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::application::{EngineConfig, LedgerService, NewCustomer, ReviewOutcome};
use crate::domain::{
    Account, AccountStatus, AccountType, CustomerProfile, Principal, TransactionView, User,
    format_cents, parse_cents,
};
use crate::io::{ExportFormat, Exporter};

/// Bankcore - retail banking ledger
#[derive(Parser)]
#[command(name = "bankcore")]
#[command(about = "The transactional core of a retail-banking ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "bankcore.db")]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Email of the acting user
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Password of the acting user
    #[arg(long, global = true)]
    pub password: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database, optionally creating the first admin
    Init {
        #[arg(long)]
        admin_name: Option<String>,

        #[arg(long)]
        admin_email: Option<String>,

        #[arg(long)]
        admin_password: Option<String>,
    },

    /// Register as a customer (uses --password); staff must approve
    Register {
        /// Full name
        name: String,

        /// Email address
        email: String,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long)]
        address: Option<String>,
    },

    /// Log in (uses --user and --password) and open a session
    Login,

    /// Close the current session
    Logout,

    /// List your accounts
    Accounts,

    /// Show your recent transactions
    History {
        /// Maximum number of transactions to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Transfer money from one of your accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account number (must be yours)
        #[arg(long)]
        from: String,

        /// Destination account number
        #[arg(long)]
        to: String,

        /// Description of the transfer
        #[arg(short, long)]
        description: Option<String>,
    },

    /// Show or export an account statement
    Statement {
        /// Account number
        account: String,

        /// Export format: csv or json (omit for a table)
        #[arg(short, long)]
        format: Option<String>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Bank staff commands
    #[command(subcommand)]
    Staff(StaffCommands),

    /// Administration commands
    #[command(subcommand)]
    Admin(AdminCommands),
}

#[derive(Subcommand)]
pub enum StaffCommands {
    /// Onboard a customer with a first account (active immediately)
    ProvisionCustomer {
        name: String,
        email: String,

        /// Initial password for the customer
        #[arg(long)]
        customer_password: String,

        #[arg(long)]
        phone: Option<String>,

        #[arg(long)]
        address: Option<String>,

        /// Account type: savings or checking
        #[arg(long = "type", default_value = "savings")]
        account_type: String,

        /// Opening balance
        #[arg(long, default_value = "0")]
        initial: String,
    },

    /// List customers
    Customers,

    /// List self-registered customers awaiting approval
    Pending,

    /// Approve a pending registration
    Approve { email: String },

    /// Reject a pending registration (deletes it)
    Reject { email: String },

    /// Open an additional account for a customer
    OpenAccount {
        /// Customer email
        email: String,

        #[arg(long = "type", default_value = "savings")]
        account_type: String,

        #[arg(long, default_value = "0")]
        initial: String,
    },

    /// Deposit cash into an account
    Deposit {
        account: String,
        amount: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Withdraw cash from an account
    Withdraw {
        account: String,
        amount: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// List a customer's accounts
    Accounts {
        /// Customer email
        email: String,
    },

    /// Show an account's transactions
    History {
        account: String,

        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Change an account's status: active, blocked or closed
    AccountStatus { account: String, status: String },
}

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Create a staff user
    ProvisionStaff {
        name: String,
        email: String,

        /// Initial password for the staff member
        #[arg(long)]
        staff_password: String,
    },

    /// List all users
    Users,

    /// Activate a user
    Activate { email: String },

    /// Deactivate a user
    Deactivate { email: String },

    /// Show recent transactions across the bank
    Transactions {
        #[arg(short, long)]
        limit: Option<usize>,

        /// Write CSV to this file instead of printing a table
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Show dashboard statistics
    Dashboard,

    /// Verify ledger integrity
    Check,
}

/// Credentials supplied on the command line
struct Credentials {
    user: Option<String>,
    password: Option<String>,
}

impl Credentials {
    async fn principal(&self, service: &LedgerService) -> Result<Principal> {
        let (Some(user), Some(password)) = (&self.user, &self.password) else {
            anyhow::bail!("This command requires --user and --password");
        };
        service
            .authenticate(user, password)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Invalid credentials or inactive user"))
    }

    fn password(&self) -> Result<&str> {
        self.password
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("This command requires --password"))
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let Cli {
            database,
            user,
            password,
            command,
            ..
        } = self;
        let credentials = Credentials { user, password };
        let config = EngineConfig::from_env().with_database_path(&database);

        if !matches!(command, Commands::Init { .. }) && !Path::new(&database).exists() {
            anyhow::bail!(
                "Database not found: {}. Run `bankcore init` first.",
                database
            );
        }
        let service = LedgerService::with_config(config).await?;

        match command {
            Commands::Init {
                admin_name,
                admin_email,
                admin_password,
            } => {
                println!("Database initialized: {}", database);
                run_init_command(&service, admin_name, admin_email, admin_password).await?;
            }

            Commands::Register {
                name,
                email,
                phone,
                address,
            } => {
                let user = service
                    .register(NewCustomer {
                        name,
                        email,
                        password: credentials.password()?.to_string(),
                        phone,
                        address,
                    })
                    .await?;
                println!(
                    "Registered {}. Your account will be usable once staff approves it.",
                    user.email
                );
            }

            Commands::Login => {
                let (Some(email), Ok(password)) = (&credentials.user, credentials.password())
                else {
                    anyhow::bail!("Login requires --user and --password");
                };
                match service.login(email, password).await? {
                    Some(login) => println!(
                        "Logged in as {} ({}) at {}",
                        login.user.name,
                        login.user.role,
                        login.session.login_time.format("%Y-%m-%d %H:%M:%S")
                    ),
                    None => anyhow::bail!("Invalid credentials or inactive user"),
                }
            }

            Commands::Logout => {
                let principal = credentials.principal(&service).await?;
                match service.logout(&principal).await? {
                    Some(session) => println!(
                        "Logged out after {:.1}s",
                        session.duration_seconds.unwrap_or_default()
                    ),
                    None => println!("No open session."),
                }
            }

            Commands::Accounts => {
                let principal = credentials.principal(&service).await?;
                let accounts = service.my_accounts(&principal).await?;
                print_accounts(&accounts);
            }

            Commands::History { limit } => {
                let principal = credentials.principal(&service).await?;
                let transactions = service.my_transactions(&principal, limit).await?;
                print_transactions(&transactions);
            }

            Commands::Transfer {
                amount,
                from,
                to,
                description,
            } => {
                let principal = credentials.principal(&service).await?;
                let amount_cents =
                    parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
                let source = service.account_by_number(&principal, &from).await?;

                let result = service
                    .transfer(&principal, source.id, &to, amount_cents, description)
                    .await?;

                println!(
                    "Transferred {}: {} -> {} (balance {})",
                    format_cents(result.transaction.amount_cents),
                    result.source.account_number,
                    result.destination.account_number,
                    format_cents(result.source.balance_cents)
                );
            }

            Commands::Statement {
                account,
                format,
                output,
            } => {
                let principal = credentials.principal(&service).await?;
                run_statement_command(&service, &principal, &account, format, output).await?;
            }

            Commands::Staff(cmd) => {
                let principal = credentials.principal(&service).await?;
                run_staff_command(&service, &principal, cmd).await?;
            }

            Commands::Admin(cmd) => {
                let principal = credentials.principal(&service).await?;
                run_admin_command(&service, &principal, cmd).await?;
            }
        }

        Ok(())
    }
}

async fn run_init_command(
    service: &LedgerService,
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    match (name, email, password) {
        (Some(name), Some(email), Some(password)) => {
            match service.bootstrap_admin(&name, &email, &password).await? {
                Some(admin) => println!("Created admin user: {}", admin.email),
                None => println!("An admin already exists; no admin created."),
            }
        }
        (None, None, None) => {}
        _ => anyhow::bail!(
            "--admin-name, --admin-email and --admin-password must be given together"
        ),
    }
    Ok(())
}

async fn run_statement_command(
    service: &LedgerService,
    principal: &Principal,
    number: &str,
    format: Option<String>,
    output: Option<String>,
) -> Result<()> {
    let account = service.account_by_number(principal, number).await?;

    let Some(format) = format else {
        let statement = service.statement(principal, account.id).await?;
        println!(
            "Account {} ({}, {})",
            statement.account.number, statement.account.account_type, statement.account.status
        );
        println!("Balance: {}", format_cents(statement.account.balance));
        println!(
            "In: {}  Out: {}",
            format_cents(statement.total_in()),
            format_cents(statement.total_out())
        );
        println!();

        if statement.transactions.is_empty() {
            println!("No transactions.");
            return Ok(());
        }
        println!(
            "{:<20} {:<10} {:<14} {:<14} {:>12} DESCRIPTION",
            "DATE", "TYPE", "FROM", "TO", "AMOUNT"
        );
        println!("{}", "-".repeat(90));
        for line in &statement.transactions {
            println!(
                "{:<20} {:<10} {:<14} {:<14} {:>12} {}",
                line.timestamp.format("%Y-%m-%d %H:%M:%S"),
                line.transaction_type,
                line.from_number.as_deref().unwrap_or("-"),
                line.to_number.as_deref().unwrap_or("-"),
                format_cents(line.amount),
                truncate(&line.description, 30)
            );
        }
        return Ok(());
    };

    let format = ExportFormat::from_str(&format)
        .ok_or_else(|| anyhow::anyhow!("Unknown format '{}'. Use csv or json", format))?;
    let exporter = Exporter::new(service);

    let count = match &output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            exporter
                .export_statement(principal, account.id, format, file)
                .await?
        }
        None => {
            let stdout = io::stdout();
            let handle = stdout.lock();
            exporter
                .export_statement(principal, account.id, format, handle)
                .await?
        }
    };

    if let Some(path) = output {
        println!("Exported {} transactions to {} ({})", count, path, format);
    }
    Ok(())
}

async fn run_staff_command(
    service: &LedgerService,
    principal: &Principal,
    cmd: StaffCommands,
) -> Result<()> {
    match cmd {
        StaffCommands::ProvisionCustomer {
            name,
            email,
            customer_password,
            phone,
            address,
            account_type,
            initial,
        } => {
            let account_type = parse_account_type(&account_type)?;
            let initial = parse_cents(&initial).context("Invalid initial balance")?;

            let provisioned = service
                .provision_customer(
                    principal,
                    NewCustomer {
                        name,
                        email,
                        password: customer_password,
                        phone,
                        address,
                    },
                    account_type,
                    initial,
                )
                .await?;

            println!(
                "Provisioned {} with {} account {} (balance {})",
                provisioned.user.email,
                provisioned.account.account_type,
                provisioned.account.account_number,
                format_cents(provisioned.account.balance_cents)
            );
        }

        StaffCommands::Customers => {
            let customers = service.list_customers(principal).await?;
            print_customers(&customers);
        }

        StaffCommands::Pending => {
            let pending = service.pending_customers(principal).await?;
            print_customers(&pending);
        }

        StaffCommands::Approve { email } => {
            let user_id = pending_user_id(service, principal, &email).await?;
            if let ReviewOutcome::Approved(user) =
                service.review_registration(principal, user_id, true).await?
            {
                println!("Approved {}", user.email);
            }
        }

        StaffCommands::Reject { email } => {
            let user_id = pending_user_id(service, principal, &email).await?;
            if let ReviewOutcome::Rejected {
                user,
                accounts_removed,
                ..
            } = service.review_registration(principal, user_id, false).await?
            {
                println!(
                    "Rejected {} ({} account(s) removed)",
                    user.email, accounts_removed
                );
            }
        }

        StaffCommands::OpenAccount {
            email,
            account_type,
            initial,
        } => {
            let account_type = parse_account_type(&account_type)?;
            let initial = parse_cents(&initial).context("Invalid initial balance")?;
            let profile = service.customer_by_email(principal, &email).await?;

            let opened = service
                .open_account(principal, profile.customer.id, account_type, initial)
                .await?;
            println!(
                "Opened {} account {} for {} (balance {})",
                opened.account.account_type,
                opened.account.account_number,
                profile.email,
                format_cents(opened.account.balance_cents)
            );
        }

        StaffCommands::Deposit {
            account,
            amount,
            description,
        } => {
            let amount = parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let account = service.account_by_number(principal, &account).await?;
            let result = service
                .deposit(principal, account.id, amount, description)
                .await?;
            println!(
                "Deposited {} into {} (balance {})",
                format_cents(amount),
                result.account.account_number,
                format_cents(result.account.balance_cents)
            );
        }

        StaffCommands::Withdraw {
            account,
            amount,
            description,
        } => {
            let amount = parse_cents(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let account = service.account_by_number(principal, &account).await?;
            let result = service
                .withdraw(principal, account.id, amount, description)
                .await?;
            println!(
                "Withdrew {} from {} (balance {})",
                format_cents(amount),
                result.account.account_number,
                format_cents(result.account.balance_cents)
            );
        }

        StaffCommands::Accounts { email } => {
            let profile = service.customer_by_email(principal, &email).await?;
            let accounts = service
                .customer_accounts(principal, profile.customer.id)
                .await?;
            print_accounts(&accounts);
        }

        StaffCommands::History { account, limit } => {
            let account = service.account_by_number(principal, &account).await?;
            let transactions = service
                .account_transactions(principal, account.id, limit)
                .await?;
            print_transactions(&transactions);
        }

        StaffCommands::AccountStatus { account, status } => {
            let status = AccountStatus::from_str(&status).ok_or_else(|| {
                anyhow::anyhow!("Invalid status '{}'. Use active, blocked or closed", status)
            })?;
            let account = service.account_by_number(principal, &account).await?;
            let account = service
                .set_account_status(principal, account.id, status)
                .await?;
            println!("Account {} is now {}", account.account_number, account.status);
        }
    }
    Ok(())
}

async fn run_admin_command(
    service: &LedgerService,
    principal: &Principal,
    cmd: AdminCommands,
) -> Result<()> {
    match cmd {
        AdminCommands::ProvisionStaff {
            name,
            email,
            staff_password,
        } => {
            let user = service
                .provision_staff(principal, &name, &email, &staff_password)
                .await?;
            println!("Created staff user: {}", user.email);
        }

        AdminCommands::Users => {
            let users = service.list_users(principal).await?;
            print_users(&users);
        }

        AdminCommands::Activate { email } => {
            let user = user_by_email(service, principal, &email).await?;
            let user = service.set_user_status(principal, user.id, true).await?;
            println!("Activated {}", user.email);
        }

        AdminCommands::Deactivate { email } => {
            let user = user_by_email(service, principal, &email).await?;
            let user = service.set_user_status(principal, user.id, false).await?;
            println!("Deactivated {}", user.email);
        }

        AdminCommands::Transactions { limit, output } => match output {
            Some(path) => {
                let file = File::create(&path)
                    .with_context(|| format!("Failed to create output file: {}", path))?;
                let count = Exporter::new(service)
                    .export_transactions_csv(principal, limit, file)
                    .await?;
                println!("Exported {} transactions to {}", count, path);
            }
            None => {
                let transactions = service.all_transactions(principal, limit).await?;
                print_transactions(&transactions);
            }
        },

        AdminCommands::Dashboard => {
            let stats = service.dashboard(principal).await?;

            println!("Users:        {}", stats.total_users);
            println!("  customers:  {}", stats.total_customers);
            println!("  staff:      {}", stats.total_staff);
            println!("Accounts:     {}", stats.total_accounts);
            println!("Total balance: {}", format_cents(stats.total_balance));
            println!("Transactions: {}", stats.total_transactions);
            println!();

            println!("Recent transactions:");
            print_transactions(&stats.recent_transactions);
            println!();

            println!("Recent sessions:");
            if stats.recent_sessions.is_empty() {
                println!("No sessions.");
            }
            for summary in &stats.recent_sessions {
                let session = &summary.session;
                let duration = session
                    .duration_seconds
                    .map(|d| format!("{:.1}s", d))
                    .unwrap_or_else(|| "open".to_string());
                println!(
                    "  {:<20} {:<20} {}",
                    truncate(&summary.user_name, 20),
                    session.login_time.format("%Y-%m-%d %H:%M:%S"),
                    duration
                );
            }
        }

        AdminCommands::Check => {
            println!("Checking ledger integrity...\n");
            let report = service.check_integrity(principal).await?;

            println!("Accounts:      {}", report.account_count);
            println!("Transactions:  {}", report.transaction_count);
            println!("Total balance: {}", format_cents(report.total_balance));
            println!();

            if report.is_healthy() {
                println!("Ledger is consistent.");
            } else {
                println!("Issues found:");
                for mismatch in &report.mismatches {
                    println!(
                        "  - account {}: stored {}, log implies {}",
                        mismatch.account_number,
                        format_cents(mismatch.stored),
                        format_cents(mismatch.replayed)
                    );
                }
                for number in &report.negative_balances {
                    println!("  - account {} has a negative balance", number);
                }
                if report.invalid_transactions > 0 {
                    println!(
                        "  - {} malformed transaction record(s)",
                        report.invalid_transactions
                    );
                }
                anyhow::bail!("Ledger integrity check failed");
            }
        }
    }
    Ok(())
}

async fn pending_user_id(
    service: &LedgerService,
    principal: &Principal,
    email: &str,
) -> Result<uuid::Uuid> {
    let email = email.trim().to_lowercase();
    service
        .pending_customers(principal)
        .await?
        .into_iter()
        .find(|profile| profile.email == email)
        .map(|profile| profile.customer.user_id)
        .ok_or_else(|| anyhow::anyhow!("No pending registration for {}", email))
}

async fn user_by_email(service: &LedgerService, principal: &Principal, email: &str) -> Result<User> {
    let email = email.trim().to_lowercase();
    service
        .list_users(principal)
        .await?
        .into_iter()
        .find(|user| user.email == email)
        .ok_or_else(|| anyhow::anyhow!("User not found: {}", email))
}

fn parse_account_type(s: &str) -> Result<AccountType> {
    AccountType::from_str(s)
        .ok_or_else(|| anyhow::anyhow!("Invalid account type '{}'. Use savings or checking", s))
}

fn print_accounts(accounts: &[Account]) {
    if accounts.is_empty() {
        println!("No accounts found.");
        return;
    }
    println!(
        "{:<14} {:<10} {:<8} {:>14}",
        "NUMBER", "TYPE", "STATUS", "BALANCE"
    );
    println!("{}", "-".repeat(49));
    for account in accounts {
        println!(
            "{:<14} {:<10} {:<8} {:>14}",
            account.account_number,
            account.account_type,
            account.status,
            format_cents(account.balance_cents)
        );
    }
}

fn print_transactions(transactions: &[TransactionView]) {
    if transactions.is_empty() {
        println!("No transactions found.");
        return;
    }
    println!(
        "{:<20} {:<10} {:<14} {:<14} {:>12} DESCRIPTION",
        "DATE", "TYPE", "FROM", "TO", "AMOUNT"
    );
    println!("{}", "-".repeat(90));
    for view in transactions {
        let tx = &view.transaction;
        println!(
            "{:<20} {:<10} {:<14} {:<14} {:>12} {}",
            tx.timestamp.format("%Y-%m-%d %H:%M:%S"),
            tx.transaction_type,
            view.from_number.as_deref().unwrap_or("-"),
            view.to_number.as_deref().unwrap_or("-"),
            format_cents(tx.amount_cents),
            truncate(&tx.description, 30)
        );
    }
}

fn print_customers(customers: &[CustomerProfile]) {
    if customers.is_empty() {
        println!("No customers found.");
        return;
    }
    println!("{:<24} {:<30} {:<8} PHONE", "NAME", "EMAIL", "ACTIVE");
    println!("{}", "-".repeat(76));
    for profile in customers {
        println!(
            "{:<24} {:<30} {:<8} {}",
            truncate(&profile.name, 24),
            truncate(&profile.email, 30),
            if profile.is_active { "yes" } else { "no" },
            profile.customer.phone.as_deref().unwrap_or("-")
        );
    }
}

fn print_users(users: &[User]) {
    if users.is_empty() {
        println!("No users found.");
        return;
    }
    println!("{:<24} {:<30} {:<9} ACTIVE", "NAME", "EMAIL", "ROLE");
    println!("{}", "-".repeat(72));
    for user in users {
        println!(
            "{:<24} {:<30} {:<9} {}",
            truncate(&user.name, 24),
            truncate(&user.email, 30),
            user.role,
            if user.is_active { "yes" } else { "no" }
        );
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long description", 10), "a rathe...");
        assert_eq!(truncate("çççççççççççç", 6), "ççç...");
    }

    #[test]
    fn test_cli_parses_staff_deposit() {
        let cli = Cli::try_parse_from([
            "bankcore",
            "--user",
            "staff@bank.test",
            "--password",
            "pw",
            "staff",
            "deposit",
            "000000000001",
            "50.00",
        ])
        .unwrap();

        assert_eq!(cli.user.as_deref(), Some("staff@bank.test"));
        match cli.command {
            Commands::Staff(StaffCommands::Deposit { account, amount, .. }) => {
                assert_eq!(account, "000000000001");
                assert_eq!(amount, "50.00");
            }
            _ => panic!("expected staff deposit"),
        }
    }
}
