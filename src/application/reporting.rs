use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    AccountId, Cents, IntegrityReport, Operation, Principal, SessionSummary, Statement,
    TransactionView, build_integrity_report,
};

use super::{AppError, LedgerService};

/// Aggregate figures for the admin dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStats {
    pub generated_at: DateTime<Utc>,
    pub total_users: i64,
    pub total_customers: i64,
    pub total_staff: i64,
    pub total_accounts: i64,
    pub total_balance: Cents,
    pub total_transactions: i64,
    pub recent_transactions: Vec<TransactionView>,
    pub recent_sessions: Vec<SessionSummary>,
}

impl LedgerService {
    /// Build the statement of one account, full history most recent first.
    pub async fn statement(
        &self,
        principal: &Principal,
        account_id: AccountId,
    ) -> Result<Statement, AppError> {
        let user = self.acting_user(principal).await?;
        let owner = self.account_owner(account_id).await?;
        self.check(&user, Operation::ViewStatement { owner })?;

        let account = self
            .repo
            .get_account(account_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account {}", account_id)))?;
        let history = self
            .repo
            .list_transactions_for_account(account_id, None)
            .await?;

        Ok(Statement::new(&account, &history))
    }

    pub async fn dashboard(&self, principal: &Principal) -> Result<DashboardStats, AppError> {
        self.authorize(principal, Operation::ViewDashboard).await?;

        let counts = self.repo.dashboard_counts().await?;
        let limit = Some(self.config.recent_limit);
        let recent_transactions = self.repo.list_recent_transactions(limit).await?;
        let recent_sessions = self.repo.list_recent_sessions(limit).await?;

        Ok(DashboardStats {
            generated_at: Utc::now(),
            total_users: counts.total_users,
            total_customers: counts.total_customers,
            total_staff: counts.total_staff,
            total_accounts: counts.total_accounts,
            total_balance: counts.total_balance,
            total_transactions: counts.total_transactions,
            recent_transactions,
            recent_sessions,
        })
    }

    /// Replay the transaction log and compare it with stored balances.
    pub async fn check_integrity(&self, principal: &Principal) -> Result<IntegrityReport, AppError> {
        self.authorize(principal, Operation::CheckIntegrity).await?;

        let accounts = self.repo.list_accounts().await?;
        let transactions = self.repo.list_transactions().await?;
        let report = build_integrity_report(&accounts, &transactions);

        if !report.is_healthy() {
            tracing::warn!(
                mismatches = report.mismatches.len(),
                negative = report.negative_balances.len(),
                invalid = report.invalid_transactions,
                "integrity check found problems"
            );
        }
        Ok(report)
    }
}
