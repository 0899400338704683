use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Account, AccountStatus, AccountType, Cents, TransactionType, TransactionView};

/// Plain data handed to statement renderers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    pub account: StatementAccount,
    pub transactions: Vec<StatementLine>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementAccount {
    pub number: String,
    pub account_type: AccountType,
    pub balance: Cents,
    pub status: AccountStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementLine {
    pub timestamp: DateTime<Utc>,
    pub transaction_type: TransactionType,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub amount: Cents,
    pub description: String,
}

impl Statement {
    /// Build a statement from an account and its history (most recent first).
    pub fn new(account: &Account, history: &[TransactionView]) -> Self {
        Self {
            account: StatementAccount {
                number: account.account_number.clone(),
                account_type: account.account_type,
                balance: account.balance_cents,
                status: account.status,
            },
            transactions: history
                .iter()
                .map(|view| StatementLine {
                    timestamp: view.transaction.timestamp,
                    transaction_type: view.transaction.transaction_type,
                    from_number: view.from_number.clone(),
                    to_number: view.to_number.clone(),
                    amount: view.transaction.amount_cents,
                    description: view.transaction.description.clone(),
                })
                .collect(),
            generated_at: Utc::now(),
        }
    }

    /// Money that entered the account over the statement.
    pub fn total_in(&self) -> Cents {
        self.transactions
            .iter()
            .filter(|line| line.to_number.as_deref() == Some(self.account.number.as_str()))
            .map(|line| line.amount)
            .sum()
    }

    /// Money that left the account over the statement.
    pub fn total_out(&self) -> Cents {
        self.transactions
            .iter()
            .filter(|line| line.from_number.as_deref() == Some(self.account.number.as_str()))
            .map(|line| line.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::domain::Transaction;

    #[test]
    fn test_totals_follow_direction() {
        let account = Account::new(Uuid::new_v4(), "000000000001".into(), AccountType::Checking, 7000);
        let other = Uuid::new_v4();

        let history = vec![
            TransactionView {
                transaction: Transaction::transfer(account.id, other, 3000, "Transfer to 000000000002"),
                from_number: Some("000000000001".into()),
                to_number: Some("000000000002".into()),
            },
            TransactionView {
                transaction: Transaction::deposit(account.id, 10000, "Initial deposit"),
                from_number: None,
                to_number: Some("000000000001".into()),
            },
        ];

        let statement = Statement::new(&account, &history);

        assert_eq!(statement.total_in(), 10000);
        assert_eq!(statement.total_out(), 3000);
        assert_eq!(statement.total_in() - statement.total_out(), statement.account.balance);
    }
}
