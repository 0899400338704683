use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, Cents};

pub type TransactionId = Uuid;

/// Current time at the precision the store keeps (microseconds).
pub fn ledger_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdraw => "withdraw",
            TransactionType::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(TransactionType::Deposit),
            "withdraw" => Some(TransactionType::Withdraw),
            "transfer" => Some(TransactionType::Transfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable record of one balance change.
///
/// `from_account = None` means money entered from outside the bank (deposit),
/// `to_account = None` means it left (withdrawal). Transfers have both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Monotonically increasing, assigned by the repository inside the
    /// atomic unit that writes the row
    pub sequence: i64,
    pub from_account: Option<AccountId>,
    pub to_account: Option<AccountId>,
    /// Always positive
    pub amount_cents: Cents,
    pub transaction_type: TransactionType,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

impl Transaction {
    fn new(
        from_account: Option<AccountId>,
        to_account: Option<AccountId>,
        amount_cents: Cents,
        transaction_type: TransactionType,
        description: String,
    ) -> Self {
        assert!(amount_cents > 0, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            sequence: 0, // Will be set by repository
            from_account,
            to_account,
            amount_cents,
            transaction_type,
            timestamp: ledger_now(),
            description,
        }
    }

    pub fn deposit(to: AccountId, amount_cents: Cents, description: impl Into<String>) -> Self {
        Self::new(
            None,
            Some(to),
            amount_cents,
            TransactionType::Deposit,
            description.into(),
        )
    }

    pub fn withdrawal(from: AccountId, amount_cents: Cents, description: impl Into<String>) -> Self {
        Self::new(
            Some(from),
            None,
            amount_cents,
            TransactionType::Withdraw,
            description.into(),
        )
    }

    pub fn transfer(
        from: AccountId,
        to: AccountId,
        amount_cents: Cents,
        description: impl Into<String>,
    ) -> Self {
        assert!(from != to, "Transfer endpoints must differ");
        Self::new(
            Some(from),
            Some(to),
            amount_cents,
            TransactionType::Transfer,
            description.into(),
        )
    }

    /// Returns true if this transaction touches the given account.
    pub fn involves(&self, account_id: AccountId) -> bool {
        self.from_account == Some(account_id) || self.to_account == Some(account_id)
    }

    /// Signed effect of this transaction on an account's balance.
    pub fn effect_on(&self, account_id: AccountId) -> Cents {
        let mut effect = 0;
        if self.to_account == Some(account_id) {
            effect += self.amount_cents;
        }
        if self.from_account == Some(account_id) {
            effect -= self.amount_cents;
        }
        effect
    }
}

/// A transaction with its endpoints resolved to account numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    pub transaction: Transaction,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
}
