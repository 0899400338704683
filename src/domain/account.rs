use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Cents, CustomerId, ledger_now};

pub type AccountId = Uuid;

/// Account numbers are fixed-length numeric strings.
pub const ACCOUNT_NUMBER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Savings,
    Checking,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Savings => "savings",
            AccountType::Checking => "checking",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "savings" => Some(AccountType::Savings),
            "checking" => Some(AccountType::Checking),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    /// Frozen by the bank; may be reactivated
    Blocked,
    /// Terminal
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Blocked => "blocked",
            AccountStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(AccountStatus::Active),
            "blocked" => Some(AccountStatus::Blocked),
            "closed" => Some(AccountStatus::Closed),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub customer_id: CustomerId,
    pub account_number: String,
    /// Never negative
    pub balance_cents: Cents,
    pub account_type: AccountType,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a new active account. The balance is set by the caller that
    /// records the matching initial deposit.
    pub fn new(
        customer_id: CustomerId,
        account_number: String,
        account_type: AccountType,
        balance_cents: Cents,
    ) -> Self {
        assert!(balance_cents >= 0, "Account balance cannot be negative");
        Self {
            id: Uuid::new_v4(),
            customer_id,
            account_number,
            balance_cents,
            account_type,
            status: AccountStatus::Active,
            created_at: ledger_now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Draw a random account number. Uniqueness is the registry's job.
pub fn generate_account_number<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ACCOUNT_NUMBER_LEN)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Returns true if `s` has the shape of an account number.
pub fn is_account_number(s: &str) -> bool {
    s.len() == ACCOUNT_NUMBER_LEN && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_generated_numbers_are_fixed_length_digits() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let number = generate_account_number(&mut rng);
            assert!(is_account_number(&number), "bad number {number}");
        }
    }

    #[test]
    fn test_is_account_number() {
        assert!(is_account_number("000000000042"));
        assert!(!is_account_number("42"));
        assert!(!is_account_number("00000000004x"));
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            AccountStatus::Active,
            AccountStatus::Blocked,
            AccountStatus::Closed,
        ] {
            assert_eq!(AccountStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(AccountType::from_str("Checking"), Some(AccountType::Checking));
        assert_eq!(AccountType::from_str("brokerage"), None);
    }

    #[test]
    #[should_panic(expected = "Account balance cannot be negative")]
    fn test_account_rejects_negative_balance() {
        Account::new(Uuid::new_v4(), "000000000001".into(), AccountType::Savings, -1);
    }
}
