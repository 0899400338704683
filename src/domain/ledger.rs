use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Account, AccountId, Cents, Transaction};

/// Replay the log for a single account.
/// Balance = sum of incoming amounts - sum of outgoing amounts
pub fn compute_balance(account_id: AccountId, transactions: &[Transaction]) -> Cents {
    transactions
        .iter()
        .map(|tx| tx.effect_on(account_id))
        .sum()
}

/// Replay the log for every account it mentions.
/// Returns a map of account_id -> balance. External sides (`None`) are skipped.
pub fn compute_all_balances(transactions: &[Transaction]) -> HashMap<AccountId, Cents> {
    let mut balances: HashMap<AccountId, Cents> = HashMap::new();

    for tx in transactions {
        if let Some(from) = tx.from_account {
            *balances.entry(from).or_insert(0) -= tx.amount_cents;
        }
        if let Some(to) = tx.to_account {
            *balances.entry(to).or_insert(0) += tx.amount_cents;
        }
    }

    balances
}

/// An account whose stored balance disagrees with its replayed log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceMismatch {
    pub account_number: String,
    pub stored: Cents,
    pub replayed: Cents,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub account_count: usize,
    pub transaction_count: usize,
    pub total_balance: Cents,
    pub mismatches: Vec<BalanceMismatch>,
    pub negative_balances: Vec<String>,
    pub invalid_transactions: usize,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.mismatches.is_empty()
            && self.negative_balances.is_empty()
            && self.invalid_transactions == 0
    }
}

/// Compare stored balances with the balances the log implies.
pub fn build_integrity_report(accounts: &[Account], transactions: &[Transaction]) -> IntegrityReport {
    let replayed = compute_all_balances(transactions);

    let mut mismatches = Vec::new();
    let mut negative_balances = Vec::new();
    for account in accounts {
        let expected = replayed.get(&account.id).copied().unwrap_or(0);
        if expected != account.balance_cents {
            mismatches.push(BalanceMismatch {
                account_number: account.account_number.clone(),
                stored: account.balance_cents,
                replayed: expected,
            });
        }
        if account.balance_cents < 0 {
            negative_balances.push(account.account_number.clone());
        }
    }

    let invalid_transactions = transactions
        .iter()
        .filter(|tx| {
            tx.amount_cents <= 0
                || (tx.from_account.is_none() && tx.to_account.is_none())
                || (tx.from_account.is_some() && tx.from_account == tx.to_account)
        })
        .count();

    IntegrityReport {
        account_count: accounts.len(),
        transaction_count: transactions.len(),
        total_balance: accounts.iter().map(|a| a.balance_cents).sum(),
        mismatches,
        negative_balances,
        invalid_transactions,
    }
}
