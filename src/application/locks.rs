//! Per-account serialization.
//!
//! Every ledger mutation locks the accounts it touches before reading the
//! balances it validates. Locks are always taken in ascending id order so two
//! transfers in opposite directions cannot deadlock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;

use crate::domain::AccountId;

use super::AppError;

type LockTable = Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>;

/// Lock table keyed by account. Entries live only while some task holds or
/// waits on them.
#[derive(Debug, Default)]
pub struct AccountLocks {
    table: Arc<LockTable>,
}

/// Held locks. Released when dropped.
#[derive(Debug)]
pub struct AccountGuard {
    table: Arc<LockTable>,
    held: Vec<(AccountId, OwnedMutexGuard<()>)>,
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        // Unlock first, then forget entries nobody else references
        let ids: Vec<AccountId> = self.held.drain(..).map(|(id, _)| id).collect();
        prune(&self.table, &ids);
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, id: AccountId) -> Result<Arc<tokio::sync::Mutex<()>>, AppError> {
        let mut table = self
            .table
            .lock()
            .map_err(|_| AppError::internal("account lock table poisoned"))?;
        Ok(table.entry(id).or_default().clone())
    }

    /// Lock every listed account (duplicates are locked once), waiting at
    /// most `timeout` for each.
    pub async fn acquire(
        &self,
        ids: &[AccountId],
        timeout: Duration,
    ) -> Result<AccountGuard, AppError> {
        let mut ordered = ids.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut guard = AccountGuard {
            table: self.table.clone(),
            held: Vec::with_capacity(ordered.len()),
        };
        for id in ordered {
            let handle = self.handle(id)?;
            match tokio::time::timeout(timeout, handle.lock_owned()).await {
                Ok(held) => guard.held.push((id, held)),
                Err(_) => {
                    prune(&self.table, &[id]);
                    tracing::warn!(account_id = %id, ?timeout, "timed out waiting for account lock");
                    return Err(AppError::internal(format!(
                        "timed out waiting for lock on account {}",
                        id
                    )));
                }
            }
            tracing::debug!(account_id = %id, "account lock acquired");
        }

        Ok(guard)
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.table.lock().map(|table| table.len()).unwrap_or(0)
    }
}

/// Drop table entries whose only reference is the table itself.
fn prune(table: &LockTable, ids: &[AccountId]) {
    let Ok(mut table) = table.lock() else {
        return;
    };
    for id in ids {
        if table.get(id).is_some_and(|m| Arc::strong_count(m) == 1) {
            table.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn test_same_account_is_exclusive() {
        let locks = AccountLocks::new();
        let id = Uuid::new_v4();

        let held = locks.acquire(&[id], Duration::from_secs(1)).await.unwrap();
        let second = locks.acquire(&[id], Duration::from_millis(50)).await;
        assert!(matches!(second, Err(AppError::Internal(_))));

        drop(held);
        assert!(locks.acquire(&[id], Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_ids_lock_once() {
        let locks = AccountLocks::new();
        let id = Uuid::new_v4();
        assert!(locks.acquire(&[id, id], Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_accounts_do_not_block() {
        let locks = AccountLocks::new();
        let _a = locks.acquire(&[Uuid::new_v4()], Duration::from_secs(1)).await.unwrap();
        assert!(
            locks
                .acquire(&[Uuid::new_v4()], Duration::from_millis(50))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_released_locks_leave_the_table() {
        let locks = AccountLocks::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let held = locks.acquire(&[a, b], Duration::from_secs(1)).await.unwrap();
        assert_eq!(locks.tracked(), 2);

        // A waiter that gives up does not evict the holder's entry
        assert!(locks.acquire(&[a], Duration::from_millis(20)).await.is_err());
        assert_eq!(locks.tracked(), 2);

        drop(held);
        assert_eq!(locks.tracked(), 0);

        for _ in 0..100 {
            let _held = locks
                .acquire(&[Uuid::new_v4()], Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert_eq!(locks.tracked(), 0);
    }
}
