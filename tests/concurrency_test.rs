mod common;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use bankcore::application::{AppError, NewCustomer};
use bankcore::domain::AccountType;
use common::TestBank;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_withdrawals_never_overdraw() -> Result<()> {
    let bank = Arc::new(TestBank::new().await?);
    let (_, account) = bank.customer("Alice", "alice@example.com", 10000).await?;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let bank = bank.clone();
        let account_id = account.id;
        handles.push(tokio::spawn(async move {
            bank.service
                .withdraw(&bank.staff, account_id, 3000, None)
                .await
        }));
    }

    let mut succeeded = 0;
    let mut insufficient = 0;
    for handle in handles {
        match handle.await? {
            Ok(result) => {
                assert!(result.account.balance_cents >= 0);
                succeeded += 1;
            }
            Err(AppError::InsufficientFunds { .. }) => insufficient += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(insufficient, 7);
    assert_eq!(bank.balance(&account).await?, 1000);
    assert_eq!(bank.history_len(&account).await?, 4);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposing_transfers_do_not_deadlock() -> Result<()> {
    let bank = Arc::new(TestBank::new().await?);
    let (alice, a) = bank.customer("Alice", "alice@example.com", 100000).await?;
    let (bob, b) = bank.customer("Bob", "bob@example.com", 100000).await?;

    let mut handles = Vec::new();
    for i in 0..20 {
        let bank = bank.clone();
        let (principal, source, destination) = if i % 2 == 0 {
            (alice, a.id, b.account_number.clone())
        } else {
            (bob, b.id, a.account_number.clone())
        };
        handles.push(tokio::spawn(async move {
            bank.service
                .transfer(&principal, source, &destination, 1000, None)
                .await
        }));
    }

    for handle in handles {
        handle.await??;
    }

    // Ten each way: everything nets out
    assert_eq!(bank.balance(&a).await?, 100000);
    assert_eq!(bank.balance(&b).await?, 100000);
    assert_eq!(bank.history_len(&a).await?, 21);

    let report = bank.service.check_integrity(&bank.admin).await?;
    assert!(report.is_healthy());
    assert_eq!(report.total_balance, 200000);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deposits_and_transfers_conserve_money() -> Result<()> {
    let bank = Arc::new(TestBank::new().await?);
    let (alice, a) = bank.customer("Alice", "alice@example.com", 50000).await?;
    let (_, b) = bank.customer("Bob", "bob@example.com", 0).await?;

    let mut handles = Vec::new();
    for i in 0..12 {
        let bank = bank.clone();
        let (a_id, b_id, b_number) = (a.id, b.id, b.account_number.clone());
        handles.push(tokio::spawn(async move {
            match i % 3 {
                0 => bank
                    .service
                    .deposit(&bank.staff, a_id, 500, None)
                    .await
                    .map(|_| ()),
                1 => bank
                    .service
                    .transfer(&alice, a_id, &b_number, 2000, None)
                    .await
                    .map(|_| ()),
                _ => bank
                    .service
                    .withdraw(&bank.staff, b_id, 100, None)
                    .await
                    .map(|_| ()),
            }
        }));
    }

    for handle in handles {
        match handle.await? {
            Ok(()) | Err(AppError::InsufficientFunds { .. }) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    let report = bank.service.check_integrity(&bank.admin).await?;
    assert!(report.is_healthy(), "{:?}", report.mismatches);
    assert!(bank.balance(&a).await? >= 0);
    assert!(bank.balance(&b).await? >= 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_account_opening_yields_unique_numbers() -> Result<()> {
    let bank = Arc::new(TestBank::new().await?);
    let (_, first) = bank.customer("Alice", "alice@example.com", 0).await?;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let bank = bank.clone();
        let customer_id = first.customer_id;
        handles.push(tokio::spawn(async move {
            bank.service
                .open_account(&bank.staff, customer_id, AccountType::Savings, 100)
                .await
        }));
    }

    let mut numbers = HashSet::new();
    numbers.insert(first.account_number.clone());
    for handle in handles {
        let opened = handle.await??;
        assert!(numbers.insert(opened.account.account_number));
    }

    assert_eq!(numbers.len(), 11);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_reviews_settle_on_one_outcome() -> Result<()> {
    let bank = Arc::new(TestBank::new().await?);

    let mut handles = Vec::new();
    for i in 0..5 {
        let email = format!("applicant{}@example.com", i);
        let user_id = bank
            .service
            .register(NewCustomer {
                name: format!("Applicant {}", i),
                email: email.clone(),
                password: "applicant-secret".to_string(),
                ..Default::default()
            })
            .await?
            .id;

        for approve in [true, false] {
            let bank = bank.clone();
            let email = email.clone();
            handles.push(tokio::spawn(async move {
                let result = bank
                    .service
                    .review_registration(&bank.staff, user_id, approve)
                    .await;
                (email, approve, result)
            }));
        }
    }

    let mut winners = Vec::new();
    for handle in handles {
        let (email, approve, result) = handle.await?;
        match result {
            Ok(_) => winners.push((email, approve)),
            Err(AppError::NotFound(_)) | Err(AppError::InvalidOperation(_)) => {}
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(winners.len(), 5);

    let users = bank.service.list_users(&bank.admin).await?;
    for (email, approved) in winners {
        let stored = users.iter().find(|u| u.email == email);
        if approved {
            assert!(stored.is_some_and(|u| u.is_active));
        } else {
            assert!(stored.is_none());
        }
    }
    assert!(bank.service.pending_customers(&bank.staff).await?.is_empty());
    Ok(())
}
