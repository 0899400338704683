mod common;

use anyhow::Result;
use bankcore::application::{AppError, NewCustomer, ReviewOutcome};
use bankcore::domain::{AccountStatus, AccountType, Role};
use common::{ADMIN_EMAIL, ADMIN_PASSWORD, CUSTOMER_PASSWORD, TestBank, test_service};
use uuid::Uuid;

fn applicant(email: &str) -> NewCustomer {
    NewCustomer {
        name: "Carol Applicant".to_string(),
        email: email.to_string(),
        password: "applicant-secret".to_string(),
        phone: Some("+39 055 123456".to_string()),
        address: Some("Via Roma 1".to_string()),
    }
}

#[tokio::test]
async fn test_customer_cannot_transfer_from_foreign_account() -> Result<()> {
    let bank = TestBank::new().await?;
    let (alice, a) = bank.customer("Alice", "alice@example.com", 10000).await?;
    let (_, b) = bank.customer("Bob", "bob@example.com", 10000).await?;

    let result = bank
        .service
        .transfer(&alice, b.id, &a.account_number, 5000, None)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    assert_eq!(bank.balance(&a).await?, 10000);
    assert_eq!(bank.balance(&b).await?, 10000);
    assert_eq!(bank.history_len(&b).await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_forbidden_is_distinct_from_not_found() -> Result<()> {
    let bank = TestBank::new().await?;
    let (alice, _) = bank.customer("Alice", "alice@example.com", 10000).await?;
    let (_, b) = bank.customer("Bob", "bob@example.com", 0).await?;

    let result = bank.service.get_account(&alice, b.id).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    let result = bank.service.statement(&alice, b.id).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    let missing = Uuid::new_v4();
    let result = bank.service.get_account(&alice, missing).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    let result = bank.service.get_account(&bank.staff, missing).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    let result = bank
        .service
        .transfer(&alice, missing, &b.account_number, 100, None)
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    Ok(())
}

#[tokio::test]
async fn test_customer_sees_only_own_accounts() -> Result<()> {
    let bank = TestBank::new().await?;
    let (alice, a) = bank.customer("Alice", "alice@example.com", 10000).await?;
    let (bob, b) = bank.customer("Bob", "bob@example.com", 500).await?;
    let a2 = bank.second_account(&a, 0).await?;

    let mine = bank.service.my_accounts(&alice).await?;
    let numbers: Vec<&str> = mine.iter().map(|acc| acc.account_number.as_str()).collect();
    assert_eq!(mine.len(), 2);
    assert!(numbers.contains(&a.account_number.as_str()));
    assert!(numbers.contains(&a2.account_number.as_str()));

    bank.service
        .transfer(&alice, a.id, &b.account_number, 2500, None)
        .await?;

    let bobs = bank.service.my_transactions(&bob, None).await?;
    assert_eq!(bobs.len(), 2);
    assert!(bobs.iter().all(|v| v.transaction.involves(b.id)));

    let found = bank.service.account_by_number(&bob, &b.account_number).await?;
    assert_eq!(found.id, b.id);
    let result = bank.service.account_by_number(&bob, &a.account_number).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    Ok(())
}

#[tokio::test]
async fn test_role_gates() -> Result<()> {
    let bank = TestBank::new().await?;
    let (alice, a) = bank.customer("Alice", "alice@example.com", 10000).await?;
    let (_, b) = bank.customer("Bob", "bob@example.com", 0).await?;

    // Customers do not handle cash or onboarding
    let result = bank.service.deposit(&alice, a.id, 100, None).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
    let result = bank
        .service
        .open_account(&alice, a.customer_id, AccountType::Savings, 0)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
    let result = bank.service.list_customers(&alice).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    // Transfers are a customer capability
    let result = bank
        .service
        .transfer(&bank.staff, a.id, &b.account_number, 100, None)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    // Staff cannot administer
    let result = bank.service.list_users(&bank.staff).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
    let result = bank
        .service
        .provision_staff(&bank.staff, "Eve", "eve@bank.test", "pw")
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
    let result = bank.service.dashboard(&bank.staff).await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    // Admin inherits staff capabilities
    let result = bank.service.deposit(&bank.admin, a.id, 100, None).await?;
    assert_eq!(result.account.balance_cents, 10100);
    assert_eq!(bank.service.list_customers(&bank.admin).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_admin_cannot_change_own_status() -> Result<()> {
    let bank = TestBank::new().await?;

    let result = bank
        .service
        .set_user_status(&bank.admin, bank.admin.user_id, false)
        .await;
    assert!(matches!(result, Err(AppError::InvalidOperation(_))));

    let result = bank
        .service
        .set_user_status(&bank.admin, Uuid::new_v4(), false)
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_deactivated_user_loses_access() -> Result<()> {
    let bank = TestBank::new().await?;
    let (alice, a) = bank.customer("Alice", "alice@example.com", 10000).await?;
    let (_, b) = bank.customer("Bob", "bob@example.com", 0).await?;

    let user = bank
        .service
        .set_user_status(&bank.admin, alice.user_id, false)
        .await?;
    assert!(!user.is_active);

    assert!(
        bank.service
            .authenticate("alice@example.com", CUSTOMER_PASSWORD)
            .await?
            .is_none()
    );
    let result = bank
        .service
        .transfer(&alice, a.id, &b.account_number, 100, None)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    bank.service
        .set_user_status(&bank.admin, alice.user_id, true)
        .await?;
    bank.service
        .transfer(&alice, a.id, &b.account_number, 100, None)
        .await?;
    Ok(())
}

#[tokio::test]
async fn test_registration_approval() -> Result<()> {
    let bank = TestBank::new().await?;

    let user = bank.service.register(applicant("carol@example.com")).await?;
    assert_eq!(user.role, Role::Customer);
    assert!(!user.is_active);
    assert!(user.created_by.is_none());

    // Pending users cannot log in
    assert!(
        bank.service
            .authenticate("carol@example.com", "applicant-secret")
            .await?
            .is_none()
    );

    let pending = bank.service.pending_customers(&bank.staff).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].email, "carol@example.com");
    assert_eq!(pending[0].customer.phone.as_deref(), Some("+39 055 123456"));

    let outcome = bank
        .service
        .review_registration(&bank.staff, user.id, true)
        .await?;
    assert!(matches!(outcome, ReviewOutcome::Approved(ref u) if u.is_active));

    assert!(bank.service.pending_customers(&bank.staff).await?.is_empty());
    let carol = bank
        .service
        .authenticate("carol@example.com", "applicant-secret")
        .await?
        .expect("approved customer can log in");
    assert!(bank.service.my_accounts(&carol).await?.is_empty());

    // Approving twice is not a pending review any more
    let result = bank
        .service
        .review_registration(&bank.staff, user.id, true)
        .await;
    assert!(matches!(result, Err(AppError::InvalidOperation(_))));
    Ok(())
}

#[tokio::test]
async fn test_registration_rejection_cascades() -> Result<()> {
    let bank = TestBank::new().await?;

    let user = bank.service.register(applicant("carol@example.com")).await?;
    let profile = bank
        .service
        .customer_by_email(&bank.staff, "carol@example.com")
        .await?;
    let opened = bank
        .service
        .open_account(&bank.staff, profile.customer.id, AccountType::Savings, 1000)
        .await?;

    let outcome = bank
        .service
        .review_registration(&bank.staff, user.id, false)
        .await?;
    match outcome {
        ReviewOutcome::Rejected {
            accounts_removed,
            transactions_removed,
            ..
        } => {
            assert_eq!(accounts_removed, 1);
            assert_eq!(transactions_removed, 1);
        }
        other => panic!("expected rejection, got {:?}", other),
    }

    let result = bank.service.get_account(&bank.staff, opened.account.id).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    let users = bank.service.list_users(&bank.admin).await?;
    assert!(users.iter().all(|u| u.email != "carol@example.com"));
    assert!(bank.service.pending_customers(&bank.staff).await?.is_empty());

    // The email can be used again
    bank.service.register(applicant("carol@example.com")).await?;

    let report = bank.service.check_integrity(&bank.admin).await?;
    assert!(report.is_healthy());
    Ok(())
}

#[tokio::test]
async fn test_rejection_refused_once_money_crossed_customers() -> Result<()> {
    let bank = TestBank::new().await?;
    let (alice, a) = bank.customer("Alice", "alice@example.com", 10000).await?;

    let user = bank.service.register(applicant("carol@example.com")).await?;
    let profile = bank
        .service
        .customer_by_email(&bank.staff, "carol@example.com")
        .await?;
    let opened = bank
        .service
        .open_account(&bank.staff, profile.customer.id, AccountType::Checking, 0)
        .await?;
    bank.service
        .transfer(&alice, a.id, &opened.account.account_number, 4000, None)
        .await?;

    let result = bank
        .service
        .review_registration(&bank.staff, user.id, false)
        .await;
    assert!(matches!(result, Err(AppError::InvalidOperation(_))));

    // Nothing was removed: both sides of the transfer are still logged
    assert_eq!(bank.balance(&a).await?, 6000);
    assert_eq!(bank.history_len(&a).await?, 2);
    assert_eq!(bank.balance(&opened.account).await?, 4000);
    assert_eq!(bank.history_len(&opened.account).await?, 1);
    assert_eq!(bank.service.pending_customers(&bank.staff).await?.len(), 1);

    let report = bank.service.check_integrity(&bank.admin).await?;
    assert!(report.is_healthy(), "{:?}", report.mismatches);
    assert_eq!(report.total_balance, 10000);

    // Approval is still possible
    let outcome = bank
        .service
        .review_registration(&bank.staff, user.id, true)
        .await?;
    assert!(matches!(outcome, ReviewOutcome::Approved(_)));
    Ok(())
}

#[tokio::test]
async fn test_review_after_another_review_fails() -> Result<()> {
    let bank = TestBank::new().await?;

    let approved = bank.service.register(applicant("carol@example.com")).await?;
    bank.service
        .review_registration(&bank.staff, approved.id, true)
        .await?;
    let result = bank
        .service
        .review_registration(&bank.staff, approved.id, false)
        .await;
    assert!(matches!(result, Err(AppError::InvalidOperation(_))));
    assert!(
        bank.service
            .authenticate("carol@example.com", "applicant-secret")
            .await?
            .is_some()
    );

    let rejected = bank.service.register(applicant("dave@example.com")).await?;
    bank.service
        .review_registration(&bank.staff, rejected.id, false)
        .await?;
    let result = bank
        .service
        .review_registration(&bank.staff, rejected.id, true)
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let result = bank
        .service
        .set_user_status(&bank.admin, rejected.id, true)
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_review_targets_only_pending_customers() -> Result<()> {
    let bank = TestBank::new().await?;
    let (alice, _) = bank.customer("Alice", "alice@example.com", 0).await?;

    // Provisioned customers were never pending
    let result = bank
        .service
        .review_registration(&bank.staff, alice.user_id, false)
        .await;
    assert!(matches!(result, Err(AppError::InvalidOperation(_))));

    // Staff users are not customers
    let result = bank
        .service
        .review_registration(&bank.staff, bank.staff.user_id, true)
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));

    let result = bank
        .service
        .review_registration(&alice, alice.user_id, true)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_email_is_rejected() -> Result<()> {
    let bank = TestBank::new().await?;
    bank.customer("Alice", "alice@example.com", 0).await?;

    let result = bank.service.register(applicant("ALICE@example.com")).await;
    assert!(matches!(result, Err(AppError::InvalidOperation(_))));

    let result = bank
        .service
        .provision_staff(&bank.admin, "Alice Again", "alice@example.com", "pw")
        .await;
    assert!(matches!(result, Err(AppError::InvalidOperation(_))));

    let result = bank.service.register(applicant("not-an-email")).await;
    assert!(matches!(result, Err(AppError::InvalidOperation(_))));
    Ok(())
}

#[tokio::test]
async fn test_bootstrap_admin_only_once() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let admin = service
        .bootstrap_admin("Root", ADMIN_EMAIL, ADMIN_PASSWORD)
        .await?
        .expect("first admin is created");
    assert_eq!(admin.role, Role::Admin);
    assert!(admin.is_active);

    let second = service
        .bootstrap_admin("Other", "other@bank.test", "pw")
        .await?;
    assert!(second.is_none());
    Ok(())
}

#[tokio::test]
async fn test_login_and_logout_sessions() -> Result<()> {
    let bank = TestBank::new().await?;

    assert!(
        bank.service
            .login(ADMIN_EMAIL, "wrong password")
            .await?
            .is_none()
    );

    let login = bank
        .service
        .login(ADMIN_EMAIL, ADMIN_PASSWORD)
        .await?
        .expect("admin can log in");
    assert!(login.session.is_open());
    assert_eq!(login.principal(), bank.admin);

    let session = bank
        .service
        .logout(&bank.admin)
        .await?
        .expect("open session is closed");
    assert!(!session.is_open());
    assert!(session.duration_seconds.unwrap_or(-1.0) >= 0.0);

    assert!(bank.service.logout(&bank.admin).await?.is_none());

    let stats = bank.service.dashboard(&bank.admin).await?;
    assert_eq!(stats.recent_sessions.len(), 1);
    assert_eq!(stats.recent_sessions[0].user_name, "Ada Admin");
    Ok(())
}

#[tokio::test]
async fn test_staff_can_block_accounts_but_customers_cannot() -> Result<()> {
    let bank = TestBank::new().await?;
    let (alice, a) = bank.customer("Alice", "alice@example.com", 0).await?;

    let result = bank
        .service
        .set_account_status(&alice, a.id, AccountStatus::Blocked)
        .await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    let blocked = bank
        .service
        .set_account_status(&bank.staff, a.id, AccountStatus::Blocked)
        .await?;
    assert_eq!(blocked.status, AccountStatus::Blocked);
    Ok(())
}
