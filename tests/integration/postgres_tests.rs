//! Circulation against a live PostgreSQL database
//!
//! Needs `DATABASE_URL` pointing at a scratch database.
//! Run with: cargo test --test postgres -- --ignored

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgConnection;
use tokio::task::JoinHandle;

use lending_engine::{
    clock::SystemClock,
    config::{DatabaseConfig, LendingPolicy},
    error::{AppError, AppResult},
    models::{CopyStatus, Loan, LoanStatus},
    repository::Repository,
    services::Services,
};

async fn setup() -> (Repository, Services) {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let repository = Repository::connect(&DatabaseConfig {
        url,
        ..DatabaseConfig::default()
    })
    .await
    .expect("Failed to connect to database");
    repository.migrate().await.expect("Failed to run migrations");

    let services = Services::new(LendingPolicy::default(), Arc::new(SystemClock));
    (repository, services)
}

async fn seed(repository: &Repository, title: &str, username: &str) -> (i64, i64) {
    let book_id: i64 = sqlx::query_scalar("INSERT INTO books (title) VALUES ($1) RETURNING id")
        .bind(title)
        .fetch_one(&repository.pool)
        .await
        .expect("Failed to insert book");
    let user_id: i64 =
        sqlx::query_scalar("INSERT INTO users (username) VALUES ($1) RETURNING id")
            .bind(format!("{}-{}", username, book_id))
            .fetch_one(&repository.pool)
            .await
            .expect("Failed to insert user");
    (book_id, user_id)
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Borrow { copy_id: i64, user_id: i64 },
    Renew(i64),
    Return(i64),
}

async fn run(services: &Services, tx: &mut PgConnection, op: Op) -> AppResult<Loan> {
    match op {
        Op::Borrow { copy_id, user_id } => services.lifecycle.borrow(tx, copy_id, user_id).await,
        Op::Renew(loan_id) => services.lifecycle.renew(tx, loan_id).await,
        Op::Return(loan_id) => services.lifecycle.return_loan(tx, loan_id).await,
    }
}

/// Runs `op` in its own transaction on another task, committing on success.
fn contend(repository: &Repository, services: &Services, op: Op) -> JoinHandle<AppResult<Loan>> {
    let repository = repository.clone();
    let services = services.clone();
    tokio::spawn(async move {
        let mut tx = repository.begin().await?;
        let loan = run(&services, &mut *tx, op).await?;
        tx.commit().await?;
        Ok(loan)
    })
}

/// Performs `held` and keeps its transaction open until `contender`, on
/// another task, is blocked on the copy row. Returns both outcomes.
async fn interleave(
    repository: &Repository,
    services: &Services,
    held: Op,
    contender: Op,
) -> (Loan, AppResult<Loan>) {
    let mut tx = repository.begin().await.unwrap();
    let first = run(services, &mut *tx, held).await.unwrap();

    let second = contend(repository, services, contender);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!second.is_finished(), "contender should wait on the copy lock");

    tx.commit().await.unwrap();
    (first, second.await.unwrap())
}

async fn borrowed_copy(repository: &Repository, services: &Services, title: &str) -> (i64, Loan) {
    let (book_id, user_id) = seed(repository, title, "reader").await;
    let mut tx = repository.begin().await.unwrap();
    let copy = services.lifecycle.add_copy(&mut *tx, book_id).await.unwrap();
    let loan = services.lifecycle.borrow(&mut *tx, copy.id, user_id).await.unwrap();
    tx.commit().await.unwrap();
    (copy.id, loan)
}

#[tokio::test]
#[ignore]
async fn test_borrow_and_return() {
    let (repository, services) = setup().await;
    let (book_id, user_id) = seed(&repository, "Dune", "alice").await;

    let mut tx = repository.begin().await.unwrap();
    let copy = services.lifecycle.add_copy(&mut *tx, book_id).await.unwrap();
    let loan = services.lifecycle.borrow(&mut *tx, copy.id, user_id).await.unwrap();
    tx.commit().await.unwrap();

    let mut conn = repository.pool.acquire().await.unwrap();
    let stored = services.lifecycle.get_copy(&mut *conn, copy.id).await.unwrap();
    assert_eq!(stored.status, CopyStatus::OnLoan);

    let mut tx = repository.begin().await.unwrap();
    let returned = services.lifecycle.return_loan(&mut *tx, loan.id).await.unwrap();
    tx.commit().await.unwrap();
    assert_eq!(returned.status, LoanStatus::Returned);

    let stored = services.lifecycle.get_copy(&mut *conn, copy.id).await.unwrap();
    assert_eq!(stored.status, CopyStatus::Available);
}

#[tokio::test]
#[ignore]
async fn test_failed_operation_rolls_back() {
    let (repository, services) = setup().await;
    let (book_id, user_id) = seed(&repository, "Emma", "bob").await;

    let mut tx = repository.begin().await.unwrap();
    let copy = services.lifecycle.add_copy(&mut *tx, book_id).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = repository.begin().await.unwrap();
    services.lifecycle.reserve(&mut *tx, copy.id, user_id).await.unwrap();
    let err = services.lifecycle.reserve(&mut *tx, copy.id, user_id).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidState(_)));
    tx.rollback().await.unwrap();

    let mut conn = repository.pool.acquire().await.unwrap();
    let stored = services.lifecycle.get_copy(&mut *conn, copy.id).await.unwrap();
    assert_eq!(stored.status, CopyStatus::Available);
}

#[tokio::test]
#[ignore]
async fn test_concurrent_borrows_lend_the_copy_once() {
    let (repository, services) = setup().await;
    let (book_id, alice) = seed(&repository, "Ulysses", "alice").await;
    let (_, bob) = seed(&repository, "Ulysses-shadow", "bob").await;

    let mut tx = repository.begin().await.unwrap();
    let copy = services.lifecycle.add_copy(&mut *tx, book_id).await.unwrap();
    tx.commit().await.unwrap();

    let (loan, second) = interleave(
        &repository,
        &services,
        Op::Borrow { copy_id: copy.id, user_id: alice },
        Op::Borrow { copy_id: copy.id, user_id: bob },
    )
    .await;

    assert!(matches!(second, Err(AppError::InvalidState(_)) | Err(AppError::Conflict(_))));
    let mut conn = repository.pool.acquire().await.unwrap();
    let active = services.loans.active_by_copy(&mut *conn, copy.id).await.unwrap();
    assert_eq!(active.map(|l| l.id), Some(loan.id));
}

#[tokio::test]
#[ignore]
async fn test_concurrent_renewals_are_both_counted_or_rejected() {
    let (repository, services) = setup().await;
    let (_, loan) = borrowed_copy(&repository, &services, "Middlemarch").await;

    let (first, second) =
        interleave(&repository, &services, Op::Renew(loan.id), Op::Renew(loan.id)).await;
    assert_eq!(first.renew_count, 1);

    let mut conn = repository.pool.acquire().await.unwrap();
    let stored = services.loans.get(&mut *conn, loan.id).await.unwrap();
    match second {
        Ok(renewed) => {
            assert_eq!(renewed.renew_count, 2);
            assert_eq!(stored.renew_count, 2);
        }
        Err(err) => {
            assert!(matches!(err, AppError::Conflict(_)));
            assert_eq!(stored.renew_count, 1);
        }
    }
    let period = LendingPolicy::default().renewal_period();
    assert_eq!(stored.due_date, loan.due_date + period * stored.renew_count);
    let history = services.loans.histories(&mut *conn, loan.id).await.unwrap();
    assert_eq!(history.len() as i32, 1 + stored.renew_count);
}

#[tokio::test]
#[ignore]
async fn test_return_during_renewal_keeps_the_renewed_due_date() {
    let (repository, services) = setup().await;
    let (copy_id, loan) = borrowed_copy(&repository, &services, "Persuasion").await;

    let (renewed, second) =
        interleave(&repository, &services, Op::Renew(loan.id), Op::Return(loan.id)).await;

    let mut conn = repository.pool.acquire().await.unwrap();
    let stored = services.loans.get(&mut *conn, loan.id).await.unwrap();
    assert_eq!(stored.due_date, renewed.due_date);
    assert_eq!(stored.renew_count, 1);
    match second {
        Ok(returned) => {
            assert_eq!(returned.due_date, renewed.due_date);
            assert_eq!(stored.status, LoanStatus::Returned);
            let copy = services.lifecycle.get_copy(&mut *conn, copy_id).await.unwrap();
            assert_eq!(copy.status, CopyStatus::Available);
        }
        Err(err) => {
            assert!(matches!(err, AppError::Conflict(_)));
            assert_eq!(stored.status, LoanStatus::Borrowed);
        }
    }
}

#[tokio::test]
#[ignore]
async fn test_renewal_during_return_is_refused() {
    let (repository, services) = setup().await;
    let (copy_id, loan) = borrowed_copy(&repository, &services, "Emma-second").await;

    let (_, second) =
        interleave(&repository, &services, Op::Return(loan.id), Op::Renew(loan.id)).await;
    assert!(matches!(second, Err(AppError::InvalidState(_)) | Err(AppError::Conflict(_))));

    let mut conn = repository.pool.acquire().await.unwrap();
    let stored = services.loans.get(&mut *conn, loan.id).await.unwrap();
    assert_eq!(stored.status, LoanStatus::Returned);
    assert_eq!(stored.renew_count, 0);
    assert_eq!(stored.due_date, loan.due_date);
    let copy = services.lifecycle.get_copy(&mut *conn, copy_id).await.unwrap();
    assert_eq!(copy.status, CopyStatus::Available);
}

#[tokio::test]
#[ignore]
async fn test_second_pending_reservation_on_a_title_is_a_conflict() {
    let (repository, services) = setup().await;
    let (book_id, user_id) = seed(&repository, "Dracula", "carol").await;

    let mut tx = repository.begin().await.unwrap();
    let first = services.lifecycle.add_copy(&mut *tx, book_id).await.unwrap();
    let second = services.lifecycle.add_copy(&mut *tx, book_id).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = repository.begin().await.unwrap();
    services.lifecycle.reserve(&mut *tx, first.id, user_id).await.unwrap();

    let mut other = repository.begin().await.unwrap();
    let pending = tokio::spawn(async move {
        let services = Services::new(LendingPolicy::default(), Arc::new(SystemClock));
        let result = services.lifecycle.reserve(&mut *other, second.id, user_id).await;
        (result, other)
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.commit().await.unwrap();

    let (result, other) = pending.await.unwrap();
    other.rollback().await.unwrap();
    assert!(matches!(result, Err(AppError::Conflict(_))));
}
