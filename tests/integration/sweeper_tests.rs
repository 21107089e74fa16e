//! Reservation expiry sweep

mod common;

use async_trait::async_trait;
use chrono::Duration;
use common::Harness;
use lending_engine::{
    error::{AppError, AppResult},
    models::{CopyStatus, ReservationStatus},
    services::sweeper::SweepReport,
    store::{
        memory::{MemoryStore, MemoryTx},
        TransactionSource,
    },
};

/// Store whose commits always fail, as a broken database connection would.
struct BrokenCommits(MemoryStore);

#[async_trait]
impl TransactionSource for BrokenCommits {
    type Tx = MemoryTx;
    type Store = MemoryTx;

    async fn begin(&self) -> AppResult<MemoryTx> {
        Ok(self.0.begin())
    }

    async fn commit(&self, _tx: MemoryTx) -> AppResult<()> {
        Err(AppError::Internal("connection reset".to_string()))
    }

    fn store(tx: &mut MemoryTx) -> &mut MemoryTx {
        tx
    }
}

#[tokio::test]
async fn test_sweep_cancels_only_expired_holds() {
    let h = Harness::new();
    let alice = h.user("alice");
    let bob = h.user("bob");
    let old = h.copy_of(&h.book("Dune")).await;
    let fresh = h.copy_of(&h.book("Emma")).await;

    let mut tx = h.begin();
    let expiring = h.services.lifecycle.reserve(&mut tx, old.id, alice.id).await.unwrap();
    tx.commit().unwrap();

    h.clock.advance(Duration::days(5));
    let mut tx = h.begin();
    let current = h.services.lifecycle.reserve(&mut tx, fresh.id, bob.id).await.unwrap();
    tx.commit().unwrap();

    h.clock.advance(Duration::days(3));
    let sweeper = h.services.sweeper(100);
    let report = sweeper.sweep_once(&h.store).await.unwrap();
    assert_eq!(
        report,
        SweepReport {
            expired: 1,
            cancelled: 1,
            skipped: 0,
            failed: 0,
        }
    );

    assert_eq!(h.status_of(old.id).await, CopyStatus::Available);
    assert_eq!(h.status_of(fresh.id).await, CopyStatus::OnReserve);
    h.assert_consistent(old.id).await;
    h.assert_consistent(fresh.id).await;

    let mut tx = h.begin();
    let closed = h.services.reservations.get(&mut tx, expiring.id).await.unwrap();
    assert_eq!(closed.status, ReservationStatus::Fulfilled);
    let open = h.services.reservations.get(&mut tx, current.id).await.unwrap();
    assert_eq!(open.status, ReservationStatus::Pending);
}

#[tokio::test]
async fn test_sweep_with_nothing_expired_is_a_no_op() {
    let h = Harness::new();
    let alice = h.user("alice");
    let copy = h.copy_of(&h.book("Dune")).await;

    let mut tx = h.begin();
    h.services.lifecycle.reserve(&mut tx, copy.id, alice.id).await.unwrap();
    tx.commit().unwrap();

    let report = h.services.sweeper(100).sweep_once(&h.store).await.unwrap();
    assert_eq!(report, SweepReport::default());
    assert_eq!(h.status_of(copy.id).await, CopyStatus::OnReserve);
}

#[tokio::test]
async fn test_sweep_respects_batch_size() {
    let h = Harness::new();
    let alice = h.user("alice");
    let mut copies = Vec::new();
    for title in ["Dune", "Emma", "Ulysses"] {
        copies.push(h.copy_of(&h.book(title)).await);
    }

    let mut tx = h.begin();
    for copy in &copies {
        h.services.lifecycle.reserve(&mut tx, copy.id, alice.id).await.unwrap();
    }
    tx.commit().unwrap();

    h.clock.advance(Duration::days(8));
    let sweeper = h.services.sweeper(2);

    let first = sweeper.sweep_once(&h.store).await.unwrap();
    assert_eq!(first.cancelled, 2);
    // Oldest holds go first.
    assert_eq!(h.status_of(copies[0].id).await, CopyStatus::Available);
    assert_eq!(h.status_of(copies[2].id).await, CopyStatus::OnReserve);

    let second = sweeper.sweep_once(&h.store).await.unwrap();
    assert_eq!(second.cancelled, 1);
    assert_eq!(h.status_of(copies[2].id).await, CopyStatus::Available);
}

#[tokio::test]
async fn test_data_layer_failures_are_counted_as_failed() {
    let h = Harness::new();
    let alice = h.user("alice");
    let copy = h.copy_of(&h.book("Dune")).await;

    let mut tx = h.begin();
    h.services.lifecycle.reserve(&mut tx, copy.id, alice.id).await.unwrap();
    tx.commit().unwrap();

    h.clock.advance(Duration::days(8));
    let broken = BrokenCommits(h.store.clone());
    let report = h.services.sweeper(100).sweep_once(&broken).await.unwrap();

    assert_eq!(
        report,
        SweepReport {
            expired: 1,
            cancelled: 0,
            skipped: 0,
            failed: 1,
        }
    );
    assert_eq!(h.status_of(copy.id).await, CopyStatus::OnReserve);
}
