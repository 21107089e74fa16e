//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use lending_engine::{
    clock::ManualClock,
    config::LendingPolicy,
    models::{Book, BookCopy, CopyStatus, User},
    services::Services,
    store::{
        memory::{MemoryStore, MemoryTx},
        LoanStore, ReservationStore,
    },
};

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 12, 27, 0, 0, 0).unwrap()
}

pub struct Harness {
    pub store: MemoryStore,
    pub services: Services,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(LendingPolicy::default())
    }

    pub fn with_policy(policy: LendingPolicy) -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let services = Services::new(policy, clock.clone());
        Self {
            store: MemoryStore::new(),
            services,
            clock,
        }
    }

    pub fn begin(&self) -> MemoryTx {
        self.store.begin()
    }

    pub fn book(&self, title: &str) -> Book {
        self.store.add_book(title)
    }

    pub fn user(&self, username: &str) -> User {
        self.store.add_user(username)
    }

    /// Adds one copy of `book` in its own committed transaction.
    pub async fn copy_of(&self, book: &Book) -> BookCopy {
        let mut tx = self.begin();
        let copy = self
            .services
            .lifecycle
            .add_copy(&mut tx, book.id)
            .await
            .expect("add copy");
        tx.commit().expect("commit copy");
        copy
    }

    pub async fn status_of(&self, copy_id: i64) -> CopyStatus {
        let mut tx = self.begin();
        self.services
            .lifecycle
            .get_copy(&mut tx, copy_id)
            .await
            .expect("read copy")
            .status
    }

    /// Checks that the copy's status agrees with its loans and reservations.
    pub async fn assert_consistent(&self, copy_id: i64) {
        let mut tx = self.begin();
        let copy = self
            .services
            .lifecycle
            .get_copy(&mut tx, copy_id)
            .await
            .expect("read copy");
        let active_loan = tx.loan_active_by_copy(copy_id).await.expect("read loan");
        let pending = tx
            .reservation_pending_by_copy(copy_id)
            .await
            .expect("read reservation");

        match copy.status {
            CopyStatus::Available => {
                assert!(active_loan.is_none(), "available copy {} has a loan", copy_id);
                assert!(pending.is_none(), "available copy {} has a hold", copy_id);
            }
            CopyStatus::OnLoan => {
                assert!(active_loan.is_some(), "copy {} on loan without a loan", copy_id);
                assert!(pending.is_none(), "copy {} on loan with a hold", copy_id);
            }
            CopyStatus::OnReserve => {
                assert!(active_loan.is_none(), "reserved copy {} has a loan", copy_id);
                assert!(pending.is_some(), "copy {} on reserve without a hold", copy_id);
            }
        }
    }
}
