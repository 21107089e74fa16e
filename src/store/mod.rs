//! Transactional store seams
//!
//! Every engine operation receives a `&mut` handle to an open transaction and
//! performs all of its reads and writes through it. The caller owns the
//! transaction: it commits on success and rolls back (or drops) on error.
//!
//! PostgreSQL implements these traits on `sqlx::PgConnection`, so a
//! `sqlx::Transaction<'_, Postgres>` is passed as `&mut *tx`. The in-process
//! [`memory::MemoryTx`] implements them over a snapshot.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[cfg(test)]
use mockall::automock;

use crate::{
    error::AppResult,
    models::{
        Book, BookCopy, CopyFilter, CopyStatus, Fine, FineFilter, ListParams, Loan, LoanFilter,
        LoanHistory, NewFine, NewLoan, NewLoanHistory, NewReservation, Reservation,
        ReservationFilter, ReservationStatus, User,
    },
};

/// Titles and users, read-only from the engine's point of view
#[async_trait]
pub trait CatalogStore: Send {
    async fn book_get(&mut self, id: i64) -> AppResult<Option<Book>>;

    async fn user_get(&mut self, id: i64) -> AppResult<Option<User>>;
}

#[async_trait]
pub trait CopyStore: Send {
    /// Returns soft-deleted copies too; callers decide what a deleted copy
    /// means for them.
    async fn copy_get(&mut self, id: i64) -> AppResult<Option<BookCopy>>;

    /// Reads a live copy and holds a row lock on it until the transaction
    /// ends.
    async fn copy_lock(&mut self, id: i64) -> AppResult<Option<BookCopy>>;

    async fn copy_insert(&mut self, book_id: i64, now: DateTime<Utc>) -> AppResult<BookCopy>;

    /// Compare-and-set on the status column. Returns `false` when the copy
    /// is no longer in `expected`.
    async fn copy_set_status(
        &mut self,
        id: i64,
        expected: CopyStatus,
        status: CopyStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Soft-deletes an available copy. Returns `false` when it is not
    /// available any more.
    async fn copy_soft_delete(&mut self, id: i64, now: DateTime<Utc>) -> AppResult<bool>;

    async fn copy_list(
        &mut self,
        filter: &CopyFilter,
        params: &ListParams,
    ) -> AppResult<Vec<BookCopy>>;

    async fn copy_count(&mut self, filter: &CopyFilter) -> AppResult<i64>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LoanStore: Send {
    async fn loan_get(&mut self, id: i64) -> AppResult<Option<Loan>>;

    async fn loan_active_by_copy(&mut self, book_copy_id: i64) -> AppResult<Option<Loan>>;

    async fn loan_insert(&mut self, loan: &NewLoan) -> AppResult<Loan>;

    /// Writes status, due date, return date and renewal count, but only while
    /// the stored loan is still borrowed with `expected_renew_count`
    /// renewals. Returns `false` when it is not.
    async fn loan_update(&mut self, loan: &Loan, expected_renew_count: i32) -> AppResult<bool>;

    async fn loan_count_borrowed_by_user(&mut self, user_id: i64) -> AppResult<i64>;

    async fn loan_count_borrowed_on_title(&mut self, user_id: i64, book_id: i64)
        -> AppResult<i64>;

    async fn loan_history_insert(&mut self, entry: &NewLoanHistory) -> AppResult<LoanHistory>;

    /// Oldest first.
    async fn loan_history_list(&mut self, loan_id: i64) -> AppResult<Vec<LoanHistory>>;

    async fn loan_list(&mut self, filter: &LoanFilter, params: &ListParams)
        -> AppResult<Vec<Loan>>;

    async fn loan_count(&mut self, filter: &LoanFilter) -> AppResult<i64>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReservationStore: Send {
    async fn reservation_get(&mut self, id: i64) -> AppResult<Option<Reservation>>;

    async fn reservation_pending_by_copy(
        &mut self,
        book_copy_id: i64,
    ) -> AppResult<Option<Reservation>>;

    async fn reservation_insert(&mut self, reservation: &NewReservation)
        -> AppResult<Reservation>;

    /// Compare-and-set on the status column.
    async fn reservation_set_status(
        &mut self,
        id: i64,
        expected: ReservationStatus,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    async fn reservation_count_pending_by_user(&mut self, user_id: i64) -> AppResult<i64>;

    async fn reservation_count_pending_on_title(
        &mut self,
        user_id: i64,
        book_id: i64,
    ) -> AppResult<i64>;

    async fn reservation_list(
        &mut self,
        filter: &ReservationFilter,
        params: &ListParams,
    ) -> AppResult<Vec<Reservation>>;

    async fn reservation_count(&mut self, filter: &ReservationFilter) -> AppResult<i64>;
}

#[async_trait]
pub trait FineStore: Send {
    async fn fine_get(&mut self, id: i64) -> AppResult<Option<Fine>>;

    async fn fine_insert(&mut self, fine: &NewFine) -> AppResult<Fine>;

    /// Marks an unsettled fine settled. Returns `false` if it already was.
    async fn fine_settle(&mut self, id: i64, now: DateTime<Utc>) -> AppResult<bool>;

    async fn fine_list(&mut self, filter: &FineFilter, params: &ListParams)
        -> AppResult<Vec<Fine>>;

    async fn fine_count(&mut self, filter: &FineFilter) -> AppResult<i64>;

    /// Sum of unsettled fines on the user's loans.
    async fn fine_outstanding_total(&mut self, user_id: i64) -> AppResult<Decimal>;
}

/// Everything the lifecycle controller needs from one transaction
pub trait LendingStore: CatalogStore + CopyStore + LoanStore + ReservationStore + FineStore {}

impl<T> LendingStore for T where
    T: CatalogStore + CopyStore + LoanStore + ReservationStore + FineStore + ?Sized
{
}

/// Opens and commits transactions for work that manages its own, such as
/// the expiry sweep. Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    type Tx: Send;
    type Store: LendingStore + ?Sized;

    async fn begin(&self) -> AppResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> AppResult<()>;

    fn store(tx: &mut Self::Tx) -> &mut Self::Store;
}
