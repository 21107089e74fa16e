//! In-process store with snapshot transactions
//!
//! `MemoryStore::begin` hands out a [`MemoryTx`] working on a private copy of
//! every table. `commit` validates the copies the transaction locked against
//! the shared state and publishes the rows it wrote; dropping the transaction
//! discards them. A copy locked by a transaction that committed in between
//! fails the later commit with [`AppError::Conflict`], which is how a row lock
//! surfaces to the loser of a race.
//!
//! Commit also rejects loan updates made against a loan that changed since,
//! fines settled elsewhere first, and pending reservations that would break
//! the one-per-copy or one-per-user-and-title rule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use super::{CatalogStore, CopyStore, FineStore, LoanStore, ReservationStore, TransactionSource};
use crate::{
    error::{AppError, AppResult},
    models::{
        Book, BookCopy, CopyFilter, CopyStatus, Fine, FineFilter, ListParams, Loan, LoanFilter,
        LoanHistory, LoanStatus, NewFine, NewLoan, NewLoanHistory, NewReservation, Reservation,
        ReservationFilter, ReservationStatus, SortDirection, User,
    },
};

#[derive(Debug, Clone, Default)]
struct Tables {
    books: BTreeMap<i64, Book>,
    users: BTreeMap<i64, User>,
    copies: BTreeMap<i64, BookCopy>,
    loans: BTreeMap<i64, Loan>,
    histories: BTreeMap<i64, LoanHistory>,
    reservations: BTreeMap<i64, Reservation>,
    fines: BTreeMap<i64, Fine>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Tables,
    /// Bumped each time a transaction holding the copy's lock commits
    copy_versions: HashMap<i64, u64>,
    next_id: i64,
}

impl Shared {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
struct WriteSet {
    copies: BTreeSet<i64>,
    loans: BTreeSet<i64>,
    histories: BTreeSet<i64>,
    reservations: BTreeSet<i64>,
    fines: BTreeSet<i64>,
}

/// Shared in-process database
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> MemoryTx {
        let shared = self.shared.lock();
        MemoryTx {
            shared: Arc::clone(&self.shared),
            tables: shared.tables.clone(),
            versions: shared.copy_versions.clone(),
            locked: HashMap::new(),
            loan_guards: HashMap::new(),
            settled_fines: BTreeSet::new(),
            written: WriteSet::default(),
        }
    }

    /// Registers a title. Catalog management is not part of the engine, so
    /// this writes straight through.
    pub fn add_book(&self, title: &str) -> Book {
        let mut shared = self.shared.lock();
        let book = Book {
            id: shared.allocate_id(),
            title: title.to_string(),
        };
        shared.tables.books.insert(book.id, book.clone());
        book
    }

    pub fn add_user(&self, username: &str) -> User {
        let mut shared = self.shared.lock();
        let user = User {
            id: shared.allocate_id(),
            username: username.to_string(),
        };
        shared.tables.users.insert(user.id, user.clone());
        user
    }
}

#[async_trait]
impl TransactionSource for MemoryStore {
    type Tx = MemoryTx;
    type Store = MemoryTx;

    async fn begin(&self) -> AppResult<MemoryTx> {
        Ok(MemoryStore::begin(self))
    }

    async fn commit(&self, tx: MemoryTx) -> AppResult<()> {
        tx.commit()
    }

    fn store(tx: &mut MemoryTx) -> &mut MemoryTx {
        tx
    }
}

/// Open transaction on a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryTx {
    shared: Arc<Mutex<Shared>>,
    tables: Tables,
    versions: HashMap<i64, u64>,
    /// Copy id -> version observed when the lock was taken
    locked: HashMap<i64, u64>,
    /// Loan id -> renewal count the first update expected
    loan_guards: HashMap<i64, i32>,
    settled_fines: BTreeSet<i64>,
    written: WriteSet,
}

impl MemoryTx {
    pub fn commit(self) -> AppResult<()> {
        let mut shared = self.shared.lock();

        for (id, seen) in &self.locked {
            let current = shared.copy_versions.get(id).copied().unwrap_or(0);
            if current != *seen {
                tracing::debug!(copy_id = id, "Rejecting commit on stale copy lock");
                return Err(AppError::Conflict(format!(
                    "Copy {} was modified by a concurrent transaction",
                    id
                )));
            }
        }

        for (id, renew_count) in &self.loan_guards {
            let current = shared.tables.loans.get(id);
            if current.map_or(false, |l| !l.is_borrowed() || l.renew_count != *renew_count) {
                tracing::debug!(loan_id = id, "Rejecting commit on stale loan");
                return Err(AppError::Conflict(format!(
                    "Loan {} was modified by a concurrent transaction",
                    id
                )));
            }
        }

        for id in &self.settled_fines {
            if shared.tables.fines.get(id).map_or(false, |f| f.settled) {
                return Err(AppError::Conflict(format!("Fine {} is already settled", id)));
            }
        }

        for id in &self.written.reservations {
            let Some(row) = self.tables.reservations.get(id) else {
                continue;
            };
            if !row.is_pending() {
                continue;
            }
            let duplicate = shared.tables.reservations.values().any(|r| {
                r.id != row.id
                    && r.is_pending()
                    && (r.book_copy_id == row.book_copy_id
                        || (r.user_id == row.user_id && r.book_id == row.book_id))
            });
            if duplicate {
                return Err(AppError::Conflict(format!(
                    "Pending reservation {} collides with a committed one",
                    row.id
                )));
            }
        }

        macro_rules! publish {
            ($table:ident) => {
                for id in &self.written.$table {
                    if let Some(row) = self.tables.$table.get(id) {
                        shared.tables.$table.insert(*id, row.clone());
                    }
                }
            };
        }

        publish!(copies);
        publish!(loans);
        publish!(histories);
        publish!(reservations);
        publish!(fines);

        for id in self.locked.keys() {
            *shared.copy_versions.entry(*id).or_insert(0) += 1;
        }

        Ok(())
    }

    /// Discards every write. Equivalent to dropping the transaction.
    pub fn rollback(self) {}

    fn allocate_id(&self) -> i64 {
        self.shared.lock().allocate_id()
    }
}

fn page<T, K: Ord>(mut rows: Vec<T>, params: &ListParams, key: impl Fn(&T) -> K) -> Vec<T> {
    rows.sort_by(|a, b| key(a).cmp(&key(b)));
    if params.direction == SortDirection::Desc {
        rows.reverse();
    }
    let offset = params.offset.max(0) as usize;
    let limit = params.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
    rows.into_iter().skip(offset).take(limit).collect()
}

fn copy_matches(copy: &BookCopy, filter: &CopyFilter) -> bool {
    !copy.is_deleted()
        && filter.book_id.map_or(true, |id| copy.book_id == id)
        && filter.status.map_or(true, |s| copy.status == s)
}

fn loan_matches(loan: &Loan, filter: &LoanFilter) -> bool {
    filter.user_id.map_or(true, |id| loan.user_id == id)
        && filter.book_copy_id.map_or(true, |id| loan.book_copy_id == id)
        && filter.book_id.map_or(true, |id| loan.book_id == id)
        && filter.status.map_or(true, |s| loan.status == s)
        && filter.overdue_at.map_or(true, |at| loan.is_overdue(at))
}

fn reservation_matches(reservation: &Reservation, filter: &ReservationFilter) -> bool {
    filter.user_id.map_or(true, |id| reservation.user_id == id)
        && filter.book_copy_id.map_or(true, |id| reservation.book_copy_id == id)
        && filter.book_id.map_or(true, |id| reservation.book_id == id)
        && filter.status.map_or(true, |s| reservation.status == s)
        && filter.expired_at.map_or(true, |at| reservation.is_expired(at))
}

impl MemoryTx {
    fn fine_matches(&self, fine: &Fine, filter: &FineFilter) -> bool {
        let owner_matches = match filter.user_id {
            Some(user_id) => self
                .tables
                .loans
                .get(&fine.loan_id)
                .map_or(false, |loan| loan.user_id == user_id),
            None => true,
        };
        owner_matches
            && filter.loan_id.map_or(true, |id| fine.loan_id == id)
            && filter.settled.map_or(true, |s| fine.settled == s)
    }
}

#[async_trait]
impl CatalogStore for MemoryTx {
    async fn book_get(&mut self, id: i64) -> AppResult<Option<Book>> {
        Ok(self.tables.books.get(&id).cloned())
    }

    async fn user_get(&mut self, id: i64) -> AppResult<Option<User>> {
        Ok(self.tables.users.get(&id).cloned())
    }
}

#[async_trait]
impl CopyStore for MemoryTx {
    async fn copy_get(&mut self, id: i64) -> AppResult<Option<BookCopy>> {
        Ok(self.tables.copies.get(&id).cloned())
    }

    async fn copy_lock(&mut self, id: i64) -> AppResult<Option<BookCopy>> {
        let copy = self
            .tables
            .copies
            .get(&id)
            .filter(|c| !c.is_deleted())
            .cloned();
        if copy.is_some() {
            let version = self.versions.get(&id).copied().unwrap_or(0);
            self.locked.entry(id).or_insert(version);
        }
        Ok(copy)
    }

    async fn copy_insert(&mut self, book_id: i64, now: DateTime<Utc>) -> AppResult<BookCopy> {
        if !self.tables.books.contains_key(&book_id) {
            return Err(AppError::NotFound(format!("Book with id {} not found", book_id)));
        }
        let copy = BookCopy {
            id: self.allocate_id(),
            book_id,
            status: CopyStatus::Available,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.tables.copies.insert(copy.id, copy.clone());
        self.written.copies.insert(copy.id);
        Ok(copy)
    }

    async fn copy_set_status(
        &mut self,
        id: i64,
        expected: CopyStatus,
        status: CopyStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        match self.tables.copies.get_mut(&id) {
            Some(copy) if !copy.is_deleted() && copy.status == expected => {
                copy.status = status;
                copy.updated_at = now;
                self.written.copies.insert(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn copy_soft_delete(&mut self, id: i64, now: DateTime<Utc>) -> AppResult<bool> {
        match self.tables.copies.get_mut(&id) {
            Some(copy) if !copy.is_deleted() && copy.status == CopyStatus::Available => {
                copy.deleted_at = Some(now);
                copy.updated_at = now;
                self.written.copies.insert(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn copy_list(
        &mut self,
        filter: &CopyFilter,
        params: &ListParams,
    ) -> AppResult<Vec<BookCopy>> {
        let rows: Vec<BookCopy> = self
            .tables
            .copies
            .values()
            .filter(|c| copy_matches(c, filter))
            .cloned()
            .collect();
        Ok(page(rows, params, |c| (c.created_at, c.id)))
    }

    async fn copy_count(&mut self, filter: &CopyFilter) -> AppResult<i64> {
        Ok(self
            .tables
            .copies
            .values()
            .filter(|c| copy_matches(c, filter))
            .count() as i64)
    }
}

#[async_trait]
impl LoanStore for MemoryTx {
    async fn loan_get(&mut self, id: i64) -> AppResult<Option<Loan>> {
        Ok(self.tables.loans.get(&id).cloned())
    }

    async fn loan_active_by_copy(&mut self, book_copy_id: i64) -> AppResult<Option<Loan>> {
        Ok(self
            .tables
            .loans
            .values()
            .find(|l| l.book_copy_id == book_copy_id && l.is_borrowed())
            .cloned())
    }

    async fn loan_insert(&mut self, loan: &NewLoan) -> AppResult<Loan> {
        let row = Loan {
            id: self.allocate_id(),
            book_copy_id: loan.book_copy_id,
            book_id: loan.book_id,
            user_id: loan.user_id,
            status: LoanStatus::Borrowed,
            borrow_date: loan.borrow_date,
            due_date: loan.due_date,
            return_date: None,
            renew_count: 0,
            created_at: loan.borrow_date,
            updated_at: loan.borrow_date,
        };
        self.tables.loans.insert(row.id, row.clone());
        self.written.loans.insert(row.id);
        Ok(row)
    }

    async fn loan_update(&mut self, loan: &Loan, expected_renew_count: i32) -> AppResult<bool> {
        match self.tables.loans.get_mut(&loan.id) {
            Some(row) if row.is_borrowed() && row.renew_count == expected_renew_count => {
                row.status = loan.status;
                row.due_date = loan.due_date;
                row.return_date = loan.return_date;
                row.renew_count = loan.renew_count;
                row.updated_at = loan.updated_at;
                self.loan_guards.entry(loan.id).or_insert(expected_renew_count);
                self.written.loans.insert(loan.id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn loan_count_borrowed_by_user(&mut self, user_id: i64) -> AppResult<i64> {
        Ok(self
            .tables
            .loans
            .values()
            .filter(|l| l.user_id == user_id && l.is_borrowed())
            .count() as i64)
    }

    async fn loan_count_borrowed_on_title(
        &mut self,
        user_id: i64,
        book_id: i64,
    ) -> AppResult<i64> {
        Ok(self
            .tables
            .loans
            .values()
            .filter(|l| l.user_id == user_id && l.book_id == book_id && l.is_borrowed())
            .count() as i64)
    }

    async fn loan_history_insert(&mut self, entry: &NewLoanHistory) -> AppResult<LoanHistory> {
        let row = LoanHistory {
            id: self.allocate_id(),
            loan_id: entry.loan_id,
            action: entry.action,
            due_date: entry.due_date,
            previous_due_date: entry.previous_due_date,
            created_at: entry.created_at,
        };
        self.tables.histories.insert(row.id, row.clone());
        self.written.histories.insert(row.id);
        Ok(row)
    }

    async fn loan_history_list(&mut self, loan_id: i64) -> AppResult<Vec<LoanHistory>> {
        let rows: Vec<LoanHistory> = self
            .tables
            .histories
            .values()
            .filter(|h| h.loan_id == loan_id)
            .cloned()
            .collect();
        Ok(page(rows, &ListParams::ascending(), |h| (h.created_at, h.id)))
    }

    async fn loan_list(&mut self, filter: &LoanFilter, params: &ListParams) -> AppResult<Vec<Loan>> {
        let rows: Vec<Loan> = self
            .tables
            .loans
            .values()
            .filter(|l| loan_matches(l, filter))
            .cloned()
            .collect();
        Ok(page(rows, params, |l| (l.created_at, l.id)))
    }

    async fn loan_count(&mut self, filter: &LoanFilter) -> AppResult<i64> {
        Ok(self
            .tables
            .loans
            .values()
            .filter(|l| loan_matches(l, filter))
            .count() as i64)
    }
}

#[async_trait]
impl ReservationStore for MemoryTx {
    async fn reservation_get(&mut self, id: i64) -> AppResult<Option<Reservation>> {
        Ok(self.tables.reservations.get(&id).cloned())
    }

    async fn reservation_pending_by_copy(
        &mut self,
        book_copy_id: i64,
    ) -> AppResult<Option<Reservation>> {
        Ok(self
            .tables
            .reservations
            .values()
            .find(|r| r.book_copy_id == book_copy_id && r.is_pending())
            .cloned())
    }

    async fn reservation_insert(&mut self, reservation: &NewReservation) -> AppResult<Reservation> {
        let row = Reservation {
            id: self.allocate_id(),
            book_copy_id: reservation.book_copy_id,
            book_id: reservation.book_id,
            user_id: reservation.user_id,
            status: ReservationStatus::Pending,
            reservation_date: reservation.reservation_date,
            created_at: reservation.created_at,
            updated_at: reservation.created_at,
        };
        self.tables.reservations.insert(row.id, row.clone());
        self.written.reservations.insert(row.id);
        Ok(row)
    }

    async fn reservation_set_status(
        &mut self,
        id: i64,
        expected: ReservationStatus,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        match self.tables.reservations.get_mut(&id) {
            Some(row) if row.status == expected => {
                row.status = status;
                row.updated_at = now;
                self.written.reservations.insert(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reservation_count_pending_by_user(&mut self, user_id: i64) -> AppResult<i64> {
        Ok(self
            .tables
            .reservations
            .values()
            .filter(|r| r.user_id == user_id && r.is_pending())
            .count() as i64)
    }

    async fn reservation_count_pending_on_title(
        &mut self,
        user_id: i64,
        book_id: i64,
    ) -> AppResult<i64> {
        Ok(self
            .tables
            .reservations
            .values()
            .filter(|r| r.user_id == user_id && r.book_id == book_id && r.is_pending())
            .count() as i64)
    }

    async fn reservation_list(
        &mut self,
        filter: &ReservationFilter,
        params: &ListParams,
    ) -> AppResult<Vec<Reservation>> {
        let rows: Vec<Reservation> = self
            .tables
            .reservations
            .values()
            .filter(|r| reservation_matches(r, filter))
            .cloned()
            .collect();
        Ok(page(rows, params, |r| (r.created_at, r.id)))
    }

    async fn reservation_count(&mut self, filter: &ReservationFilter) -> AppResult<i64> {
        Ok(self
            .tables
            .reservations
            .values()
            .filter(|r| reservation_matches(r, filter))
            .count() as i64)
    }
}

#[async_trait]
impl FineStore for MemoryTx {
    async fn fine_get(&mut self, id: i64) -> AppResult<Option<Fine>> {
        Ok(self.tables.fines.get(&id).cloned())
    }

    async fn fine_insert(&mut self, fine: &NewFine) -> AppResult<Fine> {
        let row = Fine {
            id: self.allocate_id(),
            loan_id: fine.loan_id,
            amount: fine.amount,
            settled: false,
            created_at: fine.created_at,
            updated_at: fine.created_at,
        };
        self.tables.fines.insert(row.id, row.clone());
        self.written.fines.insert(row.id);
        Ok(row)
    }

    async fn fine_settle(&mut self, id: i64, now: DateTime<Utc>) -> AppResult<bool> {
        match self.tables.fines.get_mut(&id) {
            Some(fine) if !fine.settled => {
                fine.settled = true;
                fine.updated_at = now;
                self.settled_fines.insert(id);
                self.written.fines.insert(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fine_list(&mut self, filter: &FineFilter, params: &ListParams) -> AppResult<Vec<Fine>> {
        let rows: Vec<Fine> = self
            .tables
            .fines
            .values()
            .filter(|f| self.fine_matches(f, filter))
            .cloned()
            .collect();
        Ok(page(rows, params, |f| (f.created_at, f.id)))
    }

    async fn fine_count(&mut self, filter: &FineFilter) -> AppResult<i64> {
        Ok(self
            .tables
            .fines
            .values()
            .filter(|f| self.fine_matches(f, filter))
            .count() as i64)
    }

    async fn fine_outstanding_total(&mut self, user_id: i64) -> AppResult<Decimal> {
        let filter = FineFilter {
            user_id: Some(user_id),
            settled: Some(false),
            ..FineFilter::default()
        };
        Ok(self
            .tables
            .fines
            .values()
            .filter(|f| self.fine_matches(f, &filter))
            .map(|f| f.amount)
            .sum())
    }
}
