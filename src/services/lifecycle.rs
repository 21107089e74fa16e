//! Copy lifecycle controller
//!
//! Single entry point for circulation. Every operation runs inside the
//! caller's transaction: it locks the copy row, consults the eligibility
//! rules, drives the loan ledger and reservation queue, then moves the copy's
//! status with a compare-and-set. Any error leaves the transaction for the
//! caller to roll back.
//!
//! ```text
//! Available --borrow--> OnLoan --return--> Available
//! Available --reserve--> OnReserve --cancel--> Available
//! OnReserve --borrow (reserver)--> OnLoan
//! OnLoan --renew--> OnLoan
//! ```

use std::sync::Arc;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{
        BookCopy, CopyDetails, CopyFilter, CopyStatus, Fine, ListParams, Loan, LoanFilter,
        LoanRecord, Reservation, ReservationFilter,
    },
    services::{
        eligibility::EligibilityService, fines::FinesService, loans::LoansService,
        reservations::ReservationsService,
    },
    store::{CopyStore, LendingStore},
};

/// Upper bound on copies registered by one `add_copies` call
pub const MAX_COPIES_PER_BATCH: i64 = 1000;

#[derive(Clone)]
pub struct LifecycleService {
    eligibility: EligibilityService,
    loans: LoansService,
    reservations: ReservationsService,
    fines: FinesService,
    clock: Arc<dyn Clock>,
}

impl LifecycleService {
    pub fn new(
        eligibility: EligibilityService,
        loans: LoansService,
        reservations: ReservationsService,
        fines: FinesService,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            eligibility,
            loans,
            reservations,
            fines,
            clock,
        }
    }

    async fn lock_copy<S>(&self, tx: &mut S, copy_id: i64) -> AppResult<BookCopy>
    where
        S: CopyStore + ?Sized,
    {
        tx.copy_lock(copy_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Book copy with id {} not found", copy_id)))
    }

    async fn move_copy<S>(
        &self,
        tx: &mut S,
        copy: &BookCopy,
        status: CopyStatus,
    ) -> AppResult<()>
    where
        S: CopyStore + ?Sized,
    {
        let moved = tx
            .copy_set_status(copy.id, copy.status, status, self.clock.now())
            .await?;
        if !moved {
            tracing::warn!(
                copy_id = copy.id,
                expected = %copy.status,
                target = %status,
                "Copy status changed underneath the transaction"
            );
            return Err(AppError::Conflict(format!(
                "Copy {} was modified by a concurrent transaction",
                copy.id
            )));
        }
        Ok(())
    }

    /// Lends a copy to `user_id`. A copy on reserve can only go to the user
    /// holding the pending reservation, which is fulfilled by the loan.
    pub async fn borrow<S>(&self, tx: &mut S, copy_id: i64, user_id: i64) -> AppResult<Loan>
    where
        S: LendingStore + ?Sized,
    {
        let copy = self.lock_copy(tx, copy_id).await?;

        self.eligibility
            .ensure_can_borrow(tx, user_id, copy.book_id)
            .await?;

        match copy.status {
            CopyStatus::OnLoan => {
                return Err(AppError::InvalidState("Book is already on loan".to_string()));
            }
            CopyStatus::OnReserve => {
                let reservation = self
                    .reservations
                    .pending_by_copy(tx, copy.id)
                    .await?
                    .filter(|r| r.user_id == user_id)
                    .ok_or_else(|| {
                        AppError::InvalidState(
                            "Book is currently on reserve by another user".to_string(),
                        )
                    })?;
                let reservation = self.reservations.fulfil(tx, reservation).await?;
                tracing::info!(
                    reservation_id = reservation.id,
                    copy_id,
                    user_id,
                    "Reservation fulfilled by loan"
                );
            }
            CopyStatus::Available => {}
        }

        let loan = self.loans.create(tx, &copy, user_id).await?;
        self.move_copy(tx, &copy, CopyStatus::OnLoan).await?;

        tracing::info!(
            loan_id = loan.id,
            copy_id,
            user_id,
            due_date = %loan.due_date,
            "Copy borrowed"
        );
        Ok(loan)
    }

    /// Closes a loan, recording any overdue fine, and puts the copy back on
    /// the shelf.
    pub async fn return_loan<S>(&self, tx: &mut S, loan_id: i64) -> AppResult<Loan>
    where
        S: LendingStore + ?Sized,
    {
        let (copy, loan) = self.lock_loan(tx, loan_id).await?;
        self.close_loan(tx, copy, loan).await
    }

    /// Same as [`return_loan`](Self::return_loan), addressed by the copy.
    pub async fn return_by_copy<S>(&self, tx: &mut S, copy_id: i64) -> AppResult<Loan>
    where
        S: LendingStore + ?Sized,
    {
        let copy = self.lock_copy(tx, copy_id).await?;
        let loan = self
            .loans
            .active_by_copy(tx, copy.id)
            .await?
            .ok_or_else(|| AppError::InvalidState("Book is not on loan".to_string()))?;
        self.close_loan(tx, copy, loan).await
    }

    /// Locks the loan's copy, then reads the loan again under that lock.
    async fn lock_loan<S>(&self, tx: &mut S, loan_id: i64) -> AppResult<(BookCopy, Loan)>
    where
        S: LendingStore + ?Sized,
    {
        let copy_id = self.loans.get(tx, loan_id).await?.book_copy_id;
        let copy = self.lock_copy(tx, copy_id).await?;
        let loan = self.loans.get(tx, loan_id).await?;
        Ok((copy, loan))
    }

    async fn close_loan<S>(&self, tx: &mut S, copy: BookCopy, loan: Loan) -> AppResult<Loan>
    where
        S: LendingStore + ?Sized,
    {
        if copy.status != CopyStatus::OnLoan {
            return Err(AppError::InvalidState("Book is not on loan".to_string()));
        }

        let loan = self.loans.return_loan(tx, loan).await?;
        self.move_copy(tx, &copy, CopyStatus::Available).await?;

        tracing::info!(
            loan_id = loan.id,
            copy_id = copy.id,
            user_id = loan.user_id,
            "Copy returned"
        );
        Ok(loan)
    }

    /// Extends a borrowed loan by one renewal period. The copy stays on loan.
    pub async fn renew<S>(&self, tx: &mut S, loan_id: i64) -> AppResult<Loan>
    where
        S: LendingStore + ?Sized,
    {
        let (copy, loan) = self.lock_loan(tx, loan_id).await?;
        if copy.status != CopyStatus::OnLoan {
            return Err(AppError::InvalidState("Book is not on loan".to_string()));
        }

        let loan = self.loans.renew(tx, loan).await?;

        tracing::info!(
            loan_id = loan.id,
            copy_id = copy.id,
            renew_count = loan.renew_count,
            due_date = %loan.due_date,
            "Loan renewed"
        );
        Ok(loan)
    }

    /// Places a hold on an available copy for `user_id`.
    pub async fn reserve<S>(&self, tx: &mut S, copy_id: i64, user_id: i64) -> AppResult<Reservation>
    where
        S: LendingStore + ?Sized,
    {
        let copy = self.lock_copy(tx, copy_id).await?;
        match copy.status {
            CopyStatus::OnLoan => {
                return Err(AppError::InvalidState("Book is currently on loan".to_string()));
            }
            CopyStatus::OnReserve => {
                return Err(AppError::InvalidState("Book is currently on reserve".to_string()));
            }
            CopyStatus::Available => {}
        }

        self.eligibility
            .ensure_can_reserve(tx, user_id, copy.book_id)
            .await?;

        let reservation = self.reservations.create(tx, &copy, user_id).await?;
        self.move_copy(tx, &copy, CopyStatus::OnReserve).await?;

        tracing::info!(
            reservation_id = reservation.id,
            copy_id,
            user_id,
            expires_at = %reservation.reservation_date,
            "Copy reserved"
        );
        Ok(reservation)
    }

    /// Closes a pending reservation without a loan and releases the copy.
    pub async fn cancel_reservation<S>(&self, tx: &mut S, reservation_id: i64) -> AppResult<Reservation>
    where
        S: LendingStore + ?Sized,
    {
        let reservation = self.reservations.get(tx, reservation_id).await?;
        let copy = self.lock_copy(tx, reservation.book_copy_id).await?;
        if copy.status != CopyStatus::OnReserve {
            return Err(AppError::InvalidState("Book is not on reserve".to_string()));
        }

        let reservation = self.reservations.fulfil(tx, reservation).await?;
        self.move_copy(tx, &copy, CopyStatus::Available).await?;

        tracing::info!(
            reservation_id,
            copy_id = copy.id,
            user_id = reservation.user_id,
            "Reservation cancelled"
        );
        Ok(reservation)
    }

    pub async fn add_copy<S>(&self, tx: &mut S, book_id: i64) -> AppResult<BookCopy>
    where
        S: LendingStore + ?Sized,
    {
        if tx.book_get(book_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Book with id {} not found", book_id)));
        }

        let copy = tx.copy_insert(book_id, self.clock.now()).await?;
        tracing::info!(copy_id = copy.id, book_id, "Copy added");
        Ok(copy)
    }

    pub async fn add_copies<S>(&self, tx: &mut S, book_id: i64, count: i64) -> AppResult<Vec<BookCopy>>
    where
        S: LendingStore + ?Sized,
    {
        if !(1..=MAX_COPIES_PER_BATCH).contains(&count) {
            return Err(AppError::Validation(format!(
                "Copy count must be between 1 and {}, got {}",
                MAX_COPIES_PER_BATCH, count
            )));
        }
        if tx.book_get(book_id).await?.is_none() {
            return Err(AppError::NotFound(format!("Book with id {} not found", book_id)));
        }

        let now = self.clock.now();
        let mut copies = Vec::new();
        for _ in 0..count {
            copies.push(tx.copy_insert(book_id, now).await?);
        }

        tracing::info!(book_id, count, "Copies added");
        Ok(copies)
    }

    /// Withdraws a copy from circulation. Only available copies can go.
    pub async fn remove_copy<S>(&self, tx: &mut S, copy_id: i64) -> AppResult<BookCopy>
    where
        S: LendingStore + ?Sized,
    {
        let mut copy = self.lock_copy(tx, copy_id).await?;
        match copy.status {
            CopyStatus::OnLoan => {
                return Err(AppError::InvalidState("Book is currently on loan".to_string()));
            }
            CopyStatus::OnReserve => {
                return Err(AppError::InvalidState("Book is currently on reserve".to_string()));
            }
            CopyStatus::Available => {}
        }

        let now = self.clock.now();
        if !tx.copy_soft_delete(copy_id, now).await? {
            return Err(AppError::Conflict(format!(
                "Copy {} was modified by a concurrent transaction",
                copy_id
            )));
        }

        copy.deleted_at = Some(now);
        copy.updated_at = now;
        tracing::info!(copy_id, book_id = copy.book_id, "Copy removed");
        Ok(copy)
    }

    pub async fn settle_fine<S>(&self, tx: &mut S, fine_id: i64) -> AppResult<Fine>
    where
        S: LendingStore + ?Sized,
    {
        self.fines.settle(tx, fine_id).await
    }

    pub async fn get_copy<S>(&self, tx: &mut S, copy_id: i64) -> AppResult<BookCopy>
    where
        S: CopyStore + ?Sized,
    {
        tx.copy_get(copy_id)
            .await?
            .filter(|copy| !copy.is_deleted())
            .ok_or_else(|| AppError::NotFound(format!("Book copy with id {} not found", copy_id)))
    }

    /// Copy with its title, every loan (history and fines included) and
    /// every reservation, oldest first.
    pub async fn get_copy_detailed<S>(&self, tx: &mut S, copy_id: i64) -> AppResult<CopyDetails>
    where
        S: LendingStore + ?Sized,
    {
        let copy = self.get_copy(tx, copy_id).await?;
        let book = tx.book_get(copy.book_id).await?.ok_or_else(|| {
            AppError::Internal(format!("Copy {} references missing book {}", copy.id, copy.book_id))
        })?;

        let loan_filter = LoanFilter {
            book_copy_id: Some(copy.id),
            ..LoanFilter::default()
        };
        let loans = self
            .loans
            .list(tx, &loan_filter, &ListParams::ascending())
            .await?;

        let mut records = Vec::with_capacity(loans.len());
        for loan in loans {
            let histories = self.loans.histories(tx, loan.id).await?;
            let fines = self.fines.by_loan(tx, loan.id).await?;
            records.push(LoanRecord {
                loan,
                histories,
                fines,
            });
        }

        let reservation_filter = ReservationFilter {
            book_copy_id: Some(copy.id),
            ..ReservationFilter::default()
        };
        let reservations = self
            .reservations
            .list(tx, &reservation_filter, &ListParams::ascending())
            .await?;

        Ok(CopyDetails {
            copy,
            book,
            loans: records,
            reservations,
        })
    }

    pub async fn list_copies<S>(
        &self,
        tx: &mut S,
        filter: &CopyFilter,
        params: &ListParams,
    ) -> AppResult<Vec<BookCopy>>
    where
        S: CopyStore + ?Sized,
    {
        tx.copy_list(filter, params).await
    }

    pub async fn count_copies<S>(&self, tx: &mut S, filter: &CopyFilter) -> AppResult<i64>
    where
        S: CopyStore + ?Sized,
    {
        tx.copy_count(filter).await
    }
}
