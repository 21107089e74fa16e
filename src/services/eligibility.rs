//! Per-user eligibility rules
//!
//! Loan cap is reached at `count >= max_loans`, the reservation cap only once
//! `count > max_reservations`.

use std::sync::Arc;

use crate::{
    config::LendingPolicy,
    error::{AppResult, Ineligible},
    store::{LoanStore, ReservationStore},
};

#[derive(Clone)]
pub struct EligibilityService {
    policy: Arc<LendingPolicy>,
}

impl EligibilityService {
    pub fn new(policy: Arc<LendingPolicy>) -> Self {
        Self { policy }
    }

    fn loan_cap_reached(&self, outstanding: i64) -> bool {
        outstanding >= self.policy.max_loans
    }

    fn reservation_cap_exceeded(&self, outstanding: i64) -> bool {
        outstanding > self.policy.max_reservations
    }

    pub async fn has_exceeded_max_loans<S>(&self, tx: &mut S, user_id: i64) -> AppResult<bool>
    where
        S: LoanStore + ?Sized,
    {
        let outstanding = tx.loan_count_borrowed_by_user(user_id).await?;
        Ok(self.loan_cap_reached(outstanding))
    }

    pub async fn has_exceeded_max_reservations<S>(&self, tx: &mut S, user_id: i64) -> AppResult<bool>
    where
        S: ReservationStore + ?Sized,
    {
        let outstanding = tx.reservation_count_pending_by_user(user_id).await?;
        Ok(self.reservation_cap_exceeded(outstanding))
    }

    pub async fn has_active_loan_on_title<S>(
        &self,
        tx: &mut S,
        user_id: i64,
        book_id: i64,
    ) -> AppResult<bool>
    where
        S: LoanStore + ?Sized,
    {
        Ok(tx.loan_count_borrowed_on_title(user_id, book_id).await? > 0)
    }

    pub async fn has_active_reservation_on_title<S>(
        &self,
        tx: &mut S,
        user_id: i64,
        book_id: i64,
    ) -> AppResult<bool>
    where
        S: ReservationStore + ?Sized,
    {
        Ok(tx.reservation_count_pending_on_title(user_id, book_id).await? > 0)
    }

    /// Checks run before a borrow, in order: loan cap, then an existing loan
    /// on the same title.
    pub async fn ensure_can_borrow<S>(&self, tx: &mut S, user_id: i64, book_id: i64) -> AppResult<()>
    where
        S: LoanStore + ?Sized,
    {
        let outstanding = tx.loan_count_borrowed_by_user(user_id).await?;
        if self.loan_cap_reached(outstanding) {
            tracing::debug!(user_id, outstanding, "Borrow refused: loan cap reached");
            return Err(Ineligible::MaxLoansReached {
                current: outstanding,
                max: self.policy.max_loans,
            }
            .into());
        }

        if self.has_active_loan_on_title(tx, user_id, book_id).await? {
            tracing::debug!(user_id, book_id, "Borrow refused: title already on loan to user");
            return Err(Ineligible::TitleAlreadyBorrowed.into());
        }

        Ok(())
    }

    /// Checks run before a reservation, in order: reservation cap, a loan on
    /// the same title, a pending reservation on the same title.
    pub async fn ensure_can_reserve<S>(&self, tx: &mut S, user_id: i64, book_id: i64) -> AppResult<()>
    where
        S: LoanStore + ReservationStore + ?Sized,
    {
        let outstanding = tx.reservation_count_pending_by_user(user_id).await?;
        if self.reservation_cap_exceeded(outstanding) {
            tracing::debug!(user_id, outstanding, "Reserve refused: reservation cap exceeded");
            return Err(Ineligible::MaxReservationsReached {
                current: outstanding,
                max: self.policy.max_reservations,
            }
            .into());
        }

        if self.has_active_loan_on_title(tx, user_id, book_id).await? {
            tracing::debug!(user_id, book_id, "Reserve refused: title already on loan to user");
            return Err(Ineligible::TitleAlreadyBorrowed.into());
        }

        if self.has_active_reservation_on_title(tx, user_id, book_id).await? {
            tracing::debug!(user_id, book_id, "Reserve refused: title already reserved by user");
            return Err(Ineligible::TitleAlreadyReserved.into());
        }

        Ok(())
    }
}
