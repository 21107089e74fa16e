//! Fine ledger: overdue charges and their settlement

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::{Fine, FineDetails, FineFilter, ListParams, Loan, NewFine},
    store::{FineStore, LoanStore},
};

/// Whole days between `due` and `returned`, any started day counting as one.
pub fn overdue_days(due: DateTime<Utc>, returned: DateTime<Utc>) -> i64 {
    if returned <= due {
        return 0;
    }
    let elapsed = returned - due;
    let days = elapsed.num_days();
    if elapsed > Duration::days(days) {
        days + 1
    } else {
        days
    }
}

/// Charge for a return at `returned`, or `None` when it was on time.
pub fn overdue_fine(due: DateTime<Utc>, returned: DateTime<Utc>, daily_rate: Decimal) -> Option<Decimal> {
    let days = overdue_days(due, returned);
    if days == 0 {
        return None;
    }
    Some((Decimal::from(days) * daily_rate).round_dp(2))
}

#[derive(Clone)]
pub struct FinesService {
    daily_rate: Decimal,
    clock: Arc<dyn Clock>,
}

impl FinesService {
    pub fn new(daily_rate: Decimal, clock: Arc<dyn Clock>) -> Self {
        Self { daily_rate, clock }
    }

    /// Records the fine owed for returning `loan` at `returned_at`, if any.
    pub async fn record_overdue<S>(
        &self,
        tx: &mut S,
        loan: &Loan,
        returned_at: DateTime<Utc>,
    ) -> AppResult<Option<Fine>>
    where
        S: FineStore + ?Sized,
    {
        let Some(amount) = overdue_fine(loan.due_date, returned_at, self.daily_rate) else {
            return Ok(None);
        };

        let fine = tx
            .fine_insert(&NewFine {
                loan_id: loan.id,
                amount,
                created_at: returned_at,
            })
            .await?;

        tracing::info!(
            fine_id = fine.id,
            loan_id = loan.id,
            user_id = loan.user_id,
            amount = %fine.amount,
            "Overdue fine recorded"
        );
        Ok(Some(fine))
    }

    pub async fn settle<S>(&self, tx: &mut S, fine_id: i64) -> AppResult<Fine>
    where
        S: FineStore + ?Sized,
    {
        let mut fine = self.get(tx, fine_id).await?;
        if fine.settled {
            return Err(AppError::InvalidState("Fine is not outstanding".to_string()));
        }

        let now = self.clock.now();
        if !tx.fine_settle(fine_id, now).await? {
            return Err(AppError::InvalidState("Fine is not outstanding".to_string()));
        }

        fine.settled = true;
        fine.updated_at = now;
        tracing::info!(fine_id, loan_id = fine.loan_id, "Fine settled");
        Ok(fine)
    }

    pub async fn get<S>(&self, tx: &mut S, fine_id: i64) -> AppResult<Fine>
    where
        S: FineStore + ?Sized,
    {
        tx.fine_get(fine_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Fine with id {} not found", fine_id)))
    }

    pub async fn get_detailed<S>(&self, tx: &mut S, fine_id: i64) -> AppResult<FineDetails>
    where
        S: FineStore + LoanStore + ?Sized,
    {
        let fine = self.get(tx, fine_id).await?;
        let loan = tx.loan_get(fine.loan_id).await?.ok_or_else(|| {
            AppError::Internal(format!("Fine {} references missing loan {}", fine.id, fine.loan_id))
        })?;
        Ok(FineDetails { fine, loan })
    }

    /// Fines on one loan, oldest first
    pub async fn by_loan<S>(&self, tx: &mut S, loan_id: i64) -> AppResult<Vec<Fine>>
    where
        S: FineStore + ?Sized,
    {
        let filter = FineFilter {
            loan_id: Some(loan_id),
            ..FineFilter::default()
        };
        tx.fine_list(&filter, &ListParams::ascending()).await
    }

    pub async fn list<S>(&self, tx: &mut S, filter: &FineFilter, params: &ListParams) -> AppResult<Vec<Fine>>
    where
        S: FineStore + ?Sized,
    {
        tx.fine_list(filter, params).await
    }

    pub async fn count<S>(&self, tx: &mut S, filter: &FineFilter) -> AppResult<i64>
    where
        S: FineStore + ?Sized,
    {
        tx.fine_count(filter).await
    }

    /// Sum of the user's unsettled fines
    pub async fn outstanding_total<S>(&self, tx: &mut S, user_id: i64) -> AppResult<Decimal>
    where
        S: FineStore + ?Sized,
    {
        tx.fine_outstanding_total(user_id).await
    }
}
