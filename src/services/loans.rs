//! Loan ledger

use std::sync::Arc;

use crate::{
    clock::Clock,
    config::LendingPolicy,
    error::{AppError, AppResult, Ineligible},
    models::{
        BookCopy, ListParams, Loan, LoanAction, LoanDetails, LoanFilter, LoanHistory, LoanStatus,
        NewLoan, NewLoanHistory,
    },
    services::fines::FinesService,
    store::{FineStore, LendingStore, LoanStore},
};

#[derive(Clone)]
pub struct LoansService {
    policy: Arc<LendingPolicy>,
    clock: Arc<dyn Clock>,
    fines: FinesService,
}

impl LoansService {
    pub fn new(policy: Arc<LendingPolicy>, clock: Arc<dyn Clock>, fines: FinesService) -> Self {
        Self {
            policy,
            clock,
            fines,
        }
    }

    /// Opens a loan on `copy` for `user_id`, due one loan period from now.
    pub async fn create<S>(&self, tx: &mut S, copy: &BookCopy, user_id: i64) -> AppResult<Loan>
    where
        S: LoanStore + ?Sized,
    {
        let now = self.clock.now();
        let due_date = now + self.policy.loan_period();

        let loan = tx
            .loan_insert(&NewLoan {
                book_copy_id: copy.id,
                book_id: copy.book_id,
                user_id,
                borrow_date: now,
                due_date,
            })
            .await?;

        tx.loan_history_insert(&NewLoanHistory {
            loan_id: loan.id,
            action: LoanAction::Borrow,
            due_date,
            previous_due_date: None,
            created_at: now,
        })
        .await?;

        Ok(loan)
    }

    async fn write<S>(&self, tx: &mut S, loan: &Loan, expected_renew_count: i32) -> AppResult<()>
    where
        S: LoanStore + ?Sized,
    {
        if !tx.loan_update(loan, expected_renew_count).await? {
            tracing::warn!(
                loan_id = loan.id,
                expected_renew_count,
                "Loan changed underneath the transaction"
            );
            return Err(AppError::Conflict(format!(
                "Loan {} was modified by a concurrent transaction",
                loan.id
            )));
        }
        Ok(())
    }

    /// Closes a borrowed loan, charging a fine when it comes back late.
    pub async fn return_loan<S>(&self, tx: &mut S, mut loan: Loan) -> AppResult<Loan>
    where
        S: LoanStore + FineStore + ?Sized,
    {
        if !loan.is_borrowed() {
            return Err(AppError::InvalidState("Book is not on loan".to_string()));
        }

        let now = self.clock.now();
        self.fines.record_overdue(tx, &loan, now).await?;

        let renew_count = loan.renew_count;
        loan.status = LoanStatus::Returned;
        loan.return_date = Some(now);
        loan.updated_at = now;
        self.write(tx, &loan, renew_count).await?;

        tx.loan_history_insert(&NewLoanHistory {
            loan_id: loan.id,
            action: LoanAction::Return,
            due_date: loan.due_date,
            previous_due_date: None,
            created_at: now,
        })
        .await?;

        Ok(loan)
    }

    /// Pushes the due date out by one renewal period.
    pub async fn renew<S>(&self, tx: &mut S, mut loan: Loan) -> AppResult<Loan>
    where
        S: LoanStore + ?Sized,
    {
        if !loan.is_borrowed() {
            return Err(AppError::InvalidState("Book is not on loan".to_string()));
        }
        if let Some(max) = self.policy.max_renewals {
            if loan.renew_count >= max {
                return Err(Ineligible::MaxRenewalsReached {
                    current: loan.renew_count,
                    max,
                }
                .into());
            }
        }

        let now = self.clock.now();
        let previous_due_date = loan.due_date;
        loan.due_date = previous_due_date + self.policy.renewal_period();
        loan.renew_count += 1;
        loan.updated_at = now;
        self.write(tx, &loan, loan.renew_count - 1).await?;

        tx.loan_history_insert(&NewLoanHistory {
            loan_id: loan.id,
            action: LoanAction::Renew,
            due_date: loan.due_date,
            previous_due_date: Some(previous_due_date),
            created_at: now,
        })
        .await?;

        Ok(loan)
    }

    pub async fn get<S>(&self, tx: &mut S, loan_id: i64) -> AppResult<Loan>
    where
        S: LoanStore + ?Sized,
    {
        tx.loan_get(loan_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))
    }

    /// The borrowed loan on a copy, if any
    pub async fn active_by_copy<S>(&self, tx: &mut S, book_copy_id: i64) -> AppResult<Option<Loan>>
    where
        S: LoanStore + ?Sized,
    {
        tx.loan_active_by_copy(book_copy_id).await
    }

    pub async fn histories<S>(&self, tx: &mut S, loan_id: i64) -> AppResult<Vec<LoanHistory>>
    where
        S: LoanStore + ?Sized,
    {
        tx.loan_history_list(loan_id).await
    }

    /// Loan with its copy, title, borrower, history and fines
    pub async fn get_detailed<S>(&self, tx: &mut S, loan_id: i64) -> AppResult<LoanDetails>
    where
        S: LendingStore + ?Sized,
    {
        let loan = self.get(tx, loan_id).await?;

        let copy = tx.copy_get(loan.book_copy_id).await?.ok_or_else(|| {
            AppError::Internal(format!("Loan {} references missing copy {}", loan.id, loan.book_copy_id))
        })?;
        let book = tx.book_get(loan.book_id).await?.ok_or_else(|| {
            AppError::Internal(format!("Loan {} references missing book {}", loan.id, loan.book_id))
        })?;
        let borrower = tx.user_get(loan.user_id).await?;
        let histories = tx.loan_history_list(loan.id).await?;
        let fines = self.fines.by_loan(tx, loan.id).await?;
        let is_overdue = loan.is_overdue(self.clock.now());

        Ok(LoanDetails {
            loan,
            copy,
            book,
            borrower,
            histories,
            fines,
            is_overdue,
        })
    }

    /// Number of loans the user currently has out
    pub async fn count_outstanding<S>(&self, tx: &mut S, user_id: i64) -> AppResult<i64>
    where
        S: LoanStore + ?Sized,
    {
        tx.loan_count_borrowed_by_user(user_id).await
    }

    pub async fn list<S>(&self, tx: &mut S, filter: &LoanFilter, params: &ListParams) -> AppResult<Vec<Loan>>
    where
        S: LoanStore + ?Sized,
    {
        tx.loan_list(filter, params).await
    }

    pub async fn count<S>(&self, tx: &mut S, filter: &LoanFilter) -> AppResult<i64>
    where
        S: LoanStore + ?Sized,
    {
        tx.loan_count(filter).await
    }
}
