//! Loans repository for database operations

use async_trait::async_trait;
use sqlx::{PgConnection, Postgres, QueryBuilder};

use super::{push_list_params, unique_violation_as_conflict};
use crate::{
    error::AppResult,
    models::{ListParams, Loan, LoanFilter, LoanHistory, LoanStatus, NewLoan, NewLoanHistory},
    store::LoanStore,
};

fn push_loan_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &LoanFilter) {
    builder.push(" WHERE TRUE");
    if let Some(user_id) = filter.user_id {
        builder.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(copy_id) = filter.book_copy_id {
        builder.push(" AND book_copy_id = ").push_bind(copy_id);
    }
    if let Some(book_id) = filter.book_id {
        builder.push(" AND book_id = ").push_bind(book_id);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status);
    }
    if let Some(at) = filter.overdue_at {
        builder
            .push(" AND status = ")
            .push_bind(LoanStatus::Borrowed)
            .push(" AND due_date < ")
            .push_bind(at);
    }
}

#[async_trait]
impl LoanStore for PgConnection {
    async fn loan_get(&mut self, id: i64) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self)
            .await?;
        Ok(loan)
    }

    async fn loan_active_by_copy(&mut self, book_copy_id: i64) -> AppResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE book_copy_id = $1 AND status = $2",
        )
        .bind(book_copy_id)
        .bind(LoanStatus::Borrowed)
        .fetch_optional(&mut *self)
        .await?;
        Ok(loan)
    }

    async fn loan_insert(&mut self, loan: &NewLoan) -> AppResult<Loan> {
        sqlx::query_as::<_, Loan>(
            r#"
            INSERT INTO loans (
                book_copy_id, book_id, user_id, status, borrow_date, due_date,
                renew_count, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 0, $5, $5)
            RETURNING *
            "#,
        )
        .bind(loan.book_copy_id)
        .bind(loan.book_id)
        .bind(loan.user_id)
        .bind(LoanStatus::Borrowed)
        .bind(loan.borrow_date)
        .bind(loan.due_date)
        .fetch_one(&mut *self)
        .await
        .map_err(|e| {
            unique_violation_as_conflict(
                e,
                format!("Copy {} already has an active loan", loan.book_copy_id),
            )
        })
    }

    async fn loan_update(&mut self, loan: &Loan, expected_renew_count: i32) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET status = $1, due_date = $2, return_date = $3, renew_count = $4, updated_at = $5
            WHERE id = $6 AND status = $7 AND renew_count = $8
            "#,
        )
        .bind(loan.status)
        .bind(loan.due_date)
        .bind(loan.return_date)
        .bind(loan.renew_count)
        .bind(loan.updated_at)
        .bind(loan.id)
        .bind(LoanStatus::Borrowed)
        .bind(expected_renew_count)
        .execute(&mut *self)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn loan_count_borrowed_by_user(&mut self, user_id: i64) -> AppResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM loans WHERE user_id = $1 AND status = $2")
                .bind(user_id)
                .bind(LoanStatus::Borrowed)
                .fetch_one(&mut *self)
                .await?;
        Ok(count)
    }

    async fn loan_count_borrowed_on_title(
        &mut self,
        user_id: i64,
        book_id: i64,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM loans WHERE user_id = $1 AND book_id = $2 AND status = $3",
        )
        .bind(user_id)
        .bind(book_id)
        .bind(LoanStatus::Borrowed)
        .fetch_one(&mut *self)
        .await?;
        Ok(count)
    }

    async fn loan_history_insert(&mut self, entry: &NewLoanHistory) -> AppResult<LoanHistory> {
        let history = sqlx::query_as::<_, LoanHistory>(
            r#"
            INSERT INTO loan_histories (loan_id, action, due_date, previous_due_date, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(entry.loan_id)
        .bind(entry.action)
        .bind(entry.due_date)
        .bind(entry.previous_due_date)
        .bind(entry.created_at)
        .fetch_one(&mut *self)
        .await?;
        Ok(history)
    }

    async fn loan_history_list(&mut self, loan_id: i64) -> AppResult<Vec<LoanHistory>> {
        let histories = sqlx::query_as::<_, LoanHistory>(
            "SELECT * FROM loan_histories WHERE loan_id = $1 ORDER BY created_at, id",
        )
        .bind(loan_id)
        .fetch_all(&mut *self)
        .await?;
        Ok(histories)
    }

    async fn loan_list(&mut self, filter: &LoanFilter, params: &ListParams) -> AppResult<Vec<Loan>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM loans");
        push_loan_filter(&mut builder, filter);
        push_list_params(&mut builder, params);

        let loans = builder.build_query_as::<Loan>().fetch_all(&mut *self).await?;
        Ok(loans)
    }

    async fn loan_count(&mut self, filter: &LoanFilter) -> AppResult<i64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM loans");
        push_loan_filter(&mut builder, filter);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self)
            .await?;
        Ok(count)
    }
}
