//! Fines repository for database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, Postgres, QueryBuilder};

use super::push_list_params;
use crate::{
    error::AppResult,
    models::{Fine, FineFilter, ListParams, NewFine},
    store::FineStore,
};

fn push_fine_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &FineFilter) {
    builder.push(" WHERE TRUE");
    if let Some(loan_id) = filter.loan_id {
        builder.push(" AND loan_id = ").push_bind(loan_id);
    }
    if let Some(user_id) = filter.user_id {
        builder
            .push(" AND loan_id IN (SELECT id FROM loans WHERE user_id = ")
            .push_bind(user_id)
            .push(")");
    }
    if let Some(settled) = filter.settled {
        builder.push(" AND settled = ").push_bind(settled);
    }
}

#[async_trait]
impl FineStore for PgConnection {
    async fn fine_get(&mut self, id: i64) -> AppResult<Option<Fine>> {
        let fine = sqlx::query_as::<_, Fine>("SELECT * FROM fines WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self)
            .await?;
        Ok(fine)
    }

    async fn fine_insert(&mut self, fine: &NewFine) -> AppResult<Fine> {
        let row = sqlx::query_as::<_, Fine>(
            r#"
            INSERT INTO fines (loan_id, amount, settled, created_at, updated_at)
            VALUES ($1, $2, FALSE, $3, $3)
            RETURNING *
            "#,
        )
        .bind(fine.loan_id)
        .bind(fine.amount)
        .bind(fine.created_at)
        .fetch_one(&mut *self)
        .await?;
        Ok(row)
    }

    async fn fine_settle(&mut self, id: i64, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE fines SET settled = TRUE, updated_at = $1 WHERE id = $2 AND settled = FALSE",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *self)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fine_list(&mut self, filter: &FineFilter, params: &ListParams) -> AppResult<Vec<Fine>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM fines");
        push_fine_filter(&mut builder, filter);
        push_list_params(&mut builder, params);

        let fines = builder.build_query_as::<Fine>().fetch_all(&mut *self).await?;
        Ok(fines)
    }

    async fn fine_count(&mut self, filter: &FineFilter) -> AppResult<i64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM fines");
        push_fine_filter(&mut builder, filter);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self)
            .await?;
        Ok(count)
    }

    async fn fine_outstanding_total(&mut self, user_id: i64) -> AppResult<Decimal> {
        let total: Decimal = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(f.amount), 0)
            FROM fines f
            JOIN loans l ON f.loan_id = l.id
            WHERE l.user_id = $1 AND f.settled = FALSE
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *self)
        .await?;
        Ok(total)
    }
}
