//! Copies, titles and users

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};

use super::push_list_params;
use crate::{
    error::AppResult,
    models::{Book, BookCopy, CopyFilter, CopyStatus, ListParams, User},
    store::{CatalogStore, CopyStore},
};

fn push_copy_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &CopyFilter) {
    builder.push(" WHERE deleted_at IS NULL");
    if let Some(book_id) = filter.book_id {
        builder.push(" AND book_id = ").push_bind(book_id);
    }
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status);
    }
}

#[async_trait]
impl CatalogStore for PgConnection {
    async fn book_get(&mut self, id: i64) -> AppResult<Option<Book>> {
        let book = sqlx::query_as::<_, Book>("SELECT id, title FROM books WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self)
            .await?;
        Ok(book)
    }

    async fn user_get(&mut self, id: i64) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT id, username FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl CopyStore for PgConnection {
    async fn copy_get(&mut self, id: i64) -> AppResult<Option<BookCopy>> {
        let copy = sqlx::query_as::<_, BookCopy>("SELECT * FROM book_copies WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self)
            .await?;
        Ok(copy)
    }

    async fn copy_lock(&mut self, id: i64) -> AppResult<Option<BookCopy>> {
        let copy = sqlx::query_as::<_, BookCopy>(
            "SELECT * FROM book_copies WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *self)
        .await?;
        Ok(copy)
    }

    async fn copy_insert(&mut self, book_id: i64, now: DateTime<Utc>) -> AppResult<BookCopy> {
        let copy = sqlx::query_as::<_, BookCopy>(
            r#"
            INSERT INTO book_copies (book_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            RETURNING *
            "#,
        )
        .bind(book_id)
        .bind(CopyStatus::Available)
        .bind(now)
        .fetch_one(&mut *self)
        .await?;
        Ok(copy)
    }

    async fn copy_set_status(
        &mut self,
        id: i64,
        expected: CopyStatus,
        status: CopyStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE book_copies SET status = $1, updated_at = $2
            WHERE id = $3 AND status = $4 AND deleted_at IS NULL
            "#,
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .bind(expected)
        .execute(&mut *self)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn copy_soft_delete(&mut self, id: i64, now: DateTime<Utc>) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE book_copies SET deleted_at = $1, updated_at = $1
            WHERE id = $2 AND status = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(id)
        .bind(CopyStatus::Available)
        .execute(&mut *self)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn copy_list(
        &mut self,
        filter: &CopyFilter,
        params: &ListParams,
    ) -> AppResult<Vec<BookCopy>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM book_copies");
        push_copy_filter(&mut builder, filter);
        push_list_params(&mut builder, params);

        let copies = builder
            .build_query_as::<BookCopy>()
            .fetch_all(&mut *self)
            .await?;
        Ok(copies)
    }

    async fn copy_count(&mut self, filter: &CopyFilter) -> AppResult<i64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM book_copies");
        push_copy_filter(&mut builder, filter);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self)
            .await?;
        Ok(count)
    }
}
