//! Reservations repository for database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};

use super::{push_list_params, unique_violation_as_conflict};
use crate::{
    error::AppResult,
    models::{ListParams, NewReservation, Reservation, ReservationFilter, ReservationStatus},
    store::ReservationStore,
};

fn push_reservation_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ReservationFilter) {
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
    if let Some(at) = filter.expired_at {
        builder
            .push(" AND status = ")
            .push_bind(ReservationStatus::Pending)
            .push(" AND reservation_date < ")
            .push_bind(at);
    }
}

#[async_trait]
impl ReservationStore for PgConnection {
    async fn reservation_get(&mut self, id: i64) -> AppResult<Option<Reservation>> {
        let reservation =
            sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *self)
                .await?;
        Ok(reservation)
    }

    async fn reservation_pending_by_copy(
        &mut self,
        book_copy_id: i64,
    ) -> AppResult<Option<Reservation>> {
        let reservation = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE book_copy_id = $1 AND status = $2",
        )
        .bind(book_copy_id)
        .bind(ReservationStatus::Pending)
        .fetch_optional(&mut *self)
        .await?;
        Ok(reservation)
    }

    async fn reservation_insert(&mut self, reservation: &NewReservation) -> AppResult<Reservation> {
        sqlx::query_as::<_, Reservation>(
            r#"
            INSERT INTO reservations (
                book_copy_id, book_id, user_id, status, reservation_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            RETURNING *
            "#,
        )
        .bind(reservation.book_copy_id)
        .bind(reservation.book_id)
        .bind(reservation.user_id)
        .bind(ReservationStatus::Pending)
        .bind(reservation.reservation_date)
        .bind(reservation.created_at)
        .fetch_one(&mut *self)
        .await
        .map_err(|e| {
            let per_title = e
                .as_database_error()
                .and_then(|db| db.constraint())
                .map_or(false, |c| c == "reservations_one_pending_per_user_title");
            let message = if per_title {
                format!(
                    "User {} already has a pending reservation on book {}",
                    reservation.user_id, reservation.book_id
                )
            } else {
                format!("Copy {} already has a pending reservation", reservation.book_copy_id)
            };
            unique_violation_as_conflict(e, message)
        })
    }

    async fn reservation_set_status(
        &mut self,
        id: i64,
        expected: ReservationStatus,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE reservations SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
        )
        .bind(status)
        .bind(now)
        .bind(id)
        .bind(expected)
        .execute(&mut *self)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reservation_count_pending_by_user(&mut self, user_id: i64) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations WHERE user_id = $1 AND status = $2",
        )
        .bind(user_id)
        .bind(ReservationStatus::Pending)
        .fetch_one(&mut *self)
        .await?;
        Ok(count)
    }

    async fn reservation_count_pending_on_title(
        &mut self,
        user_id: i64,
        book_id: i64,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM reservations WHERE user_id = $1 AND book_id = $2 AND status = $3",
        )
        .bind(user_id)
        .bind(book_id)
        .bind(ReservationStatus::Pending)
        .fetch_one(&mut *self)
        .await?;
        Ok(count)
    }

    async fn reservation_list(
        &mut self,
        filter: &ReservationFilter,
        params: &ListParams,
    ) -> AppResult<Vec<Reservation>> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM reservations");
        push_reservation_filter(&mut builder, filter);
        push_list_params(&mut builder, params);

        let reservations = builder
            .build_query_as::<Reservation>()
            .fetch_all(&mut *self)
            .await?;
        Ok(reservations)
    }

    async fn reservation_count(&mut self, filter: &ReservationFilter) -> AppResult<i64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM reservations");
        push_reservation_filter(&mut builder, filter);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(&mut *self)
            .await?;
        Ok(count)
    }
}
