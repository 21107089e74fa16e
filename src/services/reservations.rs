//! Reservation queue

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    clock::Clock,
    config::LendingPolicy,
    error::{AppError, AppResult},
    models::{
        BookCopy, ListParams, NewReservation, Reservation, ReservationDetails, ReservationFilter,
        ReservationStatus,
    },
    store::{CatalogStore, CopyStore, ReservationStore},
};

#[derive(Clone)]
pub struct ReservationsService {
    policy: Arc<LendingPolicy>,
    clock: Arc<dyn Clock>,
}

impl ReservationsService {
    pub fn new(policy: Arc<LendingPolicy>, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    /// Queues a hold on `copy`. The copy's state must already have been
    /// checked by the caller.
    pub async fn create<S>(&self, tx: &mut S, copy: &BookCopy, user_id: i64) -> AppResult<Reservation>
    where
        S: ReservationStore + ?Sized,
    {
        let now = self.clock.now();
        tx.reservation_insert(&NewReservation {
            book_copy_id: copy.id,
            book_id: copy.book_id,
            user_id,
            reservation_date: now + self.policy.reservation_hold(),
            created_at: now,
        })
        .await
    }

    /// Moves a pending reservation to fulfilled, by loan or by cancellation.
    pub async fn fulfil<S>(&self, tx: &mut S, mut reservation: Reservation) -> AppResult<Reservation>
    where
        S: ReservationStore + ?Sized,
    {
        if !reservation.is_pending() {
            return Err(AppError::InvalidState("Reservation is not pending".to_string()));
        }

        let now = self.clock.now();
        let updated = tx
            .reservation_set_status(
                reservation.id,
                ReservationStatus::Pending,
                ReservationStatus::Fulfilled,
                now,
            )
            .await?;
        if !updated {
            return Err(AppError::InvalidState("Reservation is not pending".to_string()));
        }

        reservation.status = ReservationStatus::Fulfilled;
        reservation.updated_at = now;
        Ok(reservation)
    }

    pub async fn get<S>(&self, tx: &mut S, reservation_id: i64) -> AppResult<Reservation>
    where
        S: ReservationStore + ?Sized,
    {
        tx.reservation_get(reservation_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Reservation with id {} not found", reservation_id))
        })
    }

    pub async fn get_detailed<S>(&self, tx: &mut S, reservation_id: i64) -> AppResult<ReservationDetails>
    where
        S: ReservationStore + CopyStore + CatalogStore + ?Sized,
    {
        let reservation = self.get(tx, reservation_id).await?;
        let copy = tx.copy_get(reservation.book_copy_id).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "Reservation {} references missing copy {}",
                reservation.id, reservation.book_copy_id
            ))
        })?;
        let book = tx.book_get(reservation.book_id).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "Reservation {} references missing book {}",
                reservation.id, reservation.book_id
            ))
        })?;
        let user = tx.user_get(reservation.user_id).await?;

        Ok(ReservationDetails {
            reservation,
            copy,
            book,
            user,
        })
    }

    pub async fn pending_by_copy<S>(&self, tx: &mut S, book_copy_id: i64) -> AppResult<Option<Reservation>>
    where
        S: ReservationStore + ?Sized,
    {
        tx.reservation_pending_by_copy(book_copy_id).await
    }

    pub async fn pending_by_user<S>(&self, tx: &mut S, user_id: i64) -> AppResult<Vec<Reservation>>
    where
        S: ReservationStore + ?Sized,
    {
        let filter = ReservationFilter {
            user_id: Some(user_id),
            status: Some(ReservationStatus::Pending),
            ..ReservationFilter::default()
        };
        tx.reservation_list(&filter, &ListParams::default()).await
    }

    /// Pending holds on any copy of a title
    pub async fn pending_by_title<S>(&self, tx: &mut S, book_id: i64) -> AppResult<Vec<Reservation>>
    where
        S: ReservationStore + ?Sized,
    {
        let filter = ReservationFilter {
            book_id: Some(book_id),
            status: Some(ReservationStatus::Pending),
            ..ReservationFilter::default()
        };
        tx.reservation_list(&filter, &ListParams::ascending()).await
    }

    /// Pending holds whose expiry is before `now`, oldest first
    pub async fn expired<S>(&self, tx: &mut S, now: DateTime<Utc>, limit: i64) -> AppResult<Vec<Reservation>>
    where
        S: ReservationStore + ?Sized,
    {
        let filter = ReservationFilter {
            expired_at: Some(now),
            ..ReservationFilter::default()
        };
        let params = ListParams {
            limit: Some(limit),
            ..ListParams::ascending()
        };
        tx.reservation_list(&filter, &params).await
    }

    /// Newest first unless `params` says otherwise
    pub async fn list<S>(
        &self,
        tx: &mut S,
        filter: &ReservationFilter,
        params: &ListParams,
    ) -> AppResult<Vec<Reservation>>
    where
        S: ReservationStore + ?Sized,
    {
        tx.reservation_list(filter, params).await
    }

    pub async fn count<S>(&self, tx: &mut S, filter: &ReservationFilter) -> AppResult<i64>
    where
        S: ReservationStore + ?Sized,
    {
        tx.reservation_count(filter).await
    }
}
