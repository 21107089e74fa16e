//! Reservation (hold) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::copy::{Book, BookCopy};
use super::enums::ReservationStatus;
use super::user::User;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Reservation {
    pub id: i64,
    pub book_copy_id: i64,
    pub book_id: i64,
    pub user_id: i64,
    pub status: ReservationStatus,
    /// Hold expiry. Advisory: expired holds are closed by the sweeper.
    pub reservation_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_pending(&self) -> bool {
        self.status == ReservationStatus::Pending
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.reservation_date < now
    }
}

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub book_copy_id: i64,
    pub book_id: i64,
    pub user_id: i64,
    pub reservation_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationDetails {
    #[serde(flatten)]
    pub reservation: Reservation,
    pub copy: BookCopy,
    pub book: Book,
    pub user: Option<User>,
}

/// Reservation list filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReservationFilter {
    pub user_id: Option<i64>,
    pub book_copy_id: Option<i64>,
    pub book_id: Option<i64>,
    pub status: Option<ReservationStatus>,
    /// Only pending holds whose expiry is before this instant
    pub expired_at: Option<DateTime<Utc>>,
}
