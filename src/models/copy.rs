//! Book copy (physical unit) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::enums::CopyStatus;
use super::loan::LoanRecord;
use super::reservation::Reservation;

/// Title a copy belongs to. Catalog data lives elsewhere; the engine only
/// needs the id and a display title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Book {
    pub id: i64,
    pub title: String,
}

/// Full copy model from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BookCopy {
    pub id: i64,
    pub book_id: i64,
    pub status: CopyStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BookCopy {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Copy with its title, loan ledger and reservations
#[derive(Debug, Clone, Serialize)]
pub struct CopyDetails {
    #[serde(flatten)]
    pub copy: BookCopy,
    pub book: Book,
    pub loans: Vec<LoanRecord>,
    pub reservations: Vec<Reservation>,
}

/// Copy list filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CopyFilter {
    pub book_id: Option<i64>,
    pub status: Option<CopyStatus>,
}
