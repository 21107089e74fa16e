//! Borrower reference

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Minimal user row. Accounts are owned by the authentication layer; the
/// engine reads it only to fill detailed views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
}
