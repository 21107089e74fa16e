//! Overdue fine model

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::loan::Loan;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Fine {
    pub id: i64,
    pub loan_id: i64,
    pub amount: Decimal,
    pub settled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFine {
    pub loan_id: i64,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FineDetails {
    #[serde(flatten)]
    pub fine: Fine,
    pub loan: Loan,
}

/// Fine list filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FineFilter {
    pub loan_id: Option<i64>,
    /// Borrower of the fined loan
    pub user_id: Option<i64>,
    pub settled: Option<bool>,
}
