//! Loan (borrow) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::copy::{Book, BookCopy};
use super::enums::{LoanAction, LoanStatus};
use super::fine::Fine;
use super::user::User;

/// Loan model from database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Loan {
    pub id: i64,
    pub book_copy_id: i64,
    pub book_id: i64,
    pub user_id: i64,
    pub status: LoanStatus,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub return_date: Option<DateTime<Utc>>,
    pub renew_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    pub fn is_borrowed(&self) -> bool {
        self.status == LoanStatus::Borrowed
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_borrowed() && self.due_date < now
    }
}

/// Insert payload for a loan
#[derive(Debug, Clone)]
pub struct NewLoan {
    pub book_copy_id: i64,
    pub book_id: i64,
    pub user_id: i64,
    pub borrow_date: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
}

/// One entry of a loan's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LoanHistory {
    pub id: i64,
    pub loan_id: i64,
    pub action: LoanAction,
    pub due_date: DateTime<Utc>,
    pub previous_due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewLoanHistory {
    pub loan_id: i64,
    pub action: LoanAction,
    pub due_date: DateTime<Utc>,
    pub previous_due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Loan with its history and fines
#[derive(Debug, Clone, Serialize)]
pub struct LoanRecord {
    #[serde(flatten)]
    pub loan: Loan,
    pub histories: Vec<LoanHistory>,
    pub fines: Vec<Fine>,
}

/// Loan with full details for display
#[derive(Debug, Clone, Serialize)]
pub struct LoanDetails {
    #[serde(flatten)]
    pub loan: Loan,
    pub copy: BookCopy,
    pub book: Book,
    pub borrower: Option<User>,
    pub histories: Vec<LoanHistory>,
    pub fines: Vec<Fine>,
    pub is_overdue: bool,
}

/// Loan list filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoanFilter {
    pub user_id: Option<i64>,
    pub book_copy_id: Option<i64>,
    pub book_id: Option<i64>,
    pub status: Option<LoanStatus>,
    /// Only borrowed loans whose due date is before this instant
    pub overdue_at: Option<DateTime<Utc>>,
}
