//! Status enums shared by copies, loans and reservations
//!
//! All of them are stored as SMALLINT columns.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// CopyStatus
// ---------------------------------------------------------------------------

/// Circulation status of a physical copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum CopyStatus {
    Available = 0,
    OnLoan = 1,
    OnReserve = 2,
}

impl Default for CopyStatus {
    fn default() -> Self {
        CopyStatus::Available
    }
}

impl fmt::Display for CopyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CopyStatus::Available => "available",
            CopyStatus::OnLoan => "on loan",
            CopyStatus::OnReserve => "on reserve",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// LoanStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum LoanStatus {
    Borrowed = 0,
    Returned = 1,
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LoanStatus::Borrowed => "borrowed",
            LoanStatus::Returned => "returned",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// ReservationStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum ReservationStatus {
    Pending = 0,
    /// Closed, either by a loan or by cancellation
    Fulfilled = 1,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Fulfilled => "fulfilled",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// LoanAction
// ---------------------------------------------------------------------------

/// Event recorded in a loan's history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum LoanAction {
    Borrow = 0,
    Renew = 1,
    Return = 2,
}
