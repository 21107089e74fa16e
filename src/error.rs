//! Error types for the lending engine

use serde::Serialize;
use thiserror::Error;

/// Numeric error codes handed to the handler layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    DbFailure = 3,
    NoSuchData = 5,
    MaxLoansReached = 11,
    BadValue = 18,
    InvalidState = 22,
    MaxReservationsReached = 23,
    DuplicateClaim = 24,
    ConcurrentUpdate = 25,
    MaxRenewalsReached = 26,
}

/// Reasons a user is not allowed to take a copy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Ineligible {
    #[error("You have reached the maximum number of loans ({current}/{max})")]
    MaxLoansReached { current: i64, max: i64 },

    #[error("You have reached the maximum number of reservations ({current}/{max})")]
    MaxReservationsReached { current: i64, max: i64 },

    #[error("You have already loaned a copy of this book")]
    TitleAlreadyBorrowed,

    #[error("You have already reserved a copy of this book")]
    TitleAlreadyReserved,

    #[error("Maximum renewals reached ({current}/{max})")]
    MaxRenewalsReached { current: i32, max: i32 },
}

impl Ineligible {
    pub fn code(&self) -> ErrorCode {
        match self {
            Ineligible::MaxLoansReached { .. } => ErrorCode::MaxLoansReached,
            Ineligible::MaxReservationsReached { .. } => ErrorCode::MaxReservationsReached,
            Ineligible::TitleAlreadyBorrowed | Ineligible::TitleAlreadyReserved => {
                ErrorCode::DuplicateClaim
            }
            Ineligible::MaxRenewalsReached { .. } => ErrorCode::MaxRenewalsReached,
        }
    }
}

/// Main engine error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not eligible: {0}")]
    Eligibility(#[from] Ineligible),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error body handed to whatever transport sits in front of the engine
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotFound(_) => ErrorCode::NoSuchData,
            AppError::InvalidState(_) => ErrorCode::InvalidState,
            AppError::Eligibility(reason) => reason.code(),
            AppError::Conflict(_) => ErrorCode::ConcurrentUpdate,
            AppError::Validation(_) => ErrorCode::BadValue,
            AppError::Database(_) => ErrorCode::DbFailure,
            AppError::Internal(_) => ErrorCode::Failure,
        }
    }

    /// HTTP-equivalent status for the handler layer
    pub fn status(&self) -> u16 {
        match self {
            AppError::NotFound(_) => 404,
            AppError::InvalidState(_) | AppError::Conflict(_) => 409,
            AppError::Eligibility(_) => 422,
            AppError::Validation(_) => 400,
            AppError::Database(_) | AppError::Internal(_) => 500,
        }
    }

    /// Whether the caller can correct the request and try again
    pub fn is_client_error(&self) -> bool {
        self.status() < 500
    }

    pub fn to_response(&self) -> ErrorResponse {
        let code = self.code();
        let message = match self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal error".to_string()
            }
            AppError::Eligibility(reason) => reason.to_string(),
            AppError::NotFound(msg)
            | AppError::InvalidState(msg)
            | AppError::Conflict(msg)
            | AppError::Validation(msg) => msg.clone(),
        };

        ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        }
    }
}

/// Result type alias for engine operations
pub type AppResult<T> = Result<T, AppError>;
