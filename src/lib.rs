//! Lending engine
//!
//! Copy lifecycle, loans, reservations and overdue fines for a library
//! circulation desk. Every operation runs inside a transaction owned by the
//! caller; see [`store`] for the seams and [`services::lifecycle`] for the
//! entry points.

use std::sync::Arc;

pub mod clock;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;
pub mod store;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared by the binary's tasks
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repository: repository::Repository,
    pub services: Arc<services::Services>,
}
