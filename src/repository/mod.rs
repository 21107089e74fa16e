//! PostgreSQL implementation of the store traits
//!
//! The traits are implemented on `PgConnection` so that both a pooled
//! connection and an open `Transaction<'_, Postgres>` (via `&mut *tx`) can be
//! handed to the engine.

pub mod copies;
pub mod fines;
pub mod loans;
pub mod reservations;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgConnection, Pool, Postgres, QueryBuilder, Transaction};

use crate::{
    config::DatabaseConfig,
    error::{AppError, AppResult},
    models::ListParams,
    store::TransactionSource,
};

/// Main repository struct holding database connection pool
#[derive(Clone)]
pub struct Repository {
    pub pool: Pool<Postgres>,
}

impl Repository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Connect a pool sized from configuration
    pub async fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to run migrations: {}", e)))
    }

    /// Open a transaction for one engine operation
    pub async fn begin(&self) -> AppResult<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }
}

#[async_trait]
impl TransactionSource for Repository {
    type Tx = Transaction<'static, Postgres>;
    type Store = PgConnection;

    async fn begin(&self) -> AppResult<Self::Tx> {
        Repository::begin(self).await
    }

    async fn commit(&self, tx: Self::Tx) -> AppResult<()> {
        tx.commit().await?;
        Ok(())
    }

    fn store(tx: &mut Self::Tx) -> &mut PgConnection {
        &mut **tx
    }
}

/// Appends `ORDER BY created_at, id` and the page window.
pub(crate) fn push_list_params(builder: &mut QueryBuilder<'_, Postgres>, params: &ListParams) {
    let direction = params.direction.as_sql();
    builder
        .push(" ORDER BY created_at ")
        .push(direction)
        .push(", id ")
        .push(direction);

    if let Some(limit) = params.limit {
        builder.push(" LIMIT ").push_bind(limit.max(0));
    }
    if params.offset > 0 {
        builder.push(" OFFSET ").push_bind(params.offset);
    }
}

/// Turns a unique-index violation into a conflict; everything else passes
/// through as a database error.
pub(crate) fn unique_violation_as_conflict(err: sqlx::Error, message: impl Into<String>) -> AppError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => AppError::Conflict(message.into()),
        _ => AppError::Database(err),
    }
}
