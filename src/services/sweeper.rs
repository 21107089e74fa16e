//! Expiry sweep for reservations whose hold window has passed

use std::sync::Arc;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    services::{lifecycle::LifecycleService, reservations::ReservationsService},
    store::TransactionSource,
};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ExpirySweeper {
    lifecycle: LifecycleService,
    reservations: ReservationsService,
    clock: Arc<dyn Clock>,
    batch_size: i64,
}

impl ExpirySweeper {
    pub fn new(
        lifecycle: LifecycleService,
        reservations: ReservationsService,
        clock: Arc<dyn Clock>,
        batch_size: i64,
    ) -> Self {
        Self {
            lifecycle,
            reservations,
            clock,
            batch_size,
        }
    }

    /// Cancels up to one batch of expired holds, each in its own transaction.
    ///
    /// A hold that was borrowed or cancelled between the scan and its own
    /// transaction is skipped. Any other error on a hold is logged and
    /// counted as failed, and the sweep moves on. Only errors from the scan
    /// itself are returned.
    pub async fn sweep_once<T>(&self, source: &T) -> AppResult<SweepReport>
    where
        T: TransactionSource,
    {
        let now = self.clock.now();
        let expired = {
            let mut tx = source.begin().await?;
            self.reservations
                .expired(T::store(&mut tx), now, self.batch_size)
                .await?
        };

        let mut report = SweepReport {
            expired: expired.len(),
            ..SweepReport::default()
        };

        for reservation in expired {
            let mut tx = source.begin().await?;
            let cancelled = self
                .lifecycle
                .cancel_reservation(T::store(&mut tx), reservation.id)
                .await;
            let result = match cancelled {
                Ok(_) => source.commit(tx).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => report.cancelled += 1,
                Err(
                    e @ (AppError::InvalidState(_) | AppError::Conflict(_) | AppError::NotFound(_)),
                ) => {
                    tracing::debug!(
                        reservation_id = reservation.id,
                        copy_id = reservation.book_copy_id,
                        error = %e,
                        "Expired reservation skipped"
                    );
                    report.skipped += 1;
                }
                Err(e) => {
                    tracing::error!(
                        reservation_id = reservation.id,
                        copy_id = reservation.book_copy_id,
                        error = %e,
                        "Failed to cancel expired reservation"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.expired > 0 {
            tracing::info!(
                expired = report.expired,
                cancelled = report.cancelled,
                skipped = report.skipped,
                failed = report.failed,
                "Reservation expiry sweep finished"
            );
        }

        Ok(report)
    }
}
