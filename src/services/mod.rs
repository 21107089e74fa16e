//! Circulation services

pub mod eligibility;
pub mod fines;
pub mod lifecycle;
pub mod loans;
pub mod reservations;
pub mod sweeper;

use std::sync::Arc;

use crate::{clock::Clock, config::LendingPolicy};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub eligibility: eligibility::EligibilityService,
    pub fines: fines::FinesService,
    pub loans: loans::LoansService,
    pub reservations: reservations::ReservationsService,
    pub lifecycle: lifecycle::LifecycleService,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Wire the services around one policy and one clock
    pub fn new(policy: LendingPolicy, clock: Arc<dyn Clock>) -> Self {
        let policy = Arc::new(policy);

        let eligibility = eligibility::EligibilityService::new(policy.clone());
        let fines = fines::FinesService::new(policy.daily_fine_rate, clock.clone());
        let loans = loans::LoansService::new(policy.clone(), clock.clone(), fines.clone());
        let reservations = reservations::ReservationsService::new(policy, clock.clone());
        let lifecycle = lifecycle::LifecycleService::new(
            eligibility.clone(),
            loans.clone(),
            reservations.clone(),
            fines.clone(),
            clock.clone(),
        );

        Self {
            eligibility,
            fines,
            loans,
            reservations,
            lifecycle,
            clock,
        }
    }

    /// Sweeper for expired holds, sharing this container's clock
    pub fn sweeper(&self, batch_size: i64) -> sweeper::ExpirySweeper {
        sweeper::ExpirySweeper::new(
            self.lifecycle.clone(),
            self.reservations.clone(),
            self.clock.clone(),
            batch_size,
        )
    }
}
