//! Business logic services

pub mod limits;
pub mod loans;
pub mod notifications;
pub mod notifier;

use std::sync::Arc;

use crate::{
    clock::Clock, repository::CirculationRepository, services::limits::LoanLimits,
    services::notifier::DueNotifier,
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub loans: loans::LoansService,
    pub notifications: notifications::NotificationsService,
}

impl Services {
    /// Create all services on top of the given repository
    pub fn new(
        repository: Arc<dyn CirculationRepository>,
        notifier: Arc<dyn DueNotifier>,
        limits: LoanLimits,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            loans: loans::LoansService::new(repository.clone(), limits, clock.clone()),
            notifications: notifications::NotificationsService::new(repository, notifier, clock),
        }
    }
}
