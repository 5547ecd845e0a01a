//! Account deletion lifecycle services.
//!
//! - [`DeletionInitiator`]: soft delete, recovery token, scheduled record.
//! - [`RecoveryHandler`]: redeem a recovery token and cancel the deletion.
//! - [`PermanentDeletionScheduler`]: admit grace-expired records to days
//!   with spare capacity.
//! - [`HardDeletionExecutor`]: erase accounts whose admitted day arrived.

mod executor;
mod initiator;
mod recovery;
mod scheduler;

pub use executor::{ExecutionReport, HardDeletionExecutor};
pub use initiator::{DeletionInitiator, DeletionReceipt};
pub use recovery::{RecoveryHandler, RecoveryReceipt};
pub use scheduler::{PermanentDeletionScheduler, SchedulingReport};

use crate::bus::EventBus;
use crate::tokens::OneTimeTokenService;
use std::sync::Arc;
use sunset_core::Clock;
use sunset_core::config::{DeletionConfig, NotificationConfig};
use sunset_metadata::repos::{AccountRepo, DeletionRepo};

/// Collaborators shared by the lifecycle services.
#[derive(Clone)]
pub struct LifecycleContext {
    pub accounts: Arc<dyn AccountRepo>,
    pub deletions: Arc<dyn DeletionRepo>,
    pub tokens: Arc<dyn OneTimeTokenService>,
    pub bus: EventBus,
    pub clock: Arc<dyn Clock>,
    pub deletion: DeletionConfig,
    pub notifications: NotificationConfig,
}
