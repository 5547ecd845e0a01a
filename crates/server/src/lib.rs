//! Account deletion lifecycle service.
//!
//! This crate runs the deletion pipeline:
//! - Deletion requests with a recoverable grace period
//! - Token-based recovery
//! - Capacity-bounded scheduling of permanent deletions
//! - Hard deletion of due accounts
//! - Rate-limited notification emails driven by lifecycle events

pub mod bus;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod notifications;
pub mod ratelimit;
pub mod routes;
pub mod state;
pub mod tokens;
pub mod workers;

pub use bus::{EventBus, LocalTransport, Transport};
pub use error::{LifecycleError, LifecycleResult};
pub use lifecycle::{
    DeletionInitiator, ExecutionReport, HardDeletionExecutor, PermanentDeletionScheduler,
    RecoveryHandler, SchedulingReport,
};
pub use ratelimit::RateLimiter;
pub use routes::create_router;
pub use state::AppState;
