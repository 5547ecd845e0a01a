//! Repository traits for metadata operations.

pub mod accounts;
pub mod capacity;
pub mod counters;
pub mod deletions;
pub mod email_sends;
pub mod one_time_tokens;

pub use accounts::AccountRepo;
pub use capacity::CapacityRepo;
pub use counters::CounterRepo;
pub use deletions::{AdmissionOutcome, DeletionRepo, RecoveryOutcome};
pub use email_sends::EmailSendRepo;
pub use one_time_tokens::OneTimeTokenRepo;
