//! Core domain types for the sunset account deletion lifecycle.
//!
//! This crate defines the vocabulary shared by the metadata store and the
//! lifecycle services:
//! - Account and deletion identifiers
//! - The deletion status state machine
//! - UTC calendar days and the injectable clock
//! - Lifecycle event payloads and bus subjects
//! - Recovery token secrets
//! - Bounded retry policy

pub mod account;
pub mod clock;
pub mod config;
pub mod day;
pub mod deletion;
pub mod error;
pub mod events;
pub mod retry;
pub mod token;

pub use account::UserId;
pub use clock::{Clock, ManualClock, SystemClock};
pub use day::Day;
pub use deletion::{DeletionId, DeletionStatus};
pub use error::{Error, Result};
pub use retry::{RetryExhausted, RetryPolicy};
pub use token::{TokenSecret, hash_token};

/// Default recoverable grace period before permanent deletion, in days.
pub const DEFAULT_GRACE_PERIOD_DAYS: u32 = 90;

/// Default ceiling on permanent deletions admitted per UTC day.
pub const DEFAULT_MAX_DELETIONS_PER_DAY: u32 = 10;
