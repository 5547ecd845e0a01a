//! Deletion record repository.

use crate::error::MetadataResult;
use crate::models::DeletionRow;
use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// Result of trying to admit one record to a hard-deletion day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// The record now points at the day; `count` is the day's new total.
    Admitted { count: i64 },
    /// The day is at its limit. Nothing was changed.
    DayFull,
    /// The record is no longer waiting for admission (recovered, executed or
    /// admitted by another scheduler). Nothing was changed.
    NotEligible,
}

/// Result of trying to recover a scheduled record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The record is cancelled and the account restored.
    Recovered,
    /// The record is no longer scheduled. Nothing was changed.
    NotEligible,
    /// The record is scheduled but its account is gone. Nothing was changed.
    AccountMissing,
}

/// Repository for deletion lifecycle records.
///
/// Every mutation is conditional on `status = 'scheduled'`, so executed and
/// cancelled records are never modified.
#[async_trait]
pub trait DeletionRepo: Send + Sync {
    /// Create a record.
    ///
    /// Fails with `AlreadyExists` if the user already has a scheduled record.
    async fn create_deletion(&self, deletion: &DeletionRow) -> MetadataResult<()>;

    /// Get a record by ID.
    async fn get_deletion(&self, deletion_id: Uuid) -> MetadataResult<Option<DeletionRow>>;

    /// Get the user's scheduled record, if any.
    async fn get_active_deletion_for_user(
        &self,
        user_id: Uuid,
    ) -> MetadataResult<Option<DeletionRow>>;

    /// Scheduled records whose grace period ended at or before `now` and that
    /// have not been admitted to a day. Oldest grace expiry first.
    async fn get_grace_expired_deletions(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> MetadataResult<Vec<DeletionRow>>;

    /// Admitted scheduled records whose day is on or before `today`.
    /// Fewest failed erasures first, then earliest day.
    async fn get_due_deletions(&self, today: Date, limit: i64)
    -> MetadataResult<Vec<DeletionRow>>;

    /// Atomically assign the record to `day` and count it against the day's
    /// capacity.
    ///
    /// Both writes commit together or not at all. The capacity row is created
    /// on first use with `max_limit`; an existing row admits only while its
    /// count is below both its stored limit and `max_limit`.
    async fn admit_deletion(
        &self,
        deletion_id: Uuid,
        day: Date,
        max_limit: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<AdmissionOutcome>;

    /// `Scheduled -> Cancelled`, clearing the recovery token binding.
    /// Returns false if the record was not scheduled.
    async fn cancel_deletion(&self, deletion_id: Uuid, now: OffsetDateTime)
    -> MetadataResult<bool>;

    /// Erase the record's account and mark the record `Executed`, in one
    /// transaction.
    ///
    /// Runs only while the record is still scheduled and admitted to a day;
    /// otherwise returns false and erases nothing. The account row and the
    /// user's one-time tokens are deleted, and the recovery token binding is
    /// cleared. On error nothing is committed and the record stays scheduled.
    async fn execute_deletion(&self, deletion_id: Uuid, now: OffsetDateTime)
    -> MetadataResult<bool>;

    /// Cancel a scheduled record and restore its account, in one transaction.
    ///
    /// The record is cancelled first, so an erasure that has not yet
    /// committed finds it no longer scheduled.
    async fn recover_deletion(
        &self,
        deletion_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<RecoveryOutcome>;

    /// Count a failed erasure against a scheduled record.
    ///
    /// The due query serves records with fewer failures first, so one record
    /// that keeps failing cannot hold a whole batch.
    async fn record_execution_failure(
        &self,
        deletion_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Bind a freshly issued recovery token to a scheduled record.
    /// Returns false if the record was not scheduled.
    async fn replace_recovery_token(
        &self,
        deletion_id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> MetadataResult<bool>;
}
