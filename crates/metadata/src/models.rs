//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use sqlx::FromRow;
use sunset_core::DeletionStatus;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// Accounts
// =============================================================================

/// User account. `deleted_at` is the soft-delete flag.
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

impl AccountRow {
    /// Whether the account is soft-deleted.
    pub fn is_soft_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

// =============================================================================
// Deletion records
// =============================================================================

/// One account deletion request.
///
/// `grace_expires_at` marks the end of the recoverable window.
/// `scheduled_date` stays NULL until the scheduler admits the record to a
/// capacity-checked day.
#[derive(Debug, Clone, FromRow)]
pub struct DeletionRow {
    pub deletion_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub requested_at: OffsetDateTime,
    pub grace_expires_at: OffsetDateTime,
    pub scheduled_date: Option<Date>,
    pub recovery_token_hash: Option<String>,
    pub recovery_token_expires_at: Option<OffsetDateTime>,
    pub cancelled_at: Option<OffsetDateTime>,
    pub executed_at: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
    /// Erasures of this record that failed so far.
    pub execution_attempts: i64,
}

impl DeletionRow {
    /// Parse the stored status.
    pub fn parsed_status(&self) -> MetadataResult<DeletionStatus> {
        DeletionStatus::parse(&self.status).map_err(|e| MetadataError::Internal(e.to_string()))
    }

    /// Whether the recovery token bound to this record is still usable at `now`.
    pub fn has_live_recovery_token(&self, now: OffsetDateTime) -> bool {
        self.status == DeletionStatus::Scheduled.as_str()
            && self.recovery_token_hash.is_some()
            && self.recovery_token_expires_at.is_some_and(|exp| exp > now)
    }
}

// =============================================================================
// Deletion capacity ledger
// =============================================================================

/// Admitted permanent deletions for one UTC day.
#[derive(Debug, Clone, FromRow)]
pub struct DeletionCapacityRow {
    pub day: Date,
    pub count: i64,
    pub max_limit: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl DeletionCapacityRow {
    /// Slots still free on this day.
    pub fn remaining(&self) -> i64 {
        (self.max_limit - self.count).max(0)
    }
}

// =============================================================================
// Rate limit counters
// =============================================================================

/// Windowed counter for notification rate limiting.
#[derive(Debug, Clone, FromRow)]
pub struct RateLimitCounterRow {
    pub counter_key: String,
    pub count: i64,
    pub expires_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

// =============================================================================
// One-time tokens
// =============================================================================

/// Hashed single-use token bound to a subject.
#[derive(Debug, Clone, FromRow)]
pub struct OneTimeTokenRow {
    pub token_hash: String,
    pub subject_id: Uuid,
    pub purpose: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

// =============================================================================
// Email send ledger
// =============================================================================

/// One attempted notification email.
///
/// Template data is not kept: recovery emails carry a live token.
#[derive(Debug, Clone, FromRow)]
pub struct EmailSendRow {
    pub send_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub template: String,
    /// `sent` or `failed`.
    pub status: String,
    pub error_message: Option<String>,
    pub sent_at: OffsetDateTime,
}
