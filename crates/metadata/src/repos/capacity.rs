//! Deletion capacity ledger repository.

use crate::error::MetadataResult;
use crate::models::DeletionCapacityRow;
use async_trait::async_trait;
use time::{Date, OffsetDateTime};

/// Repository for the per-day permanent deletion ledger.
///
/// Rows are created lazily and never deleted.
#[async_trait]
pub trait CapacityRepo: Send + Sync {
    /// Get the ledger row for a day. Absent means nothing admitted yet.
    async fn get_capacity(&self, day: Date) -> MetadataResult<Option<DeletionCapacityRow>>;

    /// Ledger rows for `from..=to`, ordered by day.
    async fn list_capacity(&self, from: Date, to: Date)
    -> MetadataResult<Vec<DeletionCapacityRow>>;

    /// Atomic upsert-increment.
    ///
    /// Returns the new count, or `None` if the day is already at its limit.
    async fn try_increment_capacity(
        &self,
        day: Date,
        max_limit: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<Option<i64>>;
}
