//! Rate limit counter repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Repository for windowed rate limit counters.
///
/// A counter whose `expires_at` has passed reads as zero and is reset by the
/// next increment.
#[async_trait]
pub trait CounterRepo: Send + Sync {
    /// Current count, or 0 if the key is absent or expired.
    async fn get_counter(&self, key: &str, now: OffsetDateTime) -> MetadataResult<i64>;

    /// Atomically increment and return the new count.
    ///
    /// `expires_at` is written only when the counter is created or an expired
    /// counter is reset.
    async fn increment_counter(
        &self,
        key: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> MetadataResult<i64>;

    /// Delete counters that expired before `now`.
    async fn purge_expired_counters(&self, now: OffsetDateTime) -> MetadataResult<u64>;
}
