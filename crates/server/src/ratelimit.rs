//! Daily notification rate limiting.
//!
//! A [`RateLimiter`] gates one kind of action per scope (a recipient address,
//! or a fixed system-wide tag) within the current UTC day. Callers check
//! [`RateLimiter::allowed`] and call [`RateLimiter::increment`] only once the
//! action is confirmed to proceed.
//!
//! Counters are keyed `{limiter}:{scope}:{YYYY-MM-DD}` and expire at the next
//! UTC midnight, so stale windows age out without explicit cleanup. Two
//! counter stores are provided:
//! - [`MetadataCounterStore`]: shared by every process through the metadata
//!   store's atomic upsert-increment.
//! - [`InMemoryCounterStore`]: process-local, for single-node deployments and
//!   tests.

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use std::sync::Arc;
use sunset_core::day::{Day, next_utc_midnight};
use sunset_core::Clock;
use sunset_metadata::MetadataResult;
use sunset_metadata::repos::CounterRepo;
use time::OffsetDateTime;

/// Atomic windowed counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Current count for `key`, or 0 if absent or expired.
    async fn get(&self, key: &str, now: OffsetDateTime) -> MetadataResult<i64>;

    /// Increment `key`, creating it with `expires_at` if absent or expired.
    /// Returns the new count.
    async fn increment(
        &self,
        key: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> MetadataResult<i64>;

    /// Drop counters that expired before `now`. Returns how many were removed.
    async fn purge_expired(&self, now: OffsetDateTime) -> MetadataResult<u64>;
}

/// Counters kept in the metadata store.
pub struct MetadataCounterStore {
    repo: Arc<dyn CounterRepo>,
}

impl MetadataCounterStore {
    pub fn new(repo: Arc<dyn CounterRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl CounterStore for MetadataCounterStore {
    async fn get(&self, key: &str, now: OffsetDateTime) -> MetadataResult<i64> {
        self.repo.get_counter(key, now).await
    }

    async fn increment(
        &self,
        key: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> MetadataResult<i64> {
        self.repo.increment_counter(key, expires_at, now).await
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> MetadataResult<u64> {
        self.repo.purge_expired_counters(now).await
    }
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: i64,
    expires_at: OffsetDateTime,
}

/// Process-local counters.
#[derive(Default)]
pub struct InMemoryCounterStore {
    counters: DashMap<String, CounterEntry>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys, live or expired.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str, now: OffsetDateTime) -> MetadataResult<i64> {
        Ok(self
            .counters
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.count)
            .unwrap_or(0))
    }

    async fn increment(
        &self,
        key: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> MetadataResult<i64> {
        // The entry guard holds the shard lock, making read-modify-write atomic.
        let count = match self.counters.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.expires_at <= now {
                    *entry = CounterEntry {
                        count: 1,
                        expires_at,
                    };
                } else {
                    entry.count += 1;
                }
                entry.count
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CounterEntry {
                    count: 1,
                    expires_at,
                });
                1
            }
        };
        Ok(count)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> MetadataResult<u64> {
        let before = self.counters.len();
        self.counters.retain(|_, entry| entry.expires_at > now);
        Ok(before.saturating_sub(self.counters.len()) as u64)
    }
}

/// Per-day cap on one kind of action.
pub struct RateLimiter {
    name: String,
    limit: u32,
    enabled: bool,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter allowing `limit` actions per scope per UTC day.
    pub fn new(
        name: impl Into<String>,
        limit: u32,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            limit,
            enabled: true,
            store,
            clock,
        }
    }

    /// A limiter that allows everything and counts nothing.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Limiter name, used as the key prefix.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Actions allowed per scope per day.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    fn key(&self, scope: &str, day: Day) -> String {
        format!("{}:{}:{}", self.name, scope.trim().to_lowercase(), day)
    }

    /// Whether one more action for `scope` fits in today's window.
    pub async fn allowed(&self, scope: &str) -> MetadataResult<bool> {
        if !self.enabled {
            return Ok(true);
        }
        let now = self.clock.now();
        let count = self.store.get(&self.key(scope, Day::of(now)), now).await?;
        Ok(count < i64::from(self.limit))
    }

    /// Record one action for `scope` in today's window.
    pub async fn increment(&self, scope: &str) -> MetadataResult<i64> {
        if !self.enabled {
            return Ok(0);
        }
        let now = self.clock.now();
        let key = self.key(scope, Day::of(now));
        let count = self
            .store
            .increment(&key, next_utc_midnight(now), now)
            .await?;
        tracing::debug!(limiter = %self.name, count = count, "Rate limit counter incremented");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sunset_core::ManualClock;
    use time::Duration;
    use time::macros::datetime;

    fn limiter(limit: u32) -> (RateLimiter, Arc<ManualClock>, Arc<InMemoryCounterStore>) {
        let clock = Arc::new(ManualClock::new(datetime!(2026-05-01 09:00 UTC)));
        let store = Arc::new(InMemoryCounterStore::new());
        let limiter = RateLimiter::new("email", limit, store.clone(), clock.clone());
        (limiter, clock, store)
    }

    #[tokio::test]
    async fn test_allowed_then_denied_at_limit() {
        let (limiter, _clock, _store) = limiter(2);
        let mut seen = Vec::new();
        for _ in 0..3 {
            let allowed = limiter.allowed("ada@example.com").await.unwrap();
            seen.push(allowed);
            if allowed {
                limiter.increment("ada@example.com").await.unwrap();
            }
        }
        assert_eq!(seen, vec![true, true, false]);
    }

    #[tokio::test]
    async fn test_scopes_are_independent_and_case_insensitive() {
        let (limiter, _clock, _store) = limiter(1);
        limiter.increment("Ada@Example.com").await.unwrap();
        assert!(!limiter.allowed("ada@example.com").await.unwrap());
        assert!(limiter.allowed("bob@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_window_resets_at_utc_midnight() {
        let (limiter, clock, store) = limiter(1);
        limiter.increment("ada@example.com").await.unwrap();
        assert!(!limiter.allowed("ada@example.com").await.unwrap());

        clock.set(datetime!(2026-05-02 00:00 UTC));
        assert!(limiter.allowed("ada@example.com").await.unwrap());

        // Yesterday's key has expired and is purged.
        assert_eq!(store.purge_expired(clock.now()).await.unwrap(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expiry_set_only_on_creation() {
        let store = InMemoryCounterStore::new();
        let now = datetime!(2026-05-01 09:00 UTC);
        let first_expiry = datetime!(2026-05-02 00:00 UTC);
        assert_eq!(store.increment("k", first_expiry, now).await.unwrap(), 1);
        // A later increment with a different expiry keeps the original window.
        let later = now + Duration::hours(1);
        assert_eq!(
            store
                .increment("k", first_expiry + Duration::days(1), later)
                .await
                .unwrap(),
            2
        );
        assert_eq!(store.get("k", first_expiry - Duration::seconds(1)).await.unwrap(), 2);
        assert_eq!(store.get("k", first_expiry).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_disabled_limiter_always_allows() {
        let (limiter, _clock, store) = limiter(0);
        let limiter = limiter.disabled();
        assert!(limiter.allowed("anyone").await.unwrap());
        assert_eq!(limiter.increment("anyone").await.unwrap(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryCounterStore::new());
        let now = datetime!(2026-05-01 09:00 UTC);
        let expires = datetime!(2026-05-02 00:00 UTC);
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment("global", expires, now).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get("global", now).await.unwrap(), 32);
    }
}
