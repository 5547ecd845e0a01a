//! Test fixtures: seeded accounts, a manual clock and a wired service state.

use super::mocks::RecordingDispatch;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use sunset_core::config::AppConfig;
use sunset_core::{Clock, ManualClock, UserId};
use sunset_metadata::MetadataStore;
use sunset_metadata::models::AccountRow;
use sunset_metadata::repos::AccountRepo;
use sunset_server::bus::Transport;
use sunset_server::{AppState, LocalTransport};
use time::OffsetDateTime;
use time::macros::datetime;

/// Counter for generating unique email addresses.
static EMAIL_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Fixed starting instant for lifecycle tests.
pub const DAY0: OffsetDateTime = datetime!(2026-01-01 10:00 UTC);

/// A unique test email address.
#[allow(dead_code)]
pub fn unique_email(prefix: &str) -> String {
    let n = EMAIL_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{n}@example.com")
}

/// Insert an active account and return its id.
#[allow(dead_code)]
pub async fn seed_account(store: &dyn MetadataStore, email: &str, now: OffsetDateTime) -> UserId {
    let user_id = UserId::new();
    store
        .create_account(&AccountRow {
            user_id: *user_id.as_uuid(),
            email: email.to_string(),
            display_name: "Test User".to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        })
        .await
        .expect("Failed to seed account");
    user_id
}

/// Everything a lifecycle test needs, wired like the binary.
#[allow(dead_code)]
pub struct Harness {
    pub store: Arc<dyn MetadataStore>,
    pub clock: Arc<ManualClock>,
    pub dispatch: Arc<RecordingDispatch>,
    pub state: AppState,
}

#[allow(dead_code)]
impl Harness {
    /// Harness over `store` with the test configuration.
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self::with_config(store, AppConfig::for_testing())
    }

    pub fn with_config(store: Arc<dyn MetadataStore>, config: AppConfig) -> Self {
        let transport = Arc::new(LocalTransport::new(config.events.channel_capacity));
        Self::with_transport(store, config, transport)
    }

    pub fn with_transport(
        store: Arc<dyn MetadataStore>,
        config: AppConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let clock = Arc::new(ManualClock::new(DAY0));
        let dispatch = Arc::new(RecordingDispatch::default());
        let state = AppState::new(
            config,
            store.clone(),
            clock.clone() as Arc<dyn Clock>,
            transport,
            dispatch.clone(),
        );
        Self {
            store,
            clock,
            dispatch,
            state,
        }
    }

    /// Seed an account at the current clock time.
    pub async fn account(&self, prefix: &str) -> (UserId, String) {
        let email = unique_email(prefix);
        let user_id = seed_account(self.store.as_ref(), &email, self.clock.now()).await;
        (user_id, email)
    }
}
