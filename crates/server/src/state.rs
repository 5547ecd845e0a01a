//! Application state shared by the workers, consumers and ops routes.

use crate::bus::{BusError, EventBus, Transport};
use crate::lifecycle::{
    DeletionInitiator, HardDeletionExecutor, LifecycleContext, PermanentDeletionScheduler,
    RecoveryHandler,
};
use crate::notifications::{EmailDispatch, Notifier, register_consumers};
use crate::ratelimit::{CounterStore, InMemoryCounterStore, MetadataCounterStore, RateLimiter};
use crate::tokens::{RECOVERY_PURPOSE, StoreTokenService};
use crate::workers::Housekeeper;
use std::sync::Arc;
use sunset_core::Clock;
use sunset_core::config::{AppConfig, RateLimitBackend, RateLimitConfig};
use sunset_metadata::MetadataStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Limiter name for the per-recipient email cap.
pub const RECIPIENT_LIMITER: &str = "email";

/// Limiter name for the global permanent-deletion notice cap.
pub const DELETION_NOTICE_LIMITER: &str = "deletion_notice";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    pub clock: Arc<dyn Clock>,
    pub bus: EventBus,
    pub initiator: Arc<DeletionInitiator>,
    pub recovery: Arc<RecoveryHandler>,
    pub scheduler: Arc<PermanentDeletionScheduler>,
    pub executor: Arc<HardDeletionExecutor>,
    pub notifier: Arc<Notifier>,
    pub housekeeper: Arc<Housekeeper>,
}

impl AppState {
    /// Wire every service from configuration.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        dispatch: Arc<dyn EmailDispatch>,
    ) -> Self {
        let bus = EventBus::new(
            transport,
            config.events.publish_policy(),
            config.events.delivery_policy(),
        );

        let tokens = Arc::new(StoreTokenService::new(
            metadata.clone(),
            clock.clone(),
            RECOVERY_PURPOSE,
            config.tokens.recovery_token_ttl(),
        ));

        let counters: Arc<dyn CounterStore> = match config.rate_limit.backend {
            RateLimitBackend::Metadata => Arc::new(MetadataCounterStore::new(metadata.clone())),
            RateLimitBackend::Memory => Arc::new(InMemoryCounterStore::new()),
        };
        let recipient_limiter = Arc::new(build_limiter(
            RECIPIENT_LIMITER,
            config.rate_limit.max_emails_per_recipient_per_day,
            &config.rate_limit,
            &counters,
            &clock,
        ));
        let notice_limiter = Arc::new(build_limiter(
            DELETION_NOTICE_LIMITER,
            config.rate_limit.max_deletion_notices_per_day,
            &config.rate_limit,
            &counters,
            &clock,
        ));

        let ctx = LifecycleContext {
            accounts: metadata.clone(),
            deletions: metadata.clone(),
            tokens,
            bus: bus.clone(),
            clock: clock.clone(),
            deletion: config.deletion.clone(),
            notifications: config.notifications.clone(),
        };

        let initiator = Arc::new(
            DeletionInitiator::new(ctx.clone()).with_recipient_limiter(recipient_limiter.clone()),
        );
        let recovery = Arc::new(RecoveryHandler::new(ctx));
        let scheduler = Arc::new(PermanentDeletionScheduler::new(
            metadata.clone(),
            clock.clone(),
            config.deletion.clone(),
        ));
        let executor = Arc::new(HardDeletionExecutor::new(
            metadata.clone(),
            metadata.clone(),
            bus.clone(),
            clock.clone(),
            config.deletion.clone(),
        ));
        let notifier = Arc::new(Notifier::new(
            dispatch,
            metadata.clone(),
            clock.clone(),
            recipient_limiter,
            notice_limiter,
        ));
        let housekeeper = Arc::new(Housekeeper::new(
            metadata.clone(),
            counters,
            clock.clone(),
        ));

        Self {
            config: Arc::new(config),
            metadata,
            clock,
            bus,
            initiator,
            recovery,
            scheduler,
            executor,
            notifier,
            housekeeper,
        }
    }

    /// Subscribe the notification consumers.
    pub async fn start_consumers(
        &self,
        shutdown: CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, BusError> {
        register_consumers(
            &self.bus,
            self.notifier.clone(),
            &self.config.notifications,
            shutdown,
        )
        .await
    }
}

fn build_limiter(
    name: &str,
    limit: u32,
    config: &RateLimitConfig,
    counters: &Arc<dyn CounterStore>,
    clock: &Arc<dyn Clock>,
) -> RateLimiter {
    let limiter = RateLimiter::new(name, limit, counters.clone(), clock.clone());
    if config.enabled {
        limiter
    } else {
        limiter.disabled()
    }
}
