//! Periodic background jobs.
//!
//! Each job is an independent task on its own interval. A tick that fails is
//! logged and the next tick runs as scheduled. All jobs stop when the shared
//! shutdown token fires; a tick in progress stops between records.

use crate::metrics;
use crate::ratelimit::CounterStore;
use crate::state::AppState;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use sunset_core::Clock;
use sunset_metadata::MetadataResult;
use sunset_metadata::repos::OneTimeTokenRepo;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Rows removed by one housekeeping tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HousekeepingReport {
    pub tokens_purged: u64,
    pub counters_purged: u64,
}

/// Purges expired one-time tokens and rate-limit counters.
///
/// Expiry is always checked on read, so this only reclaims space.
pub struct Housekeeper {
    tokens: Arc<dyn OneTimeTokenRepo>,
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl Housekeeper {
    pub fn new(
        tokens: Arc<dyn OneTimeTokenRepo>,
        counters: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            counters,
            clock,
        }
    }

    pub async fn run_once(&self) -> MetadataResult<HousekeepingReport> {
        let _timer = metrics::TICK_DURATION
            .with_label_values(&["housekeeping"])
            .start_timer();
        let now = self.clock.now();

        let tokens_purged = self.tokens.purge_expired_one_time_tokens(now).await?;
        let counters_purged = self.counters.purge_expired(now).await?;

        metrics::HOUSEKEEPING_PURGED
            .with_label_values(&["one_time_tokens"])
            .inc_by(tokens_purged);
        metrics::HOUSEKEEPING_PURGED
            .with_label_values(&["rate_limit_counters"])
            .inc_by(counters_purged);

        tracing::debug!(
            tokens_purged = tokens_purged,
            counters_purged = counters_purged,
            "Housekeeping tick complete"
        );
        Ok(HousekeepingReport {
            tokens_purged,
            counters_purged,
        })
    }
}

/// Run `tick` every `period` until `shutdown` fires. The first tick runs
/// immediately.
pub fn spawn_periodic<F, Fut>(
    job: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        tracing::info!(job = job, interval_secs = period.as_secs(), "Periodic job started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => tick(shutdown.clone()).await,
            }
        }
        tracing::info!(job = job, "Periodic job stopped");
    })
}

/// Spawn the scheduler, executor and housekeeping loops.
pub fn spawn_workers(state: &AppState, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
    let deletion = &state.config.deletion;

    let scheduler = state.scheduler.clone();
    let scheduler_task = spawn_periodic(
        "scheduler",
        deletion.scheduler_interval(),
        shutdown.clone(),
        move |cancel| {
            let scheduler = scheduler.clone();
            async move {
                if let Err(e) = scheduler.run_once(&cancel).await {
                    tracing::error!(error = %e, "Scheduler tick failed");
                }
            }
        },
    );

    let executor = state.executor.clone();
    let executor_task = spawn_periodic(
        "executor",
        deletion.executor_interval(),
        shutdown.clone(),
        move |cancel| {
            let executor = executor.clone();
            async move {
                if let Err(e) = executor.run_once(&cancel).await {
                    tracing::error!(error = %e, "Executor tick failed");
                }
            }
        },
    );

    let housekeeper = state.housekeeper.clone();
    let housekeeping_task = spawn_periodic(
        "housekeeping",
        deletion.housekeeping_interval(),
        shutdown.clone(),
        move |_| {
            let housekeeper = housekeeper.clone();
            async move {
                if let Err(e) = housekeeper.run_once().await {
                    tracing::error!(error = %e, "Housekeeping tick failed");
                }
            }
        },
    );

    vec![scheduler_task, executor_task, housekeeping_task]
}
