use crate::bus::EventBus;
use crate::error::{LifecycleError, LifecycleResult};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sunset_core::config::DeletionConfig;
use sunset_core::day::Day;
use sunset_core::events::DeletionExecutedEvent;
use sunset_core::{Clock, DeletionId, DeletionStatus, UserId};
use sunset_metadata::models::DeletionRow;
use sunset_metadata::repos::{AccountRepo, DeletionRepo};
use tokio_util::sync::CancellationToken;

/// Tally of one executor tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Due records considered.
    pub examined: u64,
    /// Accounts erased and marked executed.
    pub executed: u64,
    /// Records that changed state before they were reached.
    pub skipped: u64,
    /// Records left scheduled after a failure.
    pub failed: u64,
}

/// Irreversibly erases accounts whose admitted day has arrived.
pub struct HardDeletionExecutor {
    accounts: Arc<dyn AccountRepo>,
    deletions: Arc<dyn DeletionRepo>,
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: DeletionConfig,
}

impl HardDeletionExecutor {
    pub fn new(
        accounts: Arc<dyn AccountRepo>,
        deletions: Arc<dyn DeletionRepo>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        config: DeletionConfig,
    ) -> Self {
        Self {
            accounts,
            deletions,
            bus,
            clock,
            config,
        }
    }

    /// Run one tick over at most `batch_size` due records.
    ///
    /// A failing record is logged, counted against the record and left
    /// scheduled; the rest of the batch still runs. Records with fewer
    /// failures are served first.
    pub async fn run_once(&self, cancel: &CancellationToken) -> LifecycleResult<ExecutionReport> {
        let _timer = metrics::TICK_DURATION
            .with_label_values(&["executor"])
            .start_timer();
        let mut report = ExecutionReport::default();

        let today = Day::of(self.clock.now());
        let due = self
            .deletions
            .get_due_deletions(today.date(), i64::from(self.config.batch_size))
            .await?;

        for record in due {
            if cancel.is_cancelled() {
                tracing::info!("Executor tick cancelled");
                break;
            }
            report.examined += 1;

            match self.execute(&record, today).await {
                Ok(true) => report.executed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    if matches!(e, LifecycleError::FatalErasure(_)) {
                        metrics::ERASURE_FAILURES.inc();
                    }
                    tracing::error!(
                        deletion_id = %record.deletion_id,
                        user_id = %record.user_id,
                        attempts = record.execution_attempts + 1,
                        error = %e,
                        "Hard deletion failed, record left scheduled"
                    );
                    // Moves the record behind healthy ones in the next due query.
                    if let Err(e) = self
                        .deletions
                        .record_execution_failure(record.deletion_id, self.clock.now())
                        .await
                    {
                        tracing::warn!(
                            deletion_id = %record.deletion_id,
                            error = %e,
                            "Failed to record erasure failure"
                        );
                    }
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            executed = report.executed,
            skipped = report.skipped,
            failed = report.failed,
            "Executor tick complete"
        );
        Ok(report)
    }

    async fn execute(&self, record: &DeletionRow, today: Day) -> LifecycleResult<bool> {
        // Re-read: recovery may have cancelled the record since the batch query.
        let Some(current) = self.deletions.get_deletion(record.deletion_id).await? else {
            return Ok(false);
        };
        let due = current
            .scheduled_date
            .is_some_and(|day| Day::from_date(day) <= today);
        if current.parsed_status()? != DeletionStatus::Scheduled || !due {
            tracing::debug!(
                deletion_id = %current.deletion_id,
                status = %current.status,
                "Deletion no longer due, skipping"
            );
            return Ok(false);
        }

        // Captured before erasure for the notice.
        let account = self.accounts.get_account(current.user_id).await?;

        // Erases only if the record is still scheduled when the transaction
        // runs; a recovery that won the race leaves it cancelled.
        let now = self.clock.now();
        let executed = self
            .deletions
            .execute_deletion(current.deletion_id, now)
            .await
            .map_err(|e| LifecycleError::FatalErasure(e.to_string()))?;
        if !executed {
            tracing::info!(
                deletion_id = %current.deletion_id,
                user_id = %current.user_id,
                "Deletion changed state before erasure, skipping"
            );
            return Ok(false);
        }

        let user_id = UserId::from(current.user_id);
        let deletion_id = DeletionId::from(current.deletion_id);
        metrics::DELETIONS_EXECUTED.inc();
        tracing::info!(
            user_id = %user_id,
            deletion_id = %deletion_id,
            "Account permanently deleted"
        );

        if let Some(account) = account {
            let event = DeletionExecutedEvent {
                user_id,
                deletion_id,
                email: account.email,
                name: account.display_name,
                timestamp: now,
            };
            if let Err(e) = self.bus.publish(&event).await {
                tracing::warn!(
                    deletion_id = %deletion_id,
                    error = %e,
                    "Deletion notice not published"
                );
            }
        }
        Ok(true)
    }
}
