use crate::error::{LifecycleError, LifecycleResult};
use crate::metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sunset_core::config::DeletionConfig;
use sunset_core::day::Day;
use sunset_core::Clock;
use sunset_metadata::models::DeletionRow;
use sunset_metadata::repos::{AdmissionOutcome, DeletionRepo};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Tally of one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingReport {
    /// Grace-expired records considered.
    pub examined: u64,
    /// Records assigned to a day.
    pub admitted: u64,
    /// Records left for the next tick because every probed day was full.
    pub deferred: u64,
    /// Records recovered or admitted elsewhere before this tick reached them.
    pub skipped: u64,
    /// Records whose admission hit a store error.
    pub failed: u64,
}

enum Admission {
    Admitted { day: Day, count: i64 },
    Skipped,
}

/// Admits grace-expired deletions to hard-deletion days without exceeding
/// any day's capacity.
///
/// Each record is admitted in its own transaction, so concurrent schedulers
/// and cancelled ticks never leave a record half-admitted or a day over its
/// limit.
pub struct PermanentDeletionScheduler {
    deletions: Arc<dyn DeletionRepo>,
    clock: Arc<dyn Clock>,
    config: DeletionConfig,
}

impl PermanentDeletionScheduler {
    pub fn new(
        deletions: Arc<dyn DeletionRepo>,
        clock: Arc<dyn Clock>,
        config: DeletionConfig,
    ) -> Self {
        Self {
            deletions,
            clock,
            config,
        }
    }

    /// Run one tick over at most `batch_size` records.
    ///
    /// Stops between records once `cancel` fires.
    pub async fn run_once(&self, cancel: &CancellationToken) -> LifecycleResult<SchedulingReport> {
        let _timer = metrics::TICK_DURATION
            .with_label_values(&["scheduler"])
            .start_timer();
        let mut report = SchedulingReport::default();

        let now = self.clock.now();
        let today = Day::of(now);
        let candidates = self
            .deletions
            .get_grace_expired_deletions(now, i64::from(self.config.batch_size))
            .await?;

        // Days before the cursor were full earlier in this tick.
        let mut cursor = today;
        let horizon = today.plus_days(self.config.max_probe_days.saturating_sub(1));

        for record in candidates {
            if cancel.is_cancelled() {
                tracing::info!("Scheduler tick cancelled");
                break;
            }
            report.examined += 1;

            match self.admit(&record, &mut cursor, horizon, now).await {
                Ok(Admission::Admitted { day, count }) => {
                    report.admitted += 1;
                    metrics::DELETIONS_ADMITTED.inc();
                    tracing::info!(
                        deletion_id = %record.deletion_id,
                        user_id = %record.user_id,
                        day = %day,
                        count = count,
                        "Deletion admitted"
                    );
                }
                Ok(Admission::Skipped) => {
                    report.skipped += 1;
                    tracing::debug!(
                        deletion_id = %record.deletion_id,
                        "Deletion no longer awaiting admission"
                    );
                }
                Err(LifecycleError::CapacityExhausted { probed_days }) => {
                    report.deferred += 1;
                    metrics::ADMISSION_DEFERRED.inc();
                    tracing::warn!(
                        deletion_id = %record.deletion_id,
                        probed_days = probed_days,
                        "No deletion capacity within probe horizon, deferring"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        deletion_id = %record.deletion_id,
                        error = %e,
                        "Deletion admission failed"
                    );
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            admitted = report.admitted,
            deferred = report.deferred,
            skipped = report.skipped,
            failed = report.failed,
            "Scheduler tick complete"
        );
        Ok(report)
    }

    async fn admit(
        &self,
        record: &DeletionRow,
        cursor: &mut Day,
        horizon: Day,
        now: OffsetDateTime,
    ) -> LifecycleResult<Admission> {
        let max_limit = i64::from(self.config.max_deletions_per_day);
        while *cursor <= horizon {
            let outcome = {
                let _timer = metrics::ADMISSION_DURATION.start_timer();
                self.deletions
                    .admit_deletion(record.deletion_id, cursor.date(), max_limit, now)
                    .await?
            };
            match outcome {
                AdmissionOutcome::Admitted { count } => {
                    return Ok(Admission::Admitted {
                        day: *cursor,
                        count,
                    });
                }
                AdmissionOutcome::DayFull => {
                    metrics::ADMISSION_DAYS_FULL.inc();
                    tracing::debug!(day = %cursor, "Deletion day full, probing next");
                    let next = cursor.next();
                    if next == *cursor {
                        break;
                    }
                    *cursor = next;
                }
                AdmissionOutcome::NotEligible => return Ok(Admission::Skipped),
            }
        }
        Err(LifecycleError::CapacityExhausted {
            probed_days: self.config.max_probe_days,
        })
    }
}
