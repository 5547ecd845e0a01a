//! PostgreSQL-only behaviour: concurrent admission under real row locking.
//!
//! These tests require Docker. Set SKIP_POSTGRES_TESTS=1 to skip.

mod common;

use common::{DAY0, postgres_or_skip, seed_account, unique_email};
use std::sync::Arc;
use sunset_core::config::DeletionConfig;
use sunset_core::{Clock, ManualClock};
use sunset_metadata::MetadataStore;
use sunset_metadata::models::DeletionRow;
use sunset_metadata::repos::{AdmissionOutcome, CapacityRepo, DeletionRepo};
use sunset_server::PermanentDeletionScheduler;
use time::Duration;
use time::macros::date;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn grace_expired(store: &Arc<dyn MetadataStore>, n: usize) -> Vec<Uuid> {
    let mut ids = Vec::with_capacity(n);
    for _ in 0..n {
        let user_id = seed_account(store.as_ref(), &unique_email("pg"), DAY0).await;
        let row = DeletionRow {
            deletion_id: Uuid::new_v4(),
            user_id: *user_id.as_uuid(),
            status: "scheduled".to_string(),
            requested_at: DAY0,
            grace_expires_at: DAY0,
            scheduled_date: None,
            recovery_token_hash: None,
            recovery_token_expires_at: None,
            cancelled_at: None,
            executed_at: None,
            updated_at: DAY0,
            execution_attempts: 0,
        };
        store.create_deletion(&row).await.unwrap();
        ids.push(row.deletion_id);
    }
    ids
}

#[tokio::test]
async fn test_postgres_concurrent_admission_stays_within_limit() {
    let Some(pg) = postgres_or_skip().await else {
        return;
    };
    let store = pg.store();
    let day = date!(2026 - 01 - 01);
    let ids = grace_expired(&store, 20).await;

    let mut handles = Vec::new();
    for id in ids {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.admit_deletion(id, day, 7, DAY0).await.unwrap()
        }));
    }

    let mut admitted = 0;
    let mut full = 0;
    for handle in handles {
        match handle.await.unwrap() {
            AdmissionOutcome::Admitted { .. } => admitted += 1,
            AdmissionOutcome::DayFull => full += 1,
            AdmissionOutcome::NotEligible => panic!("record admitted twice"),
        }
    }
    assert_eq!(admitted, 7);
    assert_eq!(full, 13);
    assert_eq!(store.get_capacity(day).await.unwrap().unwrap().count, 7);
}

#[tokio::test]
async fn test_postgres_parallel_schedulers_fill_days_in_order() {
    let Some(pg) = postgres_or_skip().await else {
        return;
    };
    let store = pg.store();
    grace_expired(&store, 25).await;

    let clock = Arc::new(ManualClock::new(DAY0 + Duration::hours(1)));
    let config = DeletionConfig {
        max_deletions_per_day: 10,
        ..DeletionConfig::default()
    };

    let mut handles = Vec::new();
    for _ in 0..3 {
        let scheduler = PermanentDeletionScheduler::new(
            store.clone(),
            clock.clone() as Arc<dyn Clock>,
            config.clone(),
        );
        handles.push(tokio::spawn(async move {
            scheduler.run_once(&CancellationToken::new()).await.unwrap()
        }));
    }
    let mut admitted = 0;
    for handle in handles {
        admitted += handle.await.unwrap().admitted;
    }
    assert_eq!(admitted, 25);

    let days = store
        .list_capacity(date!(2026 - 01 - 01), date!(2026 - 01 - 31))
        .await
        .unwrap();
    let counts: Vec<i64> = days.iter().map(|d| d.count).collect();
    assert_eq!(counts, vec![10, 10, 5]);
}
