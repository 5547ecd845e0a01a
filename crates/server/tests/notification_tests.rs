//! Notification consumers driven through the event bus.

mod common;

use common::{Harness, TestMetadata};
use std::time::Duration;
use sunset_core::config::AppConfig;
use sunset_core::events::{AccountRecoveredEvent, DeletionExecutedEvent};
use sunset_core::{Clock, DeletionId, UserId};
use sunset_server::notifications::{
    TEMPLATE_ACCOUNT_RECOVERED, TEMPLATE_DELETION_EXECUTED, TEMPLATE_DELETION_REQUESTED,
};
use tokio_util::sync::CancellationToken;

async fn started(config: AppConfig) -> (TestMetadata, Harness, CancellationToken) {
    let metadata = TestMetadata::in_memory().await.unwrap();
    let h = Harness::with_config(metadata.store(), config);
    let shutdown = CancellationToken::new();
    h.state.start_consumers(shutdown.clone()).await.unwrap();
    (metadata, h, shutdown)
}

fn executed_event(h: &Harness, email: &str) -> DeletionExecutedEvent {
    DeletionExecutedEvent {
        user_id: UserId::new(),
        deletion_id: DeletionId::new(),
        email: email.to_string(),
        name: "Gone".to_string(),
        timestamp: h.clock.now(),
    }
}

/// Give the consumers a moment to drain anything still in flight.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_deletion_request_sends_recovery_email() {
    let (_m, h, shutdown) = started(AppConfig::for_testing()).await;
    let (user, email) = h.account("notify").await;

    h.state.initiator.request_deletion(user).await.unwrap();
    let sent = h.dispatch.wait_for(1).await;

    assert_eq!(sent[0].recipient, email);
    assert_eq!(sent[0].template, TEMPLATE_DELETION_REQUESTED);
    assert_eq!(sent[0].subject, "Account Deletion Confirmation and Recovery");
    let link = sent[0].data["recoveryURL"].as_str().unwrap();
    assert!(link.starts_with("http://localhost:3000/recover-account?token="));

    shutdown.cancel();
}

#[tokio::test]
async fn test_dispatched_emails_land_in_send_ledger() {
    let (_m, h, shutdown) = started(AppConfig::for_testing()).await;
    let (user, email) = h.account("ledger").await;

    h.state.initiator.request_deletion(user).await.unwrap();
    h.dispatch.wait_for(1).await;
    settle().await;

    let rows = h.store.list_email_sends(&email, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].template, TEMPLATE_DELETION_REQUESTED);
    assert_eq!(rows[0].status, "sent");
    assert_eq!(rows[0].subject, "Account Deletion Confirmation and Recovery");

    shutdown.cancel();
}

#[tokio::test]
async fn test_recovery_sends_confirmation() {
    let (_m, h, shutdown) = started(AppConfig::for_testing()).await;
    let (user, email) = h.account("confirm").await;

    h.state.initiator.request_deletion(user).await.unwrap();
    let sent = h.dispatch.wait_for(1).await;
    let link = sent[0].data["recoveryURL"].as_str().unwrap();
    let token = link.split("token=").nth(1).unwrap();

    h.state.recovery.recover(token).await.unwrap();
    let sent = h.dispatch.wait_for(2).await;
    assert_eq!(sent[1].recipient, email);
    assert_eq!(sent[1].template, TEMPLATE_ACCOUNT_RECOVERED);

    shutdown.cancel();
}

#[tokio::test]
async fn test_duplicate_deliveries_capped_per_recipient() {
    let (_m, h, shutdown) = started(AppConfig::for_testing()).await;
    let event = AccountRecoveredEvent {
        user_id: UserId::new(),
        deletion_id: DeletionId::new(),
        email: "dupe@example.com".to_string(),
        name: "Dupe".to_string(),
        timestamp: h.clock.now(),
        app_url: "http://localhost:3000".to_string(),
    };

    for _ in 0..3 {
        h.state.bus.publish(&event).await.unwrap();
    }
    h.dispatch.wait_for(2).await;
    settle().await;
    assert_eq!(h.dispatch.sent_to("dupe@example.com").len(), 2);

    shutdown.cancel();
}

#[tokio::test]
async fn test_deletion_notices_capped_globally() {
    let mut config = AppConfig::for_testing();
    config.rate_limit.max_deletion_notices_per_day = 2;
    let (_m, h, shutdown) = started(config).await;

    for i in 0..4 {
        let event = executed_event(&h, &format!("gone{i}@example.com"));
        h.state.bus.publish(&event).await.unwrap();
    }
    let sent = h.dispatch.wait_for(2).await;
    settle().await;
    assert_eq!(h.dispatch.sent().len(), 2);
    assert!(sent.iter().all(|e| e.template == TEMPLATE_DELETION_EXECUTED));

    // The cap is per UTC day.
    h.clock.advance(time::Duration::days(1));
    h.state
        .bus
        .publish(&executed_event(&h, "tomorrow@example.com"))
        .await
        .unwrap();
    h.dispatch.wait_for(3).await;

    shutdown.cancel();
}

#[tokio::test]
async fn test_disabled_rate_limit_sends_everything() {
    let mut config = AppConfig::for_testing();
    config.rate_limit.enabled = false;
    config.rate_limit.max_deletion_notices_per_day = 1;
    let (_m, h, shutdown) = started(config).await;

    for _ in 0..3 {
        h.state
            .bus
            .publish(&executed_event(&h, "all@example.com"))
            .await
            .unwrap();
    }
    h.dispatch.wait_for(3).await;

    shutdown.cancel();
}

#[tokio::test]
async fn test_executor_emits_permanent_deletion_notice() {
    let (_m, h, shutdown) = started(AppConfig::for_testing()).await;
    let (user, email) = h.account("final").await;
    h.state.initiator.request_deletion(user).await.unwrap();
    h.dispatch.wait_for(1).await;

    h.clock.advance(time::Duration::days(90));
    h.state
        .scheduler
        .run_once(&CancellationToken::new())
        .await
        .unwrap();
    h.state
        .executor
        .run_once(&CancellationToken::new())
        .await
        .unwrap();

    let sent = h.dispatch.wait_for(2).await;
    assert_eq!(sent[1].recipient, email);
    assert_eq!(sent[1].template, TEMPLATE_DELETION_EXECUTED);

    shutdown.cancel();
}
