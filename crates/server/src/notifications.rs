//! Notification consumers.
//!
//! Each lifecycle event is turned into one outbound email. Every send passes
//! its rate-limit gates first: all gates are checked, then all are
//! incremented, then the email is dispatched. Rate limiting also absorbs
//! duplicate bus deliveries, so the consumers keep no delivery state.
//!
//! Every dispatched email, sent or failed, is appended to the metadata
//! store's send ledger. Refused sends are not recorded.

use crate::bus::{BusError, EventBus, EventHandler, HandlerError};
use crate::metrics;
use crate::ratelimit::RateLimiter;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use sunset_core::config::NotificationConfig;
use sunset_core::events::{AccountRecoveredEvent, DeletionExecutedEvent, DeletionRequestedEvent};
use sunset_core::Clock;
use sunset_metadata::MetadataError;
use sunset_metadata::models::EmailSendRow;
use sunset_metadata::repos::EmailSendRepo;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const TEMPLATE_DELETION_REQUESTED: &str = "account_deletion_requested";
pub const TEMPLATE_ACCOUNT_RECOVERED: &str = "account_recovered";
pub const TEMPLATE_DELETION_EXECUTED: &str = "account_deletion_executed";

/// Scope used by the system-wide deletion notice cap.
pub const GLOBAL_SCOPE: &str = "global";

/// One email handed to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEmail {
    pub recipient: String,
    pub template: &'static str,
    pub subject: String,
    pub data: serde_json::Value,
}

/// Notification errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("rate limit store error: {0}")]
    Store(#[from] MetadataError),
}

/// Outbound email sink. Rendering and SMTP live behind this trait.
#[async_trait]
pub trait EmailDispatch: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError>;
}

/// Dispatcher that only logs. Used when no mail transport is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatch;

#[async_trait]
impl EmailDispatch for LogDispatch {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %email.recipient,
            template = email.template,
            subject = %email.subject,
            "Email dispatched"
        );
        Ok(())
    }
}

/// A rate-limit gate applied to a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Per-recipient daily cap, scoped by the recipient address.
    Recipient,
    /// System-wide daily cap on permanent-deletion notices.
    DeletionNotice,
}

/// Result of a gated send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Refused by the named limiter. Nothing was counted or sent.
    RateLimited(String),
}

/// Rate-limited email sender shared by the consumers.
pub struct Notifier {
    dispatch: Arc<dyn EmailDispatch>,
    ledger: Arc<dyn EmailSendRepo>,
    clock: Arc<dyn Clock>,
    recipient_limiter: Arc<RateLimiter>,
    notice_limiter: Arc<RateLimiter>,
}

impl Notifier {
    pub fn new(
        dispatch: Arc<dyn EmailDispatch>,
        ledger: Arc<dyn EmailSendRepo>,
        clock: Arc<dyn Clock>,
        recipient_limiter: Arc<RateLimiter>,
        notice_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            dispatch,
            ledger,
            clock,
            recipient_limiter,
            notice_limiter,
        }
    }

    fn limiter(&self, gate: Gate) -> &RateLimiter {
        match gate {
            Gate::Recipient => &self.recipient_limiter,
            Gate::DeletionNotice => &self.notice_limiter,
        }
    }

    fn scope<'a>(gate: Gate, email: &'a OutboundEmail) -> &'a str {
        match gate {
            Gate::Recipient => &email.recipient,
            Gate::DeletionNotice => GLOBAL_SCOPE,
        }
    }

    /// Send `email` if every gate allows it.
    pub async fn send(
        &self,
        email: &OutboundEmail,
        gates: &[Gate],
    ) -> Result<SendOutcome, NotifyError> {
        for &gate in gates {
            let limiter = self.limiter(gate);
            if !limiter.allowed(Self::scope(gate, email)).await? {
                metrics::record_notification(email.template, "rate_limited");
                tracing::warn!(
                    template = email.template,
                    limiter = limiter.name(),
                    limit = limiter.limit(),
                    "Notification suppressed by rate limit"
                );
                return Ok(SendOutcome::RateLimited(limiter.name().to_string()));
            }
        }

        for &gate in gates {
            self.limiter(gate)
                .increment(Self::scope(gate, email))
                .await?;
        }

        if let Err(e) = self.dispatch.send(email).await {
            metrics::record_notification(email.template, "failed");
            self.record(email, Err(&e)).await;
            return Err(e);
        }
        metrics::record_notification(email.template, "sent");
        self.record(email, Ok(())).await;
        Ok(SendOutcome::Sent)
    }

    /// Append the dispatch result to the send ledger. A ledger failure is
    /// logged and does not change the outcome of the send.
    async fn record(&self, email: &OutboundEmail, result: Result<(), &NotifyError>) {
        let (status, error_message) = match result {
            Ok(()) => ("sent", None),
            Err(e) => ("failed", Some(e.to_string())),
        };
        let row = EmailSendRow {
            send_id: Uuid::new_v4(),
            recipient: email.recipient.clone(),
            subject: email.subject.clone(),
            template: email.template.to_string(),
            status: status.to_string(),
            error_message,
            sent_at: self.clock.now(),
        };
        if let Err(e) = self.ledger.record_email_send(&row).await {
            tracing::warn!(
                template = email.template,
                status,
                error = %e,
                "Failed to record email send"
            );
        }
    }
}

fn handler_error(e: NotifyError) -> HandlerError {
    HandlerError::Retry(e.to_string())
}

/// Sends the deletion confirmation with the recovery link.
pub struct DeletionRequestedConsumer {
    notifier: Arc<Notifier>,
    config: NotificationConfig,
}

impl DeletionRequestedConsumer {
    pub fn new(notifier: Arc<Notifier>, config: NotificationConfig) -> Self {
        Self { notifier, config }
    }

    fn email(&self, event: &DeletionRequestedEvent) -> OutboundEmail {
        let recovery_url = self.config.recovery_link(&event.recovery_token);
        OutboundEmail {
            recipient: event.email.clone(),
            template: TEMPLATE_DELETION_REQUESTED,
            subject: "Account Deletion Confirmation and Recovery".to_string(),
            data: json!({
                "name": event.name,
                "recoveryURL": recovery_url,
                "recoveryExpiresAt": event.recovery_expires_at.to_string(),
                "appURL": event.app_url,
            }),
        }
    }
}

#[async_trait]
impl EventHandler<DeletionRequestedEvent> for DeletionRequestedConsumer {
    fn name(&self) -> &'static str {
        "deletion_requested_email"
    }

    async fn handle(&self, event: &DeletionRequestedEvent) -> Result<(), HandlerError> {
        self.notifier
            .send(&self.email(event), &[Gate::Recipient])
            .await
            .map(|_| ())
            .map_err(handler_error)
    }
}

/// Confirms a successful recovery.
pub struct AccountRecoveredConsumer {
    notifier: Arc<Notifier>,
}

impl AccountRecoveredConsumer {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler<AccountRecoveredEvent> for AccountRecoveredConsumer {
    fn name(&self) -> &'static str {
        "account_recovered_email"
    }

    async fn handle(&self, event: &AccountRecoveredEvent) -> Result<(), HandlerError> {
        let email = OutboundEmail {
            recipient: event.email.clone(),
            template: TEMPLATE_ACCOUNT_RECOVERED,
            subject: "Your Account Has Been Recovered".to_string(),
            data: json!({
                "name": event.name,
                "appURL": event.app_url,
            }),
        };
        self.notifier
            .send(&email, &[Gate::Recipient])
            .await
            .map(|_| ())
            .map_err(handler_error)
    }
}

/// Sends the permanent-deletion notice under the global daily cap.
pub struct DeletionExecutedConsumer {
    notifier: Arc<Notifier>,
}

impl DeletionExecutedConsumer {
    pub fn new(notifier: Arc<Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl EventHandler<DeletionExecutedEvent> for DeletionExecutedConsumer {
    fn name(&self) -> &'static str {
        "deletion_executed_email"
    }

    async fn handle(&self, event: &DeletionExecutedEvent) -> Result<(), HandlerError> {
        let email = OutboundEmail {
            recipient: event.email.clone(),
            template: TEMPLATE_DELETION_EXECUTED,
            subject: "Your Account Has Been Permanently Deleted".to_string(),
            data: json!({
                "name": event.name,
                "deletedAt": event.timestamp.to_string(),
            }),
        };
        self.notifier
            .send(&email, &[Gate::DeletionNotice, Gate::Recipient])
            .await
            .map(|_| ())
            .map_err(handler_error)
    }
}

/// Subscribe every notification consumer to the bus.
pub async fn register_consumers(
    bus: &EventBus,
    notifier: Arc<Notifier>,
    config: &NotificationConfig,
    shutdown: CancellationToken,
) -> Result<Vec<JoinHandle<()>>, BusError> {
    let requested = Arc::new(DeletionRequestedConsumer::new(
        notifier.clone(),
        config.clone(),
    ));
    let recovered = Arc::new(AccountRecoveredConsumer::new(notifier.clone()));
    let executed = Arc::new(DeletionExecutedConsumer::new(notifier));

    Ok(vec![
        bus.subscribe::<DeletionRequestedEvent, _>(requested, shutdown.clone())
            .await?,
        bus.subscribe::<AccountRecoveredEvent, _>(recovered, shutdown.clone())
            .await?,
        bus.subscribe::<DeletionExecutedEvent, _>(executed, shutdown)
            .await?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::InMemoryCounterStore;
    use std::sync::Mutex;
    use sunset_core::ManualClock;
    use sunset_metadata::SqliteStore;
    use time::macros::datetime;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<OutboundEmail>>,
    }

    #[async_trait]
    impl EmailDispatch for Recording {
        async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    struct Refusing;

    #[async_trait]
    impl EmailDispatch for Refusing {
        async fn send(&self, _email: &OutboundEmail) -> Result<(), NotifyError> {
            Err(NotifyError::Dispatch("relay refused".to_string()))
        }
    }

    async fn notifier_with(
        dispatch: Arc<dyn EmailDispatch>,
        per_recipient: u32,
        global: u32,
    ) -> (Notifier, Arc<SqliteStore>) {
        let clock = Arc::new(ManualClock::new(datetime!(2026-05-01 12:00 UTC)));
        let store = Arc::new(InMemoryCounterStore::new());
        let ledger = Arc::new(SqliteStore::in_memory().await.unwrap());
        let notifier = Notifier::new(
            dispatch,
            ledger.clone(),
            clock.clone(),
            Arc::new(RateLimiter::new("email", per_recipient, store.clone(), clock.clone())),
            Arc::new(RateLimiter::new("deletion_notice", global, store, clock)),
        );
        (notifier, ledger)
    }

    async fn notifier(per_recipient: u32, global: u32) -> (Notifier, Arc<Recording>) {
        let dispatch = Arc::new(Recording::default());
        let (notifier, _) = notifier_with(dispatch.clone(), per_recipient, global).await;
        (notifier, dispatch)
    }

    fn email(to: &str) -> OutboundEmail {
        OutboundEmail {
            recipient: to.to_string(),
            template: TEMPLATE_ACCOUNT_RECOVERED,
            subject: "s".to_string(),
            data: json!({}),
        }
    }

    #[tokio::test]
    async fn test_recipient_gate_caps_sends() {
        let (notifier, dispatch) = notifier(2, 100).await;
        let mut outcomes = Vec::new();
        for _ in 0..3 {
            outcomes.push(
                notifier
                    .send(&email("ada@example.com"), &[Gate::Recipient])
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(outcomes[0], SendOutcome::Sent);
        assert_eq!(outcomes[1], SendOutcome::Sent);
        assert_eq!(outcomes[2], SendOutcome::RateLimited("email".to_string()));
        assert_eq!(dispatch.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_refused_gate_counts_nothing() {
        let (notifier, dispatch) = notifier(5, 1).await;
        let gates = [Gate::DeletionNotice, Gate::Recipient];
        assert_eq!(
            notifier.send(&email("a@example.com"), &gates).await.unwrap(),
            SendOutcome::Sent
        );
        assert_eq!(
            notifier.send(&email("b@example.com"), &gates).await.unwrap(),
            SendOutcome::RateLimited("deletion_notice".to_string())
        );
        // b's recipient counter was never touched.
        assert!(notifier.recipient_limiter.allowed("b@example.com").await.unwrap());
        assert_eq!(dispatch.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_requested_email_carries_recovery_link() {
        let (notifier, dispatch) = notifier(2, 100).await;
        let consumer =
            DeletionRequestedConsumer::new(Arc::new(notifier), NotificationConfig::default());
        let event = DeletionRequestedEvent {
            user_id: sunset_core::UserId::new(),
            deletion_id: sunset_core::DeletionId::new(),
            email: "ada@example.com".to_string(),
            name: "Ada".to_string(),
            recovery_token: "abc123".to_string(),
            recovery_expires_at: datetime!(2026-05-02 12:00 UTC),
            timestamp: datetime!(2026-05-01 12:00 UTC),
            app_url: "http://localhost:3000".to_string(),
        };
        consumer.handle(&event).await.unwrap();

        let sent = dispatch.sent.lock().unwrap();
        assert_eq!(sent[0].subject, "Account Deletion Confirmation and Recovery");
        assert_eq!(
            sent[0].data["recoveryURL"],
            "http://localhost:3000/recover-account?token=abc123"
        );
    }

    #[tokio::test]
    async fn test_sends_are_recorded_with_outcome() {
        let (notifier, ledger) = notifier_with(Arc::new(Recording::default()), 1, 100).await;
        notifier
            .send(&email("ada@example.com"), &[Gate::Recipient])
            .await
            .unwrap();
        // Refused by the gate: not recorded.
        notifier
            .send(&email("ada@example.com"), &[Gate::Recipient])
            .await
            .unwrap();

        let rows = ledger.list_email_sends("ada@example.com", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "sent");
        assert_eq!(rows[0].template, TEMPLATE_ACCOUNT_RECOVERED);
        assert_eq!(rows[0].error_message, None);
        assert_eq!(rows[0].sent_at, datetime!(2026-05-01 12:00 UTC));
    }

    #[tokio::test]
    async fn test_failed_dispatch_is_recorded() {
        let (notifier, ledger) = notifier_with(Arc::new(Refusing), 5, 100).await;
        let err = notifier
            .send(&email("ada@example.com"), &[Gate::Recipient])
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Dispatch(_)));

        let rows = ledger.list_email_sends("ada@example.com", 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "failed");
        assert_eq!(
            rows[0].error_message.as_deref(),
            Some("dispatch failed: relay refused")
        );
    }
}
