//! Event bus for lifecycle events.
//!
//! Publishing serialises the event once and retries the transport under a
//! fixed-backoff [`RetryPolicy`]. Subscriptions run as independent tasks; a
//! handler that fails with [`HandlerError::Retry`] is invoked again under the
//! delivery policy. Delivery is at-least-once: a publish retried after a
//! partial failure can reach a handler twice, so handlers must tolerate
//! duplicates.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use sunset_core::events::LifecycleEvent;
use sunset_core::{RetryExhausted, RetryPolicy};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("subscriber backlog full on {0}")]
    Backpressure(String),
}

/// Bus-level publish failures.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to encode {subject} event: {source}")]
    Encode {
        subject: &'static str,
        source: serde_json::Error,
    },

    #[error("failed to publish {subject}: {source}")]
    Exhausted {
        subject: &'static str,
        source: RetryExhausted<TransportError>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Message transport. Subjects are opaque strings; payloads are JSON bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Hand a payload to every current subscriber of `subject`.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError>;

    /// Open a subscription to `subject`.
    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<Bytes>, TransportError>;
}

/// In-process transport built on bounded channels.
pub struct LocalTransport {
    subscribers: DashMap<String, Vec<mpsc::Sender<Bytes>>>,
    capacity: usize,
}

impl LocalTransport {
    /// Create a transport buffering `capacity` messages per subscription.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Live subscriptions on `subject`.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.subscribers
            .get(subject)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        let Some(mut subs) = self.subscribers.get_mut(subject) else {
            return Ok(());
        };
        subs.retain(|tx| !tx.is_closed());

        let mut full = false;
        for tx in subs.iter() {
            match tx.try_send(payload.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => full = true,
                // Closed between retain and send; dropped on the next publish.
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        if full {
            return Err(TransportError::Backpressure(subject.to_string()));
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<Bytes>, TransportError> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        Ok(rx)
    }
}

/// Handler failure, deciding whether the message is redelivered.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Transient failure. Redeliver under the delivery policy.
    #[error("retryable: {0}")]
    Retry(String),

    /// Permanent failure. Log and drop the message.
    #[error("dropped: {0}")]
    Drop(String),
}

/// Subscriber for one event type.
#[async_trait]
pub trait EventHandler<E: LifecycleEvent>: Send + Sync {
    /// Handler name for logs.
    fn name(&self) -> &'static str;

    /// Process one delivery.
    async fn handle(&self, event: &E) -> Result<(), HandlerError>;
}

/// Typed publish/subscribe over a [`Transport`].
#[derive(Clone)]
pub struct EventBus {
    transport: Arc<dyn Transport>,
    publish_policy: RetryPolicy,
    delivery_policy: RetryPolicy,
}

impl EventBus {
    pub fn new(
        transport: Arc<dyn Transport>,
        publish_policy: RetryPolicy,
        delivery_policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            publish_policy,
            delivery_policy,
        }
    }

    /// Publish `event` on its subject, retrying transport failures.
    pub async fn publish<E: LifecycleEvent>(&self, event: &E) -> Result<(), BusError> {
        let subject = E::SUBJECT;
        let payload = serde_json::to_vec(event)
            .map(Bytes::from)
            .map_err(|source| BusError::Encode { subject, source })?;

        let transport = &self.transport;
        let result = self
            .publish_policy
            .run("event_publish", |attempt| {
                if attempt > 1 {
                    crate::metrics::EVENT_PUBLISH_RETRIES
                        .with_label_values(&[subject])
                        .inc();
                }
                let payload = payload.clone();
                async move { transport.publish(subject, payload).await }
            })
            .await;

        match result {
            Ok(()) => {
                crate::metrics::EVENTS_PUBLISHED
                    .with_label_values(&[subject])
                    .inc();
                tracing::debug!(subject = subject, "Event published");
                Ok(())
            }
            Err(exhausted) => {
                crate::metrics::EVENT_PUBLISH_FAILURES
                    .with_label_values(&[subject])
                    .inc();
                tracing::error!(
                    subject = subject,
                    attempts = exhausted.attempts,
                    error = %exhausted.last,
                    "Event publish failed after retries"
                );
                Err(BusError::Exhausted {
                    subject,
                    source: exhausted,
                })
            }
        }
    }

    /// Subscribe `handler` to `E`'s subject.
    ///
    /// The returned task runs until `shutdown` fires or the transport closes
    /// the subscription.
    pub async fn subscribe<E, H>(
        &self,
        handler: Arc<H>,
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>, BusError>
    where
        E: LifecycleEvent,
        H: EventHandler<E> + ?Sized + 'static,
    {
        let mut rx = self.transport.subscribe(E::SUBJECT).await?;
        let delivery = Delivery::<E, H> {
            handler,
            policy: self.delivery_policy,
            _event: PhantomData,
        };

        tracing::info!(
            subject = E::SUBJECT,
            handler = delivery.handler.name(),
            "Subscribed event handler"
        );

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(payload) => delivery.deliver(&payload).await,
                        None => break,
                    },
                }
            }
            tracing::debug!(subject = E::SUBJECT, "Event subscription stopped");
        }))
    }
}

struct Delivery<E, H: ?Sized> {
    handler: Arc<H>,
    policy: RetryPolicy,
    _event: PhantomData<fn() -> E>,
}

impl<E, H> Delivery<E, H>
where
    E: LifecycleEvent,
    H: EventHandler<E> + ?Sized,
{
    async fn deliver(&self, payload: &[u8]) {
        let event: E = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                // Undecodable payloads can never succeed.
                tracing::error!(
                    subject = E::SUBJECT,
                    error = %e,
                    "Dropping undecodable event payload"
                );
                return;
            }
        };

        let handler = &self.handler;
        let event = &event;
        let result = self
            .policy
            .run_if(
                handler.name(),
                |_| async move { handler.handle(event).await },
                |e| matches!(e, HandlerError::Retry(_)),
            )
            .await;

        if let Err(exhausted) = result {
            crate::metrics::EVENT_HANDLER_FAILURES
                .with_label_values(&[E::SUBJECT])
                .inc();
            tracing::error!(
                subject = E::SUBJECT,
                handler = handler.name(),
                attempts = exhausted.attempts,
                error = %exhausted.last,
                "Event handler gave up"
            );
        }
    }
}
