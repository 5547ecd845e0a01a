//! Fault-injecting collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sunset_metadata::models::DeletionRow;
use sunset_metadata::repos::{AdmissionOutcome, DeletionRepo, RecoveryOutcome};
use sunset_metadata::{MetadataError, MetadataResult};
use sunset_server::bus::{LocalTransport, Transport, TransportError};
use sunset_server::notifications::{EmailDispatch, NotifyError, OutboundEmail};
use time::{Date, OffsetDateTime};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

/// Records every email instead of sending it.
#[derive(Default)]
pub struct RecordingDispatch {
    sent: Mutex<Vec<OutboundEmail>>,
}

#[allow(dead_code)]
impl RecordingDispatch {
    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent.lock().unwrap().clone()
    }

    /// Emails sent to `recipient`.
    pub fn sent_to(&self, recipient: &str) -> Vec<OutboundEmail> {
        self.sent()
            .into_iter()
            .filter(|e| e.recipient == recipient)
            .collect()
    }

    /// Wait until at least `n` emails were sent, or panic after a few seconds.
    pub async fn wait_for(&self, n: usize) -> Vec<OutboundEmail> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let sent = self.sent();
            if sent.len() >= n {
                return sent;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("expected {n} emails, got {}", sent.len());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[async_trait]
impl EmailDispatch for RecordingDispatch {
    async fn send(&self, email: &OutboundEmail) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

/// Local transport whose first `failures` publishes fail.
pub struct FlakyTransport {
    inner: LocalTransport,
    failures: AtomicU32,
    pub attempts: AtomicU32,
}

#[allow(dead_code)]
impl FlakyTransport {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: LocalTransport::new(64),
            failures: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Unavailable("broker down".to_string()));
        }
        self.inner.publish(subject, payload).await
    }

    async fn subscribe(&self, subject: &str) -> Result<mpsc::Receiver<Bytes>, TransportError> {
        self.inner.subscribe(subject).await
    }
}

/// Deletion repository with injectable faults.
pub struct FaultyDeletions {
    inner: Arc<dyn DeletionRepo>,
    reject_creates: AtomicBool,
    fail_execute: Mutex<HashSet<Uuid>>,
    hold_execute: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

#[allow(dead_code)]
impl FaultyDeletions {
    pub fn new(inner: Arc<dyn DeletionRepo>) -> Self {
        Self {
            inner,
            reject_creates: AtomicBool::new(false),
            fail_execute: Mutex::new(HashSet::new()),
            hold_execute: Mutex::new(None),
        }
    }

    /// Every `create_deletion` fails.
    pub fn reject_creates(self) -> Self {
        self.reject_creates.store(true, Ordering::SeqCst);
        self
    }

    /// `execute_deletion` fails for this record until [`heal`](Self::heal).
    pub fn fail_execute_for(&self, deletion_id: Uuid) {
        self.fail_execute.lock().unwrap().insert(deletion_id);
    }

    pub fn heal(&self) {
        self.fail_execute.lock().unwrap().clear();
    }

    /// Park the next `execute_deletion` before it reaches the store.
    ///
    /// Returns `(reached, release)`: `reached` fires once the call is parked,
    /// and the call proceeds after `release` is notified.
    pub fn hold_next_execute(&self) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.hold_execute.lock().unwrap() = Some((reached.clone(), release.clone()));
        (reached, release)
    }
}

#[async_trait]
impl DeletionRepo for FaultyDeletions {
    async fn create_deletion(&self, deletion: &DeletionRow) -> MetadataResult<()> {
        if self.reject_creates.load(Ordering::SeqCst) {
            return Err(MetadataError::Internal("write rejected".to_string()));
        }
        self.inner.create_deletion(deletion).await
    }

    async fn get_deletion(&self, deletion_id: Uuid) -> MetadataResult<Option<DeletionRow>> {
        self.inner.get_deletion(deletion_id).await
    }

    async fn get_active_deletion_for_user(
        &self,
        user_id: Uuid,
    ) -> MetadataResult<Option<DeletionRow>> {
        self.inner.get_active_deletion_for_user(user_id).await
    }

    async fn get_grace_expired_deletions(
        &self,
        now: OffsetDateTime,
        limit: i64,
    ) -> MetadataResult<Vec<DeletionRow>> {
        self.inner.get_grace_expired_deletions(now, limit).await
    }

    async fn get_due_deletions(&self, today: Date, limit: i64) -> MetadataResult<Vec<DeletionRow>> {
        self.inner.get_due_deletions(today, limit).await
    }

    async fn admit_deletion(
        &self,
        deletion_id: Uuid,
        day: Date,
        max_limit: i64,
        now: OffsetDateTime,
    ) -> MetadataResult<AdmissionOutcome> {
        self.inner
            .admit_deletion(deletion_id, day, max_limit, now)
            .await
    }

    async fn cancel_deletion(&self, deletion_id: Uuid, now: OffsetDateTime) -> MetadataResult<bool> {
        self.inner.cancel_deletion(deletion_id, now).await
    }

    async fn execute_deletion(
        &self,
        deletion_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        let hold = self.hold_execute.lock().unwrap().take();
        if let Some((reached, release)) = hold {
            reached.notify_one();
            release.notified().await;
        }
        if self.fail_execute.lock().unwrap().contains(&deletion_id) {
            return Err(MetadataError::Internal("disk on fire".to_string()));
        }
        self.inner.execute_deletion(deletion_id, now).await
    }

    async fn recover_deletion(
        &self,
        deletion_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<RecoveryOutcome> {
        self.inner.recover_deletion(deletion_id, now).await
    }

    async fn record_execution_failure(
        &self,
        deletion_id: Uuid,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        self.inner.record_execution_failure(deletion_id, now).await
    }

    async fn replace_recovery_token(
        &self,
        deletion_id: Uuid,
        token_hash: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> MetadataResult<bool> {
        self.inner
            .replace_recovery_token(deletion_id, token_hash, expires_at, now)
            .await
    }
}
