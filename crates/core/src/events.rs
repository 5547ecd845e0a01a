//! Lifecycle events published on the event bus.
//!
//! Payloads are JSON with camelCase keys. Every payload carries the user id,
//! the destination email and an RFC 3339 timestamp.

use crate::account::UserId;
use crate::deletion::DeletionId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Subject for deletion-requested events.
pub const SUBJECT_DELETION_REQUESTED: &str = "account.deletion.requested";

/// Subject for account-recovered events.
pub const SUBJECT_DELETION_RECOVERED: &str = "account.deletion.recovered";

/// Subject for permanent-deletion events.
pub const SUBJECT_DELETION_EXECUTED: &str = "account.deletion.executed";

/// A payload bound to a fixed bus subject.
pub trait LifecycleEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Subject this event is published on.
    const SUBJECT: &'static str;
}

/// Emitted after an account is soft-deleted and a recovery token issued.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionRequestedEvent {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "deletionID")]
    pub deletion_id: DeletionId,
    pub email: String,
    pub name: String,
    pub recovery_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub recovery_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "appURL")]
    pub app_url: String,
}

impl LifecycleEvent for DeletionRequestedEvent {
    const SUBJECT: &'static str = SUBJECT_DELETION_REQUESTED;
}

impl fmt::Debug for DeletionRequestedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionRequestedEvent")
            .field("user_id", &self.user_id)
            .field("deletion_id", &self.deletion_id)
            .field("email", &self.email)
            .field("recovery_token", &"<redacted>")
            .field("recovery_expires_at", &self.recovery_expires_at)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

/// Emitted after a user recovers their account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecoveredEvent {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "deletionID")]
    pub deletion_id: DeletionId,
    pub email: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(rename = "appURL")]
    pub app_url: String,
}

impl LifecycleEvent for AccountRecoveredEvent {
    const SUBJECT: &'static str = SUBJECT_DELETION_RECOVERED;
}

/// Emitted after an account's data has been permanently erased.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionExecutedEvent {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    #[serde(rename = "deletionID")]
    pub deletion_id: DeletionId,
    pub email: String,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl LifecycleEvent for DeletionExecutedEvent {
    const SUBJECT: &'static str = SUBJECT_DELETION_EXECUTED;
}
