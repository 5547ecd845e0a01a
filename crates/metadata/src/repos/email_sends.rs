//! Email send ledger repository.

use crate::error::MetadataResult;
use crate::models::EmailSendRow;
use async_trait::async_trait;

/// Repository for the record of attempted notification emails.
#[async_trait]
pub trait EmailSendRepo: Send + Sync {
    /// Append one send attempt.
    async fn record_email_send(&self, send: &EmailSendRow) -> MetadataResult<()>;

    /// Attempts addressed to `recipient`, newest first.
    async fn list_email_sends(&self, recipient: &str, limit: i64)
    -> MetadataResult<Vec<EmailSendRow>>;
}
