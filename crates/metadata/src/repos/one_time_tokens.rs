//! One-time token repository.

use crate::error::MetadataResult;
use crate::models::OneTimeTokenRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for hashed single-use tokens.
#[async_trait]
pub trait OneTimeTokenRepo: Send + Sync {
    /// Store a token.
    async fn create_one_time_token(&self, token: &OneTimeTokenRow) -> MetadataResult<()>;

    /// Look up an unexpired token without consuming it.
    async fn peek_one_time_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<Option<OneTimeTokenRow>>;

    /// Atomically delete and return an unexpired token.
    ///
    /// Of two concurrent callers, at most one receives the row.
    async fn consume_one_time_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> MetadataResult<Option<OneTimeTokenRow>>;

    /// Revoke every token of `purpose` issued to `subject_id`.
    async fn delete_one_time_tokens_for_subject(
        &self,
        subject_id: Uuid,
        purpose: &str,
    ) -> MetadataResult<u64>;

    /// Delete tokens that expired before `now`.
    async fn purge_expired_one_time_tokens(&self, now: OffsetDateTime) -> MetadataResult<u64>;
}
