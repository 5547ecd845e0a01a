//! Account repository.

use crate::error::MetadataResult;
use crate::models::AccountRow;
use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

/// Repository for account operations.
#[async_trait]
pub trait AccountRepo: Send + Sync {
    /// Create an account.
    async fn create_account(&self, account: &AccountRow) -> MetadataResult<()>;

    /// Get an account by ID, including soft-deleted accounts.
    async fn get_account(&self, user_id: Uuid) -> MetadataResult<Option<AccountRow>>;

    /// Set the soft-delete flag.
    /// Returns false if the account does not exist or is already soft-deleted.
    async fn soft_delete_account(&self, user_id: Uuid, at: OffsetDateTime)
    -> MetadataResult<bool>;

    /// Clear the soft-delete flag.
    /// Returns false only if the account does not exist.
    async fn restore_account(&self, user_id: Uuid, at: OffsetDateTime) -> MetadataResult<bool>;

    /// Irreversibly erase the account and every one-time token issued to it.
    ///
    /// Erasing an account that is already gone is a successful no-op.
    /// Returns whether an account row was removed.
    async fn hard_delete_account(&self, user_id: Uuid) -> MetadataResult<bool>;
}
