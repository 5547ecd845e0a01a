use super::LifecycleContext;
use crate::error::{LifecycleError, LifecycleResult};
use crate::metrics;
use crate::ratelimit::RateLimiter;
use crate::tokens::IssuedToken;
use serde::Serialize;
use std::sync::Arc;
use sunset_core::events::DeletionRequestedEvent;
use sunset_core::{DeletionId, DeletionStatus, UserId};
use sunset_metadata::MetadataError;
use sunset_metadata::models::{AccountRow, DeletionRow};
use time::OffsetDateTime;

/// Outcome of a deletion request.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionReceipt {
    pub deletion_id: DeletionId,
    pub user_id: UserId,
    #[serde(with = "time::serde::rfc3339")]
    pub grace_expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub recovery_expires_at: OffsetDateTime,
}

/// Starts the deletion lifecycle for an account.
pub struct DeletionInitiator {
    ctx: LifecycleContext,
    recipient_limiter: Option<Arc<RateLimiter>>,
}

impl DeletionInitiator {
    pub fn new(ctx: LifecycleContext) -> Self {
        Self {
            ctx,
            recipient_limiter: None,
        }
    }

    /// Refuse [`resend_recovery`](Self::resend_recovery) when the recipient's
    /// email cap is already spent. The limiter is only read here; the
    /// notification consumer counts the send.
    #[must_use]
    pub fn with_recipient_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.recipient_limiter = Some(limiter);
        self
    }

    async fn load_account(&self, user_id: UserId) -> LifecycleResult<AccountRow> {
        self.ctx
            .accounts
            .get_account(*user_id.as_uuid())
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("account {user_id}")))
    }

    /// Soft-delete the account, issue a recovery token and schedule the
    /// record past the grace period.
    ///
    /// If any step after the soft delete fails the account is restored, so
    /// an account is never left hidden without a recovery path. A publish
    /// failure is returned but the deletion stands; the notification can be
    /// re-sent with [`resend_recovery`](Self::resend_recovery).
    pub async fn request_deletion(&self, user_id: UserId) -> LifecycleResult<DeletionReceipt> {
        let account = self.load_account(user_id).await?;
        let uid = *user_id.as_uuid();

        if self
            .ctx
            .deletions
            .get_active_deletion_for_user(uid)
            .await?
            .is_some()
        {
            return Err(LifecycleError::AlreadyPendingDeletion);
        }

        let now = self.ctx.clock.now();
        if !self.ctx.accounts.soft_delete_account(uid, now).await? {
            // Left over from an interrupted request with no record behind it.
            tracing::warn!(user_id = %user_id, "Account already soft-deleted without a pending deletion");
        }

        let issued = match self.ctx.tokens.generate(user_id).await {
            Ok(issued) => issued,
            Err(e) => {
                self.restore_after_failure(user_id).await;
                return Err(e.into());
            }
        };

        let deletion_id = DeletionId::new();
        let grace_expires_at = now + self.ctx.deletion.grace_period();
        let record = DeletionRow {
            deletion_id: *deletion_id.as_uuid(),
            user_id: uid,
            status: DeletionStatus::Scheduled.as_str().to_string(),
            requested_at: now,
            grace_expires_at,
            scheduled_date: None,
            recovery_token_hash: Some(issued.token_hash.clone()),
            recovery_token_expires_at: Some(issued.expires_at),
            cancelled_at: None,
            executed_at: None,
            updated_at: now,
            execution_attempts: 0,
        };

        if let Err(e) = self.ctx.deletions.create_deletion(&record).await {
            self.discard_token(&issued).await;
            return Err(match e {
                // A concurrent request won; its record owns the soft delete.
                MetadataError::AlreadyExists(_) => LifecycleError::AlreadyPendingDeletion,
                other => {
                    self.restore_after_failure(user_id).await;
                    LifecycleError::TransientStore(other)
                }
            });
        }

        metrics::DELETIONS_REQUESTED.inc();
        tracing::info!(
            user_id = %user_id,
            deletion_id = %deletion_id,
            grace_expires_at = %grace_expires_at,
            "Account deletion requested"
        );

        self.publish_requested(&account, deletion_id, &issued, now)
            .await?;

        Ok(DeletionReceipt {
            deletion_id,
            user_id,
            grace_expires_at,
            recovery_expires_at: issued.expires_at,
        })
    }

    /// Issue a new recovery token for a pending deletion and notify the user
    /// again. Earlier recovery tokens stop working.
    pub async fn resend_recovery(&self, user_id: UserId) -> LifecycleResult<DeletionReceipt> {
        let account = self.load_account(user_id).await?;
        let record = self
            .ctx
            .deletions
            .get_active_deletion_for_user(*user_id.as_uuid())
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("pending deletion for {user_id}")))?;

        if let Some(limiter) = &self.recipient_limiter
            && !limiter.allowed(&account.email).await?
        {
            return Err(LifecycleError::RateLimitExceeded(limiter.name().to_string()));
        }

        self.ctx.tokens.revoke_all(user_id).await?;
        let issued = self.ctx.tokens.generate(user_id).await?;

        let now = self.ctx.clock.now();
        let rebound = self
            .ctx
            .deletions
            .replace_recovery_token(record.deletion_id, &issued.token_hash, issued.expires_at, now)
            .await;
        match rebound {
            Ok(true) => {}
            Ok(false) => {
                self.discard_token(&issued).await;
                return Err(LifecycleError::NotFound(format!(
                    "pending deletion for {user_id}"
                )));
            }
            Err(e) => {
                self.discard_token(&issued).await;
                return Err(e.into());
            }
        }

        let deletion_id = DeletionId::from(record.deletion_id);
        tracing::info!(
            user_id = %user_id,
            deletion_id = %deletion_id,
            recovery_expires_at = %issued.expires_at,
            "Recovery token reissued"
        );

        self.publish_requested(&account, deletion_id, &issued, now)
            .await?;

        Ok(DeletionReceipt {
            deletion_id,
            user_id,
            grace_expires_at: record.grace_expires_at,
            recovery_expires_at: issued.expires_at,
        })
    }

    async fn publish_requested(
        &self,
        account: &AccountRow,
        deletion_id: DeletionId,
        issued: &IssuedToken,
        now: OffsetDateTime,
    ) -> LifecycleResult<()> {
        let event = DeletionRequestedEvent {
            user_id: UserId::from(account.user_id),
            deletion_id,
            email: account.email.clone(),
            name: account.display_name.clone(),
            recovery_token: issued.secret.expose().to_string(),
            recovery_expires_at: issued.expires_at,
            timestamp: now,
            app_url: self.ctx.notifications.app_url.clone(),
        };
        self.ctx.bus.publish(&event).await?;
        Ok(())
    }

    async fn restore_after_failure(&self, user_id: UserId) {
        let now = self.ctx.clock.now();
        if let Err(e) = self.ctx.accounts.restore_account(*user_id.as_uuid(), now).await {
            tracing::error!(
                user_id = %user_id,
                error = %e,
                "Failed to restore account after aborted deletion request"
            );
        }
    }

    async fn discard_token(&self, issued: &IssuedToken) {
        if let Err(e) = self.ctx.tokens.verify(&issued.secret).await {
            tracing::warn!(error = %e, "Failed to discard unused recovery token");
        }
    }
}
