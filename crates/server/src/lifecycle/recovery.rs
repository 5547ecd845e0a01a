use super::LifecycleContext;
use crate::error::{LifecycleError, LifecycleResult};
use crate::metrics;
use serde::Serialize;
use sunset_core::events::AccountRecoveredEvent;
use sunset_core::{DeletionId, TokenSecret, UserId};
use sunset_metadata::repos::RecoveryOutcome;
use time::OffsetDateTime;

/// Outcome of a successful recovery.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryReceipt {
    pub user_id: UserId,
    pub deletion_id: DeletionId,
    #[serde(with = "time::serde::rfc3339")]
    pub recovered_at: OffsetDateTime,
}

/// Reverses a pending deletion for the holder of a valid recovery token.
pub struct RecoveryHandler {
    ctx: LifecycleContext,
}

impl RecoveryHandler {
    pub fn new(ctx: LifecycleContext) -> Self {
        Self { ctx }
    }

    /// Redeem `token`: cancel the deletion and restore the account.
    ///
    /// The token is consumed only after the record is cancelled, so a store
    /// failure part-way leaves it usable for a retry. A cancelled record can
    /// never be recovered twice.
    pub async fn recover(&self, token: &str) -> LifecycleResult<RecoveryReceipt> {
        let secret =
            TokenSecret::from_client(token).map_err(|_| LifecycleError::InvalidOrExpiredToken)?;
        let grant = self.ctx.tokens.peek(&secret).await?;
        let user_id = grant.subject;
        let uid = *user_id.as_uuid();

        let Some(record) = self.ctx.deletions.get_active_deletion_for_user(uid).await? else {
            // Nothing left to recover; the token is dead weight.
            self.consume(&secret).await;
            return Err(LifecycleError::InvalidOrExpiredToken);
        };

        let now = self.ctx.clock.now();
        let bound = record.recovery_token_hash.as_deref() == Some(secret.hash().as_str());
        if !bound || !record.has_live_recovery_token(now) {
            tracing::debug!(
                user_id = %user_id,
                deletion_id = %record.deletion_id,
                "Recovery token does not match the pending deletion"
            );
            return Err(LifecycleError::InvalidOrExpiredToken);
        }

        let account = self
            .ctx
            .accounts
            .get_account(uid)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(format!("account {user_id}")))?;

        // Cancels before it restores, in one transaction: an erasure that
        // has not committed yet finds the record cancelled.
        match self
            .ctx
            .deletions
            .recover_deletion(record.deletion_id, now)
            .await?
        {
            RecoveryOutcome::Recovered => {}
            // Executed or cancelled between the read and now.
            RecoveryOutcome::NotEligible => return Err(LifecycleError::InvalidOrExpiredToken),
            RecoveryOutcome::AccountMissing => {
                return Err(LifecycleError::NotFound(format!("account {user_id}")));
            }
        }

        self.consume(&secret).await;

        let deletion_id = DeletionId::from(record.deletion_id);
        metrics::DELETIONS_RECOVERED.inc();
        tracing::info!(
            user_id = %user_id,
            deletion_id = %deletion_id,
            "Account recovered"
        );

        let event = AccountRecoveredEvent {
            user_id,
            deletion_id,
            email: account.email,
            name: account.display_name,
            timestamp: now,
            app_url: self.ctx.notifications.app_url.clone(),
        };
        if let Err(e) = self.ctx.bus.publish(&event).await {
            tracing::warn!(user_id = %user_id, error = %e, "Recovery confirmation not published");
        }

        Ok(RecoveryReceipt {
            user_id,
            deletion_id,
            recovered_at: now,
        })
    }

    async fn consume(&self, secret: &TokenSecret) {
        if let Err(e) = self.ctx.tokens.verify(secret).await {
            tracing::warn!(error = %e, "Failed to consume recovery token");
        }
    }
}
