//! One-time token service.
//!
//! Tokens are random secrets handed to the user once. Only their SHA-256
//! hashes are stored, scoped by purpose, so a recovery token can never be
//! redeemed for anything else.

use async_trait::async_trait;
use std::sync::Arc;
use sunset_core::{Clock, TokenSecret, UserId};
use sunset_metadata::MetadataError;
use sunset_metadata::models::OneTimeTokenRow;
use sunset_metadata::repos::OneTimeTokenRepo;
use time::{Duration, OffsetDateTime};

/// Purpose tag for account recovery tokens.
pub const RECOVERY_PURPOSE: &str = "account_recovery";

/// A freshly issued token. The secret is not stored anywhere.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub secret: TokenSecret,
    pub token_hash: String,
    pub expires_at: OffsetDateTime,
}

/// What a valid token grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenGrant {
    pub subject: UserId,
    pub expires_at: OffsetDateTime,
}

/// Token service errors.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token invalid or expired")]
    InvalidOrExpired,

    #[error("token store error: {0}")]
    Store(#[from] MetadataError),
}

/// Single-use, expiring tokens bound to a subject.
#[async_trait]
pub trait OneTimeTokenService: Send + Sync {
    /// Issue a new token for `subject`.
    async fn generate(&self, subject: UserId) -> Result<IssuedToken, TokenError>;

    /// Check a token without consuming it.
    async fn peek(&self, secret: &TokenSecret) -> Result<TokenGrant, TokenError>;

    /// Consume a token. A second call with the same token fails.
    async fn verify(&self, secret: &TokenSecret) -> Result<TokenGrant, TokenError>;

    /// Revoke every outstanding token for `subject`.
    async fn revoke_all(&self, subject: UserId) -> Result<u64, TokenError>;
}

/// Token service backed by the metadata store.
pub struct StoreTokenService {
    repo: Arc<dyn OneTimeTokenRepo>,
    clock: Arc<dyn Clock>,
    purpose: String,
    ttl: Duration,
}

impl StoreTokenService {
    /// Create a service issuing tokens of `purpose` that live for `ttl`.
    pub fn new(
        repo: Arc<dyn OneTimeTokenRepo>,
        clock: Arc<dyn Clock>,
        purpose: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            repo,
            clock,
            purpose: purpose.into(),
            ttl,
        }
    }

    fn grant(&self, row: OneTimeTokenRow) -> Result<TokenGrant, TokenError> {
        if row.purpose != self.purpose {
            return Err(TokenError::InvalidOrExpired);
        }
        Ok(TokenGrant {
            subject: UserId::from(row.subject_id),
            expires_at: row.expires_at,
        })
    }
}

#[async_trait]
impl OneTimeTokenService for StoreTokenService {
    async fn generate(&self, subject: UserId) -> Result<IssuedToken, TokenError> {
        let now = self.clock.now();
        let secret = TokenSecret::generate();
        let token_hash = secret.hash();
        let expires_at = now + self.ttl;

        self.repo
            .create_one_time_token(&OneTimeTokenRow {
                token_hash: token_hash.clone(),
                subject_id: *subject.as_uuid(),
                purpose: self.purpose.clone(),
                created_at: now,
                expires_at,
            })
            .await?;

        tracing::debug!(
            user_id = %subject,
            purpose = %self.purpose,
            expires_at = %expires_at,
            "Issued one-time token"
        );

        Ok(IssuedToken {
            secret,
            token_hash,
            expires_at,
        })
    }

    async fn peek(&self, secret: &TokenSecret) -> Result<TokenGrant, TokenError> {
        let row = self
            .repo
            .peek_one_time_token(&secret.hash(), self.clock.now())
            .await?
            .ok_or(TokenError::InvalidOrExpired)?;
        self.grant(row)
    }

    async fn verify(&self, secret: &TokenSecret) -> Result<TokenGrant, TokenError> {
        // Purpose is checked before consuming so a token of another purpose
        // stays usable for its own flow.
        self.peek(secret).await?;
        let row = self
            .repo
            .consume_one_time_token(&secret.hash(), self.clock.now())
            .await?
            .ok_or(TokenError::InvalidOrExpired)?;
        self.grant(row)
    }

    async fn revoke_all(&self, subject: UserId) -> Result<u64, TokenError> {
        let revoked = self
            .repo
            .delete_one_time_tokens_for_subject(*subject.as_uuid(), &self.purpose)
            .await?;
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sunset_core::ManualClock;
    use sunset_metadata::SqliteStore;
    use time::macros::datetime;

    async fn service(ttl: Duration) -> (StoreTokenService, Arc<ManualClock>, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(datetime!(2026-01-01 00:00 UTC)));
        let svc = StoreTokenService::new(store.clone(), clock.clone(), RECOVERY_PURPOSE, ttl);
        (svc, clock, store)
    }

    #[tokio::test]
    async fn test_verify_consumes_token() {
        let (svc, _clock, _store) = service(Duration::hours(1)).await;
        let user = UserId::new();
        let issued = svc.generate(user).await.unwrap();

        let grant = svc.peek(&issued.secret).await.unwrap();
        assert_eq!(grant.subject, user);
        assert_eq!(grant.expires_at, datetime!(2026-01-01 01:00 UTC));

        assert_eq!(svc.verify(&issued.secret).await.unwrap().subject, user);
        assert!(matches!(
            svc.verify(&issued.secret).await,
            Err(TokenError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let (svc, clock, _store) = service(Duration::hours(1)).await;
        let issued = svc.generate(UserId::new()).await.unwrap();

        clock.advance(Duration::hours(1));
        assert!(matches!(
            svc.peek(&issued.secret).await,
            Err(TokenError::InvalidOrExpired)
        ));
        assert!(matches!(
            svc.verify(&issued.secret).await,
            Err(TokenError::InvalidOrExpired)
        ));
    }

    #[tokio::test]
    async fn test_other_purpose_not_accepted() {
        let (svc, clock, store) = service(Duration::hours(1)).await;
        let other = StoreTokenService::new(store, clock, "password_reset", Duration::hours(1));
        let issued = other.generate(UserId::new()).await.unwrap();

        assert!(svc.verify(&issued.secret).await.is_err());
        // Still redeemable for its own purpose.
        assert!(other.verify(&issued.secret).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_all() {
        let (svc, _clock, _store) = service(Duration::hours(1)).await;
        let user = UserId::new();
        let first = svc.generate(user).await.unwrap();
        let second = svc.generate(user).await.unwrap();

        assert_eq!(svc.revoke_all(user).await.unwrap(), 2);
        assert!(svc.peek(&first.secret).await.is_err());
        assert!(svc.peek(&second.secret).await.is_err());
    }
}
