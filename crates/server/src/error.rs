//! Lifecycle error types.

use crate::bus::BusError;
use crate::tokens::TokenError;
use sunset_metadata::MetadataError;

/// Errors surfaced by the deletion lifecycle services.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// No account or no deletion record for the request.
    #[error("not found: {0}")]
    NotFound(String),

    /// The user already has a scheduled deletion.
    #[error("account deletion already pending")]
    AlreadyPendingDeletion,

    /// Recovery token unknown, already used, expired, or not bound to a
    /// scheduled deletion.
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    /// A notification gate refused the send.
    #[error("rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// No day within the probe horizon had spare capacity. Retried next tick.
    #[error("no deletion capacity within {probed_days} days")]
    CapacityExhausted { probed_days: u32 },

    /// A store call failed. The caller or the next tick may retry.
    #[error("transient store error: {0}")]
    TransientStore(#[from] MetadataError),

    /// Erasing account data failed. The record stays scheduled.
    #[error("erasure failed: {0}")]
    FatalErasure(String),

    /// Publishing failed after every retry. The preceding state change stands.
    #[error("event publish failed: {0}")]
    EventPublish(String),
}

impl LifecycleError {
    /// Stable error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyPendingDeletion => "already_pending_deletion",
            Self::InvalidOrExpiredToken => "invalid_or_expired_token",
            Self::RateLimitExceeded(_) => "rate_limit_exceeded",
            Self::CapacityExhausted { .. } => "capacity_exhausted",
            Self::TransientStore(_) => "transient_store_error",
            Self::FatalErasure(_) => "fatal_erasure_error",
            Self::EventPublish(_) => "event_publish_error",
        }
    }

    /// Whether the same call may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded(_)
                | Self::CapacityExhausted { .. }
                | Self::TransientStore(_)
                | Self::EventPublish(_)
        )
    }
}

impl From<TokenError> for LifecycleError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::InvalidOrExpired => Self::InvalidOrExpiredToken,
            TokenError::Store(e) => Self::TransientStore(e),
        }
    }
}

impl From<BusError> for LifecycleError {
    fn from(e: BusError) -> Self {
        Self::EventPublish(e.to_string())
    }
}

/// Result type for lifecycle operations.
pub type LifecycleResult<T> = std::result::Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_errors_are_not_retryable() {
        assert!(!LifecycleError::InvalidOrExpiredToken.is_retryable());
        assert!(!LifecycleError::NotFound("user".to_string()).is_retryable());
        assert!(!LifecycleError::AlreadyPendingDeletion.is_retryable());
    }

    #[test]
    fn test_operational_errors_are_retryable() {
        let store = LifecycleError::from(MetadataError::Internal("boom".to_string()));
        assert!(store.is_retryable());
        assert_eq!(store.code(), "transient_store_error");
        assert!(LifecycleError::CapacityExhausted { probed_days: 3 }.is_retryable());
        assert!(LifecycleError::EventPublish("down".to_string()).is_retryable());
    }
}
