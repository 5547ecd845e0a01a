//! Deletion request identifiers and the status state machine.
//!
//! A deletion record starts `Scheduled` and leaves that state exactly once,
//! either to `Cancelled` (the user recovered the account) or to `Executed`
//! (the account was erased). Both exits are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a deletion request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeletionId(Uuid);

impl DeletionId {
    /// Generate a new random deletion ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidId(format!("invalid deletion ID: {e}")))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeletionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for DeletionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Debug for DeletionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeletionId({})", self.0)
    }
}

impl fmt::Display for DeletionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a deletion record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionStatus {
    /// Recoverable, or admitted and waiting for its hard-deletion day.
    Scheduled,
    /// Recovered by the user.
    Cancelled,
    /// Account data erased. Irreversible.
    Executed,
}

impl DeletionStatus {
    /// Parse from the persisted string form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "cancelled" => Ok(Self::Cancelled),
            "executed" => Ok(Self::Executed),
            _ => Err(crate::Error::InvalidStatus(s.to_string())),
        }
    }

    /// Get the persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Cancelled => "cancelled",
            Self::Executed => "executed",
        }
    }

    /// Check if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Executed)
    }

    /// Check if moving to `next` is a legal forward transition.
    ///
    /// `Scheduled -> Scheduled` is allowed: admission re-assigns the
    /// hard-deletion day without changing status.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::Scheduled)
                | (Self::Scheduled, Self::Cancelled)
                | (Self::Scheduled, Self::Executed)
        )
    }

    /// Validate a transition, returning an error naming both ends if illegal.
    pub fn transition_to(&self, next: Self) -> crate::Result<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(crate::Error::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl fmt::Display for DeletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
