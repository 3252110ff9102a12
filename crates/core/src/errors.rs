use thiserror::Error;

use crate::domain::acceptance::AcceptanceId;
use crate::domain::change::ChangeId;
use crate::domain::quote::AccountId;

/// Errors detected by the negotiation core itself. Everything here is
/// returned synchronously to the caller; infrastructure failures while
/// notifying the event sink never appear in this taxonomy.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("stale version: caller expected {expected}, quote is at {actual}")]
    VersionConflict { expected: u32, actual: u32 },
    #[error("operation `{operation}` not allowed: {reason}")]
    InvalidState { operation: &'static str, reason: String },
    #[error("change {0:?} is not pending a decision")]
    NotPendingChange(ChangeId),
    #[error("acceptance {0:?} is not pending a decision")]
    NotPendingAcceptance(AcceptanceId),
    #[error("account {0:?} may not decide on its own submission")]
    SelfDecision(AccountId),
    #[error("invalid change data: {0}")]
    InvalidChangeData(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl NegotiationError {
    /// Stable machine-readable code carried on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::NotPendingChange(_) => "NOT_PENDING_CHANGE",
            Self::NotPendingAcceptance(_) => "NOT_PENDING_ACCEPTANCE",
            Self::SelfDecision(_) => "SELF_DECISION",
            Self::InvalidChangeData(_) => "INVALID_CHANGE_DATA",
            Self::NotFound(_) => "NOT_FOUND",
        }
    }

    /// User-facing retry guidance for the caller.
    pub fn guidance(&self) -> &'static str {
        match self {
            Self::VersionConflict { .. } => {
                "The quote changed underneath you. Re-fetch it and retry with the current version."
            }
            Self::InvalidState { .. }
            | Self::NotPendingChange(_)
            | Self::NotPendingAcceptance(_)
            | Self::SelfDecision(_) => {
                "Retrying will not help until the quote or the counter-party changes state."
            }
            Self::InvalidChangeData(_) => "Correct the change items and resubmit.",
            Self::NotFound(_) => "Check the identifier and try again.",
        }
    }
}
