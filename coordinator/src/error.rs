//! Error types for the settlement coordinator.

use thiserror::Error;

use chansettle_common::{ChannelState, LedgerError};

use crate::state::SettlerPhase;

/// Errors surfaced by [`ChannelSettler`](crate::ChannelSettler) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettleError {
    /// The channel cannot be settled from its current state.
    #[error(
        "Invalid state. Expected channel state to be either 'Active' or 'PendingSettlement', got '{observed}'"
    )]
    InvalidState { observed: ChannelState },

    /// The channel reached a state other than pending settlement while a
    /// deadline read was waiting for it.
    #[error("Channel state must be 'PendingSettlement', but is '{observed}'")]
    UnexpectedState { observed: ChannelState },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Withdrawal attempted before the settlement deadline was observed to pass.
    #[error("Cannot withdraw before the channel is closed (phase: {phase})")]
    WithdrawBeforeClose { phase: SettlerPhase },

    #[error("Cannot {operation} in phase {phase}")]
    InvalidPhase {
        phase: SettlerPhase,
        operation: &'static str,
    },

    /// Subscriptions were released while the waiter was still pending.
    #[error("Settler unsubscribed before the channel closed")]
    Unsubscribed,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SettleError {
    /// Get error code for reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            SettleError::InvalidState { .. } => "INVALID_STATE",
            SettleError::UnexpectedState { .. } => "UNEXPECTED_STATE",
            SettleError::Ledger(e) => e.error_code(),
            SettleError::WithdrawBeforeClose { .. } => "WITHDRAW_BEFORE_CLOSE",
            SettleError::InvalidPhase { .. } => "INVALID_PHASE",
            SettleError::Unsubscribed => "UNSUBSCRIBED",
            SettleError::Configuration(_) => "CONFIGURATION",
        }
    }

    /// Check if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SettleError::Ledger(e) => e.is_retryable(),
            SettleError::WithdrawBeforeClose { .. } => true,
            _ => false,
        }
    }
}

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, SettleError>;
