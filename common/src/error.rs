//! Errors reported by ledger collaborators.

use thiserror::Error;

/// Failure of a query, subscription or submission against the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A point-in-time state query failed.
    #[error("Ledger query failed: {0}")]
    Query(String),

    /// A subscription could not be established.
    #[error("Ledger subscription failed: {0}")]
    Subscription(String),

    /// A subscription ended before delivering the awaited value.
    #[error("Ledger subscription closed before a value was delivered")]
    SubscriptionClosed,

    /// The session could not supply a nonce.
    #[error("Nonce unavailable: {0}")]
    NonceUnavailable(String),

    /// The transaction could not be delivered to the ledger.
    #[error("Transaction submission failed: {0}")]
    Submission(String),

    /// The ledger received the transaction and refused it.
    #[error("Transaction rejected: {reason}")]
    Rejected { reason: String },
}

impl LedgerError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Query(_)
                | LedgerError::Subscription(_)
                | LedgerError::SubscriptionClosed
                | LedgerError::NonceUnavailable(_)
                | LedgerError::Submission(_)
        )
    }

    /// Get error code for reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::Query(_) => "LEDGER_QUERY",
            LedgerError::Subscription(_) => "LEDGER_SUBSCRIPTION",
            LedgerError::SubscriptionClosed => "LEDGER_SUBSCRIPTION_CLOSED",
            LedgerError::NonceUnavailable(_) => "NONCE_UNAVAILABLE",
            LedgerError::Submission(_) => "TX_SUBMISSION",
            LedgerError::Rejected { .. } => "TX_REJECTED",
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        LedgerError::Rejected {
            reason: reason.into(),
        }
    }
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_is_not_retryable() {
        assert!(!LedgerError::rejected("stale nonce").is_retryable());
        assert!(LedgerError::Query("timeout".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = LedgerError::rejected("channel is not pending settlement");
        assert_eq!(
            err.to_string(),
            "Transaction rejected: channel is not pending settlement"
        );
        assert_eq!(err.error_code(), "TX_REJECTED");
    }
}
