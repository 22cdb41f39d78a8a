//! Settler configuration.

use std::str::FromStr;

use chansettle_common::{AccountId, ChannelId, Moment, DEFAULT_SETTLEMENT_WINDOW};

use crate::error::{Result, SettleError};

/// How strictly `withdraw` is sequenced after closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WithdrawPolicy {
    /// Reject withdrawal until the settler has observed the deadline pass.
    #[default]
    RequireClosed,
    /// Submit whenever asked; the ledger decides.
    Unchecked,
}

impl FromStr for WithdrawPolicy {
    type Err = SettleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "require_closed" | "require-closed" | "strict" => Ok(WithdrawPolicy::RequireClosed),
            "unchecked" | "permissive" => Ok(WithdrawPolicy::Unchecked),
            other => Err(SettleError::Configuration(format!(
                "unknown withdraw policy '{}'",
                other
            ))),
        }
    }
}

/// Configuration for a single channel settler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlerConfig {
    /// The other party of the channel.
    pub counterparty: AccountId,
    /// Channel being settled.
    pub channel_id: ChannelId,
    /// Settlement window the ledger applies. Informative only; the settler
    /// always uses the deadline the ledger reports.
    pub settlement_window: Moment,
    /// Withdrawal sequencing.
    pub withdraw_policy: WithdrawPolicy,
}

impl SettlerConfig {
    pub fn new(counterparty: AccountId, channel_id: ChannelId) -> Self {
        Self {
            counterparty,
            channel_id,
            settlement_window: DEFAULT_SETTLEMENT_WINDOW,
            withdraw_policy: WithdrawPolicy::default(),
        }
    }

    pub fn with_settlement_window(mut self, window: Moment) -> Self {
        self.settlement_window = window;
        self
    }

    pub fn with_withdraw_policy(mut self, policy: WithdrawPolicy) -> Self {
        self.withdraw_policy = policy;
        self
    }

    /// Apply overrides from environment variables.
    ///
    /// Reads `SETTLEMENT_WINDOW` (ledger moments) and `WITHDRAW_POLICY`.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_overrides(
            std::env::var("SETTLEMENT_WINDOW").ok().as_deref(),
            std::env::var("WITHDRAW_POLICY").ok().as_deref(),
        )
    }

    fn apply_overrides(mut self, window: Option<&str>, policy: Option<&str>) -> Result<Self> {
        if let Some(window) = window {
            let value: u64 = window.trim().parse().map_err(|_| {
                SettleError::Configuration(format!("invalid SETTLEMENT_WINDOW '{}'", window))
            })?;
            self.settlement_window = Moment::new(value);
        }

        if let Some(policy) = policy {
            self.withdraw_policy = policy.parse()?;
        }

        Ok(self)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.settlement_window == Moment::ZERO {
            return Err(SettleError::Configuration(
                "Settlement window cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SettlerConfig {
        SettlerConfig::new(AccountId::from_bytes([2; 32]), ChannelId::from_bytes([7; 32]))
    }

    #[test]
    fn test_default_config() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.settlement_window, DEFAULT_SETTLEMENT_WINDOW);
        assert_eq!(config.withdraw_policy, WithdrawPolicy::RequireClosed);
    }

    #[test]
    fn test_invalid_config() {
        let config = config().with_settlement_window(Moment::ZERO);
        assert!(matches!(config.validate(), Err(SettleError::Configuration(_))));
    }

    #[test]
    fn test_overrides() {
        let config = config()
            .apply_overrides(Some("120"), Some("unchecked"))
            .unwrap();
        assert_eq!(config.settlement_window, Moment::new(120));
        assert_eq!(config.withdraw_policy, WithdrawPolicy::Unchecked);

        assert!(config.clone().apply_overrides(Some("soon"), None).is_err());
        assert!(config.apply_overrides(None, Some("maybe")).is_err());
    }
}
