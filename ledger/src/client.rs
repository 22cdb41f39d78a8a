//! Ledger client trait and transaction types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chansettle_common::{AccountId, ChannelId, ChannelState, LedgerError, LedgerResult, Moment, Nonce};
use chansettle_crypto::SigningKey;

use crate::subscription::Subscription;

/// Callback for channel-state subscriptions.
pub type StateHandler = Box<dyn Fn(ChannelState) + Send + Sync>;

/// Callback for clock subscriptions.
pub type TickHandler = Box<dyn Fn(Moment) + Send + Sync>;

/// A channel call that can be submitted to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Call {
    /// Start settling the channel shared with `counterparty`.
    InitiateSettlement { counterparty: AccountId },
    /// Pay out the settled channel shared with `counterparty`.
    Withdraw { counterparty: AccountId },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::InitiateSettlement { .. } => "initiate_settlement",
            Call::Withdraw { .. } => "withdraw",
        }
    }

    pub fn counterparty(&self) -> AccountId {
        match self {
            Call::InitiateSettlement { counterparty } | Call::Withdraw { counterparty } => {
                *counterparty
            }
        }
    }

    /// Canonical bytes the signer signs: the call together with its nonce.
    pub fn signing_payload(&self, nonce: Nonce) -> LedgerResult<Vec<u8>> {
        #[derive(Serialize)]
        struct Payload<'a> {
            call: &'a Call,
            nonce: Nonce,
        }

        serde_json::to_vec(&Payload { call: self, nonce })
            .map_err(|e| LedgerError::Submission(format!("failed to encode {}: {}", self.name(), e)))
    }
}

/// Result of a transaction the ledger accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutcome {
    /// Hash identifying the transaction.
    pub tx_hash: String,
    /// Nonce the transaction consumed.
    pub nonce: Nonce,
    /// Ledger moment the transaction was included at.
    pub included_at: Moment,
}

/// Access to the ledger that records channel state.
///
/// State and clock subscriptions must deliver the current value immediately
/// on subscription and then every subsequent change. Consumers rely on this
/// to avoid missing a transition that lands between a point-in-time query
/// and the subscription becoming live.
///
/// Handlers may be invoked before the subscribing call returns, and may
/// release their own subscription from inside the callback.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Read the current state of a channel.
    async fn channel_state(&self, channel_id: &ChannelId) -> LedgerResult<ChannelState>;

    /// Subscribe to state changes of a channel.
    async fn subscribe_channel_state(
        &self,
        channel_id: &ChannelId,
        on_change: StateHandler,
    ) -> LedgerResult<Subscription>;

    /// Subscribe to the ledger clock.
    async fn subscribe_clock(&self, on_tick: TickHandler) -> LedgerResult<Subscription>;

    /// Next unused nonce for `account`.
    async fn next_nonce(&self, account: &AccountId) -> LedgerResult<Nonce>;

    /// Sign `call` with `signer` and submit it using `nonce`.
    async fn submit(&self, call: Call, signer: &SigningKey, nonce: Nonce) -> LedgerResult<TxOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_payload_binds_nonce() {
        let call = Call::Withdraw {
            counterparty: AccountId::from_bytes([9; 32]),
        };
        let a = call.signing_payload(Nonce::new(1)).unwrap();
        let b = call.signing_payload(Nonce::new(2)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_call_accessors() {
        let counterparty = AccountId::from_bytes([3; 32]);
        let call = Call::InitiateSettlement { counterparty };
        assert_eq!(call.name(), "initiate_settlement");
        assert_eq!(call.counterparty(), counterparty);
    }
}
