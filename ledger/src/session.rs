//! A party's session with the ledger.

use std::fmt;
use std::sync::Arc;

use chansettle_common::{AccountId, LedgerResult};
use chansettle_crypto::SigningKey;

use crate::client::{Call, LedgerClient, TxOutcome};
use crate::registry::EventRegistry;

/// Shared ledger services plus the key the local party signs with.
///
/// The client and registry are owned elsewhere and may be shared between
/// many sessions and coordinators.
#[derive(Clone)]
pub struct LedgerSession {
    pub client: Arc<dyn LedgerClient>,
    pub events: Arc<dyn EventRegistry>,
    signer: Arc<SigningKey>,
    account: AccountId,
}

impl LedgerSession {
    pub fn new(
        client: Arc<dyn LedgerClient>,
        events: Arc<dyn EventRegistry>,
        signer: Arc<SigningKey>,
    ) -> Self {
        let account = account_of(&signer);
        Self {
            client,
            events,
            signer,
            account,
        }
    }

    /// Ledger account of the local party.
    pub fn account(&self) -> AccountId {
        self.account
    }

    /// Sign and submit `call` with the next nonce of the local account.
    pub async fn sign_and_send(&self, call: Call) -> LedgerResult<TxOutcome> {
        let nonce = self.client.next_nonce(&self.account).await?;
        self.client.submit(call, &self.signer, nonce).await
    }
}

impl fmt::Debug for LedgerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerSession")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

/// Ledger account controlled by `key`.
pub fn account_of(key: &SigningKey) -> AccountId {
    AccountId::from_bytes(key.verifying_key().to_bytes())
}
