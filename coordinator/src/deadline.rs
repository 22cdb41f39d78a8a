//! Settlement deadline resolution and caching.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

use chansettle_common::{ChannelId, ChannelState, LedgerError, Moment};
use chansettle_ledger::LedgerClient;

use crate::error::{Result, SettleError};
use crate::metrics::SettlerMetrics;

/// Resolves and caches the settlement deadline of one channel.
///
/// The first read queries the ledger and, if settlement has not been
/// initiated yet, waits on a channel-state subscription until it has.
/// Concurrent reads share that single resolution. Push-back events overwrite
/// the cached value at any time; the ledger is authoritative.
pub struct DeadlineTracker {
    channel_id: ChannelId,
    ledger: Arc<dyn LedgerClient>,
    cached: RwLock<Option<Moment>>,
    /// Serializes cold reads so only one of them touches the ledger.
    resolve_gate: tokio::sync::Mutex<()>,
    metrics: Arc<SettlerMetrics>,
}

impl DeadlineTracker {
    pub fn new(
        channel_id: ChannelId,
        ledger: Arc<dyn LedgerClient>,
        metrics: Arc<SettlerMetrics>,
    ) -> Self {
        Self {
            channel_id,
            ledger,
            cached: RwLock::new(None),
            resolve_gate: tokio::sync::Mutex::new(()),
            metrics,
        }
    }

    /// Cached deadline, if resolved.
    pub fn cached(&self) -> Option<Moment> {
        *self.cached.read()
    }

    /// Resolve the current deadline.
    ///
    /// Fails with [`SettleError::UnexpectedState`] if the channel closes while
    /// the read is waiting for settlement to start, and with a ledger error if
    /// the query or subscription fails. A failed read caches nothing, so the
    /// next read retries from scratch.
    #[instrument(skip(self), fields(channel_id = %self.channel_id))]
    pub async fn deadline(&self) -> Result<Moment> {
        if let Some(deadline) = self.cached() {
            return Ok(deadline);
        }

        let _gate = self.resolve_gate.lock().await;
        if let Some(deadline) = self.cached() {
            return Ok(deadline);
        }

        let resolved = match self.ledger.channel_state(&self.channel_id).await? {
            ChannelState::PendingSettlement { deadline } => deadline,
            _ => self.await_pending_settlement().await?,
        };

        // A push-back that arrived while resolving is newer than what we read.
        let deadline = *self.cached.write().get_or_insert(resolved);
        debug!(%deadline, "Settlement deadline resolved");
        Ok(deadline)
    }

    /// Wait on a state subscription until the channel is pending settlement.
    async fn await_pending_settlement(&self) -> Result<Moment> {
        let (tx, rx) = oneshot::channel::<Result<Moment>>();
        let tx = Mutex::new(Some(tx));
        let channel_id = self.channel_id;

        debug!("Waiting for settlement to be initiated");
        let subscription = self
            .ledger
            .subscribe_channel_state(
                &self.channel_id,
                Box::new(move |state| {
                    let outcome = match state {
                        ChannelState::PendingSettlement { deadline } => Ok(deadline),
                        ChannelState::Active => {
                            debug!(%channel_id, "Channel still active");
                            return;
                        }
                        observed => Err(SettleError::UnexpectedState { observed }),
                    };
                    if let Some(tx) = tx.lock().take() {
                        let _ = tx.send(outcome);
                    }
                }),
            )
            .await?;

        let outcome = rx
            .await
            .unwrap_or(Err(SettleError::Ledger(LedgerError::SubscriptionClosed)));
        subscription.unsubscribe();

        if let Err(e) = &outcome {
            warn!(error = %e, "Settlement deadline could not be resolved");
        }
        outcome
    }

    /// Forget the cached deadline so the next read asks the ledger again.
    ///
    /// Waits for any in-flight resolution first, so a value read before the
    /// call cannot be cached after it.
    pub async fn invalidate(&self) {
        let _gate = self.resolve_gate.lock().await;
        if let Some(stale) = self.cached.write().take() {
            debug!(channel_id = %self.channel_id, %stale, "Cached deadline invalidated");
        }
    }

    /// Apply a pushed-back deadline reported by the ledger.
    pub fn push_back(&self, deadline: Moment) {
        let previous = self.cached.write().replace(deadline);
        self.metrics.push_back();

        match previous {
            Some(previous) if deadline < previous => warn!(
                channel_id = %self.channel_id,
                %previous,
                %deadline,
                "Ledger moved settlement deadline earlier"
            ),
            _ => info!(
                channel_id = %self.channel_id,
                previous = ?previous.map(|m| m.value()),
                %deadline,
                "Settlement pushed back"
            ),
        }
    }
}
