//! Settlement lifecycle controller.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use chansettle_common::{ChannelId, LedgerError, Moment};
use chansettle_ledger::{Call, LedgerSession, TxOutcome};

use crate::config::{SettlerConfig, WithdrawPolicy};
use crate::deadline::DeadlineTracker;
use crate::error::{Result, SettleError};
use crate::metrics::{MetricsSnapshot, SettlerMetrics};
use crate::poller::{TimeoutPoller, Waiter};
use crate::state::SettlerPhase;

/// What `init` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// The initiate-settlement transaction was accepted.
    Submitted(TxOutcome),
    /// Submission failed. Settlement may still proceed, e.g. because the
    /// counterparty already initiated it.
    SubmissionFailed(LedgerError),
    /// Settlement was initiated by an earlier call.
    AlreadyInitialized,
}

/// Settles one channel with one counterparty.
///
/// Cheap to clone; clones share the same deadline cache, waiter queue and
/// subscriptions.
#[derive(Clone)]
pub struct ChannelSettler {
    /// Configuration.
    config: SettlerConfig,
    /// Ledger services and the local signing key.
    session: LedgerSession,
    /// Deadline cache shared with the poller.
    tracker: Arc<DeadlineTracker>,
    /// Clock subscription and waiter queue.
    poller: Arc<TimeoutPoller>,
    /// Local lifecycle phase.
    phase: Arc<RwLock<SettlerPhase>>,
    /// Held from the phase check until the withdraw outcome is recorded.
    withdraw_gate: Arc<tokio::sync::Mutex<()>>,
    metrics: Arc<SettlerMetrics>,
}

impl ChannelSettler {
    /// Create a settler for a channel that is `Active` or already pending
    /// settlement.
    #[instrument(skip(session, config), fields(channel_id = %config.channel_id))]
    pub async fn create(session: LedgerSession, config: SettlerConfig) -> Result<Self> {
        config.validate()?;

        let state = session.client.channel_state(&config.channel_id).await?;
        if !state.is_settleable() {
            warn!(%state, "Refusing to settle channel");
            return Err(SettleError::InvalidState { observed: state });
        }

        let metrics = Arc::new(SettlerMetrics::new());
        let phase = Arc::new(RwLock::new(SettlerPhase::Open));
        let tracker = Arc::new(DeadlineTracker::new(
            config.channel_id,
            session.client.clone(),
            metrics.clone(),
        ));
        let poller = Arc::new(TimeoutPoller::new(
            config.channel_id,
            session.client.clone(),
            session.events.clone(),
            tracker.clone(),
            phase.clone(),
            metrics.clone(),
        ));

        info!(
            %state,
            counterparty = %config.counterparty.short(),
            window = %config.settlement_window,
            "Channel settler created"
        );

        Ok(Self {
            config,
            session,
            tracker,
            poller,
            phase,
            withdraw_gate: Arc::new(tokio::sync::Mutex::new(())),
            metrics,
        })
    }

    /// Initiate settlement and start following push-backs.
    ///
    /// Submission failures are reported in the outcome, not as errors. Only
    /// the first call submits; later calls just make sure the push-back
    /// subscription is live.
    #[instrument(skip(self), fields(channel_id = %self.config.channel_id))]
    pub async fn init(&self) -> Result<InitOutcome> {
        let first = {
            let mut phase = self.phase.write();
            match *phase {
                SettlerPhase::Withdrawn => {
                    return Err(SettleError::InvalidPhase {
                        phase: *phase,
                        operation: "init",
                    })
                }
                SettlerPhase::Open => {
                    *phase = SettlerPhase::AwaitingClose;
                    true
                }
                _ => false,
            }
        };

        if self.poller.watch_push_backs().await {
            debug!("Subscribed to settlement push-backs");
        }

        if !first {
            debug!(phase = %self.phase(), "Settlement already initiated");
            return Ok(InitOutcome::AlreadyInitialized);
        }

        let call = Call::InitiateSettlement {
            counterparty: self.config.counterparty,
        };
        match self.session.sign_and_send(call).await {
            Ok(outcome) => {
                self.metrics.initiate_submitted();
                info!(tx_hash = %outcome.tx_hash, nonce = %outcome.nonce, "Settlement initiated");
                Ok(InitOutcome::Submitted(outcome))
            }
            Err(e) => {
                self.metrics.initiate_failed();
                warn!(error = %e, code = e.error_code(), "Tried to initiate settlement but failed");
                Ok(InitOutcome::SubmissionFailed(e))
            }
        }
    }

    /// Register a close notification without waiting on it yet.
    ///
    /// The poller is armed when the waiter is first awaited with
    /// [`Waiter::closed`], not at registration. A registered waiter that is
    /// never awaited does not subscribe to the clock.
    pub fn register_waiter(&self) -> Waiter {
        self.poller.register()
    }

    /// Wait until the ledger clock has passed the settlement deadline.
    pub async fn once_closed(&self) -> Result<()> {
        self.register_waiter().closed().await
    }

    /// Withdraw the channel's funds.
    ///
    /// With [`WithdrawPolicy::RequireClosed`] this is rejected until a waiter
    /// has observed closure. Concurrent calls are serialized; at most one
    /// withdraw transaction is accepted.
    #[instrument(skip(self), fields(channel_id = %self.config.channel_id))]
    pub async fn withdraw(&self) -> Result<TxOutcome> {
        let _gate = self.withdraw_gate.lock().await;
        let phase = self.phase();
        if phase.is_terminal() {
            return Err(SettleError::InvalidPhase {
                phase,
                operation: "withdraw",
            });
        }
        if self.config.withdraw_policy == WithdrawPolicy::RequireClosed
            && phase != SettlerPhase::Closed
        {
            return Err(SettleError::WithdrawBeforeClose { phase });
        }

        let call = Call::Withdraw {
            counterparty: self.config.counterparty,
        };
        let outcome = self.session.sign_and_send(call).await.map_err(|e| {
            warn!(error = %e, "Withdraw failed");
            SettleError::from(e)
        })?;

        *self.phase.write() = SettlerPhase::Withdrawn;
        self.metrics.withdrawn();
        info!(tx_hash = %outcome.tx_hash, "Withdrawn");
        Ok(outcome)
    }

    /// Resolve the settlement deadline.
    pub async fn deadline(&self) -> Result<Moment> {
        self.tracker.deadline().await
    }

    pub fn cached_deadline(&self) -> Option<Moment> {
        self.tracker.cached()
    }

    /// Release the clock and push-back subscriptions now. Pending waiters
    /// resolve with [`SettleError::Unsubscribed`].
    pub fn unsubscribe(&self) -> usize {
        let dropped = self.poller.shutdown();
        info!(channel_id = %self.config.channel_id, waiters = dropped, "Settler unsubscribed");
        dropped
    }

    pub fn phase(&self) -> SettlerPhase {
        *self.phase.read()
    }

    pub fn channel_id(&self) -> ChannelId {
        self.config.channel_id
    }

    pub fn config(&self) -> &SettlerConfig {
        &self.config
    }

    pub fn pending_waiters(&self) -> usize {
        self.poller.pending()
    }

    pub fn is_armed(&self) -> bool {
        self.poller.is_armed()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for ChannelSettler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSettler")
            .field("channel_id", &self.config.channel_id)
            .field("phase", &self.phase())
            .field("deadline", &self.cached_deadline())
            .finish_non_exhaustive()
    }
}
