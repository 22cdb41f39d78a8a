//! Deterministic in-memory ledger.
//!
//! Implements [`LedgerClient`] over a process-local channel table and a
//! manually advanced clock. Used by the coordinator tests and the simulator
//! to script ledger behaviour: state transitions, clock ticks, counterparty
//! push-backs and injected failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use chansettle_common::{
    AccountId, ChannelId, ChannelState, LedgerError, LedgerEvent, LedgerResult, Moment, Nonce,
};
use chansettle_crypto::{sha256_concat, SigningKey};

use crate::client::{Call, LedgerClient, StateHandler, TickHandler, TxOutcome};
use crate::registry::EventBus;
use crate::session::account_of;
use crate::subscription::Subscription;

/// Channel identifier shared by two parties, independent of argument order.
pub fn derive_channel_id(a: &AccountId, b: &AccountId) -> ChannelId {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    ChannelId::from_bytes(sha256_concat(&[lo.as_bytes(), hi.as_bytes()]))
}

/// One-shot failure injected into the next matching ledger operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Next `channel_state` query fails.
    Query,
    /// Next `subscribe_channel_state` fails.
    StateSubscription,
    /// Next `subscribe_clock` fails.
    ClockSubscription,
    /// Next `next_nonce` fails.
    Nonce,
    /// Next `submit` fails before reaching the ledger.
    Submission,
}

/// Subscribe/release counts per subscription kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionCounters {
    pub state_subscribed: usize,
    pub state_released: usize,
    pub clock_subscribed: usize,
    pub clock_released: usize,
}

impl SubscriptionCounters {
    /// Channel-state subscriptions currently live.
    pub fn active_state(&self) -> usize {
        self.state_subscribed - self.state_released
    }

    /// Clock subscriptions currently live.
    pub fn active_clock(&self) -> usize {
        self.clock_subscribed - self.clock_released
    }
}

/// A transaction as seen by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub sender: AccountId,
    pub call: Call,
    pub nonce: Nonce,
    pub accepted: bool,
}

struct ChannelRecord {
    parties: (AccountId, AccountId),
    state: ChannelState,
}

type StateListener = Arc<dyn Fn(ChannelState) + Send + Sync>;
type ClockListener = Arc<dyn Fn(Moment) + Send + Sync>;

struct LedgerState {
    now: Moment,
    settlement_window: Moment,
    channels: HashMap<ChannelId, ChannelRecord>,
    nonces: HashMap<AccountId, Nonce>,
    state_listeners: BTreeMap<u64, (ChannelId, StateListener)>,
    clock_listeners: BTreeMap<u64, ClockListener>,
    next_listener_id: u64,
    faults: Vec<Fault>,
    counters: SubscriptionCounters,
    transactions: Vec<SubmittedTx>,
}

impl LedgerState {
    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(idx) => {
                self.faults.remove(idx);
                true
            }
            None => false,
        }
    }

    fn listener_id(&mut self) -> u64 {
        self.next_listener_id += 1;
        self.next_listener_id
    }

    fn state_listeners_for(&self, channel_id: &ChannelId) -> Vec<StateListener> {
        self.state_listeners
            .values()
            .filter(|(id, _)| id == channel_id)
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    /// Apply an accepted call. Returns the channel whose state changed, its
    /// new state and the event to publish, if any.
    fn apply(
        &mut self,
        sender: AccountId,
        call: Call,
    ) -> LedgerResult<(ChannelId, ChannelState, Option<LedgerEvent>)> {
        let channel_id = derive_channel_id(&sender, &call.counterparty());
        let now = self.now;
        let window = self.settlement_window;
        let record = self
            .channels
            .get_mut(&channel_id)
            .ok_or_else(|| LedgerError::rejected(format!("unknown channel {}", channel_id)))?;

        match (call, record.state) {
            (Call::InitiateSettlement { .. }, ChannelState::Active) => {
                let deadline = now.saturating_add(window);
                record.state = ChannelState::PendingSettlement { deadline };
                Ok((
                    channel_id,
                    record.state,
                    Some(LedgerEvent::InitiatedSettlement {
                        channel_id,
                        deadline,
                    }),
                ))
            }
            (Call::Withdraw { .. }, ChannelState::PendingSettlement { deadline })
                if now.is_after(deadline) =>
            {
                record.state = ChannelState::Closed;
                Ok((channel_id, record.state, None))
            }
            (Call::Withdraw { .. }, ChannelState::PendingSettlement { deadline }) => {
                Err(LedgerError::rejected(format!(
                    "settlement window open until {}, now {}",
                    deadline, now
                )))
            }
            (call, state) => Err(LedgerError::rejected(format!(
                "cannot {} channel in state {}",
                call.name(),
                state
            ))),
        }
    }
}

/// In-memory ledger with a manually driven clock.
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    events: Arc<EventBus>,
}

impl MemoryLedger {
    /// Create a ledger that grants `settlement_window` to every settlement.
    pub fn new(settlement_window: Moment) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                now: Moment::ZERO,
                settlement_window,
                channels: HashMap::new(),
                nonces: HashMap::new(),
                state_listeners: BTreeMap::new(),
                clock_listeners: BTreeMap::new(),
                next_listener_id: 0,
                faults: Vec::new(),
                counters: SubscriptionCounters::default(),
                transactions: Vec::new(),
            })),
            events: Arc::new(EventBus::new()),
        }
    }

    /// Event bus this ledger publishes channel events on.
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Open an `Active` channel between two parties.
    pub fn open_channel(&self, a: AccountId, b: AccountId) -> ChannelId {
        let channel_id = derive_channel_id(&a, &b);
        self.state.lock().channels.insert(
            channel_id,
            ChannelRecord {
                parties: (a, b),
                state: ChannelState::Active,
            },
        );
        info!(channel_id = %channel_id, "Channel opened");
        channel_id
    }

    /// Parties of a channel.
    pub fn parties(&self, channel_id: &ChannelId) -> Option<(AccountId, AccountId)> {
        self.state.lock().channels.get(channel_id).map(|r| r.parties)
    }

    /// Current state of a channel without going through the client API.
    pub fn channel(&self, channel_id: &ChannelId) -> Option<ChannelState> {
        self.state.lock().channels.get(channel_id).map(|r| r.state)
    }

    /// Overwrite a channel's state and notify its subscribers.
    pub fn set_channel_state(&self, channel_id: &ChannelId, state: ChannelState) {
        let listeners = {
            let mut guard = self.state.lock();
            match guard.channels.get_mut(channel_id) {
                Some(record) => record.state = state,
                None => {
                    warn!(channel_id = %channel_id, "Ignoring state change for unknown channel");
                    return;
                }
            }
            guard.state_listeners_for(channel_id)
        };

        debug!(channel_id = %channel_id, state = %state, "Channel state changed");
        for listener in listeners {
            listener(state);
        }
    }

    /// Current ledger time.
    pub fn now(&self) -> Moment {
        self.state.lock().now
    }

    /// Move the clock to `moment` and notify clock subscribers.
    ///
    /// The clock never runs backwards; earlier moments are ignored.
    pub fn advance_to(&self, moment: Moment) {
        let listeners: Vec<ClockListener> = {
            let mut guard = self.state.lock();
            if moment < guard.now {
                warn!(now = %guard.now, requested = %moment, "Ignoring backwards clock tick");
                return;
            }
            guard.now = moment;
            guard.clock_listeners.values().cloned().collect()
        };

        for listener in listeners {
            listener(moment);
        }
    }

    /// Advance the clock by `span`.
    pub fn advance_by(&self, span: Moment) {
        let next = self.now().saturating_add(span);
        self.advance_to(next);
    }

    /// Counterparty action: extend the settlement deadline of a channel.
    pub fn push_back(&self, channel_id: &ChannelId, deadline: Moment) -> LedgerResult<()> {
        let (listeners, state) = {
            let mut guard = self.state.lock();
            let record = guard
                .channels
                .get_mut(channel_id)
                .ok_or_else(|| LedgerError::rejected(format!("unknown channel {}", channel_id)))?;

            match record.state {
                ChannelState::PendingSettlement { deadline: current } if deadline > current => {
                    record.state = ChannelState::PendingSettlement { deadline };
                }
                ChannelState::PendingSettlement { deadline: current } => {
                    return Err(LedgerError::rejected(format!(
                        "push-back to {} does not extend deadline {}",
                        deadline, current
                    )));
                }
                other => {
                    return Err(LedgerError::rejected(format!(
                        "cannot push back channel in state {}",
                        other
                    )));
                }
            }
            let state = record.state;
            (guard.state_listeners_for(channel_id), state)
        };

        info!(channel_id = %channel_id, deadline = %deadline, "Settlement pushed back");
        for listener in listeners {
            listener(state);
        }
        self.events.emit(&LedgerEvent::PushedBackSettlement {
            channel_id: *channel_id,
            deadline,
        });
        Ok(())
    }

    /// Make the next matching operation fail.
    pub fn inject_fault(&self, fault: Fault) {
        self.state.lock().faults.push(fault);
    }

    /// Subscription bookkeeping so far.
    pub fn counters(&self) -> SubscriptionCounters {
        self.state.lock().counters
    }

    /// Every transaction that reached the ledger, in order.
    pub fn transactions(&self) -> Vec<SubmittedTx> {
        self.state.lock().transactions.clone()
    }

    fn release_state_listener(state: &Weak<Mutex<LedgerState>>, id: u64) {
        if let Some(state) = state.upgrade() {
            let mut guard = state.lock();
            if guard.state_listeners.remove(&id).is_some() {
                guard.counters.state_released += 1;
            }
        }
    }

    fn release_clock_listener(state: &Weak<Mutex<LedgerState>>, id: u64) {
        if let Some(state) = state.upgrade() {
            let mut guard = state.lock();
            if guard.clock_listeners.remove(&id).is_some() {
                guard.counters.clock_released += 1;
            }
        }
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn channel_state(&self, channel_id: &ChannelId) -> LedgerResult<ChannelState> {
        let mut guard = self.state.lock();
        if guard.take_fault(Fault::Query) {
            return Err(LedgerError::Query("injected query fault".to_string()));
        }
        guard
            .channels
            .get(channel_id)
            .map(|r| r.state)
            .ok_or_else(|| LedgerError::Query(format!("unknown channel {}", channel_id)))
    }

    async fn subscribe_channel_state(
        &self,
        channel_id: &ChannelId,
        on_change: StateHandler,
    ) -> LedgerResult<Subscription> {
        let listener: StateListener = Arc::from(on_change);
        let (id, current) = {
            let mut guard = self.state.lock();
            if guard.take_fault(Fault::StateSubscription) {
                return Err(LedgerError::Subscription(
                    "injected state subscription fault".to_string(),
                ));
            }
            let current = guard
                .channels
                .get(channel_id)
                .map(|r| r.state)
                .ok_or_else(|| LedgerError::Subscription(format!("unknown channel {}", channel_id)))?;
            let id = guard.listener_id();
            guard.state_listeners.insert(id, (*channel_id, listener.clone()));
            guard.counters.state_subscribed += 1;
            (id, current)
        };

        let weak = Arc::downgrade(&self.state);
        let subscription = Subscription::new("channel-state", move || {
            MemoryLedger::release_state_listener(&weak, id);
        });

        listener(current);
        Ok(subscription)
    }

    async fn subscribe_clock(&self, on_tick: TickHandler) -> LedgerResult<Subscription> {
        let listener: ClockListener = Arc::from(on_tick);
        let (id, now) = {
            let mut guard = self.state.lock();
            if guard.take_fault(Fault::ClockSubscription) {
                return Err(LedgerError::Subscription(
                    "injected clock subscription fault".to_string(),
                ));
            }
            let id = guard.listener_id();
            guard.clock_listeners.insert(id, listener.clone());
            guard.counters.clock_subscribed += 1;
            (id, guard.now)
        };

        let weak = Arc::downgrade(&self.state);
        let subscription = Subscription::new("clock", move || {
            MemoryLedger::release_clock_listener(&weak, id);
        });

        listener(now);
        Ok(subscription)
    }

    async fn next_nonce(&self, account: &AccountId) -> LedgerResult<Nonce> {
        let mut guard = self.state.lock();
        if guard.take_fault(Fault::Nonce) {
            return Err(LedgerError::NonceUnavailable("injected nonce fault".to_string()));
        }
        Ok(guard.nonces.get(account).copied().unwrap_or_default())
    }

    async fn submit(&self, call: Call, signer: &SigningKey, nonce: Nonce) -> LedgerResult<TxOutcome> {
        let payload = call.signing_payload(nonce)?;
        let signature = signer.sign(&payload);
        signer
            .verifying_key()
            .verify(&payload, &signature)
            .map_err(|e| LedgerError::rejected(e.to_string()))?;
        let sender = account_of(signer);

        let (outcome, listeners, state, event) = {
            let mut guard = self.state.lock();
            if guard.take_fault(Fault::Submission) {
                return Err(LedgerError::Submission("injected submission fault".to_string()));
            }

            let expected = guard.nonces.get(&sender).copied().unwrap_or_default();
            if nonce != expected {
                return Err(LedgerError::rejected(format!(
                    "stale nonce: expected {}, got {}",
                    expected, nonce
                )));
            }
            guard.nonces.insert(sender, nonce.next());

            let applied = guard.apply(sender, call);
            guard.transactions.push(SubmittedTx {
                sender,
                call,
                nonce,
                accepted: applied.is_ok(),
            });

            let outcome = TxOutcome {
                tx_hash: hex::encode(sha256_concat(&[&payload, &signature.to_bytes()])),
                nonce,
                included_at: guard.now,
            };

            match applied {
                Ok((channel_id, state, event)) => {
                    let listeners = guard.state_listeners_for(&channel_id);
                    (outcome, listeners, state, event)
                }
                Err(e) => {
                    debug!(call = call.name(), error = %e, "Transaction rejected");
                    return Err(e);
                }
            }
        };

        info!(
            call = call.name(),
            sender = %sender.short(),
            nonce = %nonce,
            tx_hash = %outcome.tx_hash,
            "Transaction included"
        );

        for listener in listeners {
            listener(state);
        }
        if let Some(event) = event {
            self.events.emit(&event);
        }

        Ok(outcome)
    }
}
