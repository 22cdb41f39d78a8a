//! Clock-driven timeout poller and waiter handles.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, trace};

use chansettle_common::{ChannelId, EventId, Moment};
use chansettle_ledger::{EventRegistry, LedgerClient, Subscription};

use crate::deadline::DeadlineTracker;
use crate::error::{Result, SettleError};
use crate::metrics::SettlerMetrics;
use crate::state::SettlerPhase;
use crate::waiters::{WaiterId, WaiterQueue};

struct PollerState {
    waiters: WaiterQueue<oneshot::Sender<()>>,
    clock: Option<Subscription>,
    push_back: Option<Subscription>,
}

impl PollerState {
    /// Hand out both subscriptions once nobody is waiting.
    fn release_if_idle(&mut self) -> Vec<Subscription> {
        if self.waiters.is_empty() {
            self.take_subscriptions()
        } else {
            Vec::new()
        }
    }

    fn take_subscriptions(&mut self) -> Vec<Subscription> {
        self.clock.take().into_iter().chain(self.push_back.take()).collect()
    }
}

/// Fires registered waiters once the ledger clock passes the deadline.
///
/// Armed lazily by the first waiter that starts waiting: resolve the
/// deadline, then subscribe to the clock. The clock subscription and the
/// push-back subscription are both released on the single path that leaves
/// the waiter queue empty, whether by firing, cancellation or a failed arm.
///
/// Waiters depend on the clock subscription for liveness. If the ledger stops
/// delivering ticks, pending waiters stay pending.
pub struct TimeoutPoller {
    channel_id: ChannelId,
    ledger: Arc<dyn LedgerClient>,
    events: Arc<dyn EventRegistry>,
    tracker: Arc<DeadlineTracker>,
    phase: Arc<RwLock<SettlerPhase>>,
    metrics: Arc<SettlerMetrics>,
    state: Mutex<PollerState>,
    arm_gate: tokio::sync::Mutex<()>,
}

impl TimeoutPoller {
    pub fn new(
        channel_id: ChannelId,
        ledger: Arc<dyn LedgerClient>,
        events: Arc<dyn EventRegistry>,
        tracker: Arc<DeadlineTracker>,
        phase: Arc<RwLock<SettlerPhase>>,
        metrics: Arc<SettlerMetrics>,
    ) -> Self {
        Self {
            channel_id,
            ledger,
            events,
            tracker,
            phase,
            metrics,
            state: Mutex::new(PollerState {
                waiters: WaiterQueue::new(),
                clock: None,
                push_back: None,
            }),
            arm_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Add a waiter to the queue. Waiting on it arms the poller.
    pub fn register(self: &Arc<Self>) -> Waiter {
        let (tx, rx) = oneshot::channel();
        let id = self.state.lock().waiters.register(tx);
        self.metrics.waiter_registered();
        trace!(channel_id = %self.channel_id, waiter = %id, "Waiter registered");

        Waiter {
            id,
            rx,
            poller: Arc::clone(self),
            settled: false,
        }
    }

    /// Whether a clock subscription is live.
    pub fn is_armed(&self) -> bool {
        self.state.lock().clock.is_some()
    }

    /// Whether the push-back subscription is live.
    pub fn is_watching_push_backs(&self) -> bool {
        self.state.lock().push_back.is_some()
    }

    /// Live waiters.
    pub fn pending(&self) -> usize {
        self.state.lock().waiters.live_count()
    }

    /// Resolve the deadline and subscribe to the clock, unless already armed.
    ///
    /// A failed deadline read leaves the poller unarmed; the next waiter
    /// retries.
    #[instrument(skip(self), fields(channel_id = %self.channel_id))]
    pub async fn arm(self: &Arc<Self>) -> Result<()> {
        if self.is_armed() {
            return Ok(());
        }
        let _gate = self.arm_gate.lock().await;
        if self.is_armed() {
            return Ok(());
        }

        // Push-backs emitted while nobody was watching never reached the
        // cache, so it is re-read before use.
        self.watch_push_backs().await;
        let deadline = self.tracker.deadline().await?;

        let poller: Weak<Self> = Arc::downgrade(self);
        let subscription = self
            .ledger
            .subscribe_clock(Box::new(move |now| {
                if let Some(poller) = poller.upgrade() {
                    poller.on_tick(now);
                }
            }))
            .await?;

        // The first tick is delivered during subscribe and may already have
        // fired every waiter.
        let released = {
            let mut state = self.state.lock();
            state.clock = Some(subscription);
            state.release_if_idle()
        };
        if released.is_empty() {
            debug!(%deadline, "Timeout poller armed");
        }
        self.release(released);
        Ok(())
    }

    /// Follow push-backs for this channel. A fresh subscription also
    /// invalidates the cached deadline, which may have missed push-backs
    /// while unwatched. Returns whether a new subscription was made.
    pub async fn watch_push_backs(&self) -> bool {
        if !self.ensure_push_back_subscription() {
            return false;
        }
        self.tracker.invalidate().await;
        true
    }

    /// Subscribe to push-back events for this channel, unless subscribed.
    ///
    /// Returns whether a new subscription was made.
    fn ensure_push_back_subscription(&self) -> bool {
        if self.is_watching_push_backs() {
            return false;
        }

        let tracker = Arc::downgrade(&self.tracker);
        let subscription = self.events.on(
            EventId::pushed_back_settlement(self.channel_id),
            Box::new(move |event| {
                if let Some(tracker) = tracker.upgrade() {
                    tracker.push_back(event.deadline());
                }
            }),
        );

        let mut state = self.state.lock();
        if state.push_back.is_some() {
            drop(state);
            subscription.unsubscribe();
            return false;
        }
        state.push_back = Some(subscription);
        true
    }

    /// Handle one clock tick. Returns the waiters fired by it.
    pub fn on_tick(&self, now: Moment) -> Vec<WaiterId> {
        self.metrics.clock_tick();

        let Some(deadline) = self.tracker.cached() else {
            return Vec::new();
        };
        if !now.is_after(deadline) {
            trace!(channel_id = %self.channel_id, %now, %deadline, "Deadline not reached");
            return Vec::new();
        }

        let (fired, released) = {
            let mut state = self.state.lock();
            let fired = state.waiters.take_live();
            (fired, state.release_if_idle())
        };

        if !fired.is_empty() {
            self.mark_closed();
            info!(
                channel_id = %self.channel_id,
                %now,
                %deadline,
                waiters = fired.len(),
                "Settlement deadline passed"
            );
            self.metrics.waiters_fired(fired.len());
        }

        let ids = fired
            .into_iter()
            .map(|(id, tx)| {
                let _ = tx.send(());
                id
            })
            .collect();
        self.release(released);
        ids
    }

    /// Remove a waiter. Returns whether it was still pending.
    pub fn cancel(&self, id: WaiterId) -> bool {
        let (cancelled, released) = {
            let mut state = self.state.lock();
            match state.waiters.cancel(id) {
                Some(tx) => (Some(tx), state.release_if_idle()),
                None => (None, Vec::new()),
            }
        };

        let Some(tx) = cancelled else {
            return false;
        };
        drop(tx);
        self.metrics.waiters_cancelled(1);
        debug!(channel_id = %self.channel_id, waiter = %id, "Waiter cancelled");
        self.release(released);
        true
    }

    /// Release both subscriptions now. Pending waiters resolve with
    /// [`SettleError::Unsubscribed`]. Returns how many were pending.
    pub fn shutdown(&self) -> usize {
        let (dropped, released) = {
            let mut state = self.state.lock();
            (state.waiters.drain(), state.take_subscriptions())
        };

        let count = dropped.len();
        drop(dropped);
        if count > 0 {
            self.metrics.waiters_cancelled(count);
        }
        self.release(released);
        count
    }

    fn mark_closed(&self) {
        let mut phase = self.phase.write();
        if phase.can_transition_to(SettlerPhase::Closed) {
            *phase = SettlerPhase::Closed;
        }
    }

    fn release(&self, subscriptions: Vec<Subscription>) {
        for subscription in subscriptions {
            debug!(
                channel_id = %self.channel_id,
                subscription = subscription.label(),
                "Releasing subscription"
            );
            self.metrics.subscription_released();
            subscription.unsubscribe();
        }
    }
}

/// Handle to one pending close notification.
///
/// Dropping a waiter that has not fired cancels it.
#[must_use = "a waiter does nothing unless awaited with `closed()`"]
pub struct Waiter {
    id: WaiterId,
    rx: oneshot::Receiver<()>,
    poller: Arc<TimeoutPoller>,
    settled: bool,
}

impl Waiter {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Arm the poller and wait until the settlement deadline has passed.
    ///
    /// Fails if the deadline cannot be resolved, in which case the waiter is
    /// removed from the queue, or if the settler unsubscribes first.
    pub async fn closed(mut self) -> Result<()> {
        if let Err(e) = self.poller.arm().await {
            self.settled = true;
            self.poller.cancel(self.id);
            return Err(e);
        }

        let outcome = (&mut self.rx).await.map_err(|_| SettleError::Unsubscribed);
        self.settled = true;
        outcome
    }

    /// Stop waiting. Returns whether the waiter was still pending.
    pub fn cancel(mut self) -> bool {
        self.settled = true;
        self.poller.cancel(self.id)
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.settled {
            self.poller.cancel(self.id);
        }
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("settled", &self.settled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chansettle_common::ChannelState;
    use chansettle_crypto::SigningKey;
    use chansettle_ledger::{account_of, Fault, MemoryLedger};
    use tokio_test::{assert_pending, assert_ready, task};

    struct Fixture {
        ledger: Arc<MemoryLedger>,
        poller: Arc<TimeoutPoller>,
        tracker: Arc<DeadlineTracker>,
        phase: Arc<RwLock<SettlerPhase>>,
        channel_id: ChannelId,
    }

    fn fixture(deadline: Option<u64>) -> Fixture {
        let ledger = Arc::new(MemoryLedger::new(Moment::new(50)));
        let a = account_of(&SigningKey::generate());
        let b = account_of(&SigningKey::generate());
        let channel_id = ledger.open_channel(a, b);
        if let Some(deadline) = deadline {
            ledger.set_channel_state(
                &channel_id,
                ChannelState::PendingSettlement {
                    deadline: Moment::new(deadline),
                },
            );
        }

        let metrics = Arc::new(SettlerMetrics::new());
        let tracker = Arc::new(DeadlineTracker::new(
            channel_id,
            ledger.clone(),
            metrics.clone(),
        ));
        let phase = Arc::new(RwLock::new(SettlerPhase::AwaitingClose));
        let poller = Arc::new(TimeoutPoller::new(
            channel_id,
            ledger.clone(),
            ledger.events(),
            tracker.clone(),
            phase.clone(),
            metrics,
        ));
        Fixture {
            ledger,
            poller,
            tracker,
            phase,
            channel_id,
        }
    }

    fn push_back_listeners(f: &Fixture) -> usize {
        f.ledger
            .events()
            .listener_count(&EventId::pushed_back_settlement(f.channel_id))
    }

    #[test]
    fn test_fires_once_after_deadline() {
        let f = fixture(Some(100));
        let mut a = task::spawn(f.poller.register().closed());
        let mut b = task::spawn(f.poller.register().closed());

        assert_pending!(a.poll());
        assert_pending!(b.poll());
        assert!(f.poller.is_armed());

        f.ledger.advance_to(Moment::new(99));
        f.ledger.advance_to(Moment::new(100));
        assert!(!a.is_woken());
        assert_pending!(a.poll());

        f.ledger.advance_to(Moment::new(101));
        assert_ready!(a.poll()).unwrap();
        assert_ready!(b.poll()).unwrap();
        assert_eq!(*f.phase.read(), SettlerPhase::Closed);

        assert!(f.poller.on_tick(Moment::new(102)).is_empty());
        assert_eq!(f.poller.metrics.snapshot().waiters_fired, 2);
    }

    #[test]
    fn test_fire_order_is_registration_order() {
        let f = fixture(Some(10));
        tokio_test::block_on(f.tracker.deadline()).unwrap();
        let waiters: Vec<_> = (0..3).map(|_| f.poller.register()).collect();
        let ids: Vec<_> = waiters.iter().map(Waiter::id).collect();

        assert_eq!(f.poller.on_tick(Moment::new(11)), ids);
        for waiter in waiters {
            // Already fired; cancelling is a no-op.
            assert!(!waiter.cancel());
        }
    }

    #[test]
    fn test_empty_queue_releases_subscriptions_once() {
        let f = fixture(Some(100));
        let mut a = task::spawn(f.poller.register().closed());
        assert_pending!(a.poll());
        assert_eq!(f.ledger.counters().active_clock(), 1);
        assert_eq!(push_back_listeners(&f), 1);

        f.ledger.advance_to(Moment::new(101));
        assert_ready!(a.poll()).unwrap();
        f.ledger.advance_to(Moment::new(102));

        let counters = f.ledger.counters();
        assert_eq!(counters.clock_subscribed, 1);
        assert_eq!(counters.clock_released, 1);
        assert_eq!(push_back_listeners(&f), 0);
        assert!(!f.poller.is_armed());
        assert_eq!(f.poller.metrics.snapshot().subscriptions_released, 2);
    }

    #[test]
    fn test_push_back_moves_timeout() {
        let f = fixture(Some(100));
        let mut a = task::spawn(f.poller.register().closed());
        assert_pending!(a.poll());

        f.ledger.push_back(&f.channel_id, Moment::new(150)).unwrap();
        assert_eq!(f.tracker.cached(), Some(Moment::new(150)));

        f.ledger.advance_to(Moment::new(101));
        assert_pending!(a.poll());
        f.ledger.advance_to(Moment::new(151));
        assert_ready!(a.poll()).unwrap();
    }

    #[test]
    fn test_deadline_already_passed_fires_on_arm() {
        let f = fixture(Some(10));
        f.ledger.advance_to(Moment::new(20));

        let mut a = task::spawn(f.poller.register().closed());
        assert_ready!(a.poll()).unwrap();

        let counters = f.ledger.counters();
        assert_eq!(counters.clock_subscribed, 1);
        assert_eq!(counters.clock_released, 1);
        assert_eq!(push_back_listeners(&f), 0);
    }

    #[test]
    fn test_cancel_last_waiter_runs_cleanup() {
        let f = fixture(Some(100));
        let mut a = task::spawn(f.poller.register().closed());
        assert_pending!(a.poll());
        let b = f.poller.register();

        drop(a);
        assert!(f.poller.is_armed());
        assert_eq!(f.poller.pending(), 1);

        assert!(b.cancel());
        assert!(!f.poller.is_armed());
        assert_eq!(f.ledger.counters().clock_released, 1);
        assert_eq!(push_back_listeners(&f), 0);
        assert_eq!(f.poller.metrics.snapshot().waiters_cancelled, 2);
    }

    #[test]
    fn test_rearm_after_cleanup_resubscribes_push_back() {
        let f = fixture(Some(100));
        f.poller.register().cancel();
        let mut a = task::spawn(f.poller.register().closed());
        assert_pending!(a.poll());
        drop(a);
        assert_eq!(push_back_listeners(&f), 0);

        let mut b = task::spawn(f.poller.register().closed());
        assert_pending!(b.poll());
        assert_eq!(push_back_listeners(&f), 1);

        f.ledger.push_back(&f.channel_id, Moment::new(200)).unwrap();
        f.ledger.advance_to(Moment::new(150));
        assert_pending!(b.poll());
        f.ledger.advance_to(Moment::new(201));
        assert_ready!(b.poll()).unwrap();
    }

    #[test]
    fn test_push_back_while_idle_is_seen_on_rearm() {
        let f = fixture(Some(100));
        let mut a = task::spawn(f.poller.register().closed());
        assert_pending!(a.poll());
        drop(a);
        assert_eq!(push_back_listeners(&f), 0);

        f.ledger.push_back(&f.channel_id, Moment::new(200)).unwrap();
        assert_eq!(f.tracker.cached(), Some(Moment::new(100)));

        let mut b = task::spawn(f.poller.register().closed());
        assert_pending!(b.poll());
        assert_eq!(f.tracker.cached(), Some(Moment::new(200)));

        f.ledger.advance_to(Moment::new(150));
        assert_pending!(b.poll());
        assert_eq!(*f.phase.read(), SettlerPhase::AwaitingClose);

        f.ledger.advance_to(Moment::new(201));
        assert_ready!(b.poll()).unwrap();
        assert_eq!(*f.phase.read(), SettlerPhase::Closed);
    }

    #[test]
    fn test_failed_arm_removes_waiter_and_allows_retry() {
        let f = fixture(Some(100));
        f.ledger.inject_fault(Fault::Query);

        let mut a = task::spawn(f.poller.register().closed());
        let err = assert_ready!(a.poll()).unwrap_err();
        assert!(matches!(err, SettleError::Ledger(_)));
        assert_eq!(f.poller.pending(), 0);
        assert!(!f.poller.is_armed());

        let mut b = task::spawn(f.poller.register().closed());
        assert_pending!(b.poll());
        assert!(f.poller.is_armed());
    }

    #[test]
    fn test_clock_subscription_failure_propagates() {
        let f = fixture(Some(100));
        f.ledger.inject_fault(Fault::ClockSubscription);

        let mut a = task::spawn(f.poller.register().closed());
        assert!(assert_ready!(a.poll()).is_err());
        assert_eq!(push_back_listeners(&f), 0);
    }

    #[test]
    fn test_shutdown_resolves_waiters_unsubscribed() {
        let f = fixture(Some(100));
        let mut a = task::spawn(f.poller.register().closed());
        assert_pending!(a.poll());

        assert_eq!(f.poller.shutdown(), 1);
        assert_eq!(assert_ready!(a.poll()).unwrap_err(), SettleError::Unsubscribed);
        assert_eq!(f.ledger.counters().active_clock(), 0);
        assert_eq!(push_back_listeners(&f), 0);
        assert_eq!(f.poller.shutdown(), 0);
    }

    #[test]
    fn test_tick_before_deadline_resolved_is_ignored() {
        let f = fixture(None);
        let _a = f.poller.register();
        assert!(f.poller.on_tick(Moment::new(1_000)).is_empty());
        assert_eq!(f.poller.pending(), 1);
    }
}
