//! Publish/subscribe registry for ledger events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;

use chansettle_common::{EventId, LedgerEvent};

use crate::subscription::Subscription;

/// Callback invoked with each published event.
pub type EventHandler = Box<dyn Fn(&LedgerEvent) + Send + Sync>;

/// Registry of event listeners keyed by [`EventId`].
pub trait EventRegistry: Send + Sync {
    /// Listen for every event published under `event_id`.
    fn on(&self, event_id: EventId, handler: EventHandler) -> Subscription;

    /// Listen for the next event published under `event_id` only.
    fn once(&self, event_id: EventId, handler: EventHandler) -> Subscription;
}

struct Listener {
    id: u64,
    once: bool,
    handler: Arc<dyn Fn(&LedgerEvent) + Send + Sync>,
}

type ListenerMap = DashMap<EventId, Vec<Listener>>;

/// In-process event registry.
///
/// Listeners are called outside of any internal lock, so a handler may
/// subscribe or unsubscribe while it is being dispatched.
pub struct EventBus {
    listeners: Arc<ListenerMap>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Publish an event. Returns the number of listeners notified.
    pub fn emit(&self, event: &LedgerEvent) -> usize {
        let event_id = event.id();

        let handlers: Vec<Arc<dyn Fn(&LedgerEvent) + Send + Sync>> = {
            let Some(mut entry) = self.listeners.get_mut(&event_id) else {
                return 0;
            };
            let handlers = entry.iter().map(|l| l.handler.clone()).collect();
            entry.retain(|l| !l.once);
            handlers
        };
        self.listeners.remove_if(&event_id, |_, v| v.is_empty());

        debug!(event = %event_id, listeners = handlers.len(), "Dispatching ledger event");
        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    /// Number of listeners registered for `event_id`.
    pub fn listener_count(&self, event_id: &EventId) -> usize {
        self.listeners.get(event_id).map(|v| v.len()).unwrap_or(0)
    }

    fn register(&self, event_id: EventId, handler: EventHandler, once: bool) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.entry(event_id).or_default().push(Listener {
            id,
            once,
            handler: Arc::from(handler),
        });

        let listeners: Weak<ListenerMap> = Arc::downgrade(&self.listeners);
        Subscription::new("event", move || {
            if let Some(listeners) = listeners.upgrade() {
                if let Some(mut entry) = listeners.get_mut(&event_id) {
                    entry.retain(|l| l.id != id);
                }
                listeners.remove_if(&event_id, |_, v| v.is_empty());
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry for EventBus {
    fn on(&self, event_id: EventId, handler: EventHandler) -> Subscription {
        self.register(event_id, handler, false)
    }

    fn once(&self, event_id: EventId, handler: EventHandler) -> Subscription {
        self.register(event_id, handler, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chansettle_common::{ChannelId, Moment};
    use parking_lot::Mutex;

    fn pushed_back(channel_id: ChannelId, deadline: u64) -> LedgerEvent {
        LedgerEvent::PushedBackSettlement {
            channel_id,
            deadline: Moment::new(deadline),
        }
    }

    #[test]
    fn test_on_receives_every_event() {
        let bus = EventBus::new();
        let channel_id = ChannelId::from_bytes([1; 32]);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let _sub = bus.on(
            EventId::pushed_back_settlement(channel_id),
            Box::new(move |e| s.lock().push(e.deadline())),
        );

        bus.emit(&pushed_back(channel_id, 10));
        bus.emit(&pushed_back(channel_id, 20));

        assert_eq!(*seen.lock(), vec![Moment::new(10), Moment::new(20)]);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let bus = EventBus::new();
        let channel_id = ChannelId::from_bytes([1; 32]);
        let seen = Arc::new(Mutex::new(0));

        let s = seen.clone();
        let _sub = bus.once(
            EventId::pushed_back_settlement(channel_id),
            Box::new(move |_| *s.lock() += 1),
        );

        assert_eq!(bus.emit(&pushed_back(channel_id, 10)), 1);
        assert_eq!(bus.emit(&pushed_back(channel_id, 20)), 0);
        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn test_events_are_scoped_by_channel() {
        let bus = EventBus::new();
        let mine = ChannelId::from_bytes([1; 32]);
        let other = ChannelId::from_bytes([2; 32]);

        let _sub = bus.on(EventId::pushed_back_settlement(mine), Box::new(|_| {}));

        assert_eq!(bus.emit(&pushed_back(other, 10)), 0);
        assert_eq!(bus.emit(&pushed_back(mine, 10)), 1);
    }

    #[test]
    fn test_unsubscribe_removes_listener() {
        let bus = EventBus::new();
        let channel_id = ChannelId::from_bytes([1; 32]);
        let event_id = EventId::pushed_back_settlement(channel_id);

        let sub = bus.on(event_id, Box::new(|_| {}));
        assert_eq!(bus.listener_count(&event_id), 1);

        sub.unsubscribe();
        assert_eq!(bus.listener_count(&event_id), 0);
        assert_eq!(bus.emit(&pushed_back(channel_id, 10)), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let bus = EventBus::new();
        let channel_id = ChannelId::from_bytes([1; 32]);
        let event_id = EventId::pushed_back_settlement(channel_id);
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let s = slot.clone();
        let sub = bus.on(
            event_id,
            Box::new(move |_| {
                if let Some(sub) = s.lock().take() {
                    sub.unsubscribe();
                }
            }),
        );
        *slot.lock() = Some(sub);

        assert_eq!(bus.emit(&pushed_back(channel_id, 10)), 1);
        assert_eq!(bus.listener_count(&event_id), 0);
    }
}
