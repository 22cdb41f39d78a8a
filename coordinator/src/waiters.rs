//! Ordered queue of one-shot close notifications.
//!
//! Entries are tombstoned in place when they fire or are cancelled, then
//! trimmed from the tail. A tombstone in the middle of the queue stays until
//! every entry behind it is gone; memory held by such interior tombstones is
//! bounded by the number of waiters registered since the queue last emptied.

use std::fmt;

/// Identifier of a registered waiter, unique within one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl WaiterId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "waiter-{}", self.0)
    }
}

enum Slot<N> {
    Live(WaiterId, N),
    Dead(WaiterId),
}

impl<N> Slot<N> {
    fn id(&self) -> WaiterId {
        match self {
            Slot::Live(id, _) | Slot::Dead(id) => *id,
        }
    }

    fn is_live(&self) -> bool {
        matches!(self, Slot::Live(..))
    }

    /// Tombstone the slot, returning its notifier if it was live.
    fn kill(&mut self) -> Option<N> {
        let id = self.id();
        match std::mem::replace(self, Slot::Dead(id)) {
            Slot::Live(_, notify) => Some(notify),
            Slot::Dead(_) => None,
        }
    }
}

/// Waiters in registration order.
///
/// `N` is whatever notifies the waiter; the queue only hands it back, so a
/// notifier can be consumed at most once. After every mutation the last
/// slot is live or the queue is empty, which makes [`WaiterQueue::is_empty`]
/// equivalent to "no live waiters".
pub struct WaiterQueue<N> {
    slots: Vec<Slot<N>>,
    next_id: u64,
}

impl<N> WaiterQueue<N> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_id: 1,
        }
    }

    /// Append a live waiter.
    pub fn register(&mut self, notify: N) -> WaiterId {
        let id = WaiterId(self.next_id);
        self.next_id += 1;
        self.slots.push(Slot::Live(id, notify));
        id
    }

    /// Tombstone every live waiter and hand back their notifiers in
    /// registration order.
    pub fn take_live(&mut self) -> Vec<(WaiterId, N)> {
        let fired = self
            .slots
            .iter_mut()
            .filter_map(|slot| {
                let id = slot.id();
                slot.kill().map(|notify| (id, notify))
            })
            .collect();
        self.compact();
        fired
    }

    /// Remove one waiter. Returns its notifier if it was still live.
    pub fn cancel(&mut self, id: WaiterId) -> Option<N> {
        // Slots stay sorted by id: ids only grow and slots are only appended.
        let index = self.slots.binary_search_by_key(&id, Slot::id).ok()?;
        let notify = self.slots[index].kill();
        self.compact();
        notify
    }

    /// Trim tombstones from the tail. Returns how many were removed.
    fn compact(&mut self) -> usize {
        let before = self.slots.len();
        while matches!(self.slots.last(), Some(Slot::Dead(_))) {
            self.slots.pop();
        }
        before - self.slots.len()
    }

    /// Remove every slot, handing back the live notifiers.
    pub fn drain(&mut self) -> Vec<(WaiterId, N)> {
        self.slots
            .drain(..)
            .filter_map(|slot| match slot {
                Slot::Live(id, notify) => Some((id, notify)),
                Slot::Dead(_) => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots held, tombstones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_live()).count()
    }

    pub fn contains(&self, id: WaiterId) -> bool {
        self.slots
            .binary_search_by_key(&id, Slot::id)
            .map(|index| self.slots[index].is_live())
            .unwrap_or(false)
    }
}

impl<N> Default for WaiterQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> fmt::Debug for WaiterQueue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaiterQueue")
            .field("slots", &self.slots.len())
            .field("live", &self.live_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_take_live_in_registration_order() {
        let mut queue = WaiterQueue::new();
        queue.register("a");
        queue.register("b");
        queue.register("c");

        let fired: Vec<_> = queue.take_live().into_iter().map(|(_, n)| n).collect();
        assert_eq!(fired, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
        assert!(queue.take_live().is_empty());
    }

    #[test]
    fn test_cancel_tail_compacts() {
        let mut queue = WaiterQueue::new();
        let a = queue.register(());
        let b = queue.register(());

        assert!(queue.cancel(b).is_some());
        assert_eq!(queue.len(), 1);
        assert!(queue.cancel(a).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_interior_tombstone_is_retained() {
        let mut queue = WaiterQueue::new();
        let a = queue.register(());
        let b = queue.register(());
        let c = queue.register(());

        queue.cancel(b);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.live_count(), 2);
        assert!(!queue.contains(b));

        queue.cancel(c);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(a));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut queue = WaiterQueue::new();
        let a = queue.register(());
        let _b = queue.register(());

        assert!(queue.cancel(a).is_some());
        assert!(queue.cancel(a).is_none());
        assert!(queue.cancel(WaiterId(99)).is_none());
        assert_eq!(queue.live_count(), 1);
    }

    #[test]
    fn test_fired_waiter_cannot_be_cancelled() {
        let mut queue = WaiterQueue::new();
        let a = queue.register(());
        queue.take_live();
        assert!(queue.cancel(a).is_none());
    }

    #[test]
    fn test_drain_skips_tombstones() {
        let mut queue = WaiterQueue::new();
        let a = queue.register(1);
        let _b = queue.register(2);
        queue.cancel(a);

        let drained: Vec<_> = queue.drain().into_iter().map(|(_, n)| n).collect();
        assert_eq!(drained, vec![2]);
        assert!(queue.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register,
        Cancel(usize),
        Fire,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Register),
            2 => (0usize..32).prop_map(Op::Cancel),
            1 => Just(Op::Fire),
        ]
    }

    proptest! {
        #[test]
        fn prop_each_waiter_resolves_at_most_once(ops in proptest::collection::vec(op(), 0..64)) {
            let mut queue = WaiterQueue::new();
            let mut registered = Vec::new();
            let mut resolved = std::collections::HashSet::new();

            for op in ops {
                match op {
                    Op::Register => {
                        let id = queue.register(registered.len());
                        registered.push(id);
                    }
                    Op::Cancel(i) => {
                        if let Some(id) = registered.get(i).copied() {
                            if let Some(n) = queue.cancel(id) {
                                prop_assert!(resolved.insert(n));
                            }
                        }
                    }
                    Op::Fire => {
                        let fired = queue.take_live();
                        let order: Vec<_> = fired.iter().map(|(id, _)| *id).collect();
                        let mut sorted = order.clone();
                        sorted.sort();
                        prop_assert_eq!(order, sorted);
                        for (_, n) in fired {
                            prop_assert!(resolved.insert(n));
                        }
                        prop_assert!(queue.is_empty());
                    }
                }

                // Tail is always live, so emptiness means nobody is waiting.
                prop_assert_eq!(queue.is_empty(), queue.live_count() == 0);
                prop_assert_eq!(
                    queue.live_count() + resolved.len(),
                    registered.len()
                );
            }
        }
    }
}
