//! Ordered observer registry shared between a [`Selector`](crate::Selector)
//! and the demuxes attached to it.

use std::sync::{Arc, Mutex};

use crate::ChannelObserver;
use crate::mutex::PortMutex;

/// Identifies one registration. Handles are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

enum SlotState {
    Active(Arc<dyn ChannelObserver>),
    Removed,
}

struct Slot {
    handle: ObserverHandle,
    state: SlotState,
}

#[derive(Default)]
struct Slots {
    next_id: u64,
    slots: Vec<Slot>,
}

impl Slots {
    fn drop_removed(&mut self) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|slot| matches!(slot.state, SlotState::Active(_)));
        before - self.slots.len()
    }
}

/// Cloneable handle to the observer list of one selector.
///
/// Registration order is notification order. Unregistered slots stay in
/// place, tagged as removed, until the selector compacts the list at the
/// end of a full scan cycle or the next observer is registered.
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    inner: Arc<Mutex<Slots>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn ChannelObserver>) -> ObserverHandle {
        self.inner.with_lock(|slots| {
            // a stopped selector never wraps, so removed slots go here too
            slots.drop_removed();
            let handle = ObserverHandle(slots.next_id);
            slots.next_id += 1;
            slots.slots.push(Slot {
                handle,
                state: SlotState::Active(observer),
            });
            handle
        })
    }

    /// Returns `false` if the handle is unknown or already unregistered.
    pub fn unregister(&self, handle: ObserverHandle) -> bool {
        self.inner.with_lock(|slots| {
            match slots.slots.iter_mut().find(|slot| slot.handle == handle) {
                Some(slot) if matches!(slot.state, SlotState::Active(_)) => {
                    slot.state = SlotState::Removed;
                    true
                }
                _ => false,
            }
        })
    }

    pub fn is_registered(&self, handle: ObserverHandle) -> bool {
        self.inner.with_lock(|slots| {
            slots
                .slots
                .iter()
                .any(|slot| slot.handle == handle && matches!(slot.state, SlotState::Active(_)))
        })
    }

    /// Number of active observers.
    pub fn len(&self) -> usize {
        self.inner.with_lock(|slots| {
            slots
                .slots
                .iter()
                .filter(|slot| matches!(slot.state, SlotState::Active(_)))
                .count()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the active observers into `out`, in notification order.
    ///
    /// The scan thread calls observers from this copy so that an observer
    /// may register or unregister without deadlocking.
    pub(crate) fn snapshot(&self, out: &mut Vec<Arc<dyn ChannelObserver>>) {
        out.clear();
        self.inner.with_lock(|slots| {
            out.extend(slots.slots.iter().filter_map(|slot| match &slot.state {
                SlotState::Active(observer) => Some(Arc::clone(observer)),
                SlotState::Removed => None,
            }));
        });
    }

    /// Drop removed slots, keeping survivors in order. Returns how many were dropped.
    pub(crate) fn compact(&self) -> usize {
        self.inner.with_lock(Slots::drop_removed)
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.inner.with_lock(|slots| slots.slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SelectorIndex;

    fn tagged(log: &Arc<Mutex<Vec<u8>>>, tag: u8) -> Arc<dyn ChannelObserver> {
        let log = Arc::clone(log);
        Arc::new(move |_index: SelectorIndex| log.with_lock(|log| log.push(tag)))
    }

    fn notify_all(registry: &ObserverRegistry) {
        let mut observers = Vec::new();
        registry.snapshot(&mut observers);
        for observer in &observers {
            observer.on_channel(SelectorIndex::FIRST);
        }
    }

    #[test]
    fn test_notification_follows_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        registry.register(tagged(&log, 1));
        registry.register(tagged(&log, 2));
        registry.register(tagged(&log, 3));

        notify_all(&registry);
        assert_eq!(log.with_lock(|log| log.clone()), vec![1, 2, 3]);
    }

    #[test]
    fn test_unregister_then_compact() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ObserverRegistry::new();
        let first = registry.register(tagged(&log, 1));
        let second = registry.register(tagged(&log, 2));
        registry.register(tagged(&log, 3));

        assert!(registry.unregister(second));
        assert!(!registry.unregister(second));
        assert!(!registry.is_registered(second));
        assert!(registry.is_registered(first));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.slot_count(), 3);

        notify_all(&registry);
        assert_eq!(log.with_lock(|log| log.clone()), vec![1, 3]);

        assert_eq!(registry.compact(), 1);
        assert_eq!(registry.slot_count(), 2);

        registry.register(tagged(&log, 4));
        log.with_lock(|log| log.clear());
        notify_all(&registry);
        assert_eq!(log.with_lock(|log| log.clone()), vec![1, 3, 4]);
    }

    #[test]
    fn test_register_reclaims_removed_slots() {
        let registry = ObserverRegistry::new();
        let noop: Arc<dyn ChannelObserver> = Arc::new(|_index: SelectorIndex| {});

        for _ in 0..10_000 {
            let handle = registry.register(Arc::clone(&noop));
            assert!(registry.unregister(handle));
        }
        assert!(registry.is_empty());
        assert!(registry.slot_count() <= 1, "{}", registry.slot_count());

        let log = Arc::new(Mutex::new(Vec::new()));
        let kept = registry.register(tagged(&log, 7));
        assert_eq!(registry.slot_count(), 1);
        assert!(registry.is_registered(kept));
    }

    #[test]
    fn test_observer_may_unregister_itself() {
        let registry = ObserverRegistry::new();
        let handle_cell: Arc<Mutex<Option<ObserverHandle>>> = Arc::new(Mutex::new(None));

        let reg = registry.clone();
        let cell = Arc::clone(&handle_cell);
        let handle = registry.register(Arc::new(move |_index: SelectorIndex| {
            if let Some(handle) = cell.with_lock(|h| *h) {
                reg.unregister(handle);
            }
        }));
        handle_cell.with_lock(|h| *h = Some(handle));

        notify_all(&registry);
        assert!(registry.is_empty());
    }
}
