//! Fan-out of decoded push events to registered listeners.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use homelink_shared::Event;

/// Handle returned by [`ListenerRegistry::add`], used to deregister.
pub type ListenerId = u64;

/// Receives every decoded push event.
///
/// Called on the session task: hand long work off instead of doing it inline.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event);
}

impl<F> EventListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn on_event(&self, event: &Event) {
        self(event)
    }
}

/// Ordered listener list. Duplicates are allowed and nothing is removed
/// automatically.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn EventListener>)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: impl EventListener + 'static) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let listener: Arc<dyn EventListener> = Arc::new(listener);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        before != listeners.len()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener in registration order. A panicking
    /// listener is logged and skipped. Returns how many returned normally.
    pub fn dispatch(&self, event: &Event) -> usize {
        // Snapshot so listeners may add or remove listeners while running.
        let snapshot: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut delivered = 0;
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::error!(
                    "Event listener {} panicked on {} event",
                    id,
                    event.event_type
                ),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use homelink_shared::EventData;
    use serde_json::Value;
    use std::sync::Mutex;

    fn event(kind: &str) -> Event {
        Event {
            event_type: kind.to_string(),
            data: EventData::Other(Value::Null),
            origin: None,
            time_fired: None,
            context: None,
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let seen = seen.clone();
            registry.add(move |e: &Event| {
                seen.lock().unwrap().push(format!("{}:{}", name, e.event_type));
            });
        }

        assert_eq!(registry.dispatch(&event("ping")), 3);
        assert_eq!(*seen.lock().unwrap(), vec!["a:ping", "b:ping", "c:ping"]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let registry = ListenerRegistry::new();
        let count = Arc::new(AtomicU64::new(0));

        registry.add(|_: &Event| panic!("listener bug"));
        let counter = count.clone();
        registry.add(move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.dispatch(&event("state_changed")), 1);
        assert_eq!(registry.dispatch(&event("state_changed")), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove() {
        let registry = ListenerRegistry::new();
        let first = registry.add(|_: &Event| {});
        let second = registry.add(|_: &Event| {});
        assert_ne!(first, second);

        assert!(registry.remove(first));
        assert!(!registry.remove(first));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.dispatch(&event("x")), 1);
    }

    #[test]
    fn test_listener_can_register_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let inner = registry.clone();
        registry.add(move |_: &Event| {
            inner.add(|_: &Event| {});
        });

        assert_eq!(registry.dispatch(&event("x")), 1);
        assert_eq!(registry.len(), 2);
    }
}
