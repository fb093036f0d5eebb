//! Append-listener registry.
//!
//! Event stores notify listeners **after** a successful append (or republish),
//! passing the stream name and the appended events in order. Listeners are
//! synchronous callbacks; anything slow belongs behind a queue
//! (the `EventQueue` in `eventmill-infra` is the intended consumer).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::Event;

/// Callback invoked with `(stream, events)` after every append.
pub type AppendListener = Arc<dyn Fn(&str, &[Event]) + Send + Sync>;

/// Handle returned by [`ListenerRegistry::attach`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Fan-out of append notifications.
///
/// - No IO / no async
/// - Listeners are invoked outside the internal lock, so a listener may
///   attach or detach other listeners
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, AppendListener)>>,
}

impl core::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, listener: AppendListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        // A poisoned registry still accepts listeners; the data is a plain Vec.
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push((id, listener));
        id
    }

    /// Returns `false` when the id was not attached.
    pub fn detach(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn notify(&self, stream: &str, events: &[Event]) {
        if events.is_empty() {
            return;
        }
        let snapshot: Vec<AppendListener> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in snapshot {
            listener(stream, events);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn notifies_attached_listeners_until_detached() {
        let registry = ListenerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));

        let sink = Arc::clone(&seen);
        let id = registry.attach(Arc::new(move |stream, events| {
            let mut seen = sink.lock().unwrap();
            for e in events {
                seen.push(format!("{stream}:{}", e.name));
            }
        }));

        registry.notify("orders", &[Event::new("A", json!({})), Event::new("B", json!({}))]);
        assert!(registry.detach(id));
        assert!(!registry.detach(id));
        registry.notify("orders", &[Event::new("C", json!({}))]);

        assert_eq!(*seen.lock().unwrap(), vec!["orders:A", "orders:B"]);
        assert!(registry.is_empty());
    }

    #[test]
    fn listener_may_detach_itself() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot = Arc::new(Mutex::new(None::<ListenerId>));

        let reg = Arc::clone(&registry);
        let own = Arc::clone(&slot);
        let id = registry.attach(Arc::new(move |_, _| {
            if let Some(id) = *own.lock().unwrap() {
                reg.detach(id);
            }
        }));
        *slot.lock().unwrap() = Some(id);

        registry.notify("s", &[Event::new("A", json!({}))]);
        assert!(registry.is_empty());
    }
}
