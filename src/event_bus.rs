//! Per-connection publish/subscribe for [`RoomEvent`]s.
//!
//! Listeners are keyed by [`EventKind`] and run synchronously, in
//! registration order, on the task that emits. [`EventBus::emit`] iterates a
//! snapshot of the list taken when dispatch starts, so listeners may add or
//! remove listeners (including themselves) while running; such changes apply
//! from the next dispatch on.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::event::{EventKind, RoomEvent};

/// A registered callback.
pub type Listener = Arc<dyn Fn(&RoomEvent) + Send + Sync>;

/// Identifies one registration. Registering the same closure twice yields
/// two ids and two invocations per dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
}

impl Registry {
    fn remove(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(list) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(&kind);
        }
        removed
    }
}

/// Event-name to ordered-listeners table. Cloning shares the table.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` to the list for `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&RoomEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry
            .listeners
            .lock()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        tracing::trace!(event = %kind, ?id, "listener added");
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }

    /// Remove one registration. Returns `false` (and does nothing) if it was
    /// not registered.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.registry.remove(kind, id)
    }

    /// Drop every listener for `kind`, or every listener when `kind` is `None`.
    pub fn remove_all_listeners(&self, kind: Option<EventKind>) {
        let mut listeners = self.registry.listeners.lock();
        match kind {
            Some(kind) => {
                listeners.remove(&kind);
            }
            None => listeners.clear(),
        }
    }

    /// Number of listeners currently registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.registry
            .listeners
            .lock()
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invoke every listener for the event's kind. Returns how many ran.
    pub fn emit(&self, event: &RoomEvent) -> usize {
        let snapshot: Vec<Listener> = {
            let listeners = self.registry.listeners.lock();
            match listeners.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
                None => return 0,
            }
        };
        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.registry.listeners.lock();
        let mut map = f.debug_map();
        for (kind, list) in listeners.iter() {
            map.entry(kind, &list.len());
        }
        map.finish()
    }
}

/// Handle returned by [`EventBus::on`].
///
/// Dropping the handle does **not** remove the listener; call
/// [`unsubscribe`](Subscription::unsubscribe).
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<Registry>,
    kind: EventKind,
    id: ListenerId,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Remove the listener. Returns `false` if it was already removed or the
    /// bus is gone.
    pub fn unsubscribe(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.kind, self.id),
            None => false,
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::ErrorPayload;
    use std::sync::atomic::AtomicUsize;

    fn error_event() -> RoomEvent {
        RoomEvent::Error(ErrorPayload {
            message: "boom".into(),
            code: None,
        })
    }

    fn recorder(
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl Fn(&RoomEvent) + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |_| log.lock().push(name)
    }

    #[test]
    fn dispatches_in_registration_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on(EventKind::Error, recorder(&log, "a"));
        bus.on(EventKind::Error, recorder(&log, "b"));
        bus.on(EventKind::Error, recorder(&log, "c"));

        assert_eq!(bus.emit(&error_event()), 3);
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn only_matching_kind_runs() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on(EventKind::Chat, recorder(&log, "chat"));
        assert_eq!(bus.emit(&error_event()), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn duplicate_registration_runs_twice() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let listener = {
            let hits = Arc::clone(&hits);
            move |_: &RoomEvent| {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        };
        bus.on(EventKind::Error, listener.clone());
        bus.on(EventKind::Error, listener);

        bus.emit(&error_event());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn off_unknown_listener_is_noop() {
        let bus = EventBus::new();
        let sub = bus.on(EventKind::Error, |_| {});
        assert!(bus.off(EventKind::Error, sub.id()));
        assert!(!bus.off(EventKind::Error, sub.id()));
        assert!(!sub.unsubscribe());
        assert!(!bus.off(EventKind::Chat, sub.id()));
    }

    #[test]
    fn removal_during_dispatch_applies_to_next_dispatch() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let victim: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        {
            let victim = Arc::clone(&victim);
            let log = Arc::clone(&log);
            bus.on(EventKind::Error, move |_| {
                log.lock().push("remover");
                if let Some(sub) = victim.lock().take() {
                    sub.unsubscribe();
                }
            });
        }
        let sub = bus.on(EventKind::Error, recorder(&log, "victim"));
        *victim.lock() = Some(sub);

        bus.emit(&error_event());
        assert_eq!(*log.lock(), vec!["remover", "victim"]);

        log.lock().clear();
        bus.emit(&error_event());
        assert_eq!(*log.lock(), vec!["remover"]);
    }

    #[test]
    fn listener_added_during_dispatch_waits_for_next_dispatch() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let bus_handle = bus.clone();
            let hits = Arc::clone(&hits);
            bus.on(EventKind::Error, move |_| {
                let hits = Arc::clone(&hits);
                bus_handle.on(EventKind::Error, move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                });
            });
        }
        bus.emit(&error_event());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.emit(&error_event());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_all_for_one_kind_or_everything() {
        let bus = EventBus::new();
        bus.on(EventKind::Error, |_| {});
        bus.on(EventKind::Chat, |_| {});
        bus.on(EventKind::Chat, |_| {});

        bus.remove_all_listeners(Some(EventKind::Chat));
        assert_eq!(bus.listener_count(EventKind::Chat), 0);
        assert_eq!(bus.listener_count(EventKind::Error), 1);

        bus.remove_all_listeners(None);
        assert_eq!(bus.listener_count(EventKind::Error), 0);
    }

    #[test]
    fn subscription_outliving_bus_is_harmless() {
        let sub = {
            let bus = EventBus::new();
            bus.on(EventKind::Error, |_| {})
        };
        assert!(!sub.unsubscribe());
    }
}
