//! Event fan-out.
//!
//! The [`Dispatcher`] maps event names to an ordered list of listeners. The
//! connection manager feeds decoded frames and lifecycle events into it; the
//! state store and any number of UI consumers subscribe independently.
//!
//! Dispatch is synchronous. Listeners for one event run in subscription order
//! and each one runs inside its own panic boundary, so a failing listener is
//! logged and the rest still run.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, trace};

/// Position of an event within the connection that produced it.
///
/// `epoch` increments every time a transport is (re)established; `seq` is a
/// per-epoch counter starting at 1. Locally generated events use the epoch
/// that was current when they were raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EventMeta {
    pub epoch: u64,
    pub seq: u64,
}

impl EventMeta {
    pub fn new(epoch: u64, seq: u64) -> Self {
        Self { epoch, seq }
    }
}

/// One event as handed to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedEvent {
    pub name: String,
    pub args: Vec<String>,
    pub meta: EventMeta,
}

impl DispatchedEvent {
    pub fn new(name: impl Into<String>, args: Vec<String>, meta: EventMeta) -> Self {
        Self {
            name: name.into(),
            args,
            meta,
        }
    }

    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

/// Opaque handle returned by [`Dispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Listener callback.
pub type Listener = Arc<dyn Fn(&DispatchedEvent) + Send + Sync>;

struct Entry {
    id: SubscriptionId,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    by_event: HashMap<String, Vec<Entry>>,
    /// Event name per subscription, for O(1) lookup on unsubscribe.
    index: HashMap<SubscriptionId, String>,
    closed: bool,
}

/// Event name → ordered listeners.
///
/// Cloning a `Dispatcher` yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscriptions", &self.subscription_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `listener` for `event`. The listener stays registered until
    /// [`unsubscribe`](Self::unsubscribe) or [`close`](Self::close).
    pub fn subscribe<F>(&self, event: impl Into<String>, listener: F) -> SubscriptionId
    where
        F: Fn(&DispatchedEvent) + Send + Sync + 'static,
    {
        let event = event.into();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut registry = self.lock();
        if registry.closed {
            debug!(%event, %id, "subscribe on closed dispatcher ignored");
            return id;
        }
        registry.index.insert(id, event.clone());
        registry.by_event.entry(event).or_default().push(Entry {
            id,
            listener: Arc::new(listener),
        });
        id
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.lock();
        let Some(event) = registry.index.remove(&id) else {
            return false;
        };
        if let Some(entries) = registry.by_event.get_mut(&event) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                registry.by_event.remove(&event);
            }
        }
        true
    }

    /// Deliver `event` to every listener registered for its name, in
    /// subscription order. Unknown names with no listeners are a no-op.
    pub fn dispatch(&self, event: &DispatchedEvent) {
        // Snapshot the listeners so callbacks may subscribe or unsubscribe
        // without deadlocking. Listeners added during this dispatch wait for
        // the next one; listeners removed during it are skipped.
        let listeners: Vec<(SubscriptionId, Listener)> = {
            let registry = self.lock();
            if registry.closed {
                return;
            }
            match registry.by_event.get(&event.name) {
                Some(entries) => entries
                    .iter()
                    .map(|entry| (entry.id, Arc::clone(&entry.listener)))
                    .collect(),
                None => {
                    trace!(event = %event.name, "no listeners");
                    return;
                }
            }
        };

        for (id, listener) in listeners {
            if !self.is_registered(id) {
                trace!(event = %event.name, subscription = %id, "listener removed mid-dispatch");
                continue;
            }
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            if let Err(payload) = result {
                let message = panic_message(payload.as_ref());
                error!(
                    event = %event.name,
                    subscription = %id,
                    %message,
                    "listener failed, continuing with remaining listeners"
                );
            }
        }
    }

    fn is_registered(&self, id: SubscriptionId) -> bool {
        let registry = self.lock();
        !registry.closed && registry.index.contains_key(&id)
    }

    /// Convenience wrapper around [`dispatch`](Self::dispatch).
    pub fn emit(&self, name: &str, args: Vec<String>, meta: EventMeta) {
        self.dispatch(&DispatchedEvent::new(name, args, meta));
    }

    /// Drop every subscription and ignore further dispatches.
    pub fn close(&self) {
        let mut registry = self.lock();
        let count = registry.index.len();
        registry.by_event.clear();
        registry.index.clear();
        registry.closed = true;
        debug!(subscriptions = count, "dispatcher closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().index.len()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.lock().by_event.get(event).map_or(0, Vec::len)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
