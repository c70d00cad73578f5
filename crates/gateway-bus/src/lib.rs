//! In-process topic pub/sub.
//!
//! Ported from the Python `SimpleEventBus`: a `Mutex`-guarded registry of
//! subscribers keyed by topic, `publish` iterating a snapshot of the
//! subscriber list and invoking each handler behind `catch_unwind` so one
//! handler's panic can't take down the publisher or starve later
//! subscribers. Subscription order is preserved, matching the "FIFO per
//! topic" delivery guarantee.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use gateway_protocol::Envelope;
use tracing::error;

pub type Handler = Arc<dyn Fn(&Envelope, &str, &str) + Send + Sync>;

struct Subscription {
    id: u64,
    handler: Handler,
}

/// The event bus. Cheap to clone (an `Arc` internally); every clone shares
/// the same subscriber registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    subscribers: Mutex<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `handler` on `topic`. Returns a subscription id usable with
    /// [`EventBus::unsubscribe`].
    pub fn subscribe(&self, topic: impl Into<String>, handler: Handler) -> u64 {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.inner.subscribers.lock().expect("subscriber lock poisoned");
        subs.entry(topic.into()).or_default().push(Subscription { id, handler });
        id
    }

    /// Remove a subscription. Idempotent: unsubscribing an unknown id is a no-op.
    pub fn unsubscribe(&self, subscription_id: u64) {
        let mut subs = self.inner.subscribers.lock().expect("subscriber lock poisoned");
        for handlers in subs.values_mut() {
            handlers.retain(|s| s.id != subscription_id);
        }
    }

    /// Synchronously fan `envelope` out to every subscriber of `topic`, in
    /// subscription order. A handler that panics is logged and skipped;
    /// later handlers still run. Never fails.
    pub fn publish(&self, topic: &str, envelope: &Envelope, source: &str) {
        let snapshot: Vec<Handler> = {
            let subs = self.inner.subscribers.lock().expect("subscriber lock poisoned");
            match subs.get(topic) {
                Some(handlers) => handlers.iter().map(|s| s.handler.clone()).collect(),
                None => return,
            }
        };
        for handler in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| handler(envelope, topic, source)));
            if let Err(panic) = result {
                let msg = panic_message(&panic);
                error!(topic, source, error = %msg, "event bus subscriber panicked");
            }
        }
    }

    /// Clear every subscription. Test-only: mirrors the Python bus's
    /// `reset()` used to isolate test cases from each other.
    pub fn reset(&self) {
        self.inner.subscribers.lock().expect("subscriber lock poisoned").clear();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
