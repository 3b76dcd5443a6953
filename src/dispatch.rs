// src/dispatch.rs

//! Callback dispatch table.
//!
//! Transport sessions report inbound samples and query results from their own
//! worker tasks. They are never given a reference to the subscription or query
//! that should handle a callback; they hold only an opaque [`CallbackId`] and
//! the [`DispatchTable`] of the shared session that created them.
//!
//! The table is the single place where entries are inserted and removed.
//! Entries are written by the task that registers a subscription or starts a
//! query and read concurrently by transport workers, so every access goes
//! through one mutex. Listeners are always invoked *outside* the lock: a
//! callback may start a new query or close its own subscription without
//! deadlocking the table.
//!
//! Callbacks addressed to an id that is no longer registered (a late sample
//! after `close()`, or the completion of a query abandoned on timeout) are
//! dropped and logged at debug level.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;

use crate::CallbackId;

/// Receives raw samples for one subscription.
pub(crate) trait SampleListener: Send + Sync {
    fn on_sample(&self, payload: Bytes);
}

/// Receives the results of one query.
pub(crate) trait QueryListener: Send + Sync {
    fn on_reply(&self, key: &str, payload: Bytes);
    fn on_done(&self);
}

#[derive(Clone)]
enum Listener {
    Sample(Arc<dyn SampleListener>),
    Query(Arc<dyn QueryListener>),
}

/// Acquire mutex guard, ignoring poisoning
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Concurrency-safe registry mapping opaque callback ids to their owners.
pub struct DispatchTable {
    // ---
    next_id: AtomicU64,
    entries: Mutex<HashMap<CallbackId, Listener>>,
}

impl DispatchTable {
    // ---
    /// Create an empty table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn insert_sample(&self, listener: Arc<dyn SampleListener>) -> CallbackId {
        self.insert(Listener::Sample(listener))
    }

    pub(crate) fn insert_query(&self, listener: Arc<dyn QueryListener>) -> CallbackId {
        self.insert(Listener::Query(listener))
    }

    fn insert(&self, listener: Listener) -> CallbackId {
        // ---
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        lock_ignore_poison(&self.entries).insert(id, listener);
        id
    }

    /// Remove an entry.
    ///
    /// Returns `true` only for the call that actually removed it.
    pub(crate) fn remove(&self, id: CallbackId) -> bool {
        lock_ignore_poison(&self.entries).remove(&id).is_some()
    }

    fn lookup(&self, id: CallbackId) -> Option<Listener> {
        lock_ignore_poison(&self.entries).get(&id).cloned()
    }

    /// Deliver one inbound sample to the subscription registered under `id`.
    pub fn deliver_sample(&self, id: CallbackId, payload: Bytes) {
        // ---
        match self.lookup(id) {
            Some(Listener::Sample(listener)) => listener.on_sample(payload),
            Some(Listener::Query(_)) => {
                crate::log_warn!("sample addressed to query entry {id}, dropped");
            }
            None => {
                crate::log_debug!("sample for unregistered {id}, dropped");
            }
        }
    }

    /// Deliver one query result to the query registered under `id`.
    pub fn deliver_reply(&self, id: CallbackId, key: &str, payload: Bytes) {
        // ---
        match self.lookup(id) {
            Some(Listener::Query(listener)) => listener.on_reply(key, payload),
            Some(Listener::Sample(_)) => {
                crate::log_warn!("reply addressed to subscription entry {id}, dropped");
            }
            None => {
                crate::log_debug!("reply for unregistered {id} (key {key}), dropped");
            }
        }
    }

    /// Signal completion of the query registered under `id`.
    pub fn complete_query(&self, id: CallbackId) {
        // ---
        match self.lookup(id) {
            Some(Listener::Query(listener)) => listener.on_done(),
            Some(Listener::Sample(_)) => {
                crate::log_warn!("completion addressed to subscription entry {id}, dropped");
            }
            None => {
                crate::log_debug!("completion for unregistered {id}, dropped");
            }
        }
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: CallbackId) -> bool {
        lock_ignore_poison(&self.entries).contains_key(&id)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        lock_ignore_poison(&self.entries).len()
    }

    /// Whether the table has no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        // ---
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[derive(Default)]
    struct Recorder {
        samples: Mutex<Vec<Bytes>>,
        replies: Mutex<Vec<String>>,
        done: AtomicU64,
    }

    impl SampleListener for Recorder {
        fn on_sample(&self, payload: Bytes) {
            self.samples.lock().unwrap().push(payload);
        }
    }

    impl QueryListener for Recorder {
        fn on_reply(&self, key: &str, _payload: Bytes) {
            self.replies.lock().unwrap().push(key.to_string());
        }

        fn on_done(&self) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_ids_are_never_reused() {
        // ---
        let table = DispatchTable::new();
        let rec = Arc::new(Recorder::default());

        let a = table.insert_sample(rec.clone());
        assert!(table.remove(a));
        let b = table.insert_sample(rec);

        assert_ne!(a, b);
        assert!(!table.contains(a));
        assert!(table.contains(b));
    }

    #[test]
    fn test_remove_is_exactly_once() {
        // ---
        let table = DispatchTable::new();
        let id = table.insert_query(Arc::new(Recorder::default()));

        assert_eq!(table.len(), 1);
        assert!(table.remove(id));
        assert!(!table.remove(id));
        assert!(table.is_empty());
    }

    #[test]
    fn test_delivery_routes_by_kind() {
        // ---
        let table = DispatchTable::new();
        let sub = Arc::new(Recorder::default());
        let query = Arc::new(Recorder::default());

        let sub_id = table.insert_sample(sub.clone());
        let query_id = table.insert_query(query.clone());

        table.deliver_sample(sub_id, Bytes::from_static(b"s1"));
        table.deliver_reply(query_id, "kv/a", Bytes::from_static(b"r1"));
        table.complete_query(query_id);

        // Misaddressed callbacks are dropped.
        table.deliver_sample(query_id, Bytes::from_static(b"x"));
        table.deliver_reply(sub_id, "kv/b", Bytes::from_static(b"x"));

        assert_eq!(sub.samples.lock().unwrap().len(), 1);
        assert_eq!(*query.replies.lock().unwrap(), vec!["kv/a".to_string()]);
        assert_eq!(query.done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_delivery_after_remove_is_dropped() {
        // ---
        let table = DispatchTable::new();
        let rec = Arc::new(Recorder::default());
        let id = table.insert_sample(rec.clone());

        table.remove(id);
        table.deliver_sample(id, Bytes::from_static(b"late"));

        assert!(rec.samples.lock().unwrap().is_empty());
    }

    struct Reentrant {
        table: Arc<DispatchTable>,
        own_id: Mutex<Option<CallbackId>>,
    }

    impl SampleListener for Reentrant {
        fn on_sample(&self, _payload: Bytes) {
            // Closing from inside a callback must not deadlock the table.
            if let Some(id) = self.own_id.lock().unwrap().take() {
                self.table.remove(id);
            }
        }
    }

    #[test]
    fn test_listener_may_remove_itself() {
        // ---
        let table = DispatchTable::new();
        let listener = Arc::new(Reentrant {
            table: table.clone(),
            own_id: Mutex::new(None),
        });
        let id = table.insert_sample(listener.clone());
        *listener.own_id.lock().unwrap() = Some(id);

        table.deliver_sample(id, Bytes::from_static(b"bye"));

        assert!(!table.contains(id));
    }
}
