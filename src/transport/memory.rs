// src/transport/memory.rs

//! In-memory transport session.
//!
//! This module provides a pure in-process implementation of the domain-level
//! [`TransportSession`] and [`SessionFactory`] traits. It is intended for
//! tests, demos and single-process deployments, and as the reference for
//! transport semantics.
//!
//! ## Reference Semantics
//!
//! - Once `subscribe()` returns, every later publish or put on a matching key
//!   is delivered to the subscriber.
//! - Callbacks run on a per-session worker task, never on the caller's task,
//!   the same way a native session reports from its own threads.
//! - For one query, all replies are dispatched before the single completion.
//! - Nothing is dropped: both QoS classes behave as reliable in-process.
//! - After `teardown()` every call fails with `ReturnCode::NotInitialized`.
//!
//! ## Non-Goals
//!
//! This transport does not emulate routing, discovery, persistence or the
//! failure modes of a real network. It exists to provide a deterministic
//! baseline against which the client core can be validated.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::keyexpr;
use crate::dispatch::lock_ignore_poison;
use crate::session_config::SessionConfig;
use crate::{
    // ---
    CallbackId,
    DispatchTable,
    Error,
    FactoryPtr,
    PublisherId,
    Qos,
    Result,
    ReturnCode,
    SessionFactory,
    SessionPtr,
    TransportSession,
};

/// Session modes the memory transport accepts in the configuration document.
const KNOWN_MODES: &[&str] = &["peer", "client", "router"];

/// Work item executed on a session's worker task.
enum Delivery {
    Sample {
        callback: CallbackId,
        payload: Bytes,
    },
    Reply {
        callback: CallbackId,
        key: String,
        payload: Bytes,
    },
    Done {
        callback: CallbackId,
    },
}

/// Sending side of a session's worker task.
#[derive(Clone)]
struct Worker {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl Worker {
    fn spawn(runtime: &tokio::runtime::Handle, dispatch: Arc<DispatchTable>) -> Self {
        // ---
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();

        runtime.spawn(async move {
            // ---
            while let Some(delivery) = rx.recv().await {
                match delivery {
                    Delivery::Sample { callback, payload } => {
                        dispatch.deliver_sample(callback, payload)
                    }
                    Delivery::Reply {
                        callback,
                        key,
                        payload,
                    } => dispatch.deliver_reply(callback, &key, payload),
                    Delivery::Done { callback } => dispatch.complete_query(callback),
                }
            }
            crate::log_debug!("memory session worker stopped");
        });

        Self { tx }
    }

    fn send(&self, delivery: Delivery) {
        // Ignore send failures; a closed channel indicates a torn-down
        // session whose worker already stopped.
        let _ = self.tx.send(delivery);
    }
}

struct HubSubscriber {
    session: u64,
    callback: CallbackId,
    pattern: String,
    worker: Worker,
}

struct HubPublisher {
    session: u64,
    topic: String,
    qos: Qos,
}

#[derive(Default)]
struct HubState {
    subscribers: Vec<HubSubscriber>,
    publishers: HashMap<PublisherId, HubPublisher>,
    store: BTreeMap<String, Bytes>,
}

impl HubState {
    /// Fan a sample out to every subscriber whose pattern matches `key`.
    fn fan_out(&self, key: &str, payload: &Bytes) -> usize {
        // ---
        let mut delivered = 0;
        for sub in self.subscribers.iter() {
            if keyexpr::matches(&sub.pattern, key) {
                sub.worker.send(Delivery::Sample {
                    callback: sub.callback,
                    payload: payload.clone(),
                });
                delivered += 1;
            }
        }
        delivered
    }
}

/// Shared message bus and key-value space for memory sessions.
///
/// Simulates the network and storage behind a transport within a single
/// process. All memory sessions opened on the same hub see each other's
/// publications and stored keys, exactly as peers on a real network would.
///
/// Tests that run in parallel should each construct their own hub and pass
/// it to [`create_memory_factory_with_hub`].
pub struct MemoryHub {
    // ---
    state: Mutex<HubState>,
    next_session: AtomicU64,
    next_publisher: AtomicU64,
}

impl MemoryHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Keys currently stored on the hub, in order.
    pub fn stored_keys(&self) -> Vec<String> {
        lock_ignore_poison(&self.state).store.keys().cloned().collect()
    }

    /// Number of live subscribers across all sessions.
    pub fn subscriber_count(&self) -> usize {
        lock_ignore_poison(&self.state).subscribers.len()
    }

    /// Number of declared publishers across all sessions.
    pub fn publisher_count(&self) -> usize {
        lock_ignore_poison(&self.state).publishers.len()
    }

    fn detach(&self, session: u64) {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        state.subscribers.retain(|s| s.session != session);
        state.publishers.retain(|_, p| p.session != session);
    }
}

impl Default for MemoryHub {
    fn default() -> Self {
        // ---
        Self {
            state: Mutex::new(HubState::default()),
            next_session: AtomicU64::new(1),
            next_publisher: AtomicU64::new(1),
        }
    }
}

/// Process-global hub used by [`create_memory_factory`].
static GLOBAL_HUB: OnceLock<Arc<MemoryHub>> = OnceLock::new();

fn global_hub() -> Arc<MemoryHub> {
    GLOBAL_HUB.get_or_init(MemoryHub::new).clone()
}

/// In-memory transport session.
struct MemorySession {
    // ---
    id: String,
    serial: u64,
    hub: Arc<MemoryHub>,
    worker: Mutex<Option<Worker>>,
}

impl MemorySession {
    fn live_worker(&self) -> Result<Worker> {
        // ---
        lock_ignore_poison(&self.worker)
            .clone()
            .ok_or(Error::Transport(ReturnCode::NotInitialized))
    }
}

#[async_trait::async_trait]
impl TransportSession for MemorySession {
    // ---
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn declare_publisher(&self, topic: &str, qos: Qos) -> Result<PublisherId> {
        // ---
        self.live_worker()?;

        let id = PublisherId(self.hub.next_publisher.fetch_add(1, Ordering::Relaxed));
        let mut state = lock_ignore_poison(&self.hub.state);
        state.publishers.insert(
            id,
            HubPublisher {
                session: self.serial,
                topic: topic.to_string(),
                qos,
            },
        );
        crate::log_debug!("{}: declared publisher {id:?} on {topic} ({qos})", self.id);
        Ok(id)
    }

    async fn undeclare_publisher(&self, id: PublisherId) -> Result<()> {
        // ---
        self.live_worker()?;

        let mut state = lock_ignore_poison(&self.hub.state);
        match state.publishers.get(&id) {
            Some(p) if p.session == self.serial => {
                state.publishers.remove(&id);
                Ok(())
            }
            _ => Err(Error::Transport(ReturnCode::GenericError)),
        }
    }

    async fn publish(&self, id: PublisherId, payload: Bytes) -> Result<()> {
        // ---
        self.live_worker()?;

        let state = lock_ignore_poison(&self.hub.state);
        let publisher = match state.publishers.get(&id) {
            Some(p) if p.session == self.serial => p,
            _ => return Err(Error::Transport(ReturnCode::GenericError)),
        };

        let _delivered = state.fan_out(&publisher.topic, &payload);
        crate::log_debug!(
            "{}: publish on {} ({}) reached {_delivered} subscriber(s)",
            self.id,
            publisher.topic,
            publisher.qos
        );
        Ok(())
    }

    async fn has_matching_subscribers(&self, id: PublisherId) -> Result<bool> {
        // ---
        self.live_worker()?;

        let state = lock_ignore_poison(&self.hub.state);
        let topic = match state.publishers.get(&id) {
            Some(p) if p.session == self.serial => &p.topic,
            _ => return Err(Error::Transport(ReturnCode::GenericError)),
        };
        Ok(state
            .subscribers
            .iter()
            .any(|s| keyexpr::matches(&s.pattern, topic)))
    }

    async fn subscribe(&self, topic: &str, qos: Qos, callback: CallbackId) -> Result<()> {
        // ---
        let worker = self.live_worker()?;

        let mut state = lock_ignore_poison(&self.hub.state);
        state.subscribers.push(HubSubscriber {
            session: self.serial,
            callback,
            pattern: topic.to_string(),
            worker,
        });
        crate::log_debug!("{}: subscribed {callback} to {topic} ({qos})", self.id);
        Ok(())
    }

    async fn unsubscribe(&self, callback: CallbackId) -> Result<()> {
        // ---
        self.live_worker()?;

        let mut state = lock_ignore_poison(&self.hub.state);
        let before = state.subscribers.len();
        state
            .subscribers
            .retain(|s| !(s.session == self.serial && s.callback == callback));

        if state.subscribers.len() == before {
            return Err(Error::Transport(ReturnCode::GenericError));
        }
        Ok(())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        // ---
        self.live_worker()?;

        if !keyexpr::is_concrete(key) {
            crate::log_warn!("{}: refusing put on wildcard key {key}", self.id);
            return Err(Error::Transport(ReturnCode::GenericError));
        }

        let mut state = lock_ignore_poison(&self.hub.state);
        state.fan_out(key, &value);
        state.store.insert(key.to_string(), value);
        Ok(())
    }

    async fn query(&self, selector: &str, callback: CallbackId) -> Result<()> {
        // ---
        let worker = self.live_worker()?;

        let replies: Vec<(String, Bytes)> = {
            let state = lock_ignore_poison(&self.hub.state);
            state
                .store
                .iter()
                .filter(|(key, _)| keyexpr::matches(selector, key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        };

        crate::log_debug!(
            "{}: query {selector} for {callback} matched {} key(s)",
            self.id,
            replies.len()
        );

        for (key, payload) in replies {
            worker.send(Delivery::Reply {
                callback,
                key,
                payload,
            });
        }
        worker.send(Delivery::Done { callback });
        Ok(())
    }

    async fn cancel_query(&self, callback: CallbackId) -> Result<()> {
        // ---
        self.live_worker()?;

        // Results are queued the moment the query starts; whatever is still in
        // flight for a cancelled query is dropped by the dispatch table.
        crate::log_debug!("{}: cancel {callback}", self.id);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // ---
        self.live_worker()?;

        lock_ignore_poison(&self.hub.state).store.remove(key);
        Ok(())
    }

    fn teardown(&self) {
        // ---
        let worker = lock_ignore_poison(&self.worker).take();
        if worker.is_some() {
            self.hub.detach(self.serial);
            crate::log_debug!("{}: torn down", self.id);
        }
    }
}

/// Session factory for the in-memory transport.
struct MemoryFactory {
    hub: Arc<MemoryHub>,
}

impl SessionFactory for MemoryFactory {
    fn open(&self, config: &SessionConfig, dispatch: Arc<DispatchTable>) -> Result<SessionPtr> {
        // ---
        if let Some(mode) = config.mode() {
            if !KNOWN_MODES.contains(&mode) {
                return Err(Error::SessionInit(format!("unsupported session mode {mode:?}")));
            }
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| Error::SessionInit(format!("memory session needs a tokio runtime: {err}")))?;

        let session = MemorySession {
            id: uuid::Uuid::new_v4().to_string(),
            serial: self.hub.next_session.fetch_add(1, Ordering::Relaxed),
            hub: self.hub.clone(),
            worker: Mutex::new(Some(Worker::spawn(&runtime, dispatch))),
        };

        crate::log_debug!(
            "{}: memory session created (connect: {:?})",
            session.id,
            config.connect_endpoints()
        );

        Ok(Arc::new(session))
    }
}

/// Create a memory session factory on the process-global hub.
///
/// All sessions opened through factories from this function share one bus
/// and one key-value space.
///
/// For isolated parallel testing, use [`create_memory_factory_with_hub`].
pub fn create_memory_factory() -> FactoryPtr {
    create_memory_factory_with_hub(global_hub())
}

/// Create a memory session factory on the provided hub.
pub fn create_memory_factory_with_hub(hub: Arc<MemoryHub>) -> FactoryPtr {
    Arc::new(MemoryFactory { hub })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::dispatch::{QueryListener, SampleListener};
    use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
    use tokio::time::{timeout, Duration};

    #[derive(Debug, PartialEq)]
    enum Seen {
        Sample(Bytes),
        Reply(String),
        Done,
    }

    struct Forward(UnboundedSender<Seen>);

    impl SampleListener for Forward {
        fn on_sample(&self, payload: Bytes) {
            let _ = self.0.send(Seen::Sample(payload));
        }
    }

    impl QueryListener for Forward {
        fn on_reply(&self, key: &str, _payload: Bytes) {
            let _ = self.0.send(Seen::Reply(key.to_string()));
        }

        fn on_done(&self) {
            let _ = self.0.send(Seen::Done);
        }
    }

    fn open(hub: &Arc<MemoryHub>) -> (SessionPtr, Arc<DispatchTable>) {
        let dispatch = DispatchTable::new();
        let session = create_memory_factory_with_hub(hub.clone())
            .open(&SessionConfig::empty(), dispatch.clone())
            .unwrap();
        (session, dispatch)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
        timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timed out waiting for callback")
            .expect("listener channel closed")
    }

    #[tokio::test]
    async fn test_publish_reaches_wildcard_subscriber_on_other_session() {
        // ---
        let hub = MemoryHub::new();
        let (sub_session, sub_dispatch) = open(&hub);
        let (pub_session, _) = open(&hub);

        let (tx, mut rx) = unbounded_channel();
        let cb = sub_dispatch.insert_sample(Arc::new(Forward(tx)));
        sub_session.subscribe("in/*/pose", Qos::Reliable, cb).await.unwrap();

        let pid = pub_session
            .declare_publisher("in/robot1/pose", Qos::Reliable)
            .await
            .unwrap();
        assert!(pub_session.has_matching_subscribers(pid).await.unwrap());

        pub_session
            .publish(pid, Bytes::from_static(b"hello"))
            .await
            .unwrap();

        assert_eq!(next(&mut rx).await, Seen::Sample(Bytes::from_static(b"hello")));
    }

    #[tokio::test]
    async fn test_query_replies_precede_completion() {
        // ---
        let hub = MemoryHub::new();
        let (session, dispatch) = open(&hub);

        for key in ["kvstore/a", "kvstore/b/c", "kvstore_replicated/a"] {
            session.put(key, Bytes::from_static(b"v")).await.unwrap();
        }

        let (tx, mut rx) = unbounded_channel();
        let cb = dispatch.insert_query(Arc::new(Forward(tx)));
        session.query("kvstore/**", cb).await.unwrap();

        assert_eq!(next(&mut rx).await, Seen::Reply("kvstore/a".into()));
        assert_eq!(next(&mut rx).await, Seen::Reply("kvstore/b/c".into()));
        assert_eq!(next(&mut rx).await, Seen::Done);
    }

    #[tokio::test]
    async fn test_put_rejects_wildcards_and_delete_removes() {
        // ---
        let hub = MemoryHub::new();
        let (session, _) = open(&hub);

        assert!(matches!(
            session.put("kvstore/*", Bytes::new()).await,
            Err(Error::Transport(ReturnCode::GenericError))
        ));

        session.put("kvstore/x", Bytes::new()).await.unwrap();
        assert_eq!(hub.stored_keys(), vec!["kvstore/x".to_string()]);

        session.delete("kvstore/x").await.unwrap();
        assert!(hub.stored_keys().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_handles_are_generic_errors() {
        // ---
        let hub = MemoryHub::new();
        let (a, _) = open(&hub);
        let (b, _) = open(&hub);

        let pid = a.declare_publisher("in/x", Qos::BestEffort).await.unwrap();

        // A session cannot drive another session's publisher.
        assert!(matches!(
            b.publish(pid, Bytes::new()).await,
            Err(Error::Transport(ReturnCode::GenericError))
        ));
        assert!(matches!(
            b.unsubscribe(CallbackId(99)).await,
            Err(Error::Transport(ReturnCode::GenericError))
        ));
    }

    #[tokio::test]
    async fn test_teardown_detaches_and_fails_later_calls() {
        // ---
        let hub = MemoryHub::new();
        let (session, dispatch) = open(&hub);

        let (tx, _rx) = unbounded_channel();
        let cb = dispatch.insert_sample(Arc::new(Forward(tx)));
        session.subscribe("in/x", Qos::BestEffort, cb).await.unwrap();
        session.declare_publisher("in/x", Qos::BestEffort).await.unwrap();
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.publisher_count(), 1);

        session.teardown();
        session.teardown();

        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(hub.publisher_count(), 0);
        assert!(matches!(
            session.put("kvstore/x", Bytes::new()).await,
            Err(Error::Transport(ReturnCode::NotInitialized))
        ));
    }

    #[tokio::test]
    async fn test_unknown_mode_fails_open() {
        // ---
        let config = SessionConfig::parse(r#"{ "mode": "satellite" }"#).unwrap();
        let result = create_memory_factory_with_hub(MemoryHub::new()).open(&config, DispatchTable::new());

        assert!(matches!(result, Err(Error::SessionInit(_))));
    }

    #[test]
    fn test_open_outside_runtime_fails() {
        // ---
        let result = create_memory_factory_with_hub(MemoryHub::new())
            .open(&SessionConfig::empty(), DispatchTable::new());

        assert!(matches!(result, Err(Error::SessionInit(_))));
    }
}
