// tests/common/mod.rs

//! Scripted transport sessions for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use meshbus::{
    // ---
    CallbackId,
    DispatchTable,
    Error,
    PublisherId,
    Qos,
    Result,
    ReturnCode,
    SessionConfig,
    SessionFactory,
    SessionPtr,
    SharedSession,
    TransportSession,
};

/// Install a tracing subscriber once per test binary (RUST_LOG controls it).
pub fn init_tracing() {
    // ---
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// How the fake answers queries.
#[derive(Debug, Clone, Copy)]
pub enum QueryScript {
    /// Never invoke any query callback.
    Silent,

    /// Complete every query immediately with zero results.
    CompleteEmpty,

    /// Reply with the stored value starting from the given 1-based attempt,
    /// complete empty before that.
    VisibleFrom(usize),

    /// Answer from the stored values on every attempt.
    Store,
}

/// Counters shared between a factory and the sessions it opens.
#[derive(Debug, Default)]
pub struct Stats {
    pub opens: AtomicUsize,
    pub teardowns: AtomicUsize,
    pub puts: AtomicUsize,
    pub queries: AtomicUsize,
    pub cancels: AtomicUsize,
    pub configs: Mutex<Vec<SessionConfig>>,
}

impl Stats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Configuration document handed to the most recent `open`.
    pub fn last_config(&self) -> Option<SessionConfig> {
        self.configs.lock().unwrap().last().cloned()
    }
}

pub struct ScriptedFactory {
    script: QueryScript,
    stats: Arc<Stats>,
}

impl ScriptedFactory {
    pub fn new(script: QueryScript) -> (Arc<Self>, Arc<Stats>) {
        // ---
        let stats = Arc::new(Stats::default());
        let factory = Arc::new(Self {
            script,
            stats: stats.clone(),
        });
        (factory, stats)
    }
}

impl SessionFactory for ScriptedFactory {
    fn open(&self, config: &SessionConfig, dispatch: Arc<DispatchTable>) -> Result<SessionPtr> {
        // ---
        self.stats.configs.lock().unwrap().push(config.clone());
        let serial = self.stats.opens.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Arc::new(ScriptedSession {
            id: format!("scripted-{serial}"),
            script: self.script,
            stats: self.stats.clone(),
            dispatch,
            store: Mutex::new(HashMap::new()),
        }))
    }
}

pub struct ScriptedSession {
    id: String,
    script: QueryScript,
    stats: Arc<Stats>,
    dispatch: Arc<DispatchTable>,
    store: Mutex<HashMap<String, Bytes>>,
}

impl ScriptedSession {
    fn answer(&self, selector: &str) -> Vec<(String, Bytes)> {
        // ---
        let store = self.store.lock().unwrap();
        store
            .get(selector)
            .map(|value| vec![(selector.to_string(), value.clone())])
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl TransportSession for ScriptedSession {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn declare_publisher(&self, _topic: &str, _qos: Qos) -> Result<PublisherId> {
        Ok(PublisherId(1))
    }

    async fn undeclare_publisher(&self, _id: PublisherId) -> Result<()> {
        Ok(())
    }

    async fn publish(&self, _id: PublisherId, _payload: Bytes) -> Result<()> {
        Ok(())
    }

    async fn has_matching_subscribers(&self, _id: PublisherId) -> Result<bool> {
        Ok(false)
    }

    async fn subscribe(&self, _topic: &str, _qos: Qos, _callback: CallbackId) -> Result<()> {
        Ok(())
    }

    async fn unsubscribe(&self, _callback: CallbackId) -> Result<()> {
        Ok(())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        // ---
        self.stats.puts.fetch_add(1, Ordering::SeqCst);
        self.store.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn query(&self, selector: &str, callback: CallbackId) -> Result<()> {
        // ---
        let attempt = self.stats.queries.fetch_add(1, Ordering::SeqCst) + 1;

        let replies = match self.script {
            QueryScript::Silent => return Ok(()),
            QueryScript::CompleteEmpty => Vec::new(),
            QueryScript::VisibleFrom(n) if attempt < n => Vec::new(),
            QueryScript::VisibleFrom(_) | QueryScript::Store => self.answer(selector),
        };

        // Report from a separate task, the way a native session reports from
        // its own worker.
        let dispatch = self.dispatch.clone();
        tokio::spawn(async move {
            for (key, value) in replies {
                dispatch.deliver_reply(callback, &key, value);
            }
            dispatch.complete_query(callback);
        });
        Ok(())
    }

    async fn cancel_query(&self, _callback: CallbackId) -> Result<()> {
        self.stats.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // ---
        match self.store.lock().unwrap().remove(key) {
            Some(_) => Ok(()),
            None => Err(Error::Transport(ReturnCode::GenericError)),
        }
    }

    fn teardown(&self) {
        self.stats.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shared session over a scripted factory, configured from an inline document.
pub fn scripted_shared(script: QueryScript) -> (SharedSession, Arc<Stats>) {
    // ---
    let (factory, stats) = ScriptedFactory::new(script);
    let shared = SharedSession::builder()
        .factory_ptr(factory)
        .config_document(serde_json::json!({ "mode": "peer" }))
        .build()
        .unwrap();
    (shared, stats)
}
