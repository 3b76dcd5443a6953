// src/kv/store.rs

use std::time::Duration;

use bytes::Bytes;

use super::consistency::{poll_until_visible, ConsistencyPolicy};
use crate::naming::{wire_key, DEFAULT_PREFIX, REPLICATED_PREFIX};
use crate::{
    // ---
    Envelope,
    Error,
    Message,
    Payload,
    QueryEvent,
    QueryHandle,
    QueryStream,
    Result,
    Session,
};

/// Namespaced key-value store.
///
/// Every key is mapped under the store's prefix before it reaches the
/// transport: `"pose"` and `"/pose"` both become `"kvstore/pose"` in the
/// default store.
///
/// # Example
///
/// ```
/// # use meshbus::{create_memory_factory_with_hub, KvStore, MemoryHub, SharedSession};
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> meshbus::Result<()> {
/// let shared = SharedSession::builder()
///     .factory_ptr(create_memory_factory_with_hub(MemoryHub::new()))
///     .config_document(serde_json::json!({}))
///     .build()?;
/// let session = shared.acquire()?;
///
/// let store = KvStore::new(&session);
/// store.set("robot/name", &"atlas".to_string(), false).await?;
/// let name: String = store.get("robot/name", None).await?;
/// assert_eq!(name, "atlas");
///
/// shared.release();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct KvStore {
    // ---
    session: Session,
    prefix: String,
    consistency: ConsistencyPolicy,
}

impl KvStore {
    // ---
    /// Primary store, rooted at [`DEFAULT_PREFIX`](crate::DEFAULT_PREFIX).
    pub fn new(session: &Session) -> Self {
        Self::with_prefix(session, DEFAULT_PREFIX)
    }

    /// Replicated store, rooted at
    /// [`REPLICATED_PREFIX`](crate::REPLICATED_PREFIX).
    pub fn replicated(session: &Session) -> Self {
        Self::with_prefix(session, REPLICATED_PREFIX)
    }

    /// Store rooted at a caller-chosen prefix.
    pub fn with_prefix(session: &Session, prefix: impl Into<String>) -> Self {
        // ---
        Self {
            session: session.clone(),
            prefix: prefix.into(),
            consistency: ConsistencyPolicy::default(),
        }
    }

    /// Replace the timing used by high-consistency writes.
    pub fn with_consistency(mut self, policy: ConsistencyPolicy) -> Self {
        self.consistency = policy;
        self
    }

    /// Prefix every key of this store is rooted at.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Timing used by high-consistency writes.
    pub fn consistency(&self) -> &ConsistencyPolicy {
        &self.consistency
    }

    /// Wire key for `key` in this store.
    pub fn key(&self, key: &str) -> String {
        wire_key(&self.prefix, key)
    }

    // --- writes

    /// Store `value` under `key`.
    ///
    /// With `high_consistency`, the call then polls a read-back of the key
    /// until it succeeds, bounded by the store's [`ConsistencyPolicy`].
    ///
    /// # Errors
    ///
    /// - the transport error if the write fails
    /// - [`Error::DeadlineExceeded`] if the read-back never succeeds in time
    pub async fn set<T: Message>(&self, key: &str, value: &T, high_consistency: bool) -> Result<()> {
        // ---
        self.set_payload(key, Payload::pack(value)?, high_consistency).await
    }

    /// Store an already packed payload under `key`.
    pub async fn set_payload(&self, key: &str, payload: Payload, high_consistency: bool) -> Result<()> {
        // ---
        let wire = self.key(key);
        let bytes = Envelope::new(payload).encode()?;
        self.session.transport().put(&wire, bytes).await?;

        if !high_consistency {
            return Ok(());
        }

        poll_until_visible(&self.consistency, move |read_timeout| {
            self.get_envelope(key, Some(read_timeout))
        })
        .await
        .map(|_| ())
    }

    /// Remove `key` from the store.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.session.transport().delete(&self.key(key)).await
    }

    // --- reads

    /// Fetch and decode the value stored under `key`.
    ///
    /// Waits for the first of: a value, completion of the lookup with nothing
    /// found, or `timeout` if one is given. The lookup is released on every
    /// outcome.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if nothing is stored under `key`
    /// - [`Error::DeadlineExceeded`] if `timeout` elapses first
    /// - a decode error if the stored value is not a `T`
    /// - the transport error if the lookup cannot be issued
    pub async fn get<T: Message>(&self, key: &str, timeout: Option<Duration>) -> Result<T> {
        // ---
        self.get_envelope(key, timeout).await?.payload.unpack()
    }

    /// Fetch the payload stored under `key` without decoding it.
    pub async fn get_payload(&self, key: &str, timeout: Option<Duration>) -> Result<Payload> {
        Ok(self.get_envelope(key, timeout).await?.payload)
    }

    /// Fetch the full envelope stored under `key`.
    pub async fn get_envelope(&self, key: &str, timeout: Option<Duration>) -> Result<Envelope> {
        // ---
        let (handle, mut stream) = QueryHandle::start_pull(&self.session, self.key(key)).await?;

        let outcome = match timeout {
            Some(limit) => tokio::time::timeout(limit, first_value(&mut stream))
                .await
                .unwrap_or(Err(Error::DeadlineExceeded)),
            None => first_value(&mut stream).await,
        };

        let selector = handle.selector().to_string();
        if let Err(_err) = handle.close().await {
            crate::log_warn!("releasing lookup of {selector} failed: {_err}");
        }

        if let Err(Error::DeadlineExceeded) = &outcome {
            crate::log_debug!("lookup of {selector} timed out");
        }
        outcome
    }

    /// Query every value whose key matches the pattern `key`.
    ///
    /// `on_value` runs for every decoded value. A stored value that does not
    /// decode goes to `on_error` with its wire key, raw bytes and the decode
    /// error instead. Finally `on_done` runs exactly once with the key
    /// expression that was queried. All three run on the transport worker.
    ///
    /// The returned handle must be closed to release the query.
    pub async fn get_all<V, E, D>(
        &self,
        key: &str,
        on_value: V,
        on_error: E,
        on_done: D,
    ) -> Result<QueryHandle>
    where
        V: Fn(Payload) + Send + Sync + 'static,
        E: Fn(String, Bytes, Error) + Send + Sync + 'static,
        D: FnOnce(String) + Send + 'static,
    {
        QueryHandle::start_push(&self.session, self.key(key), on_value, on_error, on_done).await
    }

    /// Query every value whose key matches the pattern `key`, reading results
    /// from a stream.
    pub async fn query(&self, key: &str) -> Result<(QueryHandle, QueryStream)> {
        QueryHandle::start_pull(&self.session, self.key(key)).await
    }
}

/// Resolve a lookup from the first event of its stream.
async fn first_value(stream: &mut QueryStream) -> Result<Envelope> {
    // ---
    match stream.next().await {
        Some(QueryEvent::Reply { value, .. }) => Envelope::decode(&value),
        Some(QueryEvent::Done) => Err(Error::NotFound),
        None => Err(Error::QueryAborted),
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore")
            .field("session", &self.session.session_id())
            .field("prefix", &self.prefix)
            .field("consistency", &self.consistency)
            .finish()
    }
}
