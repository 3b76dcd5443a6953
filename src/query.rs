// src/query.rs

//! Wildcard queries as a finite result stream.
//!
//! A query produces zero or more replies followed by exactly one completion.
//! What a query produces is separated from how a caller consumes it:
//!
//! - **push**: caller-supplied callbacks run on the transport worker for
//!   every decoded value, for every value that fails to decode, and once on
//!   completion ([`KvStore::get_all`](crate::KvStore::get_all));
//! - **pull**: events are buffered in a channel and read with
//!   [`QueryStream::next`]; this is how [`KvStore::get`](crate::KvStore::get)
//!   waits for its first value.
//!
//! Either way the query owns one entry in the dispatch table, held by the
//! returned [`QueryHandle`]. The handle must be closed once the caller is done
//! with the query, whether it completed or was abandoned. Dropping an unclosed
//! handle releases the entry as well.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::dispatch::{lock_ignore_poison, QueryListener};
use crate::{CallbackId, Envelope, Error, Payload, Result, Session};

/// One event of a query result stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    // ---
    /// A stored value matched the query.
    Reply {
        /// Wire key the value is stored under.
        key: String,
        /// Encoded envelope.
        value: Bytes,
    },

    /// The query completed; no further events follow.
    Done,
}

/// Pull side of a query started in pull mode.
pub struct QueryStream {
    rx: mpsc::UnboundedReceiver<QueryEvent>,
}

impl QueryStream {
    /// Wait for the next event.
    ///
    /// Returns `None` once [`QueryEvent::Done`] has been yielded, or if the
    /// query was released without completing.
    pub async fn next(&mut self) -> Option<QueryEvent> {
        self.rx.recv().await
    }
}

/// Buffers events for a [`QueryStream`].
struct ChannelListener {
    tx: Mutex<Option<mpsc::UnboundedSender<QueryEvent>>>,
    done: Arc<AtomicBool>,
}

impl QueryListener for ChannelListener {
    fn on_reply(&self, key: &str, payload: Bytes) {
        // ---
        if let Some(tx) = lock_ignore_poison(&self.tx).as_ref() {
            let _ = tx.send(QueryEvent::Reply {
                key: key.to_string(),
                value: payload,
            });
        }
    }

    fn on_done(&self) {
        // ---
        self.done.store(true, Ordering::Release);
        // Taking the sender closes the stream right after `Done`.
        if let Some(tx) = lock_ignore_poison(&self.tx).take() {
            let _ = tx.send(QueryEvent::Done);
        }
    }
}

type ValueFn = Box<dyn Fn(Payload) + Send + Sync>;
type ErrorFn = Box<dyn Fn(String, Bytes, Error) + Send + Sync>;
type DoneFn = Box<dyn FnOnce(String) + Send>;

/// Runs caller callbacks for a query started in push mode.
struct CallbackListener {
    selector: String,
    on_value: ValueFn,
    on_error: ErrorFn,
    on_done: Mutex<Option<DoneFn>>,
    done: Arc<AtomicBool>,
}

impl QueryListener for CallbackListener {
    fn on_reply(&self, key: &str, payload: Bytes) {
        // ---
        if self.done.load(Ordering::Acquire) {
            crate::log_warn!("reply for {key} after completion of {}, dropped", self.selector);
            return;
        }
        match Envelope::decode(&payload) {
            Ok(envelope) => (self.on_value)(envelope.payload),
            Err(err) => {
                crate::log_debug!("undecodable value at {key}: {err}");
                (self.on_error)(key.to_string(), payload, err);
            }
        }
    }

    fn on_done(&self) {
        // ---
        let on_done = lock_ignore_poison(&self.on_done).take();
        match on_done {
            Some(callback) => {
                self.done.store(true, Ordering::Release);
                callback(self.selector.clone());
            }
            None => {
                crate::log_debug!("duplicate completion for {}, ignored", self.selector);
            }
        }
    }
}

/// Caller-owned handle of one in-flight or completed query.
///
/// Must be closed with [`close`](Self::close) to release the query's
/// dispatch-table entry.
pub struct QueryHandle {
    // ---
    session: Session,
    callback: CallbackId,
    selector: String,
    done: Arc<AtomicBool>,
    released: bool,
}

impl QueryHandle {
    // ---
    /// Start a query whose results are pushed to callbacks.
    pub(crate) async fn start_push<V, E, D>(
        session: &Session,
        selector: String,
        on_value: V,
        on_error: E,
        on_done: D,
    ) -> Result<Self>
    where
        V: Fn(Payload) + Send + Sync + 'static,
        E: Fn(String, Bytes, Error) + Send + Sync + 'static,
        D: FnOnce(String) + Send + 'static,
    {
        // ---
        let done = Arc::new(AtomicBool::new(false));
        let listener = CallbackListener {
            selector: selector.clone(),
            on_value: Box::new(on_value),
            on_error: Box::new(on_error),
            on_done: Mutex::new(Some(Box::new(on_done))),
            done: done.clone(),
        };
        let callback = session.dispatch().insert_query(Arc::new(listener));
        Self::issue(session, selector, callback, done).await
    }

    /// Start a query whose results are read from a [`QueryStream`].
    pub(crate) async fn start_pull(
        session: &Session,
        selector: String,
    ) -> Result<(Self, QueryStream)> {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        let done = Arc::new(AtomicBool::new(false));
        let listener = ChannelListener {
            tx: Mutex::new(Some(tx)),
            done: done.clone(),
        };
        let callback = session.dispatch().insert_query(Arc::new(listener));
        let handle = Self::issue(session, selector, callback, done).await?;
        Ok((handle, QueryStream { rx }))
    }

    async fn issue(
        session: &Session,
        selector: String,
        callback: CallbackId,
        done: Arc<AtomicBool>,
    ) -> Result<Self> {
        // ---
        if let Err(err) = session.transport().query(&selector, callback).await {
            session.dispatch().remove(callback);
            crate::log_debug!("query {selector} failed to start: {err}");
            return Err(err);
        }

        Ok(Self {
            session: session.clone(),
            callback,
            selector,
            done,
            released: false,
        })
    }

    /// Key expression the query was issued for.
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Whether the completion signal has been received.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Release the query.
    ///
    /// Removes the dispatch-table entry, so any result still in flight is
    /// dropped, and asks the transport to abort the query if it has not
    /// completed yet.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the abort request fails. The
    /// dispatch-table entry is released regardless.
    pub async fn close(mut self) -> Result<()> {
        // ---
        self.released = true;
        self.session.dispatch().remove(self.callback);

        if self.is_done() {
            return Ok(());
        }
        self.session.transport().cancel_query(self.callback).await
    }
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        // ---
        if self.released {
            return;
        }
        if self.session.dispatch().remove(self.callback) {
            crate::log_debug!("query {} dropped without close(), released", self.selector);
        }
    }
}

impl std::fmt::Debug for QueryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryHandle")
            .field("selector", &self.selector)
            .field("callback", &self.callback)
            .field("done", &self.is_done())
            .finish()
    }
}
