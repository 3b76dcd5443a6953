// src/domain/transport.rs

//! Transport session abstractions.
//!
//! This module defines the narrow operation set through which the client core
//! talks to the underlying transport session: lifecycle, publish, subscribe,
//! and key-value set/query/delete. It intentionally avoids any reference to a
//! concrete wire protocol, discovery mechanism or native library.
//!
//! The session is responsible only for moving opaque bytes. Envelopes, topic
//! naming, key prefixes, consistency loops and timeouts are handled by the
//! layers above.
//!
//! ## Callbacks
//!
//! Inbound samples, query replies and query completions are reported by the
//! session from its own worker task(s) through the [`DispatchTable`] it was
//! handed at construction. The session only ever sees an opaque
//! [`CallbackId`]; it never holds a reference to the subscription or query
//! object that will handle the callback.
//!
//! Concrete implementations live under `src/transport/`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;

use crate::session_config::SessionConfig;
use crate::{DispatchTable, Error, Result};

/// Delivery guarantee class of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Qos {
    // ---
    /// Messages may be dropped under load or loss.
    #[default]
    BestEffort,

    /// Messages are delivered or the loss is reported by the transport.
    Reliable,
}

impl Qos {
    /// Raw value understood by the transport.
    pub fn as_raw(self) -> u8 {
        match self {
            Qos::BestEffort => 0,
            Qos::Reliable => 1,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        // ---
        match value {
            0 => Ok(Qos::BestEffort),
            1 => Ok(Qos::Reliable),
            other => Err(Error::InvalidQos(format!("unknown raw value {other}"))),
        }
    }
}

impl FromStr for Qos {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        match s.trim().to_ascii_lowercase().as_str() {
            "best_effort" | "best-effort" | "besteffort" => Ok(Qos::BestEffort),
            "reliable" => Ok(Qos::Reliable),
            other => Err(Error::InvalidQos(format!("unknown name {other:?}"))),
        }
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Qos::BestEffort => f.write_str("best_effort"),
            Qos::Reliable => f.write_str("reliable"),
        }
    }
}

/// Opaque handle naming an entry in the [`DispatchTable`].
///
/// Identifiers are allocated from a monotonically increasing counter and are
/// never reused, so a late callback carrying a stale id can never reach a
/// newer subscription or query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub u64);

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb#{}", self.0)
    }
}

/// Identifier of a publisher declaration returned by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublisherId(pub u64);

/// Transport session abstraction.
///
/// A `TransportSession` is the opaque native collaborator: it owns the
/// connection, registers topics, moves bytes and executes wildcard queries.
/// Exactly one session is owned by a [`SharedSession`](crate::SharedSession)
/// at any time.
///
/// Implementations must ensure that:
/// - every call returns once the underlying operation completed or failed;
///   failures are surfaced as [`Error::Transport`] carrying a translated
///   [`ReturnCode`](crate::ReturnCode);
/// - for one query, every reply is dispatched before its completion signal,
///   and the completion signal is dispatched exactly once;
/// - after [`teardown`](TransportSession::teardown) every call fails with
///   `ReturnCode::NotInitialized`.
///
/// The in-memory session serves as the reference implementation of these
/// semantics.
///
/// # Notes
///
/// This trait uses `async_trait`; the expanded documentation may show explicit
/// lifetimes and a boxed `Future`. Consumers should treat the methods as
/// normal `async fn`s.
#[async_trait::async_trait]
pub trait TransportSession: Send + Sync {
    // ---
    /// Identifier of this session instance, used for logging.
    fn session_id(&self) -> &str;

    /// Register a publisher on a wire topic.
    async fn declare_publisher(&self, topic: &str, qos: Qos) -> Result<PublisherId>;

    /// Remove a publisher declaration.
    async fn undeclare_publisher(&self, id: PublisherId) -> Result<()>;

    /// Write one encoded envelope through a declared publisher.
    async fn publish(&self, id: PublisherId, payload: Bytes) -> Result<()>;

    /// Whether any live subscriber currently matches the publisher's topic.
    async fn has_matching_subscribers(&self, id: PublisherId) -> Result<bool>;

    /// Register a subscriber on a wire topic (or key expression).
    ///
    /// Inbound samples are dispatched to `callback` until
    /// [`unsubscribe`](TransportSession::unsubscribe) returns.
    async fn subscribe(&self, topic: &str, qos: Qos, callback: CallbackId) -> Result<()>;

    /// Remove the subscriber registered under `callback`.
    async fn unsubscribe(&self, callback: CallbackId) -> Result<()>;

    /// Store `value` under `key`.
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Start a wildcard query.
    ///
    /// Replies and the final completion are dispatched to `callback`.
    async fn query(&self, selector: &str, callback: CallbackId) -> Result<()>;

    /// Abort an in-flight query, best effort.
    ///
    /// Cancelling a query that already completed is not an error.
    async fn cancel_query(&self, callback: CallbackId) -> Result<()>;

    /// Delete the value stored under `key`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Tear the session down and release all transport resources.
    ///
    /// Called exactly once by the owning shared session.
    fn teardown(&self);
}

/// Shared transport session pointer.
///
/// `.clone()` only increments a reference count; all clones talk to the same
/// underlying session.
pub type SessionPtr = Arc<dyn TransportSession>;

/// Constructs transport sessions.
///
/// Invoked by [`SharedSession`](crate::SharedSession) on every 0→1 reference
/// count transition with the adjusted configuration document and the dispatch
/// table the session must report callbacks to.
pub trait SessionFactory: Send + Sync {
    // ---
    /// Create and initialize a session.
    ///
    /// A failure must not leave any transport state behind.
    fn open(&self, config: &SessionConfig, dispatch: Arc<DispatchTable>) -> Result<SessionPtr>;
}

/// Shared session factory pointer.
pub type FactoryPtr = Arc<dyn SessionFactory>;
