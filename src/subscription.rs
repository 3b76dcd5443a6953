// src/subscription.rs

//! Topic subscriptions.
//!
//! A subscription owns one topic registration on the transport and one entry
//! in the dispatch table. Every inbound sample is decoded on the transport
//! worker:
//!
//! - typed subscriptions decode the envelope, then the payload as the declared
//!   message type, and call `on_message` with the value;
//! - raw subscriptions stop after the envelope and hand it over whole, for
//!   callers that dispatch on [`Payload::type_name`](crate::Payload) themselves.
//!
//! If decoding fails, `on_error` is called with the raw bytes and the error
//! instead. Exactly one of the two callbacks runs per sample; malformed input
//! is never dropped silently and never panics the worker.
//!
//! Callbacks run on the transport's worker, so they should hand heavy work off
//! rather than block. A callback already running when [`Subscription::close`]
//! is called is not interrupted and may complete after `close` returns.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;

use crate::dispatch::SampleListener;
use crate::naming::wire_topic;
use crate::{CallbackId, Envelope, Error, Message, Qos, Result, Session};

struct TypedListener<T, M, E> {
    on_message: M,
    on_error: E,
    _message: PhantomData<fn() -> T>,
}

impl<T, M, E> SampleListener for TypedListener<T, M, E>
where
    T: Message,
    M: Fn(T) + Send + Sync,
    E: Fn(Bytes, Error) + Send + Sync,
{
    fn on_sample(&self, payload: Bytes) {
        // ---
        let decoded = Envelope::decode(&payload).and_then(|env| env.payload.unpack::<T>());
        match decoded {
            Ok(message) => (self.on_message)(message),
            Err(err) => (self.on_error)(payload, err),
        }
    }
}

struct RawListener<M, E> {
    on_envelope: M,
    on_error: E,
}

impl<M, E> SampleListener for RawListener<M, E>
where
    M: Fn(Envelope) + Send + Sync,
    E: Fn(Bytes, Error) + Send + Sync,
{
    fn on_sample(&self, payload: Bytes) {
        // ---
        match Envelope::decode(&payload) {
            Ok(envelope) => (self.on_envelope)(envelope),
            Err(err) => (self.on_error)(payload, err),
        }
    }
}

/// Subscription to one topic.
///
/// Close it with [`close`](Self::close). Dropping an unclosed subscription
/// releases its dispatch-table entry immediately and unregisters the topic in
/// the background.
pub struct Subscription {
    // ---
    session: Session,
    callback: CallbackId,
    topic: String,
    wire_topic: String,
    closed: bool,
}

impl Subscription {
    // ---
    /// Subscribe to `topic`, decoding every message as `T`.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use meshbus::{Message, Qos, Session, Subscription};
    /// # use serde::{Deserialize, Serialize};
    /// #[derive(Debug, Serialize, Deserialize)]
    /// struct Pose { x: f64, y: f64 }
    /// impl Message for Pose {}
    ///
    /// # async fn example(session: Session) -> meshbus::Result<()> {
    /// let sub = Subscription::new(
    ///     &session,
    ///     "/robot/pose",
    ///     Qos::BestEffort,
    ///     |pose: Pose| println!("pose {pose:?}"),
    ///     |raw, err| eprintln!("bad pose ({} bytes): {err}", raw.len()),
    /// )
    /// .await?;
    /// // ...
    /// sub.close().await?;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns the transport error if the topic cannot be registered; no
    /// dispatch-table entry is left behind in that case.
    pub async fn new<T, M, E>(
        session: &Session,
        topic: &str,
        qos: Qos,
        on_message: M,
        on_error: E,
    ) -> Result<Self>
    where
        T: Message,
        M: Fn(T) + Send + Sync + 'static,
        E: Fn(Bytes, Error) + Send + Sync + 'static,
    {
        // ---
        let listener = TypedListener {
            on_message,
            on_error,
            _message: PhantomData,
        };
        Self::register(session, topic, qos, Arc::new(listener)).await
    }

    /// Subscribe to `topic`, receiving decoded envelopes without interpreting
    /// their payload.
    pub async fn new_raw<M, E>(
        session: &Session,
        topic: &str,
        qos: Qos,
        on_envelope: M,
        on_error: E,
    ) -> Result<Self>
    where
        M: Fn(Envelope) + Send + Sync + 'static,
        E: Fn(Bytes, Error) + Send + Sync + 'static,
    {
        // ---
        let listener = RawListener {
            on_envelope,
            on_error,
        };
        Self::register(session, topic, qos, Arc::new(listener)).await
    }

    async fn register(
        session: &Session,
        topic: &str,
        qos: Qos,
        listener: Arc<dyn SampleListener>,
    ) -> Result<Self> {
        // ---
        let wire = wire_topic(topic);
        let callback = session.dispatch().insert_sample(listener);

        if let Err(err) = session.transport().subscribe(&wire, qos, callback).await {
            session.dispatch().remove(callback);
            crate::log_error!("subscribe to {wire} failed: {err}");
            return Err(err);
        }

        crate::log_debug!("{}: subscribed to {wire} as {callback}", session.session_id());

        Ok(Self {
            session: session.clone(),
            callback,
            topic: topic.to_string(),
            wire_topic: wire,
            closed: false,
        })
    }

    /// Public topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Subject the topic is registered under on the wire.
    pub fn wire_topic(&self) -> &str {
        &self.wire_topic
    }

    /// Dispatch-table id of this subscription.
    pub fn callback_id(&self) -> CallbackId {
        self.callback
    }

    /// Unregister the topic and release the dispatch-table entry.
    ///
    /// The entry is released even if the transport fails to unregister.
    pub async fn close(mut self) -> Result<()> {
        // ---
        self.closed = true;
        let result = self.session.transport().unsubscribe(self.callback).await;
        self.session.dispatch().remove(self.callback);
        result
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // ---
        if self.closed {
            return;
        }
        self.session.dispatch().remove(self.callback);
        crate::log_warn!("subscription to {} dropped without close()", self.wire_topic);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let transport = self.session.transport().clone();
            let callback = self.callback;
            runtime.spawn(async move {
                if let Err(_err) = transport.unsubscribe(callback).await {
                    crate::log_debug!("background unsubscribe of {callback} failed: {_err}");
                }
            });
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("wire_topic", &self.wire_topic)
            .field("callback", &self.callback)
            .finish()
    }
}
