// src/publisher.rs

//! Topic publishers.

use bytes::Bytes;

use crate::naming::wire_topic;
use crate::{Envelope, Message, Payload, PublisherId, Qos, Result, Session};

/// Publisher bound to one topic.
///
/// Each [`publish`](Self::publish) call is independent. Concurrent publishes
/// on the same publisher carry no ordering guarantee; callers that need one
/// must serialize their calls. [`close`](Self::close) consumes the publisher,
/// so it can never overlap an in-flight publish.
pub struct Publisher {
    // ---
    session: Session,
    id: PublisherId,
    topic: String,
    wire_topic: String,
    qos: Qos,
    closed: bool,
}

impl Publisher {
    /// Declare a publisher for `topic` on the session.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the declaration fails. Nothing stays
    /// registered in that case.
    pub async fn new(session: &Session, topic: &str, qos: Qos) -> Result<Self> {
        // ---
        let wire = wire_topic(topic);
        let id = session.transport().declare_publisher(&wire, qos).await?;

        crate::log_debug!("{}: publisher {id:?} ready on {wire}", session.session_id());

        Ok(Self {
            session: session.clone(),
            id,
            topic: topic.to_string(),
            wire_topic: wire,
            qos,
            closed: false,
        })
    }

    /// Wrap `message` in an envelope stamped with the current time and
    /// publish it.
    pub async fn publish<T: Message>(&self, message: &T) -> Result<()> {
        // ---
        let envelope = Envelope::pack(message)?;
        self.publish_envelope(&envelope).await
    }

    /// Publish an already packed payload.
    pub async fn publish_payload(&self, payload: Payload) -> Result<()> {
        // ---
        self.publish_envelope(&Envelope::new(payload)).await
    }

    async fn publish_envelope(&self, envelope: &Envelope) -> Result<()> {
        // ---
        let bytes: Bytes = envelope.encode()?;
        self.session.transport().publish(self.id, bytes).await
    }

    /// Whether any subscriber currently matches this publisher's topic.
    ///
    /// Best-effort: the answer may be stale by the time it is returned.
    pub async fn has_matching_subscribers(&self) -> Result<bool> {
        self.session.transport().has_matching_subscribers(self.id).await
    }

    /// Public topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Subject the topic is declared under on the wire.
    pub fn wire_topic(&self) -> &str {
        &self.wire_topic
    }

    /// Delivery class the publisher was declared with.
    pub fn qos(&self) -> Qos {
        self.qos
    }

    /// Undeclare the publisher.
    pub async fn close(mut self) -> Result<()> {
        // ---
        self.closed = true;
        self.session.transport().undeclare_publisher(self.id).await
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        // ---
        if self.closed {
            return;
        }
        crate::log_warn!("publisher on {} dropped without close()", self.wire_topic);

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let transport = self.session.transport().clone();
            let id = self.id;
            runtime.spawn(async move {
                if let Err(_err) = transport.undeclare_publisher(id).await {
                    crate::log_debug!("background undeclare of {id:?} failed: {_err}");
                }
            });
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("wire_topic", &self.wire_topic)
            .field("qos", &self.qos)
            .finish()
    }
}
