// src/domain/envelope.rs

//! Wire envelope shared by pub/sub messages and KV values.
//!
//! Every message crossing a topic, and every value stored under a key, is
//! wrapped as `{publish_time, payload}` before it reaches the transport. The
//! payload is opaquely typed: it records the name of the message type next to
//! the encoded bytes so that a receiver can check what it got before decoding.
//!
//! The transport never looks inside an envelope.

use std::time::SystemTime;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A message type that can travel inside a [`Payload`].
///
/// The default [`type_name`](Message::type_name) is the Rust type path.
/// Override it when the publishing and subscribing sides are built from
/// different crates and need a stable, shared name.
///
/// ```
/// use meshbus::Message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Heartbeat {
///     seq: u64,
/// }
///
/// impl Message for Heartbeat {
///     fn type_name() -> &'static str {
///         "robot.Heartbeat"
///     }
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + 'static {
    /// Declared type name recorded in the payload.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

macro_rules! impl_message {
    ($($ty:ty),* $(,)?) => {
        $(impl Message for $ty {})*
    };
}

impl_message!(bool, u8, u16, u32, u64, i8, i16, i32, i64, f32, f64, String, serde_json::Value);

/// Opaquely typed payload: a declared type name plus the encoded value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    // ---
    /// Declared message type, see [`Message::type_name`].
    pub type_name: String,

    /// Encoded message bytes.
    pub value: Bytes,
}

impl Payload {
    // ---
    /// Encode `msg` into a payload tagged with its declared type.
    pub fn pack<T: Message>(msg: &T) -> Result<Self> {
        // ---
        let value = serde_json::to_vec(msg)?;
        Ok(Self {
            type_name: T::type_name().to_string(),
            value: Bytes::from(value),
        })
    }

    /// Decode the payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the payload was packed from a
    /// different type, or [`Error::Serialization`] if the bytes do not decode.
    pub fn unpack<T: Message>(&self) -> Result<T> {
        // ---
        if !self.is::<T>() {
            return Err(Error::TypeMismatch {
                expected: T::type_name().to_string(),
                found: self.type_name.clone(),
            });
        }
        Ok(serde_json::from_slice(&self.value)?)
    }

    /// Whether the payload declares type `T`.
    pub fn is<T: Message>(&self) -> bool {
        self.type_name == T::type_name()
    }
}

/// Timestamped wrapper around a [`Payload`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    // ---
    /// Time the envelope was created by the publisher or writer.
    pub publish_time: SystemTime,

    /// The wrapped message.
    pub payload: Payload,
}

impl Envelope {
    // ---
    /// Wrap a payload, stamping it with the current time.
    pub fn new(payload: Payload) -> Self {
        // ---
        Self {
            publish_time: SystemTime::now(),
            payload,
        }
    }

    /// Pack `msg` and wrap it in a freshly stamped envelope.
    pub fn pack<T: Message>(msg: &T) -> Result<Self> {
        Ok(Self::new(Payload::pack(msg)?))
    }

    /// Serialize the envelope into transport bytes.
    pub fn encode(&self) -> Result<Bytes> {
        // ---
        let bytes = serde_json::to_vec(self)?;
        Ok(Bytes::from(bytes))
    }

    /// Deserialize an envelope from transport bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
