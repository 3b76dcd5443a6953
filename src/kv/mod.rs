//! Key-value store over the shared session.
//!
//! Values are wrapped in the same [`Envelope`](crate::Envelope) as pub/sub
//! messages and stored under a namespaced wire key, see
//! [`wire_key`](crate::wire_key).

mod consistency;
mod store;

pub use consistency::ConsistencyPolicy;
pub use store::KvStore;
