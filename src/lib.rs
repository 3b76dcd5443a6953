//! Publish/subscribe and key-value client core over a shared transport session
//!
//! This library wraps an opaque, callback-driven transport session with typed
//! publishers and subscriptions, a namespaced key-value store, and finite
//! query result streams. One reference-counted [`SharedSession`] owns the
//! transport connection; every component borrows it through a [`Session`]
//! handle.
//!
//! Messages and stored values travel inside a timestamped [`Envelope`]. The
//! transport only ever sees wire names, bytes and opaque [`CallbackId`]s; the
//! [`DispatchTable`] routes its callbacks back to the owning objects.
//!
//! ```
//! use meshbus::{create_memory_factory_with_hub, MemoryHub, Publisher, Qos, SharedSession};
//!
//! # #[tokio::main]
//! # async fn main() -> meshbus::Result<()> {
//! let shared = SharedSession::builder()
//!     .factory_ptr(create_memory_factory_with_hub(MemoryHub::new()))
//!     .config_document(serde_json::json!({ "mode": "peer" }))
//!     .build()?;
//! let session = shared.acquire()?;
//!
//! let publisher = Publisher::new(&session, "/robot/status", Qos::Reliable).await?;
//! publisher.publish(&"ready".to_string()).await?;
//! publisher.close().await?;
//!
//! shared.release();
//! # Ok(())
//! # }
//! ```

// Import all sub modules once...
mod macros;

mod dispatch;
mod domain;
mod error;
mod kv;
mod naming;
mod publisher;
mod query;
mod session;
mod session_config;
mod subscription;
mod transport;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use error::{Error, Result, ReturnCode};

pub use dispatch::DispatchTable;
pub use kv::{ConsistencyPolicy, KvStore};
pub use publisher::Publisher;
pub use query::{QueryEvent, QueryHandle, QueryStream};
pub use session::{Session, SessionBuilder, SharedSession};
pub use subscription::Subscription;

pub use naming::{wire_key, wire_topic, DEFAULT_PREFIX, REPLICATED_PREFIX, TOPIC_NAMESPACE};
pub use session_config::{
    // ---
    ConfigOptions,
    ConfigSource,
    RouterOverride,
    SessionConfig,
    DEFAULT_CONFIG_PATH,
    ROUTER_ENV_VARS,
};

pub use transport::{create_memory_factory, create_memory_factory_with_hub, MemoryHub};

// --- public re-exports
pub use domain::{
    //
    CallbackId,
    Envelope,
    FactoryPtr,
    Message,
    Payload,
    PublisherId,
    Qos,
    SessionFactory,
    SessionPtr,
    TransportSession,
};
