// src/session.rs

//! Shared, reference-counted transport session.
//!
//! A process talks to the transport through one session at a time. The
//! [`SharedSession`] context object owns that session and counts its users:
//!
//! - [`acquire`](SharedSession::acquire) on a zero count resolves the
//!   configuration document and opens a new session through the
//!   [`SessionFactory`]; a failure leaves the count at zero and nothing
//!   half-initialized behind;
//! - [`release`](SharedSession::release) dropping the count to zero tears the
//!   session down;
//! - the count never goes negative, a surplus `release` is logged and ignored.
//!
//! All of this happens under one mutex. Publishers, subscriptions and KV stores
//! receive a [`Session`] handle from `acquire` and reach the transport only
//! through it.
//!
//! Dropping the last clone of a `SharedSession` while the count is still
//! nonzero tears the session down as a safety net. Callers are still expected
//! to pair every `acquire` with a `release`.
//!
//! The safety net only fires when that last clone is actually dropped. Rust
//! does not run destructors for statics, so a `SharedSession` kept in a
//! `static` or `OnceLock` is never torn down at process exit; release it
//! explicitly before the process ends.

use std::sync::{Arc, Mutex};

use crate::dispatch::lock_ignore_poison;
use crate::session_config::{ConfigOptions, ConfigSource, RouterOverride, ROUTER_ENV_VARS};
use crate::{DispatchTable, Error, FactoryPtr, Result, SessionFactory, SessionPtr};

/// Handle to the live transport session, returned by
/// [`SharedSession::acquire`].
///
/// Cheap to clone. A `Session` does not keep the reference count up by
/// itself; it stays usable until the matching `release`, after which transport
/// calls fail with `ReturnCode::NotInitialized`.
#[derive(Clone)]
pub struct Session {
    // ---
    transport: SessionPtr,
    dispatch: Arc<DispatchTable>,
}

impl Session {
    // ---
    /// Identifier of the underlying transport session.
    pub fn session_id(&self) -> &str {
        self.transport.session_id()
    }

    pub(crate) fn transport(&self) -> &SessionPtr {
        &self.transport
    }

    pub(crate) fn dispatch(&self) -> &Arc<DispatchTable> {
        &self.dispatch
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id())
            .field("dispatch_entries", &self.dispatch.len())
            .finish()
    }
}

struct State {
    count: usize,
    session: Option<SessionPtr>,
}

struct SharedInner {
    factory: FactoryPtr,
    options: ConfigOptions,
    dispatch: Arc<DispatchTable>,
    state: Mutex<State>,
}

impl Drop for SharedInner {
    fn drop(&mut self) {
        // ---
        let state = match self.state.get_mut() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(session) = state.session.take() {
            crate::log_warn!(
                "{}: shared session dropped with {} outstanding acquire(s), tearing down",
                session.session_id(),
                state.count
            );
            state.count = 0;
            session.teardown();
        }
    }
}

/// Process-wide, reference-counted owner of one transport session.
///
/// Cheap to clone; all clones share the same count and session.
///
/// # Example
///
/// ```
/// use meshbus::{create_memory_factory, SharedSession};
///
/// # #[tokio::main]
/// # async fn main() -> meshbus::Result<()> {
/// let shared = SharedSession::builder()
///     .factory_ptr(create_memory_factory())
///     .config_document(serde_json::json!({ "mode": "peer" }))
///     .build()?;
///
/// let session = shared.acquire()?;
/// assert_eq!(shared.ref_count(), 1);
/// # drop(session);
/// shared.release();
/// assert_eq!(shared.ref_count(), 0);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SharedSession {
    inner: Arc<SharedInner>,
}

impl SharedSession {
    // ---
    /// Create a shared session context. No transport session is opened until
    /// the first [`acquire`](Self::acquire).
    pub fn new(factory: FactoryPtr, options: ConfigOptions) -> Self {
        // ---
        Self {
            inner: Arc::new(SharedInner {
                factory,
                options,
                dispatch: DispatchTable::new(),
                state: Mutex::new(State {
                    count: 0,
                    session: None,
                }),
            }),
        }
    }

    /// Start building a shared session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Take a reference to the session, opening it if nobody holds one.
    ///
    /// # Errors
    ///
    /// Configuration and transport initialization failures are returned as
    /// is; the reference count stays unchanged.
    pub fn acquire(&self) -> Result<Session> {
        // ---
        let mut state = lock_ignore_poison(&self.inner.state);

        let transport = match &state.session {
            Some(existing) => existing.clone(),
            None => {
                let config = self.inner.options.resolve()?;
                let opened = self
                    .inner
                    .factory
                    .open(&config, self.inner.dispatch.clone())?;
                crate::log_info!("{}: session opened", opened.session_id());
                state.session = Some(opened.clone());
                opened
            }
        };

        state.count += 1;
        crate::log_debug!(
            "{}: acquired, ref count {}",
            transport.session_id(),
            state.count
        );

        Ok(Session {
            transport,
            dispatch: self.inner.dispatch.clone(),
        })
    }

    /// Drop a reference, tearing the session down when it was the last one.
    pub fn release(&self) {
        // ---
        let mut state = lock_ignore_poison(&self.inner.state);

        if state.count == 0 {
            crate::log_warn!("release() without matching acquire(), ignored");
            return;
        }

        state.count -= 1;
        if state.count > 0 {
            crate::log_debug!("released, ref count {}", state.count);
            return;
        }

        if let Some(session) = state.session.take() {
            crate::log_info!("{}: last reference released, tearing down", session.session_id());
            session.teardown();
        }
    }

    /// Current number of outstanding `acquire` calls.
    pub fn ref_count(&self) -> usize {
        lock_ignore_poison(&self.inner.state).count
    }

    /// Whether a transport session is currently open.
    pub fn is_open(&self) -> bool {
        lock_ignore_poison(&self.inner.state).session.is_some()
    }

    /// Dispatch table shared by every session this context opens.
    pub fn dispatch(&self) -> &Arc<DispatchTable> {
        &self.inner.dispatch
    }
}

/// Builder for [`SharedSession`].
///
/// # Examples
///
/// ## Test process with an isolated memory hub
/// ```
/// use meshbus::{create_memory_factory_with_hub, MemoryHub, SharedSession};
///
/// # fn example() -> meshbus::Result<()> {
/// let hub = MemoryHub::new();
/// let shared = SharedSession::builder()
///     .factory_ptr(create_memory_factory_with_hub(hub))
///     .config_document(serde_json::json!({ "listen": { "endpoints": ["tcp/0.0.0.0:7447"] } }))
///     .strip_listen_endpoints(true)
///     .build()?;
/// # Ok(())
/// # }
/// ```
///
/// ## Containerized deployment
/// ```no_run
/// use meshbus::{create_memory_factory, SharedSession};
///
/// # fn example() -> meshbus::Result<()> {
/// let shared = SharedSession::builder()
///     .factory_ptr(create_memory_factory())
///     .router_from_env("MESHBUS_ROUTER")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    factory: Option<FactoryPtr>,
    source: Option<ConfigSource>,
    strip_listen_endpoints: bool,
    router_address: Option<String>,
    router_env: Option<String>,
}

impl SessionBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            factory: None,
            source: None,
            strip_listen_endpoints: false,
            router_address: None,
            router_env: None,
        }
    }

    /// Set the session factory (required).
    pub fn factory<F>(self, factory: F) -> Self
    where
        F: SessionFactory + 'static,
    {
        self.factory_ptr(Arc::new(factory))
    }

    /// Set an already shared session factory (required).
    pub fn factory_ptr(mut self, factory: FactoryPtr) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Read the configuration document from `path`.
    ///
    /// Default: [`DEFAULT_CONFIG_PATH`](crate::DEFAULT_CONFIG_PATH).
    pub fn config_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.source = Some(ConfigSource::File(path.into()));
        self
    }

    /// Use an in-memory configuration document instead of a file.
    pub fn config_document(mut self, document: serde_json::Value) -> Self {
        self.source = Some(ConfigSource::Inline(document));
        self
    }

    /// Strip local listen endpoints from the document (test environments).
    pub fn strip_listen_endpoints(mut self, strip: bool) -> Self {
        self.strip_listen_endpoints = strip;
        self
    }

    /// Connect to this router instead of the configured endpoints.
    ///
    /// Cannot be used together with [`router_from_env`](Self::router_from_env).
    pub fn router_address(mut self, address: impl Into<String>) -> Self {
        self.router_address = Some(address.into());
        self
    }

    /// Take the router address from an allow-listed environment variable.
    ///
    /// Cannot be used together with [`router_address`](Self::router_address).
    pub fn router_from_env(mut self, variable: impl Into<String>) -> Self {
        self.router_env = Some(variable.into());
        self
    }

    /// Build the shared session (consumes self).
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - no factory was set
    /// - both router sources were set
    /// - the router variable is not in [`ROUTER_ENV_VARS`]
    pub fn build(self) -> Result<SharedSession> {
        // ---
        let factory = self
            .factory
            .ok_or_else(|| Error::MissingConfig("factory".into()))?;

        let router = match (self.router_address, self.router_env) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "cannot use both router_address and router_from_env".into(),
                ));
            }
            (Some(addr), None) => RouterOverride::Address(addr),
            (None, Some(var)) => {
                if !ROUTER_ENV_VARS.contains(&var.as_str()) {
                    return Err(Error::Config(format!(
                        "environment variable {var} is not an allowed router source, \
                         valid values: {}",
                        ROUTER_ENV_VARS.join(", ")
                    )));
                }
                RouterOverride::Env(var)
            }
            (None, None) => RouterOverride::Keep,
        };

        let options = ConfigOptions {
            source: self.source.unwrap_or_default(),
            strip_listen_endpoints: self.strip_listen_endpoints,
            router,
        };

        Ok(SharedSession::new(factory, options))
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
