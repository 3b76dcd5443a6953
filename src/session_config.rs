// src/session_config.rs

//! Session configuration document.
//!
//! The transport session is configured by a JSON peer-configuration document
//! read at session construction, by default from [`DEFAULT_CONFIG_PATH`].
//! Before it is handed to the [`SessionFactory`](crate::SessionFactory) the
//! document may be adjusted:
//!
//! - test environments strip the local listen endpoints so that parallel test
//!   processes do not fight over ports;
//! - containerized deployments replace the connect endpoints with a single
//!   router address, taken from an explicit override or from one of the
//!   allow-listed environment variables in [`ROUTER_ENV_VARS`].
//!
//! This type intentionally knows nothing about the transport's own schema
//! beyond the `mode`, `listen.endpoints` and `connect.endpoints` fields it
//! adjusts. Everything else is passed through untouched.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::{Error, Result};

/// Well-known runtime location of the peer-configuration document.
pub const DEFAULT_CONFIG_PATH: &str = "/var/run/meshbus/session.json";

/// Environment variables that may carry a router address.
///
/// Any other variable name is rejected, so a deployment cannot redirect the
/// session through an arbitrary piece of the environment.
pub const ROUTER_ENV_VARS: &[&str] = &["MESHBUS_ROUTER", "MESHBUS_ROUTER_ADDRESS"];

/// Protocol assumed for router addresses given as bare `host:port`.
const DEFAULT_ENDPOINT_PROTOCOL: &str = "tcp";

/// Where the configuration document comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    // ---
    /// Read the document from a file at session construction.
    File(PathBuf),

    /// Use an in-memory document (tests, embedded defaults).
    Inline(Value),
}

impl Default for ConfigSource {
    fn default() -> Self {
        ConfigSource::File(PathBuf::from(DEFAULT_CONFIG_PATH))
    }
}

/// How the router endpoint is chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RouterOverride {
    // ---
    /// Keep the connect endpoints from the document.
    #[default]
    Keep,

    /// Connect to this router address.
    Address(String),

    /// Connect to the router named by this (allow-listed) environment variable,
    /// if it is set.
    Env(String),
}

/// Adjustments applied to the document before session construction.
///
/// Built by [`SessionBuilder`](crate::SessionBuilder); resolved on every
/// 0→1 reference count transition.
#[derive(Debug, Clone, Default)]
pub struct ConfigOptions {
    // ---
    /// Document location.
    pub source: ConfigSource,

    /// Remove `listen.endpoints` from the document.
    pub strip_listen_endpoints: bool,

    /// Router substitution policy.
    pub router: RouterOverride,
}

impl ConfigOptions {
    // ---
    /// Load the document and apply the adjustments, reading router variables
    /// from the process environment.
    pub fn resolve(&self) -> Result<SessionConfig> {
        self.resolve_with_env(|name| std::env::var(name).ok())
    }

    /// Same as [`resolve`](Self::resolve) with an explicit environment lookup.
    pub fn resolve_with_env<F>(&self, lookup: F) -> Result<SessionConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        // ---
        let mut config = match &self.source {
            ConfigSource::File(path) => SessionConfig::load(path)?,
            ConfigSource::Inline(doc) => SessionConfig::from_json(doc.clone())?,
        };

        if self.strip_listen_endpoints {
            config.strip_listen_endpoints();
        }

        match &self.router {
            RouterOverride::Keep => {}
            RouterOverride::Address(addr) => config.set_router(addr)?,
            RouterOverride::Env(name) => {
                if !ROUTER_ENV_VARS.contains(&name.as_str()) {
                    return Err(Error::Config(format!(
                        "environment variable {name} is not an allowed router source"
                    )));
                }
                match lookup(name) {
                    Some(addr) if !addr.trim().is_empty() => config.set_router(&addr)?,
                    _ => {
                        crate::log_debug!("{name} not set, keeping configured endpoints");
                    }
                }
            }
        }

        Ok(config)
    }
}

/// Adjusted peer-configuration document handed to the session factory.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    // ---
    document: Value,
}

impl SessionConfig {
    // ---
    /// Wrap a parsed document. The top level must be a JSON object.
    pub fn from_json(document: Value) -> Result<Self> {
        // ---
        if !document.is_object() {
            return Err(Error::Config(
                "configuration document must be a JSON object".into(),
            ));
        }
        Ok(Self { document })
    }

    /// Parse a document from text.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_json(serde_json::from_str(text)?)
    }

    /// Read and parse the document at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        // ---
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        crate::log_debug!("loaded session config from {}", path.display());
        Self::parse(&text)
    }

    /// Empty document; the transport falls back to its own defaults.
    pub fn empty() -> Self {
        Self {
            document: Value::Object(Map::new()),
        }
    }

    /// The full adjusted document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Session mode (`"peer"`, `"client"`, ...), if configured.
    pub fn mode(&self) -> Option<&str> {
        self.document.get("mode").and_then(Value::as_str)
    }

    /// Endpoints the session listens on.
    pub fn listen_endpoints(&self) -> Vec<String> {
        self.endpoints("listen")
    }

    /// Endpoints the session connects to.
    pub fn connect_endpoints(&self) -> Vec<String> {
        self.endpoints("connect")
    }

    fn endpoints(&self, section: &str) -> Vec<String> {
        // ---
        self.document
            .get(section)
            .and_then(|s| s.get("endpoints"))
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove all local listen endpoints.
    pub fn strip_listen_endpoints(&mut self) {
        // ---
        if let Some(listen) = self
            .document
            .get_mut("listen")
            .and_then(Value::as_object_mut)
        {
            listen.remove("endpoints");
        }
    }

    /// Replace the connect endpoints with a single router endpoint.
    ///
    /// A bare `host:port` is given the default `tcp/` protocol prefix.
    pub fn set_router(&mut self, address: &str) -> Result<()> {
        // ---
        let endpoint = normalize_endpoint(address)?;

        let Some(root) = self.document.as_object_mut() else {
            return Err(Error::Config("configuration document is not an object".into()));
        };
        let connect = root
            .entry("connect")
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(connect) = connect.as_object_mut() else {
            return Err(Error::Config("`connect` section is not an object".into()));
        };
        connect.insert("endpoints".into(), Value::from(vec![endpoint]));
        Ok(())
    }
}

fn normalize_endpoint(address: &str) -> Result<String> {
    // ---
    let address = address.trim();
    let (proto, locator) = match address.split_once('/') {
        Some((proto, locator)) => (proto, locator),
        None => (DEFAULT_ENDPOINT_PROTOCOL, address),
    };

    let valid_locator = locator
        .rsplit_once(':')
        .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        .unwrap_or(false);

    if proto.is_empty() || !valid_locator {
        return Err(Error::Config(format!("invalid router address {address:?}")));
    }
    Ok(format!("{proto}/{locator}"))
}
