// src/error.rs

use std::fmt;

use thiserror::Error;

/// Translated result code of a transport call.
///
/// Native sessions report outcomes as a small set of integers. They are
/// mapped onto this fixed enumeration at the transport boundary so callers
/// never branch on raw numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    /// The call completed.
    Ok,

    /// The call failed for a reason the transport did not classify.
    GenericError,

    /// The session was never initialized or has already been torn down.
    NotInitialized,

    /// Any code outside the known set.
    UnknownError,
}

impl ReturnCode {
    // ---
    /// Translate a raw transport result code.
    ///
    /// `0` is success, `-1` a generic failure and `-2` an uninitialized
    /// session. Every other value maps to [`ReturnCode::UnknownError`].
    pub fn from_raw(code: i32) -> Self {
        // ---
        match code {
            0 => ReturnCode::Ok,
            -1 => ReturnCode::GenericError,
            -2 => ReturnCode::NotInitialized,
            _ => ReturnCode::UnknownError,
        }
    }

    /// Raw value a native session would use for this code.
    pub fn as_raw(self) -> i32 {
        // ---
        match self {
            ReturnCode::Ok => 0,
            ReturnCode::GenericError => -1,
            ReturnCode::NotInitialized => -2,
            ReturnCode::UnknownError => i32::MIN,
        }
    }

    /// Convert a raw code into a `Result`, surfacing failures as
    /// [`Error::Transport`].
    pub fn check(code: i32) -> Result<()> {
        // ---
        match Self::from_raw(code) {
            ReturnCode::Ok => Ok(()),
            failure => Err(Error::Transport(failure)),
        }
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReturnCode::Ok => "ok",
            ReturnCode::GenericError => "generic error",
            ReturnCode::NotInitialized => "session not initialized",
            ReturnCode::UnknownError => "unknown error",
        };
        f.write_str(text)
    }
}

/// Errors produced by sessions, publishers, subscriptions and KV stores.
#[derive(Error, Debug)]
pub enum Error {
    /// The transport session could not be constructed.
    #[error("session initialization failed: {0}")]
    SessionInit(String),

    /// The session configuration document is invalid or could not be adjusted.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required builder field was not provided.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Reading the configuration document failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A transport call returned a failure code.
    #[error("transport call failed: {0}")]
    Transport(ReturnCode),

    /// A QoS value the transport does not recognize.
    #[error("invalid qos: {0}")]
    InvalidQos(String),

    /// The query completed without any stored value matching the key.
    #[error("key not found")]
    NotFound,

    /// A caller timeout or the consistency deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Envelope or payload (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The payload carries a different message type than the one requested.
    #[error("payload type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Type the caller asked for.
        expected: String,
        /// Type recorded in the payload.
        found: String,
    },

    /// The query result stream ended without a completion signal.
    #[error("query stream closed before completion")]
    QueryAborted,
}

/// Result type alias for meshbus operations
pub type Result<T> = std::result::Result<T, Error>;
