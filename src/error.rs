//! Error types for the AutoMan client.
//!
//! Every fallible operation in the crate returns [`Result`]. The variants of
//! [`Error`] separate problems with caller input (detected before any I/O)
//! from problems reaching the backend, problems the backend reported, and
//! waits that ran out of time.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the AutoMan client.
///
/// `Error` is `Clone` so that a failure cached on an
/// [`OutcomeHandle`](crate::client::OutcomeHandle) can be handed to every
/// caller that resolves it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed or missing caller input.
    #[error("ArgumentError: {0}")]
    Argument(String),

    /// The adapter credential map is incomplete or names an unsupported backend.
    #[error("AdapterError: {0}")]
    Adapter(String),

    /// A non-local backend address was requested.
    #[error("UnsupportedServerError: only locally hosted servers at localhost are supported (got '{address}')")]
    UnsupportedServer {
        /// The rejected address.
        address: String,
    },

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The backend process could not be started or reached.
    #[error("RPCServerError: {0}")]
    Startup(String),

    /// Nothing is listening at the backend endpoint.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with an `ERROR` or `EXCEPTION` return code.
    #[error("{code}: {message}")]
    Backend {
        /// Which return code the backend used.
        code: BackendErrorCode,
        /// Text supplied by the backend.
        message: String,
    },

    /// The backend answered with a return code this client does not understand.
    #[error("undefined response code returned; backend and client protocol versions may differ")]
    ProtocolVersion,

    /// A reply did not have the shape the request called for.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A resolution wait ran out of time. The handle is still pending.
    #[error("outcome not ready within {0:?}")]
    Timeout(Duration),

    /// The in-flight response was cancelled by the transport.
    #[error("request cancelled: {0}")]
    Cancelled(String),

    /// I/O failure on the channel.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Encoding or decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// The two failing return codes a backend can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorCode {
    /// `ERROR`: the backend rejected or failed the task.
    Error,
    /// `EXCEPTION`: the backend raised an exception while running the task.
    Exception,
}

impl std::fmt::Display for BackendErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "ERROR"),
            Self::Exception => write!(f, "EXCEPTION"),
        }
    }
}

impl Error {
    /// Create an argument error.
    pub fn argument(msg: impl Into<String>) -> Self {
        Self::Argument(msg.into())
    }

    /// Create an adapter error.
    pub fn adapter(msg: impl Into<String>) -> Self {
        Self::Adapter(msg.into())
    }

    /// Create a startup error.
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Returns `true` when waiting again may succeed.
    ///
    /// Only [`Error::Timeout`] qualifies: the handle stays pending and a later
    /// resolution with more time can still produce an outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Returns `true` for errors detected locally before any network call.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Argument(_)
                | Self::Adapter(_)
                | Self::UnsupportedServer { .. }
                | Self::Configuration(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                Self::Unavailable(err.to_string())
            },
            _ => Self::Transport(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(format!("TOML parse error: {}", err))
    }
}
