//! # Error Module
//!
//! Error kinds raised by engines, by the supervisor and by option loading.
//!
//! Engine failures ([`EngineError`]) are produced inside an adapter's blocking
//! `start()`. When the engine runs on a background worker they are relayed to
//! the controller over the worker's completion channel and re-raised exactly
//! once as [`ServerError::Engine`]. Supervisor-level conditions such as a
//! readiness timeout are distinct variants of [`ServerError`] because their
//! cause is unknown to the engine.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by an engine's blocking `start()`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not bind its listening endpoint.
    #[error("failed to bind {addr}: {source}")]
    Startup {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// The accept/serve loop ended for a reason other than a stop request.
    #[error("engine stopped unexpectedly: {0}")]
    Runtime(String),

    /// The engine panicked while serving.
    #[error("engine panicked: {0}")]
    Panicked(String),

    /// `start()` was called while the engine was already starting or running.
    #[error("engine is already running")]
    AlreadyRunning,

    /// Host/port could not be turned into a socket address.
    #[error("cannot resolve listen address {host}:{port}: {source}")]
    AddrResolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    /// True for failures that happened before the engine was serving.
    pub fn is_startup(&self) -> bool {
        matches!(self, EngineError::Startup { .. } | EngineError::AddrResolve { .. })
    }
}

/// Failure surfaced to the caller of a [`ServerHandle`](crate::ServerHandle).
#[derive(Debug, Error)]
pub enum ServerError {
    /// The engine itself failed; this is the exact error raised by `start()`.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Readiness was not observed within the caller's budget.
    #[error("server did not become ready within {timeout:?}")]
    StartupTimeout { timeout: Duration },

    /// The engine returned from `start()` without error before it was ever running.
    #[error("engine exited before it became ready")]
    ExitedBeforeReady,

    /// A worker task is already active for this handle.
    #[error("server already started")]
    AlreadyStarted,

    /// The worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

impl ServerError {
    /// True when the engine reported a bind/resolve failure.
    pub fn is_startup_failure(&self) -> bool {
        matches!(self, ServerError::Engine(e) if e.is_startup())
    }

    /// True when readiness timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ServerError::StartupTimeout { .. })
    }
}

/// Failure while loading [`ServerOptions`](crate::options::ServerOptions).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}
