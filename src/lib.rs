//! # brrtsupervisor
//!
//! **brrtsupervisor** runs an embedded HTTP server behind one uniform control
//! surface, no matter which engine serves the requests, and supervises its
//! lifecycle when it runs in the background.
//!
//! ## Overview
//!
//! A server is an engine adapter ([`adapter::ServerAdapter`]) wrapped in a
//! [`ServerHandle`]. The handle can run the engine on the caller's thread or on
//! a dedicated worker thread. In the background case it waits for readiness,
//! relays engine failures to the caller, and bounds shutdown with a timeout
//! before forcing the engine down.
//!
//! ## Architecture
//!
//! - **[`adapter`]** - the capability set (`start`/`stop`/`is_running`) and two engines:
//!   `may_minihttp` (coroutine event loop) and `tiny_http` (OS thread pool)
//! - **[`supervisor`]** - [`ServerHandle`], the worker task and its readiness/shutdown protocols
//! - **[`handler`]** - the request handler the engines call, plus a built-in echo handler
//! - **[`options`]** - YAML + environment configuration
//! - **[`logging`]** - explicit logger configuration turned into a scoped `tracing` dispatcher
//! - **[`error`]** - engine, supervisor and configuration errors
//!
//! ### Background Start
//!
//! ```mermaid
//! sequenceDiagram
//!     participant Caller
//!     participant Handle as ServerHandle
//!     participant Worker as Worker thread
//!     participant Engine as ServerAdapter
//!
//!     Caller->>Handle: start_background(timeout)
//!     Handle->>Worker: spawn
//!     Worker->>Engine: start() (blocks)
//!     loop every 10ms until deadline
//!         Handle->>Engine: is_running()?
//!         Handle->>Worker: exit message?
//!     end
//!     alt engine running
//!         Handle-->>Caller: Ok(WorkerHandle)
//!     else engine failed
//!         Worker-->>Handle: WorkerExit::Failed(error)
//!         Handle-->>Caller: Err(ServerError::Engine(error))
//!     else deadline passed
//!         Handle-->>Caller: Err(ServerError::StartupTimeout)
//!     end
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use brrtsupervisor::handler::EchoHandler;
//! use brrtsupervisor::{ServerHandle, ServerOptions};
//! use std::time::Duration;
//!
//! let options = ServerOptions {
//!     port: 0,
//!     ..ServerOptions::default()
//! };
//! let mut server = ServerHandle::from_options(EchoHandler, &options)?;
//! server.start_background(Duration::from_secs(5))?;
//! println!("serving at {}", server.url());
//! server.stop(Duration::from_secs(5));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Runtime Configuration
//!
//! - `BRRTS_STACK_SIZE` - coroutine stack size for the event-loop engine (decimal or `0x` hex)
//! - `BRRTS_MAY_WORKERS` - number of `may` scheduler threads
//! - `BRRTS_LOG_LEVEL` / `BRRTS_LOG_FORMAT` - see [`logging`]
//! - `BRRTS_HOST`, `BRRTS_PORT`, `BRRTS_ENGINE`, ... - see [`options`]

pub mod adapter;
pub mod cli;
pub mod error;
pub mod handler;
pub mod logging;
pub mod options;
pub mod runtime_config;
pub mod supervisor;

pub use adapter::{EngineKind, ServerAdapter};
pub use error::{ConfigError, EngineError, ServerError};
pub use logging::{LogConfig, LogFormat};
pub use options::{ServerOptions, StartOptions};
pub use supervisor::{ServerHandle, ServerState, ShutdownHandle, WorkerHandle};
