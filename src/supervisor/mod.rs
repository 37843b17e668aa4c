//! # Supervisor Module
//!
//! [`ServerHandle`] owns one [`ServerAdapter`](crate::adapter::ServerAdapter)
//! and controls its lifecycle, either in the foreground (the caller's thread
//! blocks inside the engine) or in the background on a dedicated worker thread.
//!
//! ## Background start
//!
//! [`ServerHandle::start_background`] spawns the worker and polls every 10ms
//! until the engine reports it is running, the worker reports a failure, or
//! the readiness budget runs out:
//!
//! - engine failure (bind error, panic, ...) is re-raised on the caller's
//!   thread as [`ServerError::Engine`](crate::ServerError::Engine), exactly once
//! - no readiness within the budget is [`ServerError::StartupTimeout`](crate::ServerError::StartupTimeout)
//!
//! ## Shutdown
//!
//! [`ServerHandle::stop`] asks the engine to stop gracefully and joins the
//! worker within the same budget. If the worker is still alive afterwards the
//! timeout is logged once, the engine is force-stopped and the worker is given
//! a short grace period before it is detached.
//!
//! Detaching is the last resort: a detached worker may still hold the
//! listening socket until the engine notices the forced stop.

mod handle;
mod signals;
mod worker;


pub use handle::{ServerHandle, ServerState, ShutdownHandle, FORCED_STOP_GRACE, READINESS_POLL_INTERVAL};
pub use worker::WorkerHandle;
