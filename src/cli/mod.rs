//! # CLI Module
//!
//! Command-line entry point for running a supervised server with the built-in
//! [`EchoHandler`](crate::handler::EchoHandler).
//!
//! ## Commands
//!
//! ### `serve`
//!
//! ```bash
//! brrtsupervisor serve --port 8080 --engine thread_pool
//! ```
//!
//! Options:
//! - `--config <FILE>` - YAML options file (see [`options`](crate::options))
//! - `--host <HOST>` / `--port <PORT>` - listen address
//! - `--engine <ENGINE>` - `event_loop` (default) or `thread_pool`
//! - `--background` - run the engine on a worker thread and supervise it
//! - `--readiness-timeout <SECS>` / `--shutdown-timeout <SECS>` - supervisor budgets
//!
//! Precedence, lowest first: defaults, `--config` file, `BRRTS_*` environment,
//! command-line flags.
//!
//! In the foreground the engine runs on the main thread and SIGINT/SIGTERM stop
//! it. With `--background` the main thread waits for a signal and then stops
//! the server through the supervisor, bounded by the shutdown timeout.

mod commands;


pub use commands::{run, run_cli, Cli, Commands, ServeArgs};
