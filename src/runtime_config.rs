//! # Runtime Configuration Module
//!
//! Coroutine runtime settings for the event-loop engine.
//!
//! The `may` runtime backing [`EventLoopAdapter`](crate::adapter::EventLoopAdapter)
//! runs the accept loop and one coroutine per connection. This module loads the
//! knobs that matter for that runtime from the environment and applies them to
//! `may::config()` when the adapter is constructed.
//!
//! ## Environment Variables
//!
//! ### `BRRTS_STACK_SIZE`
//!
//! Sets the stack size for connection coroutines. Accepts values in:
//! - Decimal: `16384` (16 KB)
//! - Hexadecimal: `0x4000` (16 KB)
//!
//! Default: `0x4000` (16 KB)
//!
//! ### `BRRTS_MAY_WORKERS`
//!
//! Number of OS threads driving the coroutine scheduler. Unset keeps the
//! runtime's own default (one per CPU).
//!
//! ## Usage
//!
//! ```rust
//! use brrtsupervisor::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("Stack size: {} bytes", config.stack_size);
//! ```

use serde::Deserialize;
use std::env;

const DEFAULT_STACK_SIZE: usize = 0x4000;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Stack size for coroutines in bytes (default: 16 KB / 0x4000)
    pub stack_size: usize,
    /// Scheduler worker threads; `None` keeps the runtime default
    pub workers: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            workers: None,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `BRRTS_STACK_SIZE` / `BRRTS_MAY_WORKERS`; unparsable
    /// values are ignored.
    pub fn apply_env(&mut self) {
        if let Some(stack_size) = env::var("BRRTS_STACK_SIZE")
            .ok()
            .and_then(|val| parse_size(&val))
        {
            self.stack_size = stack_size;
        }
        if let Some(workers) = env::var("BRRTS_MAY_WORKERS")
            .ok()
            .and_then(|val| val.trim().parse().ok())
            .filter(|n: &usize| *n > 0)
        {
            self.workers = Some(workers);
        }
    }

    /// Apply to the process-wide `may` scheduler configuration.
    ///
    /// Only takes effect if called before the scheduler's first coroutine is spawned.
    pub fn apply(&self) {
        let config = may::config();
        config.set_stack_size(self.stack_size);
        if let Some(workers) = self.workers {
            config.set_workers(workers);
        }
    }
}

/// Parse a byte count given in decimal or `0x`-prefixed hexadecimal.
pub fn parse_size(val: &str) -> Option<usize> {
    let val = val.trim();
    match val.strip_prefix("0x") {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => val.parse().ok(),
    }
}
