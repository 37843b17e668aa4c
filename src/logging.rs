//! Logging configuration
//!
//! The supervisor logs through `tracing`. Instead of installing a process-wide
//! subscriber as a side effect of constructing a server, a [`LogConfig`] is
//! turned into a [`tracing::Dispatch`] that a
//! [`ServerHandle`](crate::ServerHandle) scopes around its own log calls and
//! around the worker thread. Binaries that do want a global subscriber call
//! [`LogConfig::init_global`] once at startup.
//!
//! ## Environment Variables
//!
//! - `BRRTS_LOG_LEVEL`: trace/debug/info/warn/error or any `EnvFilter` directive (default: `info`)
//! - `BRRTS_LOG_FORMAT`: `json` or `pretty` (default: `json`)

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use tracing::Dispatch;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log format: JSON for production, pretty-print for development
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            _ => LogFormat::Json, // Default to JSON
        }
    }
}

/// Logger configuration handed to a server handle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level or filter directive: trace/debug/info/warn/error
    pub level: String,
    /// Log format: json/pretty
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl LogConfig {
    /// Parse configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `BRRTS_LOG_LEVEL` / `BRRTS_LOG_FORMAT` when set.
    pub fn apply_env(&mut self) {
        if let Ok(level) = env::var("BRRTS_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(format) = env::var("BRRTS_LOG_FORMAT") {
            self.format = LogFormat::parse(&format);
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter = EnvFilter::try_new(&self.level).unwrap_or_else(|_| EnvFilter::new("info"));
        // may_minihttp logs every client disconnect at debug/info.
        if let Ok(directive) = "may_minihttp::http_server=warn".parse() {
            filter = filter.add_directive(directive);
        }
        filter
    }

    /// Build a dispatcher writing to stderr.
    pub fn build_dispatch(&self) -> Dispatch {
        self.build_dispatch_with_writer(std::io::stderr)
    }

    /// Build a dispatcher writing to `writer`.
    pub fn build_dispatch_with_writer<W>(&self, writer: W) -> Dispatch
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let fmt_layer = match self.format {
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_writer(writer)
                .boxed(),
            LogFormat::Pretty => tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        };
        let subscriber = tracing_subscriber::registry()
            .with(self.env_filter())
            .with(fmt_layer);
        Dispatch::new(subscriber)
    }

    /// Install this configuration as the process-wide default subscriber.
    pub fn init_global(&self) -> Result<()> {
        tracing::dispatcher::set_global_default(self.build_dispatch())
            .context("Failed to initialize logging")
    }
}
