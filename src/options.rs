//! # Options Module
//!
//! Construction options for a supervised server.
//!
//! Options come from three layers, later layers winning:
//!
//! 1. Built-in defaults (`127.0.0.1:8889`, `info` logging, 5 second timeouts)
//! 2. An optional YAML file loaded with [`ServerOptions::from_yaml_file`]
//! 3. `BRRTS_*` environment variables applied by [`ServerOptions::apply_env`]
//!
//! ## Example Configuration
//!
//! ```yaml
//! host: 0.0.0.0
//! port: 8080
//! engine: thread_pool
//! workers: 8
//! readiness_timeout: 2.5
//! shutdown_timeout: 10
//! log:
//!   level: debug
//!   format: pretty
//! ```

use crate::adapter::EngineKind;
use crate::error::ConfigError;
use crate::logging::{LogConfig, LogFormat};
use crate::runtime_config::RuntimeConfig;
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8889;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for building an adapter and supervising it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub engine: EngineKind,
    pub log: LogConfig,
    /// Readiness budget for a background start, in seconds
    #[serde(with = "duration_secs")]
    pub readiness_timeout: Duration,
    /// Shutdown budget used by `Drop` and the CLI, in seconds
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,
    /// Worker threads for the thread-pool engine
    pub workers: usize,
    /// Coroutine runtime settings for the event-loop engine
    pub runtime: RuntimeConfig,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            engine: EngineKind::default(),
            log: LogConfig::default(),
            readiness_timeout: DEFAULT_TIMEOUT,
            shutdown_timeout: DEFAULT_TIMEOUT,
            workers: 4,
            runtime: RuntimeConfig::default(),
        }
    }
}

impl ServerOptions {
    /// Load options from a YAML file; missing keys keep their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_yaml_str(&text).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Override fields from `BRRTS_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("BRRTS_HOST") {
            self.host = host;
        }
        if let Some(port) = parse_env("BRRTS_PORT")? {
            self.port = port;
        }
        if let Ok(engine) = env::var("BRRTS_ENGINE") {
            self.engine = engine.parse().map_err(|_| ConfigError::InvalidValue {
                key: "BRRTS_ENGINE",
                value: engine,
            })?;
        }
        if let Ok(level) = env::var("BRRTS_LOG_LEVEL") {
            self.log.level = level;
        }
        if let Ok(format) = env::var("BRRTS_LOG_FORMAT") {
            self.log.format = LogFormat::parse(&format);
        }
        if let Some(workers) = parse_env("BRRTS_WORKERS")? {
            self.workers = workers;
        }
        if let Some(secs) = parse_env::<f64>("BRRTS_READINESS_TIMEOUT")? {
            self.readiness_timeout = secs_to_duration("BRRTS_READINESS_TIMEOUT", secs)?;
        }
        if let Some(secs) = parse_env::<f64>("BRRTS_SHUTDOWN_TIMEOUT")? {
            self.shutdown_timeout = secs_to_duration("BRRTS_SHUTDOWN_TIMEOUT", secs)?;
        }
        self.runtime.apply_env();
        Ok(())
    }

    /// Base URL clients use to reach the server.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Options for a foreground [`start`](crate::ServerHandle::start).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Print the startup banner to stdout
    pub publish: bool,
    /// Stop the engine on SIGINT/SIGTERM while `start` blocks
    pub handle_signals: bool,
}

fn parse_env<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        Err(_) => Ok(None),
    }
}

fn secs_to_duration(key: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidValue {
        key,
        value: secs.to_string(),
    })
}

/// Durations written as (fractional) seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

// Tests touching BRRTS_* variables are serialized.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
