use crate::adapter::{build_adapter, EngineKind};
use crate::error::ConfigError;
use crate::handler::EchoHandler;
use crate::options::{ServerOptions, StartOptions};
use crate::supervisor::ServerHandle;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Command-line interface for brrtsupervisor
#[derive(Parser)]
#[command(name = "brrtsupervisor", version)]
#[command(about = "Embedded HTTP server supervisor", long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the echo server until SIGINT/SIGTERM
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// YAML options file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (0 picks a free port)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Engine: event_loop or thread_pool
    #[arg(short, long, value_parser = EngineKind::from_str)]
    pub engine: Option<EngineKind>,

    /// Run the engine on a supervised background worker
    #[arg(long, default_value_t = false)]
    pub background: bool,

    /// Seconds to wait for a background start to become ready
    #[arg(long, value_parser = parse_secs)]
    pub readiness_timeout: Option<Duration>,

    /// Seconds to wait for a graceful stop before forcing it
    #[arg(long, value_parser = parse_secs)]
    pub shutdown_timeout: Option<Duration>,
}

impl ServeArgs {
    /// Merge defaults, the config file, `BRRTS_*` variables and flags.
    pub fn resolve_options(&self) -> Result<ServerOptions, ConfigError> {
        let mut options = match &self.config {
            Some(path) => ServerOptions::from_yaml_file(path)?,
            None => ServerOptions::default(),
        };
        options.apply_env()?;
        if let Some(host) = &self.host {
            options.host = host.clone();
        }
        if let Some(port) = self.port {
            options.port = port;
        }
        if let Some(engine) = self.engine {
            options.engine = engine;
        }
        if let Some(timeout) = self.readiness_timeout {
            options.readiness_timeout = timeout;
        }
        if let Some(timeout) = self.shutdown_timeout {
            options.shutdown_timeout = timeout;
        }
        Ok(options)
    }
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    let secs: f64 = s.trim().parse().map_err(|e| format!("{e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{e}"))
}

/// Parse the process arguments and run the selected command.
pub fn run_cli() -> Result<()> {
    run(Cli::parse())
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve(args) => serve(&args),
    }
}

fn serve(args: &ServeArgs) -> Result<()> {
    let options = args.resolve_options()?;
    options.log.init_global()?;

    let adapter = build_adapter(EchoHandler, &options)
        .with_context(|| format!("Failed to create {} engine", options.engine))?;
    let mut server = ServerHandle::new(adapter).with_shutdown_timeout(options.shutdown_timeout);

    if !args.background {
        server.start(StartOptions {
            publish: true,
            handle_signals: true,
        })?;
        return Ok(());
    }

    let worker = server.start_background(options.readiness_timeout)?;
    info!(
        url = %server.url(),
        worker = worker.name().unwrap_or_default(),
        "Background server ready"
    );
    println!(">> {} is listening at {}", server.adapter().engine_name(), server.url());
    println!(">> Press CTRL+C to stop");

    wait_for_shutdown_signal()?;
    println!("\n>> Stopping...");
    server.stop(options.shutdown_timeout);
    Ok(())
}

#[cfg(unix)]
fn wait_for_shutdown_signal() -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;
    if let Some(signal) = signals.forever().next() {
        info!(signal, "Shutdown signal received");
    }
    Ok(())
}

#[cfg(not(unix))]
fn wait_for_shutdown_signal() -> Result<()> {
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to wait for input")?;
    Ok(())
}
