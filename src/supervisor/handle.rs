use super::signals::SignalGuard;
use super::worker::{WorkerExit, WorkerHandle, WorkerTask, WorkerWait};
use crate::adapter::{build_adapter, deadline_after, next_slice, ServerAdapter};
use crate::error::{EngineError, ServerError};
use crate::handler::RequestHandler;
use crate::logging::LogConfig;
use crate::options::{ServerOptions, StartOptions, DEFAULT_TIMEOUT};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Dispatch};

/// Sleep between readiness checks while waiting for a background start.
pub const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long a worker may take to exit after a forced stop before it is detached.
pub const FORCED_STOP_GRACE: Duration = Duration::from_millis(250);

/// Lifecycle of a [`ServerHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// The unit a caller manipulates: one adapter plus at most one worker task.
///
/// ```rust,no_run
/// use brrtsupervisor::adapter::ThreadPoolAdapter;
/// use brrtsupervisor::handler::{HttpRequest, HttpResponse};
/// use brrtsupervisor::ServerHandle;
/// use std::time::Duration;
///
/// let adapter = ThreadPoolAdapter::new(
///     |_: &HttpRequest| HttpResponse::ok_text("hello"),
///     "127.0.0.1",
///     0,
/// )?;
/// let mut server = ServerHandle::new(adapter);
/// server.start_background(Duration::from_secs(5))?;
/// assert!(server.is_running());
/// server.stop(Duration::from_secs(5));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct ServerHandle<A: ServerAdapter> {
    adapter: Arc<A>,
    worker: Option<WorkerTask>,
    state: ServerState,
    dispatch: Option<Dispatch>,
    shutdown_timeout: Duration,
}

impl ServerHandle<Box<dyn ServerAdapter>> {
    /// Build the adapter selected by `options` and wrap it in a handle.
    ///
    /// Logging goes through a dispatcher built from `options.log`.
    pub fn from_options<H: RequestHandler>(
        handler: H,
        options: &ServerOptions,
    ) -> Result<Self, EngineError> {
        let adapter = build_adapter(handler, options)?;
        Ok(Self::new(adapter)
            .with_log_config(&options.log)
            .with_shutdown_timeout(options.shutdown_timeout))
    }
}

impl<A: ServerAdapter> ServerHandle<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            adapter: Arc::new(adapter),
            worker: None,
            state: ServerState::Idle,
            dispatch: None,
            shutdown_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Route this handle's logs (and its worker's) to `dispatch` instead of the
    /// caller's current default subscriber.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn with_log_config(self, config: &LogConfig) -> Self {
        self.with_dispatch(config.build_dispatch())
    }

    /// Budget used when the handle is dropped with a worker still active.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.adapter.local_addr()
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.adapter.local_addr())
    }

    /// Whether the engine is bound and serving.
    pub fn is_running(&self) -> bool {
        self.adapter.is_running()
    }

    pub fn state(&self) -> ServerState {
        match self.state {
            ServerState::Running if self.worker.as_ref().is_some_and(WorkerTask::is_finished) => {
                ServerState::Stopped
            }
            state => state,
        }
    }

    /// Cloneable handle that can stop the engine from another thread, e.g. while
    /// [`start`](Self::start) blocks in the foreground.
    pub fn shutdown_handle(&self) -> ShutdownHandle<A> {
        ShutdownHandle {
            adapter: Arc::clone(&self.adapter),
        }
    }

    fn in_scope<R>(&self, f: impl FnOnce() -> R) -> R {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }

    fn worker_dispatch(&self) -> Dispatch {
        self.dispatch
            .clone()
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone))
    }

    /// Fail if a worker is still active; reap it if it already ended.
    fn ensure_idle(&mut self) -> Result<(), ServerError> {
        match self.worker.take() {
            Some(task) if !task.is_finished() => {
                self.worker = Some(task);
                Err(ServerError::AlreadyStarted)
            }
            Some(task) => {
                if let WorkerWait::Exited(Some(WorkerExit::Failed(e))) = task.wait_exit(Duration::ZERO) {
                    self.in_scope(|| debug!(error = %e, "Reaped failed worker from previous start"));
                }
                task.reap();
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Run the engine on the calling thread until it stops or fails.
    pub fn start(&mut self, options: StartOptions) -> Result<(), ServerError> {
        self.ensure_idle()?;
        if options.publish {
            println!(
                ">> Starting {} (v{})...",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION")
            );
            println!(
                ">> {} is listening at {}",
                self.adapter.engine_name(),
                self.url()
            );
            println!(">> Press CTRL+C to stop");
        }

        let _signals = if options.handle_signals {
            SignalGuard::install(Arc::clone(&self.adapter), options.publish)
        } else {
            None
        };
        self.state = ServerState::Running;
        let result = self.in_scope(|| self.adapter.start());
        self.state = match result {
            Ok(()) => ServerState::Stopped,
            Err(_) => ServerState::Failed,
        };
        result.map_err(ServerError::from)
    }

    /// Start the engine on a worker thread and wait until it is serving.
    ///
    /// Returns once `is_running()` is observed, the engine reports a failure
    /// (re-raised here with the original error), or `timeout` elapses.
    pub fn start_background(&mut self, timeout: Duration) -> Result<WorkerHandle, ServerError> {
        self.ensure_idle()?;
        self.state = ServerState::Starting;

        let (task, handle) = WorkerTask::spawn(Arc::clone(&self.adapter), self.worker_dispatch())
            .map_err(|e| {
                self.state = ServerState::Failed;
                ServerError::Spawn(e)
            })?;

        match self.await_ready(&task, timeout) {
            Ok(()) => {
                self.in_scope(|| {
                    info!(
                        engine = self.adapter.engine_name(),
                        addr = %self.adapter.local_addr(),
                        "Server started in background"
                    )
                });
                self.worker = Some(task);
                self.state = ServerState::Running;
                Ok(handle)
            }
            Err(e @ ServerError::StartupTimeout { .. }) => {
                // Still possibly starting; stop() reaps it.
                self.in_scope(|| warn!(timeout_ms = timeout.as_millis() as u64, "{e}"));
                self.worker = Some(task);
                Err(e)
            }
            Err(e) => {
                task.reap();
                self.state = ServerState::Failed;
                Err(e)
            }
        }
    }

    fn await_ready(&self, task: &WorkerTask, timeout: Duration) -> Result<(), ServerError> {
        let deadline = deadline_after(timeout);
        loop {
            if self.adapter.is_running() {
                return Ok(());
            }
            let Some(slice) = next_slice(deadline, READINESS_POLL_INTERVAL) else {
                return Err(ServerError::StartupTimeout { timeout });
            };
            match task.wait_exit(slice) {
                WorkerWait::TimedOut => continue,
                WorkerWait::Exited(Some(WorkerExit::Failed(e))) => return Err(ServerError::Engine(e)),
                WorkerWait::Exited(_) => return Err(ServerError::ExitedBeforeReady),
            }
        }
    }

    /// Stop the server within `wait`. Never fails.
    ///
    /// With a background worker: request a graceful engine stop and join the
    /// worker within the same budget; past it, log a shutdown timeout, force the
    /// engine down and terminate the worker. Without one: force-stop the engine
    /// directly, which is a no-op if it is not running.
    pub fn stop(&mut self, wait: Duration) {
        let Some(task) = self.worker.take() else {
            self.adapter.stop(Duration::ZERO);
            if matches!(self.state, ServerState::Running | ServerState::Starting) {
                self.state = ServerState::Stopped;
            }
            return;
        };

        self.state = ServerState::Stopping;
        let deadline = deadline_after(wait);
        task.cancel();
        self.in_scope(|| self.adapter.stop(wait));

        match self.await_exit(&task, deadline) {
            WorkerWait::Exited(exit) => {
                if let Some(WorkerExit::Failed(e)) = exit {
                    self.in_scope(|| warn!(error = %e, "Engine reported a failure while stopping"));
                }
                task.reap();
                self.in_scope(|| debug!(addr = %self.adapter.local_addr(), "Server stopped"));
            }
            WorkerWait::TimedOut => {
                self.in_scope(|| {
                    warn!(
                        addr = %self.adapter.local_addr(),
                        shutdown_timeout_ms = wait.as_millis() as u64,
                        "Server did not stop within {wait:?}. Killing..."
                    );
                    self.adapter.stop(Duration::ZERO);
                    task.terminate(FORCED_STOP_GRACE);
                });
            }
        }
        self.state = ServerState::Stopped;
    }

    /// Join the worker by `deadline` (plus one poll slice), in poll-sized steps.
    ///
    /// A worker that passed its cancel check just before `stop()` may bind after
    /// the engine was told to stop while still idle. An engine that comes up
    /// during the wait is stopped again.
    fn await_exit(&self, task: &WorkerTask, deadline: Option<Instant>) -> WorkerWait {
        let mut was_running = self.adapter.is_running();
        loop {
            let slice = next_slice(deadline, READINESS_POLL_INTERVAL);
            match task.wait_exit(slice.unwrap_or(READINESS_POLL_INTERVAL)) {
                WorkerWait::TimedOut if slice.is_some() => {
                    let running = self.adapter.is_running();
                    if running && !was_running {
                        let left = deadline.map_or(Duration::MAX, |deadline| {
                            deadline.saturating_duration_since(Instant::now())
                        });
                        self.in_scope(|| {
                            debug!(
                                addr = %self.adapter.local_addr(),
                                "Engine came up during stop, stopping it again"
                            );
                            self.adapter.stop(left);
                        });
                    }
                    was_running = running;
                }
                outcome => return outcome,
            }
        }
    }
}

impl<A: ServerAdapter> Drop for ServerHandle<A> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop(self.shutdown_timeout);
        }
    }
}

/// Stops a handle's engine from any thread.
pub struct ShutdownHandle<A: ServerAdapter> {
    adapter: Arc<A>,
}

impl<A: ServerAdapter> Clone for ShutdownHandle<A> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
        }
    }
}

impl<A: ServerAdapter> ShutdownHandle<A> {
    pub fn stop(&self, wait: Duration) {
        self.adapter.stop(wait);
    }

    pub fn is_running(&self) -> bool {
        self.adapter.is_running()
    }
}
