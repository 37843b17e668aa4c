use crate::adapter::{panic_message, ServerAdapter};
use crate::error::EngineError;
use std::backtrace::Backtrace;
use std::error::Error as _;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;
use tracing::{debug, error, warn, Dispatch};

/// Final message a worker sends to its controller.
#[derive(Debug)]
pub(crate) enum WorkerExit {
    /// `start()` returned normally (stop requested, or cancelled before starting)
    Finished,
    /// `start()` raised; the error is relayed to the controller
    Failed(EngineError),
}

/// Result of waiting on a worker.
#[derive(Debug)]
pub(crate) enum WorkerWait {
    /// The worker ended. `None` when its exit message was already consumed.
    Exited(Option<WorkerExit>),
    TimedOut,
}

/// Caller's copy of a background worker task handle.
///
/// The [`ServerHandle`](crate::ServerHandle) keeps its own reference for
/// `stop()`; this one only observes the task.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    thread: Thread,
    done: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn name(&self) -> Option<&str> {
        self.thread.name()
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Whether the worker's body has returned.
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Marks the worker finished however its body ends.
struct DoneOnDrop(Arc<AtomicBool>);

impl Drop for DoneOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Background execution unit running an adapter's blocking `start()`.
pub(crate) struct WorkerTask {
    thread: JoinHandle<()>,
    exit_rx: mpsc::Receiver<WorkerExit>,
    cancel: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl WorkerTask {
    /// Spawn a named worker thread that runs `adapter.start()` under `dispatch`.
    pub(crate) fn spawn<A: ServerAdapter>(
        adapter: Arc<A>,
        dispatch: Dispatch,
    ) -> io::Result<(Self, WorkerHandle)> {
        let (exit_tx, exit_rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));

        let worker_cancel = Arc::clone(&cancel);
        let worker_done = Arc::clone(&done);
        let name = format!("brrts-worker-{}", adapter.local_addr().port());
        let thread = thread::Builder::new().name(name).spawn(move || {
            let _done = DoneOnDrop(worker_done);
            tracing::dispatcher::with_default(&dispatch, || {
                let exit = run_engine(adapter.as_ref(), &worker_cancel);
                if exit_tx.send(exit).is_err() {
                    debug!("Controller no longer waiting for worker exit");
                }
            });
        })?;

        let handle = WorkerHandle {
            thread: thread.thread().clone(),
            done: Arc::clone(&done),
        };
        Ok((
            Self {
                thread,
                exit_rx,
                cancel,
                done,
            },
            handle,
        ))
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Ask the worker to skip or abandon work at its next cooperative check.
    pub(crate) fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Wait up to `timeout` for the worker's exit message.
    pub(crate) fn wait_exit(&self, timeout: Duration) -> WorkerWait {
        match self.exit_rx.recv_timeout(timeout) {
            Ok(exit) => WorkerWait::Exited(Some(exit)),
            Err(RecvTimeoutError::Disconnected) => WorkerWait::Exited(None),
            Err(RecvTimeoutError::Timeout) => WorkerWait::TimedOut,
        }
    }

    /// Join a worker that has already ended or is about to.
    pub(crate) fn reap(self) {
        if self.thread.join().is_err() {
            // run_engine catches panics; only the logging path can get here
            warn!("Worker thread panicked outside the engine");
        }
    }

    /// Last resort after a forced engine stop: wait `grace`, then detach.
    ///
    /// Returns `true` when the worker was joined. A detached worker keeps
    /// whatever it holds, including possibly the listening socket.
    pub(crate) fn terminate(self, grace: Duration) -> bool {
        self.cancel();
        match self.wait_exit(grace) {
            WorkerWait::Exited(_) => {
                self.reap();
                true
            }
            WorkerWait::TimedOut => {
                let name = self.thread.thread().name().unwrap_or("worker").to_string();
                warn!(
                    worker = %name,
                    grace_ms = grace.as_millis() as u64,
                    "Worker did not terminate after forced stop; detaching it (listener may leak)"
                );
                false
            }
        }
    }
}

fn run_engine<A: ServerAdapter>(adapter: &A, cancel: &AtomicBool) -> WorkerExit {
    if cancel.load(Ordering::SeqCst) {
        debug!("Worker cancelled before engine start");
        return WorkerExit::Finished;
    }
    let error = match catch_unwind(AssertUnwindSafe(|| adapter.start())) {
        Ok(Ok(())) => {
            debug!(engine = adapter.engine_name(), "Engine returned from start");
            return WorkerExit::Finished;
        }
        Ok(Err(e)) => e,
        Err(panic) => EngineError::Panicked(panic_message(panic.as_ref())),
    };
    error!(
        engine = adapter.engine_name(),
        addr = %adapter.local_addr(),
        error = %error,
        causes = %source_chain(&error),
        backtrace = %Backtrace::capture(),
        "Server failed: {error}"
    );
    WorkerExit::Failed(error)
}

fn source_chain(error: &EngineError) -> String {
    let mut causes = Vec::new();
    let mut source = error.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    causes.join(": ")
}
