use super::{
    begin_start, lock, panic_message, resolve_listen_addr, InFlight, Lifecycle, ServerAdapter,
};
use crate::error::EngineError;
use crate::handler::{HttpRequest, HttpResponse, RequestHandler};
use std::io::{self, Read};
use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tiny_http::{Header, Response, Server};
use tracing::{debug, error, info, warn};

/// How long a pool worker blocks in `recv_timeout` before re-checking the stop flag.
const RECV_INTERVAL: Duration = Duration::from_millis(50);

const DEFAULT_WORKERS: usize = 4;

/// Thread-pool style engine: `tiny_http` with a fixed pool of OS worker threads.
///
/// Each worker pulls requests from the shared server queue and runs the
/// handler synchronously. Stopping clears the accepting flag, wakes blocked
/// workers and waits for requests already inside the handler.
pub struct ThreadPoolAdapter {
    addr: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    workers: usize,
    state: Mutex<Lifecycle<Arc<Server>>>,
    accepting: AtomicBool,
    running: AtomicBool,
    in_flight: InFlight,
}

impl ThreadPoolAdapter {
    pub fn new<H: RequestHandler>(handler: H, host: &str, port: u16) -> Result<Self, EngineError> {
        Self::with_workers(handler, host, port, DEFAULT_WORKERS)
    }

    pub fn with_workers<H: RequestHandler>(
        handler: H,
        host: &str,
        port: u16,
        workers: usize,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            addr: resolve_listen_addr(host, port)?,
            handler: Arc::new(handler),
            workers: workers.max(1),
            state: Mutex::new(Lifecycle::Idle),
            accepting: AtomicBool::new(false),
            running: AtomicBool::new(false),
            in_flight: InFlight::default(),
        })
    }

    /// Number of pool workers started by `start()`.
    pub fn workers(&self) -> usize {
        self.workers
    }

    fn bind(&self) -> Result<Server, EngineError> {
        Server::http(self.addr).map_err(|e| {
            let source = match e.downcast::<io::Error>() {
                Ok(io_err) => *io_err,
                Err(other) => io::Error::other(other),
            };
            EngineError::Startup {
                addr: self.addr,
                source,
            }
        })
    }

    /// Pool worker loop; returns when the pool stops accepting or receiving fails.
    fn serve(&self, server: &Server, worker_id: usize) -> io::Result<()> {
        debug!(worker_id, "Pool worker started");
        while self.accepting.load(Ordering::SeqCst) {
            let request = match server.recv_timeout(RECV_INTERVAL) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(e) if !self.accepting.load(Ordering::SeqCst) => {
                    debug!(worker_id, error = %e, "Receive interrupted by stop");
                    break;
                }
                Err(e) => {
                    // One broken worker takes the pool down.
                    self.accepting.store(false, Ordering::SeqCst);
                    return Err(e);
                }
            };
            let _guard = self.in_flight.enter();
            self.respond(request, worker_id);
        }
        debug!(worker_id, "Pool worker exiting");
        Ok(())
    }

    fn respond(&self, mut request: tiny_http::Request, worker_id: usize) {
        let mut http_request = HttpRequest::new(request.method().to_string(), request.url());
        http_request.headers = request
            .headers()
            .iter()
            .map(|h| (h.field.to_string().to_ascii_lowercase(), h.value.to_string()))
            .collect();
        if let Err(e) = request.as_reader().read_to_end(&mut http_request.body) {
            debug!(worker_id, error = %e, "Failed to read request body");
        }

        let response = match catch_unwind(AssertUnwindSafe(|| self.handler.handle(&http_request)))
        {
            Ok(response) => response,
            Err(panic) => {
                error!(
                    worker_id,
                    method = %http_request.method,
                    path = %http_request.path,
                    panic_message = %panic_message(panic.as_ref()),
                    "Handler panicked"
                );
                HttpResponse::text(500, "Internal Server Error")
            }
        };

        let mut reply = Response::from_data(response.body).with_status_code(response.status);
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], response.content_type.as_bytes()) {
            reply = reply.with_header(header);
        }
        if let Err(e) = request.respond(reply) {
            debug!(worker_id, error = %e, "Client went away before response was written");
        }
    }

    fn finish(&self) -> bool {
        let mut state = lock(&self.state);
        let requested = matches!(*state, Lifecycle::Stopping);
        *state = Lifecycle::Idle;
        self.running.store(false, Ordering::SeqCst);
        self.accepting.store(false, Ordering::SeqCst);
        requested
    }

    /// Everything in `start()` after the `Idle -> Starting` transition.
    fn bind_and_serve(&self) -> Result<(), EngineError> {
        let server = match self.bind() {
            Ok(server) => Arc::new(server),
            Err(e) => {
                *lock(&self.state) = Lifecycle::Idle;
                return Err(e);
            }
        };

        {
            let mut state = lock(&self.state);
            if matches!(*state, Lifecycle::Stopping) {
                drop(state);
                debug!(addr = %self.addr, "Stop requested during startup, releasing listener");
                self.finish();
                return Ok(());
            }
            *state = Lifecycle::Running(Arc::clone(&server));
            self.accepting.store(true, Ordering::SeqCst);
            self.running.store(true, Ordering::SeqCst);
        }
        info!(addr = %self.addr, workers = self.workers, "Thread-pool engine listening");

        let failure = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.workers);
            let mut failure = None;
            for worker_id in 0..self.workers {
                let server = &*server;
                let spawned = thread::Builder::new()
                    .name(format!("brrts-pool-{worker_id}"))
                    .spawn_scoped(scope, move || self.serve(server, worker_id));
                match spawned {
                    Ok(handle) => handles.push((worker_id, handle)),
                    Err(e) => {
                        self.accepting.store(false, Ordering::SeqCst);
                        failure = Some(format!("failed to spawn pool worker {worker_id}: {e}"));
                        break;
                    }
                }
            }
            for (worker_id, handle) in handles {
                let outcome = match handle.join() {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => format!("pool worker {worker_id} failed to receive: {e}"),
                    Err(panic) => format!(
                        "pool worker {worker_id} panicked: {}",
                        panic_message(panic.as_ref())
                    ),
                };
                self.accepting.store(false, Ordering::SeqCst);
                failure.get_or_insert(outcome);
            }
            failure
        });

        let stop_requested = self.finish();
        drop(server);
        match failure {
            Some(message) if !stop_requested => Err(EngineError::Runtime(message)),
            Some(message) => {
                warn!(addr = %self.addr, %message, "Pool worker failed during shutdown");
                Ok(())
            }
            None if stop_requested => Ok(()),
            None => Err(EngineError::Runtime("pool workers exited".to_string())),
        }
    }
}

impl ServerAdapter for ThreadPoolAdapter {
    fn start(&self) -> Result<(), EngineError> {
        begin_start(&self.state)?;
        self.bind_and_serve()
    }

    fn stop(&self, wait: Duration) {
        let server = {
            let mut state = lock(&self.state);
            match std::mem::replace(&mut *state, Lifecycle::Stopping) {
                Lifecycle::Running(server) => server,
                Lifecycle::Starting => {
                    debug!(addr = %self.addr, "Stop requested while engine is starting");
                    return;
                }
                previous => {
                    *state = previous;
                    return;
                }
            }
        };
        self.accepting.store(false, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        for _ in 0..self.workers {
            server.unblock();
        }

        if !self.in_flight.drain(wait) {
            warn!(
                addr = %self.addr,
                in_flight = self.in_flight.count(),
                wait_ms = wait.as_millis() as u64,
                "In-flight requests did not drain, abandoning them"
            );
        }
        debug!(addr = %self.addr, "Thread-pool engine stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn engine_name(&self) -> &'static str {
        "tiny_http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn ok_handler(_: &HttpRequest) -> HttpResponse {
        HttpResponse::ok_text("ok")
    }

    #[test]
    fn test_workers_at_least_one() {
        let adapter = ThreadPoolAdapter::with_workers(ok_handler, "127.0.0.1", 0, 0).unwrap();
        assert_eq!(adapter.workers(), 1);
    }

    #[test]
    fn test_bind_conflict_is_startup_error() {
        let holder = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();
        let adapter = ThreadPoolAdapter::new(ok_handler, "127.0.0.1", port).unwrap();

        let err = adapter.start().unwrap_err();
        assert!(err.is_startup(), "unexpected error: {err}");
        assert!(!adapter.is_running());
        // The failed attempt leaves the adapter reusable.
        assert!(matches!(*lock(&adapter.state), Lifecycle::Idle));
    }

    #[test]
    fn test_start_stop_from_another_thread() {
        let adapter = Arc::new(ThreadPoolAdapter::with_workers(ok_handler, "127.0.0.1", 0, 2).unwrap());
        let runner = Arc::clone(&adapter);
        let worker = thread::spawn(move || runner.start());

        while !adapter.is_running() {
            thread::sleep(Duration::from_millis(5));
        }
        adapter.stop(Duration::from_secs(1));
        assert!(!adapter.is_running());
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn test_stop_while_starting_releases_listener() {
        let adapter = ThreadPoolAdapter::with_workers(ok_handler, "127.0.0.1", 0, 2).unwrap();
        begin_start(&adapter.state).unwrap();
        adapter.stop(Duration::ZERO);
        assert!(matches!(*lock(&adapter.state), Lifecycle::Stopping));

        assert!(adapter.bind_and_serve().is_ok());
        assert!(!adapter.is_running());
        assert!(matches!(*lock(&adapter.state), Lifecycle::Idle));
    }

    #[test]
    fn test_forced_stop_racing_start_returns_to_idle() {
        for _ in 0..20 {
            let adapter =
                Arc::new(ThreadPoolAdapter::with_workers(ok_handler, "127.0.0.1", 0, 2).unwrap());
            let runner = Arc::clone(&adapter);
            let worker = thread::spawn(move || runner.start());

            adapter.stop(Duration::ZERO);
            // A stop that lands before start() left Idle is a no-op; repeat until start returns.
            while !worker.is_finished() {
                adapter.stop(Duration::ZERO);
                thread::sleep(Duration::from_millis(1));
            }
            assert!(worker.join().unwrap().is_ok());
            assert!(!adapter.is_running());
            assert!(matches!(*lock(&adapter.state), Lifecycle::Idle));
        }
    }
}
