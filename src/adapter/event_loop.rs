use super::{
    begin_start, lock, panic_message, resolve_listen_addr, InFlight, Lifecycle, ServerAdapter,
};
use crate::error::EngineError;
use crate::handler::{status_reason, HttpRequest, RequestHandler};
use crate::runtime_config::RuntimeConfig;
use may::coroutine::Coroutine;
use may_minihttp::{HttpServerWithHeaders, HttpService, Request, Response};
use std::collections::HashMap;
use std::io::{self, Read};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// `may_minihttp` service forwarding every request to the injected handler.
#[derive(Clone)]
struct HandlerService {
    handler: Arc<dyn RequestHandler>,
    in_flight: InFlight,
    /// Cleared by `stop()`. Connection coroutines outlive the accept loop, so
    /// keep-alive clients are turned away here.
    serving: Arc<AtomicBool>,
}

/// Header lines built for content types outside the static set, one per distinct value.
static CONTENT_TYPE_HEADERS: OnceLock<Mutex<HashMap<&'static str, &'static str>>> =
    OnceLock::new();

fn content_type_header(content_type: &'static str) -> &'static str {
    match content_type {
        "application/json" => "Content-Type: application/json",
        "text/plain" => "Content-Type: text/plain",
        "text/html" => "Content-Type: text/html",
        "text/event-stream" => "Content-Type: text/event-stream",
        other => {
            let mut headers = lock(CONTENT_TYPE_HEADERS.get_or_init(Default::default));
            // may_minihttp only accepts 'static header lines; leaked once per content type
            *headers.entry(other).or_insert_with(|| {
                let header = format!("Content-Type: {other}").into_boxed_str();
                let header: &'static str = Box::leak(header);
                header
            })
        }
    }
}

fn to_http_request(req: Request) -> HttpRequest {
    let mut request = HttpRequest::new(req.method(), req.path());
    request.headers = req
        .headers()
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect::<HashMap<_, _>>();
    let mut body = Vec::new();
    if let Err(e) = req.body().read_to_end(&mut body) {
        debug!(error = %e, "Failed to read request body");
    }
    request.body = body;
    request
}

impl HttpService for HandlerService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        if !self.serving.load(Ordering::SeqCst) {
            res.status_code(503, status_reason(503));
            res.header("Connection: close");
            res.header(content_type_header("text/plain"));
            res.body_vec(b"Service Unavailable".to_vec());
            return Ok(());
        }
        let _guard = self.in_flight.enter();
        let request = to_http_request(req);
        let response = self.handler.handle(&request);
        res.status_code(response.status as usize, status_reason(response.status));
        res.header(content_type_header(response.content_type));
        res.body_vec(response.body);
        Ok(())
    }
}

/// Event-loop style engine: `may_minihttp` accept loop running in a `may` coroutine.
///
/// Connections are served by per-connection coroutines on the `may` scheduler.
/// Stopping cancels the accept coroutine, which drops the listener, then waits
/// for requests already inside the handler.
pub struct EventLoopAdapter {
    addr: SocketAddr,
    service: HandlerService,
    state: Mutex<Lifecycle<Coroutine>>,
    running: AtomicBool,
}

impl EventLoopAdapter {
    /// Create an adapter using [`RuntimeConfig::from_env`].
    pub fn new<H: RequestHandler>(handler: H, host: &str, port: u16) -> Result<Self, EngineError> {
        Self::with_runtime(handler, host, port, RuntimeConfig::from_env())
    }

    pub fn with_runtime<H: RequestHandler>(
        handler: H,
        host: &str,
        port: u16,
        runtime: RuntimeConfig,
    ) -> Result<Self, EngineError> {
        let addr = resolve_listen_addr(host, port)?;
        runtime.apply();
        Ok(Self {
            addr,
            service: HandlerService {
                handler: Arc::new(handler),
                in_flight: InFlight::default(),
                serving: Arc::new(AtomicBool::new(false)),
            },
            state: Mutex::new(Lifecycle::Idle),
            running: AtomicBool::new(false),
        })
    }

    fn finish(&self) -> bool {
        let mut state = lock(&self.state);
        let requested = matches!(*state, Lifecycle::Stopping);
        *state = Lifecycle::Idle;
        self.running.store(false, Ordering::SeqCst);
        self.service.serving.store(false, Ordering::SeqCst);
        requested
    }

    /// Everything in `start()` after the `Idle -> Starting` transition.
    fn bind_and_serve(&self) -> Result<(), EngineError> {
        // Use HttpServerWithHeaders<_, 32> to handle modern API gateway/proxy traffic
        let handle = match HttpServerWithHeaders::<_, 32>(self.service.clone()).start(self.addr) {
            Ok(handle) => handle,
            Err(source) => {
                *lock(&self.state) = Lifecycle::Idle;
                return Err(EngineError::Startup {
                    addr: self.addr,
                    source,
                });
            }
        };

        let stop_raced = {
            let mut state = lock(&self.state);
            if matches!(*state, Lifecycle::Stopping) {
                true
            } else {
                *state = Lifecycle::Running(handle.coroutine().clone());
                self.service.serving.store(true, Ordering::SeqCst);
                self.running.store(true, Ordering::SeqCst);
                false
            }
        };
        if stop_raced {
            debug!(addr = %self.addr, "Stop requested during startup, cancelling accept loop");
            cancel(handle.coroutine());
        } else {
            info!(addr = %self.addr, "Event-loop engine listening");
        }

        let outcome = handle.join();
        let stop_requested = self.finish();
        match outcome {
            _ if stop_requested => Ok(()),
            Ok(()) => Err(EngineError::Runtime("accept loop exited".to_string())),
            Err(panic) => Err(EngineError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

fn cancel(co: &Coroutine) {
    // SAFETY: may marks cancellation unsafe because the target unwinds at its next
    // yield point. The accept loop owns nothing beyond its listener, which is
    // released by that unwind.
    unsafe {
        co.cancel();
    }
}

impl ServerAdapter for EventLoopAdapter {
    fn start(&self) -> Result<(), EngineError> {
        begin_start(&self.state)?;
        self.bind_and_serve()
    }

    fn stop(&self, wait: Duration) {
        let co = {
            let mut state = lock(&self.state);
            match std::mem::replace(&mut *state, Lifecycle::Stopping) {
                Lifecycle::Running(co) => co,
                Lifecycle::Starting => {
                    debug!(addr = %self.addr, "Stop requested while engine is starting");
                    return;
                }
                previous => {
                    // Idle or already stopping
                    *state = previous;
                    return;
                }
            }
        };
        self.running.store(false, Ordering::SeqCst);
        self.service.serving.store(false, Ordering::SeqCst);
        cancel(&co);

        if !self.service.in_flight.drain(wait) {
            warn!(
                addr = %self.addr,
                in_flight = self.service.in_flight.count(),
                wait_ms = wait.as_millis() as u64,
                "In-flight requests did not drain, abandoning them"
            );
        }
        debug!(addr = %self.addr, "Event-loop engine stopped");
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn engine_name(&self) -> &'static str {
        "may_minihttp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HttpResponse;
    use std::thread;

    fn adapter() -> EventLoopAdapter {
        EventLoopAdapter::new(|_: &HttpRequest| HttpResponse::ok_text("ok"), "127.0.0.1", 0)
            .unwrap()
    }

    #[test]
    fn test_content_type_header_static_values() {
        assert_eq!(
            content_type_header("application/json"),
            "Content-Type: application/json"
        );
        assert_eq!(
            content_type_header("image/png"),
            "Content-Type: image/png"
        );
    }

    #[test]
    fn test_content_type_header_built_once_per_value() {
        let first = content_type_header("application/x-brrts-test");
        let second = content_type_header("application/x-brrts-test");
        assert!(std::ptr::eq(first, second));
        assert_eq!(first, "Content-Type: application/x-brrts-test");
        assert!(!std::ptr::eq(first, content_type_header("image/webp")));
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let adapter = adapter();
        adapter.stop(Duration::from_millis(10));
        assert!(!adapter.is_running());
        assert!(matches!(*lock(&adapter.state), Lifecycle::Idle));
    }

    #[test]
    fn test_stop_while_starting_tears_down_after_bind() {
        let adapter = adapter();
        begin_start(&adapter.state).unwrap();
        adapter.stop(Duration::ZERO);
        assert!(matches!(*lock(&adapter.state), Lifecycle::Stopping));

        assert!(adapter.bind_and_serve().is_ok());
        assert!(!adapter.is_running());
        assert!(!adapter.service.serving.load(Ordering::SeqCst));
        assert!(matches!(*lock(&adapter.state), Lifecycle::Idle));
    }

    #[test]
    fn test_forced_stop_racing_start_returns_to_idle() {
        for _ in 0..20 {
            let adapter = Arc::new(adapter());
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
