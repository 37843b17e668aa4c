//! # Adapter Module
//!
//! Engine adapters wrap one concrete HTTP engine behind the capability set the
//! supervisor drives: a blocking [`start`](ServerAdapter::start), a bounded
//! [`stop`](ServerAdapter::stop) and a non-blocking
//! [`is_running`](ServerAdapter::is_running).
//!
//! Two engines are provided:
//!
//! - [`EventLoopAdapter`] - `may_minihttp`, accept loop in a `may` coroutine
//! - [`ThreadPoolAdapter`] - `tiny_http`, a fixed pool of OS threads pulling requests
//!
//! ## Contract
//!
//! - `is_running()` never reports `true` before the listener is bound.
//! - `stop(wait)` drains in-flight requests for at most `wait`, then releases the
//!   listener anyway. `stop(Duration::ZERO)` is the forced variant.
//! - `stop()` on an engine that never started is a no-op, and `stop()` racing an
//!   in-progress `start()` makes that `start()` tear the engine down right after binding.

mod event_loop;
mod thread_pool;

pub use event_loop::EventLoopAdapter;
pub use thread_pool::ThreadPoolAdapter;

use crate::error::EngineError;
use crate::handler::RequestHandler;
use crate::options::ServerOptions;
use serde::Deserialize;
use std::fmt;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Interval used when waiting on engine-side conditions (in-flight drain, stop flags).
pub(crate) const ENGINE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Uniform control surface over one HTTP engine instance.
pub trait ServerAdapter: Send + Sync + 'static {
    /// Run the engine's accept/serve loop until it is told to stop.
    fn start(&self) -> Result<(), EngineError>;

    /// Request termination, draining in-flight work for at most `wait`.
    fn stop(&self, wait: Duration);

    /// Whether the engine is currently bound and serving.
    fn is_running(&self) -> bool;

    /// Address the engine listens on, resolved at construction.
    fn local_addr(&self) -> SocketAddr;

    /// Human readable engine name used in logs and the startup banner.
    fn engine_name(&self) -> &'static str;
}

impl<A: ServerAdapter + ?Sized> ServerAdapter for Box<A> {
    fn start(&self) -> Result<(), EngineError> {
        (**self).start()
    }

    fn stop(&self, wait: Duration) {
        (**self).stop(wait)
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }

    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }

    fn engine_name(&self) -> &'static str {
        (**self).engine_name()
    }
}

/// Which engine backs a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// `may_minihttp` coroutine accept loop
    #[default]
    #[serde(alias = "minihttp")]
    EventLoop,
    /// `tiny_http` with a pool of OS worker threads
    #[serde(alias = "tiny_http")]
    ThreadPool,
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "event_loop" | "minihttp" => Ok(Self::EventLoop),
            "thread_pool" | "tiny_http" => Ok(Self::ThreadPool),
            other => Err(format!("unknown engine '{other}'")),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::EventLoop => write!(f, "event_loop"),
            EngineKind::ThreadPool => write!(f, "thread_pool"),
        }
    }
}

/// Construct the adapter selected by `options.engine`.
pub fn build_adapter<H: RequestHandler>(
    handler: H,
    options: &ServerOptions,
) -> Result<Box<dyn ServerAdapter>, EngineError> {
    let adapter: Box<dyn ServerAdapter> = match options.engine {
        EngineKind::EventLoop => Box::new(EventLoopAdapter::with_runtime(
            handler,
            &options.host,
            options.port,
            options.runtime,
        )?),
        EngineKind::ThreadPool => Box::new(ThreadPoolAdapter::with_workers(
            handler,
            &options.host,
            options.port,
            options.workers,
        )?),
    };
    Ok(adapter)
}

/// Resolve `host:port` into the address the engine will bind.
///
/// Port `0` is replaced by a concrete free ephemeral port so the address is
/// known before the engine starts.
pub fn resolve_listen_addr(host: &str, port: u16) -> Result<SocketAddr, EngineError> {
    let resolve_err = |source| EngineError::AddrResolve {
        host: host.to_string(),
        port,
        source,
    };
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(resolve_err)?
        .next()
        .ok_or_else(|| {
            resolve_err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no addresses",
            ))
        })?;
    if addr.port() != 0 {
        return Ok(addr);
    }
    let listener = TcpListener::bind(addr).map_err(|source| EngineError::Startup { addr, source })?;
    listener
        .local_addr()
        .map_err(|source| EngineError::Startup { addr, source })
}

/// Engine lifecycle shared by both adapters.
#[derive(Debug)]
pub(crate) enum Lifecycle<T> {
    Idle,
    Starting,
    Running(T),
    /// A stop was requested; `start()` resets to `Idle` when it returns.
    Stopping,
}

/// Move `Idle` to `Starting`, rejecting a second concurrent `start()`.
pub(crate) fn begin_start<T>(state: &Mutex<Lifecycle<T>>) -> Result<(), EngineError> {
    let mut state = lock(state);
    if !matches!(*state, Lifecycle::Idle) {
        return Err(EngineError::AlreadyRunning);
    }
    *state = Lifecycle::Starting;
    Ok(())
}

/// `now + timeout`, or `None` when that is past what `Instant` can represent.
///
/// `None` means "no deadline": callers keep waiting in poll-sized slices.
pub(crate) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

/// Time left until `deadline`, capped at `slice`; `None` once the deadline passed.
pub(crate) fn next_slice(deadline: Option<Instant>, slice: Duration) -> Option<Duration> {
    match deadline {
        None => Some(slice),
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            (!left.is_zero()).then(|| slice.min(left))
        }
    }
}

/// Lock that survives a panicked holder; the lifecycle state stays meaningful.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Counts requests currently inside the handler.
#[derive(Debug, Clone, Default)]
pub(crate) struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    pub(crate) fn enter(&self) -> InFlightGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(&self.0))
    }

    pub(crate) fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Wait until no request is in flight or `wait` elapses; returns whether drained.
    pub(crate) fn drain(&self, wait: Duration) -> bool {
        let deadline = deadline_after(wait);
        loop {
            if self.count() == 0 {
                return true;
            }
            match next_slice(deadline, ENGINE_POLL_INTERVAL) {
                Some(slice) => thread::sleep(slice),
                None => return false,
            }
        }
    }
}

pub(crate) struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_from_str() {
        assert_eq!("event_loop".parse::<EngineKind>(), Ok(EngineKind::EventLoop));
        assert_eq!("Event-Loop".parse::<EngineKind>(), Ok(EngineKind::EventLoop));
        assert_eq!("minihttp".parse::<EngineKind>(), Ok(EngineKind::EventLoop));
        assert_eq!("thread_pool".parse::<EngineKind>(), Ok(EngineKind::ThreadPool));
        assert_eq!("tiny_http".parse::<EngineKind>(), Ok(EngineKind::ThreadPool));
        assert!("webrick".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_resolve_ephemeral_port() {
        let addr = resolve_listen_addr("127.0.0.1", 0).unwrap();
        assert_ne!(addr.port(), 0);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_resolve_keeps_explicit_port() {
        let addr = resolve_listen_addr("127.0.0.1", 8889).unwrap();
        assert_eq!(addr.port(), 8889);
    }

    #[test]
    fn test_resolve_rejects_bad_host() {
        let err = resolve_listen_addr("not a host name", 80).unwrap_err();
        assert!(matches!(err, EngineError::AddrResolve { .. }));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn test_in_flight_drain() {
        let in_flight = InFlight::default();
        let guard = in_flight.enter();
        assert_eq!(in_flight.count(), 1);
        assert!(!in_flight.drain(Duration::from_millis(20)));
        drop(guard);
        assert!(in_flight.drain(Duration::from_millis(20)));
        assert!(in_flight.drain(Duration::MAX));
    }

    #[test]
    fn test_unbounded_wait_drains_when_requests_finish() {
        let in_flight = InFlight::default();
        let guard = in_flight.enter();
        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            drop(guard);
        });
        assert!(in_flight.drain(Duration::MAX));
        releaser.join().unwrap();
    }

    #[test]
    fn test_deadline_after_huge_timeout_has_no_deadline() {
        assert!(deadline_after(Duration::MAX).is_none());
        assert!(deadline_after(Duration::from_secs(u64::MAX)).is_none());
        assert!(deadline_after(Duration::from_secs(1)).is_some());
    }

    #[test]
    fn test_next_slice() {
        let slice = Duration::from_millis(10);
        assert_eq!(next_slice(None, slice), Some(slice));
        assert_eq!(next_slice(deadline_after(Duration::from_secs(60)), slice), Some(slice));
        assert_eq!(next_slice(deadline_after(Duration::ZERO), slice), None);
        let short = next_slice(deadline_after(Duration::from_millis(5)), slice).unwrap();
        assert!(short <= Duration::from_millis(5));
    }

    #[test]
    fn test_begin_start_rejects_second_start() {
        let state = Mutex::new(Lifecycle::<()>::Idle);
        begin_start(&state).unwrap();
        assert!(matches!(*lock(&state), Lifecycle::Starting));
        assert!(matches!(begin_start(&state), Err(EngineError::AlreadyRunning)));
    }
}
