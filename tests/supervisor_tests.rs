#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for supervised servers on real engines
//!
//! # Test Coverage
//!
//! Every scenario runs against both engines:
//! - background start on an ephemeral port serves HTTP 200
//! - a port that is already bound surfaces the engine's startup error, not a timeout
//! - stop releases the engine and is idempotent
//! - a kept-alive connection is not served after stop
//! - a foreground start can be stopped from another thread
//!
//! # Test Fixtures
//!
//! - `TestServer` (tests/common): echo server started in the background, stopped on drop
//! - `CapturedLogs` (tests/common): scoped JSON log capture for log assertions

mod common;

use brrtsupervisor::handler::{EchoHandler, HttpRequest, HttpResponse};
use brrtsupervisor::supervisor::READINESS_POLL_INTERVAL;
use brrtsupervisor::{
    adapter::{EventLoopAdapter, ThreadPoolAdapter},
    EngineKind, ServerError, ServerHandle, ServerState, StartOptions,
};
use common::http::{client_with_timeout, get, post};
use common::logs::CapturedLogs;
use common::test_server::{options, setup_may_runtime, TestServer, BUDGET};
use serde_json::Value;
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

const ENGINES: [EngineKind; 2] = [EngineKind::EventLoop, EngineKind::ThreadPool];

#[test]
fn test_ephemeral_port_serves_requests() {
    for engine in ENGINES {
        let server = TestServer::start(engine);
        assert!(server.handle.is_running(), "{engine} not running");
        assert_ne!(server.handle.local_addr().port(), 0);

        let (status, body) = get(&server.url("/health"));
        assert_eq!(status, 200, "{engine}");
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");

        let (status, body) = post(&server.url("/echo?name=brrt"), "payload");
        assert_eq!(status, 200, "{engine}");
        let json: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["method"], "POST");
        assert_eq!(json["path"], "/echo");
        assert_eq!(json["query"]["name"], "brrt");
        assert_eq!(json["body"], "payload");
    }
}

#[test]
fn test_port_in_use_is_startup_failure() {
    setup_may_runtime();
    for engine in ENGINES {
        let holder = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();
        let logs = CapturedLogs::default();
        let mut server = ServerHandle::from_options(EchoHandler, &options(engine, port))
            .unwrap()
            .with_dispatch(logs.dispatch("error"));

        let started = Instant::now();
        let err = server.start_background(BUDGET).unwrap_err();
        assert!(err.is_startup_failure(), "{engine}: unexpected error {err:?}");
        assert!(!err.is_timeout(), "{engine}");
        assert!(matches!(err, ServerError::Engine(_)));
        let elapsed = started.elapsed();
        assert!(
            elapsed < READINESS_POLL_INTERVAL * 10,
            "{engine}: failure relayed after {elapsed:?}"
        );

        assert!(!server.is_running());
        assert_eq!(server.state(), ServerState::Failed);
        assert_eq!(logs.count_messages("Server failed"), 1, "{engine}");
        server.stop(BUDGET);
        drop(holder);
    }
}

#[test]
fn test_stop_releases_engine_and_is_idempotent() {
    for engine in ENGINES {
        let mut server = TestServer::start(engine);
        let url = server.url("/health");
        assert_eq!(get(&url).0, 200);

        server.handle.stop(BUDGET);
        assert!(!server.handle.is_running(), "{engine}");
        assert_eq!(server.handle.state(), ServerState::Stopped);

        server.handle.stop(BUDGET);
        server.handle.stop(Duration::ZERO);
        assert!(!server.handle.is_running(), "{engine}");
    }
}

#[test]
fn test_kept_alive_connection_not_served_after_stop() {
    for engine in ENGINES {
        let mut server = TestServer::start(engine);
        let url = server.url("/health");
        let client = client_with_timeout(Duration::from_secs(1));

        let response = client.get(&url).send().unwrap();
        assert_eq!(response.status().as_u16(), 200, "{engine}");
        // Read to the end so the connection goes back to the pool.
        response.text().unwrap();

        server.handle.stop(BUDGET);
        assert!(!server.handle.is_running(), "{engine}");
        if let Ok(response) = client.get(&url).send() {
            assert_ne!(response.status().as_u16(), 200, "{engine} served after stop");
        }
    }
}

#[test]
fn test_graceful_stop_does_not_time_out() {
    for engine in ENGINES {
        setup_may_runtime();
        let logs = CapturedLogs::default();
        let mut server = ServerHandle::from_options(EchoHandler, &options(engine, 0))
            .unwrap()
            .with_dispatch(logs.dispatch("warn"));
        server.start_background(BUDGET).unwrap();
        server.stop(BUDGET);
        assert_eq!(logs.count_messages("did not stop within"), 0, "{engine}: {}", logs.contents());
    }
}

#[test]
fn test_foreground_start_stopped_from_another_thread() {
    setup_may_runtime();
    let handler = |req: &HttpRequest| HttpResponse::ok_text(format!("hello {}", req.path));

    let adapter = ThreadPoolAdapter::with_workers(handler, "127.0.0.1", 0, 2).unwrap();
    let mut server = ServerHandle::new(adapter);
    let shutdown = server.shutdown_handle();
    let url = format!("{}/world", server.url());

    let client = thread::spawn(move || {
        while !shutdown.is_running() {
            thread::sleep(Duration::from_millis(5));
        }
        let response = get(&url);
        shutdown.stop(BUDGET);
        response
    });

    server.start(StartOptions::default()).unwrap();
    let (status, body) = client.join().unwrap();
    assert_eq!(status, 200);
    assert_eq!(body, "hello /world");
    assert_eq!(server.state(), ServerState::Stopped);

    let adapter = EventLoopAdapter::new(handler, "127.0.0.1", 0).unwrap();
    let mut server = ServerHandle::new(adapter);
    let shutdown = server.shutdown_handle();
    let stopper = thread::spawn(move || {
        while !shutdown.is_running() {
            thread::sleep(Duration::from_millis(5));
        }
        shutdown.stop(BUDGET);
    });
    server.start(StartOptions::default()).unwrap();
    stopper.join().unwrap();
    assert!(!server.is_running());
}
