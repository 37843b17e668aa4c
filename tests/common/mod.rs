#![allow(dead_code)]

pub mod test_server {
    use brrtsupervisor::handler::EchoHandler;
    use brrtsupervisor::{EngineKind, ServerAdapter, ServerHandle, ServerOptions};
    use std::net::TcpListener;
    use std::sync::Once;
    use std::time::Duration;

    pub const BUDGET: Duration = Duration::from_secs(5);

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x8000);
        });
    }

    /// Grab a port that is free right now.
    pub fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    pub fn options(engine: EngineKind, port: u16) -> ServerOptions {
        ServerOptions {
            port,
            engine,
            workers: 2,
            ..ServerOptions::default()
        }
    }

    /// Echo server started in the background, stopped on drop.
    pub struct TestServer {
        pub handle: ServerHandle<Box<dyn ServerAdapter>>,
    }

    impl TestServer {
        pub fn start(engine: EngineKind) -> Self {
            setup_may_runtime();
            let mut handle = ServerHandle::from_options(EchoHandler, &options(engine, 0)).unwrap();
            handle.start_background(BUDGET).unwrap();
            Self { handle }
        }

        pub fn url(&self, path: &str) -> String {
            format!("{}{}", self.handle.url(), path)
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.handle.stop(BUDGET);
        }
    }
}

pub mod http {
    use std::time::Duration;

    fn client() -> reqwest::blocking::Client {
        client_with_timeout(Duration::from_secs(5))
    }

    /// Pooling client; reusing it across requests keeps the connection alive.
    pub fn client_with_timeout(timeout: Duration) -> reqwest::blocking::Client {
        reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap()
    }

    /// GET `url`, returning status and body.
    pub fn get(url: &str) -> (u16, String) {
        let response = client().get(url).send().unwrap();
        let status = response.status().as_u16();
        (status, response.text().unwrap())
    }

    pub fn post(url: &str, body: &str) -> (u16, String) {
        let response = client().post(url).body(body.to_string()).send().unwrap();
        let status = response.status().as_u16();
        (status, response.text().unwrap())
    }
}

pub mod logs {
    use brrtsupervisor::{LogConfig, LogFormat};
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use tracing::Dispatch;

    /// In-memory log sink shared with a scoped dispatcher.
    #[derive(Clone, Default)]
    pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        pub fn dispatch(&self, level: &str) -> Dispatch {
            let writer = self.clone();
            LogConfig {
                level: level.to_string(),
                format: LogFormat::Json,
            }
            .build_dispatch_with_writer(move || writer.clone())
        }

        pub fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }

        /// Number of log lines whose message contains `needle`.
        pub fn count_messages(&self, needle: &str) -> usize {
            self.contents()
                .lines()
                .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
                .filter(|line| {
                    line["fields"]["message"]
                        .as_str()
                        .is_some_and(|message| message.contains(needle))
                })
                .count()
        }
    }
}
