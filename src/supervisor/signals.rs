//! Ctrl+C handling for foreground starts.

use crate::adapter::ServerAdapter;
use std::sync::Arc;

#[cfg(unix)]
mod imp {
    use super::*;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::{Handle, Signals};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
    use tracing::{debug, info, warn};

    /// Stops the engine on SIGINT/SIGTERM while a foreground start is blocking.
    pub(crate) struct SignalGuard {
        handle: Handle,
        thread: Option<JoinHandle<()>>,
    }

    impl SignalGuard {
        pub(crate) fn install<A: ServerAdapter>(adapter: Arc<A>, publish: bool) -> Option<Self> {
            let mut signals = match Signals::new([SIGINT, SIGTERM]) {
                Ok(signals) => signals,
                Err(e) => {
                    warn!(error = %e, "Failed to register signal handlers");
                    return None;
                }
            };
            let handle = signals.handle();
            let spawned = thread::Builder::new()
                .name("brrts-signals".to_string())
                .spawn(move || {
                    if let Some(signal) = signals.forever().next() {
                        info!(signal, "Shutdown signal received");
                        if publish {
                            println!("\n>> Stopping {}...", adapter.engine_name());
                        }
                        if adapter.is_running() {
                            adapter.stop(Duration::ZERO);
                        }
                    }
                });
            match spawned {
                Ok(thread) => Some(Self {
                    handle,
                    thread: Some(thread),
                }),
                Err(e) => {
                    warn!(error = %e, "Failed to spawn signal thread");
                    handle.close();
                    None
                }
            }
        }
    }

    impl Drop for SignalGuard {
        fn drop(&mut self) {
            self.handle.close();
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    debug!("Signal thread panicked");
                }
            }
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::*;

    pub(crate) struct SignalGuard;

    impl SignalGuard {
        pub(crate) fn install<A: ServerAdapter>(_adapter: Arc<A>, _publish: bool) -> Option<Self> {
            None
        }
    }
}

pub(crate) use imp::SignalGuard;
