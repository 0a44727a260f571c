//! Graceful shutdown with request draining.
//!
//! SIGINT/SIGTERM flip the controller into shutdown; the server stops
//! accepting connections and then waits, bounded by the drain timeout, for
//! every request that holds an [`InFlightRequest`] to finish.

use crate::config::{parse_var, Lookup};
use crate::constants::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_DRAIN_TIMEOUT_SECS};
use crate::error::ServerError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Resolves once shutdown has been requested.
#[derive(Clone)]
pub struct ShutdownSignal {
    stopping: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub async fn recv(&mut self) {
        // A dropped controller also ends the wait.
        let _ = self.stopping.wait_for(|&stopping| stopping).await;
    }

    pub fn is_shutdown(&self) -> bool {
        *self.stopping.borrow()
    }
}

/// Coordinates shutdown between signal handlers, the HTTP server and
/// in-flight request handlers.
pub struct ShutdownController {
    stopping: watch::Sender<bool>,
    in_flight: Arc<watch::Sender<usize>>,
    drain_timeout: Duration,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self::with_drain_timeout(DEFAULT_DRAIN_TIMEOUT)
    }

    pub fn with_drain_timeout(drain_timeout: Duration) -> Self {
        Self {
            stopping: watch::Sender::new(false),
            in_flight: Arc::new(watch::Sender::new(0)),
            drain_timeout,
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            stopping: self.stopping.subscribe(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.stopping.borrow()
    }

    /// Request shutdown. Later calls are no-ops.
    pub fn shutdown(&self) {
        let first = self.stopping.send_if_modified(|stopping| {
            let changed = !*stopping;
            *stopping = true;
            changed
        });
        if first {
            info!("Shutdown requested");
        }
    }

    /// Count a request as in flight until the returned guard is dropped.
    pub fn begin_request(&self) -> InFlightRequest {
        self.in_flight.send_modify(|n| *n += 1);
        InFlightRequest {
            counter: Arc::clone(&self.in_flight),
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until no request is in flight, at most the drain timeout.
    ///
    /// Returns `false` if requests were still running when time ran out.
    pub async fn drain_requests(&self) -> bool {
        let running = self.in_flight();
        if running > 0 {
            info!(
                "Draining {} in-flight requests (timeout {:?})",
                running, self.drain_timeout
            );
        }

        let mut counter = self.in_flight.subscribe();
        let drained = tokio::time::timeout(self.drain_timeout, counter.wait_for(|&n| n == 0))
            .await
            .is_ok();

        if drained {
            info!("All requests drained");
        } else {
            warn!(
                "Drain timeout exceeded with {} requests still running",
                self.in_flight()
            );
        }
        drained
    }

    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by a handler for the duration of one request.
pub struct InFlightRequest {
    counter: Arc<watch::Sender<usize>>,
}

impl Drop for InFlightRequest {
    fn drop(&mut self) {
        self.counter.send_modify(|n| *n = n.saturating_sub(1));
    }
}

pub type SharedShutdownController = Arc<ShutdownController>;

pub fn new_shutdown_controller(config: &ShutdownConfig) -> SharedShutdownController {
    Arc::new(ShutdownController::with_drain_timeout(config.drain_timeout))
}

/// Spawn listeners that trigger `controller` on Ctrl+C and, on Unix, SIGTERM.
pub fn install_signal_handlers(controller: SharedShutdownController) {
    let on_interrupt = Arc::clone(&controller);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT");
                on_interrupt.shutdown();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                info!("Received SIGTERM");
                controller.shutdown();
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    });
}

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// How long in-flight requests may run after shutdown is requested.
    pub drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

impl ShutdownConfig {
    /// Read `APP_SHUTDOWN_DRAIN_TIMEOUT` (seconds).
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ServerError> {
        let secs = parse_var(
            lookup,
            "APP_SHUTDOWN_DRAIN_TIMEOUT",
            DEFAULT_DRAIN_TIMEOUT_SECS,
        )?;
        Ok(Self {
            drain_timeout: Duration::from_secs(secs),
        })
    }
}
