//! Server lifecycle: Running -> Draining -> Stopped.
//!
//! The first termination signal moves the server to Draining: the listener
//! stops accepting and in-flight requests run to completion. Draining ends
//! when those requests finish, when the drain timeout expires, or when a
//! second signal forces the process down. Only the first counts as a clean
//! shutdown.

use std::future::IntoFuture;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("server error: {0}")]
    Serve(#[from] io::Error),

    #[error("in-flight requests still running after {0:?} drain timeout")]
    DrainTimeout(Duration),

    #[error("shutdown forced before in-flight requests finished")]
    Forced,
}

/// Shared handle on the lifecycle state. States only ever move forward.
#[derive(Clone)]
pub struct Lifecycle {
    state: Arc<watch::Sender<ShutdownState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ShutdownState::Running);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.borrow()
    }

    fn advance(&self, next: ShutdownState) -> bool {
        self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Stop accepting connections. Returns false if already draining or stopped.
    pub fn begin_drain(&self) -> bool {
        let changed = self.advance(ShutdownState::Draining);
        if changed {
            info!("Draining in-flight requests");
        }
        changed
    }

    /// Give up on in-flight requests.
    pub fn force_stop(&self) {
        self.advance(ShutdownState::Stopped);
    }

    /// Resolve once the lifecycle has reached `target` or moved past it.
    pub async fn reached(&self, target: ShutdownState) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|state| *state >= target).await;
    }

    /// Listen for SIGINT/SIGTERM: the first begins draining, the second forces a stop.
    pub fn spawn_signal_listener(&self) -> JoinHandle<()> {
        let lifecycle = self.clone();
        tokio::spawn(async move {
            termination_signal().await;
            info!("Shutting down...");
            lifecycle.begin_drain();

            termination_signal().await;
            warn!("Second termination signal received, forcing shutdown");
            lifecycle.force_stop();
        })
    }
}

enum DrainCutoff {
    TimedOut,
    Forced,
}

/// Serve `app` until the lifecycle starts draining, then wait for in-flight
/// requests for at most `drain_timeout`.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    lifecycle: Lifecycle,
    drain_timeout: Duration,
) -> Result<(), ShutdownError> {
    let drain_signal = lifecycle.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move { drain_signal.reached(ShutdownState::Draining).await })
        .into_future();

    let watchdog = lifecycle.clone();
    let cutoff = async move {
        watchdog.reached(ShutdownState::Draining).await;
        tokio::select! {
            _ = tokio::time::sleep(drain_timeout) => DrainCutoff::TimedOut,
            _ = watchdog.reached(ShutdownState::Stopped) => DrainCutoff::Forced,
        }
    };

    let result = tokio::select! {
        served = server => served.map_err(ShutdownError::from),
        cutoff = cutoff => match cutoff {
            DrainCutoff::TimedOut => Err(ShutdownError::DrainTimeout(drain_timeout)),
            DrainCutoff::Forced => Err(ShutdownError::Forced),
        },
    };

    lifecycle.force_stop();
    if let Err(e) = &result {
        error!("Shutdown did not complete cleanly: {}", e);
    }
    result
}

async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
