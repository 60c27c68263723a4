//! HTTP file gateway library.
//!
//! Exposes a filesystem subtree for browsing, uploading and deleting files, plus
//! liveness/readiness probes. The binary in `main.rs` is a thin wrapper around
//! [`routes::gateway_router`] and [`shutdown::Lifecycle`].

pub mod config;
pub mod error;
pub mod form;
pub mod handlers;
pub mod listing;
pub mod paths;
pub mod routes;
pub mod shutdown;

use std::path::PathBuf;
use std::sync::Arc;

pub use config::Config;
pub use error::GatewayError;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Root directory every virtual path is resolved against
    pub root_dir: PathBuf,
    /// Configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState with the given root directory and default config.
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            root_dir,
            config: Arc::new(Config::default()),
        }
    }

    /// Create a new AppState with the given root directory and config.
    pub fn with_config(root_dir: PathBuf, config: Config) -> Self {
        Self {
            root_dir,
            config: Arc::new(config),
        }
    }
}
