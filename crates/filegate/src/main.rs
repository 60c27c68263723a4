use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filegate::shutdown::{self, Lifecycle};
use filegate::{AppState, Config, routes};

#[derive(Parser, Debug)]
#[command(name = "filegate")]
#[command(about = "Minimal HTTP file gateway for browsing, uploading and deleting files")]
#[command(version)]
struct Cli {
    /// Directory prefix for all operations
    #[arg(short, long, default_value = ".")]
    prefix: PathBuf,

    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file path (optional)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "filegate=debug,tower_http=debug"
    } else {
        "filegate=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    let root_dir = cli
        .prefix
        .canonicalize()
        .with_context(|| format!("Root directory does not exist: {}", cli.prefix.display()))?;
    if !root_dir.is_dir() {
        bail!("Root path is not a directory: {}", root_dir.display());
    }

    info!("Serving files from: {}", root_dir.display());

    let drain_timeout = config.drain_timeout();
    let app = routes::gateway_router(AppState::with_config(root_dir, config));

    let addr = SocketAddr::new(cli.bind, cli.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("Starting server on {}", addr);

    let lifecycle = Lifecycle::new();
    lifecycle.spawn_signal_listener();

    shutdown::serve(listener, app, lifecycle, drain_timeout)
        .await
        .context("running server")?;

    info!("Server stopped");
    Ok(())
}
