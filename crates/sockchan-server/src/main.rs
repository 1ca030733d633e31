//! sockchan-server
//!
//! Usage: `sockchan-server [config.yaml]` (default `sockchan-server.yaml`;
//! built-in defaults when the file does not exist). Stops on Ctrl-C/SIGTERM.

use std::path::Path;

use tracing_subscriber::{fmt, EnvFilter};

use sockchan_server::config::{self, ServerConfig};
use sockchan_server::Server;

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sockchan-server.yaml".into());
    let cfg = if Path::new(&path).exists() {
        match config::load_from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(%path, error = %e, "config load failed");
                std::process::exit(1);
            }
        }
    } else {
        tracing::info!(%path, "config file not found, using defaults");
        ServerConfig::default()
    };

    let server = match Server::bind(cfg).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "server startup failed");
            std::process::exit(1);
        }
    };
    if let Ok(addr) = server.local_addr() {
        tracing::info!(%addr, "sockchan-server listening");
    }

    let state = server.state().clone();
    if let Err(e) = server.run_until(shutdown_signal()).await {
        tracing::error!(error = %e, "server failed");
    }

    tracing::info!(metrics = %state.metrics().render(), "final metrics");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
