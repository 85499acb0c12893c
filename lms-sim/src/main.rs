//! lms-sim - simulated LMS analysis server
//!
//! Serves the live analysis WebSocket channel and the progress poll endpoint
//! with jobs that advance on a timer.

use anyhow::{Context, Result};
use clap::Parser;
use lms_sim::{build_router, AppState, SimConfig};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lms-sim", version, about = "Simulated LMS analysis server")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:5780")]
    bind: SocketAddr,

    /// Bearer token clients must present (auth disabled when unset)
    #[arg(long, env = "LMS_SIM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Milliseconds between progress ticks
    #[arg(long, default_value_t = 500)]
    tick_ms: u64,

    /// Progress added per tick (percentage points)
    #[arg(long, default_value_t = 5.0)]
    step: f64,

    /// Comma-separated model names attached to each job
    #[arg(long, value_delimiter = ',', default_value = "grammar,rubric,originality")]
    models: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting lms-sim v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = SimConfig {
        token: args.token,
        tick: Duration::from_millis(args.tick_ms.max(1)),
        step: args.step,
        models: args.models,
    };
    if config.token.is_none() {
        info!("Authentication disabled (no --token)");
    }

    let state = AppState::new(config);
    let cancel = CancellationToken::new();
    let simulation = state.spawn_simulation(cancel.clone());

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    let _ = simulation.await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received");
}
