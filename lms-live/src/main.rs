//! lms-live - follow AI analysis jobs from the command line
//!
//! Connects to the live analysis channel, tracks the given jobs and logs
//! progress until every job has completed or failed (or Ctrl-C). Falls back
//! to polling whenever the live channel is unavailable.

use anyhow::{anyhow, Result};
use clap::Parser;
use lms_common::events::names;
use lms_common::LiveEvent;
use lms_live::tracking::HttpProgressSource;
use lms_live::{
    ConfigOverrides, ConnectionError, ConnectionPhase, LiveConfig, LiveContext, LiveError,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "lms-live", version, about = "Track LMS analysis jobs in real time")]
struct Args {
    /// Config file (default: $LMS_CONFIG or <config dir>/lms/live.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Full WebSocket endpoint, namespace included (overrides the config file)
    #[arg(long)]
    server: Option<String>,

    /// HTTP base URL of the poll endpoint
    #[arg(long)]
    api: Option<String>,

    /// User to connect as
    #[arg(short, long)]
    user: Option<String>,

    /// Bearer token
    #[arg(long, env = "LMS_LIVE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Job to track (repeatable)
    #[arg(short, long = "job", required = true)]
    jobs: Vec<String>,

    /// Content the jobs analyse
    #[arg(long, default_value = "")]
    content: String,

    /// Disable the poll fallback
    #[arg(long)]
    no_auto_refresh: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let overrides = ConfigOverrides {
        endpoint: args.server,
        api_base_url: args.api,
        user_id: args.user,
        token: args.token,
        disable_auto_refresh: args.no_auto_refresh,
    };
    let config = LiveConfig::load(args.config.as_deref(), &overrides)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    info!("Starting lms-live v{}", env!("CARGO_PKG_VERSION"));
    info!("Live endpoint: {}", config.endpoint);
    info!("Poll endpoint: {}", config.api_base_url);

    let user_id = config
        .user_id
        .clone()
        .ok_or_else(|| anyhow!("No user configured (use --user, LMS_LIVE_USER or user_id in the config file)"))?;
    let token = config.token.clone().unwrap_or_default();

    let source = Arc::new(HttpProgressSource::new(
        config.api_base_url.clone(),
        config.token.clone(),
    ));
    let context = LiveContext::new(config, source);

    let printer = context.registry().subscribe(
        names::PROGRESS,
        |event| {
            if let LiveEvent::Progress(progress) = event {
                info!(
                    job = %progress.job_id,
                    progress = ?progress.progress,
                    stage = ?progress.stage,
                    status = ?progress.status,
                    "progress"
                );
            }
        },
        None,
    );

    context.start();
    for job_id in &args.jobs {
        context.track(job_id, &args.content);
    }

    match context.connect(&user_id, &token).await {
        Ok(()) => {}
        Err(LiveError::Connection(e @ (ConnectionError::MissingToken | ConnectionError::Auth(_)))) => {
            error!("Cannot open live channel: {}", e);
            printer.unsubscribe();
            context.shutdown().await;
            return Err(e.into());
        }
        Err(e) => warn!("Live channel unavailable ({}); continuing with polling", e),
    }

    let mut phases = context.client().watch_phase();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {
                if context.all_terminal() {
                    info!("All tracked jobs finished");
                    break;
                }
            }
            Ok(()) = phases.changed() => {
                let phase = *phases.borrow_and_update();
                match phase {
                    ConnectionPhase::Reconnecting => warn!("Reconnecting..."),
                    ConnectionPhase::Offline => warn!("Offline; polling every job"),
                    ConnectionPhase::AuthFailed => {
                        error!("Credentials rejected: {:?}", context.connection_state().last_error);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    for job_id in &args.jobs {
        match context.progress(job_id) {
            Some(record) => info!("{}", serde_json::to_string(&record)?),
            None => warn!("No progress received for job {}", job_id),
        }
    }
    info!("{} unread notifications", context.unread_notifications());

    printer.unsubscribe();
    context.shutdown().await;
    Ok(())
}
