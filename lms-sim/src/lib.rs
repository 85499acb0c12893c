//! lms-sim library interface
//!
//! A small analysis server that produces the live channel and poll endpoint
//! the lms-live client consumes. Used for local development and by the
//! lms-live integration tests.

pub mod api;
pub mod error;
pub mod jobs;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use jobs::SimJob;
use lms_common::events::EventBus;
use lms_common::LiveEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Simulation parameters
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Bearer token required on every request; None disables auth
    pub token: Option<String>,
    /// Interval between progress ticks
    pub tick: Duration,
    /// Progress added per tick (percentage points)
    pub step: f64,
    /// Model names attached to new jobs
    pub models: Vec<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            token: None,
            tick: Duration::from_millis(500),
            step: 5.0,
            models: vec![
                "grammar".to_string(),
                "rubric".to_string(),
                "originality".to_string(),
            ],
        }
    }
}

/// Out-of-band instruction to every open live socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminSignal {
    /// Close the socket without an error frame
    DropConnections,
    /// Send `auth_error` and close
    RevokeAuth,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: SimConfig,
    pub jobs: Arc<RwLock<HashMap<String, SimJob>>>,
    /// Push events fanned out to live sockets
    pub event_bus: EventBus,
    pub admin: broadcast::Sender<AdminSignal>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: SimConfig) -> Self {
        let (admin, _) = broadcast::channel(16);
        Self {
            config,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            event_bus: EventBus::new(256),
            admin,
            startup_time: Utc::now(),
        }
    }

    /// Advance every running job once and push the resulting events
    pub async fn tick(&self) -> usize {
        let events: Vec<LiveEvent> = {
            let mut jobs = self.jobs.write().await;
            jobs.values_mut()
                .filter_map(|job| job.advance(self.config.step))
                .map(LiveEvent::Progress)
                .collect()
        };
        let count = events.len();
        for event in events {
            self.event_bus.emit_lossy(event);
        }
        if count > 0 {
            debug!("Tick advanced {} jobs", count);
        }
        count
    }

    /// Run `tick` on the configured interval until cancelled
    pub fn spawn_simulation(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            info!(
                "Simulation running (tick {:?}, step {})",
                state.config.tick, state.config.step
            );
            let mut ticker = tokio::time::interval(state.config.tick);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        state.tick().await;
                    }
                }
            }
            info!("Simulation stopped");
        })
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::analysis_routes())
        .merge(api::admin_routes())
        .merge(api::live_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
