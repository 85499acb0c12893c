//! Periodic poll scheduler
//!
//! Every tick the scheduler asks the tracker which jobs need a poll, fetches
//! each one and applies the snapshot. Tracked membership and the
//! auto-refresh switch are re-checked immediately before applying a result,
//! so a job stopped while its fetch was in flight is never touched.

use super::source::ProgressSource;
use super::tracker::JobTracker;
use crate::error::SourceError;
use crate::progress::ProgressAggregator;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct PollScheduler {
    interval: Duration,
    source: Arc<dyn ProgressSource>,
    tracker: Arc<Mutex<JobTracker>>,
    aggregator: Arc<Mutex<ProgressAggregator>>,
}

impl PollScheduler {
    pub fn new(
        interval: Duration,
        source: Arc<dyn ProgressSource>,
        tracker: Arc<Mutex<JobTracker>>,
        aggregator: Arc<Mutex<ProgressAggregator>>,
    ) -> Self {
        Self {
            interval,
            source,
            tracker,
            aggregator,
        }
    }

    /// Run the poll timer until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Poll scheduler started (interval {:?})", self.interval);
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let applied = self.poll_once().await;
                        if applied > 0 {
                            debug!("Poll tick applied {} snapshots", applied);
                        }
                    }
                }
            }
            info!("Poll scheduler stopped");
        })
    }

    /// Poll every job that currently needs it; returns snapshots applied
    pub async fn poll_once(&self) -> usize {
        let due = self.tracker.lock().due_for_poll(Instant::now());
        let mut applied = 0;

        for job_id in due {
            if !self.tracker.lock().should_poll(&job_id) {
                continue;
            }

            let snapshot = match self.source.fetch_progress(&job_id).await {
                Ok(snapshot) => snapshot,
                Err(SourceError::NotFound(_)) => {
                    warn!("Poll: job {} unknown to server", job_id);
                    continue;
                }
                Err(e) => {
                    warn!("Poll for job {} failed: {}", job_id, e);
                    continue;
                }
            };

            // Tracker stays locked through the apply so a concurrent stop cannot interleave
            let mut tracker = self.tracker.lock();
            if !tracker.should_poll(&job_id) {
                debug!("Discarding poll result for job {} (no longer polled)", job_id);
                continue;
            }

            let terminal = {
                let mut aggregator = self.aggregator.lock();
                aggregator.apply_poll_snapshot(&job_id, &snapshot);
                aggregator
                    .get_progress(&job_id)
                    .is_some_and(|record| record.is_terminal())
            };
            if terminal {
                tracker.mark_terminal(&job_id);
            }
            applied += 1;
        }

        applied
    }
}
