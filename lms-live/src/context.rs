//! Live tracking context
//!
//! Wires the connection client, event registry, progress aggregator,
//! notification store and poll scheduler together. One instance per
//! logged-in user; presentation code reads state through it and subscribes
//! to the registry for change notifications.

use crate::config::LiveConfig;
use crate::connection::{ConnectionClient, ConnectionPhase, ConnectionState};
use crate::error::LiveResult;
use crate::notifications::{Notification, NotificationStore};
use crate::progress::{JobProgressRecord, ProgressAggregator};
use crate::registry::{EventRegistry, Subscription};
use crate::tracking::{JobTracker, PollScheduler, ProgressSource, TrackingMode};
use lms_common::events::names;
use lms_common::LiveEvent;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct LiveContext {
    registry: EventRegistry,
    client: Arc<ConnectionClient>,
    aggregator: Arc<Mutex<ProgressAggregator>>,
    notifications: Arc<Mutex<NotificationStore>>,
    tracker: Arc<Mutex<JobTracker>>,
    scheduler: PollScheduler,
    subscriptions: Mutex<Vec<Subscription>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl LiveContext {
    pub fn new(config: LiveConfig, source: Arc<dyn ProgressSource>) -> Self {
        let registry = EventRegistry::new();
        let client = Arc::new(ConnectionClient::new(
            config.endpoint.clone(),
            config.reconnect.clone(),
            registry.clone(),
        ));
        let aggregator = Arc::new(Mutex::new(ProgressAggregator::new()));
        let notifications = Arc::new(Mutex::new(
            NotificationStore::new(config.notification_capacity)
                .with_preferences(config.preferences.clone()),
        ));
        let tracker = Arc::new(Mutex::new(JobTracker::new(
            config.auto_refresh,
            config.push_stale_after,
        )));
        let scheduler = PollScheduler::new(
            config.poll_interval,
            source,
            tracker.clone(),
            aggregator.clone(),
        );

        let subscriptions = wire_consumers(&registry, &aggregator, &notifications, &tracker);

        Self {
            registry,
            client,
            aggregator,
            notifications,
            tracker,
            scheduler,
            subscriptions: Mutex::new(subscriptions),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Spawn the poll timer and the connection phase watcher
    ///
    /// Must be called inside a tokio runtime; later calls are no-ops.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let poller = self.scheduler.clone().spawn(self.cancel.clone());

        let mut phases = self.client.watch_phase();
        let tracker = self.tracker.clone();
        let cancel = self.cancel.clone();
        let watcher = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = phases.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let phase = *phases.borrow_and_update();
                        tracker.lock().set_connected(phase.is_live(), Instant::now());
                        match phase {
                            ConnectionPhase::Offline => warn!("Live channel offline; polling only"),
                            ConnectionPhase::AuthFailed => warn!("Live channel rejected credentials; polling only"),
                            other => debug!("Live channel {}", other),
                        }
                    }
                }
            }
        });

        self.tasks.lock().extend([poller, watcher]);
        info!("Live context started");
    }

    /// Open the live channel for `user_id`
    pub async fn connect(&self, user_id: &str, token: &str) -> LiveResult<()> {
        self.notifications.lock().set_owner(Some(user_id.to_string()));
        self.client.connect(user_id, token).await?;
        Ok(())
    }

    /// Follow `job_id`; effective immediately whether online or offline
    pub fn track(&self, job_id: &str, content_id: &str) -> TrackingMode {
        let mode = self.tracker.lock().track(job_id, content_id, Instant::now());
        self.client.track_progress(job_id, content_id);
        info!("Tracking job {} ({:?})", job_id, mode);
        mode
    }

    /// Stop following `job_id` and drop its record
    ///
    /// No push or poll result for the job is applied after this returns.
    pub fn stop_tracking(&self, job_id: &str) -> Option<JobProgressRecord> {
        let removed = {
            let mut tracker = self.tracker.lock();
            tracker.stop(job_id);
            self.aggregator.lock().stop_tracking(job_id)
        };
        self.client.stop_tracking(job_id);
        info!("Stopped tracking job {}", job_id);
        removed
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        self.tracker.lock().set_auto_refresh(enabled, Instant::now());
        info!("Auto refresh {}", if enabled { "enabled" } else { "disabled" });
    }

    /// Poll due jobs right away instead of waiting for the timer
    pub async fn refresh_now(&self) -> usize {
        self.scheduler.poll_once().await
    }

    pub fn progress(&self, job_id: &str) -> Option<JobProgressRecord> {
        self.aggregator.lock().get_progress(job_id).cloned()
    }

    pub fn tracking_mode(&self, job_id: &str) -> Option<TrackingMode> {
        self.tracker.lock().mode(job_id)
    }

    /// True when every tracked job has reached Completed or Error
    pub fn all_terminal(&self) -> bool {
        let tracker = self.tracker.lock();
        !tracker.is_empty() && tracker.active_count() == 0
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.status()
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.client.phase()
    }

    pub fn request_analytics(&self, filters: serde_json::Value) -> LiveResult<()> {
        self.client.request_analytics(filters)?;
        Ok(())
    }

    pub fn unread_notifications(&self) -> usize {
        self.notifications.lock().unread_count()
    }

    /// Newest-last copy of the stored notifications
    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.lock().list(None).cloned().collect()
    }

    pub fn mark_notification_read(&self, id: &str) -> bool {
        self.notifications.lock().mark_read(id)
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    pub fn client(&self) -> &Arc<ConnectionClient> {
        &self.client
    }

    /// Stop background tasks, close the socket and tear down subscriptions
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for subscription in self.subscriptions.lock().drain(..) {
            subscription.unsubscribe();
        }
        self.registry.close();
        self.client.shutdown();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("Live context shut down");
    }
}

/// Internal consumers that keep the aggregator and notification store current
fn wire_consumers(
    registry: &EventRegistry,
    aggregator: &Arc<Mutex<ProgressAggregator>>,
    notifications: &Arc<Mutex<NotificationStore>>,
    tracker: &Arc<Mutex<JobTracker>>,
) -> Vec<Subscription> {
    let progress = {
        let aggregator = aggregator.clone();
        let tracker = tracker.clone();
        registry.subscribe(
            names::PROGRESS,
            move |event| {
                let LiveEvent::Progress(progress) = event else {
                    return;
                };
                let mut tracker = tracker.lock();
                if !tracker.is_tracked(&progress.job_id) {
                    debug!("Push for untracked job {} ignored", progress.job_id);
                    return;
                }
                tracker.note_push(&progress.job_id, Instant::now());

                let terminal = {
                    let mut aggregator = aggregator.lock();
                    aggregator.apply_push_event(progress);
                    aggregator
                        .get_progress(&progress.job_id)
                        .is_some_and(|record| record.is_terminal())
                };
                if terminal {
                    tracker.mark_terminal(&progress.job_id);
                }
            },
            None,
        )
    };

    let notification = {
        let notifications = notifications.clone();
        registry.subscribe(
            names::NOTIFICATION,
            move |event| {
                if let LiveEvent::Notification(payload) = event {
                    notifications
                        .lock()
                        .ingest(Notification::from_payload(payload.clone()));
                }
            },
            None,
        )
    };

    let change = {
        let notifications = notifications.clone();
        registry.subscribe(
            names::SIGNIFICANT_CHANGE,
            move |event| {
                if let LiveEvent::SignificantChange(change) = event {
                    notifications
                        .lock()
                        .ingest(Notification::from_significant_change(change));
                }
            },
            None,
        )
    };

    vec![progress, notification, change]
}
