//! Tracked-job table and per-job tracking mode
//!
//! | auto_refresh | connected | push fresh | mode                  |
//! |--------------|-----------|------------|-----------------------|
//! | off          | no        | any        | Idle                  |
//! | off          | yes       | any        | LivePush              |
//! | on           | no        | any        | PollingOnly           |
//! | on           | yes       | yes        | LivePush              |
//! | on           | yes       | no         | LiveWithPollFallback  |
//!
//! Terminal jobs are always Idle.

use indexmap::IndexMap;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    /// No polling
    Idle,
    /// Offline; the poll timer is the only source
    PollingOnly,
    /// Push traffic is flowing; polling suppressed
    LivePush,
    /// Connected but the job has gone quiet; poll until push resumes
    LiveWithPollFallback,
}

impl TrackingMode {
    pub fn polls(&self) -> bool {
        matches!(self, TrackingMode::PollingOnly | TrackingMode::LiveWithPollFallback)
    }
}

/// Mode for a non-terminal job
pub fn select_mode(auto_refresh: bool, connected: bool, push_fresh: bool) -> TrackingMode {
    match (auto_refresh, connected, push_fresh) {
        (false, false, _) => TrackingMode::Idle,
        (false, true, _) => TrackingMode::LivePush,
        (true, false, _) => TrackingMode::PollingOnly,
        (true, true, true) => TrackingMode::LivePush,
        (true, true, false) => TrackingMode::LiveWithPollFallback,
    }
}

#[derive(Debug, Clone)]
struct TrackedJob {
    content_id: String,
    mode: TrackingMode,
    tracked_at: Instant,
    last_push_at: Option<Instant>,
    terminal: bool,
}

#[derive(Debug)]
pub struct JobTracker {
    jobs: IndexMap<String, TrackedJob>,
    auto_refresh: bool,
    connected: bool,
    push_stale_after: Duration,
}

impl JobTracker {
    pub fn new(auto_refresh: bool, push_stale_after: Duration) -> Self {
        Self {
            jobs: IndexMap::new(),
            auto_refresh,
            connected: false,
            push_stale_after,
        }
    }

    /// Start tracking; re-tracking an existing job updates its content id
    pub fn track(&mut self, job_id: &str, content_id: &str, now: Instant) -> TrackingMode {
        let job = self
            .jobs
            .entry(job_id.to_string())
            .or_insert_with(|| TrackedJob {
                content_id: content_id.to_string(),
                mode: TrackingMode::Idle,
                tracked_at: now,
                last_push_at: None,
                terminal: false,
            });
        job.content_id = content_id.to_string();
        self.recompute(job_id, now)
    }

    pub fn stop(&mut self, job_id: &str) -> bool {
        self.jobs.shift_remove(job_id).is_some()
    }

    pub fn is_tracked(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn mode(&self, job_id: &str) -> Option<TrackingMode> {
        self.jobs.get(job_id).map(|job| job.mode)
    }

    pub fn content_id(&self, job_id: &str) -> Option<&str> {
        self.jobs.get(job_id).map(|job| job.content_id.as_str())
    }

    pub fn auto_refresh(&self) -> bool {
        self.auto_refresh
    }

    pub fn set_auto_refresh(&mut self, enabled: bool, now: Instant) {
        self.auto_refresh = enabled;
        self.refresh(now);
    }

    pub fn set_connected(&mut self, connected: bool, now: Instant) {
        self.connected = connected;
        self.refresh(now);
    }

    /// Record push traffic for `job_id`
    pub fn note_push(&mut self, job_id: &str, now: Instant) {
        if let Some(job) = self.jobs.get_mut(job_id) {
            job.last_push_at = Some(now);
            self.recompute(job_id, now);
        }
    }

    /// Job reached Completed or Error; it will never poll again
    pub fn mark_terminal(&mut self, job_id: &str) {
        if let Some(job) = self.jobs.get_mut(job_id) {
            job.terminal = true;
            if job.mode != TrackingMode::Idle {
                debug!("Job {}: {:?} -> Idle (terminal)", job_id, job.mode);
                job.mode = TrackingMode::Idle;
            }
        }
    }

    pub fn is_terminal(&self, job_id: &str) -> bool {
        self.jobs.get(job_id).is_some_and(|job| job.terminal)
    }

    /// Recompute every job's mode
    pub fn refresh(&mut self, now: Instant) {
        let ids: Vec<String> = self.jobs.keys().cloned().collect();
        for job_id in ids {
            self.recompute(&job_id, now);
        }
    }

    /// Jobs whose mode requires a poll right now
    pub fn due_for_poll(&mut self, now: Instant) -> Vec<String> {
        self.refresh(now);
        self.jobs
            .iter()
            .filter(|(_, job)| job.mode.polls())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether a poll result for `job_id` may still be applied
    pub fn should_poll(&self, job_id: &str) -> bool {
        self.auto_refresh && self.jobs.get(job_id).is_some_and(|job| !job.terminal)
    }

    /// (job_id, content_id) pairs in tracking order
    pub fn tracked_jobs(&self) -> Vec<(String, String)> {
        self.jobs
            .iter()
            .map(|(id, job)| (id.clone(), job.content_id.clone()))
            .collect()
    }

    /// Tracked jobs that have not reached a terminal status
    pub fn active_count(&self) -> usize {
        self.jobs.values().filter(|job| !job.terminal).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn recompute(&mut self, job_id: &str, now: Instant) -> TrackingMode {
        let (auto_refresh, connected, stale_after) =
            (self.auto_refresh, self.connected, self.push_stale_after);
        let Some(job) = self.jobs.get_mut(job_id) else {
            return TrackingMode::Idle;
        };

        let next = if job.terminal {
            TrackingMode::Idle
        } else {
            // A job that has never pushed gets a grace period from tracking start
            let last_heard = job.last_push_at.unwrap_or(job.tracked_at);
            let fresh = now.saturating_duration_since(last_heard) < stale_after;
            select_mode(auto_refresh, connected, fresh)
        };

        if next != job.mode {
            debug!("Job {}: {:?} -> {:?}", job_id, job.mode, next);
            job.mode = next;
        }
        next
    }
}
