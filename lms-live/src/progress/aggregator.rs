//! Merges push events and poll snapshots into per-job records
//!
//! Merge rules:
//! - Push progress never lowers the stored overall progress.
//! - A poll snapshot is a consistent full read and replaces progress, status
//!   and the model table, even when it reports less than a previous push.
//! - The stage only moves forward, whichever channel reports it.
//! - Once a record is Completed or Error it is frozen.
//! - Every applied push appends exactly one timeline entry; a poll appends
//!   one only when it changes the status.

use super::record::{JobProgressRecord, ModelProgress, TimelineEntry, TimelineKind};
use chrono::Utc;
use lms_common::events::{clamp_percent, JobStatus, ModelProgressUpdate, PollSnapshot, ProgressEvent};
use std::collections::HashMap;
use tracing::{debug, info};

/// Result of applying an update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First update for the job; a record was created
    Created,
    Updated,
    /// Record already terminal; update discarded
    IgnoredTerminal,
}

/// Owner of all job progress records
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    records: HashMap<String, JobProgressRecord>,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a pushed `progress` event
    pub fn apply_push_event(&mut self, event: &ProgressEvent) -> ApplyOutcome {
        let (record, outcome) = self.record_for(&event.job_id);
        if record.is_terminal() {
            debug!(
                "Ignoring push for job {} in terminal status {}",
                record.job_id,
                record.status.as_str()
            );
            return ApplyOutcome::IgnoredTerminal;
        }

        for update in &event.model_progress {
            merge_model(record.models.entry(update.model_id.clone()).or_default(), update);
        }

        // Model-only pushes derive the overall figure from the model table
        let candidate = match event.progress {
            Some(progress) => Some(clamp_percent(progress)),
            None if !event.model_progress.is_empty() => record.mean_model_progress(),
            None => None,
        };
        if let Some(progress) = candidate {
            if progress >= record.progress {
                record.progress = progress;
            } else {
                debug!(
                    "Job {}: push progress {} below current {}, keeping current",
                    record.job_id, progress, record.progress
                );
            }
        }

        let stage_advanced = event
            .stage
            .map(|stage| record.advance_stage(stage))
            .unwrap_or(false);

        match event.status {
            Some(status) => record.status = status,
            None if record.status == JobStatus::Pending && candidate.is_some() => {
                record.status = JobStatus::Processing;
            }
            None => {}
        }

        if let Some(error) = &event.error {
            record.last_error = Some(error.clone());
        }
        if record.status == JobStatus::Completed && event.progress.is_none() {
            record.progress = 100;
        }

        record.last_updated = event.timestamp.unwrap_or_else(Utc::now);
        if record.status == JobStatus::Processing && record.processing_started_at.is_none() {
            record.processing_started_at = Some(record.last_updated);
        }

        let kind = match record.status {
            JobStatus::Completed => TimelineKind::Completed,
            JobStatus::Error => TimelineKind::Failed,
            _ if stage_advanced => TimelineKind::StageChanged,
            _ if event.progress.is_none() && !event.model_progress.is_empty() => {
                TimelineKind::ModelUpdate
            }
            _ => TimelineKind::Progress,
        };
        let message = event
            .message
            .clone()
            .unwrap_or_else(|| describe(kind, record));
        record.timeline.push(TimelineEntry {
            timestamp: record.last_updated,
            kind,
            message,
            progress: record.progress,
        });

        if record.is_terminal() {
            info!(
                "Job {} reached {} at {}%",
                record.job_id,
                record.status.as_str(),
                record.progress
            );
        }
        outcome
    }

    /// Merge a poll snapshot for `job_id`
    pub fn apply_poll_snapshot(&mut self, job_id: &str, snapshot: &PollSnapshot) -> ApplyOutcome {
        let (record, outcome) = self.record_for(job_id);
        if record.is_terminal() {
            debug!("Ignoring poll for job {} in terminal status", job_id);
            return ApplyOutcome::IgnoredTerminal;
        }

        // Present fields replace stored values; absent ones leave them alone
        if let Some(reported) = snapshot.overall_progress {
            let progress = clamp_percent(reported);
            if progress < record.progress {
                debug!(
                    "Job {}: poll reports {}% below pushed {}%, using poll value",
                    job_id, progress, record.progress
                );
            }
            record.progress = progress;
        }

        if let Some(models) = &snapshot.model_progress {
            record.models = models
                .iter()
                .map(|update| {
                    let mut model = ModelProgress::default();
                    merge_model(&mut model, update);
                    (update.model_id.clone(), model)
                })
                .collect();
        }

        if let Some(stage) = snapshot.current_stage {
            record.advance_stage(stage);
        }
        if let Some(error) = &snapshot.error {
            record.last_error = Some(error.clone());
        }
        if snapshot.processing_start_time.is_some() {
            record.processing_started_at = snapshot.processing_start_time;
        }
        record.last_updated = snapshot.last_updated.unwrap_or_else(Utc::now);

        let previous = record.status;
        if let Some(status) = snapshot.status {
            record.status = status;
        }
        if record.status == JobStatus::Completed && snapshot.overall_progress.is_none() {
            record.progress = 100;
        }
        if record.status != previous {
            let kind = match record.status {
                JobStatus::Completed => TimelineKind::Completed,
                JobStatus::Error => TimelineKind::Failed,
                _ => TimelineKind::StatusChanged,
            };
            let message = describe(kind, record);
            record.timeline.push(TimelineEntry {
                timestamp: record.last_updated,
                kind,
                message,
                progress: record.progress,
            });
        }

        outcome
    }

    /// Current record for `job_id`
    pub fn get_progress(&self, job_id: &str) -> Option<&JobProgressRecord> {
        self.records.get(job_id)
    }

    /// Drop the record for `job_id`
    pub fn stop_tracking(&mut self, job_id: &str) -> Option<JobProgressRecord> {
        self.records.remove(job_id)
    }

    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record_for(&mut self, job_id: &str) -> (&mut JobProgressRecord, ApplyOutcome) {
        let outcome = if self.records.contains_key(job_id) {
            ApplyOutcome::Updated
        } else {
            debug!("Creating progress record for job {}", job_id);
            ApplyOutcome::Created
        };
        let record = self
            .records
            .entry(job_id.to_string())
            .or_insert_with(|| JobProgressRecord::new(job_id));
        (record, outcome)
    }
}

fn merge_model(model: &mut ModelProgress, update: &ModelProgressUpdate) {
    if let Some(progress) = update.progress {
        model.progress = clamp_percent(progress);
    }
    if update.stage.is_some() {
        model.stage = update.stage;
    }
    if let Some(retry_count) = update.retry_count {
        model.retry_count = retry_count;
    }
    if update.error.is_some() {
        model.last_error = update.error.clone();
    }
}

fn describe(kind: TimelineKind, record: &JobProgressRecord) -> String {
    match kind {
        TimelineKind::Completed => "Analysis completed".to_string(),
        TimelineKind::Failed => format!(
            "Analysis failed: {}",
            record.last_error.as_deref().unwrap_or("unknown error")
        ),
        TimelineKind::StageChanged => match record.stage {
            Some(stage) => format!("Entered {} stage", stage),
            None => "Stage changed".to_string(),
        },
        TimelineKind::ModelUpdate => format!("Model progress updated ({}%)", record.progress),
        TimelineKind::StatusChanged => format!("Status changed to {}", record.status.as_str()),
        TimelineKind::Progress => format!("Progress {}%", record.progress),
    }
}
