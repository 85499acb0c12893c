//! Per-job progress record

use chrono::{DateTime, Utc};
use lms_common::events::{AnalysisStage, JobStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// Latest known state of one analysis model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProgress {
    /// 0-100
    pub progress: u8,
    pub stage: Option<AnalysisStage>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

/// What a timeline entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    /// Overall progress update
    Progress,
    /// Pipeline moved to a later stage
    StageChanged,
    /// Only per-model progress changed
    ModelUpdate,
    /// Status changed by a poll snapshot
    StatusChanged,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: TimelineKind,
    pub message: String,
    /// Overall progress after the update was applied
    pub progress: u8,
}

/// Aggregated progress of one analysis job
///
/// Owned by the [`super::ProgressAggregator`]; consumers receive clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressRecord {
    pub job_id: String,
    /// Overall progress, 0-100
    pub progress: u8,
    pub status: JobStatus,
    /// Furthest pipeline stage reached
    pub stage: Option<AnalysisStage>,
    pub models: BTreeMap<String, ModelProgress>,
    /// Append-only log, one entry per applied push
    pub timeline: Vec<TimelineEntry>,
    /// Most recent job-level error; kept after later successful updates
    pub last_error: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl JobProgressRecord {
    pub(crate) fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            progress: 0,
            status: JobStatus::Pending,
            stage: None,
            models: BTreeMap::new(),
            timeline: Vec::new(),
            last_error: None,
            processing_started_at: None,
            last_updated: Utc::now(),
        }
    }

    /// Completed or Error; terminal records are frozen
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelProgress> {
        self.models.get(model_id)
    }

    /// Move to `stage` if it is later than the current one
    pub(crate) fn advance_stage(&mut self, stage: AnalysisStage) -> bool {
        match self.stage {
            Some(current) if stage <= current => false,
            _ => {
                self.stage = Some(stage);
                true
            }
        }
    }

    /// Mean progress across known models
    pub(crate) fn mean_model_progress(&self) -> Option<u8> {
        if self.models.is_empty() {
            return None;
        }
        let total: u32 = self.models.values().map(|model| u32::from(model.progress)).sum();
        let count = self.models.len() as f64;
        Some(lms_common::events::clamp_percent(f64::from(total) / count))
    }
}
