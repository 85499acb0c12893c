//! Analysis job progress type definitions
//!
//! Supporting types for push `progress` events and poll snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Analysis pipeline stage
///
/// Stages only move forward:
/// VALIDATION → PREPROCESSING → ANALYSIS → CONSOLIDATION → COMPLETION
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStage {
    /// Input checks before any model runs
    Validation,
    /// Content extraction and normalization
    Preprocessing,
    /// Models running against the content
    Analysis,
    /// Merging per-model results
    Consolidation,
    /// Results published
    Completion,
}

impl AnalysisStage {
    /// All stages in pipeline order
    pub const ALL: [AnalysisStage; 5] = [
        AnalysisStage::Validation,
        AnalysisStage::Preprocessing,
        AnalysisStage::Analysis,
        AnalysisStage::Consolidation,
        AnalysisStage::Completion,
    ];

    /// Wire name of the stage
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStage::Validation => "validation",
            AnalysisStage::Preprocessing => "preprocessing",
            AnalysisStage::Analysis => "analysis",
            AnalysisStage::Consolidation => "consolidation",
            AnalysisStage::Completion => "completion",
        }
    }

    /// Stage a job is in at the given overall progress
    ///
    /// Used by the simulation server to label progress events.
    pub fn for_progress(progress: u8) -> Self {
        match progress {
            0..=9 => AnalysisStage::Validation,
            10..=24 => AnalysisStage::Preprocessing,
            25..=79 => AnalysisStage::Analysis,
            80..=99 => AnalysisStage::Consolidation,
            _ => AnalysisStage::Completion,
        }
    }
}

impl fmt::Display for AnalysisStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "validation" => Ok(AnalysisStage::Validation),
            "preprocessing" => Ok(AnalysisStage::Preprocessing),
            "analysis" => Ok(AnalysisStage::Analysis),
            "consolidation" => Ok(AnalysisStage::Consolidation),
            "completion" => Ok(AnalysisStage::Completion),
            other => Err(Error::InvalidInput(format!("unknown analysis stage: {}", other))),
        }
    }
}

/// Job status as reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job accepted, not started
    #[default]
    Pending,
    /// Job running
    Processing,
    /// Job finished successfully (terminal)
    Completed,
    /// Job failed (terminal)
    Error,
}

impl JobStatus {
    /// Terminal statuses accept no further mutation
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Ok(JobStatus::Pending),
            "processing" | "running" | "in_progress" => Ok(JobStatus::Processing),
            "completed" | "complete" => Ok(JobStatus::Completed),
            "error" | "failed" => Ok(JobStatus::Error),
            other => Err(Error::InvalidInput(format!("unknown job status: {}", other))),
        }
    }
}

/// Per-model progress delta
///
/// Carried by push events (partial) and poll snapshots (full table).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProgressUpdate {
    /// Model identifier (e.g. "gpt-4", "claude", "gemini")
    #[serde(alias = "model")]
    pub model_id: String,
    /// Model progress (0.0 - 100.0)
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub progress: Option<f64>,
    /// Stage the model is in
    #[serde(default, deserialize_with = "crate::events::lenient")]
    pub stage: Option<AnalysisStage>,
    /// Retries performed so far
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub retry_count: Option<u32>,
    /// Most recent error reported for this model
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub error: Option<String>,
}

impl ModelProgressUpdate {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_stage(mut self, stage: AnalysisStage) -> Self {
        self.stage = Some(stage);
        self
    }
}

/// Push `progress` event payload
///
/// Every field except `job_id` is optional; consumers apply only the fields
/// that are present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    /// Job identifier
    pub job_id: String,
    /// Overall progress (0.0 - 100.0)
    #[serde(default, alias = "overallProgress", deserialize_with = "crate::events::lenient_value")]
    pub progress: Option<f64>,
    /// Job status
    #[serde(default, deserialize_with = "crate::events::lenient")]
    pub status: Option<JobStatus>,
    /// Pipeline stage
    #[serde(default, alias = "currentStage", deserialize_with = "crate::events::lenient")]
    pub stage: Option<AnalysisStage>,
    /// Per-model deltas; entries that fail to decode are skipped
    #[serde(default, deserialize_with = "crate::events::lenient_model_deltas")]
    pub model_progress: Vec<ModelProgressUpdate>,
    /// Human-readable message
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub message: Option<String>,
    /// Error message (set when a model or the job fails)
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub error: Option<String>,
    /// Server-side event time
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ProgressEvent {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_stage(mut self, stage: AnalysisStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_model(mut self, update: ModelProgressUpdate) -> Self {
        self.model_progress.push(update);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Poll endpoint response
///
/// A consistent full read of server state for one job. Fields the server
/// leaves out (or sends mistyped) are `None` and leave the stored value alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    /// Overall progress (0.0 - 100.0)
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub overall_progress: Option<f64>,
    /// Complete per-model table
    #[serde(default, deserialize_with = "crate::events::lenient_models")]
    pub model_progress: Option<Vec<ModelProgressUpdate>>,
    /// Current pipeline stage
    #[serde(default, deserialize_with = "crate::events::lenient")]
    pub current_stage: Option<AnalysisStage>,
    /// Job status (absent on older servers)
    #[serde(default, deserialize_with = "crate::events::lenient")]
    pub status: Option<JobStatus>,
    /// Job-level error message
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub error: Option<String>,
    /// When processing started
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub processing_start_time: Option<DateTime<Utc>>,
    /// When the server last touched the job
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Convert a wire percentage into the 0-100 integer range
///
/// Non-finite values map to 0.
pub fn clamp_percent(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}
