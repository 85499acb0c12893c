//! Simulated analysis jobs
//!
//! Each job advances by a fixed step per tick. Models progress at slightly
//! different rates so the per-model table is not a copy of the overall
//! figure; overall progress is the model mean.

use chrono::{DateTime, Utc};
use lms_common::events::{
    clamp_percent, AnalysisStage, JobStatus, ModelProgressUpdate, PollSnapshot, ProgressEvent,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimModel {
    pub model_id: String,
    pub progress: f64,
    /// Relative speed; 1.0 is the configured step
    pub rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimJob {
    pub job_id: String,
    pub content_id: String,
    pub status: JobStatus,
    pub models: Vec<SimModel>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SimJob {
    pub fn new(job_id: impl Into<String>, content_id: impl Into<String>, models: &[String]) -> Self {
        let now = Utc::now();
        let models = models
            .iter()
            .enumerate()
            .map(|(index, model_id)| SimModel {
                model_id: model_id.clone(),
                progress: 0.0,
                rate: 1.0 + index as f64 * 0.25,
            })
            .collect();
        Self {
            job_id: job_id.into(),
            content_id: content_id.into(),
            status: JobStatus::Pending,
            models,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Overall progress (mean of models, 0-100)
    pub fn progress(&self) -> f64 {
        if self.models.is_empty() {
            return if self.status == JobStatus::Completed { 100.0 } else { 0.0 };
        }
        self.models.iter().map(|m| m.progress).sum::<f64>() / self.models.len() as f64
    }

    pub fn stage(&self) -> AnalysisStage {
        AnalysisStage::for_progress(clamp_percent(self.progress()))
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Advance one tick; returns the push event, or None once terminal
    pub fn advance(&mut self, step: f64) -> Option<ProgressEvent> {
        if self.is_terminal() {
            return None;
        }

        for model in &mut self.models {
            model.progress = (model.progress + step * model.rate).min(100.0);
        }
        self.status = if self.models.is_empty() || self.progress() >= 100.0 {
            JobStatus::Completed
        } else {
            JobStatus::Processing
        };
        self.updated_at = Utc::now();
        Some(self.progress_event())
    }

    /// Mark failed; returns the push event, or None if already terminal
    pub fn fail(&mut self, message: impl Into<String>) -> Option<ProgressEvent> {
        if self.is_terminal() {
            return None;
        }
        let message = message.into();
        self.status = JobStatus::Error;
        self.error = Some(message.clone());
        self.updated_at = Utc::now();
        Some(self.progress_event().with_message(format!("Analysis failed: {}", message)))
    }

    pub fn progress_event(&self) -> ProgressEvent {
        let mut event = ProgressEvent::new(self.job_id.clone())
            .with_progress(self.progress())
            .with_status(self.status)
            .with_stage(self.stage());
        for model in &self.models {
            event = event.with_model(
                ModelProgressUpdate::new(model.model_id.clone())
                    .with_progress(model.progress)
                    .with_stage(AnalysisStage::for_progress(clamp_percent(model.progress))),
            );
        }
        if let Some(error) = &self.error {
            event = event.with_error(error.clone());
        }
        event.timestamp = Some(self.updated_at);
        event
    }

    pub fn snapshot(&self) -> PollSnapshot {
        PollSnapshot {
            overall_progress: Some(self.progress()),
            model_progress: Some(
                self.models
                    .iter()
                    .map(|model| {
                        ModelProgressUpdate::new(model.model_id.clone()).with_progress(model.progress)
                    })
                    .collect(),
            ),
            current_stage: Some(self.stage()),
            status: Some(self.status),
            error: self.error.clone(),
            processing_start_time: Some(self.started_at),
            last_updated: Some(self.updated_at),
        }
    }
}
