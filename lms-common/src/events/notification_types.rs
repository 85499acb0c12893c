//! Notification type definitions
//!
//! Supporting types for push `notification` and `significant_change` events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// Severity attached to `significant_change` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(Error::InvalidInput(format!("unknown severity: {}", other))),
        }
    }
}

/// Notification priority
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" | "normal" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" | "critical" => Ok(Priority::Urgent),
            other => Err(Error::InvalidInput(format!("unknown priority: {}", other))),
        }
    }
}

impl From<Severity> for Priority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => Priority::Low,
            Severity::Medium => Priority::Medium,
            Severity::High => Priority::High,
            Severity::Critical => Priority::Urgent,
        }
    }
}

/// Notification category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
    /// AI analysis job lifecycle
    Analysis,
    /// Assignment deadlines and submissions
    Assignment,
    /// Course content changes
    Course,
    /// Platform announcements
    System,
}

impl FromStr for NotificationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(NotificationKind::Info),
            "success" => Ok(NotificationKind::Success),
            "warning" => Ok(NotificationKind::Warning),
            "error" => Ok(NotificationKind::Error),
            "analysis" => Ok(NotificationKind::Analysis),
            "assignment" => Ok(NotificationKind::Assignment),
            "course" => Ok(NotificationKind::Course),
            "system" => Ok(NotificationKind::System),
            other => Err(Error::InvalidInput(format!("unknown notification kind: {}", other))),
        }
    }
}

/// Push `notification` event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: String,
    #[serde(default, deserialize_with = "crate::events::lenient_or_default")]
    pub title: String,
    #[serde(default, deserialize_with = "crate::events::lenient_or_default")]
    pub message: String,
    #[serde(default, rename = "type", alias = "kind", deserialize_with = "crate::events::lenient")]
    pub kind: Option<NotificationKind>,
    #[serde(default, deserialize_with = "crate::events::lenient")]
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "crate::events::lenient_or_default")]
    pub is_read: bool,
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, alias = "userId", deserialize_with = "crate::events::lenient_value")]
    pub owner_user_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Push `significant_change` event payload
///
/// Emitted when an analytics metric moves past a server-side threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignificantChange {
    #[serde(default, deserialize_with = "crate::events::lenient")]
    pub severity: Option<Severity>,
    #[serde(default, deserialize_with = "crate::events::lenient_or_default")]
    pub message: String,
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub metric: Option<String>,
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub job_id: Option<String>,
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub content_id: Option<String>,
    #[serde(default, deserialize_with = "crate::events::lenient_value")]
    pub change_percent: Option<f64>,
}

impl SignificantChange {
    /// Severity, treating a missing or unknown value as low
    pub fn severity(&self) -> Severity {
        self.severity.unwrap_or(Severity::Low)
    }
}
