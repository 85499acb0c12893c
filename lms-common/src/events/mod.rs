//! Event types for the LMS live channel
//!
//! Provides the typed push-event enum and the EventBus used to fan events out
//! inside a process.

// Sub-modules (supporting types)
mod notification_types;
mod progress_types;

pub use notification_types::{
    NotificationKind, NotificationPayload, Priority, Severity, SignificantChange,
};
pub use progress_types::{
    clamp_percent, AnalysisStage, JobStatus, ModelProgressUpdate, PollSnapshot, ProgressEvent,
};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use tokio::sync::broadcast;
use tracing::debug;

use crate::commands::Frame;
use crate::{Error, Result};

/// Wire names of push events
pub mod names {
    pub const PROGRESS: &str = "progress";
    pub const ANALYTICS_UPDATE: &str = "analytics_update";
    pub const ENGAGEMENT_UPDATE: &str = "engagement_update";
    pub const SIGNIFICANT_CHANGE: &str = "significant_change";
    pub const NOTIFICATION: &str = "notification";
    pub const AUTH_ERROR: &str = "auth_error";
}

/// Deserialize an optional enum from a string, mapping anything else to `None`
///
/// Servers add stage and status values over time; an unrecognised value, or a
/// value of the wrong JSON type, must not reject the rest of the payload.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(raw.as_str().and_then(|value| value.parse().ok()))
}

/// Deserialize an optional scalar field, mapping a mistyped value to `None`
pub(crate) fn lenient_value<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).ok())
}

/// Like [`lenient_value`] for fields that fall back to their default
pub(crate) fn lenient_or_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient_value(deserializer)?.unwrap_or_default())
}

/// Deserialize a model table, keeping only the entries that decode
///
/// A non-array value yields `None`.
pub(crate) fn lenient_models<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Vec<ModelProgressUpdate>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    let serde_json::Value::Array(entries) = raw else {
        return Ok(None);
    };
    let models = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value(entry) {
            Ok(model) => Some(model),
            Err(e) => {
                debug!("Skipping undecodable model entry: {}", e);
                None
            }
        })
        .collect();
    Ok(Some(models))
}

/// Like [`lenient_models`] for payloads where an absent table means "no deltas"
pub(crate) fn lenient_model_deltas<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<ModelProgressUpdate>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_models(deserializer)?.unwrap_or_default())
}

/// Push events received over the live channel
///
/// Decoded from a [`Frame`] at the connection boundary. Every event name the
/// client does not know becomes [`LiveEvent::Unknown`] instead of an error.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Job progress update (partial)
    Progress(ProgressEvent),

    /// Analytics dashboard data changed (opaque payload)
    AnalyticsUpdate(serde_json::Value),

    /// Student engagement metrics changed (opaque payload)
    EngagementUpdate(serde_json::Value),

    /// A metric crossed a threshold
    SignificantChange(SignificantChange),

    /// User notification
    Notification(NotificationPayload),

    /// Server rejected the credentials on an open connection
    AuthError {
        message: String,
    },

    /// Event name not recognised by this client
    Unknown {
        event: String,
        data: serde_json::Value,
    },
}

impl LiveEvent {
    /// Get event name as used on the wire and by subscriptions
    pub fn event_name(&self) -> &str {
        match self {
            LiveEvent::Progress(_) => names::PROGRESS,
            LiveEvent::AnalyticsUpdate(_) => names::ANALYTICS_UPDATE,
            LiveEvent::EngagementUpdate(_) => names::ENGAGEMENT_UPDATE,
            LiveEvent::SignificantChange(_) => names::SIGNIFICANT_CHANGE,
            LiveEvent::Notification(_) => names::NOTIFICATION,
            LiveEvent::AuthError { .. } => names::AUTH_ERROR,
            LiveEvent::Unknown { event, .. } => event.as_str(),
        }
    }

    /// Job this event refers to, if any
    pub fn job_id(&self) -> Option<&str> {
        match self {
            LiveEvent::Progress(event) => Some(&event.job_id),
            LiveEvent::SignificantChange(change) => change.job_id.as_deref(),
            LiveEvent::Notification(payload) => payload.metadata.get("jobId").and_then(|v| v.as_str()),
            LiveEvent::AnalyticsUpdate(data)
            | LiveEvent::EngagementUpdate(data)
            | LiveEvent::Unknown { data, .. } => data.get("jobId").and_then(|v| v.as_str()),
            LiveEvent::AuthError { .. } => None,
        }
    }

    /// Severity, for events that carry one
    pub fn severity(&self) -> Option<Severity> {
        match self {
            LiveEvent::SignificantChange(change) => Some(change.severity()),
            _ => None,
        }
    }

    /// Decode a frame into a typed event
    ///
    /// Returns `Error::InvalidInput` when a known event carries a payload that
    /// cannot be decoded (e.g. a `progress` frame without `jobId`).
    pub fn from_frame(frame: Frame) -> Result<Self> {
        let Frame { event, data } = frame;
        let decoded = match event.as_str() {
            names::PROGRESS => LiveEvent::Progress(decode_payload(&event, data)?),
            names::ANALYTICS_UPDATE => LiveEvent::AnalyticsUpdate(data),
            names::ENGAGEMENT_UPDATE => LiveEvent::EngagementUpdate(data),
            names::SIGNIFICANT_CHANGE => LiveEvent::SignificantChange(decode_payload(&event, data)?),
            names::NOTIFICATION => LiveEvent::Notification(decode_payload(&event, data)?),
            names::AUTH_ERROR => LiveEvent::AuthError {
                message: data
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or("authentication rejected")
                    .to_string(),
            },
            _ => LiveEvent::Unknown { event, data },
        };
        Ok(decoded)
    }

    /// Encode as a frame (used by the simulation server)
    pub fn to_frame(&self) -> Result<Frame> {
        let data = match self {
            LiveEvent::Progress(event) => serde_json::to_value(event)?,
            LiveEvent::AnalyticsUpdate(data) | LiveEvent::EngagementUpdate(data) => data.clone(),
            LiveEvent::SignificantChange(change) => serde_json::to_value(change)?,
            LiveEvent::Notification(payload) => serde_json::to_value(payload)?,
            LiveEvent::AuthError { message } => serde_json::json!({ "message": message }),
            LiveEvent::Unknown { data, .. } => data.clone(),
        };
        Ok(Frame::new(self.event_name(), data))
    }
}

fn decode_payload<T>(event: &str, data: serde_json::Value) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(data)
        .map_err(|e| Error::InvalidInput(format!("malformed {} payload: {}", event, e)))
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for live events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
///
/// The simulation server publishes job progress here and every open socket
/// forwards the events its client tracks.
///
/// # Examples
///
/// ```
/// use lms_common::events::{EventBus, LiveEvent, ProgressEvent};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(LiveEvent::Progress(ProgressEvent::new("J1").with_progress(10.0)));
///
/// let received = rx.try_recv().expect("event should be buffered");
/// assert_eq!(received.event_name(), "progress");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LiveEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: LiveEvent,
    ) -> std::result::Result<usize, broadcast::error::SendError<LiveEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LiveEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_frame_progress() {
        let frame = Frame::new("progress", json!({"jobId": "J1", "progress": 10}));
        let event = LiveEvent::from_frame(frame).expect("progress frame should decode");

        match &event {
            LiveEvent::Progress(progress) => {
                assert_eq!(progress.job_id, "J1");
                assert_eq!(progress.progress, Some(10.0));
            }
            other => panic!("Wrong event type decoded: {:?}", other),
        }
        assert_eq!(event.event_name(), "progress");
        assert_eq!(event.job_id(), Some("J1"));
    }

    #[test]
    fn test_from_frame_unknown_event_is_preserved() {
        let frame = Frame::new("course_published", json!({"courseId": 12}));
        let event = LiveEvent::from_frame(frame).expect("unknown frames are not errors");

        assert_eq!(event.event_name(), "course_published");
        match event {
            LiveEvent::Unknown { data, .. } => assert_eq!(data["courseId"], 12),
            other => panic!("Expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_from_frame_rejects_progress_without_job_id() {
        let frame = Frame::new("progress", json!({"progress": 10}));
        let err = LiveEvent::from_frame(frame).expect_err("jobId is required");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_significant_change_exposes_severity_and_job() {
        let frame = Frame::new(
            "significant_change",
            json!({"severity": "high", "message": "engagement dropped", "jobId": "J9"}),
        );
        let event = LiveEvent::from_frame(frame).expect("frame should decode");

        assert_eq!(event.severity(), Some(Severity::High));
        assert_eq!(event.job_id(), Some("J9"));
    }

    #[test]
    fn test_auth_error_frame() {
        let frame = Frame::new("auth_error", json!({"message": "token expired"}));
        let event = LiveEvent::from_frame(frame).expect("frame should decode");
        assert_eq!(
            event,
            LiveEvent::AuthError {
                message: "token expired".to_string()
            }
        );
    }

    #[test]
    fn test_to_frame_round_trips_progress() {
        let event = LiveEvent::Progress(
            ProgressEvent::new("J1")
                .with_progress(55.0)
                .with_stage(AnalysisStage::Analysis),
        );
        let frame = event.to_frame().expect("encode should succeed");
        assert_eq!(frame.event, "progress");
        assert_eq!(frame.data["jobId"], "J1");
        assert_eq!(frame.data["stage"], "analysis");

        let decoded = LiveEvent::from_frame(frame).expect("decode should succeed");
        assert_eq!(decoded, event);
    }

    /// Test EventBus::new() creates bus with correct capacity
    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    /// Test EventBus::emit() without subscribers reports an error
    #[test]
    fn test_eventbus_emit_without_subscribers() {
        let bus = EventBus::new(10);
        let result = bus.emit(LiveEvent::AnalyticsUpdate(json!({})));
        assert!(result.is_err(), "emit with no subscribers should fail");
    }

    /// Test multiple subscribers receive same event
    #[test]
    fn test_eventbus_multiple_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let delivered = bus
            .emit(LiveEvent::Progress(ProgressEvent::new("J2")))
            .expect("emit should succeed");
        assert_eq!(delivered, 2);

        assert_eq!(rx1.try_recv().expect("rx1 should receive").job_id(), Some("J2"));
        assert_eq!(rx2.try_recv().expect("rx2 should receive").job_id(), Some("J2"));
    }

    /// Test EventBus::emit_lossy() does not panic on full channel
    #[test]
    fn test_eventbus_emit_lossy_full_channel() {
        let bus = EventBus::new(2);
        let _rx = bus.subscribe();

        for i in 0..10 {
            bus.emit_lossy(LiveEvent::Progress(
                ProgressEvent::new("J3").with_progress(i as f64),
            ));
        }

        assert_eq!(bus.capacity(), 2);
    }
}
