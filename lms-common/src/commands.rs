//! Frame envelope and client-to-server commands
//!
//! Every message on the live channel is a JSON text frame of the form
//! `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Raw JSON frame as it travels over the socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event or command name
    pub event: String,
    /// Payload (may be absent on the wire)
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode as a text frame
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Commands the client sends to the server
///
/// Serializes directly into the frame envelope, e.g.
/// `{"event":"track_progress","data":{"jobId":"J1","contentId":"C1"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundCommand {
    /// Start receiving `progress` pushes for a job
    #[serde(rename_all = "camelCase")]
    TrackProgress { job_id: String, content_id: String },

    /// Stop receiving `progress` pushes for a job
    #[serde(rename_all = "camelCase")]
    StopTracking { job_id: String },

    /// Ask the server to push an `analytics_update`
    RequestAnalytics { filters: serde_json::Value },
}

impl OutboundCommand {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            OutboundCommand::TrackProgress { .. } => "track_progress",
            OutboundCommand::StopTracking { .. } => "stop_tracking",
            OutboundCommand::RequestAnalytics { .. } => "request_analytics",
        }
    }

    /// Encode as a text frame
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a text frame (used by the simulation server)
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_track_progress_wire_format() {
        let command = OutboundCommand::TrackProgress {
            job_id: "J1".to_string(),
            content_id: "C1".to_string(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&command.to_text().expect("encode should succeed"))
                .expect("output should be JSON");

        assert_eq!(
            value,
            json!({"event": "track_progress", "data": {"jobId": "J1", "contentId": "C1"}})
        );
        assert_eq!(command.name(), "track_progress");
    }

    #[test]
    fn test_command_parses_as_frame() {
        let command = OutboundCommand::StopTracking {
            job_id: "J1".to_string(),
        };
        let frame = Frame::parse(&command.to_text().expect("encode should succeed"))
            .expect("commands share the frame envelope");
        assert_eq!(frame.event, "stop_tracking");
        assert_eq!(frame.data["jobId"], "J1");
    }

    #[test]
    fn test_frame_without_data_defaults_to_null() {
        let frame = Frame::parse(r#"{"event": "ping"}"#).expect("data is optional");
        assert_eq!(frame.event, "ping");
        assert!(frame.data.is_null());
    }

    #[test]
    fn test_parse_rejects_unknown_command() {
        assert!(OutboundCommand::parse(r#"{"event": "drop_tables", "data": {}}"#).is_err());
    }
}
