//! Device Agent Shared Protocol Types
//!
//! This crate provides the action protocol types, the framing codec and the
//! OTA progress tracker shared by the device agent and its test harnesses.

pub mod codec;
pub mod progress;

use serde::{Deserialize, Deserializer, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub use progress::{OtaEventKind, OtaPhase, ProgressStep, ProgressTracker};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Fixed limits of the agent
pub mod limits {
    /// Number of action handler slots in the registry
    pub const MAX_ACTIONS: usize = 10;

    /// Progress is reported once per this many percentage points
    pub const PROGRESS_STEP: i32 = 5;

    /// Throttle cursor value before anything has been reported
    pub const PROGRESS_UNREPORTED: i32 = -5;

    /// Marker carried in the `error` field of non-failed status messages
    pub const SUCCESS_MARKER: &str = "Success";
}

/// Topic layout used by the cloud platform
pub mod topics {
    fn device_prefix(project_id: &str, device_id: &str) -> String {
        format!("/tenants/{}/devices/{}", project_id, device_id)
    }

    /// Topic the device subscribes to for incoming actions
    pub fn actions(project_id: &str, device_id: &str) -> String {
        format!("{}/actions", device_prefix(project_id, device_id))
    }

    /// Topic action status messages are published on
    pub fn action_status(project_id: &str, device_id: &str) -> String {
        format!("{}/action_status", device_prefix(project_id, device_id))
    }

    /// Topic for an arbitrary data stream
    pub fn stream(project_id: &str, device_id: &str, stream: &str) -> String {
        format!(
            "{}/events/{}/jsonarray",
            device_prefix(project_id, device_id),
            stream
        )
    }
}

/// A parsed action request received from the cloud
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEnvelope {
    #[serde(rename = "id", alias = "action_id")]
    pub action_id: String,
    pub name: String,
    /// Opaque handler argument. JSON strings are kept verbatim, any other
    /// JSON value is kept as its JSON text.
    #[serde(default, deserialize_with = "opaque_payload")]
    pub payload: String,
}

fn opaque_payload<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl ActionEnvelope {
    /// Create a new envelope
    pub fn new(
        action_id: impl Into<String>,
        name: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            action_id: action_id.into(),
            name: name.into(),
            payload: payload.into(),
        }
    }

    /// Parse an envelope from a raw message payload
    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Lifecycle state carried in a status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionState {
    Progress,
    Completed,
    Failed,
}

/// Status report for an action, published on the action status topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub action_id: String,
    pub status: ActionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    pub error: String,
    pub sequence: u64,
    pub timestamp: u64,
}

impl StatusMessage {
    /// Create a progress report
    pub fn progress(action_id: impl Into<String>, percent: u8, sequence: u64) -> Self {
        Self {
            action_id: action_id.into(),
            status: ActionState::Progress,
            progress: Some(percent.min(100)),
            error: limits::SUCCESS_MARKER.into(),
            sequence,
            timestamp: now_ms(),
        }
    }

    /// Create a completion report
    pub fn completed(action_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            action_id: action_id.into(),
            status: ActionState::Completed,
            progress: Some(100),
            error: limits::SUCCESS_MARKER.into(),
            sequence,
            timestamp: now_ms(),
        }
    }

    /// Create a failure report
    pub fn failed(action_id: impl Into<String>, reason: impl Into<String>, sequence: u64) -> Self {
        Self {
            action_id: action_id.into(),
            status: ActionState::Failed,
            progress: None,
            error: reason.into(),
            sequence,
            timestamp: now_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_layout() {
        assert_eq!(topics::actions("p1", "7"), "/tenants/p1/devices/7/actions");
        assert_eq!(
            topics::action_status("p1", "7"),
            "/tenants/p1/devices/7/action_status"
        );
        assert_eq!(
            topics::stream("p1", "7", "device_status"),
            "/tenants/p1/devices/7/events/device_status/jsonarray"
        );
    }

    #[test]
    fn test_envelope_string_payload() {
        let raw = br#"{"id":"42","name":"update_firmware","payload":"{\"url\":\"http://x\"}"}"#;
        let env = ActionEnvelope::from_json(raw).unwrap();
        assert_eq!(env.action_id, "42");
        assert_eq!(env.name, "update_firmware");
        assert_eq!(env.payload, r#"{"url":"http://x"}"#);
    }

    #[test]
    fn test_envelope_object_payload_and_alias() {
        let raw = br#"{"action_id":"9","name":"toggle","payload":{"on":true}}"#;
        let env = ActionEnvelope::from_json(raw).unwrap();
        assert_eq!(env.action_id, "9");
        assert_eq!(env.payload, r#"{"on":true}"#);
    }

    #[test]
    fn test_envelope_missing_payload() {
        let env = ActionEnvelope::from_json(br#"{"id":"1","name":"reboot"}"#).unwrap();
        assert!(env.payload.is_empty());
    }

    #[test]
    fn test_status_message_shapes() {
        let failed = serde_json::to_value(StatusMessage::failed("5", "ActionNotFound", 3)).unwrap();
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["error"], "ActionNotFound");
        assert!(failed.get("progress").is_none());

        let done = serde_json::to_value(StatusMessage::completed("5", 4)).unwrap();
        assert_eq!(done["status"], "completed");
        assert_eq!(done["progress"], 100);
        assert_eq!(done["error"], limits::SUCCESS_MARKER);

        let progress = StatusMessage::progress("5", 130, 5);
        assert_eq!(progress.progress, Some(100));
    }
}
