//! Action status publisher

use crate::config::DeviceConfig;
use crate::error::AgentError;
use crate::transport::traits::MessageChannel;
use device_agent_shared::{now_ms, topics, StatusMessage};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Formats status messages and hands them to the messaging channel.
///
/// Every publish is a single best-effort attempt; a failure is returned as
/// `PublishFailure` and never retried here.
#[derive(Clone)]
pub struct StatusPublisher {
    channel: Arc<dyn MessageChannel>,
    project_id: String,
    device_id: String,
    status_topic: String,
    sequence: Arc<AtomicU64>,
}

impl StatusPublisher {
    pub fn new(channel: Arc<dyn MessageChannel>, device: &DeviceConfig) -> Self {
        Self {
            channel,
            project_id: device.project_id.clone(),
            device_id: device.device_id.clone(),
            status_topic: topics::action_status(&device.project_id, &device.device_id),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub async fn publish_progress(&self, action_id: &str, percent: u8) -> Result<(), AgentError> {
        let msg = StatusMessage::progress(action_id, percent, self.next_sequence());
        self.send_status(msg).await
    }

    pub async fn publish_completed(&self, action_id: &str) -> Result<(), AgentError> {
        let msg = StatusMessage::completed(action_id, self.next_sequence());
        self.send_status(msg).await
    }

    pub async fn publish_failed(&self, action_id: &str, reason: &str) -> Result<(), AgentError> {
        let msg = StatusMessage::failed(action_id, reason, self.next_sequence());
        self.send_status(msg).await
    }

    /// Publish one record to a named data stream.
    ///
    /// Object records get `sequence` and `timestamp` fields added; the record
    /// is sent as a single-element JSON array.
    pub async fn publish_to_stream(&self, stream: &str, record: Value) -> Result<(), AgentError> {
        let record = match record {
            Value::Object(mut fields) => {
                fields.insert("sequence".into(), self.next_sequence().into());
                fields.insert("timestamp".into(), now_ms().into());
                Value::Object(fields)
            }
            other => other,
        };
        let payload = Value::Array(vec![record]).to_string();
        let topic = topics::stream(&self.project_id, &self.device_id, stream);

        self.channel
            .publish(&topic, payload)
            .await
            .map_err(|e| AgentError::PublishFailure(e.to_string()))
    }

    async fn send_status(&self, msg: StatusMessage) -> Result<(), AgentError> {
        let payload = serde_json::to_string(&msg)
            .map_err(|e| AgentError::PublishFailure(e.to_string()))?;

        debug!(
            "Status {:?} for action {} (seq {})",
            msg.status, msg.action_id, msg.sequence
        );

        self.channel
            .publish(&self.status_topic, payload)
            .await
            .map_err(|e| AgentError::PublishFailure(e.to_string()))
    }
}
