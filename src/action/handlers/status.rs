//! Diagnostic status request handler

use super::{ActionContext, ActionHandler, ActionResult};
use async_trait::async_trait;
use serde_json::json;
use std::time::Instant;
use tracing::info;

pub const STATUS_ACTION: &str = "status_request";

/// Stream the device status record is published to
pub const STATUS_STREAM: &str = "device_status";

/// Publishes a device status record and completes
pub struct StatusHandler {
    started: Instant,
}

impl StatusHandler {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for StatusHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for StatusHandler {
    async fn handle(&self, ctx: &ActionContext, _payload: &str, action_id: &str) -> ActionResult {
        info!("Status requested by action {}", action_id);

        let record = json!({
            "device_id": ctx.device.device_id,
            "action_id": action_id,
            "uptime_ms": self.started.elapsed().as_millis() as u64,
            "firmware_version": env!("CARGO_PKG_VERSION"),
        });

        match ctx.publisher.publish_to_stream(STATUS_STREAM, record).await {
            Ok(()) => ActionResult::Completed,
            Err(e) => ActionResult::Failed { message: e.reason() },
        }
    }
}
