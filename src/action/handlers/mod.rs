//! Action handlers and the context they run in

mod ota;
mod status;

pub use ota::{OtaHandler, OTA_ACTION};
pub use status::{StatusHandler, STATUS_ACTION, STATUS_STREAM};

use crate::config::DeviceConfig;
use crate::status::StatusPublisher;
use async_trait::async_trait;
use std::sync::Arc;

/// Context passed to action handlers
#[derive(Clone)]
pub struct ActionContext {
    pub device: Arc<DeviceConfig>,
    pub publisher: StatusPublisher,
}

/// Result of running a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    /// Action finished successfully
    Completed,
    /// Action failed; `message` is reported as the failure reason
    Failed { message: String },
    /// The handler reports its own terminal status later
    Pending,
}

/// Capability invoked for a named action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: &ActionContext, payload: &str, action_id: &str) -> ActionResult;
}

/// Handler backed by a plain function
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> ActionHandler for FnHandler<F>
where
    F: Fn(&ActionContext, &str, &str) -> ActionResult + Send + Sync,
{
    async fn handle(&self, ctx: &ActionContext, payload: &str, action_id: &str) -> ActionResult {
        (self.f)(ctx, payload, action_id)
    }
}

/// Wrap a synchronous function as an action handler
pub fn handler_fn<F>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(&ActionContext, &str, &str) -> ActionResult + Send + Sync + 'static,
{
    Arc::new(FnHandler { f })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_support::RecordingChannel;

    pub(crate) fn context() -> (Arc<RecordingChannel>, ActionContext) {
        let channel = Arc::new(RecordingChannel::new());
        let device = DeviceConfig::default();
        let publisher = StatusPublisher::new(channel.clone(), &device);
        (
            channel,
            ActionContext {
                device: Arc::new(device),
                publisher,
            },
        )
    }

    #[tokio::test]
    async fn test_fn_handler_receives_arguments() {
        let (_, ctx) = context();
        let handler = handler_fn(|ctx, payload, action_id| {
            if payload == "on" && action_id == "9" && ctx.device.device_id == "1" {
                ActionResult::Completed
            } else {
                ActionResult::Failed {
                    message: "unexpected arguments".into(),
                }
            }
        });

        assert_eq!(handler.handle(&ctx, "on", "9").await, ActionResult::Completed);
    }
}
