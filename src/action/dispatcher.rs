//! Action dispatcher - routes incoming envelopes to registered handlers

use super::handlers::{ActionContext, ActionResult};
use super::registry::ActionRegistry;
use crate::error::AgentError;
use device_agent_shared::limits::MAX_ACTIONS;
use device_agent_shared::ActionEnvelope;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

/// What happened to a dispatched envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler succeeded and "completed" was published
    Completed,
    /// Handler failed or panicked and "failed" was published
    Failed { reason: String },
    /// Handler reports its own terminal status later
    Deferred,
    /// No handler registered under the envelope's name
    NotFound,
}

/// Looks up and runs handlers, publishing their terminal status
pub struct ActionDispatcher<const N: usize = MAX_ACTIONS> {
    registry: ActionRegistry<N>,
    ctx: ActionContext,
}

impl<const N: usize> ActionDispatcher<N> {
    pub fn new(ctx: ActionContext) -> Self {
        Self {
            registry: ActionRegistry::new(),
            ctx,
        }
    }

    pub fn registry(&self) -> &ActionRegistry<N> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ActionRegistry<N> {
        &mut self.registry
    }

    /// Run the handler registered for `envelope.name`.
    ///
    /// Publish failures are logged and never stop dispatch.
    pub async fn dispatch(&self, envelope: &ActionEnvelope) -> DispatchOutcome {
        let publisher = &self.ctx.publisher;
        debug!(
            "Dispatching action: id={} name={}",
            envelope.action_id, envelope.name
        );

        let handler = match self.registry.find(&envelope.name) {
            Ok(handler) => handler,
            Err(e) => {
                warn!("No handler for action {}", envelope.name);
                report(publisher.publish_failed(&envelope.action_id, &e.reason()).await);
                return DispatchOutcome::NotFound;
            }
        };

        let result = AssertUnwindSafe(handler.handle(
            &self.ctx,
            &envelope.payload,
            &envelope.action_id,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let err = AgentError::from_panic(panic.as_ref());
            error!("Handler for {} panicked: {}", envelope.name, err);
            ActionResult::Failed {
                message: err.reason(),
            }
        });

        match result {
            ActionResult::Completed => {
                info!("Action {} ({}) completed", envelope.action_id, envelope.name);
                report(publisher.publish_completed(&envelope.action_id).await);
                DispatchOutcome::Completed
            }
            ActionResult::Failed { message } => {
                warn!(
                    "Action {} ({}) failed: {}",
                    envelope.action_id, envelope.name, message
                );
                report(publisher.publish_failed(&envelope.action_id, &message).await);
                DispatchOutcome::Failed { reason: message }
            }
            ActionResult::Pending => {
                debug!("Action {} deferred", envelope.action_id);
                DispatchOutcome::Deferred
            }
        }
    }
}

fn report(result: Result<(), AgentError>) {
    if let Err(e) = result {
        warn!("Status not published: {}", e);
    }
}
