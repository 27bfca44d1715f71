//! Firmware update action handler

use super::{ActionContext, ActionHandler, ActionResult};
use crate::error::AgentError;
use crate::ota::{CancelFlag, OtaEvent, OtaJob, OtaManager};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const OTA_ACTION: &str = "update_firmware";

#[derive(Debug, Deserialize)]
struct OtaRequest {
    url: String,
    #[serde(default)]
    version: Option<String>,
}

/// Build a job from the action id and payload.
///
/// The payload is either `{"url": ..., "version": ...}` or a bare URL. The
/// action id must be an integer since it is persisted as one.
fn parse_job(payload: &str, action_id: &str) -> Result<OtaJob, AgentError> {
    let action_id = action_id.trim().parse::<i64>().map_err(|_| {
        AgentError::InvalidPayload(format!("action id {:?} is not an integer", action_id))
    })?;

    let trimmed = payload.trim();
    let request = if trimmed.starts_with('{') {
        serde_json::from_str::<OtaRequest>(trimmed)
            .map_err(|e| AgentError::InvalidPayload(e.to_string()))?
    } else {
        OtaRequest {
            url: trimmed.to_string(),
            version: None,
        }
    };

    if request.url.is_empty() {
        return Err(AgentError::InvalidPayload("missing firmware url".into()));
    }

    Ok(OtaJob {
        action_id,
        url: request.url,
        version: request.version,
    })
}

/// Starts an update and leaves the terminal status to the OTA task
pub struct OtaHandler {
    manager: Arc<OtaManager>,
    events: mpsc::Sender<OtaEvent>,
    cancel: CancelFlag,
}

impl OtaHandler {
    pub fn new(manager: Arc<OtaManager>, events: mpsc::Sender<OtaEvent>, cancel: CancelFlag) -> Self {
        Self {
            manager,
            events,
            cancel,
        }
    }
}

#[async_trait]
impl ActionHandler for OtaHandler {
    async fn handle(&self, _ctx: &ActionContext, payload: &str, action_id: &str) -> ActionResult {
        let job = match parse_job(payload, action_id) {
            Ok(job) => job,
            Err(e) => {
                warn!("Rejecting OTA request {}: {}", action_id, e);
                return ActionResult::Failed { message: e.reason() };
            }
        };

        info!("Starting OTA {} from {}", job.action_id, job.url);
        match self
            .manager
            .start(job, self.events.clone(), self.cancel.clone())
        {
            Ok(_) => ActionResult::Pending,
            Err(e) => ActionResult::Failed { message: e.reason() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::handlers::tests::context;
    use crate::test_support::{MemoryRecordStore, MemorySlot, ScriptedSource};

    #[test]
    fn test_parse_json_payload() {
        let job = parse_job(
            r#"{"url":"https://fw.local/app.bin","version":"2.0.1"}"#,
            "17",
        )
        .unwrap();
        assert_eq!(job.action_id, 17);
        assert_eq!(job.url, "https://fw.local/app.bin");
        assert_eq!(job.version.as_deref(), Some("2.0.1"));
    }

    #[test]
    fn test_parse_bare_url() {
        let job = parse_job(" https://fw.local/app.bin\n", "3").unwrap();
        assert_eq!(job.url, "https://fw.local/app.bin");
        assert_eq!(job.version, None);
    }

    #[test]
    fn test_parse_rejects_bad_requests() {
        assert!(matches!(
            parse_job("https://fw.local/app.bin", "abc"),
            Err(AgentError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_job("", "3"),
            Err(AgentError::InvalidPayload(_))
        ));
        assert!(matches!(
            parse_job(r#"{"version":"1"}"#, "3"),
            Err(AgentError::InvalidPayload(_))
        ));
    }

    fn handler(image: Vec<u8>) -> (OtaHandler, mpsc::Receiver<OtaEvent>) {
        let manager = Arc::new(OtaManager::new(
            Arc::new(ScriptedSource::new(image, 64)),
            Arc::new(MemorySlot::default()),
            Arc::new(MemoryRecordStore::new()),
        ));
        let (tx, rx) = mpsc::channel(64);
        (OtaHandler::new(manager, tx, CancelFlag::new()), rx)
    }

    #[tokio::test]
    async fn test_accepted_request_is_pending() {
        let (handler, mut rx) = handler(vec![0; 256]);
        let (_, ctx) = context();

        let result = handler.handle(&ctx, "https://fw.local/app.bin", "12").await;
        assert_eq!(result, ActionResult::Pending);

        let mut last = None;
        while let Some(event) = rx.recv().await {
            let done = matches!(event, OtaEvent::RestartRequested { .. });
            last = Some(event);
            if done {
                break;
            }
        }
        assert_eq!(
            last,
            Some(OtaEvent::RestartRequested {
                action_id: "12".into()
            })
        );
    }

    #[tokio::test]
    async fn test_non_integer_id_fails_before_probing() {
        let (handler, mut rx) = handler(vec![0; 256]);
        let (_, ctx) = context();

        let result = handler.handle(&ctx, "https://fw.local/app.bin", "v2").await;
        assert!(matches!(result, ActionResult::Failed { message } if message.starts_with("InvalidPayload")));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_second_request_while_busy_fails() {
        let (handler, _rx) = handler(vec![0; 256]);
        let (_, ctx) = context();

        assert_eq!(
            handler.handle(&ctx, "https://fw.local/a.bin", "1").await,
            ActionResult::Pending
        );
        assert_eq!(
            handler.handle(&ctx, "https://fw.local/b.bin", "2").await,
            ActionResult::Failed {
                message: "OtaInProgress".into()
            }
        );
    }
}
