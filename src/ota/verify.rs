//! Post-boot confirmation of a pending update

use super::OtaManager;
use crate::error::AgentError;
use crate::persist::UpdateRecord;
use crate::status::StatusPublisher;
use device_agent_shared::OtaEventKind;
use tracing::{debug, info, warn};

impl OtaManager {
    /// Report a completed update left behind by the previous boot.
    ///
    /// When the record says an update is pending, the phase moves to
    /// `Verifying`, one "completed" status goes out for its action id and the
    /// record is cleared. The record is cleared even if the publish fails, so
    /// the confirmation is never repeated. Returns the confirmed action id.
    pub async fn verify_pending_update(
        &self,
        publisher: &StatusPublisher,
    ) -> Result<Option<i64>, AgentError> {
        let record = match UpdateRecord::load(self.store.as_ref())? {
            Some(record) if record.update_pending => record,
            _ => {
                debug!("No pending update to confirm");
                return Ok(None);
            }
        };

        self.advance(OtaEventKind::Booted);
        info!("Confirming update for action {}", record.action_id);

        if let Err(e) = publisher
            .publish_completed(&record.action_id.to_string())
            .await
        {
            warn!(
                "Update confirmation for action {} not published: {}",
                record.action_id, e
            );
        }

        if let Err(e) = UpdateRecord::clear(self.store.as_ref()) {
            self.advance(OtaEventKind::Error);
            return Err(e);
        }
        self.advance(OtaEventKind::Confirmed);

        Ok(Some(record.action_id))
    }
}
