//! The "update pending verification" record written before an OTA restart

use super::store::RecordStore;
use crate::error::AgentError;
use tracing::warn;

/// Namespace the OTA record lives under
pub const RECORD_NAMESPACE: &str = "agent_ota";

pub const KEY_UPDATE_PENDING: &str = "update_pending";
pub const KEY_PENDING_ACTION_ID: &str = "pending_action_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRecord {
    pub update_pending: bool,
    pub action_id: i64,
}

impl UpdateRecord {
    pub fn pending(action_id: i64) -> Self {
        Self {
            update_pending: true,
            action_id,
        }
    }

    /// Read the record. `Ok(None)` means nothing was ever written, which is
    /// the normal case on first boot.
    ///
    /// A pending flag without an action id is corrupt; it is cleared and
    /// reported as no record.
    pub fn load(store: &dyn RecordStore) -> Result<Option<Self>, AgentError> {
        let pending = store
            .get(KEY_UPDATE_PENDING)
            .map_err(|e| AgentError::PersistFailure(e.to_string()))?;

        let Some(pending) = pending else {
            return Ok(None);
        };

        let action_id = store
            .get(KEY_PENDING_ACTION_ID)
            .map_err(|e| AgentError::PersistFailure(e.to_string()))?;

        match action_id {
            Some(action_id) => Ok(Some(Self {
                update_pending: pending != 0,
                action_id,
            })),
            None if pending != 0 => {
                warn!("Pending update record has no action id, discarding it");
                Self::clear(store)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Write the record and commit it durably
    pub fn save(&self, store: &dyn RecordStore) -> Result<(), AgentError> {
        store
            .set(KEY_PENDING_ACTION_ID, self.action_id)
            .and_then(|_| store.set(KEY_UPDATE_PENDING, i64::from(self.update_pending)))
            .and_then(|_| store.commit())
            .map_err(|e| AgentError::PersistFailure(e.to_string()))
    }

    /// Mark the record consumed and commit
    pub fn clear(store: &dyn RecordStore) -> Result<(), AgentError> {
        store
            .set(KEY_UPDATE_PENDING, 0)
            .and_then(|_| store.commit())
            .map_err(|e| AgentError::PersistFailure(e.to_string()))
    }
}
