//! Firmware download into the update slot

use super::{CancelFlag, OtaEvent};
use crate::error::AgentError;
use crate::persist::{RecordStore, UpdateRecord};
use crate::transport::traits::{FirmwareSlot, FirmwareSource};
use device_agent_shared::{OtaEventKind, OtaPhase, ProgressTracker};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// One requested update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaJob {
    pub action_id: i64,
    pub url: String,
    pub version: Option<String>,
}

/// Runs OTA updates, one at a time.
///
/// The manager owns the update's [`OtaPhase`]. A new update is only accepted
/// from `Idle` or a terminal phase, so the phase doubles as the in-progress
/// guard.
pub struct OtaManager {
    source: Arc<dyn FirmwareSource>,
    slot: Arc<dyn FirmwareSlot>,
    pub(super) store: Arc<dyn RecordStore>,
    phase: Mutex<OtaPhase>,
}

impl OtaManager {
    pub fn new(
        source: Arc<dyn FirmwareSource>,
        slot: Arc<dyn FirmwareSlot>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            source,
            slot,
            store,
            phase: Mutex::new(OtaPhase::Idle),
        }
    }

    fn lock_phase(&self) -> MutexGuard<'_, OtaPhase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn phase(&self) -> OtaPhase {
        *self.lock_phase()
    }

    /// Whether an update has been accepted and not yet finished
    pub fn is_busy(&self) -> bool {
        let phase = self.phase();
        phase != OtaPhase::Idle && !phase.is_terminal()
    }

    /// Apply `event` to the phase; `None` when the event is not valid now
    pub(super) fn advance(&self, event: OtaEventKind) -> Option<OtaPhase> {
        let mut phase = self.lock_phase();
        let next = phase.next(event)?;
        debug!("OTA phase {:?} -> {:?}", *phase, next);
        *phase = next;
        Some(next)
    }

    /// Spawn the update on its own task.
    ///
    /// Fails with `OtaInProgress` while another update is running. An error
    /// or panic in the task moves the phase to `Failed` and is reported as
    /// `OtaEvent::Failed`; a successful run stays in `Restarting`.
    pub fn start(
        self: &Arc<Self>,
        job: OtaJob,
        events: mpsc::Sender<OtaEvent>,
        cancel: CancelFlag,
    ) -> Result<JoinHandle<()>, AgentError> {
        self.advance(OtaEventKind::Accepted)
            .ok_or(AgentError::OtaInProgress)?;

        let manager = self.clone();
        Ok(tokio::spawn(async move {
            let result = AssertUnwindSafe(manager.run(&job, &events, &cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(AgentError::from_panic(panic.as_ref())));

            if let Err(e) = result {
                error!("OTA {} aborted: {}", job.action_id, e);
                manager.advance(OtaEventKind::Error);
                let _ = events
                    .send(OtaEvent::Failed {
                        action_id: job.action_id.to_string(),
                        reason: e.reason(),
                    })
                    .await;
            }
        }))
    }

    /// Probe, download, commit the image, persist the pending record and ask
    /// for a restart. The persisted record is only written once the image is
    /// committed.
    async fn run(
        &self,
        job: &OtaJob,
        events: &mpsc::Sender<OtaEvent>,
        cancel: &CancelFlag,
    ) -> Result<(), AgentError> {
        let action_id = job.action_id.to_string();
        info!(
            "OTA {}: fetching {} (version {})",
            action_id,
            job.url,
            job.version.as_deref().unwrap_or("unspecified")
        );

        let total = self
            .source
            .probe(&job.url)
            .await
            .map_err(|e| AgentError::ProbeFailure(e.to_string()))?;
        if total == 0 {
            return Err(AgentError::ProbeFailure("image size is zero".into()));
        }
        info!("OTA {}: image is {} bytes", action_id, total);
        self.advance(OtaEventKind::SizeKnown);

        let mut writer = self
            .slot
            .begin(total)
            .await
            .map_err(|e| AgentError::DownloadFailure(e.to_string()))?;
        let mut stream = self
            .source
            .open(&job.url)
            .await
            .map_err(|e| AgentError::DownloadFailure(e.to_string()))?;

        let mut tracker = ProgressTracker::new(action_id.clone(), total);
        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::DownloadFailure("cancelled".into()));
            }

            let chunk = stream
                .next_chunk()
                .await
                .map_err(|e| AgentError::DownloadFailure(e.to_string()))?;
            let Some(chunk) = chunk else { break };

            if tracker.downloaded_bytes() + chunk.len() as u64 > total {
                return Err(AgentError::DownloadFailure(format!(
                    "image exceeds advertised size of {} bytes",
                    total
                )));
            }

            writer
                .write(&chunk)
                .await
                .map_err(|e| AgentError::DownloadFailure(e.to_string()))?;

            for step in tracker.record_chunk(chunk.len()) {
                let _ = events
                    .send(OtaEvent::Progress {
                        action_id: action_id.clone(),
                        step,
                    })
                    .await;
            }
        }

        if !tracker.is_complete() {
            return Err(AgentError::DownloadFailure(format!(
                "stream ended after {} of {} bytes",
                tracker.downloaded_bytes(),
                total
            )));
        }

        writer
            .commit()
            .await
            .map_err(|e| AgentError::DownloadFailure(e.to_string()))?;
        self.advance(OtaEventKind::ImageCommitted);

        UpdateRecord::pending(job.action_id).save(self.store.as_ref())?;
        info!("OTA {}: update record persisted", action_id);

        let _ = events.send(OtaEvent::RestartRequested { action_id }).await;
        Ok(())
    }
}
