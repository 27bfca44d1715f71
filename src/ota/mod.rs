//! Over-the-air firmware update
//!
//! The download runs on its own task ([`OtaManager::start`]) and reports
//! through an [`OtaEvent`] channel. The agent's main loop drains that channel
//! with an [`OtaReporter`], which does all publishing and the final restart.
//! On shutdown the [`CancelFlag`] stops a running download between chunks and
//! [`OtaReporter::drain_cancelled`] reports how it ended.

mod manager;
mod verify;

pub use manager::{OtaJob, OtaManager};

use crate::status::StatusPublisher;
use crate::transport::traits::Restarter;
use device_agent_shared::ProgressStep;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Bound of the OTA event channel
pub const OTA_EVENT_QUEUE: usize = 32;

/// Events sent from the download task to the main loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtaEvent {
    /// A progress threshold was crossed
    Progress { action_id: String, step: ProgressStep },
    /// The update was aborted
    Failed { action_id: String, reason: String },
    /// Image committed and record persisted; restart now
    RestartRequested { action_id: String },
}

/// Shared flag asking a running download to stop
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Turns OTA events into status messages and the restart
pub struct OtaReporter {
    publisher: StatusPublisher,
    restarter: Arc<dyn Restarter>,
    restart_delay: Duration,
}

impl OtaReporter {
    pub fn new(
        publisher: StatusPublisher,
        restarter: Arc<dyn Restarter>,
        restart_delay: Duration,
    ) -> Self {
        Self {
            publisher,
            restarter,
            restart_delay,
        }
    }

    pub async fn handle(&self, event: OtaEvent) {
        match event {
            OtaEvent::Progress { action_id, step } => {
                let result = match step {
                    ProgressStep::Progress(percent) => {
                        info!("OTA {}: {}%", action_id, percent);
                        self.publisher.publish_progress(&action_id, percent).await
                    }
                    ProgressStep::Completed => {
                        info!("OTA {}: download complete", action_id);
                        self.publisher.publish_completed(&action_id).await
                    }
                };
                if let Err(e) = result {
                    warn!("OTA {}: progress not published: {}", action_id, e);
                }
            }
            OtaEvent::Failed { action_id, reason } => {
                error!("OTA {} failed: {}", action_id, reason);
                if let Err(e) = self.publisher.publish_failed(&action_id, &reason).await {
                    warn!("OTA {}: failure not published: {}", action_id, e);
                }
            }
            OtaEvent::RestartRequested { action_id } => {
                info!(
                    "OTA {}: restarting in {:?}",
                    action_id, self.restart_delay
                );
                tokio::time::sleep(self.restart_delay).await;
                if let Err(e) = self.restarter.restart() {
                    error!("OTA {}: restart failed: {}", action_id, e);
                }
            }
        }
    }

    /// Handle events of a cancelled update until it reports its end.
    ///
    /// Returns `false` if nothing terminal arrived within `limit`.
    pub async fn drain_cancelled(
        &self,
        events: &mut mpsc::Receiver<OtaEvent>,
        limit: Duration,
    ) -> bool {
        let drain = async {
            while let Some(event) = events.recv().await {
                let terminal = matches!(
                    event,
                    OtaEvent::Failed { .. } | OtaEvent::RestartRequested { .. }
                );
                self.handle(event).await;
                if terminal {
                    return true;
                }
            }
            false
        };
        tokio::time::timeout(limit, drain).await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::test_support::{
        CountingRestarter, MemoryRecordStore, MemorySlot, RecordingChannel, ScriptedSource,
    };
    use device_agent_shared::{ActionState, OtaPhase};

    fn reporter() -> (Arc<RecordingChannel>, Arc<CountingRestarter>, OtaReporter) {
        let channel = Arc::new(RecordingChannel::new());
        let restarter = Arc::new(CountingRestarter::default());
        let publisher = StatusPublisher::new(channel.clone(), &DeviceConfig::default());
        let reporter = OtaReporter::new(publisher, restarter.clone(), Duration::ZERO);
        (channel, restarter, reporter)
    }

    #[tokio::test]
    async fn test_completion_step_is_completed_status() {
        let (channel, _, reporter) = reporter();
        reporter
            .handle(OtaEvent::Progress {
                action_id: "3".into(),
                step: ProgressStep::Progress(95),
            })
            .await;
        reporter
            .handle(OtaEvent::Progress {
                action_id: "3".into(),
                step: ProgressStep::Completed,
            })
            .await;

        let statuses = channel.statuses();
        assert_eq!(statuses[0].status, ActionState::Progress);
        assert_eq!(statuses[0].progress, Some(95));
        assert_eq!(statuses[1].status, ActionState::Completed);
        assert_eq!(statuses[1].progress, Some(100));
    }

    #[tokio::test]
    async fn test_restart_request_restarts() {
        let (channel, restarter, reporter) = reporter();
        reporter
            .handle(OtaEvent::RestartRequested {
                action_id: "3".into(),
            })
            .await;

        assert_eq!(restarter.restarts.load(Ordering::SeqCst), 1);
        assert!(channel.published().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_stop_reporter() {
        let (channel, _, reporter) = reporter();
        channel.set_failing(true);
        reporter
            .handle(OtaEvent::Failed {
                action_id: "3".into(),
                reason: "DownloadFailure: reset".into(),
            })
            .await;

        channel.set_failing(false);
        reporter
            .handle(OtaEvent::Failed {
                action_id: "4".into(),
                reason: "ProbeFailure: HTTP 404".into(),
            })
            .await;

        let statuses = channel.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].action_id, "4");
        assert_eq!(statuses[0].error, "ProbeFailure: HTTP 404");
    }

    #[tokio::test]
    async fn test_cancelled_update_reports_failure_before_shutdown() {
        let (channel, restarter, reporter) = reporter();
        let manager = Arc::new(OtaManager::new(
            Arc::new(ScriptedSource::new(vec![0; 4096], 64)),
            Arc::new(MemorySlot::default()),
            Arc::new(MemoryRecordStore::new()),
        ));
        let (tx, mut rx) = mpsc::channel(OTA_EVENT_QUEUE);
        let cancel = CancelFlag::new();

        let job = OtaJob {
            action_id: 30,
            url: "https://fw.local/app.bin".into(),
            version: None,
        };
        cancel.cancel();
        manager.start(job, tx, cancel.clone()).unwrap();

        assert!(reporter.drain_cancelled(&mut rx, Duration::from_secs(5)).await);

        let statuses = channel.statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].action_id, "30");
        assert_eq!(statuses[0].status, ActionState::Failed);
        assert_eq!(statuses[0].error, "DownloadFailure: cancelled");
        assert_eq!(manager.phase(), OtaPhase::Failed);
        assert_eq!(restarter.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drain_gives_up_when_nothing_arrives() {
        let (_, _, reporter) = reporter();
        let (_tx, mut rx) = mpsc::channel::<OtaEvent>(OTA_EVENT_QUEUE);
        assert!(
            !reporter
                .drain_cancelled(&mut rx, Duration::from_millis(20))
                .await
        );
    }
}
