use anyhow::{Context, Result};
use device_agent::action::handlers::{
    ActionContext, OtaHandler, StatusHandler, OTA_ACTION, STATUS_ACTION,
};
use device_agent::action::ActionDispatcher;
use device_agent::config::AgentConfig;
use device_agent::connection::{ConnectionEvent, ConnectionManager};
use device_agent::device::{ExitRestarter, FileFirmwareSlot};
use device_agent::ota::{CancelFlag, OtaManager, OtaReporter, OTA_EVENT_QUEUE};
use device_agent::persist::{FileRecordStore, RecordStore, RECORD_NAMESPACE};
use device_agent::status::StatusPublisher;
use device_agent::transport::{HttpFirmwareSource, TcpConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How long shutdown waits for a cancelled update and queued statuses
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::from_env()?;

    // RUST_LOG overrides the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let device = Arc::new(config.device.clone());
    info!(
        "Device agent starting: device={} project={}",
        device.device_id, device.project_id
    );
    info!("  Broker: {}", device.broker_address);

    let store: Arc<dyn RecordStore> = Arc::new(
        FileRecordStore::open(&config.storage.record_path, RECORD_NAMESPACE)
            .context("opening record store")?,
    );

    let mut conn = ConnectionManager::new(
        config.connection_config(),
        TcpConnector::new(device.broker_address.clone()),
    );
    let publisher = StatusPublisher::new(conn.channel(), &device);

    let source = HttpFirmwareSource::new(
        &device,
        Duration::from_millis(config.ota.http_connect_timeout_ms),
    )
    .context("building firmware HTTP client")?;
    let ota_manager = Arc::new(OtaManager::new(
        Arc::new(source),
        Arc::new(FileFirmwareSlot::new(
            &config.storage.firmware_dir,
            config.storage.max_image_bytes,
        )),
        store,
    ));

    // Confirm an update from the previous boot before taking new actions
    match ota_manager.verify_pending_update(&publisher).await {
        Ok(Some(action_id)) => info!("Firmware update {} confirmed", action_id),
        Ok(None) => {}
        Err(e) => error!("Pending update check failed: {}", e),
    }

    let (ota_tx, mut ota_rx) = mpsc::channel(OTA_EVENT_QUEUE);
    let cancel = CancelFlag::new();
    let reporter = OtaReporter::new(
        publisher.clone(),
        Arc::new(ExitRestarter::new()),
        Duration::from_millis(config.ota.restart_delay_ms),
    );

    let mut dispatcher: ActionDispatcher = ActionDispatcher::new(ActionContext {
        device: device.clone(),
        publisher,
    });
    dispatcher.registry_mut().add(
        OTA_ACTION,
        Arc::new(OtaHandler::new(ota_manager.clone(), ota_tx, cancel.clone())),
    )?;
    dispatcher
        .registry_mut()
        .add(STATUS_ACTION, Arc::new(StatusHandler::new()))?;

    for (slot, name) in dispatcher.registry().list() {
        info!("  Action [{}]: {}", slot, name);
    }

    // Main event loop
    loop {
        tokio::select! {
            event = conn.recv() => match event {
                Some(ConnectionEvent::Connected { transport }) => {
                    info!("Connected via {}", transport);
                }
                Some(ConnectionEvent::Disconnected { reason }) => {
                    warn!("Disconnected: {}", reason);
                }
                Some(ConnectionEvent::ConnectionFailed { reason }) => {
                    error!("Connection failed: {}", reason);
                }
                Some(ConnectionEvent::Received(envelope)) => {
                    let outcome = dispatcher.dispatch(&envelope).await;
                    debug!("Action {} -> {:?}", envelope.action_id, outcome);
                }
                None => {
                    error!("Connection manager closed");
                    break;
                }
            },

            Some(event) = ota_rx.recv() => {
                reporter.handle(event).await;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                cancel.cancel();
                break;
            }
        }
    }

    if ota_manager.is_busy() {
        info!("Waiting for the running update to stop");
        if !reporter.drain_cancelled(&mut ota_rx, SHUTDOWN_GRACE).await {
            warn!("Update did not report its end within {:?}", SHUTDOWN_GRACE);
        }
    }
    if !conn.flush(SHUTDOWN_GRACE).await {
        warn!("Unsent status messages dropped at shutdown");
    }

    Ok(())
}
