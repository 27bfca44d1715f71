//! Connection manager with persistent broker connection and automatic reconnection

use crate::transport::traits::{MessageChannel, TransportConnector, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use device_agent_shared::{
    codec::{self, Frame, FrameDecoder},
    topics, ActionEnvelope,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, warn};

/// Outbound frames queued while the link is down
const OUTBOUND_QUEUE: usize = 100;

const FLUSH_POLL: Duration = Duration::from_millis(10);

/// Events emitted by the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connected and subscribed to the actions topic
    Connected { transport: &'static str },
    /// Lost the broker connection
    Disconnected { reason: String },
    /// An action request arrived
    Received(ActionEnvelope),
    /// A connection attempt failed; another follows after the backoff delay
    ConnectionFailed { reason: String },
}

/// Configuration for connection manager
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub device_id: String,
    pub project_id: String,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    /// Maximum reconnection delay
    pub max_reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            device_id: "1".into(),
            project_id: "demo".into(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

impl ConnectionConfig {
    pub fn actions_topic(&self) -> String {
        topics::actions(&self.project_id, &self.device_id)
    }
}

/// Manages the persistent connection to the broker
pub struct ConnectionManager {
    outbound_tx: mpsc::Sender<Frame>,
    event_rx: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the connection loop
    pub fn new<C: TransportConnector>(config: ConnectionConfig, connector: C) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);

        tokio::spawn(async move {
            connection_loop(config, connector, outbound_rx, event_tx).await;
        });

        Self {
            outbound_tx,
            event_rx,
        }
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Wait until every queued publish has been taken by the connection.
    ///
    /// Returns `false` if the queue is not empty after `limit`, e.g. while the
    /// broker is unreachable.
    pub async fn flush(&self, limit: Duration) -> bool {
        let drained = async {
            while self.outbound_tx.capacity() < self.outbound_tx.max_capacity() {
                tokio::time::sleep(FLUSH_POLL).await;
            }
        };
        timeout(limit, drained).await.is_ok()
    }

    /// Publishing handle for the status publisher
    pub fn channel(&self) -> Arc<dyn MessageChannel> {
        Arc::new(ConnectionHandle {
            outbound_tx: self.outbound_tx.clone(),
        })
    }
}

/// Queues publishes onto the connection's outbound side
#[derive(Clone)]
pub struct ConnectionHandle {
    outbound_tx: mpsc::Sender<Frame>,
}

#[async_trait]
impl MessageChannel for ConnectionHandle {
    async fn publish(&self, topic: &str, payload: String) -> Result<()> {
        self.outbound_tx
            .try_send(Frame::publish(topic, payload))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => anyhow!("Outbound queue full"),
                mpsc::error::TrySendError::Closed(_) => anyhow!("Connection closed"),
            })
    }
}

/// Main connection loop with reconnection logic
async fn connection_loop<C: TransportConnector>(
    config: ConnectionConfig,
    connector: C,
    mut outbound_rx: mpsc::Receiver<Frame>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        match timeout(config.connect_timeout, connector.connect()).await {
            Ok(Ok(stream)) => {
                reconnect_delay = config.reconnect_delay;

                let _ = event_tx
                    .send(ConnectionEvent::Connected {
                        transport: connector.name(),
                    })
                    .await;

                if let Err(reason) =
                    handle_connection(stream, &config, &mut outbound_rx, &event_tx).await
                {
                    let _ = event_tx
                        .send(ConnectionEvent::Disconnected {
                            reason: reason.to_string(),
                        })
                        .await;
                }
            }
            Ok(Err(e)) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: e.to_string(),
                    })
                    .await;
            }
            Err(_) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: "connect timed out".into(),
                    })
                    .await;
            }
        }

        if event_tx.is_closed() {
            debug!("Event receiver dropped, stopping connection loop");
            return;
        }

        tokio::time::sleep(reconnect_delay).await;

        // Exponential backoff
        reconnect_delay = std::cmp::min(reconnect_delay * 2, config.max_reconnect_delay);
    }
}

/// Handle an active connection
async fn handle_connection<S: TransportStream>(
    stream: S,
    config: &ConnectionConfig,
    outbound_rx: &mut mpsc::Receiver<Frame>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<()> {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let actions_topic = config.actions_topic();

    let subscribe = codec::encode(&Frame::subscribe(actions_topic.clone()))?;
    writer.write_all(&subscribe).await?;

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];
    let mut keepalive = interval_at(
        Instant::now() + config.keepalive_interval,
        config.keepalive_interval,
    );

    loop {
        tokio::select! {
            _ = keepalive.tick() => {
                let encoded = codec::encode(&Frame::Ping)?;
                writer.write_all(&encoded).await?;
            }

            Some(frame) = outbound_rx.recv() => {
                let encoded = codec::encode(&frame)?;
                writer.write_all(&encoded).await?;
            }

            result = reader.read(&mut read_buf) => {
                let n = result.map_err(|e| anyhow!("Read error: {}", e))?;
                if n == 0 {
                    return Err(anyhow!("Broker closed connection"));
                }
                decoder.extend(&read_buf[..n]);

                while let Some(frame) = decoder.decode_next()? {
                    match frame {
                        Frame::Publish { topic, payload } if topic == actions_topic => {
                            match ActionEnvelope::from_json(payload.as_bytes()) {
                                Ok(envelope) => {
                                    let _ = event_tx.send(ConnectionEvent::Received(envelope)).await;
                                }
                                Err(e) => warn!("Dropping malformed action payload: {}", e),
                            }
                        }
                        Frame::Publish { topic, .. } => {
                            debug!("Ignoring publish on {}", topic);
                        }
                        Frame::Ping | Frame::Subscribe { .. } => {}
                    }
                }
            }
        }
    }
}
