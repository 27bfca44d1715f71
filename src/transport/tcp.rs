//! TCP link to the broker

use crate::transport::traits::TransportConnector;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::debug;

/// Connects to the broker at a fixed `host:port`
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> Result<Self::Stream> {
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("connecting to broker {}", self.address))?;
        stream.set_nodelay(true)?;
        debug!(
            "Broker link {:?} -> {:?}",
            stream.local_addr().ok(),
            stream.peer_addr().ok()
        );
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}
