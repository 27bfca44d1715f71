//! Collaborator interfaces: byte transports for the messaging channel, the
//! channel itself, firmware download, the firmware update slot and restart

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

/// A byte stream the connection can own and move into its task
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> TransportStream for T {}

/// Factory for creating transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// The stream type this connector produces
    type Stream: TransportStream;

    /// Attempt to connect, returning a stream on success
    async fn connect(&self) -> Result<Self::Stream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Outbound side of the publish/subscribe channel to the cloud
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Publish `payload` on `topic`. A single attempt, no retries.
    async fn publish(&self, topic: &str, payload: String) -> Result<()>;
}

/// Where firmware images are fetched from
#[async_trait]
pub trait FirmwareSource: Send + Sync {
    /// Learn the image size without keeping the body
    async fn probe(&self, url: &str) -> Result<u64>;

    /// Start streaming the image
    async fn open(&self, url: &str) -> Result<Box<dyn ChunkStream>>;
}

/// A firmware body being received
#[async_trait]
pub trait ChunkStream: Send {
    /// Next chunk, or `None` at end of body
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

/// The inactive firmware slot an update is written into
#[async_trait]
pub trait FirmwareSlot: Send + Sync {
    /// Prepare the slot for an image of `size` bytes
    async fn begin(&self, size: u64) -> Result<Box<dyn ImageWriter>>;
}

/// Writer for one staged image
#[async_trait]
pub trait ImageWriter: Send {
    async fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Flush the image and mark it as the next boot image
    async fn commit(&mut self) -> Result<()>;
}

/// Requests a device restart
pub trait Restarter: Send + Sync {
    fn restart(&self) -> Result<()>;
}
