pub mod http;
pub mod tcp;
pub mod traits;

pub use http::HttpFirmwareSource;
pub use tcp::TcpConnector;
pub use traits::{
    ChunkStream, FirmwareSlot, FirmwareSource, ImageWriter, MessageChannel, Restarter,
    TransportConnector, TransportStream,
};
