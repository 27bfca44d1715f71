//! Connection management for the broker link
//!
//! This module handles:
//! - Persistent connection with automatic reconnection and backoff
//! - Subscribing to the device's actions topic on every connect
//! - Decoding incoming action requests
//! - Queueing outbound publishes while the link is down

mod manager;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionHandle, ConnectionManager};
