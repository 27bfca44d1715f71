//! Device agent: takes named actions from the cloud broker, runs their
//! handlers, reports action status and performs confirmed OTA updates.
//!
//! The binary in `main.rs` wires these modules to the host; everything here
//! can be driven with in-memory collaborators.

pub mod action;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod ota;
pub mod persist;
pub mod status;
pub mod transport;

#[cfg(test)]
mod test_support;
