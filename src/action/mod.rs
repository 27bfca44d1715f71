//! Action handling for the device agent
//!
//! This module handles:
//! - Registering named action handlers in a fixed-size table
//! - Dispatching incoming action envelopes to their handler
//! - Publishing the terminal status of each action

mod dispatcher;
pub mod handlers;
mod registry;

pub use dispatcher::{ActionDispatcher, DispatchOutcome};
pub use registry::ActionRegistry;
