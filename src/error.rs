//! Error taxonomy for action handling and OTA updates

use std::any::Any;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("Action registry is full")]
    RegistryFull,

    #[error("Action already registered: {0}")]
    DuplicateAction(String),

    #[error("Action not found: {0}")]
    ActionNotFound(String),

    #[error("Failed to publish: {0}")]
    PublishFailure(String),

    #[error("Firmware size probe failed: {0}")]
    ProbeFailure(String),

    #[error("Firmware download failed: {0}")]
    DownloadFailure(String),

    #[error("Failed to persist update record: {0}")]
    PersistFailure(String),

    #[error("An OTA update is already in progress")]
    OtaInProgress,

    #[error("Invalid action payload: {0}")]
    InvalidPayload(String),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}

impl AgentError {
    /// Short reason string carried in a "failed" status message
    pub fn reason(&self) -> String {
        match self {
            AgentError::RegistryFull => "RegistryFull".into(),
            AgentError::DuplicateAction(_) => "DuplicateAction".into(),
            AgentError::ActionNotFound(_) => "ActionNotFound".into(),
            AgentError::PublishFailure(_) => "PublishFailure".into(),
            AgentError::ProbeFailure(msg) => format!("ProbeFailure: {}", msg),
            AgentError::DownloadFailure(msg) => format!("DownloadFailure: {}", msg),
            AgentError::PersistFailure(msg) => format!("PersistFailure: {}", msg),
            AgentError::OtaInProgress => "OtaInProgress".into(),
            AgentError::InvalidPayload(msg) => format!("InvalidPayload: {}", msg),
            AgentError::HandlerPanicked(msg) => format!("HandlerPanicked: {}", msg),
        }
    }

    /// Wrap a payload caught by `catch_unwind`
    pub fn from_panic(panic: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".into()
        };
        AgentError::HandlerPanicked(message)
    }
}
