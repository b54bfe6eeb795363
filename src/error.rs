// Typed errors with thiserror. Nothing here is fatal to a tracker:
// the engine logs these at the event boundary and keeps going.

use thiserror::Error;

use crate::types::OverlayNodeId;

/// Engine error types.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    #[error("Overlay node {node:?}: {message}")]
    Overlay {
        node: OverlayNodeId,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Relay error: {0}")]
    Relay(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
