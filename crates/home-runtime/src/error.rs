//! Error types for the runtime

use thiserror::Error;

/// Failure reported by an event listener
#[derive(Error, Debug, Clone)]
#[error("Listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
