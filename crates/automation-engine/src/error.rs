//! Error types for the automation engine

use device_core::DeviceError;
use thiserror::Error;

/// Errors that can occur in the automation engine
#[derive(Error, Debug)]
pub enum AutomationError {
    /// Rule not found
    #[error("Rule not found: {0}")]
    NotFound(String),

    /// A rule with the same name is already registered
    #[error("Rule already exists: {0}")]
    Duplicate(String),

    /// Rule definition could not be built
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Invalid time format
    #[error("Invalid time format: {0}")]
    InvalidTimeFormat(String),

    /// Device not found for action
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Device rejected the action
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Rule body failed
    #[error("Rule execution failed: {0}")]
    ExecutionFailed(String),

    /// Rule was abandoned before it finished
    #[error("Rule cancelled: {0}")]
    Cancelled(String),
}
