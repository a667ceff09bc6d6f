//! Error types for device operations

use crate::device::DeviceKind;
use thiserror::Error;

/// Errors returned synchronously to the caller of a device operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Device name cannot be empty")]
    EmptyName,

    #[error("Brightness must be between {min} and {max}, got {value}")]
    BrightnessOutOfRange { value: i32, min: u8, max: u8 },

    #[error("Temperature must be between {min} and {max}°C, got {value}")]
    TemperatureOutOfRange { value: i32, min: i32, max: i32 },

    /// Operation does not apply to this kind of device
    #[error("{device} is not a {expected}")]
    WrongKind { device: String, expected: DeviceKind },

    /// Operation requires the device to be on
    #[error("{0} is off")]
    PoweredOff(String),

    #[error("Unknown device type: {0}")]
    UnknownKind(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid value for {command}: {value}")]
    InvalidValue { command: String, value: String },

    #[error("Command {0} requires a value")]
    MissingValue(String),

    #[error("Invalid device spec: {0}. Format should be 'name:type'")]
    InvalidSpec(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Device already exists: {0}")]
    AlreadyExists(String),
}
