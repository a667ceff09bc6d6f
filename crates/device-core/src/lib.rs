//! Simulated device layer
//!
//! This crate provides the thread-safe device model, textual device
//! commands and the registry that background services read from.

pub mod command;
pub mod device;
pub mod error;
pub mod registry;

pub use command::DeviceCommand;
pub use device::{
    CameraState, Device, DeviceAttributes, DeviceKind, DeviceSnapshot, LightState,
    ThermostatState,
};
pub use error::DeviceError;
pub use registry::{DeviceProvider, DeviceRegistry};
