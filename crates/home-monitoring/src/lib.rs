//! Background monitoring for the smart home simulator
//!
//! `DeviceMonitor` polls devices for state transitions and threshold
//! alerts. `PowerMonitoringService` estimates consumption, tracks energy
//! and can shed load toward a target.

pub mod device_monitor;
pub mod error;
pub mod power;

pub use device_monitor::{DeviceMonitor, DeviceStats, MonitorAlert, MonitorConfig, PollReport};
pub use error::MonitoringError;
pub use power::{
    estimate_watts, DeviceEnergy, OptimizationSummary, PowerConfig, PowerMonitoringService,
    PowerReport, PowerSample, PowerSavingWindow, PowerStatistics,
};
