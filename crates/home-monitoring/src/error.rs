//! Error types for the monitoring services

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitoringError {
    /// Only one power optimization may run at a time
    #[error("Power optimization already in progress")]
    OptimizationInProgress,

    #[error("Invalid power saving window {start_hour}-{end_hour}: hours must be 0-24 and differ")]
    InvalidPowerSavingWindow { start_hour: u32, end_hour: u32 },
}
