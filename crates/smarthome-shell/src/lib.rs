//! Interactive shell for the smart home simulator
//!
//! Loads configuration, wires the event bus, device registry and the
//! background services together, and routes text commands to them.

pub mod commands;
pub mod config;
pub mod hub;

pub use commands::{is_exit, CommandError, HELP};
pub use config::{Config, ConfigError};
pub use hub::SmartHome;
