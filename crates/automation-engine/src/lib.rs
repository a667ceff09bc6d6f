//! Automation engine for the smart home simulator
//!
//! Provides periodic rule evaluation with isolated, time-bounded rule
//! execution, plus the built-in comfort, security and time-of-day rules.

pub mod error;
pub mod model;
pub mod rule;
pub mod security;
pub mod temperature;
pub mod time_window;
pub mod engine;

pub use engine::{AutomationConfig, AutomationEngine, CycleReport};
pub use error::AutomationError;
pub use model::{BuiltRule, RuleSpec};
pub use rule::{Rule, RuleInfo, RuleOutcome};
pub use security::SecurityRule;
pub use temperature::TemperatureRule;
pub use time_window::TimeWindowRule;
