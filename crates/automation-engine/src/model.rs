//! Declarative rule descriptions used by configuration and the shell

use crate::error::AutomationError;
use crate::rule::Rule;
use crate::security::{SecurityRule, DEFAULT_COOLDOWN};
use crate::temperature::TemperatureRule;
use crate::time_window::{parse_time_of_day, TimeWindowRule};
use device_core::DeviceCommand;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Description of a rule that can be built and registered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleSpec {
    /// Keep running thermostats near a target
    Temperature {
        name: String,
        target: i32,
        tolerance: i32,
    },
    /// Respond to motion with lights and cameras
    Security {
        name: String,
        #[serde(default = "default_cooldown_secs")]
        cooldown_secs: u64,
    },
    /// Run a device command around a time of day (`HH:MM`)
    TimeWindow {
        name: String,
        at: String,
        device: String,
        command: DeviceCommand,
    },
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN.as_secs()
}

/// A built rule. Security rules are kept typed so they can be subscribed
/// to motion events.
pub enum BuiltRule {
    Security(Arc<SecurityRule>),
    Other(Arc<dyn Rule>),
}

impl BuiltRule {
    pub fn into_rule(self) -> Arc<dyn Rule> {
        match self {
            BuiltRule::Security(rule) => rule as Arc<dyn Rule>,
            BuiltRule::Other(rule) => rule,
        }
    }
}

impl RuleSpec {
    pub fn name(&self) -> &str {
        match self {
            RuleSpec::Temperature { name, .. }
            | RuleSpec::Security { name, .. }
            | RuleSpec::TimeWindow { name, .. } => name,
        }
    }

    /// Parse the argument list of `automate add`.
    ///
    /// ```text
    /// temperature <name> <target> <tolerance>
    /// security <name> [cooldown-secs]
    /// time <name> <HH:MM> <device> <command> [value]
    /// ```
    pub fn parse(args: &[&str]) -> Result<Self, AutomationError> {
        let usage = || {
            AutomationError::InvalidRule(
                "usage: temperature <name> <target> <tolerance> | security <name> [cooldown] | time <name> <HH:MM> <device> <command> [value]"
                    .to_string(),
            )
        };
        let number = |s: &str| {
            s.parse::<i32>()
                .map_err(|_| AutomationError::InvalidRule(format!("not a number: {}", s)))
        };

        let (kind, rest) = args.split_first().ok_or_else(usage)?;
        match (kind.to_ascii_lowercase().as_str(), rest) {
            ("temperature" | "temp", [name, target, tolerance]) => Ok(RuleSpec::Temperature {
                name: (*name).to_string(),
                target: number(*target)?,
                tolerance: number(*tolerance)?,
            }),
            ("security", [name]) => Ok(RuleSpec::Security {
                name: (*name).to_string(),
                cooldown_secs: default_cooldown_secs(),
            }),
            ("security", [name, cooldown]) => Ok(RuleSpec::Security {
                name: (*name).to_string(),
                cooldown_secs: cooldown.parse().map_err(|_| {
                    AutomationError::InvalidRule(format!("invalid cooldown: {}", cooldown))
                })?,
            }),
            ("time", [name, at, device, command, value @ ..]) if value.len() <= 1 => {
                parse_time_of_day(at)?;
                let command = DeviceCommand::parse(command, value.first().copied())?;
                Ok(RuleSpec::TimeWindow {
                    name: (*name).to_string(),
                    at: (*at).to_string(),
                    device: (*device).to_string(),
                    command,
                })
            }
            _ => Err(usage()),
        }
    }

    /// Build the rule this spec describes
    pub fn build(&self) -> Result<BuiltRule, AutomationError> {
        match self {
            RuleSpec::Temperature {
                name,
                target,
                tolerance,
            } => Ok(BuiltRule::Other(Arc::new(TemperatureRule::new(
                name.clone(),
                *target,
                *tolerance,
            )?))),
            RuleSpec::Security {
                name,
                cooldown_secs,
            } => Ok(BuiltRule::Security(Arc::new(
                SecurityRule::new(name.clone()).with_cooldown(Duration::from_secs(*cooldown_secs)),
            ))),
            RuleSpec::TimeWindow {
                name,
                at,
                device,
                command,
            } => Ok(BuiltRule::Other(Arc::new(TimeWindowRule::new(
                name.clone(),
                parse_time_of_day(at)?,
                device.clone(),
                command.clone(),
            )))),
        }
    }
}
