//! The rule abstraction evaluated by the engine

use crate::error::AutomationError;
use async_trait::async_trait;
use device_core::Device;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of a rule execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// Nothing needed doing
    Skipped,
    /// The rule changed something
    Applied { summary: String },
}

/// An automation rule.
///
/// `should_execute` is a cheap, synchronous filter run once per cycle.
/// `execute` receives the device snapshot for the cycle and a token that is
/// cancelled when the engine gives up waiting on the rule.
#[async_trait]
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    /// Advisory ordering hint, higher is more important
    fn priority(&self) -> i32 {
        0
    }

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);

    fn should_execute(&self) -> bool;

    async fn execute(
        &self,
        devices: &[Arc<Device>],
        cancel: &CancellationToken,
    ) -> Result<RuleOutcome, AutomationError>;

    /// Short human readable kind, used in status output
    fn describe(&self) -> String {
        self.name().to_string()
    }
}

/// Summary of a registered rule
#[derive(Debug, Clone, Serialize)]
pub struct RuleInfo {
    pub name: String,
    pub description: String,
    pub priority: i32,
    pub enabled: bool,
}

impl RuleInfo {
    pub fn of(rule: &dyn Rule) -> Self {
        Self {
            name: rule.name().to_string(),
            description: rule.describe(),
            priority: rule.priority(),
            enabled: rule.is_enabled(),
        }
    }
}
