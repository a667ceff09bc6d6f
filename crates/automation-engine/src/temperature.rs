//! Comfort rule keeping thermostats near a target temperature

use crate::error::AutomationError;
use crate::rule::{Rule, RuleOutcome};
use async_trait::async_trait;
use device_core::device::{MAX_TEMPERATURE, MIN_TEMPERATURE};
use device_core::{Device, DeviceKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Sets every running thermostat further than `tolerance` from `target`
/// back to `target`.
pub struct TemperatureRule {
    name: String,
    target: i32,
    tolerance: i32,
    enabled: AtomicBool,
}

impl TemperatureRule {
    pub fn new(name: impl Into<String>, target: i32, tolerance: i32) -> Result<Self, AutomationError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(AutomationError::InvalidRule("rule name cannot be empty".into()));
        }
        if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&target) {
            return Err(AutomationError::InvalidRule(format!(
                "target {}°C outside {}..={}",
                target, MIN_TEMPERATURE, MAX_TEMPERATURE
            )));
        }
        if tolerance < 0 {
            return Err(AutomationError::InvalidRule(format!(
                "tolerance must not be negative, got {}",
                tolerance
            )));
        }

        Ok(Self {
            name,
            target,
            tolerance,
            enabled: AtomicBool::new(true),
        })
    }

    pub fn target(&self) -> i32 {
        self.target
    }

    pub fn tolerance(&self) -> i32 {
        self.tolerance
    }
}

#[async_trait]
impl Rule for TemperatureRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        5
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn should_execute(&self) -> bool {
        self.is_enabled()
    }

    async fn execute(
        &self,
        devices: &[Arc<Device>],
        cancel: &CancellationToken,
    ) -> Result<RuleOutcome, AutomationError> {
        let mut adjusted = Vec::new();

        for thermostat in devices
            .iter()
            .filter(|d| d.kind() == DeviceKind::Thermostat && d.is_on())
        {
            if cancel.is_cancelled() {
                return Err(AutomationError::Cancelled(self.name.clone()));
            }

            let current = thermostat.temperature()?;
            if (current - self.target).abs() > self.tolerance {
                tracing::info!(
                    target: "automation",
                    "{} adjusting {} from {}°C to {}°C",
                    self.name,
                    thermostat.name(),
                    current,
                    self.target
                );
                thermostat.set_temperature(self.target).await?;
                adjusted.push(thermostat.name().to_string());
            }
        }

        if adjusted.is_empty() {
            return Ok(RuleOutcome::Skipped);
        }
        Ok(RuleOutcome::Applied {
            summary: format!("set {} to {}°C", adjusted.join(", "), self.target),
        })
    }

    fn describe(&self) -> String {
        format!("temperature {}±{}°C", self.target, self.tolerance)
    }
}
