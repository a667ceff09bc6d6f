//! Time-of-day rule

use crate::error::AutomationError;
use crate::rule::{Rule, RuleOutcome};
use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use device_core::{Device, DeviceCommand};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Applies a device command once per day around a fixed time.
///
/// The rule is due while the clock is within one minute of `at`, and fires
/// at most once for each such window. Windows that straddle midnight are
/// handled.
pub struct TimeWindowRule {
    name: String,
    at: NaiveTime,
    window: TimeDelta,
    device: String,
    command: DeviceCommand,
    enabled: AtomicBool,
    /// Occurrence of `at` that last fired
    last_fired: Mutex<Option<NaiveDateTime>>,
}

/// Parse `HH:MM` or `HH:MM:SS`
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime, AutomationError> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| AutomationError::InvalidTimeFormat(s.to_string()))
}

impl TimeWindowRule {
    pub fn new(
        name: impl Into<String>,
        at: NaiveTime,
        device: impl Into<String>,
        command: DeviceCommand,
    ) -> Self {
        Self {
            name: name.into(),
            at,
            window: TimeDelta::minutes(1),
            device: device.into(),
            command,
            enabled: AtomicBool::new(true),
            last_fired: Mutex::new(None),
        }
    }

    pub fn at(&self) -> NaiveTime {
        self.at
    }

    /// The occurrence of `at` whose window contains `now`, if any
    fn occurrence(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let today = now.date();
        [today.pred_opt(), Some(today), today.succ_opt()]
            .into_iter()
            .flatten()
            .map(|day| day.and_time(self.at))
            .find(|occurrence| (now - *occurrence).abs() < self.window)
    }

    /// Whether the rule is due at `now` and has not fired for this window
    pub fn is_due(&self, now: NaiveDateTime) -> bool {
        match self.occurrence(now) {
            Some(occurrence) => *self.last_fired.lock() != Some(occurrence),
            None => false,
        }
    }

    /// Fire for the window containing `now`
    pub async fn fire(
        &self,
        now: NaiveDateTime,
        devices: &[Arc<Device>],
    ) -> Result<RuleOutcome, AutomationError> {
        let Some(occurrence) = self.occurrence(now) else {
            return Ok(RuleOutcome::Skipped);
        };
        {
            let mut last = self.last_fired.lock();
            if *last == Some(occurrence) {
                return Ok(RuleOutcome::Skipped);
            }
            *last = Some(occurrence);
        }

        let device = devices
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(&self.device))
            .ok_or_else(|| AutomationError::DeviceNotFound(self.device.clone()))?;

        tracing::info!(
            target: "automation",
            "Executing {} at {}",
            self.name,
            now.format("%H:%M:%S")
        );
        let summary = self.command.apply(device).await?;
        Ok(RuleOutcome::Applied { summary })
    }
}

#[async_trait]
impl Rule for TimeWindowRule {
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
        self.is_enabled() && self.is_due(Local::now().naive_local())
    }

    async fn execute(
        &self,
        devices: &[Arc<Device>],
        _cancel: &CancellationToken,
    ) -> Result<RuleOutcome, AutomationError> {
        self.fire(Local::now().naive_local(), devices).await
    }

    fn describe(&self) -> String {
        format!(
            "at {} run '{}' on {}",
            self.at.format("%H:%M"),
            self.command,
            self.device
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(
            parse_time_of_day("07:30").unwrap(),
            NaiveTime::from_hms_opt(7, 30, 0).unwrap()
        );
        assert!(parse_time_of_day("7h30").is_err());
        assert!(parse_time_of_day("25:00").is_err());
    }

    #[tokio::test]
    async fn test_fires_once_per_window() {
        let porch = Arc::new(Device::light("Porch").unwrap());
        let rule = TimeWindowRule::new(
            "Evening",
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            "porch",
            DeviceCommand::TurnOn,
        );
        let devices = vec![porch.clone()];

        assert!(!rule.is_due(at(18, 58, 30)));
        assert!(rule.is_due(at(18, 59, 30)));
        let outcome = rule.fire(at(18, 59, 30), &devices).await.unwrap();
        assert_eq!(
            outcome,
            RuleOutcome::Applied {
                summary: "Porch turned ON".into()
            }
        );
        assert!(porch.is_on());

        assert!(!rule.is_due(at(19, 0, 40)));
        assert_eq!(
            rule.fire(at(19, 0, 40), &devices).await.unwrap(),
            RuleOutcome::Skipped
        );
        assert!(!rule.is_due(at(19, 1, 0)));
    }

    #[test]
    fn test_window_across_midnight() {
        let rule = TimeWindowRule::new(
            "Midnight",
            NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            "Porch",
            DeviceCommand::TurnOff,
        );
        assert!(rule.is_due(at(23, 59, 30)));
        assert!(rule.is_due(at(0, 0, 30)));
        assert!(!rule.is_due(at(0, 2, 0)));
    }

    #[tokio::test]
    async fn test_missing_device_is_reported() {
        let rule = TimeWindowRule::new(
            "Morning",
            NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            "Kitchen",
            DeviceCommand::TurnOn,
        );
        assert!(matches!(
            rule.fire(at(7, 0, 0), &[]).await,
            Err(AutomationError::DeviceNotFound(_))
        ));
    }
}
