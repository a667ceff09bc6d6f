//! Background health monitor
//!
//! Periodically compares each device's power state with the last observed
//! value, accumulates on-time and raises temperature and usage alerts.

use device_core::device::{COLD_THRESHOLD, HOT_THRESHOLD};
use device_core::{DeviceProvider, DeviceSnapshot};
use dashmap::DashMap;
use home_runtime::PeriodicTask;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between polls
    pub interval: Duration,
    /// Devices on for longer than this raise an alert
    pub long_running_threshold: Duration,
    /// More transitions than this raise a notice
    pub frequent_change_threshold: u64,
    /// How long `stop_monitoring` waits for the poll loop
    pub join_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            long_running_threshold: Duration::from_secs(3600),
            frequent_change_threshold: 10,
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// Condition flagged during a poll
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorAlert {
    Cold { device: String, temperature: i32 },
    Hot { device: String, temperature: i32 },
    LongRunning { device: String, minutes: u64 },
    FrequentChanges { device: String, changes: u64 },
}

impl MonitorAlert {
    pub fn device(&self) -> &str {
        match self {
            MonitorAlert::Cold { device, .. }
            | MonitorAlert::Hot { device, .. }
            | MonitorAlert::LongRunning { device, .. }
            | MonitorAlert::FrequentChanges { device, .. } => device,
        }
    }
}

impl fmt::Display for MonitorAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorAlert::Cold {
                device,
                temperature,
            } => write!(f, "COLD ALERT: {} temperature is {}°C", device, temperature),
            MonitorAlert::Hot {
                device,
                temperature,
            } => write!(f, "HEAT ALERT: {} temperature is {}°C", device, temperature),
            MonitorAlert::LongRunning { device, minutes } => {
                write!(f, "{} has been ON for over {} minutes", device, minutes)
            }
            MonitorAlert::FrequentChanges { device, changes } => write!(
                f,
                "Frequent state changes detected for {} ({} changes)",
                device, changes
            ),
        }
    }
}

/// Outcome of a single poll
#[derive(Debug, Clone, Default)]
pub struct PollReport {
    pub devices: usize,
    pub transitions: usize,
    pub alerts: Vec<MonitorAlert>,
}

/// Per-device statistics at a point in time
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStats {
    pub name: String,
    pub on: bool,
    pub state_changes: u64,
    pub total_on_time: Duration,
    pub current_state_duration: Duration,
    pub alerts: u64,
}

impl fmt::Display for DeviceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Statistics:\n  State changes: {}\n  Total ON time: {:.1} minutes\n  Current state duration: {:.1} seconds",
            self.name,
            self.state_changes,
            self.total_on_time.as_secs_f64() / 60.0,
            self.current_state_duration.as_secs_f64()
        )
    }
}

#[derive(Debug, Clone)]
struct DeviceStatus {
    previous_on: bool,
    last_state_change: Instant,
    state_changes: u64,
    total_on_time: Duration,
    on_since: Option<Instant>,
    alerts: u64,
}

impl DeviceStatus {
    fn new(now: Instant) -> Self {
        Self {
            previous_on: false,
            last_state_change: now,
            state_changes: 0,
            total_on_time: Duration::ZERO,
            on_since: None,
            alerts: 0,
        }
    }

    /// Record the observed power state. Returns true on a transition.
    fn track(&mut self, name: &str, on: bool, now: Instant) -> bool {
        if on == self.previous_on {
            return false;
        }
        if let Some(on_for) = self.transition(on, now) {
            tracing::info!("{} was ON for {} seconds", name, on_for.as_secs());
        }
        true
    }

    /// Apply a transition. Returns the length of a completed on-interval.
    fn transition(&mut self, on: bool, now: Instant) -> Option<Duration> {
        self.previous_on = on;
        self.last_state_change = now;
        self.state_changes += 1;
        if on {
            self.on_since = Some(now);
            return None;
        }
        let on_for = now.saturating_duration_since(self.on_since.take()?);
        self.total_on_time += on_for;
        Some(on_for)
    }

    /// Statistics as they would read if `on` were observed now, leaving
    /// the tracked status unchanged
    fn preview(&self, name: &str, on: bool, now: Instant) -> DeviceStats {
        if on == self.previous_on {
            return self.stats(name, now);
        }
        let mut pending = self.clone();
        pending.transition(on, now);
        pending.stats(name, now)
    }

    fn stats(&self, name: &str, now: Instant) -> DeviceStats {
        let open = self
            .on_since
            .filter(|_| self.previous_on)
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default();
        DeviceStats {
            name: name.to_string(),
            on: self.previous_on,
            state_changes: self.state_changes,
            total_on_time: self.total_on_time + open,
            current_state_duration: now.saturating_duration_since(self.last_state_change),
            alerts: self.alerts,
        }
    }
}

/// Polls devices in the background and keeps per-device statistics
pub struct DeviceMonitor {
    devices: Arc<dyn DeviceProvider>,
    config: MonitorConfig,
    statuses: DashMap<String, DeviceStatus>,
    running: AtomicBool,
    task: Mutex<Option<PeriodicTask>>,
}

impl DeviceMonitor {
    pub fn new(devices: Arc<dyn DeviceProvider>, config: MonitorConfig) -> Self {
        Self {
            devices,
            config,
            statuses: DashMap::new(),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the poll loop. Returns `false` if it was already running.
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let monitor = Arc::clone(self);
        *task = Some(PeriodicTask::spawn(
            "device-monitor",
            self.config.interval,
            Duration::ZERO,
            move || {
                let monitor = Arc::clone(&monitor);
                async move {
                    monitor.poll();
                }
            },
        ));
        tracing::info!(
            "Device monitoring started (checking every {}ms)",
            self.config.interval.as_millis()
        );
        true
    }

    /// Stop the poll loop, waiting up to the join timeout.
    /// Returns `false` if it was not running.
    pub async fn stop_monitoring(&self) -> bool {
        let task = {
            let mut task = self.task.lock();
            if self
                .running
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return false;
            }
            task.take()
        };

        if let Some(task) = task {
            task.shutdown(self.config.join_timeout).await;
        }
        tracing::info!("Device monitoring stopped");
        true
    }

    /// Observe every device once
    pub fn poll(&self) -> PollReport {
        let now = Instant::now();
        let devices = self.devices.devices();
        let mut report = PollReport {
            devices: devices.len(),
            ..Default::default()
        };

        for device in devices.iter() {
            self.observe(&device.snapshot(), now, &mut report);
        }

        for alert in &report.alerts {
            tracing::warn!("{}", alert);
        }
        report
    }

    fn observe(&self, snapshot: &DeviceSnapshot, now: Instant, report: &mut PollReport) {
        let mut status = self
            .statuses
            .entry(snapshot.name.clone())
            .or_insert_with(|| DeviceStatus::new(now));

        let mut alerts = Vec::new();
        if status.track(&snapshot.name, snapshot.on, now) {
            report.transitions += 1;
            tracing::info!(
                "State change detected: {} -> {}",
                snapshot.name,
                if snapshot.on { "ON" } else { "OFF" }
            );
            if status.state_changes > self.config.frequent_change_threshold {
                alerts.push(MonitorAlert::FrequentChanges {
                    device: snapshot.name.clone(),
                    changes: status.state_changes,
                });
            }
        }

        if let Some(since) = status.on_since.filter(|_| snapshot.on) {
            let on_for = now.saturating_duration_since(since);
            if on_for > self.config.long_running_threshold {
                alerts.push(MonitorAlert::LongRunning {
                    device: snapshot.name.clone(),
                    minutes: on_for.as_secs() / 60,
                });
            }
        }

        if let Some(thermostat) = snapshot.thermostat() {
            if thermostat.temperature < COLD_THRESHOLD {
                alerts.push(MonitorAlert::Cold {
                    device: snapshot.name.clone(),
                    temperature: thermostat.temperature,
                });
            } else if thermostat.temperature > HOT_THRESHOLD {
                alerts.push(MonitorAlert::Hot {
                    device: snapshot.name.clone(),
                    temperature: thermostat.temperature,
                });
            }
        }

        status.alerts += alerts.len() as u64;
        report.alerts.extend(alerts);
    }

    /// Statistics for one device.
    ///
    /// A registered device's current power state is folded into the result
    /// without being recorded, so this works whether or not the poll loop
    /// is running. Returns `None` for a device that is neither registered
    /// nor previously seen.
    pub fn device_stats(&self, name: &str) -> Option<DeviceStats> {
        let now = Instant::now();
        let Some(device) = self.devices.device(name) else {
            return self.statuses.get(name).map(|status| status.stats(name, now));
        };

        let snapshot = device.snapshot();
        let stats = match self.statuses.get(&snapshot.name) {
            Some(status) => status.preview(&snapshot.name, snapshot.on, now),
            None => DeviceStatus::new(now).preview(&snapshot.name, snapshot.on, now),
        };
        Some(stats)
    }

    /// Names of every device observed so far
    pub fn tracked_devices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.statuses.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
