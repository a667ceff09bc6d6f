//! Power estimation, energy accounting and load shedding
//!
//! A fast task samples every device's estimated draw and integrates energy,
//! publishing a threshold event when the total exceeds the configured limit.
//! A slow task logs a consumption report with a cost estimate. An optional
//! power saving schedule sheds load during a daily window of hours.

use crate::error::MonitoringError;
use chrono::{DateTime, Local, Timelike, Utc};
use dashmap::DashMap;
use device_core::{Device, DeviceAttributes, DeviceProvider, DeviceSnapshot};
use home_runtime::{Event, EventBus, EventKind, PeriodicTask};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct PowerConfig {
    /// Period of the sampling task
    pub sample_interval: Duration,
    /// Period of the report task, which first runs after one period
    pub report_interval: Duration,
    /// Initial threshold in watts
    pub threshold_watts: u32,
    /// Delay between devices turned off by the optimizer
    pub optimization_pacing: Duration,
    /// Electricity price in dollars per kWh
    pub cost_per_kwh: f64,
    /// Number of devices named in threshold events and reports
    pub top_consumers: usize,
    /// How often the power saving schedule checks the clock
    pub saving_check_interval: Duration,
    pub shutdown_grace: Duration,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(30),
            threshold_watts: 500,
            optimization_pacing: Duration::from_millis(500),
            cost_per_kwh: 0.12,
            top_consumers: 3,
            saving_check_interval: Duration::from_secs(3600),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Estimated draw of a device in watts. Devices that are off draw nothing.
pub fn estimate_watts(snapshot: &DeviceSnapshot) -> f64 {
    if !snapshot.on {
        return 0.0;
    }
    match &snapshot.attributes {
        DeviceAttributes::Light(light) => 10.0 + f64::from(light.brightness) / 100.0 * 50.0,
        DeviceAttributes::Thermostat(t) if t.heating || t.cooling => 150.0,
        DeviceAttributes::Thermostat(_) => 50.0,
        DeviceAttributes::SecurityCamera(camera) if camera.recording => 15.0,
        DeviceAttributes::SecurityCamera(_) => 5.0,
    }
}

/// Running power figures for one device
#[derive(Debug, Clone)]
struct PowerMetrics {
    current_watts: f64,
    energy_wh: f64,
    last_update: Instant,
}

impl PowerMetrics {
    fn new(now: Instant) -> Self {
        Self {
            current_watts: 0.0,
            energy_wh: 0.0,
            last_update: now,
        }
    }

    /// Integrate the previous draw up to `now`, then switch to `watts`.
    /// A reading older than the last update is ignored.
    fn update(&mut self, watts: f64, now: Instant) {
        if now < self.last_update {
            return;
        }
        let hours = (now - self.last_update).as_secs_f64() / 3600.0;
        self.energy_wh += self.current_watts * hours;
        self.current_watts = watts;
        self.last_update = now;
    }
}

/// Result of one sampling pass
#[derive(Debug, Clone, Serialize)]
pub struct PowerSample {
    pub readings: Vec<(String, f64)>,
    pub total_watts: f64,
    pub threshold_watts: u32,
    pub exceeded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceEnergy {
    pub name: String,
    pub watts: f64,
    pub energy_wh: f64,
}

/// Periodic consumption report
#[derive(Debug, Clone, Serialize)]
pub struct PowerReport {
    pub generated_at: DateTime<Utc>,
    pub current_watts: f64,
    pub energy_wh: f64,
    pub breakdown: Vec<DeviceEnergy>,
    pub top_consumers: Vec<String>,
    pub cost_per_kwh: f64,
    pub estimated_cost: f64,
}

impl fmt::Display for PowerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== POWER CONSUMPTION REPORT ===")?;
        writeln!(f, "Time: {}", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "Current Total Power: {:.1} W", self.current_watts)?;
        writeln!(f, "Total Energy Consumed: {:.2} Wh", self.energy_wh)?;
        writeln!(f, "Device Breakdown:")?;
        for device in &self.breakdown {
            writeln!(
                f,
                "  {:<20}: {:>6.1} W (Total: {:.2} Wh)",
                device.name, device.watts, device.energy_wh
            )?;
        }
        if !self.top_consumers.is_empty() {
            writeln!(f, "Top consumers: {}", self.top_consumers.join(", "))?;
        }
        write!(
            f,
            "Estimated Cost: ${:.2} (at ${:.2}/kWh)",
            self.estimated_cost, self.cost_per_kwh
        )
    }
}

/// Summary figures for the shell
#[derive(Debug, Clone, Serialize)]
pub struct PowerStatistics {
    pub current_watts: f64,
    pub threshold_watts: u32,
    pub energy_wh: f64,
    pub active_devices: usize,
}

impl fmt::Display for PowerStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Power Statistics:\n  Current usage: {:.1} W\n  Threshold: {} W\n  Total consumed: {:.2} Wh\n  Active devices: {}",
            self.current_watts, self.threshold_watts, self.energy_wh, self.active_devices
        )
    }
}

/// Outcome of a load-shedding run
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationSummary {
    pub target_watts: u32,
    /// Devices turned off with the power each one saved
    pub turned_off: Vec<(String, f64)>,
    pub final_watts: f64,
}

impl fmt::Display for OptimizationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Optimization complete: Turned off {} devices, current usage: {:.1}W",
            self.turned_off.len(),
            self.final_watts
        )
    }
}

/// Daily hours during which load is shed down to a cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PowerSavingWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    pub max_watts: u32,
}

impl PowerSavingWindow {
    /// A window covering `[start_hour, end_hour)`. An end before the start
    /// wraps past midnight.
    pub fn new(start_hour: u32, end_hour: u32, max_watts: u32) -> Result<Self, MonitoringError> {
        if start_hour > 23 || end_hour > 24 || start_hour == end_hour {
            return Err(MonitoringError::InvalidPowerSavingWindow {
                start_hour,
                end_hour,
            });
        }
        Ok(Self {
            start_hour,
            end_hour,
            max_watts,
        })
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start_hour < self.end_hour {
            (self.start_hour..self.end_hour).contains(&hour)
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

impl fmt::Display for PowerSavingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:00-{:02}:00 capped at {}W",
            self.start_hour, self.end_hour, self.max_watts
        )
    }
}

struct PowerTasks {
    sampler: PeriodicTask,
    reporter: PeriodicTask,
}

/// Resets the in-progress flag when an optimization ends, even by panic
struct OptimizationGuard(Arc<AtomicBool>);

impl Drop for OptimizationGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Estimates power draw and sheds load on request
pub struct PowerMonitoringService {
    devices: Arc<dyn DeviceProvider>,
    event_bus: Option<Arc<EventBus>>,
    config: PowerConfig,
    threshold: AtomicU32,
    metrics: DashMap<String, PowerMetrics>,
    tasks: Mutex<Option<PowerTasks>>,
    saving: Mutex<Option<(PowerSavingWindow, PeriodicTask)>>,
    optimizing: Arc<AtomicBool>,
}

impl PowerMonitoringService {
    pub fn new(
        devices: Arc<dyn DeviceProvider>,
        event_bus: Option<Arc<EventBus>>,
        config: PowerConfig,
    ) -> Self {
        Self {
            devices,
            event_bus,
            threshold: AtomicU32::new(config.threshold_watts),
            config,
            metrics: DashMap::new(),
            tasks: Mutex::new(None),
            saving: Mutex::new(None),
            optimizing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.tasks.lock().is_some()
    }

    pub fn is_optimizing(&self) -> bool {
        self.optimizing.load(Ordering::SeqCst)
    }

    /// Start the sampling and report tasks. Returns `false` if already running.
    pub fn start_monitoring(self: &Arc<Self>) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.is_some() {
            return false;
        }

        let sampler = {
            let service = Arc::clone(self);
            PeriodicTask::spawn(
                "power-sampler",
                self.config.sample_interval,
                Duration::ZERO,
                move || {
                    let service = Arc::clone(&service);
                    async move {
                        service.sample().await;
                    }
                },
            )
        };
        let reporter = {
            let service = Arc::clone(self);
            PeriodicTask::spawn(
                "power-report",
                self.config.report_interval,
                self.config.report_interval,
                move || {
                    let report = service.report();
                    async move {
                        tracing::info!("\n{}", report);
                    }
                },
            )
        };

        *tasks = Some(PowerTasks { sampler, reporter });
        tracing::info!("Power monitoring service started");
        true
    }

    /// Stop both tasks and any power saving schedule. Returns `false` if
    /// none of them was running.
    pub async fn stop_monitoring(&self) -> bool {
        let saving_cancelled = self.cancel_power_saving().await;
        let tasks = self.tasks.lock().take();
        let Some(tasks) = tasks else {
            return saving_cancelled;
        };
        tasks.sampler.shutdown(self.config.shutdown_grace).await;
        tasks.reporter.shutdown(self.config.shutdown_grace).await;
        tracing::info!("Power monitoring service stopped");
        true
    }

    pub fn threshold(&self) -> u32 {
        self.threshold.load(Ordering::SeqCst)
    }

    /// Change the alert threshold. Applies from the next sample.
    pub fn set_power_threshold(&self, watts: u32) {
        self.threshold.store(watts, Ordering::SeqCst);
        tracing::info!("Power threshold set to {}W", watts);
    }

    /// Sample every device once, update energy totals and check the threshold
    pub async fn sample(&self) -> PowerSample {
        let devices = self.devices.devices();

        // Timestamps are taken under the entry lock so concurrent samples
        // apply in order
        let mut readings = Vec::with_capacity(devices.len());
        for device in devices.iter() {
            let snapshot = device.snapshot();
            let watts = estimate_watts(&snapshot);
            let mut metrics = self
                .metrics
                .entry(snapshot.name.clone())
                .or_insert_with(|| PowerMetrics::new(Instant::now()));
            metrics.update(watts, Instant::now());
            drop(metrics);
            readings.push((snapshot.name, watts));
        }

        let live: HashSet<&str> = readings.iter().map(|(name, _)| name.as_str()).collect();
        for mut entry in self.metrics.iter_mut() {
            if !live.contains(entry.key().as_str()) {
                entry.value_mut().update(0.0, Instant::now());
            }
        }

        let total_watts: f64 = readings.iter().map(|(_, watts)| watts).sum();
        let threshold_watts = self.threshold();
        let exceeded = total_watts > f64::from(threshold_watts);

        if exceeded {
            let top = self.top_consumers(&readings);
            tracing::warn!(
                "POWER ALERT: Current usage {:.1}W exceeds threshold {}W",
                total_watts,
                threshold_watts
            );
            if let Some(bus) = &self.event_bus {
                bus.publish(Event::new(
                    EventKind::PowerThresholdExceeded,
                    "PowerMonitor",
                    json!({
                        "currentPower": total_watts,
                        "threshold": threshold_watts,
                        "devices": top,
                    }),
                ))
                .await;
            }
        }

        PowerSample {
            readings,
            total_watts,
            threshold_watts,
            exceeded,
        }
    }

    fn top_consumers(&self, readings: &[(String, f64)]) -> Vec<String> {
        let mut drawing: Vec<&(String, f64)> =
            readings.iter().filter(|(_, watts)| *watts > 0.0).collect();
        drawing.sort_by(|a, b| b.1.total_cmp(&a.1));
        drawing
            .into_iter()
            .take(self.config.top_consumers)
            .map(|(name, watts)| format!("{} ({:.1}W)", name, watts))
            .collect()
    }

    /// Draw estimated from the devices right now, without sampling
    fn estimated_total_watts(&self) -> f64 {
        self.devices
            .devices()
            .iter()
            .map(|d| estimate_watts(&d.snapshot()))
            .sum()
    }

    /// Total draw as of the last sample
    pub fn current_total_watts(&self) -> f64 {
        self.metrics.iter().map(|m| m.current_watts).sum()
    }

    /// Energy integrated across all devices so far
    pub fn total_energy_wh(&self) -> f64 {
        self.metrics.iter().map(|m| m.energy_wh).sum()
    }

    /// Per-device draw as of the last sample
    pub fn device_power_snapshot(&self) -> Vec<(String, f64)> {
        let mut snapshot: Vec<(String, f64)> = self
            .metrics
            .iter()
            .map(|m| (m.key().clone(), m.current_watts))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot
    }

    pub fn statistics(&self) -> PowerStatistics {
        PowerStatistics {
            current_watts: self.current_total_watts(),
            threshold_watts: self.threshold(),
            energy_wh: self.total_energy_wh(),
            active_devices: self.metrics.iter().filter(|m| m.current_watts > 0.0).count(),
        }
    }

    pub fn report(&self) -> PowerReport {
        let mut breakdown: Vec<DeviceEnergy> = self
            .metrics
            .iter()
            .filter(|m| m.current_watts > 0.0)
            .map(|m| DeviceEnergy {
                name: m.key().clone(),
                watts: m.current_watts,
                energy_wh: m.energy_wh,
            })
            .collect();
        breakdown.sort_by(|a, b| b.watts.total_cmp(&a.watts));

        let readings: Vec<(String, f64)> = breakdown
            .iter()
            .map(|d| (d.name.clone(), d.watts))
            .collect();
        let energy_wh = self.total_energy_wh();

        PowerReport {
            generated_at: Utc::now(),
            current_watts: self.current_total_watts(),
            energy_wh,
            top_consumers: self.top_consumers(&readings),
            breakdown,
            cost_per_kwh: self.config.cost_per_kwh,
            estimated_cost: energy_wh / 1000.0 * self.config.cost_per_kwh,
        }
    }

    /// Turn devices off, biggest consumers first, until the estimated draw
    /// is at or below `target_watts`.
    ///
    /// Runs in the background. Fails immediately if an optimization is
    /// already running.
    pub fn optimize_power_usage(
        self: &Arc<Self>,
        target_watts: u32,
    ) -> Result<JoinHandle<OptimizationSummary>, MonitoringError> {
        if self
            .optimizing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MonitoringError::OptimizationInProgress);
        }
        let guard = OptimizationGuard(Arc::clone(&self.optimizing));

        let service = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let _guard = guard;
            service.shed_load(target_watts).await
        }))
    }

    /// Check `window` every `saving_check_interval` against the local
    /// hour, shedding load down to its cap while inside it. Replaces any
    /// earlier schedule.
    pub fn schedule_power_saving(
        self: &Arc<Self>,
        start_hour: u32,
        end_hour: u32,
        max_watts: u32,
    ) -> Result<PowerSavingWindow, MonitoringError> {
        let window = PowerSavingWindow::new(start_hour, end_hour, max_watts)?;

        let service = Arc::clone(self);
        let task = PeriodicTask::spawn(
            "power-saving",
            self.config.saving_check_interval,
            Duration::ZERO,
            move || {
                let run = service.apply_power_saving(window, Local::now().hour());
                async move {
                    if let Some(run) = run {
                        if let Err(e) = run.await {
                            tracing::error!("Power saving run failed: {}", e);
                        }
                    }
                }
            },
        );

        let previous = self.saving.lock().replace((window, task));
        if let Some((_, previous)) = previous {
            previous.cancel();
        }
        tracing::info!("Power saving mode scheduled: {}", window);
        Ok(window)
    }

    pub fn power_saving_window(&self) -> Option<PowerSavingWindow> {
        self.saving.lock().as_ref().map(|(window, _)| *window)
    }

    /// Cancel the power saving schedule. Returns `false` if none was set.
    pub async fn cancel_power_saving(&self) -> bool {
        let saving = self.saving.lock().take();
        let Some((window, task)) = saving else {
            return false;
        };
        task.shutdown(self.config.shutdown_grace).await;
        tracing::info!("Power saving mode cancelled ({})", window);
        true
    }

    /// Start an optimization toward the window's cap if `hour` is inside
    /// `window` and the current draw is above the cap
    pub fn apply_power_saving(
        self: &Arc<Self>,
        window: PowerSavingWindow,
        hour: u32,
    ) -> Option<JoinHandle<OptimizationSummary>> {
        if !window.contains(hour) {
            return None;
        }
        let current = self.estimated_total_watts();
        if current <= f64::from(window.max_watts) {
            return None;
        }

        tracing::info!(
            "Power saving mode active (hour {}): {:.1}W above {}W",
            hour,
            current,
            window.max_watts
        );
        match self.optimize_power_usage(window.max_watts) {
            Ok(run) => Some(run),
            Err(e) => {
                tracing::debug!("Power saving skipped: {}", e);
                None
            }
        }
    }

    async fn shed_load(&self, target_watts: u32) -> OptimizationSummary {
        tracing::info!("Starting power optimization to reach {}W", target_watts);
        let target = f64::from(target_watts);

        let mut candidates: Vec<(Arc<Device>, f64)> = self
            .devices
            .devices()
            .iter()
            .filter(|d| d.is_on())
            .map(|d| (Arc::clone(d), estimate_watts(&d.snapshot())))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut current: f64 = candidates.iter().map(|(_, watts)| watts).sum();
        let mut turned_off = Vec::new();

        for (device, watts) in candidates {
            if current <= target {
                break;
            }
            if !turned_off.is_empty() {
                tokio::time::sleep(self.config.optimization_pacing).await;
            }
            if !device.turn_off().await {
                // Someone else already turned it off
                current -= watts;
                continue;
            }

            current -= watts;
            tracing::info!("Turned off {} (saved {:.1}W)", device.name(), watts);
            if let Some(bus) = &self.event_bus {
                bus.publish(Event::new(
                    EventKind::DeviceStateChanged,
                    "PowerOptimizer",
                    json!({
                        "device": device.name(),
                        "reason": "Power optimization",
                        "powerSaved": watts,
                    }),
                ))
                .await;
            }
            turned_off.push((device.name().to_string(), watts));
        }

        let summary = OptimizationSummary {
            target_watts,
            turned_off,
            final_watts: current.max(0.0),
        };
        tracing::info!("{}", summary);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_core::{DeviceKind, DeviceRegistry};

    async fn busy_home(bus: Option<Arc<EventBus>>) -> Arc<DeviceRegistry> {
        let registry = Arc::new(DeviceRegistry::new(bus));
        let lamp = registry.create("Lamp", DeviceKind::Light).unwrap();
        let thermostat = registry.create("Main", DeviceKind::Thermostat).unwrap();
        let camera = registry.create("Gate", DeviceKind::SecurityCamera).unwrap();
        lamp.turn_on().await;
        thermostat.turn_on().await;
        camera.turn_on().await;
        registry
    }

    fn service(registry: Arc<DeviceRegistry>, bus: Option<Arc<EventBus>>) -> Arc<PowerMonitoringService> {
        Arc::new(PowerMonitoringService::new(registry, bus, PowerConfig::default()))
    }

    #[tokio::test]
    async fn test_estimates() {
        let lamp = Device::light("Lamp").unwrap();
        assert_eq!(estimate_watts(&lamp.snapshot()), 0.0);
        lamp.turn_on().await;
        assert_eq!(estimate_watts(&lamp.snapshot()), 60.0);
        lamp.set_brightness(50).await.unwrap();
        assert_eq!(estimate_watts(&lamp.snapshot()), 35.0);

        let thermostat = Device::thermostat("Main").unwrap();
        thermostat.turn_on().await;
        assert_eq!(estimate_watts(&thermostat.snapshot()), 50.0);
        thermostat.set_temperature(25).await.unwrap();
        assert_eq!(estimate_watts(&thermostat.snapshot()), 150.0);

        let camera = Device::camera("Gate").unwrap();
        camera.turn_on().await;
        assert_eq!(estimate_watts(&camera.snapshot()), 15.0);
        camera.stop_recording().await.unwrap();
        assert_eq!(estimate_watts(&camera.snapshot()), 5.0);
    }

    #[tokio::test]
    async fn test_total_matches_sum_of_devices() {
        let registry = busy_home(None).await;
        let power = service(registry, None);

        let sample = power.sample().await;
        let sum: f64 = sample.readings.iter().map(|(_, w)| w).sum();
        assert!((sample.total_watts - sum).abs() < 1e-9);
        assert!((sample.total_watts - 125.0).abs() < 1e-9);
        assert!((power.current_total_watts() - sum).abs() < 1e-9);
        assert!(!sample.exceeded);
        assert_eq!(power.statistics().active_devices, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_energy_integration_and_removed_devices() {
        let registry = Arc::new(DeviceRegistry::default());
        let lamp = registry.create("Lamp", DeviceKind::Light).unwrap();
        lamp.turn_on().await;
        let power = service(Arc::clone(&registry), None);

        power.sample().await;
        tokio::time::advance(Duration::from_secs(3600)).await;
        power.sample().await;
        assert!((power.total_energy_wh() - 60.0).abs() < 1e-6);

        registry.remove("Lamp").unwrap();
        tokio::time::advance(Duration::from_secs(1800)).await;
        power.sample().await;
        assert!((power.total_energy_wh() - 90.0).abs() < 1e-6);
        assert_eq!(power.current_total_watts(), 0.0);
        assert_eq!(power.device_power_snapshot(), vec![("Lamp".to_string(), 0.0)]);

        let report = power.report();
        assert!((report.estimated_cost - 0.09 * 0.12).abs() < 1e-9);
        assert!(report.to_string().contains("Estimated Cost: $0.01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_event_names_top_devices() {
        let bus = Arc::new(EventBus::default());
        let registry = busy_home(None).await;
        let power = service(registry, Some(Arc::clone(&bus)));
        power.set_power_threshold(100);

        let sample = power.sample().await;
        assert!(sample.exceeded);
        assert_eq!(bus.stats().per_kind.get("POWER_THRESHOLD_EXCEEDED"), Some(&1));

        power.set_power_threshold(500);
        assert!(!power.sample().await.exceeded);
        assert_eq!(
            power.top_consumers(&sample.readings),
            vec!["Lamp (60.0W)", "Main (50.0W)", "Gate (15.0W)"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_optimize_turns_off_biggest_first() {
        let registry = busy_home(None).await;
        let power = service(Arc::clone(&registry), None);

        let summary = power.optimize_power_usage(70).unwrap().await.unwrap();
        assert_eq!(summary.turned_off, vec![("Lamp".to_string(), 60.0)]);
        assert!((summary.final_watts - 65.0).abs() < 1e-9);
        assert!(!registry.get("Lamp").unwrap().is_on());
        assert!(registry.get("Main").unwrap().is_on());
        assert_eq!(
            summary.to_string(),
            "Optimization complete: Turned off 1 devices, current usage: 65.0W"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_optimization_is_rejected() {
        let registry = busy_home(None).await;
        let power = service(Arc::clone(&registry), None);

        let first = power.optimize_power_usage(0).unwrap();
        assert_eq!(
            power.optimize_power_usage(0).unwrap_err(),
            MonitoringError::OptimizationInProgress
        );
        let summary = first.await.unwrap();
        assert_eq!(summary.turned_off.len(), 3);
        assert!(!power.is_optimizing());
        assert!(power.optimize_power_usage(0).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_update_keeps_last_timestamp() {
        let start = Instant::now();
        let mut metrics = PowerMetrics::new(start);
        metrics.update(60.0, start);

        tokio::time::advance(Duration::from_secs(1800)).await;
        let later = Instant::now();
        metrics.update(60.0, later);
        metrics.update(60.0, start);
        assert_eq!(metrics.last_update, later);

        tokio::time::advance(Duration::from_secs(1800)).await;
        metrics.update(0.0, Instant::now());
        assert!((metrics.energy_wh - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_power_saving_window_hours() {
        let night = PowerSavingWindow::new(22, 6, 100).unwrap();
        assert!(night.contains(22));
        assert!(night.contains(0));
        assert!(night.contains(5));
        assert!(!night.contains(6));
        assert!(!night.contains(12));

        let office = PowerSavingWindow::new(9, 17, 100).unwrap();
        assert!(office.contains(9));
        assert!(office.contains(16));
        assert!(!office.contains(17));
        assert!(!office.contains(8));
        assert_eq!(office.to_string(), "09:00-17:00 capped at 100W");

        assert!(PowerSavingWindow::new(0, 24, 0).unwrap().contains(23));
        assert!(PowerSavingWindow::new(5, 5, 100).is_err());
        assert!(PowerSavingWindow::new(24, 2, 100).is_err());
        assert!(PowerSavingWindow::new(1, 25, 100).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_saving_sheds_only_inside_window() {
        let registry = busy_home(None).await;
        let power = service(Arc::clone(&registry), None);
        let window = PowerSavingWindow::new(9, 17, 70).unwrap();

        assert!(power.apply_power_saving(window, 20).is_none());
        assert!(power.apply_power_saving(window, 8).is_none());
        assert!(registry.devices().iter().all(|d| d.is_on()));

        let summary = power.apply_power_saving(window, 12).unwrap().await.unwrap();
        assert_eq!(summary.turned_off, vec![("Lamp".to_string(), 60.0)]);
        assert!(!registry.get("Lamp").unwrap().is_on());

        // Already under the cap
        assert!(power.apply_power_saving(window, 12).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_power_saving_runs_and_stops() {
        let registry = busy_home(None).await;
        let power = service(Arc::clone(&registry), None);

        assert_eq!(
            power.schedule_power_saving(3, 3, 70).unwrap_err(),
            MonitoringError::InvalidPowerSavingWindow {
                start_hour: 3,
                end_hour: 3
            }
        );
        let window = power.schedule_power_saving(0, 24, 70).unwrap();
        assert_eq!(power.power_saving_window(), Some(window));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!registry.get("Lamp").unwrap().is_on());
        assert!(registry.get("Main").unwrap().is_on());

        assert!(power.stop_monitoring().await);
        assert_eq!(power.power_saving_window(), None);
        assert!(!power.stop_monitoring().await);
        assert!(!power.cancel_power_saving().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_lifecycle_publishes_threshold_events() {
        let bus = Arc::new(EventBus::default());
        let registry = Arc::new(DeviceRegistry::default());
        let power = service(Arc::clone(&registry), Some(Arc::clone(&bus)));
        power.set_power_threshold(1);

        assert!(power.start_monitoring());
        assert!(!power.start_monitoring());
        registry
            .create("Lamp", DeviceKind::Light)
            .unwrap()
            .turn_on()
            .await;

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(bus.stats().per_kind.get("POWER_THRESHOLD_EXCEEDED").is_some());

        assert!(power.stop_monitoring().await);
        assert!(!power.stop_monitoring().await);
    }
}
