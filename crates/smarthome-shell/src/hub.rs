//! Wiring of the event bus, device registry and background services

use crate::config::Config;
use automation_engine::{AutomationEngine, RuleSpec};
use device_core::{DeviceError, DeviceProvider, DeviceRegistry};
use home_monitoring::{DeviceMonitor, PowerMonitoringService};
use home_runtime::{AlertListener, EventBus, LoggingListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Every component of a running home, shared by the shell commands
pub struct SmartHome {
    pub(crate) bus: Arc<EventBus>,
    pub(crate) registry: Arc<DeviceRegistry>,
    pub(crate) engine: Arc<AutomationEngine>,
    pub(crate) monitor: Arc<DeviceMonitor>,
    pub(crate) power: Arc<PowerMonitoringService>,
    pub(crate) default_rules: Vec<RuleSpec>,
    pub(crate) defaults_installed: AtomicBool,
}

impl SmartHome {
    /// Build all components from `config`. Nothing is started yet.
    pub fn new(config: &Config) -> Self {
        let bus = Arc::new(EventBus::new(config.event_bus_config()));
        let registry = Arc::new(DeviceRegistry::new(Some(Arc::clone(&bus))));
        let devices = Arc::clone(&registry) as Arc<dyn DeviceProvider>;

        let engine = Arc::new(AutomationEngine::new(
            Arc::clone(&devices),
            Some(Arc::clone(&bus)),
            config.automation_config(),
        ));
        let monitor = Arc::new(DeviceMonitor::new(
            Arc::clone(&devices),
            config.monitor_config(),
        ));
        let power = Arc::new(PowerMonitoringService::new(
            devices,
            Some(Arc::clone(&bus)),
            config.power_config(),
        ));

        Self {
            bus,
            registry,
            engine,
            monitor,
            power,
            default_rules: config.automation.default_rules.clone(),
            defaults_installed: AtomicBool::new(false),
        }
    }

    /// Build the home, register listeners, create the configured devices
    /// and start the event bus if requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the standard devices cannot be created.
    pub fn launch(config: &Config) -> Result<Self, DeviceError> {
        let home = Self::new(config);
        home.install_default_listeners();
        if config.home.standard_setup {
            let created = home.registry.create_standard_home(&config.home.prefix)?;
            tracing::info!("Created {} standard devices", created.len());
        }
        if config.events.autostart {
            home.bus.start();
        }
        Ok(home)
    }

    /// Log every event and raise warnings for alert events
    pub fn install_default_listeners(&self) {
        self.bus.subscribe_all(Arc::new(LoggingListener::default()));
        self.bus.subscribe_all(Arc::new(AlertListener));
    }

    /// Register the configured default rules. Runs once per home.
    pub(crate) fn install_default_rules(&self) -> usize {
        if self.defaults_installed.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let mut installed = 0;
        for spec in &self.default_rules {
            match self.engine.add_rule_spec(spec) {
                Ok(_) => installed += 1,
                Err(e) => tracing::warn!("Skipping default rule {}: {}", spec.name(), e),
            }
        }
        installed
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<AutomationEngine> {
        &self.engine
    }

    pub fn monitor(&self) -> &Arc<DeviceMonitor> {
        &self.monitor
    }

    pub fn power(&self) -> &Arc<PowerMonitoringService> {
        &self.power
    }

    /// Stop every background service, then the event bus
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down smart home services");
        self.engine.stop().await;
        self.monitor.stop_monitoring().await;
        self.power.stop_monitoring().await;
        self.bus.stop().await;
        tracing::info!("All services stopped");
    }
}
