//! Line-oriented command protocol
//!
//! Each line is split on whitespace and routed by its first word. Every
//! command produces a human readable reply; failures are rendered as
//! `Error: ...`.

use crate::hub::SmartHome;
use automation_engine::{AutomationError, RuleSpec};
use device_core::{Device, DeviceCommand, DeviceError, DeviceKind, DeviceProvider};
use home_monitoring::MonitoringError;
use home_runtime::{Event, EventKind};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use std::fmt::Write;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;

const SOURCE: &str = "Shell";

pub const HELP: &str = "\
Devices:
  add <light|thermostat|camera> <name>   Register a device
  add light <name> <brightness>          Register a light at a brightness
  add camera <name> autostart            Register a camera already recording
  add <name:type> [name:type...]         Register several devices
  remove <name>                          Remove a device
  list                                   List devices
  status [name]                          Device or system status
  on|off|toggle <name>                   Switch a device
  set <name> <command> [value]           brightness, temperature, record, stop, motion
Events:
  events start|stop|stats|clear
Monitoring:
  monitor start|stop
  monitor stats <device>
Automation:
  automate start|stop|status|run
  automate add temperature <name> <target> <tolerance>
  automate add security <name> [cooldown-secs]
  automate add time <name> <HH:MM> <device> <command> [value]
  automate enable|disable <rule>
Power:
  power monitor start|stop
  power threshold <watts>
  power optimize <watts>
  power saving <start-hour> <end-hour> <watts>
  power saving off
  power stats|report
Simulation:
  simulate motion [camera]
  simulate malfunction <device>
  simulate temperature
  concurrent control on|off|random
Other:
  services                               Background service status
  help                                   Show this help
  exit                                   Stop all services and quit";

/// Errors reported back to the shell user
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Unknown command: {0}. Type 'help' for available commands")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("No {0} available")]
    NoDevice(&'static str),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error(transparent)]
    Monitoring(#[from] MonitoringError),
}

/// Whether `line` asks the shell to quit
pub fn is_exit(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "exit" | "quit")
}

fn parse_watts(value: &str) -> Result<u32, CommandError> {
    value
        .parse()
        .map_err(|_| CommandError::InvalidNumber(value.to_string()))
}

fn started(started: bool, name: &str) -> String {
    if started {
        format!("{} started", name)
    } else {
        format!("{} is already running", name)
    }
}

fn stopped(stopped: bool, name: &str) -> String {
    if stopped {
        format!("{} stopped", name)
    } else {
        format!("{} is not running", name)
    }
}

fn running(running: bool) -> &'static str {
    if running {
        "running"
    } else {
        "stopped"
    }
}

#[derive(Debug, Clone, Copy)]
enum ControlMode {
    On,
    Off,
    Random,
}

impl SmartHome {
    /// Run one command line and return the reply
    pub async fn execute(&self, line: &str) -> String {
        match self.dispatch(line).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!("Command failed: {}: {}", line.trim(), e);
                format!("Error: {}", e)
            }
        }
    }

    async fn dispatch(&self, line: &str) -> Result<String, CommandError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((command, args)) = words.split_first() else {
            return Ok(String::new());
        };

        let command = command.to_ascii_lowercase();
        match command.as_str() {
            "help" => Ok(HELP.to_string()),
            "exit" | "quit" => Ok("Shutting down...".to_string()),
            "add" => self.add_device(args).await,
            "remove" => match args {
                [name] => {
                    let device = self.registry.remove(name)?;
                    Ok(format!("Removed {}", device.name()))
                }
                _ => Err(CommandError::Usage("remove <name>")),
            },
            "list" => Ok(self.list_devices()),
            "status" => match args {
                [] => Ok(format!("{}\n{}", self.list_devices(), self.services())),
                [name] => Ok(self.registry.get(name)?.status()),
                _ => Err(CommandError::Usage("status [name]")),
            },
            "on" | "off" | "toggle" => match args {
                [name] => self.device_command(&command, name, None).await,
                _ => Err(CommandError::Usage("on|off|toggle <name>")),
            },
            "set" => match args {
                [name, cmd] => self.device_command(cmd, name, None).await,
                [name, cmd, value] => self.device_command(cmd, name, Some(*value)).await,
                _ => Err(CommandError::Usage("set <name> <command> [value]")),
            },
            "events" => self.events(args).await,
            "monitor" => self.monitor_command(args).await,
            "automate" => self.automate(args).await,
            "power" => self.power_command(args).await,
            "simulate" => self.simulate(args).await,
            "concurrent" => self.concurrent(args).await,
            "services" => Ok(self.services()),
            _ => Err(CommandError::Unknown(command)),
        }
    }

    async fn add_device(&self, args: &[&str]) -> Result<String, CommandError> {
        const USAGE: &str = "add <light|thermostat|camera> <name> [brightness|autostart]";

        if !args.is_empty() && args.iter().all(|arg| arg.contains(':')) {
            return Ok(self.add_devices(args));
        }

        let device = match args {
            [kind, name] => self.registry.create(name, kind.parse()?)?,
            [kind, name, option] => match kind.parse::<DeviceKind>()? {
                DeviceKind::Light => {
                    let brightness = option
                        .parse()
                        .map_err(|_| CommandError::InvalidNumber(option.to_string()))?;
                    self.registry.create_light(name, brightness).await?
                }
                DeviceKind::SecurityCamera if option.eq_ignore_ascii_case("autostart") => {
                    self.registry.create_camera(name, true).await?
                }
                _ => return Err(CommandError::Usage(USAGE)),
            },
            _ => return Err(CommandError::Usage(USAGE)),
        };
        Ok(format!("Added {} {}", device.kind(), device.name()))
    }

    /// Create devices from `name:type` entries, reporting each one
    fn add_devices(&self, specs: &[&str]) -> String {
        let results = self.registry.create_many(specs);
        let added = results.iter().filter(|r| r.is_ok()).count();
        let mut out = format!("Added {} of {} devices", added, specs.len());
        for (spec, result) in specs.iter().zip(results) {
            match result {
                Ok(device) => {
                    let _ = write!(out, "\n  {} {}", device.kind(), device.name());
                }
                Err(e) => {
                    let _ = write!(out, "\n  {}: {}", spec, e);
                }
            }
        }
        out
    }

    fn list_devices(&self) -> String {
        let devices = self.registry.devices();
        if devices.is_empty() {
            return "No devices registered".to_string();
        }
        let mut out = format!("Devices ({}):", devices.len());
        for device in devices.iter() {
            let _ = write!(out, "\n  {}", device.status());
        }
        out
    }

    /// Run a device command and record it on the bus
    async fn device_command(
        &self,
        command: &str,
        name: &str,
        value: Option<&str>,
    ) -> Result<String, CommandError> {
        let reply = self.registry.apply(command, name, value).await?;
        self.bus
            .publish(Event::new(
                EventKind::UserCommand,
                SOURCE,
                json!({
                    "command": command,
                    "device": name,
                    "value": value,
                }),
            ))
            .await;
        Ok(reply)
    }

    async fn events(&self, args: &[&str]) -> Result<String, CommandError> {
        match args {
            ["start"] => Ok(started(self.bus.start(), "Event system")),
            ["stop"] => Ok(stopped(self.bus.stop().await, "Event system")),
            ["stats"] => Ok(self.bus.stats().to_string()),
            ["clear"] => {
                self.bus.clear_stats();
                Ok("Event statistics cleared".to_string())
            }
            _ => Err(CommandError::Usage("events start|stop|stats|clear")),
        }
    }

    async fn monitor_command(&self, args: &[&str]) -> Result<String, CommandError> {
        match args {
            ["start"] => Ok(started(self.monitor.start_monitoring(), "Device monitor")),
            ["stop"] => Ok(stopped(
                self.monitor.stop_monitoring().await,
                "Device monitor",
            )),
            ["stats", name] => {
                let device = self.registry.get(name)?;
                self.monitor
                    .device_stats(device.name())
                    .map(|stats| stats.to_string())
                    .ok_or_else(|| DeviceError::NotFound(name.to_string()).into())
            }
            _ => Err(CommandError::Usage("monitor start|stop|stats <device>")),
        }
    }

    async fn automate(&self, args: &[&str]) -> Result<String, CommandError> {
        let Some((sub, rest)) = args.split_first() else {
            return Err(CommandError::Usage(
                "automate start|stop|status|run|add <rule>|enable <rule>|disable <rule>",
            ));
        };

        match (sub.to_ascii_lowercase().as_str(), rest) {
            ("start", []) => {
                let installed = self.install_default_rules();
                if !self.engine.start() {
                    return Ok("Automation engine is already running".to_string());
                }
                let mut reply = format!(
                    "Automation engine started with {} rules",
                    self.engine.rule_count()
                );
                if installed > 0 {
                    let _ = write!(reply, " ({} default rules installed)", installed);
                }
                Ok(reply)
            }
            ("stop", []) => Ok(stopped(self.engine.stop().await, "Automation engine")),
            ("status", []) => Ok(self.engine.status()),
            ("run", []) => {
                let report = self.engine.run_cycle().await;
                Ok(format!(
                    "Cycle complete: {} evaluated, {} executed, {} applied, {} failed, {} timed out",
                    report.evaluated,
                    report.executed,
                    report.applied,
                    report.failed,
                    report.timed_out
                ))
            }
            ("add", spec) => {
                let spec = RuleSpec::parse(spec)?;
                let rule = self.engine.add_rule_spec(&spec)?;
                Ok(format!("Added rule {}: {}", rule.name(), rule.describe()))
            }
            ("enable" | "disable", name) if !name.is_empty() => {
                let enabled = sub.eq_ignore_ascii_case("enable");
                let name = name.join(" ");
                self.engine.set_rule_enabled(&name, enabled)?;
                Ok(format!(
                    "Rule {} {}",
                    name,
                    if enabled { "enabled" } else { "disabled" }
                ))
            }
            _ => Err(CommandError::Usage(
                "automate start|stop|status|run|add <rule>|enable <rule>|disable <rule>",
            )),
        }
    }

    async fn power_command(&self, args: &[&str]) -> Result<String, CommandError> {
        match args {
            ["monitor", "start"] => Ok(started(self.power.start_monitoring(), "Power monitoring")),
            ["monitor", "stop"] => Ok(stopped(
                self.power.stop_monitoring().await,
                "Power monitoring",
            )),
            ["threshold", watts] => {
                let watts = parse_watts(watts)?;
                self.power.set_power_threshold(watts);
                Ok(format!("Power threshold set to {}W", watts))
            }
            ["optimize", watts] => {
                let watts = parse_watts(watts)?;
                // The run reports its own summary when it finishes
                let _run = self.power.optimize_power_usage(watts)?;
                Ok(format!("Optimizing power usage toward {}W", watts))
            }
            ["saving", "off"] => {
                if self.power.cancel_power_saving().await {
                    Ok("Power saving mode cancelled".to_string())
                } else {
                    Ok("Power saving mode is not scheduled".to_string())
                }
            }
            ["saving", start, end, watts] => {
                let start = start
                    .parse()
                    .map_err(|_| CommandError::InvalidNumber(start.to_string()))?;
                let end = end
                    .parse()
                    .map_err(|_| CommandError::InvalidNumber(end.to_string()))?;
                let window = self
                    .power
                    .schedule_power_saving(start, end, parse_watts(watts)?)?;
                Ok(format!("Power saving mode scheduled: {}", window))
            }
            ["stats"] => {
                self.refresh_power().await;
                Ok(self.power.statistics().to_string())
            }
            ["report"] => {
                self.refresh_power().await;
                Ok(self.power.report().to_string())
            }
            _ => Err(CommandError::Usage(
                "power monitor start|stop|threshold <watts>|optimize <watts>|saving <start> <end> <watts>|saving off|stats|report",
            )),
        }
    }

    /// Take a sample when the periodic sampler is not running
    async fn refresh_power(&self) {
        if !self.power.is_monitoring() {
            self.power.sample().await;
        }
    }

    async fn simulate(&self, args: &[&str]) -> Result<String, CommandError> {
        match args {
            ["motion"] => {
                let camera = self.pick_camera()?;
                Ok(DeviceCommand::DetectMotion.apply(&camera).await?)
            }
            ["motion", name] => {
                let camera = self.registry.get(name)?;
                Ok(DeviceCommand::DetectMotion.apply(&camera).await?)
            }
            ["malfunction", name] => {
                let device = self.registry.get(name)?;
                device.report_malfunction("Simulated malfunction").await;
                Ok(format!("Simulated malfunction on {}", device.name()))
            }
            ["temperature"] => self.simulate_temperature(),
            _ => Err(CommandError::Usage(
                "simulate motion [camera]|malfunction <device>|temperature",
            )),
        }
    }

    /// A random powered camera, or the first camera if none is on
    fn pick_camera(&self) -> Result<Arc<Device>, CommandError> {
        let cameras: Vec<Arc<Device>> = self
            .registry
            .devices()
            .iter()
            .filter(|d| d.kind() == DeviceKind::SecurityCamera)
            .cloned()
            .collect();
        let powered: Vec<&Arc<Device>> = cameras.iter().filter(|d| d.is_on()).collect();

        powered
            .choose(&mut rand::thread_rng())
            .map(|camera| Arc::clone(*camera))
            .or_else(|| cameras.first().cloned())
            .ok_or(CommandError::NoDevice("security camera"))
    }

    fn simulate_temperature(&self) -> Result<String, CommandError> {
        let thermostats: Vec<Arc<Device>> = self
            .registry
            .devices()
            .iter()
            .filter(|d| d.kind() == DeviceKind::Thermostat)
            .cloned()
            .collect();
        if thermostats.is_empty() {
            return Err(CommandError::NoDevice("thermostat"));
        }

        let mut rng = rand::thread_rng();
        let mut out = String::from("Temperature simulation:");
        for thermostat in &thermostats {
            let line = match thermostat.drift_temperature(rng.gen_range(-1..=1))? {
                Some(temperature) => format!("{}: now {}°C", thermostat.name(), temperature),
                None => format!(
                    "{}: unchanged at {}°C",
                    thermostat.name(),
                    thermostat.temperature()?
                ),
            };
            let _ = write!(out, "\n  {}", line);
        }
        Ok(out)
    }

    async fn concurrent(&self, args: &[&str]) -> Result<String, CommandError> {
        let mode = match args {
            ["control", mode] => match mode.to_ascii_lowercase().as_str() {
                "on" => ControlMode::On,
                "off" => ControlMode::Off,
                "random" => ControlMode::Random,
                _ => return Err(CommandError::Usage("concurrent control on|off|random")),
            },
            _ => return Err(CommandError::Usage("concurrent control on|off|random")),
        };

        let devices = self.registry.devices();
        let targets: Vec<(Arc<Device>, bool)> = {
            let mut rng = rand::thread_rng();
            devices
                .iter()
                .map(|device| {
                    let on = match mode {
                        ControlMode::On => true,
                        ControlMode::Off => false,
                        ControlMode::Random => rng.gen_bool(0.5),
                    };
                    (Arc::clone(device), on)
                })
                .collect()
        };

        let mut tasks = JoinSet::new();
        for (device, on) in targets {
            tasks.spawn(async move {
                if on {
                    device.turn_on().await
                } else {
                    device.turn_off().await
                }
            });
        }

        let mut changed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Concurrent device task failed: {}", e),
            }
        }

        Ok(format!(
            "Concurrent control complete: {} of {} devices changed state",
            changed,
            devices.len()
        ))
    }

    fn services(&self) -> String {
        let stats = self.bus.stats();
        let mut out = format!(
            "Services:\n  Event system: {} ({} queued, {} listeners)\n  Automation engine: {} ({} rules)\n  Device monitor: {}\n  Power monitoring: {} (threshold {}W)",
            running(stats.running),
            stats.queue_len,
            stats.listeners,
            running(self.engine.is_running()),
            self.engine.rule_count(),
            running(self.monitor.is_running()),
            running(self.power.is_monitoring()),
            self.power.threshold()
        );
        if let Some(window) = self.power.power_saving_window() {
            let _ = write!(out, "\n  Power saving: {}", window);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn empty_home() -> SmartHome {
        let mut config = Config::default();
        config.home.standard_setup = false;
        config.events.autostart = false;
        SmartHome::launch(&config).unwrap()
    }

    #[tokio::test]
    async fn test_device_lifecycle_commands() {
        let home = empty_home();
        assert_eq!(home.execute("list").await, "No devices registered");
        assert_eq!(home.execute("add light Lamp").await, "Added Light Lamp");
        assert_eq!(
            home.execute("add light lamp").await,
            "Error: Device already exists: lamp"
        );
        assert_eq!(home.execute("on Lamp").await, "Lamp turned ON");
        assert_eq!(home.execute("on Lamp").await, "Lamp is already ON");
        assert_eq!(
            home.execute("set Lamp brightness 40").await,
            "Lamp brightness set to 40%"
        );
        assert_eq!(
            home.execute("set Lamp brightness 101").await,
            "Error: Brightness must be between 0 and 100, got 101"
        );
        assert_eq!(home.execute("status Lamp").await, "Lamp [Light] ON, Brightness: 40%");
        assert_eq!(home.execute("remove Lamp").await, "Removed Lamp");
        assert_eq!(home.execute("status Lamp").await, "Error: Device not found: Lamp");
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let home = empty_home();
        assert_eq!(home.execute("   ").await, "");
        assert_eq!(
            home.execute("dance").await,
            "Error: Unknown command: dance. Type 'help' for available commands"
        );
        assert_eq!(
            home.execute("add toaster T1").await,
            "Error: Unknown device type: toaster"
        );
        assert_eq!(home.execute("on").await, "Error: Usage: on|off|toggle <name>");
        assert_eq!(
            home.execute("power threshold lots").await,
            "Error: Invalid number: lots"
        );
        assert_eq!(
            home.execute("simulate temperature").await,
            "Error: No thermostat available"
        );
        assert!(home.execute("automate add time Dim 25:00 Lamp on").await.starts_with("Error:"));
        assert!(is_exit(" EXIT "));
        assert!(!is_exit("exit now"));
    }

    #[tokio::test]
    async fn test_user_commands_are_published() {
        let home = empty_home();
        home.execute("add camera Gate").await;
        home.execute("toggle Gate").await;
        home.execute("set Gate stop").await;

        let stats = home.event_bus().stats();
        assert_eq!(stats.per_kind.get("USER_COMMAND"), Some(&2));
        assert!(!home.registry().get("Gate").unwrap().is_recording().unwrap());
    }

    #[tokio::test]
    async fn test_automate_installs_defaults_once() {
        let home = empty_home();
        let reply = home.execute("automate start").await;
        assert_eq!(
            reply,
            "Automation engine started with 2 rules (2 default rules installed)"
        );
        assert_eq!(
            home.execute("automate start").await,
            "Automation engine is already running"
        );
        assert_eq!(home.execute("automate stop").await, "Automation engine stopped");
        assert_eq!(
            home.execute("automate start").await,
            "Automation engine started with 2 rules"
        );
        assert_eq!(
            home.execute("automate disable comfort maintenance").await,
            "Rule comfort maintenance disabled"
        );
        assert!(home.execute("automate status").await.contains("[disabled]"));
        home.shutdown().await;
    }

    #[tokio::test]
    async fn test_add_with_options_and_batches() {
        let home = empty_home();
        assert_eq!(home.execute("add light Desk 30").await, "Added Light Desk");
        assert_eq!(home.registry().get("Desk").unwrap().brightness().unwrap(), 30);
        assert_eq!(
            home.execute("add light Spot bright").await,
            "Error: Invalid number: bright"
        );
        assert_eq!(
            home.execute("add camera Gate autostart").await,
            "Added SecurityCamera Gate"
        );
        assert!(home.registry().get("Gate").unwrap().is_recording().unwrap());
        assert!(home.execute("add thermostat Main 22").await.starts_with("Error: Usage:"));

        assert_eq!(
            home.execute("add Hall:light Main:thermostat desk:light").await,
            "Added 2 of 3 devices\n  Light Hall\n  Thermostat Main\n  desk:light: Device already exists: desk"
        );
        assert_eq!(home.registry().len(), 4);
    }

    #[tokio::test]
    async fn test_events_clear_and_power_saving() {
        let home = empty_home();
        home.execute("add light Lamp").await;
        home.execute("on Lamp").await;
        assert_eq!(home.event_bus().stats().per_kind.get("USER_COMMAND"), Some(&1));
        assert_eq!(home.execute("events clear").await, "Event statistics cleared");
        assert_eq!(home.event_bus().stats().published, 0);

        assert_eq!(
            home.execute("power saving 22 6 100").await,
            "Power saving mode scheduled: 22:00-06:00 capped at 100W"
        );
        assert!(home
            .execute("services")
            .await
            .ends_with("Power saving: 22:00-06:00 capped at 100W"));
        assert!(home
            .execute("power saving 5 5 100")
            .await
            .starts_with("Error: Invalid power saving window"));
        assert_eq!(home.execute("power saving off").await, "Power saving mode cancelled");
        assert_eq!(
            home.execute("power saving off").await,
            "Power saving mode is not scheduled"
        );
    }

    #[tokio::test]
    async fn test_concurrent_control() {
        let home = empty_home();
        home.registry().create_standard_home("").unwrap();

        assert_eq!(
            home.execute("concurrent control on").await,
            "Concurrent control complete: 6 of 6 devices changed state"
        );
        assert!(home.registry().devices().iter().all(|d| d.is_on()));
        assert_eq!(
            home.execute("concurrent control on").await,
            "Concurrent control complete: 0 of 6 devices changed state"
        );
        home.execute("concurrent control random").await;
        assert_eq!(
            home.execute("concurrent control sideways").await,
            "Error: Usage: concurrent control on|off|random"
        );
    }

    #[tokio::test]
    async fn test_simulations() {
        let home = empty_home();
        assert_eq!(
            home.execute("simulate motion").await,
            "Error: No security camera available"
        );
        home.execute("add camera Gate").await;
        assert_eq!(home.execute("simulate motion").await, "Error: Gate is off");
        home.execute("on Gate").await;
        assert_eq!(home.execute("simulate motion").await, "Motion detected by Gate");

        home.execute("add thermostat Main").await;
        home.execute("on Main").await;
        let reply = home.execute("simulate temperature").await;
        assert!(reply.starts_with("Temperature simulation:\n  Main: "));

        assert_eq!(
            home.execute("simulate malfunction Main").await,
            "Simulated malfunction on Main"
        );
        assert_eq!(
            home.event_bus().stats().per_kind.get("DEVICE_MALFUNCTION"),
            Some(&1)
        );
    }
}
