//! Core automation engine
//!
//! Rules are evaluated on a fixed period. Each cycle takes one snapshot of
//! the device set, runs every due rule concurrently and waits for them up to
//! the rule timeout. A failing, panicking or slow rule never holds back the
//! others.

use crate::error::AutomationError;
use crate::model::{BuiltRule, RuleSpec};
use crate::rule::{Rule, RuleInfo, RuleOutcome};
use device_core::DeviceProvider;
use home_runtime::{Event, EventBus, EventKind, PeriodicTask};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Engine timing
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Time between evaluation cycles
    pub interval: Duration,
    /// How long a cycle waits for its rules
    pub rule_timeout: Duration,
    /// How long `stop` waits for the evaluation task
    pub shutdown_grace: Duration,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            rule_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// What happened during one evaluation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Rules registered at the start of the cycle
    pub evaluated: usize,
    /// Rules whose `should_execute` passed
    pub executed: usize,
    pub applied: usize,
    pub failed: usize,
    pub timed_out: usize,
}

/// The main automation engine
pub struct AutomationEngine {
    devices: Arc<dyn DeviceProvider>,
    event_bus: Option<Arc<EventBus>>,
    rules: RwLock<Vec<Arc<dyn Rule>>>,
    config: AutomationConfig,
    task: Mutex<Option<PeriodicTask>>,
    cycles: AtomicU64,
}

impl AutomationEngine {
    /// Create a stopped engine
    pub fn new(
        devices: Arc<dyn DeviceProvider>,
        event_bus: Option<Arc<EventBus>>,
        config: AutomationConfig,
    ) -> Self {
        Self {
            devices,
            event_bus,
            rules: RwLock::new(Vec::new()),
            config,
            task: Mutex::new(None),
            cycles: AtomicU64::new(0),
        }
    }

    /// Register a rule. Names are unique, ignoring case.
    pub fn add_rule(&self, rule: Arc<dyn Rule>) -> Result<(), AutomationError> {
        let mut rules = self.rules.write();
        if rules
            .iter()
            .any(|r| r.name().eq_ignore_ascii_case(rule.name()))
        {
            return Err(AutomationError::Duplicate(rule.name().to_string()));
        }
        tracing::info!(target: "automation", "Added automation rule: {}", rule.name());
        rules.push(rule);
        Ok(())
    }

    /// Build and register a rule from its description.
    ///
    /// Security rules are also subscribed to motion events on the bus.
    pub fn add_rule_spec(&self, spec: &RuleSpec) -> Result<Arc<dyn Rule>, AutomationError> {
        let rule = match spec.build()? {
            BuiltRule::Security(security) => {
                self.add_rule(security.clone())?;
                if let Some(bus) = &self.event_bus {
                    bus.subscribe(EventKind::MotionDetected, security.clone());
                }
                security as Arc<dyn Rule>
            }
            BuiltRule::Other(rule) => {
                self.add_rule(Arc::clone(&rule))?;
                rule
            }
        };
        Ok(rule)
    }

    pub fn rule(&self, name: &str) -> Option<Arc<dyn Rule>> {
        self.rules
            .read()
            .iter()
            .find(|r| r.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// Enable or disable a rule by name
    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> Result<(), AutomationError> {
        let rule = self
            .rule(name)
            .ok_or_else(|| AutomationError::NotFound(name.to_string()))?;
        rule.set_enabled(enabled);
        tracing::info!(
            target: "automation",
            "Rule {} {}",
            rule.name(),
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    pub fn rules(&self) -> Vec<RuleInfo> {
        self.rules.read().iter().map(|r| RuleInfo::of(r.as_ref())).collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Start periodic evaluation, first cycle immediately.
    /// Returns `false` if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }

        let engine = Arc::clone(self);
        *task = Some(PeriodicTask::spawn(
            "automation-engine",
            self.config.interval,
            Duration::ZERO,
            move || {
                let engine = Arc::clone(&engine);
                async move {
                    engine.run_cycle().await;
                }
            },
        ));
        tracing::info!(
            target: "automation",
            "Automation engine started ({} rules, every {:?})",
            self.rule_count(),
            self.config.interval
        );
        true
    }

    /// Stop periodic evaluation. Returns `false` if not running.
    pub async fn stop(&self) -> bool {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return false;
        };
        task.shutdown(self.config.shutdown_grace).await;
        tracing::info!(target: "automation", "Automation engine stopped");
        true
    }

    /// Evaluate every rule once
    pub async fn run_cycle(&self) -> CycleReport {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        let devices = self.devices.devices();
        let rules: Vec<Arc<dyn Rule>> = self.rules.read().clone();

        let mut report = CycleReport {
            evaluated: rules.len(),
            ..Default::default()
        };
        let due: Vec<Arc<dyn Rule>> = rules.into_iter().filter(|r| r.should_execute()).collect();
        report.executed = due.len();
        if due.is_empty() {
            return report;
        }

        let cancel = CancellationToken::new();
        let mut running: HashSet<String> = HashSet::new();
        let mut tasks = JoinSet::new();
        for rule in due {
            running.insert(rule.name().to_string());
            let devices = Arc::clone(&devices);
            let token = cancel.child_token();
            tasks.spawn(async move {
                let result = rule.execute(&devices, &token).await;
                (rule.name().to_string(), result)
            });
        }

        let mut applied = Vec::new();
        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, result)) => {
                        running.remove(&name);
                        match result {
                            Ok(RuleOutcome::Applied { summary }) => {
                                report.applied += 1;
                                applied.push((name, summary));
                            }
                            Ok(RuleOutcome::Skipped) => {}
                            Err(e) => {
                                report.failed += 1;
                                tracing::error!(
                                    target: "automation",
                                    "Error executing rule {}: {}",
                                    name,
                                    e
                                );
                            }
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::error!(target: "automation", "Rule task failed: {}", e);
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.rule_timeout, drain)
            .await
            .is_err()
        {
            cancel.cancel();
            report.timed_out = tasks.len();
            let mut pending: Vec<String> = running.into_iter().collect();
            pending.sort();
            tracing::warn!(
                target: "automation",
                "Rules took longer than {:?}, abandoning: {}",
                self.config.rule_timeout,
                pending.join(", ")
            );
            tasks.detach_all();
        }

        for (name, summary) in applied {
            self.publish_triggered(&name, &summary).await;
        }

        tracing::debug!(target: "automation", "Cycle finished: {:?}", report);
        report
    }

    async fn publish_triggered(&self, rule: &str, summary: &str) {
        if let Some(bus) = &self.event_bus {
            bus.publish(Event::new(
                EventKind::AutomationTriggered,
                "AutomationEngine",
                json!({
                    "rule": rule,
                    "result": summary,
                }),
            ))
            .await;
        }
    }

    /// Human readable engine status
    pub fn status(&self) -> String {
        let mut out = String::from("Automation Engine Status:\n");
        let _ = writeln!(
            out,
            "  Running: {}",
            if self.is_running() { "yes" } else { "no" }
        );
        let _ = writeln!(out, "  Cycles run: {}", self.cycles());
        let rules = self.rules();
        let _ = write!(out, "  Rules: {}", rules.len());
        for rule in rules {
            let _ = write!(
                out,
                "\n    - {} [{}] priority {}: {}",
                rule.name,
                if rule.enabled { "enabled" } else { "disabled" },
                rule.priority,
                rule.description
            );
        }
        out
    }
}
