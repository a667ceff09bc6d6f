//! Security response rule latched by motion

use crate::error::AutomationError;
use crate::rule::{Rule, RuleOutcome};
use async_trait::async_trait;
use device_core::{Device, DeviceKind};
use home_runtime::{Event, EventKind, EventListener, ListenerError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Lights up the house and powers every camera once motion is reported.
///
/// Motion sets a latch that the next execution consumes. After a response
/// the rule stays quiet for the cooldown even if motion is reported again.
pub struct SecurityRule {
    name: String,
    cooldown: Duration,
    motion: AtomicBool,
    enabled: AtomicBool,
    last_triggered: Mutex<Option<Instant>>,
}

impl SecurityRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cooldown: DEFAULT_COOLDOWN,
            motion: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            last_triggered: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Latch a motion report for the next cycle
    pub fn trigger_motion(&self) {
        self.motion.store(true, Ordering::SeqCst);
    }

    pub fn motion_pending(&self) -> bool {
        self.motion.load(Ordering::SeqCst)
    }

    fn cooling_down(&self) -> bool {
        self.last_triggered
            .lock()
            .is_some_and(|at| at.elapsed() < self.cooldown)
    }
}

#[async_trait]
impl Rule for SecurityRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn should_execute(&self) -> bool {
        self.is_enabled() && !self.cooling_down() && self.motion_pending()
    }

    async fn execute(
        &self,
        devices: &[Arc<Device>],
        cancel: &CancellationToken,
    ) -> Result<RuleOutcome, AutomationError> {
        {
            let mut last = self.last_triggered.lock();
            if last.is_some_and(|at| at.elapsed() < self.cooldown) {
                return Ok(RuleOutcome::Skipped);
            }
            if self
                .motion
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Ok(RuleOutcome::Skipped);
            }
            *last = Some(Instant::now());
        }

        tracing::warn!(target: "automation", "{} activated, securing home", self.name);

        let mut lights = 0;
        for light in devices
            .iter()
            .filter(|d| d.kind() == DeviceKind::Light && !d.is_on())
        {
            if cancel.is_cancelled() {
                return Err(AutomationError::Cancelled(self.name.clone()));
            }
            light.turn_on().await;
            light.set_brightness(100).await?;
            lights += 1;
        }

        let mut cameras = 0;
        for camera in devices
            .iter()
            .filter(|d| d.kind() == DeviceKind::SecurityCamera && !d.is_on())
        {
            if cancel.is_cancelled() {
                return Err(AutomationError::Cancelled(self.name.clone()));
            }
            camera.turn_on().await;
            cameras += 1;
        }

        let summary = format!(
            "{} lights and {} cameras activated",
            lights, cameras
        );
        tracing::info!(target: "automation", "Security response: {}", summary);
        Ok(RuleOutcome::Applied { summary })
    }

    fn describe(&self) -> String {
        format!("security response (cooldown {}s)", self.cooldown.as_secs())
    }
}

impl EventListener for SecurityRule {
    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        tracing::debug!(
            target: "automation",
            "{} latched motion from {}",
            self.name,
            event.source()
        );
        self.trigger_motion();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, event: &Event) -> bool {
        event.kind() == EventKind::MotionDetected
    }
}
