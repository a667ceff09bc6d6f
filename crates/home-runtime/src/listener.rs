//! Event listeners

use crate::error::ListenerError;
use crate::event::{Event, EventKind};

/// Receives events from the bus.
///
/// Listeners run on the blocking pool, so `on_event` may block briefly.
/// A returned error or a panic is logged by the bus and never reaches
/// other listeners.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event) -> Result<(), ListenerError>;

    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Extra filter applied after kind matching
    fn accepts(&self, _event: &Event) -> bool {
        true
    }
}

/// Adapts a closure into a listener
pub struct FnListener<F> {
    name: String,
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&Event) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Writes every event to the `events` tracing target
pub struct LoggingListener {
    name: String,
}

impl LoggingListener {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LoggingListener {
    fn default() -> Self {
        Self::new("EventLogger")
    }
}

impl EventListener for LoggingListener {
    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        tracing::info!(target: "events", "{}", event);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Raises warnings for temperature, malfunction and power events
#[derive(Default)]
pub struct AlertListener;

impl EventListener for AlertListener {
    fn on_event(&self, event: &Event) -> Result<(), ListenerError> {
        match event.kind() {
            EventKind::TemperatureAlert => tracing::warn!(
                target: "events",
                "Temperature alert from {}: {}",
                event.source(),
                event.get_str("alert").unwrap_or("UNKNOWN")
            ),
            EventKind::DeviceMalfunction => tracing::warn!(
                target: "events",
                "Device malfunction: {} ({})",
                event.source(),
                event.get_str("error").unwrap_or("unknown error")
            ),
            EventKind::PowerThresholdExceeded => tracing::warn!(
                target: "events",
                "Power threshold exceeded: {}",
                event.get("currentPower").cloned().unwrap_or_default()
            ),
            _ => {}
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "AlertSystem"
    }

    fn accepts(&self, event: &Event) -> bool {
        matches!(
            event.kind(),
            EventKind::TemperatureAlert
                | EventKind::DeviceMalfunction
                | EventKind::PowerThresholdExceeded
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fn_listener_forwards() {
        let listener = FnListener::new("fail", |_e: &Event| Err(ListenerError::new("boom")));
        let e = Event::new(EventKind::UserCommand, "shell", json!({}));
        assert_eq!(listener.name(), "fail");
        assert!(listener.on_event(&e).is_err());
    }

    #[test]
    fn test_alert_listener_filters() {
        let alert = AlertListener;
        let motion = Event::new(EventKind::MotionDetected, "cam", json!({}));
        let hot = Event::new(EventKind::TemperatureAlert, "t", json!({"alert": "TOO_HOT"}));
        assert!(!alert.accepts(&motion));
        assert!(alert.accepts(&hot));
        assert!(alert.on_event(&hot).is_ok());
    }
}
