//! Simulated smart home devices
//!
//! A [`Device`] pairs the common on/off bookkeeping with a tagged
//! [`DeviceAttributes`] payload for the concrete kind. All state sits behind
//! one reader/writer lock per device. Power hooks only compute the new state;
//! events and log lines are produced after the lock is released.

use crate::error::DeviceError;
use chrono::{DateTime, Utc};
use home_runtime::{Event, EventBus, EventKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const MIN_BRIGHTNESS: u8 = 0;
pub const MAX_BRIGHTNESS: u8 = 100;
pub const MIN_TEMPERATURE: i32 = 10;
pub const MAX_TEMPERATURE: i32 = 32;
pub const DEFAULT_TEMPERATURE: i32 = 21;
/// Below this a thermostat raises a cold alert
pub const COLD_THRESHOLD: i32 = 15;
/// Above this a thermostat raises a hot alert
pub const HOT_THRESHOLD: i32 = 28;
pub const ECO_TEMPERATURE: i32 = 20;
pub const COMFORT_TEMPERATURE: i32 = 22;
/// Motion is considered over this long after the last detection
pub const MOTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Brightness jumps larger than this are published as state changes
const BRIGHTNESS_EVENT_DELTA: u8 = 20;

/// Device kinds known to the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Light,
    Thermostat,
    SecurityCamera,
}

impl DeviceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Light => "Light",
            DeviceKind::Thermostat => "Thermostat",
            DeviceKind::SecurityCamera => "SecurityCamera",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceKind {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "light" => Ok(DeviceKind::Light),
            "thermostat" => Ok(DeviceKind::Thermostat),
            "camera" | "securitycamera" | "security_camera" => Ok(DeviceKind::SecurityCamera),
            _ => Err(DeviceError::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LightState {
    pub brightness: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThermostatState {
    pub temperature: i32,
    pub target_temperature: i32,
    pub heating: bool,
    pub cooling: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraState {
    pub recording: bool,
    pub motion_detected: bool,
    pub recording_sessions: u32,
    #[serde(skip)]
    pub last_motion: Option<Instant>,
}

impl CameraState {
    /// Whether motion was seen within [`MOTION_TIMEOUT`] of `now`
    pub fn motion_active(&self, now: Instant) -> bool {
        self.motion_detected
            && self
                .last_motion
                .is_some_and(|seen| now.saturating_duration_since(seen) < MOTION_TIMEOUT)
    }
}

/// Kind-specific device state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceAttributes {
    Light(LightState),
    Thermostat(ThermostatState),
    SecurityCamera(CameraState),
}

impl DeviceAttributes {
    fn new(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Light => DeviceAttributes::Light(LightState {
                brightness: MAX_BRIGHTNESS,
            }),
            DeviceKind::Thermostat => DeviceAttributes::Thermostat(ThermostatState {
                temperature: DEFAULT_TEMPERATURE,
                target_temperature: DEFAULT_TEMPERATURE,
                heating: false,
                cooling: false,
            }),
            DeviceKind::SecurityCamera => DeviceAttributes::SecurityCamera(CameraState {
                recording: false,
                motion_detected: false,
                recording_sessions: 0,
                last_motion: None,
            }),
        }
    }

    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        match self {
            DeviceAttributes::Light(_) => DeviceKind::Light,
            DeviceAttributes::Thermostat(_) => DeviceKind::Thermostat,
            DeviceAttributes::SecurityCamera(_) => DeviceKind::SecurityCamera,
        }
    }

    fn on_turn_on(&mut self) -> Option<Effect> {
        match self {
            DeviceAttributes::SecurityCamera(camera) if !camera.recording => {
                camera.recording = true;
                camera.recording_sessions += 1;
                Some(Effect::Recording {
                    started: true,
                    session: camera.recording_sessions,
                })
            }
            _ => None,
        }
    }

    fn on_turn_off(&mut self) -> Option<Effect> {
        match self {
            DeviceAttributes::Thermostat(thermostat) => {
                thermostat.heating = false;
                thermostat.cooling = false;
                None
            }
            DeviceAttributes::SecurityCamera(camera) => {
                camera.motion_detected = false;
                if camera.recording {
                    camera.recording = false;
                    Some(Effect::Recording {
                        started: false,
                        session: camera.recording_sessions,
                    })
                } else {
                    None
                }
            }
            DeviceAttributes::Light(_) => None,
        }
    }
}

/// Side effect computed under the lock and performed after it is released
#[derive(Debug)]
enum Effect {
    Power {
        on: bool,
        change_count: u64,
    },
    Recording {
        started: bool,
        session: u32,
    },
    Brightness {
        old: u8,
        new: u8,
    },
    Temperature {
        previous: i32,
        temperature: i32,
    },
    Motion,
}

struct DeviceState {
    on: bool,
    last_state_change: DateTime<Utc>,
    state_changes: u64,
    attributes: DeviceAttributes,
}

impl DeviceState {
    fn set_power(&mut self, on: bool) -> Vec<Effect> {
        self.on = on;
        self.state_changes += 1;
        self.last_state_change = Utc::now();

        let mut effects = vec![Effect::Power {
            on,
            change_count: self.state_changes,
        }];
        let hook = if on {
            self.attributes.on_turn_on()
        } else {
            self.attributes.on_turn_off()
        };
        effects.extend(hook);
        effects
    }
}

/// Consistent copy of a device taken under a single read lock
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSnapshot {
    pub name: String,
    pub kind: DeviceKind,
    pub on: bool,
    pub state_changes: u64,
    pub last_state_change: DateTime<Utc>,
    pub attributes: DeviceAttributes,
}

impl DeviceSnapshot {
    pub fn light(&self) -> Option<&LightState> {
        match &self.attributes {
            DeviceAttributes::Light(light) => Some(light),
            _ => None,
        }
    }

    pub fn thermostat(&self) -> Option<&ThermostatState> {
        match &self.attributes {
            DeviceAttributes::Thermostat(thermostat) => Some(thermostat),
            _ => None,
        }
    }

    pub fn camera(&self) -> Option<&CameraState> {
        match &self.attributes {
            DeviceAttributes::SecurityCamera(camera) => Some(camera),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.name, self.kind, on_off(self.on))?;
        match &self.attributes {
            DeviceAttributes::Light(light) => write!(f, ", Brightness: {}%", light.brightness),
            DeviceAttributes::Thermostat(t) => {
                write!(f, ", Temperature: {}°C", t.temperature)?;
                if t.target_temperature != t.temperature {
                    write!(f, " (target {}°C)", t.target_temperature)?;
                }
                if t.heating {
                    write!(f, ", heating")?;
                } else if t.cooling {
                    write!(f, ", cooling")?;
                }
                Ok(())
            }
            DeviceAttributes::SecurityCamera(camera) => write!(
                f,
                ", Recording: {}, Motion: {}, Sessions: {}",
                camera.recording,
                if camera.motion_detected { "DETECTED" } else { "None" },
                camera.recording_sessions
            ),
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

/// A simulated device shared between tasks
pub struct Device {
    name: String,
    kind: DeviceKind,
    state: RwLock<DeviceState>,
    event_bus: RwLock<Option<Arc<EventBus>>>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl Device {
    /// Create a device that starts off. The name is trimmed and must not be empty.
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Result<Self, DeviceError> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(DeviceError::EmptyName);
        }

        Ok(Self {
            name,
            kind,
            state: RwLock::new(DeviceState {
                on: false,
                last_state_change: Utc::now(),
                state_changes: 0,
                attributes: DeviceAttributes::new(kind),
            }),
            event_bus: RwLock::new(None),
        })
    }

    pub fn light(name: impl Into<String>) -> Result<Self, DeviceError> {
        Self::new(name, DeviceKind::Light)
    }

    pub fn thermostat(name: impl Into<String>) -> Result<Self, DeviceError> {
        Self::new(name, DeviceKind::Thermostat)
    }

    pub fn camera(name: impl Into<String>) -> Result<Self, DeviceError> {
        Self::new(name, DeviceKind::SecurityCamera)
    }

    #[must_use]
    pub fn with_event_bus(self, bus: Arc<EventBus>) -> Self {
        self.attach_event_bus(bus);
        self
    }

    /// Attach the bus that receives this device's events
    pub fn attach_event_bus(&self, bus: Arc<EventBus>) {
        *self.event_bus.write() = Some(bus);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn is_on(&self) -> bool {
        self.state.read().on
    }

    pub fn state_changes(&self) -> u64 {
        self.state.read().state_changes
    }

    pub fn last_state_change(&self) -> DateTime<Utc> {
        self.state.read().last_state_change
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        let state = self.state.read();
        let mut attributes = state.attributes.clone();
        if let DeviceAttributes::SecurityCamera(camera) = &mut attributes {
            camera.motion_detected = camera.motion_active(Instant::now());
        }
        DeviceSnapshot {
            name: self.name.clone(),
            kind: self.kind,
            on: state.on,
            state_changes: state.state_changes,
            last_state_change: state.last_state_change,
            attributes,
        }
    }

    /// Human readable status line
    pub fn status(&self) -> String {
        self.snapshot().to_string()
    }

    /// Turn the device on. Returns `false` if it already was.
    pub async fn turn_on(&self) -> bool {
        self.switch(true).await
    }

    /// Turn the device off. Returns `false` if it already was.
    pub async fn turn_off(&self) -> bool {
        self.switch(false).await
    }

    async fn switch(&self, on: bool) -> bool {
        let effects = {
            let mut state = self.state.write();
            if state.on == on {
                return false;
            }
            state.set_power(on)
        };

        tracing::info!("{} is now {}", self.name, on_off(on));
        self.emit(effects).await;
        true
    }

    /// Flip the power state atomically and return the new state
    pub async fn toggle(&self) -> bool {
        let (on, effects) = {
            let mut state = self.state.write();
            let on = !state.on;
            (on, state.set_power(on))
        };

        tracing::info!("{} toggled {}", self.name, on_off(on));
        self.emit(effects).await;
        on
    }

    fn wrong_kind(&self, expected: DeviceKind) -> DeviceError {
        DeviceError::WrongKind {
            device: self.name.clone(),
            expected,
        }
    }

    fn read<T>(
        &self,
        expected: DeviceKind,
        f: impl FnOnce(&DeviceAttributes) -> Option<T>,
    ) -> Result<T, DeviceError> {
        f(&self.state.read().attributes).ok_or_else(|| self.wrong_kind(expected))
    }

    fn update_light<T>(
        &self,
        f: impl FnOnce(&mut LightState) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut state = self.state.write();
        match &mut state.attributes {
            DeviceAttributes::Light(light) => f(light),
            _ => Err(self.wrong_kind(DeviceKind::Light)),
        }
    }

    fn update_thermostat<T>(
        &self,
        f: impl FnOnce(bool, &mut ThermostatState) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut state = self.state.write();
        let on = state.on;
        match &mut state.attributes {
            DeviceAttributes::Thermostat(thermostat) => f(on, thermostat),
            _ => Err(self.wrong_kind(DeviceKind::Thermostat)),
        }
    }

    fn update_camera<T>(
        &self,
        f: impl FnOnce(bool, &mut CameraState) -> Result<T, DeviceError>,
    ) -> Result<T, DeviceError> {
        let mut state = self.state.write();
        let on = state.on;
        match &mut state.attributes {
            DeviceAttributes::SecurityCamera(camera) => f(on, camera),
            _ => Err(self.wrong_kind(DeviceKind::SecurityCamera)),
        }
    }

    // Light

    pub fn brightness(&self) -> Result<u8, DeviceError> {
        self.read(DeviceKind::Light, |attrs| match attrs {
            DeviceAttributes::Light(light) => Some(light.brightness),
            _ => None,
        })
    }

    /// Set brightness in percent. Out of range values are rejected.
    pub async fn set_brightness(&self, level: i32) -> Result<(), DeviceError> {
        if self.kind != DeviceKind::Light {
            return Err(self.wrong_kind(DeviceKind::Light));
        }
        let level = u8::try_from(level)
            .ok()
            .filter(|b| *b <= MAX_BRIGHTNESS)
            .ok_or(DeviceError::BrightnessOutOfRange {
                value: level,
                min: MIN_BRIGHTNESS,
                max: MAX_BRIGHTNESS,
            })?;

        let old = self.update_light(|light| Ok(std::mem::replace(&mut light.brightness, level)))?;

        tracing::debug!("{} brightness {}% -> {}%", self.name, old, level);
        if old.abs_diff(level) > BRIGHTNESS_EVENT_DELTA {
            self.emit(vec![Effect::Brightness { old, new: level }]).await;
        }
        Ok(())
    }

    /// Raise brightness by `step`, saturating at the maximum
    pub async fn increase_brightness(&self, step: u8) -> Result<u8, DeviceError> {
        let current = self.brightness()?;
        let level = current.saturating_add(step).min(MAX_BRIGHTNESS);
        self.set_brightness(i32::from(level)).await?;
        Ok(level)
    }

    /// Lower brightness by `step`, saturating at the minimum
    pub async fn decrease_brightness(&self, step: u8) -> Result<u8, DeviceError> {
        let current = self.brightness()?;
        let level = current.saturating_sub(step).max(MIN_BRIGHTNESS);
        self.set_brightness(i32::from(level)).await?;
        Ok(level)
    }

    // Thermostat

    pub fn thermostat_state(&self) -> Result<ThermostatState, DeviceError> {
        self.read(DeviceKind::Thermostat, |attrs| match attrs {
            DeviceAttributes::Thermostat(t) => Some(t.clone()),
            _ => None,
        })
    }

    pub fn temperature(&self) -> Result<i32, DeviceError> {
        self.thermostat_state().map(|t| t.temperature)
    }

    pub fn target_temperature(&self) -> Result<i32, DeviceError> {
        self.thermostat_state().map(|t| t.target_temperature)
    }

    pub fn is_heating(&self) -> Result<bool, DeviceError> {
        self.thermostat_state().map(|t| t.heating)
    }

    pub fn is_cooling(&self) -> Result<bool, DeviceError> {
        self.thermostat_state().map(|t| t.cooling)
    }

    /// Set current and target temperature.
    ///
    /// Heating starts when the new value is above the old one and cooling
    /// when it is below. Values outside the comfort band raise an alert.
    pub async fn set_temperature(&self, temperature: i32) -> Result<(), DeviceError> {
        if self.kind != DeviceKind::Thermostat {
            return Err(self.wrong_kind(DeviceKind::Thermostat));
        }
        if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&temperature) {
            return Err(DeviceError::TemperatureOutOfRange {
                value: temperature,
                min: MIN_TEMPERATURE,
                max: MAX_TEMPERATURE,
            });
        }

        let previous = self.update_thermostat(|_, t| {
            let previous = t.temperature;
            t.temperature = temperature;
            t.target_temperature = temperature;
            t.heating = temperature > previous;
            t.cooling = temperature < previous;
            Ok(previous)
        })?;

        if temperature > previous {
            tracing::info!("{} heating: {}°C -> {}°C", self.name, previous, temperature);
        } else if temperature < previous {
            tracing::info!("{} cooling: {}°C -> {}°C", self.name, previous, temperature);
        }

        if !(COLD_THRESHOLD..=HOT_THRESHOLD).contains(&temperature) {
            self.emit(vec![Effect::Temperature {
                previous,
                temperature,
            }])
            .await;
        }
        Ok(())
    }

    /// Move the current temperature one step while the thermostat is on.
    ///
    /// `random_delta` is used when neither heating nor cooling; active
    /// heating or cooling always moves toward the target. Returns the new
    /// temperature if it changed.
    pub fn drift_temperature(&self, random_delta: i32) -> Result<Option<i32>, DeviceError> {
        let drifted = self.update_thermostat(|on, t| {
            if !on {
                return Ok(None);
            }
            let delta = if t.heating && t.temperature < t.target_temperature {
                1
            } else if t.cooling && t.temperature > t.target_temperature {
                -1
            } else {
                random_delta.signum()
            };

            let next = t.temperature + delta;
            if next == t.temperature || !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&next) {
                return Ok(None);
            }
            t.temperature = next;
            let reached = next == t.target_temperature;
            if reached {
                t.heating = false;
                t.cooling = false;
            }
            Ok(Some((next, reached)))
        })?;

        if let Some((next, reached)) = drifted {
            tracing::debug!("{} temperature drifted to {}°C", self.name, next);
            if reached {
                tracing::info!("{} reached target temperature", self.name);
            }
        }
        Ok(drifted.map(|(next, _)| next))
    }

    /// Switch to the energy saving temperature if the thermostat is on
    pub async fn set_eco_mode(&self) -> Result<bool, DeviceError> {
        self.set_mode(ECO_TEMPERATURE).await
    }

    /// Switch to the comfort temperature if the thermostat is on
    pub async fn set_comfort_mode(&self) -> Result<bool, DeviceError> {
        self.set_mode(COMFORT_TEMPERATURE).await
    }

    async fn set_mode(&self, temperature: i32) -> Result<bool, DeviceError> {
        self.thermostat_state()?;
        if !self.is_on() {
            return Ok(false);
        }
        self.set_temperature(temperature).await?;
        Ok(true)
    }

    // Camera

    pub fn camera_state(&self) -> Result<CameraState, DeviceError> {
        self.read(DeviceKind::SecurityCamera, |attrs| match attrs {
            DeviceAttributes::SecurityCamera(camera) => Some(camera.clone()),
            _ => None,
        })
    }

    pub fn is_recording(&self) -> Result<bool, DeviceError> {
        self.camera_state().map(|c| c.recording)
    }

    pub fn recording_sessions(&self) -> Result<u32, DeviceError> {
        self.camera_state().map(|c| c.recording_sessions)
    }

    /// Whether motion was detected within the motion timeout
    pub fn motion_detected(&self) -> Result<bool, DeviceError> {
        self.camera_state()
            .map(|c| c.motion_active(Instant::now()))
    }

    /// Start a recording session. Returns `false` if already recording.
    pub async fn start_recording(&self) -> Result<bool, DeviceError> {
        let effect = self.update_camera(|on, camera| {
            if !on {
                return Err(DeviceError::PoweredOff(self.name.clone()));
            }
            if camera.recording {
                return Ok(None);
            }
            camera.recording = true;
            camera.recording_sessions += 1;
            Ok(Some(Effect::Recording {
                started: true,
                session: camera.recording_sessions,
            }))
        })?;

        Ok(self.emit_optional(effect).await)
    }

    /// Stop the current recording session. Returns `false` if not recording.
    pub async fn stop_recording(&self) -> Result<bool, DeviceError> {
        let effect = self.update_camera(|_, camera| {
            if !camera.recording {
                return Ok(None);
            }
            camera.recording = false;
            Ok(Some(Effect::Recording {
                started: false,
                session: camera.recording_sessions,
            }))
        })?;

        Ok(self.emit_optional(effect).await)
    }

    /// Register motion in front of the camera.
    ///
    /// The first detection starts recording and publishes a motion event.
    /// Detections while motion is still active only refresh the timestamp.
    /// Returns whether this detection started a new motion period.
    pub async fn detect_motion(&self) -> Result<bool, DeviceError> {
        let effects = self.update_camera(|on, camera| {
            if !on {
                return Err(DeviceError::PoweredOff(self.name.clone()));
            }
            let now = Instant::now();
            let active = camera.motion_active(now);
            camera.last_motion = Some(now);
            if active {
                return Ok(Vec::new());
            }

            camera.motion_detected = true;
            let mut effects = vec![Effect::Motion];
            if !camera.recording {
                camera.recording = true;
                camera.recording_sessions += 1;
                effects.push(Effect::Recording {
                    started: true,
                    session: camera.recording_sessions,
                });
            }
            Ok(effects)
        })?;

        if effects.is_empty() {
            return Ok(false);
        }
        tracing::info!("Motion detected by {}", self.name);
        self.emit(effects).await;
        Ok(true)
    }

    /// Publish a malfunction report for this device
    pub async fn report_malfunction(&self, error: &str) {
        tracing::warn!("{} malfunction: {}", self.name, error);
        let event = Event::new(
            EventKind::DeviceMalfunction,
            self.name.clone(),
            json!({
                "device": self.name,
                "deviceType": self.kind.as_str(),
                "error": error,
                "timestamp": Utc::now().timestamp_millis(),
            }),
        );
        self.publish(event).await;
    }

    async fn emit_optional(&self, effect: Option<Effect>) -> bool {
        match effect {
            Some(effect) => {
                self.emit(vec![effect]).await;
                true
            }
            None => false,
        }
    }

    async fn emit(&self, effects: Vec<Effect>) {
        for effect in effects {
            if let Effect::Recording { started, session } = &effect {
                tracing::info!(
                    "{} recording {} (session {})",
                    self.name,
                    if *started { "started" } else { "stopped" },
                    session
                );
            }
            let event = self.event_for(effect);
            self.publish(event).await;
        }
    }

    async fn publish(&self, event: Event) {
        let bus = self.event_bus.read().clone();
        if let Some(bus) = bus {
            bus.publish(event).await;
        }
    }

    fn event_for(&self, effect: Effect) -> Event {
        let timestamp = Utc::now().timestamp_millis();
        let (kind, payload) = match effect {
            Effect::Power { on, change_count } => (
                EventKind::DeviceStateChanged,
                json!({
                    "device": self.name,
                    "deviceType": self.kind.as_str(),
                    "newState": on_off(on),
                    "previousState": on_off(!on),
                    "changeCount": change_count,
                    "timestamp": timestamp,
                }),
            ),
            Effect::Recording { started, session } => (
                EventKind::DeviceStateChanged,
                json!({
                    "camera": self.name,
                    "action": if started { "RECORDING_STARTED" } else { "RECORDING_STOPPED" },
                    "sessionNumber": session,
                    "timestamp": timestamp,
                }),
            ),
            Effect::Brightness { old, new } => (
                EventKind::DeviceStateChanged,
                json!({
                    "device": self.name,
                    "property": "brightness",
                    "oldBrightness": old,
                    "newBrightness": new,
                    "timestamp": timestamp,
                }),
            ),
            Effect::Temperature {
                previous,
                temperature,
            } => (
                EventKind::TemperatureAlert,
                json!({
                    "device": self.name,
                    "temperature": temperature,
                    "previousTemperature": previous,
                    "alert": if temperature < COLD_THRESHOLD { "TOO_COLD" } else { "TOO_HOT" },
                    "timestamp": timestamp,
                }),
            ),
            Effect::Motion => (
                EventKind::MotionDetected,
                json!({
                    "camera": self.name,
                    "location": self.name,
                    "timestamp": timestamp,
                }),
            ),
        };
        Event::new(kind, self.name.clone(), payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use home_runtime::EventBusConfig;

    fn bus() -> Arc<EventBus> {
        Arc::new(EventBus::new(EventBusConfig::default()))
    }

    #[tokio::test]
    async fn test_turn_on_is_idempotent() {
        let bus = bus();
        let light = Device::light("L1").unwrap().with_event_bus(Arc::clone(&bus));

        assert!(light.turn_on().await);
        assert!(!light.turn_on().await);
        assert!(light.is_on());
        assert_eq!(light.state_changes(), 1);
        assert_eq!(bus.queue_len(), 1);

        assert!(light.turn_off().await);
        assert!(!light.turn_off().await);
        assert_eq!(light.state_changes(), 2);
        assert_eq!(bus.queue_len(), 2);
    }

    #[tokio::test]
    async fn test_toggle_flips_state() {
        let light = Device::light("Desk").unwrap();
        assert!(light.toggle().await);
        assert!(!light.toggle().await);
        assert_eq!(light.state_changes(), 2);
    }

    #[tokio::test]
    async fn test_brightness_bounds() {
        let light = Device::light("L1").unwrap();
        assert!(matches!(
            light.set_brightness(-1).await,
            Err(DeviceError::BrightnessOutOfRange { value: -1, .. })
        ));
        assert!(light.set_brightness(101).await.is_err());
        assert_eq!(light.brightness().unwrap(), 100);

        light.set_brightness(0).await.unwrap();
        assert_eq!(light.brightness().unwrap(), 0);
        assert_eq!(light.increase_brightness(30).await.unwrap(), 30);
        assert_eq!(light.decrease_brightness(50).await.unwrap(), 0);
        light.set_brightness(95).await.unwrap();
        assert_eq!(light.increase_brightness(30).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_large_brightness_change_publishes() {
        let bus = bus();
        let light = Device::light("L1").unwrap().with_event_bus(Arc::clone(&bus));
        light.set_brightness(90).await.unwrap();
        assert_eq!(bus.queue_len(), 0);
        light.set_brightness(50).await.unwrap();
        assert_eq!(bus.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_temperature_bounds() {
        let thermostat = Device::thermostat("T1").unwrap();
        assert!(thermostat.set_temperature(5).await.is_err());
        assert!(thermostat.set_temperature(40).await.is_err());
        assert_eq!(thermostat.temperature().unwrap(), DEFAULT_TEMPERATURE);
        assert!(!thermostat.is_heating().unwrap());
    }

    #[tokio::test]
    async fn test_heating_and_cooling_are_exclusive() {
        let thermostat = Device::thermostat("T1").unwrap();
        thermostat.turn_on().await;

        thermostat.set_temperature(25).await.unwrap();
        let state = thermostat.thermostat_state().unwrap();
        assert!(state.heating && !state.cooling);
        assert_eq!(state.target_temperature, 25);

        thermostat.set_temperature(18).await.unwrap();
        let state = thermostat.thermostat_state().unwrap();
        assert!(state.cooling && !state.heating);

        thermostat.set_temperature(18).await.unwrap();
        let state = thermostat.thermostat_state().unwrap();
        assert!(!state.cooling && !state.heating);

        thermostat.set_temperature(20).await.unwrap();
        thermostat.turn_off().await;
        assert!(!thermostat.is_heating().unwrap());
    }

    #[tokio::test]
    async fn test_extreme_temperature_raises_alert() {
        let bus = bus();
        let thermostat = Device::thermostat("T1")
            .unwrap()
            .with_event_bus(Arc::clone(&bus));
        thermostat.set_temperature(22).await.unwrap();
        assert_eq!(bus.queue_len(), 0);
        thermostat.set_temperature(30).await.unwrap();
        thermostat.set_temperature(12).await.unwrap();
        assert_eq!(bus.stats().per_kind.get("TEMPERATURE_ALERT"), Some(&2));
    }

    #[tokio::test]
    async fn test_drift_moves_toward_target() {
        let thermostat = Device::thermostat("T1").unwrap();
        assert_eq!(thermostat.drift_temperature(1).unwrap(), None);

        thermostat.turn_on().await;
        thermostat.set_temperature(24).await.unwrap();
        // Current equals target, so drift follows the random delta
        assert_eq!(thermostat.drift_temperature(-1).unwrap(), Some(23));
        // Still heating toward 24, which ends heating once reached
        assert_eq!(thermostat.drift_temperature(0).unwrap(), Some(24));
        assert!(!thermostat.is_heating().unwrap());
        assert_eq!(thermostat.drift_temperature(0).unwrap(), None);
    }

    #[tokio::test]
    async fn test_modes_require_power() {
        let thermostat = Device::thermostat("T1").unwrap();
        assert!(!thermostat.set_eco_mode().await.unwrap());
        thermostat.turn_on().await;
        assert!(thermostat.set_comfort_mode().await.unwrap());
        assert_eq!(thermostat.temperature().unwrap(), COMFORT_TEMPERATURE);
    }

    #[tokio::test]
    async fn test_camera_recording_follows_power() {
        let camera = Device::camera("Front").unwrap();
        assert!(matches!(
            camera.start_recording().await,
            Err(DeviceError::PoweredOff(_))
        ));

        camera.turn_on().await;
        assert!(camera.is_recording().unwrap());
        assert_eq!(camera.recording_sessions().unwrap(), 1);
        assert!(!camera.start_recording().await.unwrap());

        assert!(camera.stop_recording().await.unwrap());
        assert!(camera.start_recording().await.unwrap());
        assert_eq!(camera.recording_sessions().unwrap(), 2);

        camera.turn_off().await;
        assert!(!camera.is_recording().unwrap());
        assert!(!camera.motion_detected().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_expires_after_timeout() {
        let bus = bus();
        let camera = Device::camera("Front")
            .unwrap()
            .with_event_bus(Arc::clone(&bus));
        assert!(camera.detect_motion().await.is_err());

        camera.turn_on().await;
        camera.stop_recording().await.unwrap();

        assert!(camera.detect_motion().await.unwrap());
        assert!(camera.is_recording().unwrap());
        assert!(!camera.detect_motion().await.unwrap());
        assert_eq!(bus.stats().per_kind.get("MOTION_DETECTED"), Some(&1));

        tokio::time::advance(MOTION_TIMEOUT).await;
        assert!(!camera.motion_detected().unwrap());
        assert!(camera.detect_motion().await.unwrap());
        assert_eq!(bus.stats().per_kind.get("MOTION_DETECTED"), Some(&2));
    }

    #[tokio::test]
    async fn test_wrong_kind_is_rejected() {
        let light = Device::light("L1").unwrap();
        assert!(matches!(
            light.set_temperature(20).await,
            Err(DeviceError::WrongKind {
                expected: DeviceKind::Thermostat,
                ..
            })
        ));
        assert!(light.detect_motion().await.is_err());
        let thermostat = Device::thermostat("T1").unwrap();
        assert!(thermostat.brightness().is_err());
    }

    #[test]
    fn test_name_validation_and_kind_parsing() {
        assert_eq!(Device::light("   ").unwrap_err(), DeviceError::EmptyName);
        assert_eq!(Device::light(" Lamp ").unwrap().name(), "Lamp");
        assert_eq!("camera".parse::<DeviceKind>().unwrap(), DeviceKind::SecurityCamera);
        assert_eq!("Thermostat".parse::<DeviceKind>().unwrap(), DeviceKind::Thermostat);
        assert!("toaster".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn test_snapshot_status_line() {
        let light = Device::light("Lamp").unwrap();
        assert_eq!(light.status(), "Lamp [Light] OFF, Brightness: 100%");
    }
}
