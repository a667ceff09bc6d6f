//! Device registry and the provider trait consumed by background services

use crate::command::DeviceCommand;
use crate::device::{Device, DeviceKind};
use crate::error::DeviceError;
use home_runtime::EventBus;
use parking_lot::RwLock;
use std::sync::Arc;

/// Read access to the current device set.
///
/// Services hold an `Arc<dyn DeviceProvider>` instead of reaching for a
/// global registry, so tests can hand them a fixed list.
pub trait DeviceProvider: Send + Sync {
    /// Snapshot of the device list. Later registrations do not affect it.
    fn devices(&self) -> Arc<[Arc<Device>]>;

    /// Look up a device by name, ignoring case
    fn device(&self, name: &str) -> Option<Arc<Device>> {
        self.devices()
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
            .cloned()
    }
}

/// A fixed device list
impl DeviceProvider for Vec<Arc<Device>> {
    fn devices(&self) -> Arc<[Arc<Device>]> {
        self.iter().cloned().collect()
    }
}

/// Shared, copy-on-write collection of devices
pub struct DeviceRegistry {
    devices: RwLock<Arc<[Arc<Device>]>>,
    event_bus: Option<Arc<EventBus>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DeviceRegistry {
    /// Create an empty registry. Devices created through it publish to `event_bus`.
    #[must_use]
    pub fn new(event_bus: Option<Arc<EventBus>>) -> Self {
        Self {
            devices: RwLock::new(Arc::from(Vec::new())),
            event_bus,
        }
    }

    /// Build a device of `kind`, attach the bus and register it
    pub fn create(&self, name: &str, kind: DeviceKind) -> Result<Arc<Device>, DeviceError> {
        let device = Device::new(name, kind)?;
        self.register(device)
    }

    /// Create a light with an initial brightness. Nothing is registered if
    /// the brightness is out of range.
    pub async fn create_light(
        &self,
        name: &str,
        brightness: i32,
    ) -> Result<Arc<Device>, DeviceError> {
        let light = Device::light(name)?;
        light.set_brightness(brightness).await?;
        self.register(light)
    }

    /// Create a security camera, optionally switched on and recording
    pub async fn create_camera(
        &self,
        name: &str,
        auto_start: bool,
    ) -> Result<Arc<Device>, DeviceError> {
        let camera = self.create(name, DeviceKind::SecurityCamera)?;
        if auto_start {
            camera.turn_on().await;
            camera.start_recording().await?;
        }
        Ok(camera)
    }

    /// Create one device per `name:type` entry.
    ///
    /// Entries are independent: a malformed or duplicate entry fails on its
    /// own and the rest are still created.
    pub fn create_many(&self, specs: &[&str]) -> Vec<Result<Arc<Device>, DeviceError>> {
        specs
            .iter()
            .map(|spec| {
                let (name, kind) = parse_device_spec(spec)?;
                self.create(name, kind)
            })
            .collect()
    }

    /// Register an already built device. Names are unique, ignoring case.
    pub fn register(&self, device: Device) -> Result<Arc<Device>, DeviceError> {
        if let Some(bus) = &self.event_bus {
            device.attach_event_bus(Arc::clone(bus));
        }
        let device = Arc::new(device);

        let mut devices = self.devices.write();
        if devices
            .iter()
            .any(|d| d.name().eq_ignore_ascii_case(device.name()))
        {
            return Err(DeviceError::AlreadyExists(device.name().to_string()));
        }
        let mut next: Vec<Arc<Device>> = devices.iter().cloned().collect();
        next.push(Arc::clone(&device));
        *devices = next.into();
        drop(devices);

        tracing::info!("Registered {} {}", device.kind(), device.name());
        Ok(device)
    }

    /// Remove a device by name
    pub fn remove(&self, name: &str) -> Result<Arc<Device>, DeviceError> {
        let mut devices = self.devices.write();
        let position = devices
            .iter()
            .position(|d| d.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))?;

        let mut next: Vec<Arc<Device>> = devices.iter().cloned().collect();
        let removed = next.remove(position);
        *devices = next.into();
        drop(devices);

        tracing::info!("Removed device {}", removed.name());
        Ok(removed)
    }

    /// Drop every device
    pub fn clear(&self) {
        *self.devices.write() = Arc::from(Vec::new());
        tracing::info!("Device registry cleared");
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Result<Arc<Device>, DeviceError> {
        self.device(name)
            .ok_or_else(|| DeviceError::NotFound(name.to_string()))
    }

    /// Parse and run a textual command against a named device
    pub async fn apply(
        &self,
        command: &str,
        device: &str,
        value: Option<&str>,
    ) -> Result<String, DeviceError> {
        let device = self.get(device)?;
        let command = DeviceCommand::parse(command, value)?;
        command.apply(&device).await
    }

    /// Populate a typical home: three lights, a thermostat and two cameras.
    ///
    /// A non-empty `prefix` is joined to each name with an underscore.
    pub fn create_standard_home(&self, prefix: &str) -> Result<Vec<Arc<Device>>, DeviceError> {
        const LAYOUT: [(&str, DeviceKind); 6] = [
            ("LivingRoomLight", DeviceKind::Light),
            ("KitchenLight", DeviceKind::Light),
            ("BedroomLight", DeviceKind::Light),
            ("MainThermostat", DeviceKind::Thermostat),
            ("FrontDoorCam", DeviceKind::SecurityCamera),
            ("BackyardCam", DeviceKind::SecurityCamera),
        ];

        LAYOUT
            .iter()
            .map(|(name, kind)| {
                let name = if prefix.is_empty() {
                    (*name).to_string()
                } else {
                    format!("{}_{}", prefix, name)
                };
                self.create(&name, *kind)
            })
            .collect()
    }
}

fn parse_device_spec(spec: &str) -> Result<(&str, DeviceKind), DeviceError> {
    let invalid = || DeviceError::InvalidSpec(spec.to_string());
    let (name, kind) = spec.split_once(':').ok_or_else(invalid)?;
    if kind.contains(':') {
        return Err(invalid());
    }
    Ok((name.trim(), kind.trim().parse()?))
}

impl DeviceProvider for DeviceRegistry {
    fn devices(&self) -> Arc<[Arc<Device>]> {
        Arc::clone(&self.devices.read())
    }
}
