//! Device commands shared by the shell and automation rules

use crate::device::Device;
use crate::error::DeviceError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single operation on a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceCommand {
    /// Turn device on
    TurnOn,
    /// Turn device off
    TurnOff,
    /// Toggle device state
    Toggle,
    /// Set light brightness in percent
    SetBrightness { level: i32 },
    /// Set thermostat temperature in °C
    SetTemperature { temperature: i32 },
    StartRecording,
    StopRecording,
    DetectMotion,
    /// Report the current status line
    Status,
}

impl DeviceCommand {
    /// Parse a command word and its optional argument.
    ///
    /// Accepts `on`, `off`, `toggle`, `brightness <0-100>`,
    /// `temperature <10-32>`, `record`, `stop`, `motion` and `status`,
    /// plus a few long-form aliases.
    pub fn parse(command: &str, value: Option<&str>) -> Result<Self, DeviceError> {
        let command = command.to_ascii_lowercase();
        let parsed = match command.as_str() {
            "on" | "turnon" | "turn_on" => DeviceCommand::TurnOn,
            "off" | "turnoff" | "turn_off" => DeviceCommand::TurnOff,
            "toggle" => DeviceCommand::Toggle,
            "brightness" | "dim" => DeviceCommand::SetBrightness {
                level: parse_value(&command, value)?,
            },
            "temperature" | "temp" | "settemp" => DeviceCommand::SetTemperature {
                temperature: parse_value(&command, value)?,
            },
            "record" | "start_recording" => DeviceCommand::StartRecording,
            "stop" | "stop_recording" => DeviceCommand::StopRecording,
            "motion" | "detect_motion" => DeviceCommand::DetectMotion,
            "status" => DeviceCommand::Status,
            _ => return Err(DeviceError::UnknownCommand(command)),
        };
        Ok(parsed)
    }

    /// Run the command against a device and describe the outcome
    pub async fn apply(&self, device: &Device) -> Result<String, DeviceError> {
        let name = device.name();
        let message = match self {
            DeviceCommand::TurnOn => {
                if device.turn_on().await {
                    format!("{} turned ON", name)
                } else {
                    format!("{} is already ON", name)
                }
            }
            DeviceCommand::TurnOff => {
                if device.turn_off().await {
                    format!("{} turned OFF", name)
                } else {
                    format!("{} is already OFF", name)
                }
            }
            DeviceCommand::Toggle => {
                let on = device.toggle().await;
                format!("{} toggled {}", name, if on { "ON" } else { "OFF" })
            }
            DeviceCommand::SetBrightness { level } => {
                device.set_brightness(*level).await?;
                format!("{} brightness set to {}%", name, level)
            }
            DeviceCommand::SetTemperature { temperature } => {
                device.set_temperature(*temperature).await?;
                format!("{} temperature set to {}°C", name, temperature)
            }
            DeviceCommand::StartRecording => {
                if device.start_recording().await? {
                    format!("{} started recording", name)
                } else {
                    format!("{} is already recording", name)
                }
            }
            DeviceCommand::StopRecording => {
                if device.stop_recording().await? {
                    format!("{} stopped recording", name)
                } else {
                    format!("{} is not recording", name)
                }
            }
            DeviceCommand::DetectMotion => {
                if device.detect_motion().await? {
                    format!("Motion detected by {}", name)
                } else {
                    format!("{} already tracking motion", name)
                }
            }
            DeviceCommand::Status => device.status(),
        };
        Ok(message)
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCommand::TurnOn => write!(f, "on"),
            DeviceCommand::TurnOff => write!(f, "off"),
            DeviceCommand::Toggle => write!(f, "toggle"),
            DeviceCommand::SetBrightness { level } => write!(f, "brightness {}", level),
            DeviceCommand::SetTemperature { temperature } => {
                write!(f, "temperature {}", temperature)
            }
            DeviceCommand::StartRecording => write!(f, "record"),
            DeviceCommand::StopRecording => write!(f, "stop"),
            DeviceCommand::DetectMotion => write!(f, "motion"),
            DeviceCommand::Status => write!(f, "status"),
        }
    }
}

fn parse_value(command: &str, value: Option<&str>) -> Result<i32, DeviceError> {
    let value = value.ok_or_else(|| DeviceError::MissingValue(command.to_string()))?;
    value.trim().parse().map_err(|_| DeviceError::InvalidValue {
        command: command.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(DeviceCommand::parse("ON", None).unwrap(), DeviceCommand::TurnOn);
        assert_eq!(
            DeviceCommand::parse("brightness", Some("40")).unwrap(),
            DeviceCommand::SetBrightness { level: 40 }
        );
        assert_eq!(
            DeviceCommand::parse("temp", Some("19")).unwrap(),
            DeviceCommand::SetTemperature { temperature: 19 }
        );
        assert!(matches!(
            DeviceCommand::parse("brightness", None),
            Err(DeviceError::MissingValue(_))
        ));
        assert!(matches!(
            DeviceCommand::parse("brightness", Some("bright")),
            Err(DeviceError::InvalidValue { .. })
        ));
        assert!(matches!(
            DeviceCommand::parse("explode", None),
            Err(DeviceError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_serde_tagging() {
        let json = serde_json::to_value(DeviceCommand::SetBrightness { level: 30 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "set_brightness", "level": 30}));
    }

    #[tokio::test]
    async fn test_apply_reports_outcome() {
        let light = Device::light("Porch").unwrap();
        assert_eq!(
            DeviceCommand::TurnOn.apply(&light).await.unwrap(),
            "Porch turned ON"
        );
        assert_eq!(
            DeviceCommand::TurnOn.apply(&light).await.unwrap(),
            "Porch is already ON"
        );
        assert!(DeviceCommand::SetBrightness { level: 150 }
            .apply(&light)
            .await
            .is_err());
        assert!(DeviceCommand::SetTemperature { temperature: 20 }
            .apply(&light)
            .await
            .is_err());
    }
}
