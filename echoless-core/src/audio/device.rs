//! Audio device enumeration and selection.

use serde::{Deserialize, Serialize};

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name reported by the OS.
    pub name: String,
    /// Whether this is the host's default device for its direction.
    pub is_default: bool,
    /// Capture devices that record the system output digitally. Cancelling
    /// against one of these removes everything, not just the echo.
    pub is_loopback_like: bool,
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
    "blackhole",
    "soundflower",
];

/// Best-effort check for capture devices that tap the system output.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

/// Direction of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

/// List capture devices. Empty when cpal is unavailable.
pub fn list_input_devices() -> Vec<DeviceInfo> {
    list_devices(Direction::Input)
}

/// List playback devices. Empty when cpal is unavailable.
pub fn list_output_devices() -> Vec<DeviceInfo> {
    list_devices(Direction::Output)
}

#[cfg(feature = "audio-cpal")]
fn list_devices(direction: Direction) -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let (default_name, devices) = match direction {
        Direction::Input => (
            host.default_input_device().and_then(|d| d.name().ok()),
            host.input_devices().map(|d| d.collect::<Vec<_>>()),
        ),
        Direction::Output => (
            host.default_output_device().and_then(|d| d.name().ok()),
            host.output_devices().map(|d| d.collect::<Vec<_>>()),
        ),
    };

    match devices {
        Ok(devices) => {
            let mut list: Vec<DeviceInfo> = devices
                .iter()
                .enumerate()
                .map(|(idx, device)| {
                    let name = device
                        .name()
                        .unwrap_or_else(|_| format!("{} device {}", direction.as_str(), idx + 1));
                    DeviceInfo {
                        is_default: default_name.as_deref() == Some(name.as_str()),
                        is_loopback_like: direction == Direction::Input
                            && is_loopback_like_name(&name),
                        name,
                    }
                })
                .collect();
            list.sort_by_key(|d| (!d.is_default, d.name.to_ascii_lowercase()));
            list
        }
        Err(e) => {
            tracing::warn!("failed to enumerate {} devices: {e}", direction.as_str());
            Vec::new()
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
fn list_devices(_direction: Direction) -> Vec<DeviceInfo> {
    vec![]
}

/// Resolve a device by preferred name, falling back to the host default and
/// then to the first device listed.
#[cfg(feature = "audio-cpal")]
pub(crate) fn select_device(
    host: &cpal::Host,
    direction: Direction,
    preferred_name: Option<&str>,
) -> crate::error::Result<cpal::Device> {
    use crate::error::EcholessError;
    use cpal::traits::{DeviceTrait, HostTrait};
    use tracing::warn;

    let mut devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| EcholessError::AudioDevice(e.to_string()))?;

    if let Some(preferred_name) = preferred_name {
        if let Some(found) =
            devices.find(|device| device.name().map(|n| n == preferred_name).unwrap_or(false))
        {
            return Ok(found);
        }
        warn!(
            "preferred {} device '{}' not found, falling back",
            direction.as_str(),
            preferred_name
        );
    }

    let default = match direction {
        Direction::Input => host.default_input_device(),
        Direction::Output => host.default_output_device(),
    };
    if let Some(default) = default {
        return Ok(default);
    }

    let mut devices = match direction {
        Direction::Input => host.input_devices(),
        Direction::Output => host.output_devices(),
    }
    .map_err(|e| EcholessError::AudioDevice(e.to_string()))?;
    let fallback = devices
        .next()
        .ok_or(EcholessError::NoDefaultDevice(direction.as_str()))?;
    warn!(
        "no default {} device, falling back to first available",
        direction.as_str()
    );
    Ok(fallback)
}
