//! Audio input device enumeration and selection.
//!
//! A device is chosen by a user-supplied string: a plain number is an index
//! into the input device list, anything else is a case-insensitive substring
//! of the device name. No selector means the host's default input.

use serde::{Deserialize, Serialize};

/// Metadata about an audio input device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Position in the host's input device list; usable as a selector.
    pub index: usize,
    /// Human-readable device name reported by the OS.
    pub name: String,
    pub channels: u16,
    pub default_sample_rate: u32,
    /// Whether this is the system default input device.
    pub is_default: bool,
    /// Heuristic flag for devices that likely capture system/output audio.
    pub is_loopback_like: bool,
}

/// How to pick an input device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Default,
    Index(usize),
    /// Lowercased name fragment.
    NameContains(String),
}

impl DeviceSelector {
    pub fn parse(selector: Option<&str>) -> Self {
        match selector.map(str::trim) {
            None | Some("") => DeviceSelector::Default,
            Some(s) => match s.parse::<usize>() {
                Ok(index) => DeviceSelector::Index(index),
                Err(_) => DeviceSelector::NameContains(s.to_lowercase()),
            },
        }
    }

    /// Index into `names` this selector picks, if any. `Default` never
    /// matches here; the caller asks the host instead.
    pub fn find(&self, names: &[String]) -> Option<usize> {
        match self {
            DeviceSelector::Default => None,
            DeviceSelector::Index(index) => (*index < names.len()).then_some(*index),
            DeviceSelector::NameContains(fragment) => names
                .iter()
                .position(|name| name.to_lowercase().contains(fragment.as_str())),
        }
    }
}

const LOOPBACK_KEYWORDS: &[&str] = &[
    "stereo mix",
    "wave out",
    "what u hear",
    "what you hear",
    "loopback",
    "monitor of",
];

/// Best-effort check for devices that capture system output rather than a microphone.
pub fn is_loopback_like_name(name: &str) -> bool {
    let lowered = name.trim().to_ascii_lowercase();
    LOOPBACK_KEYWORDS.iter().any(|k| lowered.contains(k))
}

#[cfg(feature = "audio-cpal")]
pub(crate) fn resolve_input_device(
    host: &cpal::Host,
    selector: &DeviceSelector,
) -> crate::error::Result<cpal::Device> {
    use cpal::traits::{DeviceTrait, HostTrait};

    use crate::error::GateError;

    if *selector == DeviceSelector::Default {
        if let Some(device) = host.default_input_device() {
            return Ok(device);
        }
        tracing::warn!("no default input device, falling back to first available input");
        return host
            .input_devices()
            .map_err(|e| GateError::AudioDevice(e.to_string()))?
            .next()
            .ok_or(GateError::NoDefaultInputDevice);
    }

    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| GateError::AudioDevice(e.to_string()))?
        .collect();
    let names: Vec<String> = devices
        .iter()
        .enumerate()
        .map(|(idx, d)| d.name().unwrap_or_else(|_| format!("Input Device {idx}")))
        .collect();

    match selector.find(&names) {
        Some(idx) => {
            if is_loopback_like_name(&names[idx]) {
                tracing::warn!(device = %names[idx], "selected input looks like a loopback device");
            }
            devices
                .into_iter()
                .nth(idx)
                .ok_or_else(|| GateError::DeviceNotFound(format!("{selector:?}")))
        }
        None => Err(GateError::DeviceNotFound(match selector {
            DeviceSelector::Index(i) => format!("no input device at index {i}"),
            DeviceSelector::NameContains(s) => format!("no input device matching '{s}'"),
            DeviceSelector::Default => "default".into(),
        })),
    }
}

/// List all available audio input devices on the system.
///
/// Returns an empty `Vec` if cpal is not available or no devices exist.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .enumerate()
            .map(|(index, device)| {
                let name = device
                    .name()
                    .unwrap_or_else(|_| format!("Input Device {index}"));
                let (channels, default_sample_rate) = device
                    .default_input_config()
                    .map(|c| (c.channels(), c.sample_rate().0))
                    .unwrap_or((0, 0));
                DeviceInfo {
                    index,
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    is_loopback_like: is_loopback_like_name(&name),
                    name,
                    channels,
                    default_sample_rate,
                }
            })
            .collect(),
        Err(e) => {
            tracing::warn!("failed to enumerate input devices: {e}");
            vec![]
        }
    }
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec![
            "Built-in Microphone".to_string(),
            "USB Audio CODEC".to_string(),
            "Monitor of Built-in Audio".to_string(),
        ]
    }

    #[test]
    fn parses_index_name_and_default() {
        assert_eq!(DeviceSelector::parse(None), DeviceSelector::Default);
        assert_eq!(DeviceSelector::parse(Some("  ")), DeviceSelector::Default);
        assert_eq!(DeviceSelector::parse(Some("2")), DeviceSelector::Index(2));
        assert_eq!(
            DeviceSelector::parse(Some("USB")),
            DeviceSelector::NameContains("usb".into())
        );
    }

    #[test]
    fn finds_by_index_and_substring() {
        let names = names();
        assert_eq!(DeviceSelector::Index(1).find(&names), Some(1));
        assert_eq!(DeviceSelector::Index(3).find(&names), None);
        assert_eq!(DeviceSelector::parse(Some("codec")).find(&names), Some(1));
        assert_eq!(DeviceSelector::parse(Some("BUILT-IN")).find(&names), Some(0));
        assert_eq!(DeviceSelector::parse(Some("hdmi")).find(&names), None);
        assert_eq!(DeviceSelector::Default.find(&names), None);
    }

    #[test]
    fn detects_common_loopback_names() {
        assert!(is_loopback_like_name("Stereo Mix (Realtek Audio)"));
        assert!(is_loopback_like_name("Monitor of Built-in Audio"));
        assert!(!is_loopback_like_name("Built-in Microphone"));
    }
}
