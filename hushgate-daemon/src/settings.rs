//! Persistent daemon settings (JSON file in the user's config directory).
//!
//! Every field has a default, so a partial or missing file is fine. A few
//! fields can be overridden from the environment without touching the file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hushgate_core::{EngineConfig, PipelineConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const ENV_DEVICE: &str = "HUSHGATE_DEVICE";
pub const ENV_SILENCE_THRESHOLD: &str = "HUSHGATE_SILENCE_THRESHOLD";
pub const ENV_RECORD_PATH: &str = "HUSHGATE_RECORD_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct DaemonSettings {
    /// Index or name fragment of the input device.
    pub preferred_input_device: Option<String>,
    /// Write each session's emitted audio to this WAV file.
    pub record_path: Option<PathBuf>,
    pub block_size: usize,
    pub queue_capacity: usize,
    pub start_timeout_ms: u64,
    pub use_device_rate: bool,
    /// Start listening as soon as the daemon is up.
    pub listen_on_start: bool,
    pub pipeline: PipelineConfig,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            preferred_input_device: None,
            record_path: None,
            block_size: engine.block_size,
            queue_capacity: engine.queue_capacity,
            start_timeout_ms: engine.start_timeout.as_millis() as u64,
            use_device_rate: engine.use_device_rate,
            listen_on_start: false,
            pipeline: engine.pipeline,
        }
    }
}

impl DaemonSettings {
    pub fn normalize(&mut self) {
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.record_path = self.record_path.take().filter(|p| !p.as_os_str().is_empty());
        self.block_size = self.block_size.clamp(64, 16_384);
        self.queue_capacity = self.queue_capacity.clamp(1, 10_000);
        self.start_timeout_ms = self.start_timeout_ms.clamp(500, 60_000);
    }

    /// Apply `HUSHGATE_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(device) = lookup(ENV_DEVICE) {
            self.preferred_input_device = Some(device);
        }
        if let Some(raw) = lookup(ENV_SILENCE_THRESHOLD) {
            match raw.trim().parse::<f32>() {
                Ok(threshold) => self.pipeline.silence_threshold_rms = threshold,
                Err(_) => warn!(value = %raw, "ignoring invalid {ENV_SILENCE_THRESHOLD}"),
            }
        }
        if let Some(path) = lookup(ENV_RECORD_PATH) {
            self.record_path = Some(PathBuf::from(path));
        }
        self.normalize();
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            pipeline: self.pipeline.clone(),
            block_size: self.block_size,
            queue_capacity: self.queue_capacity,
            start_timeout: Duration::from_millis(self.start_timeout_ms),
            preferred_input_device: self.preferred_input_device.clone(),
            record_path: self.record_path.clone(),
            use_device_rate: self.use_device_rate,
            ..EngineConfig::default()
        }
    }
}

/// `$XDG_CONFIG_HOME/hushgate/<instance>.json`, falling back to `~/.config`.
pub fn default_settings_path(instance: &str) -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("hushgate")
        .join(format!("{instance}.json"))
}

/// Missing file means defaults; an unreadable one is logged and also means defaults.
pub fn load_settings(path: &Path) -> DaemonSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<DaemonSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "invalid settings file, using defaults: {e}");
            DaemonSettings::default()
        }),
        Err(_) => DaemonSettings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &DaemonSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

/// Load settings, first writing the defaults to `path` if nothing is there yet
/// so there is a file to edit.
pub fn load_or_init_settings(path: &Path) -> DaemonSettings {
    if !path.exists() {
        let defaults = DaemonSettings::default();
        match save_settings(path, &defaults) {
            Ok(()) => info!(path = %path.display(), "wrote default settings"),
            Err(e) => warn!(path = %path.display(), "could not write default settings: {e}"),
        }
        return defaults;
    }
    load_settings(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&dir.path().join("absent.json"));
        assert_eq!(settings, DaemonSettings::default());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("kitchen.json");
        let mut settings = DaemonSettings {
            preferred_input_device: Some("USB".into()),
            block_size: 512,
            ..DaemonSettings::default()
        };
        settings.pipeline.hysteresis_chunks = 4;
        save_settings(&path, &settings).expect("save");

        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("settings.json");

        let settings = load_or_init_settings(&path);
        assert_eq!(settings, DaemonSettings::default());
        assert!(path.exists());
        assert_eq!(load_settings(&path), DaemonSettings::default());

        // An existing file is read, never overwritten.
        fs::write(&path, r#"{ "listenOnStart": true }"#).expect("write");
        assert!(load_or_init_settings(&path).listen_on_start);
    }

    #[test]
    fn partial_file_fills_defaults_and_clamps() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("partial.json");
        fs::write(
            &path,
            r#"{ "preferredInputDevice": "  ", "blockSize": 1, "pipeline": { "normalize": true } }"#,
        )
        .expect("write");

        let settings = load_settings(&path);
        assert_eq!(settings.preferred_input_device, None);
        assert_eq!(settings.block_size, 64);
        assert!(settings.pipeline.normalize);
        assert_eq!(settings.pipeline.hysteresis_chunks, 10);
    }

    #[test]
    fn garbage_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.json");
        fs::write(&path, "not json").expect("write");
        assert_eq!(load_settings(&path), DaemonSettings::default());
    }

    #[test]
    fn overrides_replace_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_DEVICE, "Built-in"),
            (ENV_SILENCE_THRESHOLD, "120.5"),
            (ENV_RECORD_PATH, "/tmp/session.wav"),
        ]);
        let mut settings = DaemonSettings::default();
        settings.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.preferred_input_device.as_deref(), Some("Built-in"));
        assert_eq!(settings.pipeline.silence_threshold_rms, 120.5);
        assert_eq!(
            settings.record_path.as_deref(),
            Some(Path::new("/tmp/session.wav"))
        );
    }

    #[test]
    fn invalid_threshold_override_is_ignored() {
        let mut settings = DaemonSettings::default();
        settings.apply_overrides(|k| (k == ENV_SILENCE_THRESHOLD).then(|| "loud".to_string()));
        assert_eq!(settings.pipeline.silence_threshold_rms, 50.0);
    }

    #[test]
    fn engine_config_carries_settings() {
        let settings = DaemonSettings {
            start_timeout_ms: 2_000,
            use_device_rate: false,
            ..DaemonSettings::default()
        };
        let config = settings.engine_config();
        assert_eq!(config.start_timeout, Duration::from_millis(2_000));
        assert!(!config.use_device_rate);
        config.validate().expect("engine config should validate");
    }

    #[test]
    fn settings_path_is_per_instance() {
        let path = default_settings_path("kitchen");
        assert!(path.ends_with("hushgate/kitchen.json"));
    }
}
