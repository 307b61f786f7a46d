//! Persistent application settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use echoless_core::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Session tuning passed straight to the core.
    pub session: SessionConfig,
    /// WAV file to play. `None` plays the test tone.
    pub playback_file: Option<PathBuf>,
    pub tone_hz: f32,
    pub tone_secs: f32,
    pub tone_volume: f32,
    /// Where `raw.wav`, `filtered.wav` and `echo.wav` are written.
    pub output_dir: PathBuf,
    pub drain_interval_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            playback_file: None,
            tone_hz: 220.0,
            tone_secs: 3.0,
            tone_volume: 0.5,
            output_dir: PathBuf::from("tmp"),
            drain_interval_ms: 1000,
        }
    }
}

impl AppSettings {
    /// Clamp values that would make the run meaningless.
    pub fn normalize(&mut self) {
        if !self.tone_hz.is_finite() || self.tone_hz <= 0.0 {
            self.tone_hz = 220.0;
        }
        self.tone_secs = if self.tone_secs.is_finite() {
            self.tone_secs.clamp(0.2, 600.0)
        } else {
            3.0
        };
        self.tone_volume = if self.tone_volume.is_finite() {
            self.tone_volume.clamp(0.0, 1.0)
        } else {
            0.5
        };
        self.drain_interval_ms = self.drain_interval_ms.clamp(100, 10_000);
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Echoless")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("echoless")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<AppSettings>(&raw).unwrap_or_else(|e| {
            warn!("ignoring malformed settings at {}: {e}", path.display());
            AppSettings::default()
        }),
        Err(_) => AppSettings::default(),
    };
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
