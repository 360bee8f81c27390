//! Settings management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings from {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Player settings. Every field has a default, so a settings file only
/// needs to name what it changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub display: DisplaySettings,
    pub input: InputSettings,
    pub runtime: RuntimeSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub frame_width: u32,
    pub frame_height: u32,
    /// Integer upscale applied when presenting.
    pub scale: u32,
    pub refresh_hz: u32,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            frame_width: 240,
            frame_height: 320,
            scale: 2,
            refresh_hz: pinbox_core::time::REFRESH_RATE_HZ,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    pub touch_radius: f32,
    /// Draw the on-screen gamepad below the frame.
    pub gamepad: bool,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            touch_radius: crate::input::TOUCH_RADIUS,
            gamepad: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Wall-clock budget per guest entry. Off when absent.
    pub watchdog_ms: Option<u64>,
    pub animation_frame_hz: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            watchdog_ms: None,
            animation_frame_hz: pinbox_core::time::REFRESH_RATE_HZ,
        }
    }
}

impl RuntimeSettings {
    pub fn watchdog(&self) -> Option<Duration> {
        self.watchdog_ms.map(Duration::from_millis)
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_json(&text)?;
        tracing::info!(path = %path.display(), "settings loaded");
        Ok(settings)
    }

    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let d = &self.display;
        if d.frame_width == 0 || d.frame_height == 0 {
            return Err(SettingsError::Invalid("frame dimensions must be non-zero".into()));
        }
        if d.scale == 0 {
            return Err(SettingsError::Invalid("display scale must be at least 1".into()));
        }
        let radius = self.input.touch_radius;
        if radius.is_nan() || radius <= 0.0 {
            return Err(SettingsError::Invalid("touch radius must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_player() {
        let s = Settings::default();

        assert_eq!((s.display.frame_width, s.display.frame_height), (240, 320));
        assert_eq!(s.input.touch_radius, 25.0);
        assert_eq!(s.runtime.watchdog(), None);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let s = Settings::from_json(r#"{ "runtime": { "watchdog_ms": 500 } }"#).unwrap();

        assert_eq!(s.runtime.watchdog(), Some(Duration::from_millis(500)));
        assert_eq!(s.runtime.animation_frame_hz, 60);
        assert_eq!(s.display, DisplaySettings::default());
    }

    #[test]
    fn test_zero_scale_rejected() {
        let err = Settings::from_json(r#"{ "display": { "scale": 0 } }"#).unwrap_err();
        assert!(matches!(err, SettingsError::Invalid(_)));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = Settings::load(Path::new("/nonexistent/pinbox.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/pinbox.json"));
    }
}
