// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::request::ProcessingModes;
use crate::backends::camera::tonemap::ToneMapStrategy;
use crate::backends::camera::types::{ProcessingMode, Size};
use crate::constants::BitratePreset;
use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Video stabilization applied while recording
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Stabilization {
    #[default]
    Off,
    /// Electronic (video) stabilization
    Electronic,
    /// Optical stabilization
    Optical,
    /// Both electronic and optical
    Both,
}

impl Stabilization {
    pub fn electronic(&self) -> bool {
        matches!(self, Stabilization::Electronic | Stabilization::Both)
    }

    pub fn optical(&self) -> bool {
        matches!(self, Stabilization::Optical | Stabilization::Both)
    }
}

/// Recording settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSettings {
    /// Upper bound for the per-lens record size
    pub size: Size,
    pub fps: u32,
    /// Video encoder bitrate preset (Low, Medium, High)
    pub bitrate_preset: BitratePreset,
    /// Explicit bitrate, overrides the preset
    pub bitrate_override_kbps: Option<u32>,
    pub stabilization: Stabilization,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            size: Size::new(1920, 1080),
            fps: 30,
            bitrate_preset: BitratePreset::default(),
            bitrate_override_kbps: None,
            stabilization: Stabilization::default(),
        }
    }
}

impl RecordSettings {
    /// Bitrate for one lens stream of the given size
    pub fn bitrate_kbps(&self, size: Size) -> u32 {
        self.bitrate_override_kbps
            .unwrap_or_else(|| self.bitrate_preset.bitrate_kbps(size.width))
    }
}

/// Preview settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewSettings {
    /// Upper bound for the preview size
    pub size: Size,
    pub fps: u32,
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            size: Size::new(1920, 1080),
            fps: 30,
        }
    }
}

/// Post-processing modes requested on both lenses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LensProcessing {
    pub noise_reduction: ProcessingMode,
    pub edge: ProcessingMode,
    pub distortion_correction: ProcessingMode,
}

impl Default for LensProcessing {
    fn default() -> Self {
        Self {
            noise_reduction: ProcessingMode::Fast,
            edge: ProcessingMode::Fast,
            distortion_correction: ProcessingMode::Fast,
        }
    }
}

impl From<LensProcessing> for ProcessingModes {
    fn from(p: LensProcessing) -> Self {
        ProcessingModes {
            noise_reduction: p.noise_reduction,
            edge: p.edge,
            distortion_correction: p.distortion_correction,
        }
    }
}

/// Tone mapping hints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneSettings {
    pub strategy: ToneMapStrategy,
    /// Exposure compensation in device steps, ignored for `Auto`
    pub exposure_bias_steps: i32,
}

/// Logging verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Debug-level timing for every sync event; stills also wait for the capture result
    pub detailed_sync_logging: bool,
    /// Report the sensor timestamp delta of each stereo pair; stills wait for the result
    pub sync_notification: bool,
    /// Record every encoded sample into the recording log
    pub recording_sample_log: bool,
    /// Write a JSON log next to each stereo capture
    pub capture_log: bool,
}

/// Which still outputs are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub save_wide: bool,
    pub save_ultra: bool,
    /// Side-by-side composite, processed mode only
    pub save_composite: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            save_wide: true,
            save_ultra: true,
            save_composite: true,
        }
    }
}

/// Ultrawide warm-up capture after preview starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimingSettings {
    pub enabled: bool,
    /// Delay after the preview session becomes active
    pub delay_ms: u64,
}

impl Default for PrimingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_ms: crate::constants::timing::PRIMING_DELAY.as_millis() as u64,
        }
    }
}

impl PrimingSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Engine settings
///
/// Persisted as JSON; every field has a default so older files keep loading.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Allow switching to the cropped 2x wide lens
    pub zoom_2x_enabled: bool,
    /// Capture RAW stills instead of processed JPEGs
    pub raw_mode: bool,
    pub record: RecordSettings,
    pub preview: PreviewSettings,
    pub processing: LensProcessing,
    pub tone: ToneSettings,
    pub logging: LoggingSettings,
    pub outputs: OutputSettings,
    pub ultra_priming: PrimingSettings,
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stereo-camera")
            .join("settings.json")
    }

    /// Load settings, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> AppResult<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(AppError::Config(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        let settings = serde_json::from_str(&text)?;
        info!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Config(format!("failed to create {}: {}", parent.display(), e)))?;
        }
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .map_err(|e| AppError::Config(format!("failed to write {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Saved settings");
        Ok(())
    }

    /// Whether processed stills must wait for the capture result
    pub fn processed_needs_result(&self) -> bool {
        self.logging.detailed_sync_logging || self.logging.sync_notification
    }
}
