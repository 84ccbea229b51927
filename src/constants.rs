// SPDX-License-Identifier: GPL-3.0-only

//! Engine-wide constants

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Focal lengths within this distance of a group's first lens belong to that group
pub const FOCAL_GROUP_EPSILON_MM: f32 = 0.25;

/// Sensor ratio a 2x crop variant has to the wide lens on each axis
pub const HALF_SIZE_TARGET: f32 = 0.5;

/// Allowed deviation from [`HALF_SIZE_TARGET`] per axis
pub const HALF_SIZE_TOLERANCE: f32 = 0.12;

/// Ultrawide 3A overlap fraction bounds and the value used without a zoom hint
pub const ULTRA_3A_FRACTION_MIN: f32 = 0.45;
pub const ULTRA_3A_FRACTION_MAX: f32 = 0.90;
pub const DEFAULT_ULTRA_3A_FRACTION: f32 = 0.60;

/// Centered crop applied to ultrawide metering in 2x zoom (matches the downstream crop)
pub const ZOOM_2X_METERING_FRACTION: f32 = 0.5;

/// Last-known-good lens ids used when discovery fails
pub const FALLBACK_LOGICAL_ID: &str = "0";
pub const FALLBACK_WIDE_ID: &str = "2";
pub const FALLBACK_ULTRA_ID: &str = "3";

/// Metering weight used for the single 3A region
pub const METERING_WEIGHT_MAX: u32 = 1000;

/// Tone curve sampling
pub mod tone {
    /// Points of the fine synthetic curve
    pub const FINE_CURVE_POINTS: u32 = 64;

    /// Points of the coarse fallback curve
    pub const COARSE_CURVE_POINTS: u32 = 16;

    /// Power applied to curve input positions; above 1.0 packs points into the shadows
    pub const SHADOW_DENSITY_POWER: f32 = 2.0;
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Still capture watchdog on profiles with unreliable capture results
    pub const CAPTURE_WATCHDOG: Duration = Duration::from_millis(2500);

    /// Default delay between preview start and the ultrawide priming capture
    pub const PRIMING_DELAY: Duration = Duration::from_millis(600);

    /// Retry backoff while the session is not ready for priming
    pub const PRIMING_RETRY_BACKOFF: Duration = Duration::from_millis(200);

    /// Priming gives up after this many not-ready retries
    pub const PRIMING_MAX_RETRIES: u32 = 5;

    /// How long `stop()` lets background writers drain
    pub const EXECUTOR_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Background executor sizing
pub mod executors {
    /// Threads writing per-lens JPEG/DNG files
    pub const PHOTO_IO_THREADS: usize = 2;
}

/// Video encoder bitrate presets
///
/// Target bitrate is picked per resolution tier so each lens stream gets a
/// sensible rate without a manual override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Low bitrate - smaller files, reduced quality
    Low,
    /// Medium bitrate - balanced quality and file size (default)
    #[default]
    Medium,
    /// High bitrate - larger files, better quality
    High,
}

impl BitratePreset {
    /// Bitrate in kbps for one lens stream of the given width
    ///
    /// - SD: 1 / 2 / 4 Mbps
    /// - 720p: 2.5 / 5 / 10 Mbps
    /// - 1080p: 4 / 8 / 16 Mbps
    /// - 1440p: 8 / 16 / 32 Mbps
    /// - 2160p: 15 / 30 / 50 Mbps
    pub fn bitrate_kbps(&self, width: u32) -> u32 {
        let [low, medium, high] = match get_resolution_tier(width) {
            ResolutionTier::SD => [1_000, 2_000, 4_000],
            ResolutionTier::HD => [2_500, 5_000, 10_000],
            ResolutionTier::FullHD => [4_000, 8_000, 16_000],
            ResolutionTier::TwoK => [8_000, 16_000, 32_000],
            ResolutionTier::FourK => [15_000, 30_000, 50_000],
        };
        match self {
            BitratePreset::Low => low,
            BitratePreset::Medium => medium,
            BitratePreset::High => high,
        }
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    SD,
    HD,
    FullHD,
    TwoK,
    FourK,
}

pub fn get_resolution_tier(width: u32) -> ResolutionTier {
    match width {
        w if w >= 3840 => ResolutionTier::FourK,
        w if w >= 2560 => ResolutionTier::TwoK,
        w if w >= 1920 => ResolutionTier::FullHD,
        w if w >= 1280 => ResolutionTier::HD,
        _ => ResolutionTier::SD,
    }
}

/// Build information
pub mod app_info {
    /// Version string stamped by the build script
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}
