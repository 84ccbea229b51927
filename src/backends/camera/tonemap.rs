// SPDX-License-Identifier: GPL-3.0-only

//! Tone curve and exposure bias hints
//!
//! Both are best-effort: whatever the lenses do not advertise is skipped and
//! logged, never turned into an error. `Auto` leaves the request untouched.

use super::formats::RigCapabilities;
use super::request::RequestBuilder;
use super::types::{ControlKey, ControlValue, LensCharacteristics, TonemapMode, TonemapPreset};
use crate::constants::tone::{COARSE_CURVE_POINTS, FINE_CURVE_POINTS, SHADOW_DENSITY_POWER};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How tones are mapped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ToneMapStrategy {
    /// Device default, no hints at all
    #[default]
    Auto,
    Linear,
    SCurveLow,
    SCurveMedium,
    SCurveHigh,
}

impl ToneMapStrategy {
    pub const ALL: [ToneMapStrategy; 5] = [
        ToneMapStrategy::Auto,
        ToneMapStrategy::Linear,
        ToneMapStrategy::SCurveLow,
        ToneMapStrategy::SCurveMedium,
        ToneMapStrategy::SCurveHigh,
    ];

    /// Blend factor toward a smoothstep curve (0.0 = linear)
    fn contrast(&self) -> f32 {
        match self {
            ToneMapStrategy::Auto | ToneMapStrategy::Linear => 0.0,
            ToneMapStrategy::SCurveLow => 0.25,
            ToneMapStrategy::SCurveMedium => 0.5,
            ToneMapStrategy::SCurveHigh => 0.8,
        }
    }
}

/// Which rung of the fallback ladder ended up in the request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TonemapApplied {
    /// Strategy is `Auto`; nothing was touched
    Skipped,
    FineCurve,
    CoarseCurve,
    Preset,
    /// No rung was supported by every lens
    Unsupported,
}

/// Flattened (in, out) curve of `points` samples.
///
/// Input positions are remapped by a power law so samples crowd into the
/// shadows, where a sparse curve would visibly band.
pub fn generate_curve(strategy: ToneMapStrategy, points: u32) -> Vec<f32> {
    let n = points.max(2);
    let contrast = strategy.contrast();
    let mut curve = Vec::with_capacity(n as usize * 2);

    for i in 0..n {
        let t = i as f32 / (n - 1) as f32;
        let x = t.powf(SHADOW_DENSITY_POWER);
        let smooth = x * x * (3.0 - 2.0 * x);
        let y = (x + contrast * (smooth - x)).clamp(0.0, 1.0);
        curve.push(x);
        curve.push(y);
    }
    curve
}

fn all_lenses(caps: &RigCapabilities) -> [&LensCharacteristics; 3] {
    [&caps.logical, &caps.wide, &caps.ultra]
}

fn supports_mode(caps: &RigCapabilities, mode: TonemapMode) -> bool {
    all_lenses(caps)
        .iter()
        .all(|c| c.tonemap_modes.contains(&mode))
}

fn max_curve_points(caps: &RigCapabilities) -> u32 {
    all_lenses(caps)
        .iter()
        .map(|c| c.max_curve_points)
        .min()
        .unwrap_or(0)
}

/// Exposure compensation range every lens accepts
fn common_compensation_range(caps: &RigCapabilities) -> (i32, i32) {
    all_lenses(caps).iter().fold((i32::MIN, i32::MAX), |(lo, hi), c| {
        (lo.max(c.ae_compensation_range.0), hi.min(c.ae_compensation_range.1))
    })
}

/// Try one rung; the builder is only changed when every path accepted it
fn try_rung(builder: &mut RequestBuilder, controls: &[(ControlKey, ControlValue)]) -> bool {
    let mut attempt = builder.clone();
    let accepted = controls
        .iter()
        .all(|(key, value)| attempt.set_shared(*key, value.clone()));
    if accepted {
        *builder = attempt;
    }
    accepted
}

/// Apply tone curve and exposure bias hints.
pub fn apply_tonemap(
    builder: &mut RequestBuilder,
    caps: &RigCapabilities,
    strategy: ToneMapStrategy,
    exposure_bias_steps: i32,
) -> TonemapApplied {
    if strategy == ToneMapStrategy::Auto {
        return TonemapApplied::Skipped;
    }

    let applied = apply_curve(builder, caps, strategy);
    apply_exposure_bias(builder, caps, exposure_bias_steps);
    applied
}

fn apply_curve(
    builder: &mut RequestBuilder,
    caps: &RigCapabilities,
    strategy: ToneMapStrategy,
) -> TonemapApplied {
    let curve_mode = (ControlKey::TonemapMode, ControlValue::Tonemap(TonemapMode::ContrastCurve));

    if supports_mode(caps, TonemapMode::ContrastCurve) {
        let available = max_curve_points(caps);
        for (points, rung) in [
            (FINE_CURVE_POINTS, TonemapApplied::FineCurve),
            (COARSE_CURVE_POINTS, TonemapApplied::CoarseCurve),
        ] {
            if available < points {
                debug!(points, available, "Curve too fine for device");
                continue;
            }
            let curve = ControlValue::Curve(generate_curve(strategy, points));
            if try_rung(builder, &[curve_mode.clone(), (ControlKey::TonemapCurve, curve)]) {
                debug!(?strategy, points, "Applied tone curve");
                return rung;
            }
            warn!(?strategy, points, "Tone curve rejected, trying next fallback");
        }
    }

    if supports_mode(caps, TonemapMode::PresetCurve)
        && try_rung(
            builder,
            &[
                (ControlKey::TonemapMode, ControlValue::Tonemap(TonemapMode::PresetCurve)),
                (ControlKey::TonemapPresetCurve, ControlValue::Preset(TonemapPreset::Srgb)),
            ],
        )
    {
        debug!(?strategy, "Applied preset tone curve");
        return TonemapApplied::Preset;
    }

    warn!(?strategy, "No tone mapping control supported on both lenses");
    TonemapApplied::Unsupported
}

/// Clamped exposure compensation; returns the value set, if any
fn apply_exposure_bias(
    builder: &mut RequestBuilder,
    caps: &RigCapabilities,
    steps: i32,
) -> Option<i32> {
    if steps == 0 {
        return None;
    }
    let (lo, hi) = common_compensation_range(caps);
    if lo > hi {
        warn!(steps, "Lenses share no exposure compensation range");
        return None;
    }
    let clamped = steps.clamp(lo, hi);
    if try_rung(
        builder,
        &[(ControlKey::AeExposureCompensation, ControlValue::Int(clamped))],
    ) {
        debug!(requested = steps, applied = clamped, "Applied exposure bias");
        Some(clamped)
    } else {
        warn!(steps, "Exposure compensation not supported");
        None
    }
}
