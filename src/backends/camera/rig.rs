// SPDX-License-Identifier: GPL-3.0-only

//! Lens rig discovery
//!
//! Finds the logical rear multi-camera and sorts its physical lenses into the
//! ultrawide, the wide (1x) and an optional cropped 2x variant of the wide.

use super::CameraHal;
use super::types::{Capability, Facing, LensCharacteristics};
use crate::constants::{
    DEFAULT_ULTRA_3A_FRACTION, FALLBACK_LOGICAL_ID, FALLBACK_ULTRA_ID, FALLBACK_WIDE_ID,
    FOCAL_GROUP_EPSILON_MM, HALF_SIZE_TARGET, HALF_SIZE_TOLERANCE, ULTRA_3A_FRACTION_MAX,
    ULTRA_3A_FRACTION_MIN,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Which physical lens acts as "the wide lens"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZoomMode {
    #[default]
    Wide1x,
    /// Cropped/remosaiced variant of the wide sensor
    Wide2x,
}

/// Coarse per-model behavior assumptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceProfile {
    /// Handheld portrait-first usage, RAW capable, capture results arrive reliably
    PortraitHandheld,
    /// Landscape-first rigs; RAW is not assumed and still results may never arrive
    LandscapeMounted,
}

impl DeviceProfile {
    /// Model substring that selects the portrait profile
    const PORTRAIT_MODEL_MARKER: &'static str = "Pixel";

    pub fn from_model(model: &str) -> Self {
        if model.contains(Self::PORTRAIT_MODEL_MARKER) {
            DeviceProfile::PortraitHandheld
        } else {
            DeviceProfile::LandscapeMounted
        }
    }

    /// Display rotation assumed for the usual holding orientation
    pub fn display_rotation(&self) -> u32 {
        match self {
            DeviceProfile::PortraitHandheld => 90,
            DeviceProfile::LandscapeMounted => 0,
        }
    }

    pub fn assumes_raw(&self) -> bool {
        matches!(self, DeviceProfile::PortraitHandheld)
    }

    /// Whether still captures need a watchdog because results can go missing
    pub fn needs_capture_watchdog(&self) -> bool {
        matches!(self, DeviceProfile::LandscapeMounted)
    }
}

/// The resolved set of lens ids that form the stereo pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensRig {
    pub logical_id: String,
    pub wide_1x_id: String,
    pub wide_2x_id: Option<String>,
    pub ultra_id: String,
    pub profile: DeviceProfile,
    pub display_rotation: u32,
    /// Fraction of the ultrawide frame that overlaps the wide lens, used for 3A regions
    pub ultra_3a_fraction: f32,
}

impl LensRig {
    /// Physical id acting as the wide lens for the given zoom mode
    pub fn wide_id(&self, zoom: ZoomMode) -> Option<&str> {
        match zoom {
            ZoomMode::Wide1x => Some(self.wide_1x_id.as_str()),
            ZoomMode::Wide2x => self.wide_2x_id.as_deref(),
        }
    }
}

/// Focal length and sensor geometry of one physical lens
#[derive(Debug, Clone, PartialEq)]
pub struct LensInfo {
    pub id: String,
    pub focal_mm: f32,
    /// Physical sensor width and height in millimeters
    pub sensor_mm: (f32, f32),
}

impl LensInfo {
    pub fn new(id: impl Into<String>, focal_mm: f32, sensor_mm: (f32, f32)) -> Self {
        Self {
            id: id.into(),
            focal_mm,
            sensor_mm,
        }
    }

    fn sensor_area(&self) -> f32 {
        self.sensor_mm.0 * self.sensor_mm.1
    }
}

/// Group lenses whose focal lengths are within `epsilon_mm` of the group's first member.
///
/// Lenses are swept in ascending focal order, so group 0 holds the shortest focal lengths.
pub fn group_by_approx_focal_mm(lenses: &[LensInfo], epsilon_mm: f32) -> Vec<Vec<LensInfo>> {
    let mut sorted = lenses.to_vec();
    sorted.sort_by(|a, b| a.focal_mm.total_cmp(&b.focal_mm));

    let mut groups: Vec<Vec<LensInfo>> = Vec::new();
    for lens in sorted {
        match groups.last_mut() {
            Some(group) if (lens.focal_mm - group[0].focal_mm).abs() <= epsilon_mm => {
                group.push(lens)
            }
            _ => groups.push(vec![lens]),
        }
    }
    groups
}

/// Pick the candidate whose sensor is about half of `base` on both axes.
///
/// Both width and height ratios must lie within 0.5 ± 0.12; among qualifying
/// candidates the one closest to exactly 0.5/0.5 wins.
pub fn find_half_size_variant<'a>(base: &LensInfo, candidates: &'a [LensInfo]) -> Option<&'a LensInfo> {
    let (base_w, base_h) = base.sensor_mm;
    if base_w <= 0.0 || base_h <= 0.0 {
        return None;
    }

    candidates
        .iter()
        .filter(|c| c.id != base.id)
        .filter_map(|c| {
            let rw = c.sensor_mm.0 / base_w;
            let rh = c.sensor_mm.1 / base_h;
            let dw = (rw - HALF_SIZE_TARGET).abs();
            let dh = (rh - HALF_SIZE_TARGET).abs();
            (dw <= HALF_SIZE_TOLERANCE && dh <= HALF_SIZE_TOLERANCE).then_some((c, dw + dh))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(c, _)| c)
}

/// Overlap fraction for ultrawide metering, derived from the logical minimum zoom ratio
pub fn ultra_3a_fraction(min_zoom_ratio: Option<f32>) -> f32 {
    match min_zoom_ratio {
        Some(ratio) if ratio > 0.0 && ratio < 1.0 => {
            ratio.clamp(ULTRA_3A_FRACTION_MIN, ULTRA_3A_FRACTION_MAX)
        }
        _ => DEFAULT_ULTRA_3A_FRACTION,
    }
}

/// Sort physical lenses into (ultra, wide-1x, wide-2x)
pub fn classify_lenses(lenses: &[LensInfo]) -> Result<(String, String, Option<String>), String> {
    let groups = group_by_approx_focal_mm(lenses, FOCAL_GROUP_EPSILON_MM);
    if groups.len() < 2 {
        return Err(format!(
            "need at least two focal length groups, found {}",
            groups.len()
        ));
    }

    let ultra = &groups[0][0];
    let wide_group = &groups[1];
    let wide_1x = wide_group
        .iter()
        .max_by(|a, b| a.sensor_area().total_cmp(&b.sensor_area()))
        .ok_or_else(|| "empty wide group".to_string())?;
    let wide_2x = find_half_size_variant(wide_1x, wide_group).map(|l| l.id.clone());

    Ok((ultra.id.clone(), wide_1x.id.clone(), wide_2x))
}

fn is_rear_multi_camera(chars: &LensCharacteristics) -> bool {
    chars.facing == Facing::Back
        && chars.has_capability(Capability::LogicalMultiCamera)
        && chars.physical_ids.len() >= 2
}

fn lens_info(hal: &dyn CameraHal, id: &str) -> Result<LensInfo, String> {
    let chars = hal.characteristics(id).map_err(|e| e.to_string())?;
    let focal = chars
        .focal_lengths_mm
        .first()
        .copied()
        .ok_or_else(|| format!("lens {} advertises no focal length", id))?;
    Ok(LensInfo::new(id, focal, chars.sensor_size_mm))
}

/// Discover the stereo rig from the camera service
pub fn resolve_rig(hal: &dyn CameraHal) -> Result<LensRig, String> {
    let ids = hal.camera_ids().map_err(|e| e.to_string())?;

    let mut candidates: Vec<(String, LensCharacteristics)> = ids
        .iter()
        .filter_map(|id| hal.characteristics(id).ok().map(|c| (id.clone(), c)))
        .filter(|(_, c)| is_rear_multi_camera(c))
        .collect();

    // Most physical lenses first, id "0" wins ties
    candidates.sort_by(|(a_id, a), (b_id, b)| {
        b.physical_ids
            .len()
            .cmp(&a.physical_ids.len())
            .then_with(|| (b_id == "0").cmp(&(a_id == "0")))
    });

    let (logical_id, logical) = candidates
        .into_iter()
        .next()
        .ok_or_else(|| "no rear logical multi-camera found".to_string())?;

    let mut lenses = Vec::with_capacity(logical.physical_ids.len());
    for id in &logical.physical_ids {
        match lens_info(hal, id) {
            Ok(info) => {
                debug!(lens = %id, focal_mm = info.focal_mm, sensor = ?info.sensor_mm, "Physical lens");
                lenses.push(info);
            }
            Err(e) => warn!(lens = %id, error = %e, "Skipping physical lens"),
        }
    }

    let (ultra_id, wide_1x_id, wide_2x_id) = classify_lenses(&lenses)?;
    let profile = DeviceProfile::from_model(&hal.device_model());
    let rig = LensRig {
        logical_id,
        wide_1x_id,
        wide_2x_id,
        ultra_id,
        profile,
        display_rotation: profile.display_rotation(),
        ultra_3a_fraction: ultra_3a_fraction(logical.min_zoom_ratio),
    };

    info!(
        logical = %rig.logical_id,
        wide = %rig.wide_1x_id,
        wide_2x = ?rig.wide_2x_id,
        ultra = %rig.ultra_id,
        profile = ?rig.profile,
        ultra_3a_fraction = rig.ultra_3a_fraction,
        "Resolved lens rig"
    );
    Ok(rig)
}

/// Last-known-good rig, validated against what the service actually exposes
pub fn fallback_rig(hal: &dyn CameraHal) -> Result<LensRig, String> {
    let logical = hal
        .characteristics(FALLBACK_LOGICAL_ID)
        .map_err(|e| format!("fallback logical camera: {}", e))?;

    for id in [FALLBACK_WIDE_ID, FALLBACK_ULTRA_ID] {
        if !logical.physical_ids.iter().any(|p| p == id) {
            return Err(format!(
                "fallback lens {} is not exposed by camera {}",
                id, FALLBACK_LOGICAL_ID
            ));
        }
        hal.characteristics(id)
            .map_err(|e| format!("fallback lens {}: {}", id, e))?;
    }

    let profile = DeviceProfile::from_model(&hal.device_model());
    warn!(
        logical = FALLBACK_LOGICAL_ID,
        wide = FALLBACK_WIDE_ID,
        ultra = FALLBACK_ULTRA_ID,
        "Using fallback lens rig"
    );
    Ok(LensRig {
        logical_id: FALLBACK_LOGICAL_ID.to_string(),
        wide_1x_id: FALLBACK_WIDE_ID.to_string(),
        wide_2x_id: None,
        ultra_id: FALLBACK_ULTRA_ID.to_string(),
        profile,
        display_rotation: profile.display_rotation(),
        ultra_3a_fraction: ultra_3a_fraction(logical.min_zoom_ratio),
    })
}
