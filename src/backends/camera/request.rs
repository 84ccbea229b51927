// SPDX-License-Identifier: GPL-3.0-only

//! Capture request construction
//!
//! A logical request is fanned out by the platform to both physical lenses.
//! Every shared control must be set on the logical request *and* on each
//! physical override, otherwise the two lenses drift apart (different noise
//! reduction, edge, distortion, AE range or 3A regions per lens).

use super::formats::RigCapabilities;
use super::rig::ZoomMode;
use super::types::{
    CaptureRequest, CaptureTemplate, ControlKey, ControlMap, ControlValue, FpsRange,
    LensCharacteristics, MeteringRegion, OutputTarget, ProcessingMode, Rect,
};
use crate::constants::{METERING_WEIGHT_MAX, ZOOM_2X_METERING_FRACTION};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Set `key` only when the lens advertises it. Returns whether the value was set.
pub fn set_if_supported(
    map: &mut ControlMap,
    supported: &BTreeSet<ControlKey>,
    key: ControlKey,
    value: ControlValue,
) -> bool {
    if supported.contains(&key) {
        map.insert(key, value);
        true
    } else {
        debug!(?key, "Control not supported, skipping");
        false
    }
}

/// Builds a capture request with logical controls and per-lens overrides
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    request: CaptureRequest,
    logical_keys: BTreeSet<ControlKey>,
    physical_keys: BTreeMap<String, BTreeSet<ControlKey>>,
}

impl RequestBuilder {
    pub fn new(template: CaptureTemplate, caps: &RigCapabilities) -> Self {
        let mut request = CaptureRequest::new(template);
        let mut physical_keys = BTreeMap::new();
        for (id, chars) in caps.physical() {
            request.physical.insert(id.to_string(), ControlMap::new());
            physical_keys.insert(id.to_string(), chars.request_keys.clone());
        }

        Self {
            request,
            logical_keys: caps.logical.request_keys.clone(),
            physical_keys,
        }
    }

    pub fn target(mut self, target: OutputTarget) -> Self {
        self.request.add_target(target);
        self
    }

    pub fn add_target(&mut self, target: OutputTarget) {
        self.request.add_target(target);
    }

    pub fn set_logical(&mut self, key: ControlKey, value: ControlValue) -> bool {
        set_if_supported(&mut self.request.logical, &self.logical_keys, key, value)
    }

    pub fn set_physical(&mut self, lens_id: &str, key: ControlKey, value: ControlValue) -> bool {
        let (Some(map), Some(keys)) = (
            self.request.physical.get_mut(lens_id),
            self.physical_keys.get(lens_id),
        ) else {
            debug!(lens = %lens_id, ?key, "No override path for lens");
            return false;
        };
        set_if_supported(map, keys, key, value)
    }

    /// Set a shared control on the logical request and every physical override.
    ///
    /// Returns true only when every path accepted the value.
    pub fn set_shared(&mut self, key: ControlKey, value: ControlValue) -> bool {
        let mut all = self.set_logical(key, value.clone());
        let lenses: Vec<String> = self.physical_keys.keys().cloned().collect();
        for lens in lenses {
            all &= self.set_physical(&lens, key, value.clone());
        }
        all
    }

    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }

    pub fn build(self) -> CaptureRequest {
        self.request
    }
}

/// Centered rectangle covering `fraction` of `active` on each axis
pub fn centered_rect(active: Rect, fraction: f32) -> Rect {
    let fraction = fraction.clamp(0.0, 1.0);
    let w = (active.width() as f32 * fraction).round() as i32;
    let h = (active.height() as f32 * fraction).round() as i32;
    let left = active.left + (active.width() - w) / 2;
    let top = active.top + (active.height() - h) / 2;
    Rect::new(left, top, left + w, top + h)
}

/// Ultrawide metering area: the part of its frame that overlaps the wide lens.
///
/// In 2x mode the wide frame is cropped to its centered half downstream, so the
/// metering area is additionally intersected with the centered 50% rectangle.
pub fn ultra_metering_rect(active: Rect, ultra_3a_fraction: f32, zoom: ZoomMode) -> Rect {
    let region = centered_rect(active, ultra_3a_fraction);
    match zoom {
        ZoomMode::Wide1x => region,
        ZoomMode::Wide2x => {
            let crop = centered_rect(active, ZOOM_2X_METERING_FRACTION);
            region.intersect(&crop).unwrap_or(crop)
        }
    }
}

/// Pick the AE target range for a desired frame rate.
///
/// An exact `(fps, fps)` range always wins; otherwise the narrowest range that
/// tops out at `fps`, then the narrowest range containing it, then the range
/// with the highest maximum below it.
pub fn choose_ae_fps_range(ranges: &[FpsRange], desired: u32) -> Option<FpsRange> {
    if let Some(exact) = ranges.iter().find(|r| r.min == desired && r.max == desired) {
        return Some(*exact);
    }
    if let Some(r) = ranges
        .iter()
        .filter(|r| r.max == desired)
        .min_by_key(|r| r.width())
    {
        return Some(*r);
    }
    if let Some(r) = ranges
        .iter()
        .filter(|r| r.contains(desired))
        .min_by_key(|r| r.width())
    {
        return Some(*r);
    }
    ranges
        .iter()
        .filter(|r| r.max < desired)
        .max_by_key(|r| (r.max, r.min))
        .copied()
}

/// Apply the ultrawide 3A regions on the ultrawide override only
pub fn apply_ultra_regions(
    builder: &mut RequestBuilder,
    ultra_id: &str,
    ultra: &LensCharacteristics,
    ultra_3a_fraction: f32,
    zoom: ZoomMode,
) {
    let rect = ultra_metering_rect(ultra.active_array, ultra_3a_fraction, zoom);
    let regions = vec![MeteringRegion {
        rect,
        weight: METERING_WEIGHT_MAX,
    }];

    for (key, max) in [
        (ControlKey::AeRegions, ultra.max_regions_ae),
        (ControlKey::AfRegions, ultra.max_regions_af),
        (ControlKey::AwbRegions, ultra.max_regions_awb),
    ] {
        if max == 0 {
            continue;
        }
        builder.set_physical(ultra_id, key, ControlValue::Regions(regions.clone()));
    }
}

/// Shared post-processing modes for both lenses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingModes {
    pub noise_reduction: ProcessingMode,
    pub edge: ProcessingMode,
    pub distortion_correction: ProcessingMode,
}

/// Set noise reduction, edge and distortion modes on every path.
///
/// A mode is only requested when both lenses advertise it, so the lenses
/// never end up processed differently.
pub fn apply_processing_modes(
    builder: &mut RequestBuilder,
    caps: &RigCapabilities,
    modes: ProcessingModes,
) {
    let [(_, wide), (_, ultra)] = caps.physical();

    if both_support(&wide.noise_reduction_modes, &ultra.noise_reduction_modes, modes.noise_reduction) {
        builder.set_shared(
            ControlKey::NoiseReductionMode,
            ControlValue::Processing(modes.noise_reduction),
        );
    }
    if both_support(&wide.edge_modes, &ultra.edge_modes, modes.edge) {
        builder.set_shared(ControlKey::EdgeMode, ControlValue::Processing(modes.edge));
    }
    if both_support(
        &wide.distortion_modes,
        &ultra.distortion_modes,
        modes.distortion_correction,
    ) {
        builder.set_shared(
            ControlKey::DistortionCorrectionMode,
            ControlValue::Processing(modes.distortion_correction),
        );
    }
}

/// An empty list means the lens does not enumerate modes; the key check decides
fn both_support(wide: &[ProcessingMode], ultra: &[ProcessingMode], mode: ProcessingMode) -> bool {
    [wide, ultra]
        .iter()
        .all(|modes| modes.is_empty() || modes.contains(&mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps_with_keys(keys: &[ControlKey]) -> RigCapabilities {
        let chars = LensCharacteristics {
            request_keys: keys.iter().copied().collect(),
            active_array: Rect::new(0, 0, 4000, 3000),
            max_regions_ae: 1,
            max_regions_af: 1,
            max_regions_awb: 0,
            ..Default::default()
        };
        RigCapabilities {
            logical_id: "0".into(),
            logical: chars.clone(),
            wide_id: "2".into(),
            wide: chars.clone(),
            ultra_id: "3".into(),
            ultra: chars,
        }
    }

    #[test]
    fn test_centered_rect() {
        assert_eq!(
            centered_rect(Rect::new(0, 0, 1000, 800), 0.7),
            Rect::new(150, 120, 850, 680)
        );
    }

    #[test]
    fn test_ultra_metering_2x_intersects_half() {
        let active = Rect::new(0, 0, 1000, 800);
        assert_eq!(
            ultra_metering_rect(active, 0.7, ZoomMode::Wide1x),
            Rect::new(150, 120, 850, 680)
        );
        assert_eq!(
            ultra_metering_rect(active, 0.7, ZoomMode::Wide2x),
            Rect::new(250, 200, 750, 600)
        );
        // A fraction smaller than the crop keeps its own rectangle
        assert_eq!(
            ultra_metering_rect(active, 0.45, ZoomMode::Wide2x),
            centered_rect(active, 0.45)
        );
    }

    #[test]
    fn test_choose_ae_fps_range_exact_wins() {
        let ranges = [FpsRange::new(15, 15), FpsRange::new(30, 30), FpsRange::new(24, 30)];
        assert_eq!(choose_ae_fps_range(&ranges, 30), Some(FpsRange::new(30, 30)));
    }

    #[test]
    fn test_choose_ae_fps_range_fallbacks() {
        let ranges = [FpsRange::new(7, 30), FpsRange::new(15, 30), FpsRange::new(10, 60)];
        assert_eq!(choose_ae_fps_range(&ranges, 30), Some(FpsRange::new(15, 30)));
        assert_eq!(choose_ae_fps_range(&ranges, 45), Some(FpsRange::new(10, 60)));
        assert_eq!(choose_ae_fps_range(&[FpsRange::new(15, 24)], 30), Some(FpsRange::new(15, 24)));
        assert_eq!(choose_ae_fps_range(&[], 30), None);
    }

    #[test]
    fn test_set_shared_sets_every_path() {
        let caps = caps_with_keys(&[ControlKey::EdgeMode]);
        let mut builder = RequestBuilder::new(CaptureTemplate::Preview, &caps);
        assert!(builder.set_shared(ControlKey::EdgeMode, ControlValue::Processing(ProcessingMode::Off)));

        let request = builder.build();
        let expected = Some(&ControlValue::Processing(ProcessingMode::Off));
        assert_eq!(request.logical.get(&ControlKey::EdgeMode), expected);
        assert_eq!(request.physical["2"].get(&ControlKey::EdgeMode), expected);
        assert_eq!(request.physical["3"].get(&ControlKey::EdgeMode), expected);
    }

    #[test]
    fn test_unsupported_key_is_skipped() {
        let caps = caps_with_keys(&[]);
        let mut builder = RequestBuilder::new(CaptureTemplate::Preview, &caps);
        assert!(!builder.set_shared(ControlKey::TonemapMode, ControlValue::Int(0)));
        assert!(builder.request().logical.is_empty());
        assert!(!builder.set_physical("9", ControlKey::EdgeMode, ControlValue::Int(0)));
    }

    #[test]
    fn test_ultra_regions_only_on_ultra() {
        let caps = caps_with_keys(&[ControlKey::AeRegions, ControlKey::AfRegions, ControlKey::AwbRegions]);
        let mut builder = RequestBuilder::new(CaptureTemplate::Preview, &caps);
        apply_ultra_regions(&mut builder, "3", &caps.ultra, 0.6, ZoomMode::Wide1x);
        let request = builder.build();

        assert!(request.physical["2"].is_empty());
        assert!(request.physical["3"].contains_key(&ControlKey::AeRegions));
        assert!(request.physical["3"].contains_key(&ControlKey::AfRegions));
        // max_regions_awb is 0
        assert!(!request.physical["3"].contains_key(&ControlKey::AwbRegions));
    }
}
