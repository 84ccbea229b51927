// SPDX-License-Identifier: GPL-3.0-only

//! Capability caching and size negotiation across the two lenses

use super::CameraHal;
use super::rig::{LensRig, ZoomMode};
use super::types::{FpsRange, LensCharacteristics, Size, StreamFormat};
use tracing::{debug, info, warn};

/// Two sizes are considered the same shape within this aspect tolerance
const ASPECT_TOLERANCE: f64 = 0.01;

/// Cached characteristics of the logical camera and the two active lenses
#[derive(Debug, Clone)]
pub struct RigCapabilities {
    pub logical_id: String,
    pub logical: LensCharacteristics,
    pub wide_id: String,
    pub wide: LensCharacteristics,
    pub ultra_id: String,
    pub ultra: LensCharacteristics,
}

impl RigCapabilities {
    /// Query characteristics for the lenses active under `zoom`
    pub fn load(hal: &dyn CameraHal, rig: &LensRig, zoom: ZoomMode) -> Result<Self, String> {
        let wide_id = rig
            .wide_id(zoom)
            .ok_or_else(|| format!("rig has no lens for {:?}", zoom))?
            .to_string();

        let logical = hal
            .characteristics(&rig.logical_id)
            .map_err(|e| format!("logical {}: {}", rig.logical_id, e))?;
        let wide = hal
            .characteristics(&wide_id)
            .map_err(|e| format!("wide {}: {}", wide_id, e))?;
        let ultra = hal
            .characteristics(&rig.ultra_id)
            .map_err(|e| format!("ultra {}: {}", rig.ultra_id, e))?;

        debug!(
            wide = %wide_id,
            ultra = %rig.ultra_id,
            wide_fps = ?wide.fps_ranges,
            ultra_fps = ?ultra.fps_ranges,
            "Cached lens capabilities"
        );

        Ok(Self {
            logical_id: rig.logical_id.clone(),
            logical,
            wide_id,
            wide,
            ultra_id: rig.ultra_id.clone(),
            ultra,
        })
    }

    /// Physical lenses in (wide, ultra) order
    pub fn physical(&self) -> [(&str, &LensCharacteristics); 2] {
        [
            (self.wide_id.as_str(), &self.wide),
            (self.ultra_id.as_str(), &self.ultra),
        ]
    }

    /// FPS ranges both lenses support
    pub fn common_fps_ranges(&self) -> Vec<FpsRange> {
        intersect_fps_ranges(&self.wide.fps_ranges, &self.ultra.fps_ranges)
    }
}

/// Sizes both lenses can stream at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedSizes {
    pub preview: Size,
    /// `None` when the lenses share no recordable size
    pub record: Option<Size>,
    pub still_wide: Size,
    pub still_ultra: Size,
}

impl NegotiatedSizes {
    /// Whether both lenses capture stills at the same size
    pub fn still_common(&self) -> bool {
        self.still_wide == self.still_ultra
    }
}

/// Ranges present in both lists
pub fn intersect_fps_ranges(a: &[FpsRange], b: &[FpsRange]) -> Vec<FpsRange> {
    a.iter().filter(|r| b.contains(r)).copied().collect()
}

/// Sizes present in both lists, largest first
pub fn common_sizes(a: &[Size], b: &[Size]) -> Vec<Size> {
    let mut common: Vec<Size> = a.iter().filter(|s| b.contains(s)).copied().collect();
    common.sort_by_key(|s| std::cmp::Reverse(s.area()));
    common.dedup();
    common
}

/// Largest candidate that fits inside `target`, preferring the target's aspect ratio
pub fn choose_size(candidates: &[Size], target: Size) -> Option<Size> {
    let fitting = candidates.iter().filter(|s| s.fits_within(target));

    fitting
        .clone()
        .filter(|s| (s.aspect() - target.aspect()).abs() <= ASPECT_TOLERANCE)
        .max_by_key(|s| s.area())
        .or_else(|| fitting.max_by_key(|s| s.area()))
        .copied()
}

fn largest(sizes: &[Size]) -> Option<Size> {
    sizes.iter().max_by_key(|s| s.area()).copied()
}

/// Outcome of negotiation, including whether stills fell back to per-lens sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    pub sizes: NegotiatedSizes,
    pub still_fallback: bool,
}

/// Negotiate preview, record and still sizes for the current lens pair
pub fn negotiate_sizes(
    caps: &RigCapabilities,
    preview_target: Size,
    record_target: Size,
    raw: bool,
) -> Result<Negotiation, String> {
    let stream_common = common_sizes(
        caps.wide.sizes(StreamFormat::Private),
        caps.ultra.sizes(StreamFormat::Private),
    );

    let preview = choose_size(&stream_common, preview_target).ok_or_else(|| {
        format!(
            "no preview size up to {} shared by lenses {} and {}",
            preview_target, caps.wide_id, caps.ultra_id
        )
    })?;

    let record = choose_size(&stream_common, record_target);
    if record.is_none() {
        warn!(target = %record_target, "No common record size; recording will be refused");
    }

    let still_format = if raw {
        StreamFormat::Raw16
    } else {
        StreamFormat::Jpeg
    };
    let wide_stills = caps.wide.sizes(still_format);
    let ultra_stills = caps.ultra.sizes(still_format);

    let (still_wide, still_ultra, still_fallback) =
        match common_sizes(wide_stills, ultra_stills).first() {
            Some(size) => (*size, *size, false),
            None => {
                let wide = largest(wide_stills)
                    .ok_or_else(|| format!("lens {} has no {:?} sizes", caps.wide_id, still_format))?;
                let ultra = largest(ultra_stills).ok_or_else(|| {
                    format!("lens {} has no {:?} sizes", caps.ultra_id, still_format)
                })?;
                (wide, ultra, true)
            }
        };

    let sizes = NegotiatedSizes {
        preview,
        record,
        still_wide,
        still_ultra,
    };
    info!(
        preview = %sizes.preview,
        record = ?sizes.record,
        still_wide = %sizes.still_wide,
        still_ultra = %sizes.still_ultra,
        still_fallback,
        "Negotiated sizes"
    );
    Ok(Negotiation {
        sizes,
        still_fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_sizes_sorted() {
        let a = [Size::new(640, 480), Size::new(1920, 1080), Size::new(4000, 3000)];
        let b = [Size::new(1920, 1080), Size::new(640, 480)];
        assert_eq!(common_sizes(&a, &b), vec![Size::new(1920, 1080), Size::new(640, 480)]);
    }

    #[test]
    fn test_choose_size_prefers_aspect() {
        let candidates = [Size::new(1600, 1200), Size::new(1280, 720), Size::new(640, 480)];
        assert_eq!(
            choose_size(&candidates, Size::new(1920, 1080)),
            Some(Size::new(1280, 720))
        );
        // No 16:10 candidate fits, so the largest fitting one is used
        assert_eq!(
            choose_size(&candidates[..1], Size::new(1920, 1200)),
            Some(Size::new(1600, 1200))
        );
        assert_eq!(choose_size(&candidates, Size::new(320, 240)), None);
    }

    #[test]
    fn test_intersect_fps_ranges() {
        let wide = [FpsRange::new(15, 30), FpsRange::new(30, 30), FpsRange::new(60, 60)];
        let ultra = [FpsRange::new(30, 30), FpsRange::new(15, 30)];
        assert_eq!(
            intersect_fps_ranges(&wide, &ultra),
            vec![FpsRange::new(15, 30), FpsRange::new(30, 30)]
        );
    }
}
