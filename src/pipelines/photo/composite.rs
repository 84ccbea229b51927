// SPDX-License-Identifier: GPL-3.0-only

//! Stereo composite generation

use crate::backends::camera::ZoomMode;
use crate::constants::ZOOM_2X_METERING_FRACTION;
use image::{RgbImage, imageops};
use std::sync::Mutex;
use tracing::debug;

/// JPEG quality of composites
const COMPOSITE_JPEG_QUALITY: u8 = 92;

/// Composition service turning a wide/ultrawide pair into one image
pub trait StereoComposer: Send + Sync {
    /// Forget the cached alignment; called when the lens pair changes
    fn reset_last_good_transform(&self);

    /// Align both frames and encode the composite
    fn align_and_encode(
        &self,
        wide: &[u8],
        ultra: &[u8],
        zoom: ZoomMode,
        overlap_fraction: f32,
    ) -> Result<Vec<u8>, String>;
}

/// Crop of the ultrawide frame that covers the wide field of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CropTransform {
    source: (u32, u32),
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl CropTransform {
    fn centered(width: u32, height: u32, fraction: f32) -> Self {
        let w = ((width as f32 * fraction).round() as u32).clamp(1, width.max(1));
        let h = ((height as f32 * fraction).round() as u32).clamp(1, height.max(1));
        Self {
            source: (width, height),
            x: (width - w) / 2,
            y: (height - h) / 2,
            width: w,
            height: h,
        }
    }
}

/// Places the wide frame and the matching ultrawide crop side by side.
///
/// The crop is the centered overlap region, halved again in 2x mode. The
/// last transform is reused while frame sizes stay the same.
#[derive(Default)]
pub struct SideBySideComposer {
    last_good: Mutex<Option<CropTransform>>,
}

impl SideBySideComposer {
    pub fn new() -> Self {
        Self::default()
    }

    fn transform_for(&self, ultra: &RgbImage, zoom: ZoomMode, overlap_fraction: f32) -> CropTransform {
        let source = ultra.dimensions();
        let mut last = match self.last_good.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(t) = *last
            && t.source == source
        {
            return t;
        }

        let fraction = match zoom {
            ZoomMode::Wide1x => overlap_fraction,
            ZoomMode::Wide2x => overlap_fraction * ZOOM_2X_METERING_FRACTION,
        };
        let t = CropTransform::centered(source.0, source.1, fraction);
        debug!(?t, ?zoom, "Computed composite transform");
        *last = Some(t);
        t
    }
}

impl StereoComposer for SideBySideComposer {
    fn reset_last_good_transform(&self) {
        if let Ok(mut last) = self.last_good.lock() {
            *last = None;
        }
    }

    fn align_and_encode(
        &self,
        wide: &[u8],
        ultra: &[u8],
        zoom: ZoomMode,
        overlap_fraction: f32,
    ) -> Result<Vec<u8>, String> {
        let wide = image::load_from_memory(wide)
            .map_err(|e| format!("failed to decode wide frame: {}", e))?
            .to_rgb8();
        let ultra = image::load_from_memory(ultra)
            .map_err(|e| format!("failed to decode ultrawide frame: {}", e))?
            .to_rgb8();

        let t = self.transform_for(&ultra, zoom, overlap_fraction);
        let cropped = imageops::crop_imm(&ultra, t.x, t.y, t.width, t.height).to_image();
        let (w, h) = wide.dimensions();
        let matched = imageops::resize(&cropped, w, h, imageops::FilterType::Triangle);

        let mut canvas = RgbImage::new(w * 2, h);
        imageops::replace(&mut canvas, &wide, 0, 0);
        imageops::replace(&mut canvas, &matched, w as i64, 0);

        let mut out = Vec::new();
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, COMPOSITE_JPEG_QUALITY);
        encoder
            .encode_image(&canvas)
            .map_err(|e| format!("failed to encode composite: {}", e))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn jpeg(width: u32, height: u32, value: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([value, value, value]));
        let mut out = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 90)
            .encode_image(&img)
            .unwrap();
        out
    }

    #[test]
    fn test_side_by_side_dimensions() {
        let composer = SideBySideComposer::new();
        let out = composer
            .align_and_encode(&jpeg(32, 24, 200), &jpeg(64, 48, 50), ZoomMode::Wide1x, 0.6)
            .unwrap();
        let img = image::load_from_memory(&out).unwrap();
        assert_eq!((img.width(), img.height()), (64, 24));
    }

    #[test]
    fn test_transform_cached_until_reset() {
        let composer = SideBySideComposer::new();
        let ultra = RgbImage::new(100, 80);
        let first = composer.transform_for(&ultra, ZoomMode::Wide1x, 0.6);
        assert_eq!((first.width, first.height), (60, 48));
        // Same size: cached transform wins even with a different zoom
        assert_eq!(composer.transform_for(&ultra, ZoomMode::Wide2x, 0.6), first);

        composer.reset_last_good_transform();
        let halved = composer.transform_for(&ultra, ZoomMode::Wide2x, 0.6);
        assert_eq!((halved.width, halved.height), (30, 24));
        assert_eq!((halved.x, halved.y), (35, 28));
    }

    #[test]
    fn test_undecodable_input_fails() {
        let composer = SideBySideComposer::new();
        assert!(
            composer
                .align_and_encode(b"nope", &jpeg(8, 8, 0), ZoomMode::Wide1x, 0.6)
                .is_err()
        );
    }
}
