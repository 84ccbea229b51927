// SPDX-License-Identifier: GPL-3.0-only

//! DNG packaging of RAW16 stills
//!
//! Each lens is written as a single-strip CFA DNG. Color gains and the color
//! transform come from that lens's entry in the capture result, which is why
//! RAW captures are only ready once the result has arrived.

use crate::backends::camera::types::{ImageHandle, PhysicalResult, StreamFormat};
use ::dng::ifd::{Ifd, IfdValue, Offsets};
use ::dng::tags::ifd as tiff_tags;
use ::dng::{DngWriter, FileType};
use std::io::{Cursor, Write};
use std::sync::Arc;

/// Samples are 10-bit values in 16-bit containers
const WHITE_LEVEL: u32 = 1023;
/// D65
const CALIBRATION_ILLUMINANT: u16 = 21;
/// TIFF/EP photometric interpretation for color filter arrays
const PHOTOMETRIC_CFA: u16 = 32803;
/// RGGB
const CFA_PATTERN: [u8; 4] = [0, 1, 1, 2];
const RATIONAL_SCALE: u32 = 1_000_000;

/// Identity when the device reports no color transform
const IDENTITY_TRANSFORM: [f32; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// Camera description written alongside every RAW frame
#[derive(Debug, Clone, Copy)]
pub struct DngContext<'a> {
    pub model: &'a str,
    pub lens_id: &'a str,
    /// Per-lens metadata from the capture result
    pub physical: Option<&'a PhysicalResult>,
}

struct SensorData(Arc<[u8]>);

impl Offsets for SensorData {
    fn size(&self) -> u32 {
        self.0.len() as u32
    }

    fn write(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        writer.write_all(&self.0)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.max(1)
}

fn rational(value: f32) -> IfdValue {
    let numerator = (value.max(0.0) * RATIONAL_SCALE as f32).round() as u32;
    let divisor = gcd(numerator, RATIONAL_SCALE);
    IfdValue::Rational(numerator / divisor, RATIONAL_SCALE / divisor)
}

fn signed_rational(value: f32) -> IfdValue {
    IfdValue::SRational((value * RATIONAL_SCALE as f32).round() as i32, RATIONAL_SCALE as i32)
}

/// Neutral white from per-channel gains `[R, Geven, Godd, B]`
fn as_shot_neutral(gains: [f32; 4]) -> Option<[f32; 3]> {
    let [r, g_even, g_odd, b] = gains;
    let g = (g_even + g_odd) / 2.0;
    if r <= 0.0 || g <= 0.0 || b <= 0.0 {
        return None;
    }
    Some([g / r, 1.0, g / b])
}

/// Encode one RAW16 still as DNG
pub fn encode_dng(image: &ImageHandle, context: &DngContext<'_>) -> Result<Vec<u8>, String> {
    if image.format != StreamFormat::Raw16 {
        return Err(format!("{:?} frames cannot be stored as DNG", image.format));
    }
    let (width, height) = (image.size.width, image.size.height);
    let expected = width as usize * height as usize * 2;
    if width == 0 || height == 0 || image.data.len() != expected {
        return Err(format!(
            "RAW16 buffer of {} bytes does not match {}x{}",
            image.data.len(),
            width,
            height
        ));
    }

    let mut ifd = Ifd::default();
    ifd.insert(tiff_tags::NewSubfileType, IfdValue::Long(0));
    ifd.insert(tiff_tags::ImageWidth, IfdValue::Long(width));
    ifd.insert(tiff_tags::ImageLength, IfdValue::Long(height));
    ifd.insert(tiff_tags::BitsPerSample, IfdValue::Short(16));
    ifd.insert(tiff_tags::Compression, IfdValue::Short(1));
    ifd.insert(tiff_tags::PhotometricInterpretation, IfdValue::Short(PHOTOMETRIC_CFA));
    ifd.insert(tiff_tags::SamplesPerPixel, IfdValue::Short(1));
    ifd.insert(tiff_tags::RowsPerStrip, IfdValue::Long(height));
    ifd.insert(tiff_tags::PlanarConfiguration, IfdValue::Short(1));
    ifd.insert(
        tiff_tags::CFARepeatPatternDim,
        IfdValue::List(vec![IfdValue::Short(2), IfdValue::Short(2)]),
    );
    ifd.insert(tiff_tags::CFAPattern, CFA_PATTERN);
    ifd.insert(tiff_tags::DNGVersion, [1u8, 4, 0, 0]);
    ifd.insert(tiff_tags::BlackLevel, IfdValue::Long(0));
    ifd.insert(tiff_tags::WhiteLevel, IfdValue::Long(WHITE_LEVEL));

    ifd.insert(tiff_tags::Make, IfdValue::Ascii(context.model.to_string()));
    ifd.insert(
        tiff_tags::Model,
        IfdValue::Ascii(format!("{} lens {}", context.model, context.lens_id)),
    );
    ifd.insert(
        tiff_tags::UniqueCameraModel,
        IfdValue::Ascii(format!("{} {}", context.model, context.lens_id)),
    );
    ifd.insert(
        tiff_tags::Software,
        IfdValue::Ascii(format!("Stereo Camera v{}", env!("CARGO_PKG_VERSION"))),
    );

    let physical = context.physical.cloned().unwrap_or_default();
    let transform = physical.color_transform.unwrap_or(IDENTITY_TRANSFORM);
    ifd.insert(
        tiff_tags::ColorMatrix1,
        IfdValue::List(transform.iter().map(|v| signed_rational(*v)).collect()),
    );
    ifd.insert(tiff_tags::CalibrationIlluminant1, IfdValue::Short(CALIBRATION_ILLUMINANT));
    if let Some(neutral) = physical.color_gains.and_then(as_shot_neutral) {
        ifd.insert(
            tiff_tags::AsShotNeutral,
            IfdValue::List(neutral.iter().map(|v| rational(*v)).collect()),
        );
    }
    if let Some(exposure_ns) = physical.exposure_time_ns.filter(|ns| *ns > 0) {
        let micros = (exposure_ns / 1_000).clamp(1, u32::MAX as i64) as u32;
        let divisor = gcd(micros, RATIONAL_SCALE);
        ifd.insert(
            tiff_tags::ExposureTime,
            IfdValue::Rational(micros / divisor, RATIONAL_SCALE / divisor),
        );
    }
    if let Some(iso) = physical.sensitivity_iso.filter(|iso| *iso > 0) {
        ifd.insert(
            tiff_tags::ISOSpeedRatings,
            IfdValue::Short(iso.min(u16::MAX as i32) as u16),
        );
    }
    if let Some(shading) = physical.lens_shading_map_size {
        ifd.insert(
            tiff_tags::ImageDescription,
            IfdValue::Ascii(format!("lens shading map {}", shading)),
        );
    }

    let strip: Arc<dyn Offsets + Send + Sync> = Arc::new(SensorData(Arc::clone(&image.data)));
    ifd.insert(tiff_tags::StripOffsets, IfdValue::Offsets(strip));
    ifd.insert(tiff_tags::StripByteCounts, IfdValue::Long(expected as u32));

    let mut buffer = Vec::new();
    DngWriter::write_dng(Cursor::new(&mut buffer), true, FileType::Dng, vec![ifd])
        .map_err(|e| format!("DNG encoding failed: {:?}", e))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::Size;

    fn raw_image(width: u32, height: u32) -> ImageHandle {
        let data = vec![0x10u8; (width * height * 2) as usize];
        ImageHandle::new("3", StreamFormat::Raw16, Size::new(width, height), 0, Arc::from(data))
    }

    #[test]
    fn test_encode_writes_tiff_container() {
        let physical = PhysicalResult {
            exposure_time_ns: Some(10_000_000),
            sensitivity_iso: Some(100),
            color_gains: Some([2.0, 1.0, 1.0, 1.6]),
            ..Default::default()
        };
        let context = DngContext {
            model: "Pixel 8 Pro",
            lens_id: "3",
            physical: Some(&physical),
        };
        let image = raw_image(8, 6);
        let dng = encode_dng(&image, &context).unwrap();
        // Little endian TIFF byte order mark
        assert!(dng.starts_with(b"II"));
        assert!(dng.len() > image.data.len());
    }

    #[test]
    fn test_encode_rejects_mismatched_buffers() {
        let context = DngContext {
            model: "Pixel",
            lens_id: "2",
            physical: None,
        };
        let short = ImageHandle::new("2", StreamFormat::Raw16, Size::new(8, 6), 0, Arc::from(vec![0u8; 10]));
        assert!(encode_dng(&short, &context).is_err());
        let jpeg = ImageHandle::new("2", StreamFormat::Jpeg, Size::new(8, 6), 0, Arc::from(vec![0u8; 96]));
        assert!(encode_dng(&jpeg, &context).is_err());
    }

    #[test]
    fn test_neutral_from_gains() {
        assert_eq!(as_shot_neutral([2.0, 1.0, 1.0, 1.6]), Some([0.5, 1.0, 0.625]));
        assert_eq!(as_shot_neutral([0.0, 1.0, 1.0, 1.0]), None);
    }
}
