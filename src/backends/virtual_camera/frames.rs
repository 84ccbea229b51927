// SPDX-License-Identifier: GPL-3.0-only

//! Still payloads of the simulated lenses
//!
//! Payloads are thumbnail sized whatever the configured output size, and the
//! delivered handles describe the payload. JPEGs decode with the `image`
//! crate so the composite path runs for real; RAW16 buffers package as DNG.

use crate::backends::camera::types::{Size, StreamFormat};
use image::{Rgb, RgbImage};
use std::sync::Arc;

const PAYLOAD_WIDTH: u32 = 64;
const PAYLOAD_HEIGHT: u32 = 48;
const PAYLOAD_JPEG_QUALITY: u8 = 85;

/// Dimensions of every simulated still
pub(super) const PAYLOAD_SIZE: Size = Size::new(PAYLOAD_WIDTH, PAYLOAD_HEIGHT);

/// Horizontal gradient, brightness offset per lens so the two frames differ
fn test_pattern(lens_index: usize) -> RgbImage {
    let offset = (lens_index as u32 * 60) % 256;
    RgbImage::from_fn(PAYLOAD_WIDTH, PAYLOAD_HEIGHT, |x, y| {
        let v = ((x * 255 / PAYLOAD_WIDTH + offset) % 256) as u8;
        Rgb([v, (y * 255 / PAYLOAD_HEIGHT) as u8, 255 - v])
    })
}

/// Payload of one still in `format`
pub(super) fn still_payload(format: StreamFormat, lens_index: usize) -> Result<Arc<[u8]>, String> {
    match format {
        StreamFormat::Jpeg => {
            let mut out = Vec::new();
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, PAYLOAD_JPEG_QUALITY)
                .encode_image(&test_pattern(lens_index))
                .map_err(|e| format!("failed to encode test still: {}", e))?;
            Ok(Arc::from(out))
        }
        // 16-bit little endian samples
        StreamFormat::Raw16 => {
            let pattern = test_pattern(lens_index);
            let data: Vec<u8> = pattern
                .pixels()
                .flat_map(|p| (u16::from(p[1]) << 2).to_le_bytes())
                .collect();
            Ok(Arc::from(data))
        }
        other => Err(format!("{:?} stills are not produced", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpeg_payload_decodes() {
        let data = still_payload(StreamFormat::Jpeg, 1).unwrap();
        let img = image::load_from_memory(&data).unwrap();
        assert_eq!((img.width(), img.height()), (PAYLOAD_WIDTH, PAYLOAD_HEIGHT));
    }

    #[test]
    fn test_raw_payload_size() {
        let data = still_payload(StreamFormat::Raw16, 0).unwrap();
        assert_eq!(data.len(), (PAYLOAD_WIDTH * PAYLOAD_HEIGHT * 2) as usize);
        assert!(still_payload(StreamFormat::Private, 0).is_err());
    }
}
