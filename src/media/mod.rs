// SPDX-License-Identifier: GPL-3.0-only

//! Encoder and muxer seam
//!
//! Recording drives two video encoders (one per lens), one audio encoder and
//! two muxers. The audio encoder feeds both muxers so each file carries the
//! same soundtrack:
//!
//! ```text
//! wide lens  ──▶ VideoEncoder ──▶ Muxer (wide file)  ◀──┐
//!                                                       ├── AudioEncoder
//! ultra lens ──▶ VideoEncoder ──▶ Muxer (ultra file) ◀──┘
//! ```
//!
//! Encoder internals live behind these traits; [`virtual_media`] provides an
//! implementation that writes synthetic samples.

pub mod virtual_media;

use crate::backends::camera::types::{Size, SurfaceId};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;

/// Metadata of one encoded sample as reported by an encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedSample {
    /// Presentation time assigned by the codec
    pub codec_pts_us: i64,
    /// Presentation time written to the container
    pub muxer_pts_us: i64,
    pub size_bytes: usize,
    pub flags: u32,
    /// Time spent handing the sample to the muxer
    pub write_duration_ns: u64,
}

impl EncodedSample {
    pub const FLAG_KEY_FRAME: u32 = 1;
    pub const FLAG_END_OF_STREAM: u32 = 4;

    pub fn is_key_frame(&self) -> bool {
        self.flags & Self::FLAG_KEY_FRAME != 0
    }
}

/// Callback tap for encoded samples
pub type SampleListener = Arc<dyn Fn(EncodedSample) + Send + Sync>;

/// Track a sample belongs to inside a muxer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Track {
    Video,
    Audio,
}

/// Video encoder parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoEncoderConfig {
    pub size: Size,
    pub fps: u32,
    pub bitrate_kbps: u32,
    /// Clockwise rotation hint stored in the container
    pub rotation: u32,
}

/// Container writer; shared between a video encoder and the audio encoder
pub trait Muxer: Send + Sync {
    fn label(&self) -> &str;

    fn start(&self) -> Result<(), String>;

    fn write_sample(&self, track: Track, sample: &EncodedSample, data: &[u8]) -> Result<(), String>;

    /// Flush and close the container
    fn stop_and_release(&self) -> Result<(), String>;
}

pub trait VideoEncoder: Send {
    fn label(&self) -> &str;

    /// Surface the camera session renders into
    fn input_surface(&self) -> SurfaceId;

    fn set_sample_listener(&mut self, listener: SampleListener);

    fn start(&mut self) -> Result<(), String>;

    fn signal_end_of_input_stream(&mut self) -> Result<(), String>;

    fn stop_and_release(&mut self) -> Result<(), String>;
}

pub trait AudioEncoder: Send {
    fn set_sample_listener(&mut self, listener: SampleListener);

    fn start(&mut self) -> Result<(), String>;

    fn stop_and_release(&mut self) -> Result<(), String>;
}

/// Creates encoders and muxers for a recording
pub trait MediaFactory: Send + Sync {
    fn create_muxer(
        &self,
        label: &str,
        output: Box<dyn Write + Send>,
    ) -> Result<Arc<dyn Muxer>, String>;

    fn create_video_encoder(
        &self,
        label: &str,
        config: VideoEncoderConfig,
        muxer: Arc<dyn Muxer>,
    ) -> Result<Box<dyn VideoEncoder>, String>;

    /// One audio encoder writing into every given muxer
    fn create_audio_encoder(&self, muxers: Vec<Arc<dyn Muxer>>) -> Result<Box<dyn AudioEncoder>, String>;
}
