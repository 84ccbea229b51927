// SPDX-License-Identifier: GPL-3.0-only

//! In-flight stereo still capture
//!
//! A capture waits for one image per lens and, depending on the mode, the
//! hardware capture result. Readiness is a pure function of what has
//! arrived, so it can be checked after every event without side effects.

use crate::backends::camera::types::{CaptureResult, ImageHandle, RequestTag};
use crate::storage::OutputEntry;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::time::Instant;
use tracing::debug;

/// Output entries allocated up front for one capture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StillOutputs {
    pub wide: Option<OutputEntry>,
    pub ultra: Option<OutputEntry>,
    pub composite: Option<OutputEntry>,
    pub log: Option<OutputEntry>,
}

impl StillOutputs {
    pub fn entries(&self) -> impl Iterator<Item = &OutputEntry> {
        [&self.wide, &self.ultra, &self.composite, &self.log]
            .into_iter()
            .flatten()
    }
}

/// Whether a capture has everything it needs.
///
/// RAW needs both images and the result. Processed needs both images, and
/// the result only when `wait_for_result` is set.
pub fn is_ready(raw: bool, wait_for_result: bool, has_wide: bool, has_ultra: bool, has_result: bool) -> bool {
    has_wide && has_ultra && (has_result || !(raw || wait_for_result))
}

/// What happened to an offered image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOffer {
    Accepted,
    /// An older unconsumed image for the same lens was closed
    ReplacedStale,
    /// Image belongs to neither lens of the pair, or to another request,
    /// and was closed
    Foreign,
}

/// Event timings relative to the capture request, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CaptureTimings {
    pub wide_image_ms: Option<f64>,
    pub ultra_image_ms: Option<f64>,
    pub result_ms: Option<f64>,
    pub ready_ms: Option<f64>,
}

#[derive(Debug)]
pub struct PendingStillCapture {
    pub id: u64,
    pub wall_time: DateTime<Local>,
    pub raw: bool,
    pub wait_for_result: bool,
    pub wide_lens: String,
    pub ultra_lens: String,
    /// Tag of the submitted request, set once the request is accepted
    pub tag: Option<RequestTag>,
    pub outputs: StillOutputs,
    started: Instant,
    wide: Option<ImageHandle>,
    ultra: Option<ImageHandle>,
    result: Option<CaptureResult>,
    timings: CaptureTimings,
    finished: bool,
}

impl PendingStillCapture {
    pub fn new(
        id: u64,
        raw: bool,
        wait_for_result: bool,
        wide_lens: impl Into<String>,
        ultra_lens: impl Into<String>,
        outputs: StillOutputs,
    ) -> Self {
        Self {
            id,
            wall_time: Local::now(),
            raw,
            wait_for_result,
            wide_lens: wide_lens.into(),
            ultra_lens: ultra_lens.into(),
            tag: None,
            outputs,
            started: Instant::now(),
            wide: None,
            ultra: None,
            result: None,
            timings: CaptureTimings::default(),
            finished: false,
        }
    }

    fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Store an arrived image; a stale image for the same lens is dropped (closed)
    pub fn offer_image(&mut self, image: ImageHandle) -> ImageOffer {
        if let (Some(ours), Some(theirs)) = (self.tag, image.tag)
            && ours != theirs
        {
            debug!(capture_id = self.id, ?theirs, "Closing image from another request");
            return ImageOffer::Foreign;
        }
        let at = self.elapsed_ms();
        let (slot, timing) = if image.lens_id == self.wide_lens {
            (&mut self.wide, &mut self.timings.wide_image_ms)
        } else if image.lens_id == self.ultra_lens {
            (&mut self.ultra, &mut self.timings.ultra_image_ms)
        } else {
            debug!(capture_id = self.id, lens = %image.lens_id, "Closing image from unexpected lens");
            return ImageOffer::Foreign;
        };

        *timing = Some(at);
        match slot.replace(image) {
            Some(stale) => {
                debug!(capture_id = self.id, lens = %stale.lens_id, "Closed stale image");
                ImageOffer::ReplacedStale
            }
            None => ImageOffer::Accepted,
        }
    }

    pub fn offer_result(&mut self, result: CaptureResult) {
        self.timings.result_ms = Some(self.elapsed_ms());
        self.result = Some(result);
    }

    pub fn is_ready(&self) -> bool {
        !self.finished
            && is_ready(
                self.raw,
                self.wait_for_result,
                self.wide.is_some(),
                self.ultra.is_some(),
                self.result.is_some(),
            )
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Hand over everything collected. Returns `None` unless ready.
    pub fn take_ready(&mut self) -> Option<ReadyCapture> {
        if !self.is_ready() {
            return None;
        }
        self.finished = true;
        self.timings.ready_ms = Some(self.elapsed_ms());
        let (wide, ultra) = (self.wide.take()?, self.ultra.take()?);
        Some(ReadyCapture {
            id: self.id,
            wall_time: self.wall_time,
            raw: self.raw,
            wide,
            ultra,
            result: self.result.take(),
            outputs: std::mem::take(&mut self.outputs),
            timings: self.timings,
        })
    }

    /// Close held images and hand back the entries that still need deleting
    pub fn abort(mut self) -> StillOutputs {
        self.finished = true;
        self.wide = None;
        self.ultra = None;
        std::mem::take(&mut self.outputs)
    }
}

/// A capture that reached readiness, detached from the engine
#[derive(Debug)]
pub struct ReadyCapture {
    pub id: u64,
    pub wall_time: DateTime<Local>,
    pub raw: bool,
    pub wide: ImageHandle,
    pub ultra: ImageHandle,
    pub result: Option<CaptureResult>,
    pub outputs: StillOutputs,
    pub timings: CaptureTimings,
}

impl ReadyCapture {
    /// Sensor timestamp difference between the two lenses
    pub fn sync_delta_ns(&self) -> i64 {
        self.wide.timestamp_ns - self.ultra.timestamp_ns
    }
}
