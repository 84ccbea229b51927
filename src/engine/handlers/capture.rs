// SPDX-License-Identifier: GPL-3.0-only

//! Stereo still capture
//!
//! One capture may be pending at a time. It is finished by the arrival of
//! everything [`PendingStillCapture::is_ready`] asks for, or aborted by a
//! hardware failure or the watchdog.

use super::session::still_format;
use crate::backends::camera::types::{CaptureResult, CaptureTemplate, ImageHandle, OutputTarget, RequestTag};
use crate::constants::timing::CAPTURE_WATCHDOG;
use crate::engine::state::EngineState;
use crate::engine::worker::Timer;
use crate::engine::{CaptureOptions, EngineEvent};
use crate::errors::{AppResult, CameraError, PhotoError};
use crate::pipelines::photo::{
    ImageOffer, PendingStillCapture, StillOutputs, StillSink, allocate_outputs, delete_outputs,
    dispatch_ready_capture,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl EngineState {
    pub(crate) fn capture_stereo_photo(&mut self, options: CaptureOptions) -> AppResult<u64> {
        if self.pending.is_some() {
            warn!("Stereo capture rejected, another capture is pending");
            return Err(PhotoError::CaptureInProgress.into());
        }
        if self.recording_active() {
            return Err(PhotoError::RecordingActive.into());
        }
        if !self.preview_ready() {
            return Err(CameraError::NotReady.into());
        }

        // The rebuild completes asynchronously and the capture below is issued
        // against the new session without waiting for it.
        if let Some(raw) = options.raw
            && raw != self.settings.raw_mode
        {
            info!(raw, "Capture changes still format, rebuilding session");
            self.settings.raw_mode = raw;
            if let Err(e) = self.open_preview() {
                warn!(error = %e, "Session rebuild failed");
            }
            self.emit(EngineEvent::RawModeChanged(self.effective_raw(raw)));
        }

        self.priming.cancel();
        let raw = self.effective_raw(self.settings.raw_mode);
        let (wide_id, ultra_id) = match self.lens.as_ref() {
            Some(lens) => (lens.caps.wide_id.clone(), lens.caps.ultra_id.clone()),
            None => return Err(CameraError::NotReady.into()),
        };

        let capture_id = self.next_capture_id;
        self.next_capture_id += 1;
        let mut pending = PendingStillCapture::new(
            capture_id,
            raw,
            self.settings.processed_needs_result(),
            wide_id.as_str(),
            ultra_id.as_str(),
            StillOutputs::default(),
        );
        pending.outputs = allocate_outputs(
            self.store.as_ref(),
            &self.settings.outputs,
            raw,
            self.settings.logging.capture_log,
            pending.wall_time,
        )?;

        let format = still_format(raw);
        let targets = [
            OutputTarget::Still {
                lens_id: wide_id,
                format,
            },
            OutputTarget::Still {
                lens_id: ultra_id,
                format,
            },
        ];
        let request =
            match self.build_request(CaptureTemplate::StillCapture, &targets, self.settings.preview.fps) {
                Ok(builder) => builder.build(),
                Err(e) => {
                    delete_outputs(self.store.as_ref(), &pending.abort());
                    return Err(e);
                }
            };

        self.pause_repeating();
        let submitted = match self.device.as_mut() {
            Some(device) => device.capture(&request).map_err(|e| e.to_string()),
            None => Err("device closed".to_string()),
        };
        match submitted {
            Ok(tag) => {
                pending.tag = Some(tag);
                self.repeating_paused_by = Some(tag);
            }
            Err(reason) => {
                error!(capture_id, %reason, "Still capture request rejected");
                delete_outputs(self.store.as_ref(), &pending.abort());
                self.resume_repeating();
                return Err(PhotoError::CaptureFailed(reason).into());
            }
        }

        if self.rig.as_ref().is_some_and(|r| r.profile.needs_capture_watchdog()) {
            self.timers
                .schedule(CAPTURE_WATCHDOG, Timer::CaptureWatchdog(capture_id));
        }
        info!(capture_id, raw, tag = ?pending.tag, "Stereo capture issued");
        self.pending = Some(pending);
        Ok(capture_id)
    }

    pub(crate) fn on_image_available(&mut self, image: ImageHandle) {
        if self.priming.discard_image(&image) {
            debug!(lens = %image.lens_id, "Discarded priming image");
            return;
        }
        let detailed = self.settings.logging.detailed_sync_logging;
        let Some(pending) = self.pending.as_mut() else {
            debug!(lens = %image.lens_id, "No pending capture, closing image");
            return;
        };
        let (lens, timestamp_ns) = (image.lens_id.clone(), image.timestamp_ns);
        let offer = pending.offer_image(image);
        if detailed {
            debug!(capture_id = pending.id, %lens, timestamp_ns, ?offer, "Still image arrived");
        }
        if offer != ImageOffer::Foreign {
            self.finish_capture_if_ready();
        }
    }

    pub(crate) fn on_capture_completed(&mut self, result: CaptureResult) {
        let detailed = self.settings.logging.detailed_sync_logging;
        match self.pending.as_mut() {
            Some(pending) if pending.tag == Some(result.tag) => {
                if detailed {
                    debug!(
                        capture_id = pending.id,
                        frame = result.frame_number,
                        sensor_timestamp_ns = result.sensor_timestamp_ns,
                        "Capture result arrived"
                    );
                }
                pending.offer_result(result);
                self.finish_capture_if_ready();
            }
            _ => debug!(tag = ?result.tag, "Result for no pending capture"),
        }
    }

    pub(crate) fn on_capture_failed(&mut self, tag: RequestTag, reason: String) {
        if self.pending.as_ref().is_some_and(|p| p.tag == Some(tag)) {
            self.abort_capture(PhotoError::CaptureFailed(reason));
        } else if self.priming.tag == Some(tag) {
            warn!(%reason, "Ultrawide priming capture failed");
            self.priming.forget_request();
        } else {
            debug!(?tag, %reason, "Failure for unknown request");
        }
    }

    pub(crate) fn on_capture_watchdog(&mut self, capture_id: u64) {
        match self.pending.as_ref() {
            Some(pending) if pending.id == capture_id => {
                warn!(
                    capture_id,
                    has_result = pending.has_result(),
                    "Capture watchdog fired before both lenses delivered"
                );
                self.abort_capture(PhotoError::Timeout);
            }
            _ => debug!(capture_id, "Watchdog for a finished capture"),
        }
    }

    /// Detach a ready capture, report it and hand its writes to the executors
    fn finish_capture_if_ready(&mut self) {
        let Some(ready) = self.pending.as_mut().and_then(|p| p.take_ready()) else {
            return;
        };
        self.pending = None;

        let sync_delta_ns = ready.sync_delta_ns();
        if self.settings.logging.sync_notification || self.settings.logging.detailed_sync_logging {
            info!(capture_id = ready.id, sync_delta_ns, timings = ?ready.timings, "Stereo pair synchronized");
        }
        self.emit(EngineEvent::PhotoCaptured {
            capture_id: ready.id,
            sync_delta_ns,
        });

        let overlap = self
            .rig
            .as_ref()
            .map(|r| r.ultra_3a_fraction)
            .unwrap_or(crate::constants::DEFAULT_ULTRA_3A_FRACTION);
        let sink = StillSink {
            camera_model: Arc::from(self.hal.device_model()),
            store: Arc::clone(&self.store),
            composer: Arc::clone(&self.composer),
            events: self.events.clone(),
        };
        match &self.executors {
            Some(executors) => dispatch_ready_capture(ready, self.zoom, overlap, &sink, executors),
            None => {
                warn!(capture_id = ready.id, "Executors gone, dropping capture");
                delete_outputs(self.store.as_ref(), &ready.outputs);
            }
        }
    }

    /// Abort the pending capture: close images, delete entries, resume preview
    pub(crate) fn abort_capture(&mut self, error: PhotoError) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let capture_id = pending.id;
        let outputs = pending.abort();
        delete_outputs(self.store.as_ref(), &outputs);
        self.resume_repeating();
        error!(capture_id, error = %error, "Stereo capture aborted");
        self.emit(EngineEvent::PhotoFailed {
            capture_id,
            error: error.into(),
        });
    }
}
