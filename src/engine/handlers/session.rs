// SPDX-License-Identifier: GPL-3.0-only

//! Session lifecycle
//!
//! Every transition closes the current session synchronously before the next
//! one is configured. Configuration completes asynchronously; the repeating
//! request is only set once the device reports the session configured.

use crate::backends::camera::formats::{RigCapabilities, negotiate_sizes};
use crate::backends::camera::request::{
    RequestBuilder, apply_processing_modes, apply_ultra_regions, choose_ae_fps_range,
};
use crate::backends::camera::rig::{fallback_rig, resolve_rig};
use crate::backends::camera::tonemap::apply_tonemap;
use crate::backends::camera::ZoomMode;
use crate::backends::camera::types::{
    Capability, CaptureTemplate, ControlKey, ControlValue, EventSink, OutputConfig, OutputTarget,
    SessionConfig, SessionId, StreamFormat,
};
use crate::config::Settings;
use crate::constants::timing::EXECUTOR_DRAIN_TIMEOUT;
use crate::engine::EngineEvent;
use crate::engine::state::{ActiveSession, EngineState, LensState, SessionKind};
use crate::engine::worker::Message;
use crate::errors::{AppError, AppResult, CameraError, PhotoError};
use tracing::{debug, error, info, warn};

pub(crate) fn still_format(raw: bool) -> StreamFormat {
    if raw {
        StreamFormat::Raw16
    } else {
        StreamFormat::Jpeg
    }
}

impl EngineState {
    /// Resolve the rig, open the logical device and configure preview
    pub(crate) fn start(&mut self) -> AppResult<()> {
        let rig = match resolve_rig(self.hal.as_ref()) {
            Ok(rig) => rig,
            Err(discovery) => {
                warn!(error = %discovery, "Lens rig discovery failed, trying fallback rig");
                let rig = fallback_rig(self.hal.as_ref()).map_err(|fallback| {
                    error!(error = %fallback, "Fallback rig is not usable");
                    CameraError::NoUsableRig(format!("{}; fallback: {}", discovery, fallback))
                })?;
                self.emit(EngineEvent::Error(
                    CameraError::RigDiscoveryFailed(discovery).into(),
                ));
                rig
            }
        };
        let logical_id = rig.logical_id.clone();
        self.rig = Some(rig);
        self.zoom = ZoomMode::Wide1x;
        self.reload_lens_state()?;

        let tx = self.self_tx.clone();
        let sink = EventSink::new(move |event| {
            let _ = tx.send(Message::Camera(event));
        });
        let device = self
            .hal
            .open_device(&logical_id, sink)
            .map_err(|e| CameraError::OpenFailed(e.to_string()))?;
        info!(device = %device.id(), "Opened camera device");
        self.device = Some(device);

        self.open_preview()?;
        if let (Some(rig), Some(sizes)) = (self.rig.clone(), self.sizes) {
            self.emit(EngineEvent::Started { rig, sizes });
        }
        Ok(())
    }

    /// Re-read capabilities of the lenses active under the current zoom mode
    pub(crate) fn reload_lens_state(&mut self) -> AppResult<()> {
        let rig = self.rig.as_ref().ok_or(CameraError::NotReady)?;
        let caps = RigCapabilities::load(self.hal.as_ref(), rig, self.zoom)
            .map_err(CameraError::OpenFailed)?;
        let raw_available = rig.profile.assumes_raw()
            && caps.wide.has_capability(Capability::Raw)
            && caps.ultra.has_capability(Capability::Raw);
        debug!(wide = %caps.wide_id, zoom = ?self.zoom, raw_available, "Lens state loaded");
        self.lens = Some(LensState {
            caps,
            raw_available,
        });
        Ok(())
    }

    /// RAW is only used when requested and available on both lenses
    pub(crate) fn effective_raw(&self, requested: bool) -> bool {
        requested && self.lens.as_ref().is_some_and(|l| l.raw_available)
    }

    /// Close the current session, if any. Synchronous.
    pub(crate) fn close_session(&mut self) {
        self.priming.cancel();
        self.priming.forget_request();
        let Some(session) = self.session.take() else {
            return;
        };
        if let Some(device) = self.device.as_mut() {
            if session.configured
                && let Err(e) = device.stop_repeating()
            {
                debug!(error = %e, "Stop repeating failed on close");
            }
            device.close_session(session.id);
        }
        self.repeating = None;
        self.repeating_paused = false;
        self.repeating_paused_by = None;
        debug!(session = ?session.id, kind = ?session.kind, "Session closed");
    }

    /// Close the current session and begin configuring a preview session
    pub(crate) fn open_preview(&mut self) -> AppResult<()> {
        self.close_session();

        let raw = self.effective_raw(self.settings.raw_mode);
        if self.settings.raw_mode && !raw {
            warn!("RAW requested but not available on this rig, using processed stills");
        }
        let lens = self.lens.as_ref().ok_or(CameraError::NotReady)?;
        let negotiation = negotiate_sizes(
            &lens.caps,
            self.settings.preview.size,
            self.settings.record.size,
            raw,
        )
        .map_err(CameraError::NoCommonSize)?;
        let sizes = negotiation.sizes;
        let (wide_id, ultra_id) = (lens.caps.wide_id.clone(), lens.caps.ultra_id.clone());

        if negotiation.still_fallback {
            self.emit(EngineEvent::StillSizeFallback {
                wide: sizes.still_wide,
                ultra: sizes.still_ultra,
            });
        }

        let format = still_format(raw);
        let config = SessionConfig {
            outputs: vec![
                OutputConfig {
                    target: OutputTarget::Preview,
                    physical_lens_id: None,
                    size: sizes.preview,
                },
                OutputConfig {
                    target: OutputTarget::Still {
                        lens_id: wide_id.clone(),
                        format,
                    },
                    physical_lens_id: Some(wide_id),
                    size: sizes.still_wide,
                },
                OutputConfig {
                    target: OutputTarget::Still {
                        lens_id: ultra_id.clone(),
                        format,
                    },
                    physical_lens_id: Some(ultra_id),
                    size: sizes.still_ultra,
                },
            ],
        };

        let device = self.device.as_mut().ok_or(CameraError::NotReady)?;
        let id = device
            .create_session(config)
            .map_err(|e| CameraError::SessionConfigFailed(e.to_string()))?;
        self.sizes = Some(sizes);
        self.session = Some(ActiveSession {
            id,
            kind: SessionKind::Preview { raw },
            configured: false,
        });
        info!(session = ?id, raw, zoom = ?self.zoom, "Configuring preview session");
        Ok(())
    }

    /// Request with every shared control mirrored onto both lenses
    pub(crate) fn build_request(
        &self,
        template: CaptureTemplate,
        targets: &[OutputTarget],
        fps: u32,
    ) -> AppResult<RequestBuilder> {
        let rig = self.rig.as_ref().ok_or(CameraError::NotReady)?;
        let lens = self.lens.as_ref().ok_or(CameraError::NotReady)?;
        let caps = &lens.caps;

        let mut builder = RequestBuilder::new(template, caps);
        for target in targets {
            builder.add_target(target.clone());
        }

        apply_processing_modes(&mut builder, caps, self.settings.processing.into());

        match choose_ae_fps_range(&caps.common_fps_ranges(), fps) {
            Some(range) => {
                if !builder.set_shared(ControlKey::AeTargetFpsRange, ControlValue::Fps(range)) {
                    debug!(%range, "AE target range not accepted on every path");
                }
            }
            None => warn!(fps, "Lenses share no AE target fps range"),
        }

        apply_ultra_regions(
            &mut builder,
            &caps.ultra_id,
            &caps.ultra,
            rig.ultra_3a_fraction,
            self.zoom,
        );

        let tone = apply_tonemap(
            &mut builder,
            caps,
            self.settings.tone.strategy,
            self.settings.tone.exposure_bias_steps,
        );
        debug!(?template, ?tone, "Built capture request");
        Ok(builder)
    }

    pub(crate) fn on_session_configured(&mut self, id: SessionId) {
        let Some(session) = self.session.as_mut() else {
            debug!(session = ?id, "Configured session is no longer current");
            return;
        };
        if session.id != id {
            debug!(session = ?id, current = ?session.id, "Ignoring stale session");
            return;
        }
        session.configured = true;
        match session.kind {
            SessionKind::Preview { raw } => self.start_preview_repeating(raw),
            SessionKind::Recording => self.on_recording_session_configured(),
        }
    }

    fn start_preview_repeating(&mut self, raw: bool) {
        let request = match self.build_request(
            CaptureTemplate::Preview,
            &[OutputTarget::Preview],
            self.settings.preview.fps,
        ) {
            Ok(builder) => builder.build(),
            Err(e) => {
                error!(error = %e, "Failed to build preview request");
                self.emit(EngineEvent::Error(e));
                return;
            }
        };
        let Some(device) = self.device.as_mut() else {
            return;
        };
        match device.set_repeating_request(&request) {
            Ok(tag) => {
                debug!(?tag, "Preview repeating request set");
                self.repeating = Some(request);
                self.repeating_paused = false;
                info!(raw, zoom = ?self.zoom, "Preview active");
                self.emit(EngineEvent::PreviewActive {
                    raw,
                    zoom: self.zoom,
                });
                self.schedule_priming();
            }
            Err(e) => {
                error!(error = %e, "Failed to start preview");
                self.emit(EngineEvent::Error(
                    CameraError::SessionConfigFailed(e.to_string()).into(),
                ));
            }
        }
    }

    pub(crate) fn on_session_configure_failed(&mut self, id: SessionId, reason: String) {
        let Some(session) = self.session else {
            return;
        };
        if session.id != id {
            debug!(session = ?id, "Ignoring failure of stale session");
            return;
        }
        error!(session = ?id, kind = ?session.kind, %reason, "Session configuration failed");
        self.close_session();
        let error = AppError::Camera(CameraError::SessionConfigFailed(reason));

        if self.pending.is_some() {
            self.abort_capture(PhotoError::CaptureFailed(error.to_string()));
        }
        match session.kind {
            SessionKind::Recording => self.fail_recording(error),
            SessionKind::Preview { .. } => self.emit(EngineEvent::Error(error)),
        }
    }

    /// Stop the repeating request for a still capture
    pub(crate) fn pause_repeating(&mut self) {
        if self.repeating.is_none() || !self.session.is_some_and(|s| s.configured) {
            return;
        }
        if let Some(device) = self.device.as_mut() {
            match device.stop_repeating() {
                Ok(()) => self.repeating_paused = true,
                Err(e) => debug!(error = %e, "Failed to pause repeating request"),
            }
        }
    }

    /// Restore the held repeating request after a still capture
    pub(crate) fn resume_repeating(&mut self) {
        if !self.repeating_paused {
            return;
        }
        self.repeating_paused = false;
        self.repeating_paused_by = None;
        let (Some(request), Some(device)) = (self.repeating.as_ref(), self.device.as_mut()) else {
            return;
        };
        match device.set_repeating_request(request) {
            Ok(_) => debug!("Repeating request restored"),
            Err(e) => {
                warn!(error = %e, "Failed to restore repeating request");
                self.emit(EngineEvent::Error(e.into()));
            }
        }
    }

    pub(crate) fn on_device_error(&mut self, reason: String) {
        error!(%reason, "Camera device error");
        if self.pending.is_some() {
            self.abort_capture(PhotoError::CaptureFailed(reason.clone()));
        }
        self.emit(EngineEvent::Error(CameraError::OpenFailed(reason).into()));
    }

    /// Switch between RAW and processed stills
    pub(crate) fn set_raw_mode(&mut self, raw: bool) -> AppResult<()> {
        if self.recording_active() {
            return Err(PhotoError::RecordingActive.into());
        }
        if self.pending.is_some() {
            return Err(PhotoError::CaptureInProgress.into());
        }
        if self.settings.raw_mode == raw {
            debug!(raw, "Still format unchanged");
            return Ok(());
        }
        self.settings.raw_mode = raw;
        self.open_preview()?;
        let effective = self.effective_raw(raw);
        info!(raw, effective, "Still format changed");
        self.emit(EngineEvent::RawModeChanged(effective));
        Ok(())
    }

    /// Apply a new settings snapshot.
    ///
    /// Changes that affect the session rebuild preview right away, unless a
    /// capture or recording is in flight; they then apply to the next session.
    pub(crate) fn update_settings(&mut self, settings: Settings) -> AppResult<()> {
        let old = std::mem::replace(&mut self.settings, settings);
        let new = &self.settings;
        let raw_changed = old.raw_mode != new.raw_mode;
        let rebuild = raw_changed
            || old.preview != new.preview
            || old.record.size != new.record.size
            || old.processing != new.processing
            || old.tone != new.tone;
        let drop_2x = !new.zoom_2x_enabled && self.zoom == ZoomMode::Wide2x;

        let busy = self.recording_active() || self.pending.is_some() || self.device.is_none();
        if busy {
            if rebuild || drop_2x {
                info!("Settings stored, session changes apply to the next session");
            }
        } else if drop_2x {
            // Switching lenses rebuilds the session as well
            self.set_zoom(ZoomMode::Wide1x)?;
        } else if rebuild {
            self.open_preview()?;
        }

        if raw_changed {
            self.emit(EngineEvent::RawModeChanged(self.effective_raw(self.settings.raw_mode)));
        }
        info!(rebuild, "Settings applied");
        self.emit(EngineEvent::SettingsApplied);
        Ok(())
    }

    /// Tear everything down on the worker before it exits
    pub(crate) fn shutdown(&mut self) {
        info!("Stopping capture engine");
        if self.pending.is_some() {
            self.abort_capture(PhotoError::CaptureFailed("engine stopped".to_string()));
        }
        self.close_session();

        if let Some(session) = self.recording.take() {
            let store = std::sync::Arc::clone(&self.store);
            let events = self.events.clone();
            let task = move || {
                let report = session.teardown(true, store.as_ref());
                let _ = events.send(EngineEvent::RecordingStopped(report));
            };
            match &self.executors {
                Some(executors) => executors.spawn_teardown(task),
                None => task(),
            }
        } else if self.teardown_in_flight {
            // Its report is dropped, the files are still published
            debug!("Recording teardown in flight, draining with the executors");
        }

        if let Some(mut device) = self.device.take() {
            device.close();
        }
        if let Some(executors) = self.executors.take() {
            executors.shutdown(EXECUTOR_DRAIN_TIMEOUT);
        }
        self.emit(EngineEvent::Stopped);
    }
}
