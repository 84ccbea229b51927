// SPDX-License-Identifier: GPL-3.0-only

//! Dual recording start and stop

use crate::backends::camera::types::{
    CaptureTemplate, ControlKey, ControlValue, OutputConfig, OutputTarget, SessionConfig,
};
use crate::engine::EngineEvent;
use crate::engine::state::{ActiveSession, EngineState, SessionKind};
use crate::engine::worker::{Message, TeardownCause};
use crate::errors::{AppError, AppResult, CameraError, PhotoError, RecordingError};
use crate::pipelines::video::{RecordingPlan, RecordingReport, RecordingSession};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl EngineState {
    pub(crate) fn start_recording(&mut self) -> AppResult<()> {
        if self.recording_active() {
            return Err(RecordingError::AlreadyRecording.into());
        }
        if !self.preview_ready() {
            return Err(CameraError::NotReady.into());
        }
        if self.pending.is_some() {
            return Err(PhotoError::CaptureInProgress.into());
        }

        let (Some(rig), Some(lens), Some(sizes)) = (self.rig.as_ref(), self.lens.as_ref(), self.sizes)
        else {
            return Err(CameraError::NotReady.into());
        };
        let size = sizes.record.ok_or_else(|| {
            RecordingError::StartFailed(format!(
                "lenses {} and {} share no record size up to {}",
                lens.caps.wide_id, lens.caps.ultra_id, self.settings.record.size
            ))
        })?;
        let plan = RecordingPlan {
            wide_lens: lens.caps.wide_id.clone(),
            ultra_lens: lens.caps.ultra_id.clone(),
            size,
            fps: self.settings.record.fps,
            bitrate_kbps: self.settings.record.bitrate_kbps(size),
            rotation: rig.display_rotation,
            sample_log: self.settings.logging.recording_sample_log,
        };
        let preview_size = sizes.preview;

        let session = RecordingSession::prepare(plan.clone(), self.store.as_ref(), self.media.as_ref())?;
        let (wide_surface, ultra_surface) = session.surfaces();

        self.close_session();
        let config = SessionConfig {
            outputs: vec![
                OutputConfig {
                    target: OutputTarget::Preview,
                    physical_lens_id: None,
                    size: preview_size,
                },
                OutputConfig {
                    target: OutputTarget::Encoder(wide_surface),
                    physical_lens_id: Some(plan.wide_lens.clone()),
                    size,
                },
                OutputConfig {
                    target: OutputTarget::Encoder(ultra_surface),
                    physical_lens_id: Some(plan.ultra_lens.clone()),
                    size,
                },
            ],
        };

        let created = match self.device.as_mut() {
            Some(device) => device.create_session(config).map_err(|e| e.to_string()),
            None => Err("device closed".to_string()),
        };
        match created {
            Ok(id) => {
                info!(
                    session = ?id,
                    recording = %session.id(),
                    %size,
                    fps = plan.fps,
                    bitrate_kbps = plan.bitrate_kbps,
                    "Configuring recording session"
                );
                self.session = Some(ActiveSession {
                    id,
                    kind: SessionKind::Recording,
                    configured: false,
                });
                self.recording = Some(session);
                Ok(())
            }
            Err(reason) => {
                error!(%reason, "Failed to create recording session");
                self.spawn_teardown(session, false, TeardownCause::Rejected);
                Err(CameraError::SessionConfigFailed(reason).into())
            }
        }
    }

    /// Recording session is live: start encoders, then frames
    pub(crate) fn on_recording_session_configured(&mut self) {
        let Some(recording) = self.recording.as_ref() else {
            warn!("Recording session configured without a recording");
            return;
        };
        let (wide_surface, ultra_surface) = recording.surfaces();

        let mut builder = match self.build_request(
            CaptureTemplate::Record,
            &[
                OutputTarget::Preview,
                OutputTarget::Encoder(wide_surface),
                OutputTarget::Encoder(ultra_surface),
            ],
            self.settings.record.fps,
        ) {
            Ok(builder) => builder,
            Err(e) => return self.fail_recording(e),
        };
        let stabilization = self.settings.record.stabilization;
        builder.set_shared(
            ControlKey::VideoStabilizationMode,
            ControlValue::Bool(stabilization.electronic()),
        );
        builder.set_shared(
            ControlKey::OpticalStabilizationMode,
            ControlValue::Bool(stabilization.optical()),
        );
        let request = builder.build();

        let started = match self.recording.as_mut() {
            Some(recording) => recording.start_encoders(),
            None => return,
        };
        if let Err(e) = started {
            return self.fail_recording(e);
        }

        let repeating = match self.device.as_mut() {
            Some(device) => device.set_repeating_request(&request),
            None => return,
        };
        match repeating {
            Ok(tag) => {
                debug!(?tag, ?stabilization, "Recording request set");
                self.repeating = Some(request);
                let session_id = self
                    .recording
                    .as_ref()
                    .map(|r| r.id().to_string())
                    .unwrap_or_default();
                info!(%session_id, "Recording started");
                self.emit(EngineEvent::RecordingStarted { session_id });
            }
            Err(e) => self.fail_recording(RecordingError::StartFailed(e.to_string()).into()),
        }
    }

    pub(crate) fn stop_recording(&mut self) -> AppResult<()> {
        let Some(session) = self.recording.take() else {
            return Err(RecordingError::NotRecording.into());
        };
        info!(recording = %session.id(), "Stopping recording");
        self.close_session();
        self.spawn_teardown(session, true, TeardownCause::Stopped);
        Ok(())
    }

    /// Close the session and delete everything the recording produced
    pub(crate) fn fail_recording(&mut self, error: AppError) {
        error!(error = %error, "Recording failed");
        self.close_session();
        match self.recording.take() {
            Some(session) => self.spawn_teardown(session, false, TeardownCause::Failed(error)),
            None => self.emit(EngineEvent::RecordingFailed(error)),
        }
    }

    fn spawn_teardown(&mut self, session: RecordingSession, keep: bool, cause: TeardownCause) {
        self.teardown_in_flight = true;
        let store = Arc::clone(&self.store);
        let tx = self.self_tx.clone();
        let task = move || {
            let report = session.teardown(keep, store.as_ref());
            let _ = tx.send(Message::TeardownFinished { report, cause });
        };
        match &self.executors {
            Some(executors) => executors.spawn_teardown(task),
            None => task(),
        }
    }

    /// Teardown done: reopen preview, then report
    pub(crate) fn on_teardown_finished(&mut self, report: RecordingReport, cause: TeardownCause) {
        self.teardown_in_flight = false;
        if let Err(e) = self.open_preview() {
            error!(error = %e, "Failed to reopen preview after recording");
            self.emit(EngineEvent::Error(e));
        }
        match cause {
            TeardownCause::Stopped => self.emit(EngineEvent::RecordingStopped(report)),
            TeardownCause::Failed(error) => {
                debug!(errors = ?report.errors, "Failed recording torn down");
                self.emit(EngineEvent::RecordingFailed(error));
            }
            TeardownCause::Rejected => debug!(recording = %report.session_id, "Rejected recording torn down"),
        }
    }
}
