// SPDX-License-Identifier: GPL-3.0-only

//! Engine state owned by the worker thread
//!
//! Only the worker touches this struct, so none of it is locked. Behavior is
//! split by concern into `handlers/`; this file holds the state itself and the
//! top-level dispatch.

use super::handlers::priming::PrimingState;
use super::worker::{Message, Scheduler, Timer};
use super::{Command, EngineDeps, EngineEvent, EngineMode, EngineStatus};
use crate::backends::camera::formats::{NegotiatedSizes, RigCapabilities};
use crate::backends::camera::types::{CameraEvent, CaptureRequest, RequestTag, SessionId};
use crate::backends::camera::{CameraDevice, CameraHal, LensRig, ZoomMode};
use crate::config::Settings;
use crate::media::MediaFactory;
use crate::pipelines::executors::Executors;
use crate::pipelines::photo::{PendingStillCapture, StereoComposer};
use crate::pipelines::video::RecordingSession;
use crate::storage::OutputStore;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionKind {
    Preview { raw: bool },
    Recording,
}

/// The one camera session that may exist at a time
#[derive(Debug, Clone, Copy)]
pub(crate) struct ActiveSession {
    pub(crate) id: SessionId,
    pub(crate) kind: SessionKind,
    /// Set once the device reports the session configured
    pub(crate) configured: bool,
}

/// Capabilities of the lenses active under the current zoom mode
#[derive(Debug, Clone)]
pub(crate) struct LensState {
    pub(crate) caps: RigCapabilities,
    /// Both lenses deliver RAW and the device profile allows it
    pub(crate) raw_available: bool,
}

pub(crate) struct EngineState {
    pub(crate) hal: Arc<dyn CameraHal>,
    pub(crate) media: Arc<dyn MediaFactory>,
    pub(crate) store: Arc<dyn OutputStore>,
    pub(crate) composer: Arc<dyn StereoComposer>,
    pub(crate) settings: Settings,
    /// Taken on shutdown
    pub(crate) executors: Option<Executors>,
    pub(crate) self_tx: Sender<Message>,
    pub(crate) events: Sender<EngineEvent>,
    pub(crate) timers: Scheduler,

    pub(crate) rig: Option<LensRig>,
    pub(crate) zoom: ZoomMode,
    pub(crate) lens: Option<LensState>,
    pub(crate) sizes: Option<NegotiatedSizes>,
    pub(crate) device: Option<Box<dyn CameraDevice>>,
    pub(crate) session: Option<ActiveSession>,
    /// Repeating request of the current session, held so it can be restored
    pub(crate) repeating: Option<CaptureRequest>,
    /// Repeating request stopped for a still capture
    pub(crate) repeating_paused: bool,
    /// Still request whose sequence end restores the repeating request
    pub(crate) repeating_paused_by: Option<RequestTag>,

    pub(crate) pending: Option<PendingStillCapture>,
    pub(crate) next_capture_id: u64,
    pub(crate) recording: Option<RecordingSession>,
    pub(crate) teardown_in_flight: bool,
    pub(crate) priming: PrimingState,
}

impl EngineState {
    pub(crate) fn new(
        deps: EngineDeps,
        settings: Settings,
        executors: Executors,
        self_tx: Sender<Message>,
        events: Sender<EngineEvent>,
    ) -> Self {
        Self {
            hal: deps.hal,
            media: deps.media,
            store: deps.store,
            composer: deps.composer,
            settings,
            executors: Some(executors),
            self_tx,
            events,
            timers: Scheduler::default(),
            rig: None,
            zoom: ZoomMode::Wide1x,
            lens: None,
            sizes: None,
            device: None,
            session: None,
            repeating: None,
            repeating_paused: false,
            repeating_paused_by: None,
            pending: None,
            next_capture_id: 1,
            recording: None,
            teardown_in_flight: false,
            priming: PrimingState::default(),
        }
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        trace!(?event, "Engine event");
        // Receiver gone means nobody is listening anymore
        let _ = self.events.send(event);
    }

    pub(crate) fn mode(&self) -> EngineMode {
        match self.session.map(|s| s.kind) {
            Some(SessionKind::Preview { raw }) => EngineMode::Preview { raw },
            Some(SessionKind::Recording) => EngineMode::Recording,
            None if self.recording.is_some() => EngineMode::Recording,
            None => EngineMode::Closed,
        }
    }

    /// A configured preview session is in place
    pub(crate) fn preview_ready(&self) -> bool {
        matches!(
            self.session,
            Some(ActiveSession {
                kind: SessionKind::Preview { .. },
                configured: true,
                ..
            })
        )
    }

    pub(crate) fn recording_active(&self) -> bool {
        self.recording.is_some() || self.teardown_in_flight
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            mode: self.mode(),
            session_ready: self.session.is_some_and(|s| s.configured),
            zoom: self.zoom,
            capture_pending: self.pending.is_some(),
            teardown_in_flight: self.teardown_in_flight,
            rig: self.rig.clone(),
            sizes: self.sizes,
        }
    }

    pub(crate) fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let _ = reply.send(self.start());
            }
            Command::CapturePhoto(options, reply) => {
                let _ = reply.send(self.capture_stereo_photo(options));
            }
            Command::StartRecording(reply) => {
                let _ = reply.send(self.start_recording());
            }
            Command::StopRecording(reply) => {
                let _ = reply.send(self.stop_recording());
            }
            Command::SetZoom(mode, reply) => {
                let _ = reply.send(self.set_zoom(mode));
            }
            Command::SetRawMode(raw, reply) => {
                let _ = reply.send(self.set_raw_mode(raw));
            }
            Command::UpdateSettings(settings, reply) => {
                let _ = reply.send(self.update_settings(*settings));
            }
            Command::Status(reply) => {
                let _ = reply.send(Ok(self.status()));
            }
        }
    }

    pub(crate) fn handle_camera_event(&mut self, event: CameraEvent) {
        match event {
            CameraEvent::SessionConfigured(id) => self.on_session_configured(id),
            CameraEvent::SessionConfigureFailed { session, reason } => {
                self.on_session_configure_failed(session, reason)
            }
            CameraEvent::ImageAvailable(image) => self.on_image_available(image),
            CameraEvent::CaptureCompleted(result) => self.on_capture_completed(result),
            CameraEvent::CaptureFailed { tag, reason } => self.on_capture_failed(tag, reason),
            CameraEvent::SequenceCompleted(tag) => {
                debug!(?tag, "Capture sequence completed");
                if self.repeating_paused_by == Some(tag) {
                    self.resume_repeating();
                }
            }
            CameraEvent::DeviceError(reason) => self.on_device_error(reason),
        }
    }

    pub(crate) fn on_timer(&mut self, timer: Timer) {
        match timer {
            Timer::CaptureWatchdog(capture_id) => self.on_capture_watchdog(capture_id),
            Timer::PrimeUltra {
                generation,
                attempt,
            } => self.on_prime_ultra(generation, attempt),
        }
    }
}
