// SPDX-License-Identifier: GPL-3.0-only

//! Stereo capture engine
//!
//! [`CaptureEngine`] is a thin handle to a worker thread that owns the camera
//! device and all session state:
//!
//! ```text
//! caller ──Command──┐
//!                   ▼
//! device ──Event──► worker thread ──► EngineEvent channel ──► caller
//!                   │
//!                   ├─► io executor        (per-lens still writes)
//!                   ├─► composite executor (stereo composite)
//!                   └─► teardown executor  (encoder/muxer shutdown)
//! ```
//!
//! Commands reply with an immediate accept or reject. Everything that
//! completes later (saved files, recording reports, failures) arrives as an
//! [`EngineEvent`].

mod handlers;
mod state;
mod worker;

use crate::backends::camera::formats::NegotiatedSizes;
use crate::backends::camera::types::Size;
use crate::backends::camera::{CameraHal, LensRig, ZoomMode};
use crate::config::Settings;
use crate::errors::{AppError, AppResult, CameraError};
use crate::media::MediaFactory;
use crate::pipelines::executors::Executors;
use crate::pipelines::photo::StereoComposer;
use crate::pipelines::video::RecordingReport;
use crate::storage::OutputStore;
use serde::Serialize;
use state::EngineState;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, SyncSender};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use worker::Message;

/// Services the engine is built on
#[derive(Clone)]
pub struct EngineDeps {
    pub hal: Arc<dyn CameraHal>,
    pub media: Arc<dyn MediaFactory>,
    pub store: Arc<dyn OutputStore>,
    pub composer: Arc<dyn StereoComposer>,
}

/// Which file of a stereo capture an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StillOutputKind {
    Wide,
    Ultra,
    Composite,
    Log,
}

/// Per-call capture overrides
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Capture in RAW (`true`) or processed (`false`) mode instead of the
    /// configured one. A change rebuilds the session and is kept afterwards.
    pub raw: Option<bool>,
}

/// Coarse session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Closed,
    Preview { raw: bool },
    Recording,
}

/// Snapshot of the engine state
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub mode: EngineMode,
    /// The current session finished configuring
    pub session_ready: bool,
    pub zoom: ZoomMode,
    pub capture_pending: bool,
    /// A stopped recording is still being finalized
    pub teardown_in_flight: bool,
    pub rig: Option<LensRig>,
    pub sizes: Option<NegotiatedSizes>,
}

/// Everything the engine reports asynchronously
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Started {
        rig: LensRig,
        sizes: NegotiatedSizes,
    },
    /// The lenses share no still size; each captures at its own largest size
    StillSizeFallback { wide: Size, ultra: Size },
    PreviewActive { raw: bool, zoom: ZoomMode },
    /// The warm-up ultrawide capture was issued
    UltraPrimed,
    /// Both frames of a capture arrived; writes are now in flight
    PhotoCaptured { capture_id: u64, sync_delta_ns: i64 },
    PhotoOutputSaved {
        capture_id: u64,
        kind: StillOutputKind,
        path: PathBuf,
    },
    PhotoOutputFailed {
        capture_id: u64,
        kind: StillOutputKind,
        error: AppError,
    },
    PhotoFailed { capture_id: u64, error: AppError },
    RecordingStarted { session_id: String },
    RecordingStopped(RecordingReport),
    /// A recording could not start or broke down; its files were deleted
    RecordingFailed(AppError),
    ZoomChanged(ZoomMode),
    RawModeChanged(bool),
    SettingsApplied,
    Error(AppError),
    Stopped,
}

type Reply<T> = SyncSender<AppResult<T>>;

/// Work requested through the public handle
pub(crate) enum Command {
    Start(Reply<()>),
    CapturePhoto(CaptureOptions, Reply<u64>),
    StartRecording(Reply<()>),
    StopRecording(Reply<()>),
    SetZoom(ZoomMode, Reply<()>),
    SetRawMode(bool, Reply<()>),
    UpdateSettings(Box<Settings>, Reply<()>),
    Status(Reply<EngineStatus>),
}

/// Handle to a running engine
///
/// Dropping the handle stops the engine the same way [`CaptureEngine::stop`] does.
pub struct CaptureEngine {
    tx: Sender<Message>,
    worker: Option<JoinHandle<()>>,
}

impl CaptureEngine {
    /// Spawn the worker, resolve the rig, open the device and begin preview.
    ///
    /// Returns once the device is open; the preview session finishes
    /// configuring asynchronously ([`EngineEvent::PreviewActive`]).
    pub fn start(deps: EngineDeps, settings: Settings) -> AppResult<(Self, Receiver<EngineEvent>)> {
        let (events_tx, events_rx) = mpsc::channel();
        let (tx, rx) = mpsc::channel();
        let executors = Executors::new()?;

        let state = EngineState::new(deps, settings, executors, tx.clone(), events_tx);
        let worker = worker::spawn(state, rx)?;
        let mut engine = Self {
            tx,
            worker: Some(worker),
        };

        if let Err(e) = engine.request(Command::Start) {
            warn!(error = %e, "Engine failed to start");
            engine.shutdown();
            return Err(e);
        }
        info!("Capture engine started");
        Ok((engine, events_rx))
    }

    fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> AppResult<T> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tx
            .send(Message::Command(make(reply_tx)))
            .map_err(|_| AppError::Camera(CameraError::WorkerStopped))?;
        reply_rx
            .recv()
            .map_err(|_| AppError::Camera(CameraError::WorkerStopped))?
    }

    /// Capture one synchronized stereo still. Returns the capture id.
    pub fn capture_stereo_photo(&self) -> AppResult<u64> {
        self.capture_stereo_photo_with(CaptureOptions::default())
    }

    pub fn capture_stereo_photo_with(&self, options: CaptureOptions) -> AppResult<u64> {
        self.request(|reply| Command::CapturePhoto(options, reply))
    }

    pub fn start_recording(&self) -> AppResult<()> {
        self.request(Command::StartRecording)
    }

    /// Stop recording. The report follows as [`EngineEvent::RecordingStopped`].
    pub fn stop_recording(&self) -> AppResult<()> {
        self.request(Command::StopRecording)
    }

    pub fn set_zoom(&self, mode: ZoomMode) -> AppResult<()> {
        self.request(|reply| Command::SetZoom(mode, reply))
    }

    pub fn set_raw_mode(&self, raw: bool) -> AppResult<()> {
        self.request(|reply| Command::SetRawMode(raw, reply))
    }

    pub fn update_settings(&self, settings: Settings) -> AppResult<()> {
        self.request(|reply| Command::UpdateSettings(Box::new(settings), reply))
    }

    pub fn status(&self) -> AppResult<EngineStatus> {
        self.request(Command::Status)
    }

    /// Stop the engine, blocking until the worker has torn everything down
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        let (ack_tx, ack_rx) = mpsc::sync_channel(1);
        if self.tx.send(Message::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
        if let Err(e) = handle.join() {
            warn!("Engine worker panicked: {:?}", e);
        } else {
            debug!("Engine worker joined");
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if self.worker.is_some() {
            debug!("CaptureEngine dropped, stopping worker");
            self.shutdown();
        }
    }
}
