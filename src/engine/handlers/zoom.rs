// SPDX-License-Identifier: GPL-3.0-only

//! Wide lens switching between the 1x lens and its cropped 2x variant

use crate::backends::camera::ZoomMode;
use crate::engine::EngineEvent;
use crate::engine::state::EngineState;
use crate::errors::{AppResult, CameraError, PhotoError};
use tracing::{error, info, warn};

impl EngineState {
    pub(crate) fn set_zoom(&mut self, mode: ZoomMode) -> AppResult<()> {
        if self.recording_active() {
            warn!(?mode, "Zoom switch rejected while recording");
            return Err(CameraError::Zoom("cannot switch lenses while recording".to_string()).into());
        }
        if mode == self.zoom {
            return Err(CameraError::Zoom(format!("already in {:?}", mode)).into());
        }
        if self.pending.is_some() {
            return Err(PhotoError::CaptureInProgress.into());
        }
        let rig = self.rig.as_ref().ok_or(CameraError::NotReady)?;
        if mode == ZoomMode::Wide2x {
            if !self.settings.zoom_2x_enabled {
                return Err(CameraError::Zoom("2x zoom is disabled".to_string()).into());
            }
            if rig.wide_2x_id.is_none() {
                return Err(CameraError::Zoom("rig has no 2x wide lens".to_string()).into());
            }
        }

        let previous = self.zoom;
        self.zoom = mode;
        self.composer.reset_last_good_transform();

        match self.reload_lens_state().and_then(|_| self.open_preview()) {
            Ok(()) => {
                info!(from = ?previous, to = ?mode, "Zoom switched");
                self.emit(EngineEvent::ZoomChanged(mode));
                Ok(())
            }
            Err(e) => {
                warn!(?mode, error = %e, "Zoom switch failed, falling back to 1x");
                self.zoom = ZoomMode::Wide1x;
                self.composer.reset_last_good_transform();
                match self.reload_lens_state().and_then(|_| self.open_preview()) {
                    Ok(()) => {
                        if previous != ZoomMode::Wide1x {
                            self.emit(EngineEvent::ZoomChanged(ZoomMode::Wide1x));
                        }
                    }
                    Err(fallback) => {
                        error!(error = %fallback, "Fallback to 1x failed");
                        self.emit(EngineEvent::Error(fallback));
                    }
                }
                Err(CameraError::Zoom(e.to_string()).into())
            }
        }
    }
}
