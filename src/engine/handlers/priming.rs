// SPDX-License-Identifier: GPL-3.0-only

//! Ultrawide priming
//!
//! Some ultrawide lenses deliver a poorly exposed first still. When enabled,
//! one ultrawide-only still is captured and thrown away shortly after each
//! preview session becomes active.

use super::session::still_format;
use crate::backends::camera::types::{CaptureTemplate, ImageHandle, OutputTarget, RequestTag, SessionId};
use crate::constants::timing::{PRIMING_MAX_RETRIES, PRIMING_RETRY_BACKOFF};
use crate::engine::EngineEvent;
use crate::engine::state::{EngineState, SessionKind};
use crate::engine::worker::Timer;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub(crate) struct PrimingState {
    /// Bumped to cancel scheduled timers
    generation: u64,
    /// Session that was already primed
    primed_session: Option<SessionId>,
    /// Request whose images are thrown away
    pub(crate) tag: Option<RequestTag>,
}

impl PrimingState {
    pub(crate) fn cancel(&mut self) {
        self.generation += 1;
    }

    /// Swallow the priming image. Returns true when `image` was it.
    pub(crate) fn discard_image(&mut self, image: &ImageHandle) -> bool {
        if self.tag.is_some() && image.tag == self.tag {
            self.tag = None;
            true
        } else {
            false
        }
    }

    /// Forget the in-flight request; its images can no longer arrive
    pub(crate) fn forget_request(&mut self) {
        self.tag = None;
    }
}

impl EngineState {
    /// Schedule the warm-up capture for the current session, once
    pub(crate) fn schedule_priming(&mut self) {
        if !self.settings.ultra_priming.enabled {
            return;
        }
        let Some(session) = self.session else {
            return;
        };
        if self.priming.primed_session == Some(session.id) {
            return;
        }
        self.priming.cancel();
        let generation = self.priming.generation;
        debug!(delay = ?self.settings.ultra_priming.delay(), generation, "Scheduling ultrawide priming");
        self.timers.schedule(
            self.settings.ultra_priming.delay(),
            Timer::PrimeUltra {
                generation,
                attempt: 0,
            },
        );
    }

    pub(crate) fn on_prime_ultra(&mut self, generation: u64, attempt: u32) {
        if generation != self.priming.generation {
            debug!(generation, "Ultrawide priming was cancelled");
            return;
        }
        if self.pending.is_some() || self.recording_active() {
            debug!("Ultrawide priming skipped, capture or recording in progress");
            return;
        }
        let session = match self.session {
            Some(session) if session.configured => session,
            _ => {
                if attempt < PRIMING_MAX_RETRIES {
                    debug!(attempt, "Session not ready, retrying ultrawide priming");
                    self.timers.schedule(
                        PRIMING_RETRY_BACKOFF,
                        Timer::PrimeUltra {
                            generation,
                            attempt: attempt + 1,
                        },
                    );
                } else {
                    warn!(attempts = attempt + 1, "Giving up on ultrawide priming");
                }
                return;
            }
        };
        let SessionKind::Preview { raw } = session.kind else {
            return;
        };
        let Some(ultra_id) = self.lens.as_ref().map(|l| l.caps.ultra_id.clone()) else {
            return;
        };

        let target = OutputTarget::Still {
            lens_id: ultra_id,
            format: still_format(raw),
        };
        let request = match self.build_request(
            CaptureTemplate::StillCapture,
            &[target],
            self.settings.preview.fps,
        ) {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!(error = %e, "Failed to build priming request");
                return;
            }
        };
        let Some(device) = self.device.as_mut() else {
            return;
        };
        match device.capture(&request) {
            Ok(tag) => {
                self.priming.primed_session = Some(session.id);
                self.priming.tag = Some(tag);
                info!(?tag, "Ultrawide primed");
                self.emit(EngineEvent::UltraPrimed);
            }
            Err(e) => warn!(error = %e, "Ultrawide priming capture rejected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::{Size, StreamFormat};
    use std::sync::Arc;

    fn image(lens: &str, tag: u64) -> ImageHandle {
        ImageHandle::new(lens, StreamFormat::Jpeg, Size::new(4, 4), 0, Arc::from(vec![0u8; 4]))
            .with_tag(RequestTag(tag))
    }

    #[test]
    fn test_discard_matches_request_not_lens() {
        let mut priming = PrimingState {
            tag: Some(RequestTag(3)),
            ..Default::default()
        };
        assert!(!priming.discard_image(&image("3", 4)));
        assert!(priming.discard_image(&image("3", 3)));
        // Only the one image is swallowed
        assert!(!priming.discard_image(&image("3", 3)));
    }

    #[test]
    fn test_forgotten_request_discards_nothing() {
        let mut priming = PrimingState {
            tag: Some(RequestTag(3)),
            ..Default::default()
        };
        priming.forget_request();
        assert!(!priming.discard_image(&image("3", 3)));
    }
}
