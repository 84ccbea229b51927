// SPDX-License-Identifier: GPL-3.0-only

//! Simulated logical camera device

use super::frames::{PAYLOAD_SIZE, still_payload};
use super::{Shared, SubmitKind, SubmittedRequest, VirtualBehavior};
use crate::backends::camera::CameraDevice;
use crate::backends::camera::types::{
    BackendError, BackendResult, CameraEvent, CaptureRequest, CaptureResult, EventSink,
    ImageHandle, OutputTarget, PhysicalResult, RequestTag, SessionConfig, SessionId,
};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Nominal frame interval used for sensor timestamps
const FRAME_INTERVAL_NS: i64 = 33_333_333;

#[derive(Debug, Clone)]
struct OpenSession {
    id: SessionId,
    config: SessionConfig,
    configured: bool,
}

type SessionSlot = Arc<Mutex<Option<OpenSession>>>;

fn lock(slot: &SessionSlot) -> MutexGuard<'_, Option<OpenSession>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Emit the images, result and sequence end of one still request
fn deliver_stills(
    events: &EventSink,
    shared: &Shared,
    behavior: &VirtualBehavior,
    request: &CaptureRequest,
    tag: RequestTag,
    frame: u64,
) {
    if behavior.fail_captures {
        debug!(?tag, "Failing capture");
        events.emit(CameraEvent::CaptureFailed {
            tag,
            reason: "simulated capture failure".to_string(),
        });
        events.emit(CameraEvent::SequenceCompleted(tag));
        return;
    }

    let base_ts = frame as i64 * FRAME_INTERVAL_NS;
    let mut physical = BTreeMap::new();
    let stills = request.targets.iter().filter_map(|t| match t {
        OutputTarget::Still { lens_id, format } => Some((lens_id, *format)),
        _ => None,
    });
    for (index, (lens_id, format)) in stills.enumerate() {
        physical.insert(
            lens_id.clone(),
            PhysicalResult {
                exposure_time_ns: Some(10_000_000),
                sensitivity_iso: Some(100),
                color_gains: Some([2.0, 1.0, 1.0, 1.6]),
                color_transform: None,
                lens_shading_map_size: None,
            },
        );
        if behavior.withheld_lenses.contains(lens_id) {
            debug!(lens = %lens_id, "Withholding image");
            continue;
        }
        let data = match still_payload(format, index) {
            Ok(data) => data,
            Err(e) => {
                warn!(lens = %lens_id, error = %e, "Failed to render still payload");
                events.emit(CameraEvent::CaptureFailed { tag, reason: e });
                events.emit(CameraEvent::SequenceCompleted(tag));
                return;
            }
        };
        let copies = if behavior.duplicate_images { 2 } else { 1 };
        for _ in 0..copies {
            let outstanding = Arc::clone(&shared.outstanding_images);
            outstanding.fetch_add(1, Ordering::SeqCst);
            let image = ImageHandle::new(
                lens_id.as_str(),
                format,
                PAYLOAD_SIZE,
                base_ts + index as i64 * behavior.sync_skew_ns,
                Arc::clone(&data),
            )
            .with_tag(tag)
            .with_release(move || {
                outstanding.fetch_sub(1, Ordering::SeqCst);
            });
            events.emit(CameraEvent::ImageAvailable(image));
        }
    }

    if behavior.deliver_results {
        events.emit(CameraEvent::CaptureCompleted(CaptureResult {
            tag,
            frame_number: frame,
            sensor_timestamp_ns: base_ts,
            physical,
        }));
    }
    events.emit(CameraEvent::SequenceCompleted(tag));
}

/// Device handed out by [`super::VirtualCamera::open_device`]
pub struct VirtualDevice {
    id: String,
    events: EventSink,
    shared: Arc<Shared>,
    session: SessionSlot,
    repeating: Option<RequestTag>,
    helper_threads: Vec<JoinHandle<()>>,
}

impl VirtualDevice {
    pub(super) fn new(id: &str, events: EventSink, shared: Arc<Shared>) -> Self {
        Self {
            id: id.to_string(),
            events,
            shared,
            session: Arc::new(Mutex::new(None)),
            repeating: None,
            helper_threads: Vec::new(),
        }
    }

    fn validate_outputs(&self, config: &SessionConfig) -> BackendResult<()> {
        for output in &config.outputs {
            if let Some(lens) = &output.physical_lens_id
                && self.shared.config.lens(lens).is_none()
            {
                return Err(BackendError::SessionFailed(format!(
                    "output bound to unknown lens {}",
                    lens
                )));
            }
        }
        Ok(())
    }

    /// Session a request may run against, or why it may not
    fn configured_session(&self, request: &CaptureRequest) -> BackendResult<OpenSession> {
        let guard = lock(&self.session);
        let session = guard
            .as_ref()
            .ok_or_else(|| BackendError::RequestRejected("no open session".to_string()))?;
        if !session.configured {
            return Err(BackendError::RequestRejected(format!(
                "session {:?} is not configured yet",
                session.id
            )));
        }
        for target in &request.targets {
            if !session.config.outputs.iter().any(|o| &o.target == target) {
                return Err(BackendError::RequestRejected(format!(
                    "target {:?} is not part of the session",
                    target
                )));
            }
        }
        Ok(session.clone())
    }

    fn record(&self, kind: SubmitKind, session: SessionId, request: &CaptureRequest) -> (RequestTag, u64) {
        let mut journal = self.shared.journal();
        journal.next_tag += 1;
        journal.frame_number += 1;
        journal.requests.push(SubmittedRequest {
            kind,
            session,
            request: request.clone(),
        });
        (RequestTag(journal.next_tag), journal.frame_number)
    }

    fn join_helper_threads(&mut self) {
        for handle in self.helper_threads.drain(..) {
            if handle.join().is_err() {
                warn!("Virtual helper thread panicked");
            }
        }
    }
}

impl CameraDevice for VirtualDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn create_session(&mut self, config: SessionConfig) -> BackendResult<SessionId> {
        self.validate_outputs(&config)?;
        let (id, behavior) = {
            let mut journal = self.shared.journal();
            if let Some(open) = journal.open_session {
                return Err(BackendError::SessionFailed(format!(
                    "session {:?} is still open",
                    open
                )));
            }
            journal.next_session += 1;
            let id = SessionId(journal.next_session);
            journal.sessions.push((id, config.clone()));
            journal.open_session = Some(id);
            (id, journal.behavior.clone())
        };
        *lock(&self.session) = Some(OpenSession {
            id,
            config,
            configured: false,
        });

        // Finished threads are joined lazily
        self.helper_threads.retain(|h| !h.is_finished());
        let slot = Arc::clone(&self.session);
        let shared = Arc::clone(&self.shared);
        let events = self.events.clone();
        let handle = thread::Builder::new()
            .name("virtual-configure".to_string())
            .spawn(move || {
                thread::sleep(behavior.configure_latency);
                let event = {
                    let mut guard = lock(&slot);
                    match guard.as_mut() {
                        Some(session) if session.id == id => {
                            if behavior.fail_session_configure {
                                *guard = None;
                                shared.journal().open_session = None;
                                CameraEvent::SessionConfigureFailed {
                                    session: id,
                                    reason: "simulated configuration failure".to_string(),
                                }
                            } else {
                                session.configured = true;
                                CameraEvent::SessionConfigured(id)
                            }
                        }
                        // Closed before configuration finished
                        _ => return,
                    }
                };
                events.emit(event);
            })
            .map_err(|e| BackendError::SessionFailed(e.to_string()))?;
        self.helper_threads.push(handle);
        debug!(session = ?id, "Virtual session configuring");
        Ok(id)
    }

    fn close_session(&mut self, session: SessionId) {
        let mut guard = lock(&self.session);
        if guard.as_ref().is_some_and(|s| s.id == session) {
            *guard = None;
            self.repeating = None;
            let mut journal = self.shared.journal();
            if journal.open_session == Some(session) {
                journal.open_session = None;
            }
            debug!(?session, "Virtual session closed");
        }
    }

    fn set_repeating_request(&mut self, request: &CaptureRequest) -> BackendResult<RequestTag> {
        let session = self.configured_session(request)?;
        let (tag, _) = self.record(SubmitKind::Repeating, session.id, request);
        self.repeating = Some(tag);
        Ok(tag)
    }

    fn stop_repeating(&mut self) -> BackendResult<()> {
        if let Some(tag) = self.repeating.take() {
            debug!(?tag, "Repeating request stopped");
        }
        Ok(())
    }

    fn capture(&mut self, request: &CaptureRequest) -> BackendResult<RequestTag> {
        let session = self.configured_session(request)?;
        let (tag, frame) = self.record(SubmitKind::Capture, session.id, request);
        let behavior = self.shared.journal().behavior.clone();
        if behavior.delivery_delay.is_zero() {
            deliver_stills(&self.events, &self.shared, &behavior, request, tag, frame);
            return Ok(tag);
        }

        self.helper_threads.retain(|h| !h.is_finished());
        let (events, shared, request) = (self.events.clone(), Arc::clone(&self.shared), request.clone());
        let handle = thread::Builder::new()
            .name("virtual-delivery".to_string())
            .spawn(move || {
                thread::sleep(behavior.delivery_delay);
                deliver_stills(&events, &shared, &behavior, &request, tag, frame);
            })
            .map_err(|e| BackendError::RequestRejected(e.to_string()))?;
        self.helper_threads.push(handle);
        Ok(tag)
    }

    fn close(&mut self) {
        let open = lock(&self.session).as_ref().map(|s| s.id);
        if let Some(session) = open {
            self.close_session(session);
        }
        self.join_helper_threads();
        debug!(device = %self.id, "Virtual device closed");
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        self.join_helper_threads();
    }
}
