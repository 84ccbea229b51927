// SPDX-License-Identifier: GPL-3.0-only

//! Hardware camera seam
//!
//! The engine never talks to a camera service directly. Everything it needs is
//! expressed through two traits:
//!
//! ```text
//! ┌─────────────────────┐
//! │  CaptureEngine      │  ← serialization thread
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  CameraHal          │  ← ids, characteristics, open
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │  CameraDevice       │  ← sessions, requests, events via EventSink
//! └─────────────────────┘
//! ```
//!
//! Helpers that build on the seam live beside it: rig discovery ([`rig`]),
//! request construction ([`request`]), size negotiation ([`formats`]) and
//! tone mapping ([`tonemap`]).

pub mod formats;
pub mod request;
pub mod rig;
pub mod tonemap;
pub mod types;

pub use rig::{DeviceProfile, LensRig, ZoomMode};
pub use types::*;

/// Camera service: enumeration, characteristics and device open
pub trait CameraHal: Send + Sync {
    /// All camera ids the service exposes
    fn camera_ids(&self) -> BackendResult<Vec<String>>;

    /// Static characteristics of a logical or physical camera id
    fn characteristics(&self, id: &str) -> BackendResult<LensCharacteristics>;

    /// Device model string used for coarse profile heuristics
    fn device_model(&self) -> String;

    /// Open a logical camera. Events for the device are delivered to `events`.
    fn open_device(&self, id: &str, events: EventSink) -> BackendResult<Box<dyn CameraDevice>>;
}

/// An opened camera device
///
/// All methods are called from the engine's serialization thread only.
pub trait CameraDevice: Send {
    fn id(&self) -> &str;

    /// Begin configuring a session. Completion arrives as
    /// [`CameraEvent::SessionConfigured`] or [`CameraEvent::SessionConfigureFailed`].
    fn create_session(&mut self, config: SessionConfig) -> BackendResult<SessionId>;

    /// Close a session synchronously; no frame of that session is delivered afterwards
    fn close_session(&mut self, session: SessionId);

    fn set_repeating_request(&mut self, request: &CaptureRequest) -> BackendResult<RequestTag>;

    fn stop_repeating(&mut self) -> BackendResult<()>;

    /// Submit a single capture. Results and images arrive asynchronously.
    fn capture(&mut self, request: &CaptureRequest) -> BackendResult<RequestTag>;

    fn close(&mut self);
}
