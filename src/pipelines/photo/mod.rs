// SPDX-License-Identifier: GPL-3.0-only

//! Stereo still capture pipeline
//!
//! ```text
//! capture request ─▶ PendingStillCapture ─▶ ReadyCapture ─▶ executors
//!                     (wide, ultra, result)   (detached)     (files or DNG, composite, log)
//! ```
//!
//! The engine holds at most one [`PendingStillCapture`]. As soon as it is
//! ready it is detached and its writes are dispatched, so a new capture can
//! be requested while the previous one is still being saved.

pub mod capture;
pub mod composite;
pub mod encoding;
pub mod raw;

pub use capture::{ImageOffer, PendingStillCapture, ReadyCapture, StillOutputs};
pub use composite::{SideBySideComposer, StereoComposer};
pub use encoding::{StillSink, allocate_outputs, delete_outputs, dispatch_ready_capture};
