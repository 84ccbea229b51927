// SPDX-License-Identifier: GPL-3.0-only

//! Engine behavior, one module per concern
//!
//! Each module adds an `impl EngineState` block:
//!
//! - [`session`]: start, session open/close, request construction, settings
//! - [`capture`]: stereo still capture and its abort paths
//! - [`recording`]: dual recording start/stop
//! - [`zoom`]: wide lens switching
//! - [`priming`]: ultrawide warm-up capture

pub mod capture;
pub mod priming;
pub mod recording;
pub mod session;
pub mod zoom;
