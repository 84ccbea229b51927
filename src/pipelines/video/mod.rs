// SPDX-License-Identifier: GPL-3.0-only

//! Dual-stream recording pipeline
//!
//! - [`recorder`]: encoder/muxer graph of one recording and its teardown
//! - [`logger`]: optional per-sample log taps

pub mod logger;
pub mod recorder;

pub use logger::{SampleLogger, SampleRecord};
pub use recorder::{RecordingOutcome, RecordingPlan, RecordingReport, RecordingSession};
