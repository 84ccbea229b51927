// SPDX-License-Identifier: GPL-3.0-only

//! Capture pipelines running behind the engine thread
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │ wide + ultra │ ──▶ │  Photo Pipeline   │ ──▶ │ JPEG/DNG + stereo │
//! │ still images │     │  - sync slot      │     │ composite + log   │
//! │              │     │  - I/O executors  │     │                   │
//! └──────────────┘     └───────────────────┘     └──────────────────┘
//!
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────────┐
//! │ wide + ultra │ ──▶ │  Video Pipeline   │ ──▶ │ two MP4 files     │
//! │ encoder      │     │  - 2 video encs   │     │ + recording log   │
//! │ surfaces     │     │  - shared audio   │     │                   │
//! └──────────────┘     └───────────────────┘     └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`photo`]: stereo still synchronization and output writing
//! - [`video`]: dual encoder recording lifecycle
//! - [`executors`]: background runtimes for slow work

pub mod executors;
pub mod photo;
pub mod video;
