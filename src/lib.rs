// SPDX-License-Identifier: GPL-3.0-only

//! Stereo Camera - capture orchestration for dual-lens stereo photo and video
//!
//! This library drives two physical lenses of one logical camera in lockstep:
//! synchronized stereo stills, dual-stream recording, zoom switching and tone
//! control, all behind a single [`CaptureEngine`] handle.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera HAL seam, lens rig discovery and the virtual camera
//! - [`engine`]: The capture engine worker and its command handlers
//! - [`media`]: Encoder and muxer seam plus the virtual media backend
//! - [`pipelines`]: Still capture synchronization and recording lifecycle
//! - [`config`]: Persisted engine settings
//! - [`storage`]: Pending/finalized output store
//!
//! # Example
//!
//! ```ignore
//! let deps = EngineDeps { hal, media, store, composer };
//! let (engine, events) = CaptureEngine::start(deps, Settings::default())?;
//! let capture_id = engine.capture_stereo_photo()?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod media;
pub mod pipelines;
pub mod storage;

// Re-export commonly used types
pub use backends::camera::{LensRig, ZoomMode};
pub use config::Settings;
pub use constants::BitratePreset;
pub use engine::{CaptureEngine, CaptureOptions, EngineDeps, EngineEvent, EngineMode, EngineStatus, StillOutputKind};
pub use errors::{AppError, AppResult};
