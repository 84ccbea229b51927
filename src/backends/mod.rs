// SPDX-License-Identifier: GPL-3.0-only

//! Backend abstraction layer for the logical multi-camera
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                Capture Engine                │
//! └────────────────────┬────────────────────────┘
//!                      │ CameraHal / CameraDevice
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌──────────────────┐  ┌─────────────────┐  │
//! │  │  Lens rig, HAL   │  │ Virtual camera  │  │
//! │  │  request mirror  │  │  (simulated)    │  │
//! │  └──────────────────┘  └─────────────────┘  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: HAL traits, lens rig resolution, size negotiation and request building
//! - [`virtual_camera`]: Simulated dual-lens device used by the CLI and tests

pub mod camera;
pub mod virtual_camera;
