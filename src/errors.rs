// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture engine

use crate::backends::camera::types::BackendError;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main engine error type
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Camera, rig or session errors
    Camera(CameraError),
    /// Recording-related errors
    Recording(RecordingError),
    /// Still capture errors
    Photo(PhotoError),
    /// Configuration errors
    Config(String),
    /// Output store errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Camera-specific errors
#[derive(Debug, Clone, PartialEq)]
pub enum CameraError {
    /// No usable lens rig was discovered; the fallback rig is in use
    RigDiscoveryFailed(String),
    /// Neither discovery nor the fallback rig produced a usable rig
    NoUsableRig(String),
    /// Device has not been opened or the session is not configured yet
    NotReady,
    /// Device open failed
    OpenFailed(String),
    /// Session configuration failed
    SessionConfigFailed(String),
    /// No size is supported by both lenses for the requested use
    NoCommonSize(String),
    /// Zoom mode change rejected or failed
    Zoom(String),
    /// The engine worker is gone
    WorkerStopped,
    /// Backend error passed through unchanged
    Backend(BackendError),
}

/// Recording-specific errors
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingError {
    /// Failed to start recording
    StartFailed(String),
    /// Failed to stop recording cleanly
    StopFailed(String),
    /// Recording already in progress
    AlreadyRecording,
    /// No recording in progress
    NotRecording,
    /// Encoder or muxer error
    PipelineError(String),
}

/// Still capture errors
#[derive(Debug, Clone, PartialEq)]
pub enum PhotoError {
    /// Another stereo capture is still pending
    CaptureInProgress,
    /// Still capture is not possible while recording
    RecordingActive,
    /// Hardware reported a capture failure
    CaptureFailed(String),
    /// Capture never became ready within the watchdog window
    Timeout,
    /// Writing an output failed
    SaveFailed(String),
    /// Stereo composite failed
    CompositeFailed(String),
    /// RAW frame could not be packaged as DNG
    EncodingFailed(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Camera(e) => write!(f, "Camera error: {}", e),
            AppError::Recording(e) => write!(f, "Recording error: {}", e),
            AppError::Photo(e) => write!(f, "Photo error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CameraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraError::RigDiscoveryFailed(msg) => {
                write!(f, "Lens rig discovery failed, using fallback rig: {}", msg)
            }
            CameraError::NoUsableRig(msg) => write!(f, "No usable lens rig: {}", msg),
            CameraError::NotReady => write!(f, "Camera is not ready"),
            CameraError::OpenFailed(msg) => write!(f, "Failed to open camera: {}", msg),
            CameraError::SessionConfigFailed(msg) => {
                write!(f, "Session configuration failed: {}", msg)
            }
            CameraError::NoCommonSize(msg) => write!(f, "No common size: {}", msg),
            CameraError::Zoom(msg) => write!(f, "Zoom switch: {}", msg),
            CameraError::WorkerStopped => write!(f, "Camera worker has stopped"),
            CameraError::Backend(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::StartFailed(msg) => write!(f, "Failed to start recording: {}", msg),
            RecordingError::StopFailed(msg) => write!(f, "Failed to stop recording: {}", msg),
            RecordingError::AlreadyRecording => write!(f, "Recording already in progress"),
            RecordingError::NotRecording => write!(f, "No recording in progress"),
            RecordingError::PipelineError(msg) => write!(f, "Pipeline error: {}", msg),
        }
    }
}

impl fmt::Display for PhotoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoError::CaptureInProgress => write!(f, "A stereo capture is already pending"),
            PhotoError::RecordingActive => write!(f, "Cannot capture a still while recording"),
            PhotoError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            PhotoError::Timeout => write!(f, "Capture timed out waiting for both lenses"),
            PhotoError::SaveFailed(msg) => write!(f, "Save failed: {}", msg),
            PhotoError::CompositeFailed(msg) => write!(f, "Composite failed: {}", msg),
            PhotoError::EncodingFailed(msg) => write!(f, "DNG encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for CameraError {}
impl std::error::Error for RecordingError {}
impl std::error::Error for PhotoError {}

impl From<CameraError> for AppError {
    fn from(err: CameraError) -> Self {
        AppError::Camera(err)
    }
}

impl From<RecordingError> for AppError {
    fn from(err: RecordingError) -> Self {
        AppError::Recording(err)
    }
}

impl From<PhotoError> for AppError {
    fn from(err: PhotoError) -> Self {
        AppError::Photo(err)
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        AppError::Camera(CameraError::Backend(err))
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<std::io::Error> for PhotoError {
    fn from(err: std::io::Error) -> Self {
        PhotoError::SaveFailed(err.to_string())
    }
}
