// SPDX-License-Identifier: GPL-3.0-only
// Shared types for the hardware camera seam

//! Shared types for camera backends

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Width × height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Aspect ratio as width / height (0.0 for degenerate sizes)
    pub fn aspect(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    pub fn fits_within(&self, bound: Size) -> bool {
        self.width <= bound.width && self.height <= bound.height
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel rectangle in sensor active-array coordinates, right/bottom exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Overlap of two rectangles, `None` when they do not overlap
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let r = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() { None } else { Some(r) }
    }
}

/// A 3A metering region with its weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteringRegion {
    pub rect: Rect,
    pub weight: u32,
}

/// Target frame rate range for auto exposure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl FpsRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, fps: u32) -> bool {
        self.min <= fps && fps <= self.max
    }

    pub fn width(&self) -> u32 {
        self.max.saturating_sub(self.min)
    }
}

impl std::fmt::Display for FpsRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Which way a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Facing {
    Front,
    #[default]
    Back,
    External,
}

/// Capabilities a camera id can advertise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    BackwardCompatible,
    LogicalMultiCamera,
    Raw,
    ManualPostProcessing,
}

/// Output stream formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamFormat {
    /// Compressed JPEG stills
    Jpeg,
    /// 16-bit Bayer sensor data
    Raw16,
    /// YUV 4:2:0
    Yuv,
    /// Opaque format for preview and encoder surfaces
    Private,
}

/// Tone mapping modes a device may support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TonemapMode {
    ContrastCurve,
    Fast,
    HighQuality,
    GammaValue,
    PresetCurve,
}

/// Preset tone curves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TonemapPreset {
    Srgb,
    Rec709,
}

/// Noise reduction / edge enhancement / distortion correction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ProcessingMode {
    Off,
    #[default]
    Fast,
    HighQuality,
}

/// Static description of one camera id (logical or physical)
#[derive(Debug, Clone, Default)]
pub struct LensCharacteristics {
    pub facing: Facing,
    pub capabilities: BTreeSet<Capability>,
    /// Physical ids behind a logical multi-camera (empty for physical lenses)
    pub physical_ids: Vec<String>,
    /// Advertised focal lengths in millimeters, first is the primary one
    pub focal_lengths_mm: Vec<f32>,
    /// Physical sensor size in millimeters (width, height)
    pub sensor_size_mm: (f32, f32),
    pub active_array: Rect,
    /// Minimum zoom ratio of a logical camera (below 1.0 when an ultrawide is fused in)
    pub min_zoom_ratio: Option<f32>,
    pub stream_sizes: BTreeMap<StreamFormat, Vec<Size>>,
    pub fps_ranges: Vec<FpsRange>,
    pub max_regions_ae: u32,
    pub max_regions_af: u32,
    pub max_regions_awb: u32,
    /// Request keys the device accepts
    pub request_keys: BTreeSet<ControlKey>,
    pub tonemap_modes: BTreeSet<TonemapMode>,
    pub max_curve_points: u32,
    /// Exposure compensation range in steps
    pub ae_compensation_range: (i32, i32),
    pub noise_reduction_modes: Vec<ProcessingMode>,
    pub edge_modes: Vec<ProcessingMode>,
    pub distortion_modes: Vec<ProcessingMode>,
}

impl LensCharacteristics {
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    pub fn sizes(&self, format: StreamFormat) -> &[Size] {
        self.stream_sizes
            .get(&format)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn sensor_area_mm2(&self) -> f32 {
        self.sensor_size_mm.0 * self.sensor_size_mm.1
    }
}

/// Keys of capture request controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ControlKey {
    NoiseReductionMode,
    EdgeMode,
    DistortionCorrectionMode,
    AeTargetFpsRange,
    AeRegions,
    AfRegions,
    AwbRegions,
    AeExposureCompensation,
    TonemapMode,
    TonemapCurve,
    TonemapPresetCurve,
    VideoStabilizationMode,
    OpticalStabilizationMode,
    AfMode,
}

/// Typed control values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlValue {
    Bool(bool),
    Int(i32),
    Processing(ProcessingMode),
    Fps(FpsRange),
    Regions(Vec<MeteringRegion>),
    Tonemap(TonemapMode),
    /// Flattened (in, out) pairs in [0, 1]
    Curve(Vec<f32>),
    Preset(TonemapPreset),
}

pub type ControlMap = BTreeMap<ControlKey, ControlValue>;

/// Request template, mirrors the hardware's intent presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureTemplate {
    Preview,
    Record,
    StillCapture,
}

/// Opaque handle to a consumer-owned surface (encoder input)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

/// Where a session output delivers frames
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputTarget {
    /// The caller's preview surface
    Preview,
    /// Still image reader bound to one physical lens
    Still { lens_id: String, format: StreamFormat },
    /// Encoder input surface
    Encoder(SurfaceId),
}

/// One output of a capture session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub target: OutputTarget,
    /// Physical lens this output is bound to, `None` for the logical stream
    pub physical_lens_id: Option<String>,
    pub size: Size,
}

/// Full capture session configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    pub outputs: Vec<OutputConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestTag(pub u64);

/// A capture request with logical controls and per-physical-lens overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub template: CaptureTemplate,
    pub targets: Vec<OutputTarget>,
    pub logical: ControlMap,
    pub physical: BTreeMap<String, ControlMap>,
}

impl CaptureRequest {
    pub fn new(template: CaptureTemplate) -> Self {
        Self {
            template,
            targets: Vec::new(),
            logical: ControlMap::new(),
            physical: BTreeMap::new(),
        }
    }

    pub fn add_target(&mut self, target: OutputTarget) {
        if !self.targets.contains(&target) {
            self.targets.push(target);
        }
    }
}

/// Per-lens metadata needed to develop RAW frames
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicalResult {
    pub exposure_time_ns: Option<i64>,
    pub sensitivity_iso: Option<i32>,
    pub color_gains: Option<[f32; 4]>,
    pub color_transform: Option<[f32; 9]>,
    pub lens_shading_map_size: Option<Size>,
}

/// Hardware capture result for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub tag: RequestTag,
    pub frame_number: u64,
    pub sensor_timestamp_ns: i64,
    pub physical: BTreeMap<String, PhysicalResult>,
}

/// A delivered image buffer
///
/// The buffer is returned to the hardware when the handle is dropped; every
/// code path that replaces or discards a handle therefore closes it.
pub struct ImageHandle {
    pub lens_id: String,
    pub format: StreamFormat,
    pub size: Size,
    pub timestamp_ns: i64,
    pub data: Arc<[u8]>,
    /// Request that produced the buffer, when the producer knows it
    pub tag: Option<RequestTag>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ImageHandle {
    pub fn new(
        lens_id: impl Into<String>,
        format: StreamFormat,
        size: Size,
        timestamp_ns: i64,
        data: Arc<[u8]>,
    ) -> Self {
        Self {
            lens_id: lens_id.into(),
            format,
            size,
            timestamp_ns,
            data,
            tag: None,
            release: None,
        }
    }

    pub fn with_tag(mut self, tag: RequestTag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Attach the hook that returns the buffer to its producer
    pub fn with_release(mut self, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageHandle")
            .field("lens_id", &self.lens_id)
            .field("format", &self.format)
            .field("size", &self.size)
            .field("timestamp_ns", &self.timestamp_ns)
            .field("tag", &self.tag)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Asynchronous hardware events
#[derive(Debug)]
pub enum CameraEvent {
    SessionConfigured(SessionId),
    SessionConfigureFailed { session: SessionId, reason: String },
    ImageAvailable(ImageHandle),
    CaptureCompleted(CaptureResult),
    CaptureFailed { tag: RequestTag, reason: String },
    SequenceCompleted(RequestTag),
    DeviceError(String),
}

/// Where a device delivers its events
///
/// The engine hands a sink to the device on open; the sink forwards onto the
/// serialization thread so every event is observed in order.
#[derive(Clone)]
pub struct EventSink(Arc<dyn Fn(CameraEvent) + Send + Sync>);

impl EventSink {
    pub fn new(f: impl Fn(CameraEvent) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn emit(&self, event: CameraEvent) {
        (self.0)(event)
    }
}

impl std::fmt::Debug for EventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EventSink")
    }
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Camera id not known to the service
    DeviceNotFound(String),
    /// Device could not be opened
    OpenFailed(String),
    /// Device was closed or disconnected
    Disconnected,
    /// Session could not be created
    SessionFailed(String),
    /// Request was rejected on submit
    RequestRejected(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            BackendError::OpenFailed(msg) => write!(f, "Open failed: {}", msg),
            BackendError::Disconnected => write!(f, "Device disconnected"),
            BackendError::SessionFailed(msg) => write!(f, "Session failed: {}", msg),
            BackendError::RequestRejected(msg) => write!(f, "Request rejected: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_rect_intersect() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, 25, 150, 75);
        assert_eq!(a.intersect(&b), Some(Rect::new(50, 25, 100, 75)));
        assert_eq!(a.intersect(&Rect::new(200, 200, 300, 300)), None);
    }

    #[test]
    fn test_image_handle_releases_on_drop() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&released);
        let image = ImageHandle::new("2", StreamFormat::Jpeg, Size::new(4, 4), 0, Arc::from(vec![0u8; 4]))
            .with_release(move || flag.store(true, Ordering::SeqCst));
        assert!(!released.load(Ordering::SeqCst));
        drop(image);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn test_fps_range_contains() {
        let range = FpsRange::new(24, 30);
        assert!(range.contains(24));
        assert!(range.contains(30));
        assert!(!range.contains(60));
        assert_eq!(range.width(), 6);
    }
}
