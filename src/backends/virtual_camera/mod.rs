// SPDX-License-Identifier: GPL-3.0-only

//! Simulated stereo camera service
//!
//! A logical rear multi-camera with configurable physical lenses, used by the
//! CLI and the integration tests. It behaves like the hardware where the
//! engine depends on it:
//!
//! - sessions configure asynchronously and only one may be open at a time
//! - requests against an unconfigured session are rejected
//! - images, results and sequence completion arrive through the [`EventSink`]
//! - every delivered image holds a buffer until its handle is dropped
//!
//! Behavior knobs ([`VirtualBehavior`]) withhold images or results and inject
//! failures so the engine's abort paths can be exercised.

mod device;
mod frames;

pub use device::VirtualDevice;

use crate::backends::camera::types::{
    BackendError, BackendResult, Capability, CaptureRequest, ControlKey, EventSink, Facing,
    FpsRange, LensCharacteristics, ProcessingMode, Rect, SessionConfig, SessionId, Size,
    StreamFormat, TonemapMode,
};
use crate::backends::camera::{CameraDevice, CameraHal};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// One simulated physical lens
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualLens {
    pub id: String,
    pub focal_mm: f32,
    pub sensor_mm: (f32, f32),
    /// Preview/encoder stream sizes
    pub stream_sizes: Vec<Size>,
    pub jpeg_sizes: Vec<Size>,
    /// Empty when the lens cannot deliver RAW
    pub raw_sizes: Vec<Size>,
    pub fps_ranges: Vec<FpsRange>,
}

impl VirtualLens {
    pub fn new(id: &str, focal_mm: f32, sensor_mm: (f32, f32)) -> Self {
        Self {
            id: id.to_string(),
            focal_mm,
            sensor_mm,
            stream_sizes: vec![
                Size::new(640, 480),
                Size::new(1280, 720),
                Size::new(1920, 1080),
            ],
            jpeg_sizes: vec![Size::new(1920, 1440), Size::new(4000, 3000)],
            raw_sizes: vec![Size::new(4000, 3000)],
            fps_ranges: vec![
                FpsRange::new(15, 15),
                FpsRange::new(15, 30),
                FpsRange::new(24, 30),
                FpsRange::new(30, 30),
            ],
        }
    }

    fn characteristics(&self) -> LensCharacteristics {
        let all_keys: BTreeSet<ControlKey> = [
            ControlKey::NoiseReductionMode,
            ControlKey::EdgeMode,
            ControlKey::DistortionCorrectionMode,
            ControlKey::AeTargetFpsRange,
            ControlKey::AeRegions,
            ControlKey::AfRegions,
            ControlKey::AwbRegions,
            ControlKey::AeExposureCompensation,
            ControlKey::TonemapMode,
            ControlKey::TonemapCurve,
            ControlKey::TonemapPresetCurve,
            ControlKey::VideoStabilizationMode,
            ControlKey::OpticalStabilizationMode,
            ControlKey::AfMode,
        ]
        .into_iter()
        .collect();

        let mut capabilities = BTreeSet::from([Capability::BackwardCompatible]);
        if !self.raw_sizes.is_empty() {
            capabilities.insert(Capability::Raw);
        }
        let mut stream_sizes = BTreeMap::from([
            (StreamFormat::Private, self.stream_sizes.clone()),
            (StreamFormat::Jpeg, self.jpeg_sizes.clone()),
        ]);
        if !self.raw_sizes.is_empty() {
            stream_sizes.insert(StreamFormat::Raw16, self.raw_sizes.clone());
        }
        let array = self.raw_sizes.first().or(self.jpeg_sizes.last()).copied().unwrap_or(Size::new(4000, 3000));

        LensCharacteristics {
            facing: Facing::Back,
            capabilities,
            physical_ids: Vec::new(),
            focal_lengths_mm: vec![self.focal_mm],
            sensor_size_mm: self.sensor_mm,
            active_array: Rect::new(0, 0, array.width as i32, array.height as i32),
            min_zoom_ratio: None,
            stream_sizes,
            fps_ranges: self.fps_ranges.clone(),
            max_regions_ae: 1,
            max_regions_af: 1,
            max_regions_awb: 1,
            request_keys: all_keys,
            tonemap_modes: BTreeSet::from([
                TonemapMode::ContrastCurve,
                TonemapMode::Fast,
                TonemapMode::HighQuality,
                TonemapMode::PresetCurve,
            ]),
            max_curve_points: 64,
            ae_compensation_range: (-24, 24),
            noise_reduction_modes: vec![
                ProcessingMode::Off,
                ProcessingMode::Fast,
                ProcessingMode::HighQuality,
            ],
            edge_modes: vec![ProcessingMode::Off, ProcessingMode::Fast, ProcessingMode::HighQuality],
            distortion_modes: vec![ProcessingMode::Off, ProcessingMode::Fast],
        }
    }
}

/// Shape of the simulated device
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualRigConfig {
    pub model: String,
    pub logical_id: String,
    pub lenses: Vec<VirtualLens>,
    pub min_zoom_ratio: Option<f32>,
    /// Extra front camera listed by the service, not part of the rig
    pub front_id: Option<String>,
}

impl VirtualRigConfig {
    /// Handheld phone: ultrawide, wide and a cropped 2x mode of the wide sensor
    pub fn pixel() -> Self {
        let mut wide_2x = VirtualLens::new("4", 6.81, (4.9, 3.7));
        wide_2x.raw_sizes = vec![Size::new(2000, 1500)];
        Self {
            model: "Pixel 7 Pro".to_string(),
            logical_id: "0".to_string(),
            lenses: vec![
                VirtualLens::new("2", 6.81, (9.8, 7.4)),
                VirtualLens::new("3", 2.23, (6.4, 4.8)),
                wide_2x,
            ],
            min_zoom_ratio: Some(0.6),
            front_id: Some("1".to_string()),
        }
    }

    /// Fixed landscape rig without a 2x mode; still sizes differ per lens
    pub fn landscape() -> Self {
        let wide = VirtualLens::new("2", 5.4, (6.4, 4.8));
        let mut ultra = VirtualLens::new("3", 1.9, (5.6, 4.2));
        ultra.jpeg_sizes = vec![Size::new(1600, 1200), Size::new(3264, 2448)];
        ultra.raw_sizes = vec![Size::new(3264, 2448)];
        Self {
            model: "StereoRig S1".to_string(),
            logical_id: "0".to_string(),
            lenses: vec![wide, ultra],
            min_zoom_ratio: Some(0.5),
            front_id: None,
        }
    }

    fn lens(&self, id: &str) -> Option<&VirtualLens> {
        self.lenses.iter().find(|l| l.id == id)
    }

    fn logical_characteristics(&self) -> LensCharacteristics {
        let mut chars = self
            .lenses
            .first()
            .map(VirtualLens::characteristics)
            .unwrap_or_default();
        chars.capabilities.insert(Capability::LogicalMultiCamera);
        chars.physical_ids = self.lenses.iter().map(|l| l.id.clone()).collect();
        chars.min_zoom_ratio = self.min_zoom_ratio;
        chars
    }
}

impl Default for VirtualRigConfig {
    fn default() -> Self {
        Self::pixel()
    }
}

/// Capture behavior knobs
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualBehavior {
    /// Lenses whose still images are never delivered
    pub withheld_lenses: Vec<String>,
    pub deliver_results: bool,
    /// Report every still capture as failed
    pub fail_captures: bool,
    pub fail_session_configure: bool,
    /// Deliver each still image twice
    pub duplicate_images: bool,
    pub configure_latency: Duration,
    /// Delay between a still request and its images; zero delivers inline
    pub delivery_delay: Duration,
    /// Sensor timestamp offset of the second lens of a capture
    pub sync_skew_ns: i64,
}

impl Default for VirtualBehavior {
    fn default() -> Self {
        Self {
            withheld_lenses: Vec::new(),
            deliver_results: true,
            fail_captures: false,
            fail_session_configure: false,
            duplicate_images: false,
            configure_latency: Duration::from_millis(5),
            delivery_delay: Duration::ZERO,
            sync_skew_ns: 120_000,
        }
    }
}

/// How a request reached the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitKind {
    Repeating,
    Capture,
}

/// A request accepted by the device
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedRequest {
    pub kind: SubmitKind,
    pub session: SessionId,
    pub request: CaptureRequest,
}

#[derive(Debug, Default)]
struct Journal {
    behavior: VirtualBehavior,
    sessions: Vec<(SessionId, SessionConfig)>,
    requests: Vec<SubmittedRequest>,
    open_session: Option<SessionId>,
    next_session: u64,
    next_tag: u64,
    frame_number: u64,
}

/// State shared between the service and its devices
#[derive(Debug)]
struct Shared {
    config: VirtualRigConfig,
    journal: Mutex<Journal>,
    outstanding_images: Arc<AtomicUsize>,
}

impl Shared {
    fn journal(&self) -> MutexGuard<'_, Journal> {
        match self.journal.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The simulated camera service
#[derive(Debug)]
pub struct VirtualCamera {
    shared: Arc<Shared>,
}

impl VirtualCamera {
    pub fn new(config: VirtualRigConfig) -> Self {
        Self::with_behavior(config, VirtualBehavior::default())
    }

    pub fn with_behavior(config: VirtualRigConfig, behavior: VirtualBehavior) -> Self {
        info!(model = %config.model, lenses = config.lenses.len(), "Virtual camera created");
        Self {
            shared: Arc::new(Shared {
                config,
                journal: Mutex::new(Journal {
                    behavior,
                    ..Default::default()
                }),
                outstanding_images: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    pub fn config(&self) -> &VirtualRigConfig {
        &self.shared.config
    }

    pub fn behavior(&self) -> VirtualBehavior {
        self.shared.journal().behavior.clone()
    }

    /// Change capture behavior; applies to the next request
    pub fn update_behavior(&self, update: impl FnOnce(&mut VirtualBehavior)) {
        update(&mut self.shared.journal().behavior);
    }

    /// Every session configuration ever requested, oldest first
    pub fn sessions(&self) -> Vec<SessionConfig> {
        self.shared
            .journal()
            .sessions
            .iter()
            .map(|(_, config)| config.clone())
            .collect()
    }

    pub fn requests(&self) -> Vec<SubmittedRequest> {
        self.shared.journal().requests.clone()
    }

    /// Single captures only, without repeating requests
    pub fn captures(&self) -> Vec<CaptureRequest> {
        self.shared
            .journal()
            .requests
            .iter()
            .filter(|r| r.kind == SubmitKind::Capture)
            .map(|r| r.request.clone())
            .collect()
    }

    /// Images delivered and not yet closed by their consumer
    pub fn outstanding_images(&self) -> usize {
        self.shared.outstanding_images.load(Ordering::SeqCst)
    }
}

impl Default for VirtualCamera {
    fn default() -> Self {
        Self::new(VirtualRigConfig::default())
    }
}

impl CameraHal for VirtualCamera {
    fn camera_ids(&self) -> BackendResult<Vec<String>> {
        let config = &self.shared.config;
        let mut ids = vec![config.logical_id.clone()];
        ids.extend(config.front_id.iter().cloned());
        ids.extend(config.lenses.iter().map(|l| l.id.clone()));
        Ok(ids)
    }

    fn characteristics(&self, id: &str) -> BackendResult<LensCharacteristics> {
        let config = &self.shared.config;
        if id == config.logical_id {
            return Ok(config.logical_characteristics());
        }
        if config.front_id.as_deref() == Some(id) {
            let mut front = VirtualLens::new(id, 2.5, (4.0, 3.0)).characteristics();
            front.facing = Facing::Front;
            return Ok(front);
        }
        config
            .lens(id)
            .map(VirtualLens::characteristics)
            .ok_or_else(|| BackendError::DeviceNotFound(id.to_string()))
    }

    fn device_model(&self) -> String {
        self.shared.config.model.clone()
    }

    fn open_device(&self, id: &str, events: EventSink) -> BackendResult<Box<dyn CameraDevice>> {
        if id != self.shared.config.logical_id {
            return Err(BackendError::OpenFailed(format!(
                "{} is not the logical camera",
                id
            )));
        }
        debug!(camera = %id, "Opening virtual device");
        Ok(Box::new(VirtualDevice::new(id, events, Arc::clone(&self.shared))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::rig::resolve_rig;

    #[test]
    fn test_pixel_rig_resolves_with_2x() {
        let camera = VirtualCamera::default();
        let rig = resolve_rig(&camera).unwrap();
        assert_eq!(rig.logical_id, "0");
        assert_eq!(rig.ultra_id, "3");
        assert_eq!(rig.wide_1x_id, "2");
        assert_eq!(rig.wide_2x_id.as_deref(), Some("4"));
        assert!((rig.ultra_3a_fraction - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_landscape_rig_has_no_2x() {
        let camera = VirtualCamera::new(VirtualRigConfig::landscape());
        let rig = resolve_rig(&camera).unwrap();
        assert_eq!(rig.wide_2x_id, None);
        assert!(rig.profile.needs_capture_watchdog());
    }

    #[test]
    fn test_unknown_id() {
        let camera = VirtualCamera::default();
        assert!(matches!(
            camera.characteristics("42"),
            Err(BackendError::DeviceNotFound(_))
        ));
    }
}
