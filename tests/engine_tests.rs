// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture engine against the virtual camera

use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};
use stereo_camera::backends::camera::types::{
    CaptureTemplate, ControlKey, ControlValue, OutputTarget, Size, StreamFormat,
};
use stereo_camera::backends::virtual_camera::{
    SubmitKind, VirtualBehavior, VirtualCamera, VirtualLens, VirtualRigConfig,
};
use stereo_camera::config::{PrimingSettings, Stabilization};
use stereo_camera::errors::{CameraError, PhotoError, RecordingError};
use stereo_camera::media::virtual_media::{MediaFaults, VirtualMediaFactory};
use stereo_camera::pipelines::photo::SideBySideComposer;
use stereo_camera::pipelines::video::RecordingOutcome;
use stereo_camera::storage::FileOutputStore;
use stereo_camera::{
    AppError, CaptureEngine, CaptureOptions, EngineDeps, EngineEvent, EngineMode, Settings,
    StillOutputKind, ZoomMode,
};
use tempfile::TempDir;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

struct Harness {
    dir: TempDir,
    camera: Arc<VirtualCamera>,
    media: VirtualMediaFactory,
    engine: Option<CaptureEngine>,
    events: Receiver<EngineEvent>,
}

impl Harness {
    fn start(camera: VirtualCamera, settings: Settings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let camera = Arc::new(camera);
        let media = VirtualMediaFactory::new();
        let deps = EngineDeps {
            hal: camera.clone(),
            media: Arc::new(media.clone()),
            store: Arc::new(FileOutputStore::new(dir.path())),
            composer: Arc::new(SideBySideComposer::new()),
        };
        let (engine, events) = CaptureEngine::start(deps, settings).unwrap();
        Self {
            dir,
            camera,
            media,
            engine: Some(engine),
            events,
        }
    }

    fn pixel(settings: Settings) -> Self {
        Self::start(VirtualCamera::new(VirtualRigConfig::pixel()), settings)
    }

    fn engine(&self) -> &CaptureEngine {
        self.engine.as_ref().unwrap()
    }

    fn wait_for<T>(&self, mut pick: impl FnMut(&EngineEvent) -> Option<T>) -> T {
        let deadline = Instant::now() + EVENT_TIMEOUT;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .expect("timed out waiting for engine event");
            let event = self
                .events
                .recv_timeout(remaining)
                .expect("engine event channel");
            if let Some(value) = pick(&event) {
                return value;
            }
        }
    }

    /// Wait for an active preview in the given zoom mode; returns its RAW flag
    fn wait_preview(&self, zoom: ZoomMode) -> bool {
        self.wait_for(|e| match e {
            EngineEvent::PreviewActive { raw, zoom: z } if *z == zoom => Some(*raw),
            _ => None,
        })
    }

    /// Collect `count` output reports of one capture
    fn wait_outputs(&self, capture_id: u64, count: usize) -> Vec<StillOutputKind> {
        let mut kinds = Vec::new();
        while kinds.len() < count {
            let kind = self.wait_for(|e| match e {
                EngineEvent::PhotoOutputSaved { capture_id: id, kind, .. } if *id == capture_id => {
                    Some(*kind)
                }
                EngineEvent::PhotoOutputFailed { capture_id: id, kind, error } if *id == capture_id => {
                    panic!("{:?} output failed: {}", kind, error)
                }
                EngineEvent::PhotoFailed { capture_id: id, error } if *id == capture_id => {
                    panic!("capture failed: {}", error)
                }
                _ => None,
            });
            kinds.push(kind);
        }
        kinds
    }

    fn stop(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.stop();
        }
    }

    /// Published file names under `subdir`; asserts nothing is left pending
    fn published(&self, subdir: &str) -> Vec<String> {
        published(&self.dir.path().join(subdir))
    }
}

fn published(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(
        names.iter().all(|n| !n.starts_with(".pending-")),
        "pending entries left behind: {:?}",
        names
    );
    names.sort();
    names
}

fn priming_settings() -> Settings {
    Settings {
        ultra_priming: PrimingSettings {
            enabled: true,
            delay_ms: 10,
        },
        ..Default::default()
    }
}

/// Rig whose physical lenses all share one focal length
fn single_focal_rig(ids: &[&str]) -> VirtualRigConfig {
    let mut config = VirtualRigConfig::pixel();
    config.lenses = ids
        .iter()
        .map(|id| VirtualLens::new(id, 6.81, (9.8, 7.4)))
        .collect();
    config
}

fn still_lens(target: &OutputTarget) -> Option<(&str, StreamFormat)> {
    match target {
        OutputTarget::Still { lens_id, format } => Some((lens_id.as_str(), *format)),
        _ => None,
    }
}

#[test]
fn test_stereo_photo_writes_every_output() {
    let mut h = Harness::pixel(Settings::default());
    let (rig, _sizes) = h.wait_for(|e| match e {
        EngineEvent::Started { rig, sizes } => Some((rig.clone(), *sizes)),
        _ => None,
    });
    assert_eq!(rig.wide_1x_id, "2");
    assert_eq!(rig.ultra_id, "3");
    assert!(!h.wait_preview(ZoomMode::Wide1x));

    let id = h.engine().capture_stereo_photo().unwrap();
    let delta = h.wait_for(|e| match e {
        EngineEvent::PhotoCaptured { capture_id, sync_delta_ns } if *capture_id == id => {
            Some(*sync_delta_ns)
        }
        _ => None,
    });
    // Virtual lenses are skewed by a fixed amount
    assert_eq!(delta.abs(), VirtualBehavior::default().sync_skew_ns);

    let mut kinds = h.wait_outputs(id, 3);
    kinds.sort_by_key(|k| format!("{:?}", k));
    assert_eq!(
        kinds,
        vec![StillOutputKind::Composite, StillOutputKind::Ultra, StillOutputKind::Wide]
    );

    // One capture targeting both lenses
    let captures = h.camera.captures();
    assert_eq!(captures.len(), 1);
    assert_eq!(captures[0].template, CaptureTemplate::StillCapture);
    let lenses: Vec<_> = captures[0].targets.iter().filter_map(still_lens).collect();
    assert_eq!(lenses, vec![("2", StreamFormat::Jpeg), ("3", StreamFormat::Jpeg)]);

    h.stop();
    let photos = h.published("photos");
    assert_eq!(photos.len(), 3);
    assert!(photos.iter().any(|n| n.ends_with("_wide.jpg")));
    assert!(photos.iter().any(|n| n.ends_with("_ultra.jpg")));
    assert_eq!(h.camera.outstanding_images(), 0);
}

#[test]
fn test_second_capture_rejected_while_pending() {
    let camera = VirtualCamera::with_behavior(
        VirtualRigConfig::pixel(),
        VirtualBehavior {
            withheld_lenses: vec!["3".to_string()],
            ..Default::default()
        },
    );
    let mut h = Harness::start(camera, Settings::default());
    h.wait_preview(ZoomMode::Wide1x);

    let first = h.engine().capture_stereo_photo().unwrap();
    assert_eq!(
        h.engine().capture_stereo_photo(),
        Err(AppError::Photo(PhotoError::CaptureInProgress))
    );
    // Session-changing commands wait for the capture as well
    assert_eq!(
        h.engine().start_recording(),
        Err(AppError::Photo(PhotoError::CaptureInProgress))
    );
    assert!(h.engine().status().unwrap().capture_pending);

    // Only one capture request was issued
    assert_eq!(h.camera.captures().len(), 1);

    h.stop();
    h.wait_for(|e| match e {
        EngineEvent::PhotoFailed { capture_id, .. } if *capture_id == first => Some(()),
        _ => None,
    });
    assert!(h.published("photos").is_empty());
    assert_eq!(h.camera.outstanding_images(), 0);
}

#[test]
fn test_watchdog_aborts_capture_missing_a_lens() {
    // The landscape profile arms the watchdog
    let camera = VirtualCamera::with_behavior(
        VirtualRigConfig::landscape(),
        VirtualBehavior {
            withheld_lenses: vec!["3".to_string()],
            ..Default::default()
        },
    );
    let mut h = Harness::start(camera, Settings::default());
    h.wait_preview(ZoomMode::Wide1x);

    let id = h.engine().capture_stereo_photo().unwrap();
    let error = h.wait_for(|e| match e {
        EngineEvent::PhotoCaptured { capture_id, .. } if *capture_id == id => {
            panic!("capture finalized without the ultrawide image")
        }
        EngineEvent::PhotoFailed { capture_id, error } if *capture_id == id => Some(error.clone()),
        _ => None,
    });
    assert_eq!(error, AppError::Photo(PhotoError::Timeout));
    assert!(!h.engine().status().unwrap().capture_pending);
    assert!(h.published("photos").is_empty());

    // The engine takes the next capture once the lens delivers again
    h.camera.update_behavior(|b| b.withheld_lenses.clear());
    let next = h.engine().capture_stereo_photo().unwrap();
    h.wait_outputs(next, 3);

    h.stop();
    assert_eq!(h.published("photos").len(), 3);
    assert_eq!(h.camera.outstanding_images(), 0);
}

#[test]
fn test_landscape_rig_falls_back_to_per_lens_still_sizes() {
    let mut h = Harness::start(
        VirtualCamera::new(VirtualRigConfig::landscape()),
        Settings::default(),
    );
    let (wide, ultra) = h.wait_for(|e| match e {
        EngineEvent::StillSizeFallback { wide, ultra } => Some((*wide, *ultra)),
        _ => None,
    });
    assert_eq!(wide, Size::new(4000, 3000));
    assert_eq!(ultra, Size::new(3264, 2448));
    h.stop();
}

#[test]
fn test_capture_failure_keeps_engine_usable() {
    let camera = VirtualCamera::with_behavior(
        VirtualRigConfig::pixel(),
        VirtualBehavior {
            fail_captures: true,
            ..Default::default()
        },
    );
    let mut h = Harness::start(camera, Settings::default());
    h.wait_preview(ZoomMode::Wide1x);

    let id = h.engine().capture_stereo_photo().unwrap();
    let error = h.wait_for(|e| match e {
        EngineEvent::PhotoFailed { capture_id, error } if *capture_id == id => Some(error.clone()),
        _ => None,
    });
    assert!(matches!(error, AppError::Photo(PhotoError::CaptureFailed(_))));

    // Preview repeating was restored after the abort
    let last = h.camera.requests().pop().unwrap();
    assert_eq!(last.kind, SubmitKind::Repeating);
    assert_eq!(last.request.template, CaptureTemplate::Preview);

    h.camera.update_behavior(|b| b.fail_captures = false);
    let next = h.engine().capture_stereo_photo().unwrap();
    assert_ne!(next, id);
    h.wait_outputs(next, 3);

    h.stop();
    assert_eq!(h.published("photos").len(), 3);
}

#[test]
fn test_raw_capture_writes_dng_without_composite() {
    let settings = Settings {
        raw_mode: true,
        ..Default::default()
    };
    let mut h = Harness::pixel(settings);
    assert!(h.wait_preview(ZoomMode::Wide1x));

    let id = h.engine().capture_stereo_photo().unwrap();
    let kinds = h.wait_outputs(id, 2);
    assert!(!kinds.contains(&StillOutputKind::Composite));

    h.stop();
    let photos = h.published("photos");
    assert_eq!(photos.len(), 2);
    assert!(photos.iter().all(|n| n.ends_with(".dng")));
    for name in &photos {
        let bytes = std::fs::read(h.dir.path().join("photos").join(name)).unwrap();
        // TIFF container, larger than the bare sensor buffer
        assert!(bytes.starts_with(b"II"), "{} is not a DNG", name);
        assert!(bytes.len() > 64 * 48 * 2);
    }
}

#[test]
fn test_raw_results_withheld_never_finalize() {
    let camera = VirtualCamera::with_behavior(
        VirtualRigConfig::pixel(),
        VirtualBehavior {
            deliver_results: false,
            ..Default::default()
        },
    );
    let settings = Settings {
        raw_mode: true,
        ..Default::default()
    };
    let mut h = Harness::start(camera, settings);
    h.wait_preview(ZoomMode::Wide1x);

    h.engine().capture_stereo_photo().unwrap();
    // Both images are in, but RAW also needs the result
    std::thread::sleep(Duration::from_millis(100));
    assert!(h.engine().status().unwrap().capture_pending);

    h.stop();
    assert!(h.published("photos").is_empty());
    assert_eq!(h.camera.outstanding_images(), 0);
}

#[test]
fn test_capture_with_raw_toggle_races_session_rebuild() {
    // Slow configuration keeps the rebuilt session unconfigured at capture time
    let camera = VirtualCamera::with_behavior(
        VirtualRigConfig::pixel(),
        VirtualBehavior {
            configure_latency: Duration::from_millis(200),
            ..Default::default()
        },
    );
    let mut h = Harness::start(camera, Settings::default());
    assert!(!h.wait_preview(ZoomMode::Wide1x));

    // The capture goes out against the session that is still configuring and
    // is rejected; its outputs are deleted.
    let result = h
        .engine()
        .capture_stereo_photo_with(CaptureOptions { raw: Some(true) });
    assert!(
        matches!(result, Err(AppError::Photo(PhotoError::CaptureFailed(_)))),
        "{:?}",
        result
    );
    h.wait_for(|e| match e {
        EngineEvent::RawModeChanged(true) => Some(()),
        _ => None,
    });
    assert!(!h.engine().status().unwrap().capture_pending);

    // The new RAW session still comes up and captures normally
    assert!(h.wait_preview(ZoomMode::Wide1x));
    let id = h.engine().capture_stereo_photo().unwrap();
    h.wait_outputs(id, 2);

    h.stop();
    let photos = h.published("photos");
    assert_eq!(photos.len(), 2);
    assert!(photos.iter().all(|n| n.ends_with(".dng")));
    for name in &photos {
        let bytes = std::fs::read(h.dir.path().join("photos").join(name)).unwrap();
        // TIFF container, larger than the bare sensor buffer
        assert!(bytes.starts_with(b"II"), "{} is not a DNG", name);
        assert!(bytes.len() > 64 * 48 * 2);
    }
}

#[test]
fn test_raw_unavailable_on_landscape_profile() {
    let settings = Settings {
        raw_mode: true,
        ..Default::default()
    };
    let mut h = Harness::start(VirtualCamera::new(VirtualRigConfig::landscape()), settings);
    // The profile does not assume RAW even though both lenses advertise it
    assert!(!h.wait_preview(ZoomMode::Wide1x));
    assert_eq!(
        h.engine().status().unwrap().mode,
        EngineMode::Preview { raw: false }
    );
    h.stop();
}

#[test]
fn test_recording_finalizes_both_files() {
    let mut settings = Settings::default();
    settings.record.stabilization = Stabilization::Both;
    settings.logging.recording_sample_log = true;
    let mut h = Harness::pixel(settings);
    h.wait_preview(ZoomMode::Wide1x);

    h.engine().start_recording().unwrap();
    h.wait_for(|e| match e {
        EngineEvent::RecordingStarted { .. } => Some(()),
        _ => None,
    });
    assert_eq!(h.engine().status().unwrap().mode, EngineMode::Recording);
    assert_eq!(
        h.engine().start_recording(),
        Err(AppError::Recording(RecordingError::AlreadyRecording))
    );
    assert_eq!(
        h.engine().capture_stereo_photo(),
        Err(AppError::Photo(PhotoError::RecordingActive))
    );

    // Record request mirrors stabilization onto the logical camera
    let record = h
        .camera
        .requests()
        .into_iter()
        .rev()
        .find(|r| r.request.template == CaptureTemplate::Record)
        .unwrap();
    assert_eq!(record.kind, SubmitKind::Repeating);
    assert_eq!(
        record.request.logical.get(&ControlKey::VideoStabilizationMode),
        Some(&ControlValue::Bool(true))
    );
    assert_eq!(
        record.request.logical.get(&ControlKey::OpticalStabilizationMode),
        Some(&ControlValue::Bool(true))
    );

    std::thread::sleep(Duration::from_millis(150));
    h.engine().stop_recording().unwrap();
    let report = h.wait_for(|e| match e {
        EngineEvent::RecordingStopped(report) => Some(report.clone()),
        _ => None,
    });
    assert!(report.wide.is_finalized());
    assert!(report.ultra.is_finalized());
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(report.log.is_some());
    if let RecordingOutcome::Finalized(path) = &report.wide {
        assert!(std::fs::metadata(path).unwrap().len() > 0);
    }

    // Encoders get end of stream before the muxers close
    let journal = h.media.journal();
    let eos = journal.position("video:wide.eos").unwrap();
    let muxer_stop = journal.position("muxer:wide.release").unwrap();
    assert!(eos < muxer_stop);

    // Preview comes back and stills work again
    h.wait_preview(ZoomMode::Wide1x);
    assert_eq!(
        h.engine().stop_recording(),
        Err(AppError::Recording(RecordingError::NotRecording))
    );
    let id = h.engine().capture_stereo_photo().unwrap();
    h.wait_outputs(id, 3);

    h.stop();
    assert_eq!(h.published("videos").len(), 2);
    assert_eq!(h.published("logs").len(), 1);
    assert_eq!(h.camera.outstanding_images(), 0);
}

#[test]
fn test_recording_start_failure_deletes_files() {
    let mut h = Harness::pixel(Settings::default());
    h.wait_preview(ZoomMode::Wide1x);
    h.media.set_faults(MediaFaults {
        fail_video_start: true,
        ..Default::default()
    });

    h.engine().start_recording().unwrap();
    let error = h.wait_for(|e| match e {
        EngineEvent::RecordingStarted { .. } => panic!("recording started with a failing encoder"),
        EngineEvent::RecordingFailed(error) => Some(error.clone()),
        _ => None,
    });
    assert!(matches!(error, AppError::Recording(RecordingError::StartFailed(_))));
    assert!(h.published("videos").is_empty());

    // Back to preview
    h.wait_preview(ZoomMode::Wide1x);
    assert!(!h.engine().status().unwrap().teardown_in_flight);
    h.stop();
}

#[test]
fn test_recording_refused_without_common_size() {
    let mut settings = Settings::default();
    // No stream size fits
    settings.record.size = Size::new(320, 240);
    let mut h = Harness::pixel(settings);
    h.wait_preview(ZoomMode::Wide1x);

    let result = h.engine().start_recording();
    assert!(matches!(
        result,
        Err(AppError::Recording(RecordingError::StartFailed(_)))
    ));
    assert_eq!(
        h.engine().status().unwrap().mode,
        EngineMode::Preview { raw: false }
    );
    h.stop();
    assert!(h.published("videos").is_empty());
}

#[test]
fn test_zoom_rejected_while_recording() {
    let settings = Settings {
        zoom_2x_enabled: true,
        ..Default::default()
    };
    let mut h = Harness::pixel(settings);
    h.wait_preview(ZoomMode::Wide1x);

    h.engine().start_recording().unwrap();
    h.wait_for(|e| match e {
        EngineEvent::RecordingStarted { .. } => Some(()),
        _ => None,
    });
    let sessions_before = h.camera.sessions().len();

    let result = h.engine().set_zoom(ZoomMode::Wide2x);
    assert!(matches!(result, Err(AppError::Camera(CameraError::Zoom(_)))));
    assert_eq!(h.engine().status().unwrap().zoom, ZoomMode::Wide1x);
    // Recording session untouched
    assert_eq!(h.camera.sessions().len(), sessions_before);
    assert_eq!(h.engine().status().unwrap().mode, EngineMode::Recording);

    h.engine().stop_recording().unwrap();
    let report = h.wait_for(|e| match e {
        EngineEvent::RecordingStopped(report) => Some(report.clone()),
        _ => None,
    });
    assert!(report.wide.is_finalized() && report.ultra.is_finalized());
    h.stop();
}

#[test]
fn test_zoom_2x_switches_wide_lens() {
    let settings = Settings {
        zoom_2x_enabled: true,
        ..Default::default()
    };
    let mut h = Harness::pixel(settings);
    h.wait_preview(ZoomMode::Wide1x);

    assert!(matches!(
        h.engine().set_zoom(ZoomMode::Wide1x),
        Err(AppError::Camera(CameraError::Zoom(_)))
    ));

    h.engine().set_zoom(ZoomMode::Wide2x).unwrap();
    h.wait_for(|e| match e {
        EngineEvent::ZoomChanged(ZoomMode::Wide2x) => Some(()),
        _ => None,
    });
    h.wait_preview(ZoomMode::Wide2x);

    // The new session binds the 2x lens
    let session = h.camera.sessions().pop().unwrap();
    assert!(session
        .outputs
        .iter()
        .any(|o| o.physical_lens_id.as_deref() == Some("4")));

    let id = h.engine().capture_stereo_photo().unwrap();
    h.wait_outputs(id, 3);
    let capture = h.camera.captures().pop().unwrap();
    let lenses: Vec<_> = capture.targets.iter().filter_map(still_lens).map(|(l, _)| l).collect();
    assert_eq!(lenses, vec!["4", "3"]);

    // Disabling 2x in settings drops back to the 1x lens
    let settings = Settings {
        zoom_2x_enabled: false,
        ..Default::default()
    };
    h.engine().update_settings(settings).unwrap();
    h.wait_for(|e| match e {
        EngineEvent::ZoomChanged(ZoomMode::Wide1x) => Some(()),
        _ => None,
    });
    h.wait_preview(ZoomMode::Wide1x);
    h.stop();
}

#[test]
fn test_zoom_2x_disabled_is_rejected() {
    let mut h = Harness::pixel(Settings::default());
    h.wait_preview(ZoomMode::Wide1x);
    let sessions_before = h.camera.sessions().len();

    assert!(matches!(
        h.engine().set_zoom(ZoomMode::Wide2x),
        Err(AppError::Camera(CameraError::Zoom(_)))
    ));
    assert_eq!(h.camera.sessions().len(), sessions_before);
    h.stop();
}

#[test]
fn test_zoom_falls_back_to_1x_when_2x_session_fails() {
    let mut config = VirtualRigConfig::pixel();
    // The 2x lens shares no stream size with the ultrawide
    config.lenses[2].stream_sizes = vec![Size::new(4000, 3000)];
    let settings = Settings {
        zoom_2x_enabled: true,
        ..Default::default()
    };
    let mut h = Harness::start(VirtualCamera::new(config), settings);
    h.wait_preview(ZoomMode::Wide1x);

    let result = h.engine().set_zoom(ZoomMode::Wide2x);
    assert!(matches!(result, Err(AppError::Camera(CameraError::Zoom(_)))));
    assert_eq!(h.engine().status().unwrap().zoom, ZoomMode::Wide1x);

    // 1x preview is rebuilt and usable
    h.wait_preview(ZoomMode::Wide1x);
    let id = h.engine().capture_stereo_photo().unwrap();
    h.wait_outputs(id, 3);
    let capture = h.camera.captures().pop().unwrap();
    assert!(capture.targets.iter().filter_map(still_lens).any(|(l, _)| l == "2"));
    h.stop();
}

#[test]
fn test_ultra_priming_discards_its_image() {
    let mut h = Harness::pixel(priming_settings());
    h.wait_preview(ZoomMode::Wide1x);
    h.wait_for(|e| match e {
        EngineEvent::UltraPrimed => Some(()),
        _ => None,
    });

    let captures = h.camera.captures();
    assert_eq!(captures.len(), 1);
    let lenses: Vec<_> = captures[0].targets.iter().filter_map(still_lens).collect();
    assert_eq!(lenses, vec![("3", StreamFormat::Jpeg)]);

    // The priming image never reaches a stereo capture
    let id = h.engine().capture_stereo_photo().unwrap();
    h.wait_outputs(id, 3);

    h.stop();
    assert_eq!(h.published("photos").len(), 3);
    assert_eq!(h.camera.outstanding_images(), 0);
}

#[test]
fn test_session_configure_failure_recovers_on_rebuild() {
    let camera = VirtualCamera::with_behavior(
        VirtualRigConfig::pixel(),
        VirtualBehavior {
            fail_session_configure: true,
            ..Default::default()
        },
    );
    let mut h = Harness::start(camera, Settings::default());
    let error = h.wait_for(|e| match e {
        EngineEvent::Error(error) => Some(error.clone()),
        _ => None,
    });
    assert!(matches!(error, AppError::Camera(CameraError::SessionConfigFailed(_))));
    assert_eq!(
        h.engine().capture_stereo_photo(),
        Err(AppError::Camera(CameraError::NotReady))
    );
    assert_eq!(h.engine().status().unwrap().mode, EngineMode::Closed);

    h.camera.update_behavior(|b| b.fail_session_configure = false);
    h.engine().set_raw_mode(true).unwrap();
    assert!(h.wait_preview(ZoomMode::Wide1x));
    h.stop();
}

#[test]
fn test_update_settings_rebuilds_preview() {
    let mut h = Harness::pixel(Settings::default());
    h.wait_preview(ZoomMode::Wide1x);

    let mut settings = Settings::default();
    settings.preview.size = Size::new(1280, 720);
    h.engine().update_settings(settings).unwrap();
    h.wait_for(|e| match e {
        EngineEvent::SettingsApplied => Some(()),
        _ => None,
    });
    h.wait_preview(ZoomMode::Wide1x);

    let status = h.engine().status().unwrap();
    assert_eq!(status.sizes.unwrap().preview, Size::new(1280, 720));
    assert!(status.session_ready);
    h.stop();
}

#[test]
fn test_stop_emits_stopped_and_releases_images() {
    let mut h = Harness::pixel(Settings::default());
    h.wait_preview(ZoomMode::Wide1x);
    let id = h.engine().capture_stereo_photo().unwrap();
    h.wait_outputs(id, 3);

    h.stop();
    h.wait_for(|e| match e {
        EngineEvent::Stopped => Some(()),
        _ => None,
    });
    assert_eq!(h.camera.outstanding_images(), 0);
}

#[test]
fn test_duplicate_images_are_closed() {
    let camera = VirtualCamera::with_behavior(
        VirtualRigConfig::pixel(),
        VirtualBehavior {
            duplicate_images: true,
            ..Default::default()
        },
    );
    let mut h = Harness::start(camera, Settings::default());
    h.wait_preview(ZoomMode::Wide1x);

    for _ in 0..2 {
        let id = h.engine().capture_stereo_photo().unwrap();
        h.wait_outputs(id, 3);
    }

    h.stop();
    assert_eq!(h.published("photos").len(), 6);
    assert_eq!(h.camera.outstanding_images(), 0);
}

#[test]
fn test_lost_priming_image_does_not_block_captures() {
    // The priming capture's ultrawide image never arrives
    let camera = VirtualCamera::with_behavior(
        VirtualRigConfig::pixel(),
        VirtualBehavior {
            withheld_lenses: vec!["3".to_string()],
            ..Default::default()
        },
    );
    let mut h = Harness::start(camera, priming_settings());
    h.wait_preview(ZoomMode::Wide1x);
    h.wait_for(|e| match e {
        EngineEvent::UltraPrimed => Some(()),
        _ => None,
    });
    h.camera.update_behavior(|b| b.withheld_lenses.clear());

    let first = h.engine().capture_stereo_photo().unwrap();
    h.wait_outputs(first, 3);
    let second = h.engine().capture_stereo_photo().unwrap();
    h.wait_outputs(second, 3);

    h.stop();
    assert_eq!(h.published("photos").len(), 6);
    assert_eq!(h.camera.outstanding_images(), 0);
}

#[test]
fn test_priming_completion_keeps_preview_paused_during_capture() {
    let camera = VirtualCamera::with_behavior(
        VirtualRigConfig::pixel(),
        VirtualBehavior {
            delivery_delay: Duration::from_millis(300),
            ..Default::default()
        },
    );
    let mut h = Harness::start(camera, priming_settings());
    h.wait_preview(ZoomMode::Wide1x);
    h.wait_for(|e| match e {
        EngineEvent::UltraPrimed => Some(()),
        _ => None,
    });

    // The stereo capture completes long after the priming capture
    h.camera
        .update_behavior(|b| b.delivery_delay = Duration::from_millis(1500));
    let id = h.engine().capture_stereo_photo().unwrap();
    std::thread::sleep(Duration::from_millis(700));
    assert!(h.engine().status().unwrap().capture_pending);

    let requests = h.camera.requests();
    let capture_at = requests
        .iter()
        .rposition(|r| r.kind == SubmitKind::Capture)
        .unwrap();
    assert!(
        requests[capture_at + 1..]
            .iter()
            .all(|r| r.kind != SubmitKind::Repeating),
        "preview resumed while the stereo capture was in flight"
    );

    h.wait_outputs(id, 3);
    // Restored once the capture's own sequence completes
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while !h.camera.requests()[capture_at + 1..]
        .iter()
        .any(|r| r.kind == SubmitKind::Repeating)
    {
        assert!(Instant::now() < deadline, "preview never resumed");
        std::thread::sleep(Duration::from_millis(10));
    }
    h.stop();
}

#[test]
fn test_recording_stopped_before_start_deletes_files() {
    // Recording session stays unconfigured while stop arrives
    let camera = VirtualCamera::with_behavior(
        VirtualRigConfig::pixel(),
        VirtualBehavior {
            configure_latency: Duration::from_millis(500),
            ..Default::default()
        },
    );
    let mut settings = Settings::default();
    settings.logging.recording_sample_log = true;
    let mut h = Harness::start(camera, settings);
    h.wait_preview(ZoomMode::Wide1x);

    h.engine().start_recording().unwrap();
    h.engine().stop_recording().unwrap();
    let report = h.wait_for(|e| match e {
        EngineEvent::RecordingStarted { .. } => panic!("recording started after stop"),
        EngineEvent::RecordingStopped(report) => Some(report.clone()),
        _ => None,
    });
    assert_eq!(report.wide, RecordingOutcome::Deleted);
    assert_eq!(report.ultra, RecordingOutcome::Deleted);
    assert!(report.log.is_none());

    h.wait_preview(ZoomMode::Wide1x);
    h.stop();
    assert!(h.published("videos").is_empty());
    assert!(h.published("logs").is_empty());
}

#[test]
fn test_discovery_failure_uses_fallback_rig() {
    let camera = VirtualCamera::new(single_focal_rig(&["2", "3"]));
    let mut h = Harness::start(camera, Settings::default());
    let error = h.wait_for(|e| match e {
        EngineEvent::Error(error) => Some(error.clone()),
        _ => None,
    });
    assert!(matches!(error, AppError::Camera(CameraError::RigDiscoveryFailed(_))));

    let rig = h.wait_for(|e| match e {
        EngineEvent::Started { rig, .. } => Some(rig.clone()),
        _ => None,
    });
    assert_eq!(rig.logical_id, "0");
    assert_eq!(rig.wide_1x_id, "2");
    assert_eq!(rig.ultra_id, "3");
    assert_eq!(rig.wide_2x_id, None);

    h.wait_preview(ZoomMode::Wide1x);
    let id = h.engine().capture_stereo_photo().unwrap();
    h.wait_outputs(id, 3);
    h.stop();
}

#[test]
fn test_start_fails_without_usable_rig() {
    let dir = tempfile::tempdir().unwrap();
    let camera = Arc::new(VirtualCamera::new(single_focal_rig(&["5", "6"])));
    let deps = EngineDeps {
        hal: camera.clone(),
        media: Arc::new(VirtualMediaFactory::new()),
        store: Arc::new(FileOutputStore::new(dir.path())),
        composer: Arc::new(SideBySideComposer::new()),
    };
    match CaptureEngine::start(deps, Settings::default()) {
        Err(AppError::Camera(CameraError::NoUsableRig(reason))) => {
            assert!(reason.contains("fallback"), "{}", reason);
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("engine started without a usable rig"),
    }
    assert!(camera.sessions().is_empty());
}
