// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for stereo capture
//!
//! This module provides command-line functionality for:
//! - Printing the resolved lens rig
//! - Taking stereo photos
//! - Recording dual-lens videos
//! - Switching to the 2x wide lens

use crate::RigPreset;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use stereo_camera::backends::virtual_camera::{VirtualCamera, VirtualRigConfig};
use stereo_camera::media::virtual_media::VirtualMediaFactory;
use stereo_camera::pipelines::photo::SideBySideComposer;
use stereo_camera::pipelines::video::RecordingOutcome;
use stereo_camera::storage::{FileOutputStore, default_output_root};
use stereo_camera::{CaptureEngine, EngineDeps, EngineEvent, Settings, ZoomMode};
use tracing::debug;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// How long to wait for the preview session after start
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a stereo capture may take to be fully written
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Options shared by all commands
pub struct CliOptions {
    pub output: Option<PathBuf>,
    pub settings: Option<PathBuf>,
    pub rig: RigPreset,
}

impl CliOptions {
    fn load_settings(&self) -> CliResult<Settings> {
        let path = self.settings.clone().unwrap_or_else(Settings::default_path);
        Ok(Settings::load(&path)?)
    }

    fn output_root(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(default_output_root)
    }
}

/// Build the virtual stack and start the engine
fn start_engine(options: &CliOptions, settings: Settings) -> CliResult<(CaptureEngine, Receiver<EngineEvent>)> {
    let rig = match options.rig {
        RigPreset::Pixel => VirtualRigConfig::pixel(),
        RigPreset::Landscape => VirtualRigConfig::landscape(),
    };
    let root = options.output_root();
    println!("Output: {}", root.display());

    let deps = EngineDeps {
        hal: Arc::new(VirtualCamera::new(rig)),
        media: Arc::new(VirtualMediaFactory::new()),
        store: Arc::new(FileOutputStore::new(root)),
        composer: Arc::new(SideBySideComposer::new()),
    };
    Ok(CaptureEngine::start(deps, settings)?)
}

/// Wait until `pick` accepts an event, discarding the ones it does not
fn wait_for<T>(
    events: &Receiver<EngineEvent>,
    timeout: Duration,
    mut pick: impl FnMut(EngineEvent) -> CliResult<Option<T>>,
) -> CliResult<T> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) => {
                debug!(?event, "Engine event");
                if let EngineEvent::Error(e) = &event {
                    eprintln!("Engine error: {}", e);
                }
                if let Some(value) = pick(event)? {
                    return Ok(value);
                }
            }
            Err(RecvTimeoutError::Timeout) => return Err("Timed out waiting for the camera".into()),
            Err(RecvTimeoutError::Disconnected) => return Err("Capture engine stopped".into()),
        }
    }
}

/// Wait for the preview session; returns whether it captures RAW
fn wait_for_preview(events: &Receiver<EngineEvent>, zoom: ZoomMode) -> CliResult<bool> {
    wait_for(events, STARTUP_TIMEOUT, |event| {
        Ok(match event {
            EngineEvent::PreviewActive { raw, zoom: active } if active == zoom => Some(raw),
            _ => None,
        })
    })
}

/// Number of files one capture produces with these settings
fn expected_outputs(settings: &Settings, raw: bool) -> usize {
    let outputs = settings.outputs;
    [
        outputs.save_wide,
        outputs.save_ultra,
        outputs.save_composite && !raw,
        settings.logging.capture_log,
    ]
    .iter()
    .filter(|enabled| **enabled)
    .count()
}

/// Capture one stereo pair and print where its files went
fn capture_and_report(engine: &CaptureEngine, events: &Receiver<EngineEvent>, expected: usize) -> CliResult<()> {
    let id = engine.capture_stereo_photo()?;
    let mut captured = false;
    let mut reported = 0;

    wait_for(events, CAPTURE_TIMEOUT, |event| {
        match event {
            EngineEvent::PhotoCaptured {
                capture_id,
                sync_delta_ns,
            } if capture_id == id => {
                println!(
                    "Capture {}: lenses {:.3} ms apart",
                    id,
                    sync_delta_ns as f64 / 1_000_000.0
                );
                captured = true;
            }
            EngineEvent::PhotoOutputSaved {
                capture_id,
                kind,
                path,
            } if capture_id == id => {
                println!("  {:?}: {}", kind, path.display());
                reported += 1;
            }
            EngineEvent::PhotoOutputFailed {
                capture_id,
                kind,
                error,
            } if capture_id == id => {
                eprintln!("  {:?} failed: {}", kind, error);
                reported += 1;
            }
            EngineEvent::PhotoFailed { capture_id, error } if capture_id == id => {
                return Err(format!("Capture {} failed: {}", id, error).into());
            }
            _ => {}
        }
        Ok((captured && reported >= expected).then_some(()))
    })
}

/// Print the resolved lens rig
pub fn show_rig(options: &CliOptions) -> CliResult<()> {
    let settings = options.load_settings()?;
    let (engine, events) = start_engine(options, settings)?;

    let (rig, sizes) = wait_for(&events, STARTUP_TIMEOUT, |event| {
        Ok(match event {
            EngineEvent::Started { rig, sizes } => Some((rig, sizes)),
            _ => None,
        })
    })?;

    println!();
    println!("Logical camera: {}", rig.logical_id);
    println!("  Wide 1x:     {}", rig.wide_1x_id);
    println!(
        "  Wide 2x:     {}",
        rig.wide_2x_id.as_deref().unwrap_or("(none)")
    );
    println!("  Ultrawide:   {}", rig.ultra_id);
    println!("  Profile:     {:?}", rig.profile);
    println!("  Rotation:    {}°", rig.display_rotation);
    println!("  3A overlap:  {:.2}", rig.ultra_3a_fraction);
    println!();
    println!("Preview size:  {}", sizes.preview);
    match sizes.record {
        Some(size) => println!("Record size:   {}", size),
        None => println!("Record size:   (no common size)"),
    }
    if sizes.still_common() {
        println!("Still size:    {}", sizes.still_wide);
    } else {
        println!(
            "Still sizes:   wide {}, ultra {}",
            sizes.still_wide, sizes.still_ultra
        );
    }

    engine.stop();
    Ok(())
}

/// Take `count` stereo photos
pub fn take_photos(options: &CliOptions, raw: bool, count: u32) -> CliResult<()> {
    let mut settings = options.load_settings()?;
    settings.raw_mode = raw;
    let (engine, events) = start_engine(options, settings.clone())?;

    let preview_raw = wait_for_preview(&events, ZoomMode::Wide1x)?;
    if raw && !preview_raw {
        println!("RAW is not available on this rig, capturing JPEG");
    }

    let expected = expected_outputs(&settings, preview_raw);
    for _ in 0..count {
        capture_and_report(&engine, &events, expected)?;
    }

    engine.stop();
    Ok(())
}

/// Switch to the 2x wide lens and take one stereo photo
pub fn zoom_photo(options: &CliOptions) -> CliResult<()> {
    let mut settings = options.load_settings()?;
    settings.zoom_2x_enabled = true;
    let (engine, events) = start_engine(options, settings.clone())?;

    wait_for_preview(&events, ZoomMode::Wide1x)?;
    engine.set_zoom(ZoomMode::Wide2x)?;
    let raw = wait_for_preview(&events, ZoomMode::Wide2x)?;
    println!("Switched to the 2x wide lens");

    capture_and_report(&engine, &events, expected_outputs(&settings, raw))?;

    engine.stop();
    Ok(())
}

/// Record both lenses for `duration` seconds
pub fn record_video(options: &CliOptions, duration: u64) -> CliResult<()> {
    let settings = options.load_settings()?;
    let (engine, events) = start_engine(options, settings)?;

    wait_for_preview(&events, ZoomMode::Wide1x)?;
    engine.start_recording()?;
    let session_id = wait_for(&events, STARTUP_TIMEOUT, |event| match event {
        EngineEvent::RecordingStarted { session_id } => Ok(Some(session_id)),
        EngineEvent::RecordingFailed(e) => Err(format!("Recording failed to start: {}", e).into()),
        _ => Ok(None),
    })?;

    println!();
    println!("Recording {}... (press Ctrl+C to stop early)", session_id);

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    // Wait for duration or Ctrl+C
    let start = Instant::now();
    let target_duration = Duration::from_secs(duration);

    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        // Surface failures while recording
        if let Ok(EngineEvent::RecordingFailed(e)) = events.try_recv() {
            println!();
            return Err(format!("Recording failed: {}", e).into());
        }

        let elapsed = start.elapsed().as_secs();
        print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    engine.stop_recording()?;
    let report = wait_for(&events, CAPTURE_TIMEOUT, |event| match event {
        EngineEvent::RecordingStopped(report) => Ok(Some(report)),
        EngineEvent::RecordingFailed(e) => Err(format!("Recording failed: {}", e).into()),
        _ => Ok(None),
    })?;

    for (label, outcome) in [("Wide", &report.wide), ("Ultra", &report.ultra)] {
        match outcome {
            RecordingOutcome::Finalized(path) => println!("{} video saved: {}", label, path.display()),
            RecordingOutcome::Deleted => println!("{} video discarded", label),
        }
    }
    if let Some(log) = &report.log {
        println!("Sample log: {}", log.display());
    }
    for error in &report.errors {
        eprintln!("Warning: {}", error);
    }

    engine.stop();
    Ok(())
}
