// SPDX-License-Identifier: GPL-3.0-only

//! Still output writing
//!
//! Output entries are allocated when a capture is requested and published
//! from the background executors once the capture is ready. Per-lens files go
//! to the I/O pool, the composite to its own single-thread executor. RAW
//! frames are packaged as DNG together with their lens's capture metadata.

use super::capture::{CaptureTimings, ReadyCapture, StillOutputs};
use super::composite::StereoComposer;
use super::raw::{DngContext, encode_dng};
use crate::backends::camera::ZoomMode;
use crate::backends::camera::types::CaptureResult;
use crate::config::OutputSettings;
use crate::engine::{EngineEvent, StillOutputKind};
use crate::errors::{AppError, AppResult, PhotoError};
use crate::pipelines::executors::Executors;
use crate::storage::{OutputKind, OutputStore, timestamped_name, write_and_publish};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use tracing::{debug, error, info, warn};

const NAME_PREFIX: &str = "STEREO";

/// File extension of per-lens stills
pub fn still_extension(raw: bool) -> &'static str {
    if raw { "dng" } else { "jpg" }
}

/// Allocate every output a capture will write.
///
/// On failure, entries created so far are deleted again.
pub fn allocate_outputs(
    store: &dyn OutputStore,
    settings: &OutputSettings,
    raw: bool,
    capture_log: bool,
    wall_time: DateTime<Local>,
) -> AppResult<StillOutputs> {
    let ext = still_extension(raw);
    let mut outputs = StillOutputs::default();

    let plan: [(bool, OutputKind, &str, &str); 4] = [
        (settings.save_wide, OutputKind::Image, "wide", ext),
        (settings.save_ultra, OutputKind::Image, "ultra", ext),
        // Composites need decodable frames
        (settings.save_composite && !raw, OutputKind::Image, "stereo", "jpg"),
        (capture_log, OutputKind::Json, "capture", "json"),
    ];

    for (i, (wanted, kind, suffix, ext)) in plan.into_iter().enumerate() {
        if !wanted {
            continue;
        }
        let name = timestamped_name(NAME_PREFIX, wall_time, suffix, ext);
        match store.create_pending(kind, &name) {
            Ok(entry) => {
                let slot = match i {
                    0 => &mut outputs.wide,
                    1 => &mut outputs.ultra,
                    2 => &mut outputs.composite,
                    _ => &mut outputs.log,
                };
                *slot = Some(entry);
            }
            Err(e) => {
                delete_outputs(store, &outputs);
                return Err(e);
            }
        }
    }
    Ok(outputs)
}

/// Delete every entry that is still pending
pub fn delete_outputs(store: &dyn OutputStore, outputs: &StillOutputs) {
    for entry in outputs.entries() {
        if let Err(e) = store.delete(entry) {
            warn!(name = %entry.name, error = %e, "Failed to delete capture output");
        }
    }
}

/// Per-capture JSON log
#[derive(Debug, Serialize)]
pub struct CaptureLog<'a> {
    pub capture_id: u64,
    pub wall_time: String,
    pub raw: bool,
    pub zoom: ZoomMode,
    pub wide_lens: &'a str,
    pub ultra_lens: &'a str,
    pub sync_delta_ns: i64,
    pub timings: CaptureTimings,
    pub result: Option<&'a CaptureResult>,
}

/// Where background writes report to
#[derive(Clone)]
pub struct StillSink {
    /// Device model recorded in DNG metadata
    pub camera_model: Arc<str>,
    pub store: Arc<dyn OutputStore>,
    pub composer: Arc<dyn StereoComposer>,
    pub events: Sender<EngineEvent>,
}

impl StillSink {
    fn report(&self, capture_id: u64, kind: StillOutputKind, outcome: AppResult<PathBuf>) {
        let event = match outcome {
            Ok(path) => {
                info!(capture_id, ?kind, path = %path.display(), "Saved capture output");
                EngineEvent::PhotoOutputSaved {
                    capture_id,
                    kind,
                    path,
                }
            }
            Err(e) => {
                error!(capture_id, ?kind, error = %e, "Failed to save capture output");
                EngineEvent::PhotoOutputFailed {
                    capture_id,
                    kind,
                    error: e,
                }
            }
        };
        // Receiver gone means nobody is listening anymore
        let _ = self.events.send(event);
    }
}

/// Dispatch all writes of a ready capture onto the executors
pub fn dispatch_ready_capture(
    ready: ReadyCapture,
    zoom: ZoomMode,
    overlap_fraction: f32,
    sink: &StillSink,
    executors: &Executors,
) {
    let ReadyCapture {
        id,
        wall_time,
        raw,
        wide,
        ultra,
        result,
        outputs,
        timings,
    } = ready;
    let sync_delta_ns = wide.timestamp_ns - ultra.timestamp_ns;
    debug!(capture_id = id, sync_delta_ns, "Dispatching capture writes");

    if let Some(log_entry) = outputs.log {
        let sink = sink.clone();
        let (wide_lens, ultra_lens) = (wide.lens_id.clone(), ultra.lens_id.clone());
        let result = result.clone();
        executors.spawn_io(move || {
            let log = CaptureLog {
                capture_id: id,
                wall_time: wall_time.to_rfc3339(),
                raw,
                zoom,
                wide_lens: &wide_lens,
                ultra_lens: &ultra_lens,
                sync_delta_ns,
                timings,
                result: result.as_ref(),
            };
            let outcome = write_and_publish(sink.store.as_ref(), &log_entry, |out| {
                serde_json::to_writer_pretty(&mut *out, &log).map_err(std::io::Error::other)
            });
            sink.report(id, StillOutputKind::Log, outcome);
        });
    }

    if let Some(entry) = outputs.composite {
        let sink = sink.clone();
        let (wide_data, ultra_data) = (Arc::clone(&wide.data), Arc::clone(&ultra.data));
        executors.spawn_composite(move || {
            let outcome = sink
                .composer
                .align_and_encode(&wide_data, &ultra_data, zoom, overlap_fraction)
                .map_err(|e| AppError::Photo(PhotoError::CompositeFailed(e)))
                .and_then(|jpeg| write_and_publish(sink.store.as_ref(), &entry, |out| out.write_all(&jpeg)));
            if outcome.is_err() {
                // A failed composite never leaves a pending entry behind
                let _ = sink.store.delete(&entry);
            }
            sink.report(id, StillOutputKind::Composite, outcome);
        });
    }

    for (image, entry, kind) in [
        (wide, outputs.wide, StillOutputKind::Wide),
        (ultra, outputs.ultra, StillOutputKind::Ultra),
    ] {
        let Some(entry) = entry else {
            continue;
        };
        let sink = sink.clone();
        let physical = result
            .as_ref()
            .and_then(|r| r.physical.get(&image.lens_id))
            .cloned();
        executors.spawn_io(move || {
            let outcome = if raw {
                let context = DngContext {
                    model: &sink.camera_model,
                    lens_id: &image.lens_id,
                    physical: physical.as_ref(),
                };
                encode_dng(&image, &context)
                    .map_err(|e| AppError::Photo(PhotoError::EncodingFailed(e)))
                    .and_then(|dng| write_and_publish(sink.store.as_ref(), &entry, |out| out.write_all(&dng)))
            } else {
                write_and_publish(sink.store.as_ref(), &entry, |out| out.write_all(&image.data))
            };
            if outcome.is_err() {
                let _ = sink.store.delete(&entry);
            }
            // Returns the buffer to the hardware
            drop(image);
            sink.report(id, kind, outcome);
        });
    }
}
