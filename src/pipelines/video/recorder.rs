// SPDX-License-Identifier: GPL-3.0-only

//! Dual-lens recording session
//!
//! One encoder and muxer per lens plus a single audio encoder feeding both
//! muxers. Creation happens on the engine thread; [`RecordingSession::teardown`]
//! is blocking and runs on the teardown executor after the camera session has
//! been closed.

use super::logger::SampleLogger;
use crate::backends::camera::types::{Size, SurfaceId};
use crate::errors::{AppError, AppResult, RecordingError};
use crate::media::{AudioEncoder, MediaFactory, Muxer, VideoEncoder, VideoEncoderConfig};
use crate::storage::{OutputEntry, OutputKind, OutputStore, timestamped_name, write_and_publish};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const NAME_PREFIX: &str = "VID";

/// What happened to one recorded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RecordingOutcome {
    Finalized(PathBuf),
    Deleted,
}

impl RecordingOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, RecordingOutcome::Finalized(_))
    }
}

/// Result of a full teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingReport {
    pub session_id: String,
    pub wide: RecordingOutcome,
    pub ultra: RecordingOutcome,
    pub log: Option<PathBuf>,
    /// Errors hit along the way; teardown always runs to the end
    pub errors: Vec<String>,
}

/// Parameters of a recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingPlan {
    pub wide_lens: String,
    pub ultra_lens: String,
    pub size: Size,
    pub fps: u32,
    pub bitrate_kbps: u32,
    pub rotation: u32,
    pub sample_log: bool,
}

struct LensTrack {
    label: &'static str,
    lens_id: String,
    entry: OutputEntry,
    muxer: Arc<dyn Muxer>,
    encoder: Box<dyn VideoEncoder>,
    healthy: bool,
}

impl LensTrack {
    fn note(&mut self, step: &str, result: Result<(), String>, errors: &mut Vec<String>) {
        if let Err(e) = result {
            warn!(track = self.label, step, error = %e, "Recording teardown step failed");
            errors.push(format!("{} {}: {}", self.label, step, e));
            self.healthy = false;
        }
    }
}

#[derive(Serialize)]
struct RecordingLog<'a> {
    session_id: &'a str,
    started: String,
    duration_ms: i64,
    wide_lens: &'a str,
    ultra_lens: &'a str,
    size: Size,
    fps: u32,
    bitrate_kbps: u32,
    wide: &'a RecordingOutcome,
    ultra: &'a RecordingOutcome,
    errors: &'a [String],
    sample_counts: std::collections::BTreeMap<String, usize>,
    samples: Vec<super::logger::SampleRecord>,
}

pub struct RecordingSession {
    id: String,
    plan: RecordingPlan,
    started: DateTime<Local>,
    wide: LensTrack,
    ultra: LensTrack,
    audio: Box<dyn AudioEncoder>,
    log_entry: Option<OutputEntry>,
    logger: Option<SampleLogger>,
    encoders_started: bool,
}

impl RecordingSession {
    /// Allocate outputs and build the encoder graph. Nothing is started yet.
    pub fn prepare(
        plan: RecordingPlan,
        store: &dyn OutputStore,
        media: &dyn MediaFactory,
    ) -> AppResult<Self> {
        let started = Local::now();
        let mut created: Vec<OutputEntry> = Vec::new();

        let built = Self::build(&plan, started, store, media, &mut created);
        match built {
            Ok(session) => Ok(session),
            Err(e) => {
                for entry in &created {
                    let _ = store.delete(entry);
                }
                error!(error = %e, "Failed to prepare recording");
                Err(AppError::Recording(RecordingError::StartFailed(e)))
            }
        }
    }

    fn build(
        plan: &RecordingPlan,
        started: DateTime<Local>,
        store: &dyn OutputStore,
        media: &dyn MediaFactory,
        created: &mut Vec<OutputEntry>,
    ) -> Result<Self, String> {
        let mut create = |kind: OutputKind, suffix: &str, ext: &str| -> Result<OutputEntry, String> {
            let name = timestamped_name(NAME_PREFIX, started, suffix, ext);
            let entry = store.create_pending(kind, &name).map_err(|e| e.to_string())?;
            created.push(entry.clone());
            Ok(entry)
        };

        let wide_entry = create(OutputKind::Video, "wide", "mp4")?;
        let ultra_entry = create(OutputKind::Video, "ultra", "mp4")?;
        let log_entry = if plan.sample_log {
            Some(create(OutputKind::Json, "recording", "json")?)
        } else {
            None
        };

        let config = VideoEncoderConfig {
            size: plan.size,
            fps: plan.fps,
            bitrate_kbps: plan.bitrate_kbps,
            rotation: plan.rotation,
        };

        let mut tracks = Vec::with_capacity(2);
        for (label, lens_id, entry) in [
            ("wide", &plan.wide_lens, wide_entry),
            ("ultra", &plan.ultra_lens, ultra_entry),
        ] {
            let writer = store.writer(&entry).map_err(|e| e.to_string())?;
            let muxer = media.create_muxer(label, writer)?;
            let encoder = media.create_video_encoder(label, config, Arc::clone(&muxer))?;
            tracks.push(LensTrack {
                label,
                lens_id: lens_id.clone(),
                entry,
                muxer,
                encoder,
                healthy: true,
            });
        }

        let muxers = tracks.iter().map(|t| Arc::clone(&t.muxer)).collect();
        let mut audio = media.create_audio_encoder(muxers)?;

        let logger = plan.sample_log.then(SampleLogger::new);
        if let Some(logger) = &logger {
            audio.set_sample_listener(logger.tap("audio"));
            for track in &mut tracks {
                track.encoder.set_sample_listener(logger.tap(track.label));
            }
        }

        let ultra = tracks.pop().ok_or("missing ultra track")?;
        let wide = tracks.pop().ok_or("missing wide track")?;

        let id = uuid::Uuid::new_v4().to_string();
        info!(
            session_id = %id,
            size = %plan.size,
            fps = plan.fps,
            bitrate_kbps = plan.bitrate_kbps,
            wide = %wide.entry.name,
            ultra = %ultra.entry.name,
            "Prepared recording"
        );

        Ok(Self {
            id,
            plan: plan.clone(),
            started,
            wide,
            ultra,
            audio,
            log_entry,
            logger,
            encoders_started: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Encoder input surfaces as (wide, ultra)
    pub fn surfaces(&self) -> (SurfaceId, SurfaceId) {
        (self.wide.encoder.input_surface(), self.ultra.encoder.input_surface())
    }

    /// Start muxers, then audio, then both video encoders
    pub fn start_encoders(&mut self) -> AppResult<()> {
        let start_failed = |e: String| AppError::Recording(RecordingError::StartFailed(e));

        self.wide.muxer.start().map_err(start_failed)?;
        self.ultra.muxer.start().map_err(start_failed)?;
        self.audio.start().map_err(start_failed)?;
        self.encoders_started = true;
        self.wide.encoder.start().map_err(start_failed)?;
        self.ultra.encoder.start().map_err(start_failed)?;

        info!(session_id = %self.id, "Recording encoders started");
        Ok(())
    }

    /// Stop everything and publish (`keep`) or delete the outputs.
    ///
    /// Order: EOS to both video encoders, audio, video encoders, muxers,
    /// files, log. Every step runs even when an earlier one failed; a file
    /// whose track failed is deleted instead of published. A recording whose
    /// encoders never started has nothing playable and is always deleted.
    pub fn teardown(mut self, keep: bool, store: &dyn OutputStore) -> RecordingReport {
        let mut errors = Vec::new();
        if keep && !self.encoders_started {
            info!(session_id = %self.id, "Recording stopped before it started, discarding outputs");
        }
        let keep = keep && self.encoders_started;
        debug!(session_id = %self.id, keep, "Tearing down recording");

        if self.encoders_started {
            for track in [&mut self.wide, &mut self.ultra] {
                let r = track.encoder.signal_end_of_input_stream();
                track.note("eos", r, &mut errors);
            }
        }
        if let Err(e) = self.audio.stop_and_release() {
            warn!(error = %e, "Audio encoder release failed");
            errors.push(format!("audio release: {}", e));
        }
        for track in [&mut self.wide, &mut self.ultra] {
            let r = track.encoder.stop_and_release();
            track.note("encoder release", r, &mut errors);
        }
        for track in [&mut self.wide, &mut self.ultra] {
            let r = track.muxer.stop_and_release();
            track.note("muxer release", r, &mut errors);
        }

        let wide = Self::publish(&self.wide, keep, store, &mut errors);
        let ultra = Self::publish(&self.ultra, keep, store, &mut errors);

        let log = self
            .log_entry
            .take()
            .and_then(|entry| self.write_log(&entry, &wide, &ultra, &errors, keep, store));

        info!(
            session_id = %self.id,
            wide = ?wide,
            ultra = ?ultra,
            errors = errors.len(),
            "Recording torn down"
        );
        RecordingReport {
            session_id: self.id.clone(),
            wide,
            ultra,
            log,
            errors,
        }
    }

    fn publish(
        track: &LensTrack,
        keep: bool,
        store: &dyn OutputStore,
        errors: &mut Vec<String>,
    ) -> RecordingOutcome {
        if keep && track.healthy {
            match store.finalize(&track.entry) {
                Ok(path) => return RecordingOutcome::Finalized(path),
                Err(e) => {
                    warn!(lens = %track.lens_id, error = %e, "Failed to publish recording");
                    errors.push(format!("{} publish: {}", track.label, e));
                }
            }
        }
        if let Err(e) = store.delete(&track.entry) {
            warn!(lens = %track.lens_id, error = %e, "Failed to delete recording");
        }
        RecordingOutcome::Deleted
    }

    fn write_log(
        &self,
        entry: &OutputEntry,
        wide: &RecordingOutcome,
        ultra: &RecordingOutcome,
        errors: &[String],
        keep: bool,
        store: &dyn OutputStore,
    ) -> Option<PathBuf> {
        if !keep {
            let _ = store.delete(entry);
            return None;
        }
        let (samples, sample_counts) = match &self.logger {
            Some(logger) => (logger.records(), logger.counts()),
            None => Default::default(),
        };
        let log = RecordingLog {
            session_id: &self.id,
            started: self.started.to_rfc3339(),
            duration_ms: (Local::now() - self.started).num_milliseconds(),
            wide_lens: &self.plan.wide_lens,
            ultra_lens: &self.plan.ultra_lens,
            size: self.plan.size,
            fps: self.plan.fps,
            bitrate_kbps: self.plan.bitrate_kbps,
            wide,
            ultra,
            errors,
            sample_counts,
            samples,
        };
        let written = write_and_publish(store, entry, |out| {
            serde_json::to_writer_pretty(&mut *out, &log).map_err(std::io::Error::other)
        });
        match written {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, "Failed to write recording log");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::virtual_media::{MediaFaults, VirtualMediaFactory};
    use crate::storage::{EntryState, FileOutputStore};
    use std::time::Duration;

    fn plan(sample_log: bool) -> RecordingPlan {
        RecordingPlan {
            wide_lens: "2".into(),
            ultra_lens: "3".into(),
            size: Size::new(1280, 720),
            fps: 60,
            bitrate_kbps: 5000,
            rotation: 0,
            sample_log,
        }
    }

    #[test]
    fn test_start_order_and_teardown_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOutputStore::new(dir.path());
        let media = VirtualMediaFactory::new();

        let mut session = RecordingSession::prepare(plan(true), &store, &media).unwrap();
        session.start_encoders().unwrap();
        std::thread::sleep(Duration::from_millis(60));
        let report = session.teardown(true, &store);

        assert!(report.wide.is_finalized());
        assert!(report.ultra.is_finalized());
        assert!(report.log.is_some());
        assert!(report.errors.is_empty());

        let journal = media.journal();
        let pos = |e: &str| journal.position(e).unwrap_or_else(|| panic!("missing {}", e));
        assert!(pos("audio.start") < pos("video:wide.start"));
        assert!(pos("audio.start") < pos("video:ultra.start"));
        assert!(pos("video:wide.eos") < pos("audio.release"));
        assert!(pos("video:ultra.eos") < pos("audio.release"));
        assert!(pos("audio.release") < pos("video:wide.release"));
        assert!(pos("video:ultra.release") < pos("muxer:wide.release"));
    }

    #[test]
    fn test_discard_deletes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOutputStore::new(dir.path());
        let media = VirtualMediaFactory::new();

        let session = RecordingSession::prepare(plan(true), &store, &media).unwrap();
        let report = session.teardown(false, &store);
        assert_eq!(report.wide, RecordingOutcome::Deleted);
        assert_eq!(report.ultra, RecordingOutcome::Deleted);
        assert!(report.log.is_none());
        // Encoders never started, so no EOS was sent
        assert!(media.journal().position("video:wide.eos").is_none());
    }

    #[test]
    fn test_stop_before_start_publishes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOutputStore::new(dir.path());
        let media = VirtualMediaFactory::new();

        let session = RecordingSession::prepare(plan(false), &store, &media).unwrap();
        let report = session.teardown(true, &store);
        assert_eq!(report.wide, RecordingOutcome::Deleted);
        assert_eq!(report.ultra, RecordingOutcome::Deleted);
        assert!(report.log.is_none());
    }

    #[test]
    fn test_failed_muxer_deletes_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOutputStore::new(dir.path());
        let media = VirtualMediaFactory::new();
        media.set_faults(MediaFaults {
            fail_muxer_stop: true,
            ..Default::default()
        });

        let mut session = RecordingSession::prepare(plan(false), &store, &media).unwrap();
        session.start_encoders().unwrap();
        let report = session.teardown(true, &store);
        assert_eq!(report.wide, RecordingOutcome::Deleted);
        assert_eq!(report.ultra, RecordingOutcome::Deleted);
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_start_failure_keeps_entries_pending_for_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileOutputStore::new(dir.path());
        let media = VirtualMediaFactory::new();
        media.set_faults(MediaFaults {
            fail_video_start: true,
            ..Default::default()
        });

        let mut session = RecordingSession::prepare(plan(false), &store, &media).unwrap();
        assert!(session.start_encoders().is_err());
        let wide_entry = session.wide.entry.clone();
        assert_eq!(store.state(&wide_entry), Some(EntryState::Pending));
        let report = session.teardown(false, &store);
        assert_eq!(report.wide, RecordingOutcome::Deleted);
        assert_eq!(store.state(&wide_entry), Some(EntryState::Deleted));
    }
}
