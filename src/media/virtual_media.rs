// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic encoders and muxers
//!
//! Encoders emit fixed-size samples at their configured rate on a small
//! ticker thread; muxers append a simple length-prefixed record per sample.
//! Every lifecycle call is appended to a shared [`MediaJournal`] so the
//! teardown order can be checked.

use super::{
    AudioEncoder, EncodedSample, MediaFactory, Muxer, SampleListener, Track, VideoEncoder,
    VideoEncoderConfig,
};
use crate::backends::camera::types::SurfaceId;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Audio frames are 20 ms
const AUDIO_FRAME: Duration = Duration::from_millis(20);
const AUDIO_FRAME_BYTES: usize = 320;
/// Synthetic video samples are capped so test files stay small
const MAX_VIDEO_SAMPLE_BYTES: usize = 2048;
/// Every n-th video sample is a key frame
const KEY_FRAME_INTERVAL: u64 = 30;

/// Ordered record of media lifecycle calls
#[derive(Debug, Clone, Default)]
pub struct MediaJournal(Arc<Mutex<Vec<String>>>);

impl MediaJournal {
    pub fn record(&self, entry: impl Into<String>) {
        if let Ok(mut entries) = self.0.lock() {
            entries.push(entry.into());
        }
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Index of the first entry equal to `entry`
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Failure injection for the synthetic media stack
#[derive(Debug, Clone, Copy, Default)]
pub struct MediaFaults {
    pub fail_audio_start: bool,
    pub fail_video_start: bool,
    pub fail_muxer_stop: bool,
}

/// Thread calling `tick` at a fixed interval until stopped
struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    fn spawn(
        name: String,
        interval: Duration,
        mut tick: impl FnMut(u64) + Send + 'static,
    ) -> Result<Self, String> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let mut n = 0;
                while !stop_flag.load(Ordering::SeqCst) {
                    tick(n);
                    n += 1;
                    thread::sleep(interval);
                }
            })
            .map_err(|e| format!("failed to spawn ticker: {}", e))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("Ticker thread panicked");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct VirtualMuxer {
    label: String,
    output: Mutex<Option<Box<dyn Write + Send>>>,
    journal: MediaJournal,
    started: AtomicBool,
    fail_stop: bool,
}

impl Muxer for VirtualMuxer {
    fn label(&self) -> &str {
        &self.label
    }

    fn start(&self) -> Result<(), String> {
        self.started.store(true, Ordering::SeqCst);
        self.journal.record(format!("muxer:{}.start", self.label));
        Ok(())
    }

    fn write_sample(&self, track: Track, sample: &EncodedSample, data: &[u8]) -> Result<(), String> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(format!("muxer {} not started", self.label));
        }
        let mut guard = self.output.lock().map_err(|_| "muxer poisoned".to_string())?;
        let out = guard
            .as_mut()
            .ok_or_else(|| format!("muxer {} already released", self.label))?;

        let track_byte = match track {
            Track::Video => b'V',
            Track::Audio => b'A',
        };
        out.write_all(&[track_byte])
            .and_then(|_| out.write_all(&sample.muxer_pts_us.to_le_bytes()))
            .and_then(|_| out.write_all(&(data.len() as u32).to_le_bytes()))
            .and_then(|_| out.write_all(data))
            .map_err(|e| format!("muxer {} write failed: {}", self.label, e))
    }

    fn stop_and_release(&self) -> Result<(), String> {
        self.journal.record(format!("muxer:{}.release", self.label));
        let output = self
            .output
            .lock()
            .map_err(|_| "muxer poisoned".to_string())?
            .take();
        if self.fail_stop {
            return Err(format!("muxer {} failed to finalize container", self.label));
        }
        if let Some(mut out) = output {
            out.flush()
                .map_err(|e| format!("muxer {} flush failed: {}", self.label, e))?;
        }
        Ok(())
    }
}

pub struct VirtualVideoEncoder {
    label: String,
    surface: SurfaceId,
    config: VideoEncoderConfig,
    muxer: Arc<dyn Muxer>,
    listener: Option<SampleListener>,
    ticker: Option<Ticker>,
    frames: Arc<AtomicU64>,
    journal: MediaJournal,
    fail_start: bool,
}

impl VirtualVideoEncoder {
    fn sample_bytes(&self) -> usize {
        let per_frame = self.config.bitrate_kbps as usize * 1000 / 8 / self.config.fps.max(1) as usize;
        per_frame.min(MAX_VIDEO_SAMPLE_BYTES)
    }
}

impl VideoEncoder for VirtualVideoEncoder {
    fn label(&self) -> &str {
        &self.label
    }

    fn input_surface(&self) -> SurfaceId {
        self.surface
    }

    fn set_sample_listener(&mut self, listener: SampleListener) {
        self.listener = Some(listener);
    }

    fn start(&mut self) -> Result<(), String> {
        self.journal.record(format!("video:{}.start", self.label));
        if self.fail_start {
            return Err(format!("video encoder {} failed to start", self.label));
        }

        let interval = Duration::from_micros(1_000_000 / self.config.fps.max(1) as u64);
        let frame_us = interval.as_micros() as i64;
        let payload = vec![0u8; self.sample_bytes()];
        let muxer = Arc::clone(&self.muxer);
        let listener = self.listener.clone();
        let frames = Arc::clone(&self.frames);
        let label = self.label.clone();

        self.ticker = Some(Ticker::spawn(
            format!("venc-{}", self.label),
            interval,
            move |n| {
                let pts = n as i64 * frame_us;
                let flags = if n % KEY_FRAME_INTERVAL == 0 {
                    EncodedSample::FLAG_KEY_FRAME
                } else {
                    0
                };
                let mut sample = EncodedSample {
                    codec_pts_us: pts,
                    muxer_pts_us: pts,
                    size_bytes: payload.len(),
                    flags,
                    write_duration_ns: 0,
                };
                let started = Instant::now();
                if let Err(e) = muxer.write_sample(Track::Video, &sample, &payload) {
                    warn!(encoder = %label, error = %e, "Dropping video sample");
                    return;
                }
                sample.write_duration_ns = started.elapsed().as_nanos() as u64;
                frames.fetch_add(1, Ordering::Relaxed);
                if let Some(listener) = &listener {
                    listener(sample);
                }
            },
        )?);
        debug!(encoder = %self.label, size = %self.config.size, fps = self.config.fps, "Video encoder started");
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> Result<(), String> {
        self.journal.record(format!("video:{}.eos", self.label));
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
        let frames = self.frames.load(Ordering::Relaxed);
        let frame_us = 1_000_000 / self.config.fps.max(1) as i64;
        let eos = EncodedSample {
            codec_pts_us: frames as i64 * frame_us,
            muxer_pts_us: frames as i64 * frame_us,
            size_bytes: 0,
            flags: EncodedSample::FLAG_END_OF_STREAM,
            write_duration_ns: 0,
        };
        if let Some(listener) = &self.listener {
            listener(eos);
        }
        Ok(())
    }

    fn stop_and_release(&mut self) -> Result<(), String> {
        self.journal.record(format!("video:{}.release", self.label));
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
        debug!(
            encoder = %self.label,
            frames = self.frames.load(Ordering::Relaxed),
            "Video encoder released"
        );
        Ok(())
    }
}

pub struct VirtualAudioEncoder {
    muxers: Vec<Arc<dyn Muxer>>,
    listener: Option<SampleListener>,
    ticker: Option<Ticker>,
    journal: MediaJournal,
    fail_start: bool,
}

impl AudioEncoder for VirtualAudioEncoder {
    fn set_sample_listener(&mut self, listener: SampleListener) {
        self.listener = Some(listener);
    }

    fn start(&mut self) -> Result<(), String> {
        self.journal.record("audio.start");
        if self.fail_start {
            return Err("audio encoder failed to start".to_string());
        }

        let muxers = self.muxers.clone();
        let listener = self.listener.clone();
        let frame_us = AUDIO_FRAME.as_micros() as i64;
        let payload = vec![0u8; AUDIO_FRAME_BYTES];

        self.ticker = Some(Ticker::spawn("aenc".to_string(), AUDIO_FRAME, move |n| {
            let pts = n as i64 * frame_us;
            let mut sample = EncodedSample {
                codec_pts_us: pts,
                muxer_pts_us: pts,
                size_bytes: payload.len(),
                flags: EncodedSample::FLAG_KEY_FRAME,
                write_duration_ns: 0,
            };
            let started = Instant::now();
            for muxer in &muxers {
                if let Err(e) = muxer.write_sample(Track::Audio, &sample, &payload) {
                    warn!(muxer = %muxer.label(), error = %e, "Dropping audio sample");
                }
            }
            sample.write_duration_ns = started.elapsed().as_nanos() as u64;
            if let Some(listener) = &listener {
                listener(sample);
            }
        })?);
        Ok(())
    }

    fn stop_and_release(&mut self) -> Result<(), String> {
        self.journal.record("audio.release");
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
        Ok(())
    }
}

/// Factory for the synthetic media stack
#[derive(Clone, Default)]
pub struct VirtualMediaFactory {
    journal: MediaJournal,
    faults: Arc<Mutex<MediaFaults>>,
    next_surface: Arc<AtomicU64>,
}

impl VirtualMediaFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn journal(&self) -> MediaJournal {
        self.journal.clone()
    }

    pub fn set_faults(&self, faults: MediaFaults) {
        if let Ok(mut f) = self.faults.lock() {
            *f = faults;
        }
    }

    fn faults(&self) -> MediaFaults {
        self.faults.lock().map(|f| *f).unwrap_or_default()
    }
}

impl MediaFactory for VirtualMediaFactory {
    fn create_muxer(
        &self,
        label: &str,
        output: Box<dyn Write + Send>,
    ) -> Result<Arc<dyn Muxer>, String> {
        self.journal.record(format!("muxer:{}.create", label));
        Ok(Arc::new(VirtualMuxer {
            label: label.to_string(),
            output: Mutex::new(Some(output)),
            journal: self.journal.clone(),
            started: AtomicBool::new(false),
            fail_stop: self.faults().fail_muxer_stop,
        }))
    }

    fn create_video_encoder(
        &self,
        label: &str,
        config: VideoEncoderConfig,
        muxer: Arc<dyn Muxer>,
    ) -> Result<Box<dyn VideoEncoder>, String> {
        self.journal.record(format!("video:{}.create", label));
        let surface = SurfaceId(self.next_surface.fetch_add(1, Ordering::Relaxed) + 1);
        Ok(Box::new(VirtualVideoEncoder {
            label: label.to_string(),
            surface,
            config,
            muxer,
            listener: None,
            ticker: None,
            frames: Arc::new(AtomicU64::new(0)),
            journal: self.journal.clone(),
            fail_start: self.faults().fail_video_start,
        }))
    }

    fn create_audio_encoder(&self, muxers: Vec<Arc<dyn Muxer>>) -> Result<Box<dyn AudioEncoder>, String> {
        self.journal.record("audio.create");
        Ok(Box::new(VirtualAudioEncoder {
            muxers,
            listener: None,
            ticker: None,
            journal: self.journal.clone(),
            fail_start: self.faults().fail_audio_start,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::Size;

    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_encoder_writes_samples_and_eos() {
        let factory = VirtualMediaFactory::new();
        let buf = Arc::new(Mutex::new(Vec::new()));
        let muxer = factory
            .create_muxer("wide", Box::new(SharedBuf(Arc::clone(&buf))))
            .unwrap();
        let config = VideoEncoderConfig {
            size: Size::new(1280, 720),
            fps: 100,
            bitrate_kbps: 1000,
            rotation: 0,
        };
        let mut encoder = factory
            .create_video_encoder("wide", config, Arc::clone(&muxer))
            .unwrap();

        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&samples);
        encoder.set_sample_listener(Arc::new(move |s| sink.lock().unwrap().push(s)));

        muxer.start().unwrap();
        encoder.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        encoder.signal_end_of_input_stream().unwrap();
        encoder.stop_and_release().unwrap();
        muxer.stop_and_release().unwrap();

        let samples = samples.lock().unwrap();
        assert!(samples.len() >= 2, "expected some samples, got {}", samples.len());
        assert!(samples[0].is_key_frame());
        assert_eq!(samples.last().unwrap().flags, EncodedSample::FLAG_END_OF_STREAM);
        assert!(!buf.lock().unwrap().is_empty());
    }

    #[test]
    fn test_muxer_rejects_writes_after_release() {
        let factory = VirtualMediaFactory::new();
        let muxer = factory.create_muxer("ultra", Box::new(std::io::sink())).unwrap();
        muxer.start().unwrap();
        muxer.stop_and_release().unwrap();
        let sample = EncodedSample {
            codec_pts_us: 0,
            muxer_pts_us: 0,
            size_bytes: 1,
            flags: 0,
            write_duration_ns: 0,
        };
        assert!(muxer.write_sample(Track::Video, &sample, &[0]).is_err());
    }

    #[test]
    fn test_faults_are_applied() {
        let factory = VirtualMediaFactory::new();
        factory.set_faults(MediaFaults {
            fail_muxer_stop: true,
            ..Default::default()
        });
        let muxer = factory.create_muxer("wide", Box::new(std::io::sink())).unwrap();
        assert!(muxer.stop_and_release().is_err());
        assert_eq!(
            factory.journal().entries(),
            vec!["muxer:wide.create".to_string(), "muxer:wide.release".to_string()]
        );
    }
}
