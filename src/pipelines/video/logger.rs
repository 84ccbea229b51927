// SPDX-License-Identifier: GPL-3.0-only

//! Per-sample encoder log
//!
//! Taps are only attached when sample logging is enabled; without them the
//! encoders run exactly as they would otherwise.

use crate::media::{EncodedSample, SampleListener};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    pub stream: String,
    /// Arrival time relative to the start of the recording
    pub at_ms: f64,
    pub codec_pts_us: i64,
    pub muxer_pts_us: i64,
    pub size_bytes: usize,
    pub flags: u32,
    pub write_duration_ns: u64,
}

/// Collects sample records from every stream of a recording
#[derive(Clone)]
pub struct SampleLogger {
    started: Instant,
    records: Arc<Mutex<Vec<SampleRecord>>>,
}

impl SampleLogger {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Listener that tags records with `stream`
    pub fn tap(&self, stream: &str) -> SampleListener {
        let logger = self.clone();
        let stream = stream.to_string();
        Arc::new(move |sample: EncodedSample| logger.record(&stream, sample))
    }

    fn record(&self, stream: &str, sample: EncodedSample) {
        let record = SampleRecord {
            stream: stream.to_string(),
            at_ms: self.started.elapsed().as_secs_f64() * 1000.0,
            codec_pts_us: sample.codec_pts_us,
            muxer_pts_us: sample.muxer_pts_us,
            size_bytes: sample.size_bytes,
            flags: sample.flags,
            write_duration_ns: sample.write_duration_ns,
        };
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }

    pub fn records(&self) -> Vec<SampleRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of records per stream
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for record in self.records() {
            *counts.entry(record.stream).or_insert(0) += 1;
        }
        counts
    }
}

impl Default for SampleLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taps_tag_streams() {
        let logger = SampleLogger::new();
        let wide = logger.tap("wide");
        let audio = logger.tap("audio");
        let sample = EncodedSample {
            codec_pts_us: 33_333,
            muxer_pts_us: 33_333,
            size_bytes: 100,
            flags: 0,
            write_duration_ns: 5,
        };
        wide(sample);
        wide(sample);
        audio(sample);

        let counts = logger.counts();
        assert_eq!(counts.get("wide"), Some(&2));
        assert_eq!(counts.get("audio"), Some(&1));
        assert_eq!(logger.records()[0].muxer_pts_us, 33_333);
    }
}
