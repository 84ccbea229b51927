// SPDX-License-Identifier: GPL-3.0-only

//! Background executors
//!
//! Slow work never runs on the engine thread. Each kind of work gets its own
//! runtime sized for it:
//!
//! - `io`: small fixed pool for per-lens still writes
//! - `composite`: one thread, stereo composites are serialized
//! - `teardown`: one thread, encoder and muxer shutdown in strict order

use crate::constants::executors::PHOTO_IO_THREADS;
use crate::errors::{AppError, AppResult};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

fn blocking_runtime(name: &str, threads: usize) -> AppResult<Runtime> {
    Builder::new_multi_thread()
        .worker_threads(1)
        .max_blocking_threads(threads)
        .thread_name(name)
        .build()
        .map_err(|e| AppError::Other(format!("failed to build {} runtime: {}", name, e)))
}

pub struct Executors {
    io: Runtime,
    composite: Runtime,
    teardown: Runtime,
}

impl Executors {
    pub fn new() -> AppResult<Self> {
        let executors = Self {
            io: blocking_runtime("stereo-io", PHOTO_IO_THREADS)?,
            composite: blocking_runtime("stereo-composite", 1)?,
            teardown: blocking_runtime("stereo-teardown", 1)?,
        };
        debug!(io_threads = PHOTO_IO_THREADS, "Executors ready");
        Ok(executors)
    }

    pub fn spawn_io(&self, task: impl FnOnce() + Send + 'static) {
        self.io.spawn_blocking(task);
    }

    pub fn spawn_composite(&self, task: impl FnOnce() + Send + 'static) {
        self.composite.spawn_blocking(task);
    }

    pub fn spawn_teardown(&self, task: impl FnOnce() + Send + 'static) {
        self.teardown.spawn_blocking(task);
    }

    /// Let queued work drain for up to `timeout` per executor
    pub fn shutdown(self, timeout: Duration) {
        info!(?timeout, "Draining executors");
        self.teardown.shutdown_timeout(timeout);
        self.composite.shutdown_timeout(timeout);
        self.io.shutdown_timeout(timeout);
    }
}
