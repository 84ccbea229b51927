// SPDX-License-Identifier: GPL-3.0-only

//! Serialization thread
//!
//! One named thread receives commands, device events and teardown
//! completions over a single channel and applies them to [`EngineState`] in
//! arrival order. Delayed work (capture watchdogs, priming) lives in a timer
//! heap; the loop waits on the channel until the next timer is due.

use super::Command;
use super::state::EngineState;
use crate::backends::camera::types::CameraEvent;
use crate::errors::{AppError, AppResult};
use crate::pipelines::video::RecordingReport;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

const WORKER_THREAD_NAME: &str = "stereo-engine";

/// Why a recording teardown ran
#[derive(Debug, Clone)]
pub(crate) enum TeardownCause {
    /// Regular stop, outputs are kept
    Stopped,
    /// The recording broke down after start was accepted
    Failed(AppError),
    /// Start was refused synchronously and the caller already has the error
    Rejected,
}

pub(crate) enum Message {
    Command(Command),
    Camera(CameraEvent),
    TeardownFinished {
        report: RecordingReport,
        cause: TeardownCause,
    },
    Stop(SyncSender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Timer {
    /// Abort the capture with this id if it is still pending
    CaptureWatchdog(u64),
    PrimeUltra { generation: u64, attempt: u32 },
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    seq: u64,
    timer: Timer,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Delayed timers, earliest first, FIFO among equal deadlines
#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    heap: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
}

impl Scheduler {
    pub(crate) fn schedule(&mut self, delay: Duration, timer: Timer) {
        self.schedule_at(Instant::now() + delay, timer);
    }

    fn schedule_at(&mut self, due: Instant, timer: Timer) {
        self.seq += 1;
        trace!(?timer, "Timer scheduled");
        self.heap.push(Reverse(Scheduled {
            due,
            seq: self.seq,
            timer,
        }));
    }

    fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(s)| s.due)
    }

    fn pop_due(&mut self, now: Instant) -> Option<Timer> {
        match self.heap.peek() {
            Some(Reverse(s)) if s.due <= now => self.heap.pop().map(|Reverse(s)| s.timer),
            _ => None,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.heap.len()
    }
}

pub(crate) fn spawn(state: EngineState, rx: Receiver<Message>) -> AppResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || run(state, rx))
        .map_err(|e| AppError::Other(format!("failed to spawn engine worker: {}", e)))
}

fn run(mut state: EngineState, rx: Receiver<Message>) {
    debug!("Engine worker running");
    loop {
        while let Some(timer) = state.timers.pop_due(Instant::now()) {
            state.on_timer(timer);
        }

        let message = match state.timers.next_due() {
            Some(due) => {
                let wait = due.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(message) => message,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(message) => message,
                Err(_) => break,
            },
        };

        match message {
            Message::Command(command) => state.handle_command(command),
            Message::Camera(event) => state.handle_camera_event(event),
            Message::TeardownFinished { report, cause } => {
                state.on_teardown_finished(report, cause)
            }
            Message::Stop(ack) => {
                state.shutdown();
                let _ = ack.send(());
                break;
            }
        }
    }
    info!("Engine worker finished");
}
