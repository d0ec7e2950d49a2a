use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::task::{TaskId, TransferState, TransferTask};

/// Default progress emission interval.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// A rate-limited progress notification for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub state: TransferState,
    pub transferred_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Destination for progress events.
///
/// `emit` runs on the transfer worker between chunks and must return
/// without blocking; implementations hand events off, they don't deliver.
pub trait ProgressSink: Send + Sync + 'static {
    fn emit(&self, event: ProgressEvent);
}

/// [`ProgressSink`] backed by an mpsc channel.
///
/// Uses `try_send`: when the consumer falls behind, intermediate events
/// are dropped with a warning rather than stalling the transfer.
pub struct ChannelSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(task = %event.task_id, "progress channel full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!(task = %event.task_id, "progress channel closed");
            }
        }
    }
}

/// Per-task progress throttle.
///
/// Owned by the worker driving the task: [`tick`](Self::tick) emits at
/// most once per interval, [`finish`](Self::finish) always emits (the
/// terminal event is never throttled).
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            last_emit: None,
        }
    }

    fn event_for(task: &TransferTask) -> ProgressEvent {
        let snap = task.snapshot();
        ProgressEvent {
            task_id: snap.id,
            state: snap.state,
            transferred_bytes: snap.transferred_bytes,
            total_bytes: snap.total_bytes,
            timestamp: Utc::now(),
        }
    }

    /// Emits the task's current progress unless one was emitted within
    /// the configured interval.
    pub fn tick(&mut self, task: &TransferTask) {
        let due = match self.last_emit {
            None => true,
            Some(at) => at.elapsed() >= self.interval,
        };
        if !due {
            return;
        }
        self.last_emit = Some(Instant::now());
        self.sink.emit(Self::event_for(task));
    }

    /// Emits unconditionally; call on Completed/Failed/Cancelled.
    pub fn finish(&mut self, task: &TransferTask) {
        self.last_emit = Some(Instant::now());
        self.sink.emit(Self::event_for(task));
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed over a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window: Duration,
}

impl SpeedCalculator {
    /// Creates a calculator with a 5 s window and 100 retained samples
    /// unless overridden.
    pub fn new(window: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window: window.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap();
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        let cutoff = now - s.window;
        s.samples.retain(|sample| sample.timestamp >= cutoff);

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window (0.0 under 2 samples).
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        if s.samples.len() < 2 {
            return 0.0;
        }

        let first = &s.samples[0];
        let last = &s.samples[s.samples.len() - 1];
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        let total_bytes: u64 = s.samples.iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time to move `remaining_bytes`, `None` at zero speed.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}
