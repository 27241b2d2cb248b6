//! Playback telemetry collector and helpers.
//!
//! The collector multiplexes dispatch latency, note failures, volume changes
//! and session lifecycle events into a bounded history plus an async
//! broadcast stream.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;

use crate::audio::InstrumentKind;

pub mod events;

pub use events::{MetricEvent, SessionPhase};

/// Snapshot of collector state for CLI reporting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetrySnapshot {
    pub recent: Vec<MetricEvent>,
    pub total_events: u64,
    pub dropped_events: u64,
}

/// Bounded ring of recent events plus running counters.
struct History {
    events: VecDeque<MetricEvent>,
    capacity: usize,
    total: u64,
    evicted: u64,
}

impl History {
    fn push(&mut self, event: MetricEvent) {
        self.total += 1;
        if self.capacity == 0 {
            self.evicted += 1;
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.evicted += 1;
        }
        self.events.push_back(event);
    }
}

/// Fans metric events out to live subscribers and keeps the last few for
/// snapshots. Publishing never blocks and never fails; with no subscribers
/// the event only lands in the history.
pub struct TelemetryCollector {
    tx: broadcast::Sender<MetricEvent>,
    history: Mutex<History>,
}

impl TelemetryCollector {
    pub fn new(buffer: usize, history_capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(buffer.max(1)).0,
            history: Mutex::new(History {
                events: VecDeque::with_capacity(history_capacity),
                capacity: history_capacity,
                total: 0,
                evicted: 0,
            }),
        }
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn publish(&self, event: MetricEvent) {
        self.history().push(event.clone());
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let history = self.history();
        TelemetrySnapshot {
            recent: history.events.iter().cloned().collect(),
            total_events: history.total,
            dropped_events: history.evicted,
        }
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new(256, 64)
    }
}

/// Latency tracker maintains a rolling window to compute avg/max latency.
struct LatencyTracker {
    samples: VecDeque<f32>,
    max_samples: usize,
}

impl LatencyTracker {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    fn observe(&mut self, value: f32) -> (f32, f32, usize) {
        if self.samples.len() == self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value.abs());

        let count = self.samples.len();
        let sum: f32 = self.samples.iter().copied().sum();
        let max = self
            .samples
            .iter()
            .copied()
            .fold(0.0_f32, |acc, next| acc.max(next));
        let avg = if count == 0 { 0.0 } else { sum / count as f32 };
        (avg, max, count)
    }
}

/// Top-level hub wrapping collector state plus derived gauges.
pub struct TelemetryHub {
    collector: TelemetryCollector,
    latency: Mutex<LatencyTracker>,
}

impl TelemetryHub {
    pub fn new(channel_capacity: usize, history_capacity: usize, latency_window: usize) -> Self {
        Self {
            collector: TelemetryCollector::new(channel_capacity, history_capacity),
            latency: Mutex::new(LatencyTracker::new(latency_window)),
        }
    }

    /// Live stream of every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MetricEvent> {
        self.collector.subscribe()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.collector.snapshot()
    }

    /// Record how late (in seconds) a deferred note reached its instrument.
    pub fn record_dispatch_lateness(&self, lateness_seconds: f64) {
        let (avg, max, count) = {
            let mut tracker = self.latency.lock().unwrap_or_else(PoisonError::into_inner);
            tracker.observe((lateness_seconds * 1000.0) as f32)
        };

        self.collector.publish(MetricEvent::DispatchLatency {
            avg_ms: avg,
            max_ms: max,
            sample_count: count,
        });
    }

    pub fn record_note_failure(&self, instrument: InstrumentKind, note: &str) {
        self.collector.publish(MetricEvent::NoteFailure {
            instrument,
            note: note.to_string(),
        });
    }

    pub fn record_session_phase(&self, session_id: u64, phase: SessionPhase) {
        self.collector.publish(MetricEvent::Session {
            session_id,
            phase,
            timestamp_ms: now_timestamp_ms(),
        });
    }

    pub fn record_volume(&self, value: f32) {
        self.collector.publish(MetricEvent::Volume { value });
    }

    pub fn record_error(&self, code: i32, context: impl Into<String>) {
        self.collector.publish(MetricEvent::Error {
            code,
            context: context.into(),
        });
    }
}

impl Default for TelemetryHub {
    fn default() -> Self {
        Self::new(256, 64, 32)
    }
}

fn now_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
