//! Core telemetry event types describing playback diagnostics exposed to
//! the CLI and host subscribers.

use serde::{Deserialize, Serialize};

use crate::audio::InstrumentKind;

/// Lifecycle stages of a playback session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    AwaitingGesture,
    AudioUnlocked,
    InstrumentsLoaded,
    CountdownStarted,
    Playing,
    Completed,
    Cancelled,
    Failed,
}

/// Rich metric events covering dispatch latency, failures and lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MetricEvent {
    /// How late deferred notes reached their instrument
    DispatchLatency {
        avg_ms: f32,
        max_ms: f32,
        sample_count: usize,
    },
    NoteFailure {
        instrument: InstrumentKind,
        note: String,
    },
    Session {
        session_id: u64,
        phase: SessionPhase,
        timestamp_ms: u64,
    },
    Volume {
        value: f32,
    },
    Error {
        code: i32,
        context: String,
    },
}
