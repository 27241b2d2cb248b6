// Playback error types and constants

use crate::error::{AudioError, ErrorCode};
use log::{error, warn};
use std::fmt;

/// Playback error code constants shared with the host page
///
/// Error code range: 2001-2009. Wrapped audio errors keep their 1xxx code.
pub struct PlaybackErrorCodes {}

impl PlaybackErrorCodes {
    /// BPM value is invalid (must be finite and > 0)
    pub const BPM_INVALID: i32 = 2001;

    /// Sequence data failed validation
    pub const INVALID_SEQUENCE: i32 = 2002;

    /// Instrument samples could not be loaded
    pub const INSTRUMENT_LOAD: i32 = 2003;

    /// A single note failed to play
    pub const NOTE_PLAYBACK: i32 = 2004;

    /// A playback session is already active
    pub const ALREADY_RUNNING: i32 = 2005;

    /// No playback session is active
    pub const NOT_RUNNING: i32 = 2006;

    /// Session was stopped before it completed
    pub const CANCELLED: i32 = 2007;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 2008;

    /// Restricted platform, but the player was built without a gesture source
    pub const NO_GESTURE_SOURCE: i32 = 2009;
}

/// Log a playback error with structured context
///
/// Recoverable errors (a single failed note) are logged at warn level,
/// everything else at error level.
pub fn log_playback_error(err: &PlaybackError, context: &str) {
    if err.is_fatal() {
        error!(
            "Playback error in {}: code={}, component=Player, message={}",
            context,
            err.code(),
            err.message()
        );
    } else {
        warn!(
            "Playback error in {}: code={}, component=Player, message={}",
            context,
            err.code(),
            err.message()
        );
    }
}

/// Playback-related errors
///
/// Covers sequence validation, instrument loading, per-note failures and
/// session lifecycle. Audio device failures are carried in `Audio`.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// BPM value is invalid (must be finite and > 0)
    BpmInvalid { bpm: f64 },

    /// Sequence data failed validation
    InvalidSequence { reason: String },

    /// Instrument samples could not be loaded
    InstrumentLoad { instrument: String, reason: String },

    /// A single scheduled or immediate note failed to play
    NotePlayback {
        note: String,
        instrument: String,
        reason: String,
    },

    /// A playback session is already active
    AlreadyRunning,

    /// No playback session is active
    NotRunning,

    /// Session was stopped before it completed
    Cancelled,

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Audio needs a user gesture but nothing delivers gestures to the player
    NoGestureSource,

    /// Audio device error
    Audio(AudioError),
}

impl PlaybackError {
    /// Whether this error aborts the active session.
    ///
    /// A failed note is skipped and a refused gesture unlock is retried on the
    /// next gesture; everything else ends the session.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PlaybackError::NotePlayback { .. } | PlaybackError::Audio(AudioError::GestureRequired)
        )
    }
}

impl ErrorCode for PlaybackError {
    fn code(&self) -> i32 {
        match self {
            PlaybackError::BpmInvalid { .. } => PlaybackErrorCodes::BPM_INVALID,
            PlaybackError::InvalidSequence { .. } => PlaybackErrorCodes::INVALID_SEQUENCE,
            PlaybackError::InstrumentLoad { .. } => PlaybackErrorCodes::INSTRUMENT_LOAD,
            PlaybackError::NotePlayback { .. } => PlaybackErrorCodes::NOTE_PLAYBACK,
            PlaybackError::AlreadyRunning => PlaybackErrorCodes::ALREADY_RUNNING,
            PlaybackError::NotRunning => PlaybackErrorCodes::NOT_RUNNING,
            PlaybackError::Cancelled => PlaybackErrorCodes::CANCELLED,
            PlaybackError::LockPoisoned { .. } => PlaybackErrorCodes::LOCK_POISONED,
            PlaybackError::NoGestureSource => PlaybackErrorCodes::NO_GESTURE_SOURCE,
            PlaybackError::Audio(inner) => inner.code(),
        }
    }

    fn message(&self) -> String {
        match self {
            PlaybackError::BpmInvalid { bpm } => {
                format!("BPM must be greater than 0 (got {})", bpm)
            }
            PlaybackError::InvalidSequence { reason } => {
                format!("Invalid sequence: {}", reason)
            }
            PlaybackError::InstrumentLoad { instrument, reason } => {
                format!("Failed to load {} sounds: {}", instrument, reason)
            }
            PlaybackError::NotePlayback {
                note,
                instrument,
                reason,
            } => {
                format!("Failed to play {} on {}: {}", note, instrument, reason)
            }
            PlaybackError::AlreadyRunning => {
                "Playback already running. Call stop() first.".to_string()
            }
            PlaybackError::NotRunning => "No playback session is running.".to_string(),
            PlaybackError::Cancelled => "Playback was stopped.".to_string(),
            PlaybackError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            PlaybackError::NoGestureSource => {
                "Audio needs a tap to start, but no gesture source is connected.".to_string()
            }
            PlaybackError::Audio(inner) => inner.message(),
        }
    }
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PlaybackError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for PlaybackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlaybackError::Audio(inner) => Some(inner),
            _ => None,
        }
    }
}

impl From<AudioError> for PlaybackError {
    fn from(err: AudioError) -> Self {
        PlaybackError::Audio(err)
    }
}
