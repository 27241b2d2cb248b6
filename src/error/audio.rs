// Audio device error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants shared with the host page
///
/// Error code range: 1001-1006
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Audio graph (clock + shared gain stage) could not be constructed
    pub const INIT_FAILED: i32 = 1001;

    /// Platform refuses audio until a qualifying user gesture
    pub const GESTURE_REQUIRED: i32 = 1002;

    /// Clock used before `AudioClock::acquire` succeeded
    pub const NOT_ACQUIRED: i32 = 1003;

    /// Output device missing or refused to open
    pub const DEVICE_UNAVAILABLE: i32 = 1004;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1005;

    /// Output stream failed after it was opened
    pub const STREAM_FAILURE: i32 = 1006;
}

/// Log an audio error with its code, tagged with the call site that hit it.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=AudioClock, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-device-related errors
///
/// These errors cover clock acquisition, suspend/resume and the
/// restricted-platform unlock handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Audio graph construction failed; nothing was cached
    InitFailed { reason: String },

    /// Restricted platform blocked audio before a user gesture
    GestureRequired,

    /// Clock operation attempted before acquisition
    NotAcquired,

    /// Output device missing or refused to open
    DeviceUnavailable { reason: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Output stream failed after it was opened
    StreamFailure { reason: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::InitFailed { .. } => AudioErrorCodes::INIT_FAILED,
            AudioError::GestureRequired => AudioErrorCodes::GESTURE_REQUIRED,
            AudioError::NotAcquired => AudioErrorCodes::NOT_ACQUIRED,
            AudioError::DeviceUnavailable { .. } => AudioErrorCodes::DEVICE_UNAVAILABLE,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::StreamFailure { .. } => AudioErrorCodes::STREAM_FAILURE,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::InitFailed { reason } => {
                format!("Failed to initialize audio: {}", reason)
            }
            AudioError::GestureRequired => {
                "Audio is blocked until you tap or click to start.".to_string()
            }
            AudioError::NotAcquired => {
                "Audio clock not acquired. Call acquire() first.".to_string()
            }
            AudioError::DeviceUnavailable { reason } => {
                format!("Audio device unavailable: {}", reason)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::DeviceUnavailable {
            reason: err.to_string(),
        }
    }
}
