// Error types for the rhythm trainer playback core
//
// This module defines custom error types for audio device and playback operations,
// providing structured error handling with stable numeric codes for host pages.

mod audio;
mod playback;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use playback::{log_playback_error, PlaybackError, PlaybackErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the host boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
