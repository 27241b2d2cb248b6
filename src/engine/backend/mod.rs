//! Device abstractions behind the audio clock.
//!
//! A device owns the platform output graph: a mixer fed by one shared gain
//! stage, plus the hardware clock that advances only while the graph runs.

use std::sync::Arc;

use crate::error::AudioError;

/// Trait implemented by platform-specific audio devices.
///
/// Devices are opened once by [`crate::audio::AudioClock`] and never torn
/// down while the owning player lives.
pub trait AudioDevice: Send + Sync {
    /// Build the output graph and start the clock.
    fn open(&self) -> Result<(), AudioError>;

    /// Seconds of audio rendered since `open`. Frozen while suspended.
    fn current_time(&self) -> f64;

    fn is_suspended(&self) -> bool;
    fn suspend(&self) -> Result<(), AudioError>;
    fn resume(&self) -> Result<(), AudioError>;

    /// Emit a zero-length silent buffer. Restricted platforms treat this,
    /// issued from inside a user gesture, as permission to produce sound.
    fn emit_silent_buffer(&self) -> Result<(), AudioError>;

    /// Set the shared gain stage to `value` at clock time `at_time`, with no ramp.
    fn set_gain_at_time(&self, value: f32, at_time: f64);

    /// Whether the platform blocks audio until a user gesture.
    fn requires_user_gesture(&self) -> bool {
        false
    }
}

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "android"))] {
        mod cpal_output;
        pub use cpal_output::CpalDevice;

        /// Hardware-backed device for the current platform.
        pub fn default_device() -> Arc<CpalDevice> {
            Arc::new(CpalDevice::new())
        }
    } else {
        /// Hardware-backed device for the current platform.
        pub fn default_device() -> Arc<StubAudioDevice> {
            Arc::new(StubAudioDevice::new())
        }
    }
}

mod desktop_stub;
pub use desktop_stub::{GainChange, StubAudioDevice};
