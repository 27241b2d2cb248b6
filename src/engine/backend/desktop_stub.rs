use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::audio::sampler::{ScheduledVoice, VoiceOutput};
use crate::error::AudioError;

use super::AudioDevice;

/// Nominal rate reported to sample instruments; nothing is rendered.
const STUB_SAMPLE_RATE: u32 = 48_000;

/// A recorded write to the shared gain stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainChange {
    pub value: f32,
    pub at_time: f64,
}

#[derive(Debug)]
struct StubState {
    opened: bool,
    open_count: u32,
    /// Clock seconds accumulated before the current running span
    accumulated: f64,
    /// Start of the current running span, `None` while suspended
    running_since: Option<Instant>,
    unlocked: bool,
    refused_unlocks: u32,
    silent_buffers: u32,
    gain: f32,
    gain_changes: Vec<GainChange>,
    submitted: Vec<ScheduledVoice>,
}

/// Deterministic stub device used for tests and dry runs.
///
/// The clock is derived from tokio's time source, so under a paused test
/// runtime it advances exactly with `tokio::time::sleep`. A restricted stub
/// opens suspended and refuses to resume until a silent buffer is emitted,
/// mimicking mobile browsers that need a user gesture.
pub struct StubAudioDevice {
    state: Mutex<StubState>,
    restricted: bool,
    fail_open: Option<String>,
}

impl StubAudioDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StubState {
                opened: false,
                open_count: 0,
                accumulated: 0.0,
                running_since: None,
                unlocked: false,
                refused_unlocks: 0,
                silent_buffers: 0,
                gain: 1.0,
                gain_changes: Vec::new(),
                submitted: Vec::new(),
            }),
            restricted: false,
            fail_open: None,
        }
    }

    /// Stub that behaves like a platform requiring a user gesture.
    pub fn restricted() -> Self {
        Self {
            restricted: true,
            ..Self::new()
        }
    }

    /// Stub whose `open` always fails.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_open: Some(reason.into()),
            ..Self::new()
        }
    }

    /// Ignore the first `count` silent buffers, so unlock attempts fail.
    pub fn with_refused_unlocks(self, count: u32) -> Self {
        self.lock().refused_unlocks = count;
        self
    }

    pub fn open_count(&self) -> u32 {
        self.lock().open_count
    }

    pub fn silent_buffers(&self) -> u32 {
        self.lock().silent_buffers
    }

    pub fn gain(&self) -> f32 {
        self.lock().gain
    }

    pub fn gain_changes(&self) -> Vec<GainChange> {
        self.lock().gain_changes.clone()
    }

    /// Voices handed to the stub by the built-in sample instruments.
    pub fn submitted_voices(&self) -> Vec<ScheduledVoice> {
        self.lock().submitted.clone()
    }

    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StubAudioDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDevice for StubAudioDevice {
    fn open(&self) -> Result<(), AudioError> {
        if let Some(reason) = &self.fail_open {
            return Err(AudioError::InitFailed {
                reason: reason.clone(),
            });
        }

        let mut state = self.lock();
        state.open_count += 1;
        if !state.opened {
            state.opened = true;
            if !self.restricted {
                state.running_since = Some(Instant::now());
            }
        }
        Ok(())
    }

    fn current_time(&self) -> f64 {
        let state = self.lock();
        let running = state
            .running_since
            .map(|since| Instant::now().saturating_duration_since(since).as_secs_f64())
            .unwrap_or(0.0);
        state.accumulated + running
    }

    fn is_suspended(&self) -> bool {
        self.lock().running_since.is_none()
    }

    fn suspend(&self) -> Result<(), AudioError> {
        let mut state = self.lock();
        if !state.opened {
            return Err(AudioError::NotAcquired);
        }
        if let Some(since) = state.running_since.take() {
            state.accumulated += Instant::now().saturating_duration_since(since).as_secs_f64();
        }
        Ok(())
    }

    fn resume(&self) -> Result<(), AudioError> {
        let mut state = self.lock();
        if !state.opened {
            return Err(AudioError::NotAcquired);
        }
        if self.restricted && !state.unlocked {
            return Err(AudioError::GestureRequired);
        }
        if state.running_since.is_none() {
            state.running_since = Some(Instant::now());
        }
        Ok(())
    }

    fn emit_silent_buffer(&self) -> Result<(), AudioError> {
        let mut state = self.lock();
        if !state.opened {
            return Err(AudioError::NotAcquired);
        }
        state.silent_buffers += 1;
        if state.refused_unlocks > 0 {
            state.refused_unlocks -= 1;
        } else {
            state.unlocked = true;
        }
        Ok(())
    }

    fn set_gain_at_time(&self, value: f32, at_time: f64) {
        let mut state = self.lock();
        state.gain = value;
        state.gain_changes.push(GainChange { value, at_time });
    }

    fn requires_user_gesture(&self) -> bool {
        self.restricted
    }
}

impl VoiceOutput for StubAudioDevice {
    fn sample_rate(&self) -> u32 {
        STUB_SAMPLE_RATE
    }

    fn output_time(&self) -> f64 {
        self.current_time()
    }

    fn submit(&self, voice: ScheduledVoice) -> Result<(), AudioError> {
        let mut state = self.lock();
        if !state.opened {
            return Err(AudioError::NotAcquired);
        }
        state.submitted.push(voice);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn clock_follows_virtual_time() {
        let device = StubAudioDevice::new();
        device.open().unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!((device.current_time() - 1.5).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_freezes_while_suspended() {
        let device = StubAudioDevice::new();
        device.open().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        device.suspend().unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(device.is_suspended());
        assert!((device.current_time() - 1.0).abs() < 1e-9);

        device.resume().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!((device.current_time() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn restricted_device_needs_silent_buffer() {
        let device = StubAudioDevice::restricted();
        device.open().unwrap();
        assert!(device.is_suspended());
        assert_eq!(device.resume(), Err(AudioError::GestureRequired));

        device.emit_silent_buffer().unwrap();
        device.resume().unwrap();
        assert!(!device.is_suspended());
    }

    #[test]
    fn refused_unlocks_are_counted_down() {
        let device = StubAudioDevice::restricted().with_refused_unlocks(1);
        device.open().unwrap();
        device.emit_silent_buffer().unwrap();
        assert_eq!(device.resume(), Err(AudioError::GestureRequired));
        device.emit_silent_buffer().unwrap();
        assert!(device.resume().is_ok());
        assert_eq!(device.silent_buffers(), 2);
    }

    #[test]
    fn failing_device_reports_init_error() {
        let device = StubAudioDevice::failing("no output");
        assert_eq!(
            device.open(),
            Err(AudioError::InitFailed {
                reason: "no output".to_string()
            })
        );
    }
}
