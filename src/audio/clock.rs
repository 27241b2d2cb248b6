//! AudioClock - lazily acquired owner of the audio device
//!
//! The clock is the single authority on time for scheduling and display.
//! It is acquired at most once per player and never torn down afterwards;
//! a failed acquisition leaves nothing behind, so the next attempt starts
//! from scratch.

use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tokio::time::Instant;

use crate::engine::backend::AudioDevice;
use crate::error::{log_audio_error, AudioError, ErrorCode};

/// Poll interval while waiting for an unlocked device to report running.
const UNLOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Owner of the audio device and its one-time initialization.
pub struct AudioClock {
    device: Arc<dyn AudioDevice>,
    handle: OnceCell<Clock>,
    unlock_timeout: Duration,
}

impl AudioClock {
    pub fn new(device: Arc<dyn AudioDevice>) -> Self {
        Self {
            device,
            handle: OnceCell::new(),
            unlock_timeout: Duration::from_millis(500),
        }
    }

    pub fn with_unlock_timeout(mut self, timeout: Duration) -> Self {
        self.unlock_timeout = timeout;
        self
    }

    /// Open the device graph on first call and return the shared handle.
    ///
    /// Idempotent. Any device failure is reported as
    /// [`AudioError::InitFailed`] and nothing is cached.
    pub fn acquire(&self) -> Result<Clock, AudioError> {
        self.handle
            .get_or_try_init(|| {
                self.device.open().map_err(|err| {
                    let err = match err {
                        AudioError::InitFailed { .. } => err,
                        other => AudioError::InitFailed {
                            reason: other.message(),
                        },
                    };
                    log_audio_error(&err, "acquire");
                    err
                })?;
                log::info!("[AudioClock] Audio graph initialized");
                Ok(Clock {
                    device: Arc::clone(&self.device),
                    unlock_timeout: self.unlock_timeout,
                })
            })
            .cloned()
    }

    /// Handle if the clock has already been acquired.
    pub fn get(&self) -> Option<Clock> {
        self.handle.get().cloned()
    }

    pub fn requires_user_gesture(&self) -> bool {
        self.device.requires_user_gesture()
    }
}

/// Cheap, cloneable handle to an acquired audio clock.
#[derive(Clone)]
pub struct Clock {
    device: Arc<dyn AudioDevice>,
    unlock_timeout: Duration,
}

impl Clock {
    /// Current clock reading in seconds. Monotonic; frozen while suspended.
    pub fn current_time(&self) -> f64 {
        self.device.current_time()
    }

    pub fn is_suspended(&self) -> bool {
        self.device.is_suspended()
    }

    pub fn suspend(&self) -> Result<(), AudioError> {
        self.device.suspend()
    }

    pub fn resume(&self) -> Result<(), AudioError> {
        self.device.resume()
    }

    /// Resume if the platform suspended the clock behind our back.
    pub fn ensure_running(&self) -> Result<(), AudioError> {
        if self.device.is_suspended() {
            log::debug!("[AudioClock] Clock suspended, resuming");
            self.device.resume()?;
        }
        Ok(())
    }

    /// Unlock audio on a platform that requires a user gesture.
    ///
    /// Must be called from inside the gesture handler: the silent buffer and
    /// the resume are issued synchronously before the first await. Resolves
    /// once the clock reports running, or fails with
    /// [`AudioError::GestureRequired`] if the platform still refuses.
    pub async fn unlock_for_restricted_platform(&self) -> Result<(), AudioError> {
        self.device.emit_silent_buffer()?;
        self.device.resume()?;

        let deadline = Instant::now() + self.unlock_timeout;
        while self.device.is_suspended() {
            if Instant::now() >= deadline {
                return Err(AudioError::GestureRequired);
            }
            tokio::time::sleep(UNLOCK_POLL_INTERVAL).await;
        }
        log::info!("[AudioClock] Audio unlocked by user gesture");
        Ok(())
    }

    pub(crate) fn set_gain_at_time(&self, value: f32, at_time: f64) {
        self.device.set_gain_at_time(value, at_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::StubAudioDevice;

    #[test]
    fn acquire_is_idempotent() {
        let device = Arc::new(StubAudioDevice::new());
        let clock = AudioClock::new(device.clone());

        assert!(clock.get().is_none());
        clock.acquire().unwrap();
        clock.acquire().unwrap();

        assert_eq!(device.open_count(), 1);
        assert!(clock.get().is_some());
    }

    #[test]
    fn failed_acquire_leaves_nothing_behind() {
        let device = Arc::new(StubAudioDevice::failing("no audio context"));
        let clock = AudioClock::new(device);

        let err = clock.acquire().err().unwrap();
        assert!(matches!(err, AudioError::InitFailed { .. }));
        assert!(clock.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn clock_reads_device_time() {
        let device = Arc::new(StubAudioDevice::new());
        let clock = AudioClock::new(device).acquire().unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!((clock.current_time() - 0.25).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_resumes_restricted_device() {
        let device = Arc::new(StubAudioDevice::restricted());
        let owner = AudioClock::new(device.clone());
        assert!(owner.requires_user_gesture());

        let clock = owner.acquire().unwrap();
        assert!(clock.is_suspended());
        assert_eq!(clock.resume(), Err(AudioError::GestureRequired));

        clock.unlock_for_restricted_platform().await.unwrap();
        assert!(!clock.is_suspended());
        assert_eq!(device.silent_buffers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_unlock_reports_gesture_required() {
        let device = Arc::new(StubAudioDevice::restricted().with_refused_unlocks(1));
        let clock = AudioClock::new(device).acquire().unwrap();

        assert_eq!(
            clock.unlock_for_restricted_platform().await,
            Err(AudioError::GestureRequired)
        );
        assert!(clock.unlock_for_restricted_platform().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn ensure_running_resumes_suspended_clock() {
        let device = Arc::new(StubAudioDevice::new());
        let clock = AudioClock::new(device).acquire().unwrap();
        clock.suspend().unwrap();
        assert!(clock.is_suspended());
        clock.ensure_running().unwrap();
        assert!(!clock.is_suspended());
    }
}
