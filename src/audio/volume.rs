//! VolumeChannel - the only writer of the shared gain stage
//!
//! Every instrument feeds one gain stage. Volume changes arrive as control
//! messages and are applied immediately at the current clock time, with no
//! ramp; the last write wins. Per-note gains are never touched.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::ControlMessage;
use crate::audio::clock::AudioClock;
use crate::telemetry::TelemetryHub;

/// Applies `volume_update` messages to the shared gain stage.
#[derive(Clone)]
pub struct VolumeChannel {
    clock: Arc<AudioClock>,
    telemetry: Arc<TelemetryHub>,
}

impl VolumeChannel {
    pub fn new(clock: Arc<AudioClock>, telemetry: Arc<TelemetryHub>) -> Self {
        Self { clock, telemetry }
    }

    /// Set the shared gain to `volume` (clamped to [0, 1]) at the current
    /// clock time.
    ///
    /// Returns `false` when the clock has not been acquired yet; there is no
    /// gain stage to write to and the message is dropped.
    pub fn apply(&self, volume: f32) -> bool {
        let Some(clock) = self.clock.get() else {
            log::debug!("[VolumeChannel] Ignoring volume {} before audio init", volume);
            return false;
        };

        let value = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            log::warn!("[VolumeChannel] Non-finite volume {}, muting", volume);
            0.0
        };
        let at_time = clock.current_time();
        clock.set_gain_at_time(value, at_time);
        self.telemetry.record_volume(value);
        log::debug!("[VolumeChannel] Gain set to {} at {:.3}s", value, at_time);
        true
    }

    /// Handle one inbound control message.
    pub fn handle_message(&self, message: &ControlMessage) -> bool {
        match message {
            ControlMessage::VolumeUpdate { volume } => self.apply(*volume),
            ControlMessage::Unknown => false,
        }
    }

    /// Drain control messages until every sender is dropped.
    pub fn spawn_listener(self, mut rx: mpsc::Receiver<ControlMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                self.handle_message(&message);
            }
            log::debug!("[VolumeChannel] Control channel closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::StubAudioDevice;
    use std::time::Duration;

    fn channel_with(device: Arc<StubAudioDevice>) -> (VolumeChannel, Arc<AudioClock>) {
        let clock = Arc::new(AudioClock::new(device));
        let channel = VolumeChannel::new(Arc::clone(&clock), Arc::new(TelemetryHub::default()));
        (channel, clock)
    }

    #[test]
    fn ignored_before_clock_is_acquired() {
        let device = Arc::new(StubAudioDevice::new());
        let (channel, _clock) = channel_with(device.clone());
        assert!(!channel.apply(0.5));
        assert!(device.gain_changes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn applies_immediately_at_current_time() {
        let device = Arc::new(StubAudioDevice::new());
        let (channel, clock) = channel_with(device.clone());
        clock.acquire().unwrap();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert!(channel.handle_message(&ControlMessage::VolumeUpdate { volume: 0.2 }));

        let changes = device.gain_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value, 0.2);
        assert!((changes[0].at_time - 1.2).abs() < 1e-9);
    }

    #[test]
    fn clamps_out_of_range_values() {
        let device = Arc::new(StubAudioDevice::new());
        let (channel, clock) = channel_with(device.clone());
        clock.acquire().unwrap();

        channel.apply(3.0);
        assert_eq!(device.gain(), 1.0);
        channel.apply(-1.0);
        assert_eq!(device.gain(), 0.0);
        channel.apply(f32::NAN);
        assert_eq!(device.gain(), 0.0);
    }

    #[tokio::test]
    async fn listener_applies_last_write() {
        let device = Arc::new(StubAudioDevice::new());
        let (channel, clock) = channel_with(device.clone());
        clock.acquire().unwrap();

        let (tx, rx) = mpsc::channel(8);
        let listener = channel.spawn_listener(rx);
        tx.send(ControlMessage::VolumeUpdate { volume: 0.7 }).await.unwrap();
        tx.send(ControlMessage::Unknown).await.unwrap();
        tx.send(ControlMessage::VolumeUpdate { volume: 0.3 }).await.unwrap();
        drop(tx);
        listener.await.unwrap();

        assert_eq!(device.gain(), 0.3);
        assert_eq!(device.gain_changes().len(), 2);
    }
}
