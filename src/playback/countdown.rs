//! CountdownSequencer - gesture unlock and the pre-roll clicks
//!
//! On restricted platforms nothing touches the audio clock until the user
//! taps; the tap is what unlocks audio. After that a countdown of one
//! priming click per beat runs on the clock's tempo, and the session starts
//! at the clock reading taken right after the last count.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::mpsc;

use super::cancel::CancelToken;
use super::display::{DisplaySink, DisplaySlot};
use crate::audio::{AudioClock, Clock, Instrument, PlayOptions};
use crate::error::{log_audio_error, log_playback_error, AudioError, PlaybackError};

pub const TAP_PROMPT: &str = "Tap here to start...";

/// User gestures that platforms accept as permission to play audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    PointerUp,
    TouchEnd,
}

/// Stream of user gestures. Yields `None` once the host goes away.
pub trait GestureSource: Send {
    fn next_gesture(&mut self) -> BoxFuture<'_, Option<Gesture>>;
}

/// Gesture source fed through a channel by the host's event handlers.
pub struct GestureChannel {
    rx: mpsc::UnboundedReceiver<Gesture>,
}

/// Create a gesture channel; the sender side goes to the host's input
/// handlers.
pub fn gesture_channel() -> (mpsc::UnboundedSender<Gesture>, GestureChannel) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, GestureChannel { rx })
}

impl GestureSource for GestureChannel {
    fn next_gesture(&mut self) -> BoxFuture<'_, Option<Gesture>> {
        Box::pin(self.rx.recv())
    }
}

/// Settings for the priming clicks.
#[derive(Debug, Clone)]
pub struct CountdownClick {
    pub note: String,
    pub duration: f64,
    pub gain: f32,
}

pub struct CountdownSequencer {
    sink: Arc<dyn DisplaySink>,
    click: CountdownClick,
}

impl CountdownSequencer {
    pub fn new(sink: Arc<dyn DisplaySink>, click: CountdownClick) -> Self {
        Self { sink, click }
    }

    fn show_prompt(&self) {
        self.sink.set_text(DisplaySlot::LoadingText, TAP_PROMPT);
        self.sink.set_style(DisplaySlot::LoadingOverlay, "display", "flex");
    }

    /// Block until a gesture unlocks audio, then return the running clock.
    ///
    /// The clock is first acquired inside the gesture. A refused unlock shows
    /// the prompt again and waits for the next gesture; a closed gesture
    /// source or `cancel` ends the wait with [`PlaybackError::Cancelled`].
    pub async fn await_unlock(
        &self,
        audio: &AudioClock,
        gestures: &mut dyn GestureSource,
        cancel: &CancelToken,
    ) -> Result<Clock, PlaybackError> {
        self.show_prompt();
        log::info!("[Countdown] Waiting for a user gesture to unlock audio");

        loop {
            let gesture = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                gesture = gestures.next_gesture() => gesture,
            };
            let Some(gesture) = gesture else {
                return Err(PlaybackError::Cancelled);
            };
            log::debug!("[Countdown] Gesture received: {:?}", gesture);

            let clock = audio.acquire()?;
            match clock.unlock_for_restricted_platform().await {
                Ok(()) => return Ok(clock),
                Err(AudioError::GestureRequired) => {
                    log_audio_error(&AudioError::GestureRequired, "await_unlock");
                    self.show_prompt();
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Count down `beats_per_measure` beats with a priming click on each and
    /// return the session start instant.
    pub async fn run(
        &self,
        clock: &Clock,
        percussion: &Arc<dyn Instrument>,
        beats_per_measure: u32,
        seconds_per_beat: f64,
        cancel: &CancelToken,
    ) -> Result<f64, PlaybackError> {
        let beat = Duration::from_secs_f64(seconds_per_beat);
        let options = PlayOptions {
            duration: self.click.duration,
            gain: self.click.gain,
        };

        self.sink.set_style(DisplaySlot::Countdown, "display", "block");
        for count in (1..=beats_per_measure).rev() {
            self.sink.set_text(DisplaySlot::Countdown, &count.to_string());
            if let Err(err) = percussion.play(&self.click.note, clock.current_time(), options) {
                log_playback_error(&err, "countdown");
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.hide();
                    return Err(PlaybackError::Cancelled);
                }
                _ = tokio::time::sleep(beat) => {}
            }
        }
        self.hide();

        let start_instant = clock.current_time();
        log::info!("[Countdown] Lead-in finished, start instant {:.3}s", start_instant);
        Ok(start_instant)
    }

    fn hide(&self) {
        self.sink.set_style(DisplaySlot::Countdown, "display", "none");
        self.sink.set_text(DisplaySlot::Countdown, "");
    }
}
