//! Built-in sample voices
//!
//! The playback core treats instruments as opaque, but the CLI and desktop
//! build still need something audible. `SampleInstrument` renders a short
//! buffer per note (the metronome click for percussion, a decaying tone for
//! bass) and hands it to a [`VoiceOutput`], which mixes it in at the
//! requested frame.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;

use super::instruments::{Instrument, InstrumentKind, InstrumentLoader, PlayOptions, Voice};
use super::metronome::generate_click_sample;
use super::pitch;
use crate::error::{AudioError, PlaybackError};

/// Bass tone decay rate (1/s)
const BASS_DECAY: f64 = 3.0;

/// Release ramp applied to the end of every tone, in seconds
const RELEASE_SECONDS: f64 = 0.01;

/// A rendered note waiting for (or in the middle of) playback.
#[derive(Debug, Clone)]
pub struct ScheduledVoice {
    /// Absolute output frame at which the first sample plays
    pub start_frame: u64,
    pub samples: Arc<[f32]>,
    pub gain: f32,
    pub stopped: Arc<AtomicBool>,
}

/// Destination for rendered voices, usually the output device itself.
pub trait VoiceOutput: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Clock reading in seconds, on the same timeline as `start_frame`.
    fn output_time(&self) -> f64;

    fn submit(&self, voice: ScheduledVoice) -> Result<(), AudioError>;
}

struct SampledVoice {
    stopped: Arc<AtomicBool>,
}

impl Voice for SampledVoice {
    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

/// Percussion or bass instrument backed by generated samples.
pub struct SampleInstrument {
    kind: InstrumentKind,
    output: Arc<dyn VoiceOutput>,
    click: Arc<[f32]>,
}

impl SampleInstrument {
    pub fn new(kind: InstrumentKind, output: Arc<dyn VoiceOutput>) -> Self {
        let click = generate_click_sample(output.sample_rate());
        Self {
            kind,
            output,
            click: click.into(),
        }
    }

    fn render(&self, pitch: &str, duration: f64) -> Result<Arc<[f32]>, PlaybackError> {
        let sample_rate = self.output.sample_rate();
        let frames = (duration.max(0.0) * sample_rate as f64).round() as usize;

        match self.kind {
            InstrumentKind::Percussion => {
                let len = frames.min(self.click.len()).max(1);
                Ok(Arc::from(&self.click[..len]))
            }
            InstrumentKind::Bass => {
                let freq = pitch::frequency(pitch).ok_or_else(|| PlaybackError::NotePlayback {
                    note: pitch.to_string(),
                    instrument: self.kind.to_string(),
                    reason: "unrecognised pitch".to_string(),
                })?;
                Ok(decaying_tone(freq, frames, sample_rate).into())
            }
        }
    }
}

impl Instrument for SampleInstrument {
    fn kind(&self) -> InstrumentKind {
        self.kind
    }

    fn play(
        &self,
        pitch: &str,
        at_time: f64,
        options: PlayOptions,
    ) -> Result<Box<dyn Voice>, PlaybackError> {
        let samples = self.render(pitch, options.duration)?;
        let sample_rate = self.output.sample_rate() as f64;
        let start_time = at_time.max(self.output.output_time());
        let stopped = Arc::new(AtomicBool::new(false));

        self.output
            .submit(ScheduledVoice {
                start_frame: (start_time * sample_rate).round() as u64,
                samples,
                gain: options.gain.clamp(0.0, 1.0),
                stopped: Arc::clone(&stopped),
            })
            .map_err(|err| PlaybackError::NotePlayback {
                note: pitch.to_string(),
                instrument: self.kind.to_string(),
                reason: err.to_string(),
            })?;

        Ok(Box::new(SampledVoice { stopped }))
    }
}

/// Exponentially decaying sine with a short linear release.
fn decaying_tone(frequency: f64, frames: usize, sample_rate: u32) -> Vec<f32> {
    let sr = sample_rate as f64;
    let release = ((RELEASE_SECONDS * sr) as usize).min(frames);
    (0..frames)
        .map(|i| {
            let t = i as f64 / sr;
            let mut amp = (-BASS_DECAY * t).exp();
            let remaining = frames - i;
            if remaining < release {
                amp *= (remaining - 1) as f64 / release as f64;
            }
            ((2.0 * PI * frequency * t).sin() * amp * 0.8) as f32
        })
        .collect()
}

/// Loader for the built-in voices. Resolves immediately.
pub struct SampleLoader {
    output: Arc<dyn VoiceOutput>,
}

impl SampleLoader {
    pub fn new(output: Arc<dyn VoiceOutput>) -> Self {
        Self { output }
    }
}

impl InstrumentLoader for SampleLoader {
    fn load(&self, kind: InstrumentKind) -> BoxFuture<'static, anyhow::Result<Arc<dyn Instrument>>> {
        let output = Arc::clone(&self.output);
        Box::pin(async move {
            let instrument: Arc<dyn Instrument> = Arc::new(SampleInstrument::new(kind, output));
            Ok(instrument)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturingOutput {
        now: f64,
        voices: Mutex<Vec<ScheduledVoice>>,
        reject: bool,
    }

    impl CapturingOutput {
        fn at(now: f64) -> Self {
            Self {
                now,
                voices: Mutex::new(Vec::new()),
                reject: false,
            }
        }
    }

    impl VoiceOutput for CapturingOutput {
        fn sample_rate(&self) -> u32 {
            1000
        }

        fn output_time(&self) -> f64 {
            self.now
        }

        fn submit(&self, voice: ScheduledVoice) -> Result<(), AudioError> {
            if self.reject {
                return Err(AudioError::StreamFailure {
                    reason: "queue full".to_string(),
                });
            }
            self.voices.lock().unwrap().push(voice);
            Ok(())
        }
    }

    fn options(duration: f64, gain: f32) -> PlayOptions {
        PlayOptions { duration, gain }
    }

    #[test]
    fn future_notes_start_at_their_frame() {
        let output = Arc::new(CapturingOutput::at(1.0));
        let bass = SampleInstrument::new(InstrumentKind::Bass, output.clone());

        bass.play("A2", 2.5, options(0.5, 0.8)).unwrap();

        let voices = output.voices.lock().unwrap();
        assert_eq!(voices[0].start_frame, 2500);
        assert_eq!(voices[0].samples.len(), 500);
        assert_eq!(voices[0].gain, 0.8);
    }

    #[test]
    fn past_notes_start_now() {
        let output = Arc::new(CapturingOutput::at(3.0));
        let click = SampleInstrument::new(InstrumentKind::Percussion, output.clone());

        click.play("C3", 1.0, options(0.1, 1.0)).unwrap();

        let voices = output.voices.lock().unwrap();
        assert_eq!(voices[0].start_frame, 3000);
        assert!(voices[0].samples.len() <= 100);
    }

    #[test]
    fn stop_flags_the_voice() {
        let output = Arc::new(CapturingOutput::at(0.0));
        let bass = SampleInstrument::new(InstrumentKind::Bass, output.clone());

        let voice = bass.play("C2", 1.0, options(0.5, 1.0)).unwrap();
        voice.stop();

        assert!(output.voices.lock().unwrap()[0].stopped.load(Ordering::Relaxed));
    }

    #[test]
    fn unknown_bass_pitch_is_a_note_error() {
        let output = Arc::new(CapturingOutput::at(0.0));
        let bass = SampleInstrument::new(InstrumentKind::Bass, output);

        let err = bass.play("H9", 0.0, options(0.5, 1.0)).err().unwrap();
        assert!(matches!(err, PlaybackError::NotePlayback { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn rejected_submit_is_a_note_error() {
        let output = Arc::new(CapturingOutput {
            reject: true,
            ..CapturingOutput::at(0.0)
        });
        let click = SampleInstrument::new(InstrumentKind::Percussion, output);

        let err = click.play("C3", 0.0, options(0.1, 1.0)).err().unwrap();
        assert!(matches!(err, PlaybackError::NotePlayback { .. }));
    }

    #[test]
    fn tone_fades_to_silence() {
        let tone = decaying_tone(110.0, 1000, 1000);
        assert_eq!(tone.len(), 1000);
        assert!(tone.last().unwrap().abs() < 1e-3);
        assert!(tone.iter().all(|s| s.abs() <= 1.0));
    }

    #[tokio::test]
    async fn loader_builds_requested_kind() {
        let loader = SampleLoader::new(Arc::new(CapturingOutput::at(0.0)));
        let instrument = loader.load(InstrumentKind::Bass).await.unwrap();
        assert_eq!(instrument.kind(), InstrumentKind::Bass);
    }
}
