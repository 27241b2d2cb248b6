//! Sequence model: validated events, time signature, tempo and the request
//! payload a host page sends to start playback.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::audio::metronome::{click_gain, seconds_per_beat, seconds_per_measure};
use crate::audio::{pitch, InstrumentKind};
use crate::config::PlaybackConfig;
use crate::error::PlaybackError;

/// Share of a measure each generated bass note lasts
const BASS_NOTE_LENGTH: f64 = 0.95;

/// Octave used for generated bass roots
const BASS_OCTAVE: u32 = 2;

fn invalid(reason: impl Into<String>) -> PlaybackError {
    PlaybackError::InvalidSequence {
        reason: reason.into(),
    }
}

/// One note of a sequence. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicalEvent {
    note: String,
    offset: f64,
    duration: f64,
    gain: f32,
    instrument: InstrumentKind,
}

impl MusicalEvent {
    /// Validate and build an event.
    ///
    /// `offset` is seconds from session start (≥ 0), `duration` is seconds
    /// (> 0) and `gain` is linear in [0, 1].
    pub fn new(
        note: impl Into<String>,
        offset: f64,
        duration: f64,
        gain: f32,
        instrument: InstrumentKind,
    ) -> Result<Self, PlaybackError> {
        let note = note.into();
        if note.trim().is_empty() {
            return Err(invalid("event note is empty"));
        }
        if !offset.is_finite() || offset < 0.0 {
            return Err(invalid(format!("{} offset {} must be >= 0", note, offset)));
        }
        if !duration.is_finite() || duration <= 0.0 {
            return Err(invalid(format!("{} duration {} must be > 0", note, duration)));
        }
        if !gain.is_finite() || !(0.0..=1.0).contains(&gain) {
            return Err(invalid(format!("{} gain {} outside [0, 1]", note, gain)));
        }
        Ok(Self {
            note,
            offset,
            duration,
            gain,
            instrument,
        })
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn instrument(&self) -> InstrumentKind {
        self.instrument
    }
}

/// Beats per measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature(u32);

impl TimeSignature {
    pub fn new(beats_per_measure: u32) -> Result<Self, PlaybackError> {
        if beats_per_measure == 0 {
            return Err(invalid("time signature must have at least one beat"));
        }
        Ok(Self(beats_per_measure))
    }

    pub fn beats_per_measure(&self) -> u32 {
        self.0
    }
}

/// Tempo in beats per minute, finite and positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo(f64);

impl Tempo {
    pub fn new(bpm: f64) -> Result<Self, PlaybackError> {
        if !bpm.is_finite() || bpm <= 0.0 {
            return Err(PlaybackError::BpmInvalid { bpm });
        }
        Ok(Self(bpm))
    }

    /// Tempo for a new session: the live control wins over the requested
    /// value when one is bound and reports something usable.
    pub fn resolve(requested: f64, control: Option<&dyn TempoControl>) -> Result<Self, PlaybackError> {
        if let Some(live) = control.and_then(|control| control.current_bpm()) {
            match Self::new(live) {
                Ok(tempo) => {
                    if (live - requested).abs() > f64::EPSILON {
                        log::info!("[Sequence] Tempo control overrides {} BPM with {}", requested, live);
                    }
                    return Ok(tempo);
                }
                Err(_) => log::warn!("[Sequence] Ignoring invalid tempo control value {}", live),
            }
        }
        Self::new(requested)
    }

    pub fn bpm(&self) -> f64 {
        self.0
    }

    pub fn seconds_per_beat(&self) -> f64 {
        seconds_per_beat(self.0)
    }
}

/// Host tempo control (the BPM slider), read once when a session starts.
pub trait TempoControl: Send + Sync {
    fn current_bpm(&self) -> Option<f64>;
}

/// Tempo control backed by an atomic value, settable from any thread.
#[derive(Debug, Default)]
pub struct TempoSlider {
    bits: AtomicU64,
}

impl TempoSlider {
    pub fn new(bpm: f64) -> Self {
        Self {
            bits: AtomicU64::new(bpm.to_bits()),
        }
    }

    pub fn set(&self, bpm: f64) {
        self.bits.store(bpm.to_bits(), Ordering::Relaxed);
    }
}

impl TempoControl for TempoSlider {
    fn current_bpm(&self) -> Option<f64> {
        let bpm = f64::from_bits(self.bits.load(Ordering::Relaxed));
        (bpm > 0.0).then_some(bpm)
    }
}

/// Everything needed to play one session. Fixed once built.
#[derive(Debug, Clone)]
pub struct Sequence {
    events: Vec<MusicalEvent>,
    labels: Vec<String>,
    time_signature: TimeSignature,
    tempo: Tempo,
}

impl Sequence {
    /// Build a sequence; events are ordered by offset.
    pub fn new(
        mut events: Vec<MusicalEvent>,
        labels: Vec<String>,
        time_signature: TimeSignature,
        tempo: Tempo,
    ) -> Self {
        events.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        Self {
            events,
            labels,
            time_signature,
            tempo,
        }
    }

    /// Turn a host request into a sequence, applying the click gain policy.
    ///
    /// Bare metronome times become clicks at `config.click_note`, full gain
    /// on downbeats and half gain elsewhere, scaled by the metronome volume.
    /// Explicit metronome notes keep the gain the host gave them.
    pub fn from_request(
        request: &PlayerRequest,
        tempo: Tempo,
        config: &PlaybackConfig,
        downbeat_tolerance: f64,
    ) -> Result<Self, PlaybackError> {
        let time_signature = TimeSignature::new(request.time_signature)?;
        let spm = seconds_per_measure(tempo.bpm(), time_signature.beats_per_measure());
        let bass_volume = request
            .bass_volume
            .unwrap_or(config.bass_volume)
            .clamp(0.0, 1.0);
        let metronome_volume = request
            .metronome_volume
            .unwrap_or(config.metronome_volume)
            .clamp(0.0, 1.0);

        let mut events =
            Vec::with_capacity(request.chord_sequence.len() + request.metronome_sequence.len());

        for chord in &request.chord_sequence {
            events.push(MusicalEvent::new(
                chord.note.as_str(),
                chord.time,
                chord.duration,
                bass_volume,
                InstrumentKind::Bass,
            )?);
        }

        for click in &request.metronome_sequence {
            let event = match click {
                MetronomeEvent::Time(time) => MusicalEvent::new(
                    config.click_note.as_str(),
                    *time,
                    config.click_duration,
                    click_gain(*time, spm, metronome_volume, downbeat_tolerance),
                    InstrumentKind::Percussion,
                )?,
                MetronomeEvent::Note {
                    note,
                    time,
                    duration,
                    gain,
                } => MusicalEvent::new(
                    note.as_str(),
                    *time,
                    *duration,
                    gain.unwrap_or_else(|| click_gain(*time, spm, metronome_volume, downbeat_tolerance)),
                    InstrumentKind::Percussion,
                )?,
            };
            events.push(event);
        }

        Ok(Self::new(
            events,
            request.display_sequence.clone(),
            time_signature,
            tempo,
        ))
    }

    pub fn events(&self) -> &[MusicalEvent] {
        &self.events
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    /// Number of measures, one per display label.
    pub fn measures(&self) -> usize {
        self.labels.len()
    }

    pub fn seconds_per_measure(&self) -> f64 {
        seconds_per_measure(self.tempo.bpm(), self.time_signature.beats_per_measure())
    }

    pub fn total_duration(&self) -> f64 {
        self.measures() as f64 * self.seconds_per_measure()
    }
}

/// Bass note in a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    pub note: String,
    pub time: f64,
    pub duration: f64,
}

/// Metronome entry in a request: either a bare click time or a full note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetronomeEvent {
    Time(f64),
    Note {
        note: String,
        time: f64,
        duration: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gain: Option<f32>,
    },
}

fn default_volume() -> f32 {
    1.0
}

/// Payload that starts a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRequest {
    pub chord_sequence: Vec<ChordEvent>,
    pub metronome_sequence: Vec<MetronomeEvent>,
    pub display_sequence: Vec<String>,
    pub time_signature: u32,
    pub bpm: f64,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bass_volume: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metronome_volume: Option<f32>,
}

impl PlayerRequest {
    pub fn from_json(json: &str) -> Result<Self, PlaybackError> {
        serde_json::from_str(json).map_err(|err| invalid(format!("malformed request: {}", err)))
    }

    /// Generate a request from chord symbols: one bass root per measure in
    /// octave 2 and one metronome click per beat.
    pub fn from_chord_labels(
        labels: &[String],
        bpm: f64,
        beats_per_measure: u32,
        config: &PlaybackConfig,
    ) -> Result<Self, PlaybackError> {
        let tempo = Tempo::new(bpm)?;
        let time_signature = TimeSignature::new(beats_per_measure)?;
        let spb = tempo.seconds_per_beat();
        let spm = spb * time_signature.beats_per_measure() as f64;

        let chord_sequence = labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let root = pitch::chord_root(label)
                    .ok_or_else(|| invalid(format!("'{}' is not a chord symbol", label)))?;
                Ok(ChordEvent {
                    note: format!("{}{}", root, BASS_OCTAVE),
                    time: i as f64 * spm,
                    duration: spm * BASS_NOTE_LENGTH,
                })
            })
            .collect::<Result<Vec<_>, PlaybackError>>()?;

        let total_beats = labels.len() * beats_per_measure as usize;
        let metronome_sequence = (0..total_beats)
            .map(|i| MetronomeEvent::Time(i as f64 * spb))
            .collect();

        Ok(Self {
            chord_sequence,
            metronome_sequence,
            display_sequence: labels.to_vec(),
            time_signature: beats_per_measure,
            bpm,
            volume: config.master_volume,
            bass_volume: Some(config.bass_volume),
            metronome_volume: Some(config.metronome_volume),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn event_validation_rejects_bad_values() {
        let kind = InstrumentKind::Bass;
        assert!(MusicalEvent::new("C2", 0.0, 1.0, 1.0, kind).is_ok());
        assert!(MusicalEvent::new("", 0.0, 1.0, 1.0, kind).is_err());
        assert!(MusicalEvent::new("C2", -0.1, 1.0, 1.0, kind).is_err());
        assert!(MusicalEvent::new("C2", 0.0, 0.0, 1.0, kind).is_err());
        assert!(MusicalEvent::new("C2", 0.0, 1.0, 1.5, kind).is_err());
        assert!(MusicalEvent::new("C2", f64::NAN, 1.0, 1.0, kind).is_err());
    }

    #[test]
    fn tempo_and_signature_validation() {
        assert_eq!(Tempo::new(0.0), Err(PlaybackError::BpmInvalid { bpm: 0.0 }));
        assert!(Tempo::new(f64::INFINITY).is_err());
        assert!(TimeSignature::new(0).is_err());
        assert_eq!(Tempo::new(120.0).unwrap().seconds_per_beat(), 0.5);
    }

    #[test]
    fn tempo_control_overrides_request() {
        let slider = TempoSlider::new(90.0);
        let tempo = Tempo::resolve(120.0, Some(&slider)).unwrap();
        assert_eq!(tempo.bpm(), 90.0);

        slider.set(-1.0);
        assert_eq!(Tempo::resolve(120.0, Some(&slider)).unwrap().bpm(), 120.0);
        assert_eq!(Tempo::resolve(100.0, None).unwrap().bpm(), 100.0);
    }

    #[test]
    fn request_parses_bare_times_and_notes() {
        let json = r#"{
            "chord_sequence": [{"note": "C2", "time": 0.0, "duration": 3.8}],
            "metronome_sequence": [0.0, {"note": "G3", "time": 1.0, "duration": 0.05, "gain": 0.3}],
            "display_sequence": ["C"],
            "time_signature": 4,
            "bpm": 60
        }"#;
        let request = PlayerRequest::from_json(json).unwrap();
        assert_eq!(request.volume, 1.0);
        assert_eq!(request.metronome_sequence[0], MetronomeEvent::Time(0.0));
        assert!(matches!(
            request.metronome_sequence[1],
            MetronomeEvent::Note { gain: Some(_), .. }
        ));
    }

    #[test]
    fn malformed_request_is_invalid_sequence() {
        let err = PlayerRequest::from_json("{\"bpm\": 60}").err().unwrap();
        assert!(matches!(err, PlaybackError::InvalidSequence { .. }));
    }

    #[test]
    fn clicks_follow_the_downbeat_policy() {
        let config = PlaybackConfig::default();
        let request =
            PlayerRequest::from_chord_labels(&labels(&["C", "F"]), 60.0, 4, &config).unwrap();
        let sequence =
            Sequence::from_request(&request, Tempo::new(60.0).unwrap(), &config, 1e-6).unwrap();

        let clicks: Vec<&MusicalEvent> = sequence
            .events()
            .iter()
            .filter(|e| e.instrument() == InstrumentKind::Percussion)
            .collect();
        assert_eq!(clicks.len(), 8);

        let volume = config.metronome_volume;
        for click in clicks {
            let expected = if click.offset() == 0.0 || click.offset() == 4.0 {
                volume
            } else {
                volume * 0.5
            };
            assert!((click.gain() - expected).abs() < 1e-6, "{:?}", click);
            assert_eq!(click.note(), config.click_note);
        }
    }

    #[test]
    fn generated_bass_roots_sit_in_octave_two() {
        let config = PlaybackConfig::default();
        let request =
            PlayerRequest::from_chord_labels(&labels(&["Bbmaj7", "F#m7", "G7"]), 120.0, 4, &config)
                .unwrap();

        let notes: Vec<&str> = request.chord_sequence.iter().map(|c| c.note.as_str()).collect();
        assert_eq!(notes, ["Bb2", "F#2", "G2"]);
        assert_eq!(request.chord_sequence[1].time, 2.0);
        assert!((request.chord_sequence[0].duration - 1.9).abs() < 1e-9);
        assert_eq!(request.metronome_sequence.len(), 12);
    }

    #[test]
    fn non_chord_label_is_rejected() {
        let config = PlaybackConfig::default();
        let err = PlayerRequest::from_chord_labels(&labels(&["C", "?"]), 120.0, 4, &config)
            .err()
            .unwrap();
        assert!(matches!(err, PlaybackError::InvalidSequence { .. }));
    }

    #[test]
    fn sequence_orders_events_and_derives_durations() {
        let sequence = Sequence::new(
            vec![
                MusicalEvent::new("C3", 2.0, 0.1, 1.0, InstrumentKind::Percussion).unwrap(),
                MusicalEvent::new("C2", 0.0, 1.0, 1.0, InstrumentKind::Bass).unwrap(),
            ],
            labels(&["C", "G"]),
            TimeSignature::new(3).unwrap(),
            Tempo::new(90.0).unwrap(),
        );

        assert_eq!(sequence.events()[0].note(), "C2");
        assert_eq!(sequence.measures(), 2);
        assert!((sequence.seconds_per_measure() - 2.0).abs() < 1e-9);
        assert!((sequence.total_duration() - 4.0).abs() < 1e-9);
    }
}
