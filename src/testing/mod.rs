//! Test doubles for the playback core.
//!
//! Recording implementations of the instrument, loader and display seams.
//! Everything here records what it was asked to do so tests (unit and
//! integration) can assert on timing and display writes without a real
//! audio device or host page.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;

use crate::audio::{
    Instrument, InstrumentKind, InstrumentLoader, LoadedInstruments, PlayOptions,
    Voice,
};
use crate::engine::backend::AudioDevice;
use crate::error::PlaybackError;
use crate::playback::{DisplaySink, DisplaySlot};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One `Instrument::play` call.
#[derive(Debug, Clone)]
pub struct PlayCall {
    pub instrument: InstrumentKind,
    pub pitch: String,
    /// Time passed to `play`
    pub at_time: f64,
    /// Device clock reading when `play` was called, if the instrument has a device
    pub called_at: Option<f64>,
    pub options: PlayOptions,
    stopped: Arc<AtomicBool>,
}

impl PlayCall {
    /// When the note actually starts: the requested time, or the call time
    /// if that was later.
    pub fn sounding_time(&self) -> f64 {
        match self.called_at {
            Some(called_at) => self.at_time.max(called_at),
            None => self.at_time,
        }
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }
}

struct RecordedVoice {
    stopped: Arc<AtomicBool>,
}

impl Voice for RecordedVoice {
    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }
}

/// Instrument that records every play call.
pub struct RecordingInstrument {
    kind: InstrumentKind,
    device: Option<Arc<dyn AudioDevice>>,
    timed: AtomicBool,
    failing_notes: Mutex<HashSet<String>>,
    calls: Mutex<Vec<PlayCall>>,
}

impl RecordingInstrument {
    pub fn new(kind: InstrumentKind) -> Self {
        Self {
            kind,
            device: None,
            timed: AtomicBool::new(true),
            failing_notes: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Stamp calls with readings from `device`'s clock.
    pub fn with_device(mut self, device: Arc<dyn AudioDevice>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn set_timed_playback(&self, timed: bool) {
        self.timed.store(timed, Ordering::Relaxed);
    }

    /// Make every `play` of `note` fail.
    pub fn fail_note(&self, note: impl Into<String>) {
        lock(&self.failing_notes).insert(note.into());
    }

    pub fn calls(&self) -> Vec<PlayCall> {
        lock(&self.calls).clone()
    }
}

impl Instrument for RecordingInstrument {
    fn kind(&self) -> InstrumentKind {
        self.kind
    }

    fn play(
        &self,
        pitch: &str,
        at_time: f64,
        options: PlayOptions,
    ) -> Result<Box<dyn Voice>, PlaybackError> {
        if lock(&self.failing_notes).contains(pitch) {
            return Err(PlaybackError::NotePlayback {
                note: pitch.to_string(),
                instrument: self.kind.to_string(),
                reason: "scripted failure".to_string(),
            });
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let called_at = self.device.as_ref().map(|device| device.current_time());
        lock(&self.calls).push(PlayCall {
            instrument: self.kind,
            pitch: pitch.to_string(),
            at_time,
            called_at,
            options,
            stopped: Arc::clone(&stopped),
        });
        Ok(Box::new(RecordedVoice { stopped }))
    }

    fn supports_timed_playback(&self) -> bool {
        self.timed.load(Ordering::Relaxed)
    }
}

/// Loader handing out one shared [`RecordingInstrument`] per kind.
pub struct RecordingLoader {
    percussion: Arc<RecordingInstrument>,
    bass: Arc<RecordingInstrument>,
    failures: HashMap<InstrumentKind, String>,
    load_counts: Mutex<HashMap<InstrumentKind, usize>>,
}

impl RecordingLoader {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_device(device: Arc<dyn AudioDevice>) -> Self {
        Self::build(Some(device))
    }

    fn build(device: Option<Arc<dyn AudioDevice>>) -> Self {
        let instrument = |kind| {
            let instrument = RecordingInstrument::new(kind);
            Arc::new(match &device {
                Some(device) => instrument.with_device(Arc::clone(device)),
                None => instrument,
            })
        };
        Self {
            percussion: instrument(InstrumentKind::Percussion),
            bass: instrument(InstrumentKind::Bass),
            failures: HashMap::new(),
            load_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Make loading `kind` fail with `reason`.
    pub fn failing(mut self, kind: InstrumentKind, reason: impl Into<String>) -> Self {
        self.failures.insert(kind, reason.into());
        self
    }

    /// Report no timed-playback support for `kind`.
    pub fn untimed(self, kind: InstrumentKind) -> Self {
        self.instrument(kind).set_timed_playback(false);
        self
    }

    /// Make `note` fail on both instruments.
    pub fn failing_note(self, note: &str) -> Self {
        self.percussion.fail_note(note);
        self.bass.fail_note(note);
        self
    }

    pub fn instrument(&self, kind: InstrumentKind) -> &Arc<RecordingInstrument> {
        match kind {
            InstrumentKind::Percussion => &self.percussion,
            InstrumentKind::Bass => &self.bass,
        }
    }

    pub fn percussion(&self) -> Arc<RecordingInstrument> {
        Arc::clone(&self.percussion)
    }

    pub fn bass(&self) -> Arc<RecordingInstrument> {
        Arc::clone(&self.bass)
    }

    /// Both instruments, bypassing the load path.
    pub fn instruments(&self) -> LoadedInstruments {
        LoadedInstruments {
            percussion: self.percussion.clone(),
            bass: self.bass.clone(),
        }
    }

    /// Calls on both instruments.
    pub fn all_calls(&self) -> Vec<PlayCall> {
        let mut calls = self.percussion.calls();
        calls.extend(self.bass.calls());
        calls
    }

    pub fn load_count(&self, kind: InstrumentKind) -> usize {
        lock(&self.load_counts).get(&kind).copied().unwrap_or(0)
    }
}

impl Default for RecordingLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl InstrumentLoader for RecordingLoader {
    fn load(&self, kind: InstrumentKind) -> BoxFuture<'static, anyhow::Result<Arc<dyn Instrument>>> {
        *lock(&self.load_counts).entry(kind).or_insert(0) += 1;
        let failure = self.failures.get(&kind).cloned();
        let instrument: Arc<dyn Instrument> = self.instrument(kind).clone();

        Box::pin(async move {
            tokio::task::yield_now().await;
            match failure {
                Some(reason) => Err(anyhow::anyhow!("failed to fetch {} samples: {}", kind, reason)),
                None => Ok(instrument),
            }
        })
    }
}

/// One display write.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayWrite {
    Text {
        slot: DisplaySlot,
        text: String,
    },
    Style {
        slot: DisplaySlot,
        property: String,
        value: String,
    },
}

/// Display sink that records every write.
#[derive(Default)]
pub struct RecordingSink {
    writes: Mutex<Vec<DisplayWrite>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<DisplayWrite> {
        lock(&self.writes).clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.writes).len()
    }

    pub fn clear(&self) {
        lock(&self.writes).clear();
    }

    /// Every text written to `slot`, in order.
    pub fn texts_for(&self, slot: DisplaySlot) -> Vec<String> {
        lock(&self.writes)
            .iter()
            .filter_map(|write| match write {
                DisplayWrite::Text { slot: s, text } if *s == slot => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn last_text(&self, slot: DisplaySlot) -> Option<String> {
        self.texts_for(slot).pop()
    }

    pub fn last_style(&self, slot: DisplaySlot, property: &str) -> Option<String> {
        lock(&self.writes)
            .iter()
            .rev()
            .find_map(|write| match write {
                DisplayWrite::Style {
                    slot: s,
                    property: p,
                    value,
                } if *s == slot && p == property => Some(value.clone()),
                _ => None,
            })
    }
}

impl DisplaySink for RecordingSink {
    fn set_text(&self, slot: DisplaySlot, text: &str) {
        lock(&self.writes).push(DisplayWrite::Text {
            slot,
            text: text.to_string(),
        });
    }

    fn set_style(&self, slot: DisplaySlot, property: &str, value: &str) {
        lock(&self.writes).push(DisplayWrite::Style {
            slot,
            property: property.to_string(),
            value: value.to_string(),
        });
    }
}
