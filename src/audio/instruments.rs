//! InstrumentBank - memoized loading of the two playable instruments
//!
//! Instruments are opaque collaborators: something that can be told to play
//! a pitch at a clock time with a gain and a duration. The bank loads each
//! one at most once and lets callers await both as a single joined step.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::PlaybackError;

/// The two instruments a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Metronome and countdown clicks
    #[serde(alias = "snare")]
    Percussion,
    /// Chord roots
    Bass,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentKind::Percussion => "percussion",
            InstrumentKind::Bass => "bass",
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-note playback parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayOptions {
    /// Seconds
    pub duration: f64,
    /// Linear gain in [0, 1]
    pub gain: f32,
}

/// A note handed to an instrument.
pub trait Voice: Send + Sync {
    /// Silence the note. Has no audible effect once the note has finished.
    fn stop(&self);
}

/// An instrument that can play notes against the audio clock.
pub trait Instrument: Send + Sync {
    fn kind(&self) -> InstrumentKind;

    /// Start `pitch` at clock time `at_time`. Times at or before the current
    /// clock reading play immediately.
    fn play(
        &self,
        pitch: &str,
        at_time: f64,
        options: PlayOptions,
    ) -> Result<Box<dyn Voice>, PlaybackError>;

    /// Whether `play` honours future `at_time` values sample-accurately.
    fn supports_timed_playback(&self) -> bool {
        true
    }
}

/// Loads instrument samples. Implemented by the platform (soundfont loader,
/// sampler, test double).
pub trait InstrumentLoader: Send + Sync {
    fn load(&self, kind: InstrumentKind) -> BoxFuture<'static, anyhow::Result<Arc<dyn Instrument>>>;
}

/// Both instruments, ready to play.
#[derive(Clone)]
pub struct LoadedInstruments {
    pub percussion: Arc<dyn Instrument>,
    pub bass: Arc<dyn Instrument>,
}

impl LoadedInstruments {
    pub fn get(&self, kind: InstrumentKind) -> &Arc<dyn Instrument> {
        match kind {
            InstrumentKind::Percussion => &self.percussion,
            InstrumentKind::Bass => &self.bass,
        }
    }
}

/// Memoizing front for an [`InstrumentLoader`].
///
/// Concurrent loads of distinct instruments proceed independently; concurrent
/// loads of the same instrument share one underlying load. A failed load is
/// not cached, so the user can re-trigger playback.
pub struct InstrumentBank {
    loader: Arc<dyn InstrumentLoader>,
    percussion: OnceCell<Arc<dyn Instrument>>,
    bass: OnceCell<Arc<dyn Instrument>>,
}

impl InstrumentBank {
    pub fn new(loader: Arc<dyn InstrumentLoader>) -> Self {
        Self {
            loader,
            percussion: OnceCell::new(),
            bass: OnceCell::new(),
        }
    }

    fn cell(&self, kind: InstrumentKind) -> &OnceCell<Arc<dyn Instrument>> {
        match kind {
            InstrumentKind::Percussion => &self.percussion,
            InstrumentKind::Bass => &self.bass,
        }
    }

    /// Load one instrument, reusing a previous successful load.
    pub async fn load(&self, kind: InstrumentKind) -> Result<Arc<dyn Instrument>, PlaybackError> {
        let instrument = self
            .cell(kind)
            .get_or_try_init(|| async {
                log::info!("[InstrumentBank] Loading {} instrument", kind);
                self.loader
                    .load(kind)
                    .await
                    .map_err(|err| PlaybackError::InstrumentLoad {
                        instrument: kind.to_string(),
                        reason: format!("{:#}", err),
                    })
            })
            .await?;
        Ok(Arc::clone(instrument))
    }

    /// Load both instruments as one joined step.
    pub async fn load_all(&self) -> Result<LoadedInstruments, PlaybackError> {
        let (percussion, bass) = futures::try_join!(
            self.load(InstrumentKind::Percussion),
            self.load(InstrumentKind::Bass)
        )?;
        Ok(LoadedInstruments { percussion, bass })
    }

    /// Instrument if it has already been loaded.
    pub fn get(&self, kind: InstrumentKind) -> Option<Arc<dyn Instrument>> {
        self.cell(kind).get().cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingInstrument, RecordingLoader};

    #[tokio::test]
    async fn load_is_memoized_per_instrument() {
        let loader = Arc::new(RecordingLoader::new());
        let bank = InstrumentBank::new(loader.clone());

        let first = bank.load(InstrumentKind::Bass).await.unwrap();
        let second = bank.load(InstrumentKind::Bass).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.load_count(InstrumentKind::Bass), 1);
        assert_eq!(loader.load_count(InstrumentKind::Percussion), 0);
    }

    #[tokio::test]
    async fn load_all_joins_both_instruments() {
        let loader = Arc::new(RecordingLoader::new());
        let bank = InstrumentBank::new(loader.clone());

        let loaded = bank.load_all().await.unwrap();
        assert_eq!(loaded.percussion.kind(), InstrumentKind::Percussion);
        assert_eq!(loaded.bass.kind(), InstrumentKind::Bass);
        assert!(bank.get(InstrumentKind::Percussion).is_some());

        bank.load_all().await.unwrap();
        assert_eq!(loader.load_count(InstrumentKind::Percussion), 1);
        assert_eq!(loader.load_count(InstrumentKind::Bass), 1);
    }

    #[tokio::test]
    async fn load_failure_names_the_instrument_and_is_not_cached() {
        let loader = Arc::new(RecordingLoader::new().failing(InstrumentKind::Bass, "404"));
        let bank = InstrumentBank::new(loader.clone());

        let err = bank.load_all().await.err().unwrap();
        match err {
            PlaybackError::InstrumentLoad { instrument, reason } => {
                assert_eq!(instrument, "bass");
                assert!(reason.contains("404"));
            }
            other => panic!("Expected InstrumentLoad, got {:?}", other),
        }
        assert!(bank.get(InstrumentKind::Bass).is_none());

        let _ = bank.load(InstrumentKind::Bass).await;
        assert_eq!(loader.load_count(InstrumentKind::Bass), 2);
    }

    #[test]
    fn kind_serializes_with_legacy_alias() {
        let kind: InstrumentKind = serde_json::from_str("\"snare\"").unwrap();
        assert_eq!(kind, InstrumentKind::Percussion);
        assert_eq!(serde_json::to_string(&InstrumentKind::Bass).unwrap(), "\"bass\"");
    }

    #[test]
    fn loaded_instruments_lookup_by_kind() {
        let loaded = LoadedInstruments {
            percussion: Arc::new(RecordingInstrument::new(InstrumentKind::Percussion)),
            bass: Arc::new(RecordingInstrument::new(InstrumentKind::Bass)),
        };
        assert_eq!(
            loaded.get(InstrumentKind::Bass).kind(),
            InstrumentKind::Bass
        );
    }
}
