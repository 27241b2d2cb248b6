// Audio module - clock, instruments, metronome arithmetic and the shared gain stage

pub mod clock;
pub mod instruments;
pub mod metronome;
pub mod pitch;
pub mod sampler;
pub mod volume;

// Re-export commonly used types for convenience
pub use clock::{AudioClock, Clock};
pub use instruments::{
    Instrument, InstrumentBank, InstrumentKind, InstrumentLoader, LoadedInstruments, PlayOptions,
    Voice,
};
pub use sampler::{SampleInstrument, SampleLoader, ScheduledVoice, VoiceOutput};
pub use volume::VolumeChannel;
