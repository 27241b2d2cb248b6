// Playback module - sequence model, scheduling, display sync and countdown

pub mod cancel;
pub mod countdown;
pub mod display;
pub mod scheduler;
pub mod sequence;
pub mod session;

pub use cancel::CancelToken;
pub use countdown::{
    gesture_channel, CountdownClick, CountdownSequencer, Gesture, GestureChannel, GestureSource,
    TAP_PROMPT,
};
pub use display::{
    BeatDisplay, DisplaySink, DisplaySlot, DisplaySynchronizer, DisplayTask, FrameSource,
    IntervalFrameSource, SyncOutcome,
};
pub use scheduler::{EventScheduler, ScheduledSet};
pub use sequence::{
    ChordEvent, MetronomeEvent, MusicalEvent, PlayerRequest, Sequence, Tempo, TempoControl,
    TempoSlider, TimeSignature,
};
pub use session::{BeatCursor, PlaybackSession};
