// Rhythm Trainer Core - chord progression playback engine
// Sample-accurate scheduling against the audio clock with a display loop
// that follows it

// Module declarations
pub mod api;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod managers;
pub mod playback;
pub mod telemetry;
pub mod testing;

// Re-exports for convenience
pub use api::{ControlMessage, HostEvent};
pub use config::AppConfig;
pub use engine::{Player, PlayerBuilder};
pub use error::{AudioError, ErrorCode, PlaybackError};
pub use playback::{PlayerRequest, SyncOutcome};
