// Managers Module
//
// Focused managers owned by the Player.
//
// Each manager handles one specific concern:
// - SessionManager: playback session lifecycle and cancellation
// - BroadcastChannelManager: host event broadcast and inbound control queue

pub mod broadcast_manager;
pub mod session_manager;

pub use broadcast_manager::BroadcastChannelManager;
pub use session_manager::{SessionLease, SessionManager};
