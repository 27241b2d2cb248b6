// Host-facing message types
//
// The concrete transport (cross-frame messaging, FFI, stdin) is owned by the
// host; the engine only sees these typed messages.

mod types;

pub use types::{ControlMessage, HostEvent};
