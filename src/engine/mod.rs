//! Engine module housing the player and its device backends.
//!
//! `backend` holds the device trait with its cpal and stub implementations;
//! `core` holds the `Player` orchestration layer.

pub mod backend;
pub mod core;

pub use backend::{AudioDevice, StubAudioDevice};
pub use core::{FrameFactory, Player, PlayerBuilder, LOADING_TEXT};
