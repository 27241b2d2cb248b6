//! Configuration management for playback tuning
//!
//! This module provides runtime configuration loading from JSON files,
//! so click sounds, default volumes, delivery strategy and display pacing
//! can be adjusted without recompilation.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
}

/// Sounds and default gains used by the fixed gain policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Pitch used for metronome and countdown clicks
    pub click_note: String,
    /// Click duration in seconds
    pub click_duration: f64,
    /// Full click gain (downbeats); other beats get half of this
    pub metronome_volume: f32,
    /// Gain of bass chord notes
    pub bass_volume: f32,
    /// Initial value of the shared gain stage
    pub master_volume: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            click_note: "C3".to_string(),
            click_duration: 0.1,
            metronome_volume: 0.4,
            bass_volume: 1.0,
            master_volume: 1.0,
        }
    }
}

/// How scheduled notes reach the instruments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStrategy {
    /// Hand the absolute fire time to the instrument's timed playback
    Native,
    /// Arm a delayed task per note and play on wake-up
    Deferred,
}

/// Event scheduler tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub strategy: DeliveryStrategy,
    /// Tolerance in seconds for downbeat detection
    pub downbeat_tolerance: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            strategy: DeliveryStrategy::Native,
            downbeat_tolerance: 1e-6,
        }
    }
}

/// Display loop pacing and overlay timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Rendering callback rate used by the headless frame source
    pub frames_per_second: u32,
    /// Minimum spacing between honoured ticks on throttling platforms
    pub min_frame_interval_ms: f64,
    /// Overlay fade before the countdown starts
    pub fade_ms: u64,
    /// Number of chord labels shown after the current one
    pub lookahead: usize,
    /// Text color used for inline error messages
    pub error_color: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            frames_per_second: 60,
            min_frame_interval_ms: 16.0,
            fade_ms: 300,
            lookahead: 3,
            error_color: "#ff6b6b".to_string(),
        }
    }
}

/// Platform quirks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Force (or disable) the user-gesture unlock; `None` asks the device
    pub restricted_audio: Option<bool>,
    /// How long the unlock handshake waits for the clock to start running
    pub unlock_timeout_ms: u64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            restricted_audio: None,
            unlock_timeout_ms: 500,
        }
    }
}

impl AppConfig {
    /// Read and parse a JSON config, reporting why it could not be used.
    pub fn try_load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    /// Like [`AppConfig::try_load`], but a missing or malformed file only
    /// costs a warning and yields the defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self::try_load(path)
            .inspect(|_| log::info!("[Config] Using {}", path.display()))
            .unwrap_or_else(|err| {
                log::warn!("[Config] {:#}; falling back to defaults", err);
                Self::default()
            })
    }

    /// Load configuration from the default asset location
    pub fn load() -> Self {
        Self::load_from_file("assets/player_config.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_player_tuning() {
        let config = AppConfig::default();
        assert_eq!(config.playback.click_note, "C3");
        assert_eq!(config.playback.metronome_volume, 0.4);
        assert_eq!(config.scheduler.strategy, DeliveryStrategy::Native);
        assert_eq!(config.display.lookahead, 3);
        assert_eq!(config.display.fade_ms, 300);
        assert!(config.platform.restricted_audio.is_none());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join("rhythm_trainer_missing_config.json");
        assert!(AppConfig::try_load(&path).is_err());
        let config = AppConfig::load_from_file(&path);
        assert_eq!(config.display.min_frame_interval_ms, 16.0);
    }

    #[test]
    fn shipped_asset_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("assets/player_config.json");
        let config = AppConfig::try_load(path).unwrap();
        assert_eq!(config.playback.click_note, "C3");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let parsed: AppConfig =
            serde_json::from_str(r#"{"scheduler": {"strategy": "deferred"}}"#).unwrap();
        assert_eq!(parsed.scheduler.strategy, DeliveryStrategy::Deferred);
        assert_eq!(parsed.scheduler.downbeat_tolerance, 1e-6);
        assert_eq!(parsed.playback.bass_volume, 1.0);
    }
}
