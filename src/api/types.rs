//! Messages exchanged with the host page.

use serde::{Deserialize, Serialize};

/// Inbound control message from the host page.
///
/// Wire form: `{"type": "volume_update", "volume": 0.2}`. Message types this
/// engine does not understand deserialize to [`ControlMessage::Unknown`] and
/// are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    VolumeUpdate {
        volume: f32,
    },
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Outbound notification to the host page.
///
/// `PlaybackComplete` lets the host reset its play/stop toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    PlaybackStarted { session_id: u64, bpm: f64 },
    PlaybackComplete { session_id: u64 },
    PlaybackStopped { session_id: u64 },
    PlaybackFailed { code: i32, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_volume_update() {
        let msg = ControlMessage::from_json(r#"{"type":"volume_update","volume":0.2}"#).unwrap();
        assert_eq!(msg, ControlMessage::VolumeUpdate { volume: 0.2 });
    }

    #[test]
    fn unknown_message_types_are_tolerated() {
        let msg = ControlMessage::from_json(r#"{"type":"streamlit:render"}"#).unwrap();
        assert_eq!(msg, ControlMessage::Unknown);
    }

    #[test]
    fn volume_update_requires_volume() {
        assert!(ControlMessage::from_json(r#"{"type":"volume_update"}"#).is_err());
    }

    #[test]
    fn host_events_are_tagged() {
        let json = serde_json::to_string(&HostEvent::PlaybackComplete { session_id: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"playback_complete","session_id":3}"#);
    }
}
