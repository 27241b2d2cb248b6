// BroadcastChannelManager: host-facing channel management
// Single Responsibility: outbound host events and the inbound control queue

use std::sync::{Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};

use crate::api::{ControlMessage, HostEvent};

/// Buffer for outbound host events
const HOST_EVENT_BUFFER: usize = 32;

/// Buffer for inbound control messages
const CONTROL_BUFFER: usize = 64;

/// Manages the channels between a player and its host page
///
/// # Channel Types
/// - Host events: broadcast of lifecycle notifications (started, complete,
///   stopped, failed), one receiver per subscriber
/// - Control messages: single-consumer queue of inbound messages such as
///   `volume_update`, drained by the volume listener
pub struct BroadcastChannelManager {
    host_events: broadcast::Sender<HostEvent>,
    control_tx: mpsc::Sender<ControlMessage>,
    control_rx: Mutex<Option<mpsc::Receiver<ControlMessage>>>,
}

impl BroadcastChannelManager {
    pub fn new() -> Self {
        let (host_events, _) = broadcast::channel(HOST_EVENT_BUFFER);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_BUFFER);
        Self {
            host_events,
            control_tx,
            control_rx: Mutex::new(Some(control_rx)),
        }
    }

    /// Publish a host event to every current subscriber
    ///
    /// Events published with no subscriber are dropped.
    pub fn publish(&self, event: HostEvent) {
        log::debug!("[BroadcastChannelManager] Host event: {:?}", event);
        let _ = self.host_events.send(event);
    }

    /// Subscribe to host events published from now on
    pub fn subscribe_host_events(&self) -> broadcast::Receiver<HostEvent> {
        self.host_events.subscribe()
    }

    /// Sender for inbound control messages
    pub fn control_sender(&self) -> mpsc::Sender<ControlMessage> {
        self.control_tx.clone()
    }

    /// Take the control receiver
    ///
    /// # Returns
    /// `Some` on the first call only; the queue has a single consumer
    pub fn take_control_receiver(&self) -> Option<mpsc::Receiver<ControlMessage>> {
        self.control_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Default for BroadcastChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
