// SessionManager: Focused manager for playback session lifecycle
//
// Single Responsibility: one active session at a time, with its cancel token

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{log_playback_error, PlaybackError};
use crate::playback::CancelToken;

struct ActiveSession {
    id: u64,
    cancel: CancelToken,
}

/// Claim on the session slot for as long as a session runs.
///
/// Dropping the lease cancels the session and frees the slot, whether the
/// session ran to the end or its future was abandoned midway.
pub struct SessionLease<'a> {
    manager: &'a SessionManager,
    id: u64,
    cancel: CancelToken,
}

impl SessionLease<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.manager.end(self.id);
    }
}

/// Manages the lifecycle of the player's playback session
///
/// This manager handles:
/// - Session ids (monotonic per player)
/// - Rejecting a second `begin` while a session runs
/// - Cancelling the running session on `stop`
/// - Lock management for thread-safe access
///
/// # Example
/// ```ignore
/// let manager = SessionManager::new();
/// let (id, cancel) = manager.begin()?;
/// // ... run playback, checking `cancel` ...
/// manager.end(id);
/// ```
pub struct SessionManager {
    active: Arc<Mutex<Option<ActiveSession>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new session
    ///
    /// # Returns
    /// * `Ok((id, cancel))` - Session id and the token that stops it
    /// * `Err(PlaybackError::AlreadyRunning)` - A session is still active
    pub fn begin(&self) -> Result<(u64, CancelToken), PlaybackError> {
        let mut guard = self.lock_active()?;
        if let Some(active) = guard.as_ref() {
            let err = PlaybackError::AlreadyRunning;
            log::warn!("[SessionManager] Session {} still active", active.id);
            log_playback_error(&err, "begin_session");
            return Err(err);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancelToken::new();
        *guard = Some(ActiveSession {
            id,
            cancel: cancel.clone(),
        });
        log::info!("[SessionManager] Session {} started", id);
        Ok((id, cancel))
    }

    /// Like [`begin`](Self::begin), but the slot is released when the
    /// returned lease is dropped.
    pub fn lease(&self) -> Result<SessionLease<'_>, PlaybackError> {
        let (id, cancel) = self.begin()?;
        Ok(SessionLease {
            manager: self,
            id,
            cancel,
        })
    }

    /// Release session `id`
    ///
    /// Does nothing if a different session is active (or none is).
    pub fn end(&self, id: u64) {
        let Ok(mut guard) = self.lock_active() else {
            return;
        };
        if guard.as_ref().map(|active| active.id) == Some(id) {
            *guard = None;
            log::info!("[SessionManager] Session {} ended", id);
        }
    }

    /// Cancel the active session
    ///
    /// # Returns
    /// * `Ok(id)` - Id of the session that was cancelled
    /// * `Err(PlaybackError::NotRunning)` - Nothing to stop
    pub fn stop(&self) -> Result<u64, PlaybackError> {
        let guard = self.lock_active()?;
        match guard.as_ref() {
            Some(active) => {
                active.cancel.cancel();
                log::info!("[SessionManager] Session {} cancelled", active.id);
                Ok(active.id)
            }
            None => Err(PlaybackError::NotRunning),
        }
    }

    pub fn is_running(&self) -> bool {
        self.current_id().is_some()
    }

    pub fn current_id(&self) -> Option<u64> {
        self.lock_active()
            .ok()
            .and_then(|guard| guard.as_ref().map(|active| active.id))
    }

    fn lock_active(&self) -> Result<MutexGuard<'_, Option<ActiveSession>>, PlaybackError> {
        self.active.lock().map_err(|_| {
            let err = PlaybackError::LockPoisoned {
                component: "session".to_string(),
            };
            log_playback_error(&err, "lock_session");
            err
        })
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_rejects_second_session() {
        let manager = SessionManager::new();
        let (id, _cancel) = manager.begin().unwrap();
        assert_eq!(manager.begin().err(), Some(PlaybackError::AlreadyRunning));

        manager.end(id);
        let (next, _) = manager.begin().unwrap();
        assert!(next > id);
    }

    #[test]
    fn test_stop_cancels_active_token() {
        let manager = SessionManager::new();
        assert_eq!(manager.stop(), Err(PlaybackError::NotRunning));

        let (id, cancel) = manager.begin().unwrap();
        assert_eq!(manager.stop(), Ok(id));
        assert!(cancel.is_cancelled());
        assert!(manager.is_running());
    }

    #[test]
    fn test_dropped_lease_cancels_and_frees_the_slot() {
        let manager = SessionManager::new();
        let lease = manager.lease().unwrap();
        let cancel = lease.cancel_token().clone();
        assert_eq!(manager.lease().err(), Some(PlaybackError::AlreadyRunning));

        drop(lease);
        assert!(cancel.is_cancelled());
        assert!(!manager.is_running());
        assert!(manager.lease().is_ok());
    }

    #[test]
    fn test_end_ignores_stale_ids() {
        let manager = SessionManager::new();
        let (id, _) = manager.begin().unwrap();
        manager.end(id + 1);
        assert_eq!(manager.current_id(), Some(id));
        manager.end(id);
        assert!(!manager.is_running());
    }
}
