//! SessionRegistry - per-device single-flight for recording sessions
//!
//! ## 目的
//!
//! - 同一カメラに対する録画セッションの多重起動を防止
//! - 「今何が録画中か」の信頼できる唯一のビュー
//! - 終了済みセッションも短時間保持（ステータス照会用）
//!
//! All mutation goes through try_acquire/release; call sites never touch
//! the map directly. Between a successful try_acquire and the matching
//! release no other caller can acquire the same device.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use uuid::Uuid;

use crate::recorder::types::SessionSnapshot;

struct ActiveEntry {
    session_id: Uuid,
    info: Arc<RwLock<SessionSnapshot>>,
    stop_tx: watch::Sender<bool>,
}

/// Registry of active and recently finished sessions
pub struct SessionRegistry {
    active: Mutex<HashMap<String, ActiveEntry>>,
    terminal: Mutex<Vec<(Instant, SessionSnapshot)>>,
    retention: Duration,
}

impl SessionRegistry {
    /// Create new registry; terminal sessions stay visible for `retention`
    pub fn new(retention: Duration) -> Self {
        Self {
            active: Mutex::new(HashMap::new()),
            terminal: Mutex::new(Vec::new()),
            retention,
        }
    }

    /// Atomically reserve the device slot
    ///
    /// Returns `None` when a non-terminal session already exists for the
    /// device. Never blocks.
    pub fn try_acquire(
        self: &Arc<Self>,
        info: Arc<RwLock<SessionSnapshot>>,
        stop_tx: watch::Sender<bool>,
    ) -> Option<SessionSlot> {
        let (device_id, session_id) = {
            let snapshot = info.read().unwrap();
            (snapshot.device_id.clone(), snapshot.session_id)
        };

        let mut active = self.active.lock().unwrap();
        if active.contains_key(&device_id) {
            tracing::debug!(camera_id = %device_id, "Session slot busy");
            return None;
        }

        active.insert(
            device_id.clone(),
            ActiveEntry {
                session_id,
                info,
                stop_tx,
            },
        );

        tracing::debug!(
            camera_id = %device_id,
            session_id = %session_id,
            "Session slot acquired"
        );

        Some(SessionSlot {
            device_id,
            session_id,
            registry: self.clone(),
            released: false,
        })
    }

    fn release_slot(&self, device_id: &str, session_id: Uuid, terminal: Option<SessionSnapshot>) {
        let removed = {
            let mut active = self.active.lock().unwrap();
            match active.get(device_id) {
                Some(entry) if entry.session_id == session_id => active.remove(device_id),
                _ => None,
            }
        };

        if removed.is_none() {
            tracing::warn!(
                camera_id = %device_id,
                session_id = %session_id,
                "Release for a slot that was not held"
            );
            return;
        }

        if let Some(snapshot) = terminal {
            let mut terminals = self.terminal.lock().unwrap();
            // Prune on every write so the list stays bounded even when
            // nobody polls the recent view
            Self::prune_expired(&mut terminals, self.retention);
            terminals.push((Instant::now(), snapshot));
        }

        tracing::debug!(
            camera_id = %device_id,
            session_id = %session_id,
            "Session slot released"
        );
    }

    /// Active session snapshot for one device
    pub fn active_session_for(&self, device_id: &str) -> Option<SessionSnapshot> {
        let active = self.active.lock().unwrap();
        active
            .get(device_id)
            .map(|entry| entry.info.read().unwrap().clone())
    }

    /// Snapshot of everything recording right now
    pub fn all_active(&self) -> Vec<SessionSnapshot> {
        let active = self.active.lock().unwrap();
        active
            .values()
            .map(|entry| entry.info.read().unwrap().clone())
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Signal the active session for a device to stop gracefully
    pub fn request_stop_device(&self, device_id: &str) -> bool {
        let active = self.active.lock().unwrap();
        match active.get(device_id) {
            Some(entry) => {
                entry.stop_tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Signal a specific session to stop gracefully
    pub fn request_stop_session(&self, session_id: Uuid) -> bool {
        let active = self.active.lock().unwrap();
        for entry in active.values() {
            if entry.session_id == session_id {
                entry.stop_tx.send_replace(true);
                return true;
            }
        }
        false
    }

    /// Signal every active session to stop (shutdown path)
    pub fn request_stop_all(&self) -> usize {
        let active = self.active.lock().unwrap();
        for entry in active.values() {
            entry.stop_tx.send_replace(true);
        }
        active.len()
    }

    /// Recently finished sessions, pruned to the retention window
    pub fn recent_terminal(&self) -> Vec<SessionSnapshot> {
        let mut terminals = self.terminal.lock().unwrap();
        Self::prune_expired(&mut terminals, self.retention);
        terminals.iter().map(|(_, s)| s.clone()).collect()
    }

    fn prune_expired(terminals: &mut Vec<(Instant, SessionSnapshot)>, retention: Duration) {
        let now = Instant::now();
        terminals.retain(|(at, _)| now.duration_since(*at) < retention);
    }
}

/// Reserved recording slot for one device
///
/// Released exactly once by the owning session on reaching a terminal
/// state. Dropping an unreleased slot frees the device (and logs), so a
/// panicking session cannot wedge its camera forever.
pub struct SessionSlot {
    device_id: String,
    session_id: Uuid,
    registry: Arc<SessionRegistry>,
    released: bool,
}

impl SessionSlot {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Release the slot, recording the terminal snapshot
    pub fn release(mut self, terminal: SessionSnapshot) {
        self.released = true;
        self.registry
            .release_slot(&self.device_id, self.session_id, Some(terminal));
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                camera_id = %self.device_id,
                session_id = %self.session_id,
                "Session slot dropped without release, freeing device"
            );
            self.registry
                .release_slot(&self.device_id, self.session_id, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::types::{RecordingKind, SessionState};
    use chrono::Utc;
    use std::path::PathBuf;

    fn snapshot(device_id: &str) -> Arc<RwLock<SessionSnapshot>> {
        Arc::new(RwLock::new(SessionSnapshot {
            session_id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            kind: RecordingKind::Continuous,
            chunk_index: 0,
            state: SessionState::Starting,
            started_at: Utc::now(),
            ended_at: None,
            planned_duration_sec: 60,
            artifact_path: PathBuf::from("/tmp/out.mp4"),
            size_bytes: None,
            failure: None,
        }))
    }

    #[test]
    fn test_second_acquire_is_busy() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let (tx1, _rx1) = watch::channel(false);
        let (tx2, _rx2) = watch::channel(false);

        let slot = registry.try_acquire(snapshot("cam-001"), tx1);
        assert!(slot.is_some());
        assert!(registry.try_acquire(snapshot("cam-001"), tx2).is_none());
    }

    #[test]
    fn test_different_devices_acquire_concurrently() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let (tx1, _rx1) = watch::channel(false);
        let (tx2, _rx2) = watch::channel(false);

        let slot1 = registry.try_acquire(snapshot("cam-001"), tx1);
        let slot2 = registry.try_acquire(snapshot("cam-002"), tx2);
        assert!(slot1.is_some());
        assert!(slot2.is_some());
        assert_eq!(registry.active_count(), 2);
    }

    #[test]
    fn test_release_frees_slot_and_keeps_terminal_visible() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let info = snapshot("cam-001");
        let (tx, _rx) = watch::channel(false);

        let slot = registry.try_acquire(info.clone(), tx).unwrap();
        let mut terminal = info.read().unwrap().clone();
        terminal.state = SessionState::Completed;
        slot.release(terminal);

        assert_eq!(registry.active_count(), 0);
        let recent = registry.recent_terminal();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].state, SessionState::Completed);

        // Device can be acquired again
        let (tx2, _rx2) = watch::channel(false);
        assert!(registry.try_acquire(snapshot("cam-001"), tx2).is_some());
    }

    #[test]
    fn test_dropped_slot_frees_device() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let (tx, _rx) = watch::channel(false);

        let slot = registry.try_acquire(snapshot("cam-001"), tx);
        drop(slot);

        assert_eq!(registry.active_count(), 0);
        // Nothing recorded as terminal for an abandoned slot
        assert!(registry.recent_terminal().is_empty());
    }

    #[test]
    fn test_stop_signal_reaches_session() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let (tx, rx) = watch::channel(false);

        let _slot = registry.try_acquire(snapshot("cam-001"), tx).unwrap();
        assert!(registry.request_stop_device("cam-001"));
        assert!(*rx.borrow());
        assert!(!registry.request_stop_device("cam-999"));
    }

    #[test]
    fn test_expired_terminal_sessions_are_pruned() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_millis(0)));
        let info = snapshot("cam-001");
        let (tx, _rx) = watch::channel(false);

        let slot = registry.try_acquire(info.clone(), tx).unwrap();
        let mut terminal = info.read().unwrap().clone();
        terminal.state = SessionState::Failed;
        slot.release(terminal);

        assert!(registry.recent_terminal().is_empty());
    }

    #[test]
    fn test_terminal_list_stays_bounded_without_reads() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_millis(0)));

        // Finish several sessions without ever calling recent_terminal
        for _ in 0..5 {
            let info = snapshot("cam-001");
            let (tx, _rx) = watch::channel(false);
            let slot = registry.try_acquire(info.clone(), tx).unwrap();
            let mut terminal = info.read().unwrap().clone();
            terminal.state = SessionState::Completed;
            slot.release(terminal);
        }

        // Each release pruned the entries that had already aged out
        assert_eq!(registry.terminal.lock().unwrap().len(), 1);
    }
}
