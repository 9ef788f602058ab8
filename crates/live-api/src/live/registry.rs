use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use shared::models::LiveSessionInfo;
use shared::session::Language;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiveSummary {
    pub language: Language,
    pub created_at: DateTime<Utc>,
    pub has_frame: bool,
    pub message_count: usize,
}

struct LiveEntry {
    connection_id: u64,
    summary: LiveSummary,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session {0} already has an active live connection")]
    AlreadyActive(String),
}

/// Active live connections keyed by session id. Owned by the app state and shared by
/// every socket task and the status endpoints.
#[derive(Clone)]
pub struct LiveRegistry {
    entries: Arc<Mutex<HashMap<String, LiveEntry>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl Default for LiveRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    pub fn register(
        &self,
        session_id: &str,
        connection_id: u64,
        summary: LiveSummary,
    ) -> Result<(), RegistryError> {
        let mut entries = self.lock_entries();
        if entries
            .get(session_id)
            .is_some_and(|existing| existing.connection_id != connection_id)
        {
            return Err(RegistryError::AlreadyActive(session_id.to_string()));
        }

        entries.insert(
            session_id.to_string(),
            LiveEntry {
                connection_id,
                summary,
            },
        );
        Ok(())
    }

    pub fn update(&self, session_id: &str, update: impl FnOnce(&mut LiveSummary)) {
        if let Some(entry) = self.lock_entries().get_mut(session_id) {
            update(&mut entry.summary);
        }
    }

    /// Moves a live entry to a new session id, used when the stored session expired
    /// mid-connection and was replaced.
    pub fn rekey(&self, old_id: &str, new_id: &str, created_at: DateTime<Utc>) {
        let mut entries = self.lock_entries();
        if let Some(mut entry) = entries.remove(old_id) {
            entry.summary.created_at = created_at;
            entry.summary.message_count = 0;
            entries.insert(new_id.to_string(), entry);
        }
    }

    /// Removes the entry only if it still belongs to `connection_id`.
    pub fn remove(&self, session_id: &str, connection_id: u64) -> bool {
        let mut entries = self.lock_entries();
        match entries.get(session_id) {
            Some(entry) if entry.connection_id == connection_id => {
                entries.remove(session_id);
                true
            }
            _ => false,
        }
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.lock_entries().contains_key(session_id)
    }

    pub fn active_count(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn snapshot(&self) -> Vec<LiveSessionInfo> {
        let mut sessions = self
            .lock_entries()
            .iter()
            .map(|(session_id, entry)| LiveSessionInfo {
                session_id: session_id.clone(),
                language: entry.summary.language,
                created_at: entry.summary.created_at,
                is_active: true,
                has_frame: entry.summary.has_frame,
                message_count: entry.summary.message_count,
            })
            .collect::<Vec<_>>();
        sessions.sort_by(|left, right| left.created_at.cmp(&right.created_at));
        sessions
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Signals every socket task to close and forgets all entries.
    pub fn drain(&self) {
        if self.shutdown_tx.send(true).is_err() {
            warn!("no live connections were listening for shutdown");
        }
        let drained = {
            let mut entries = self.lock_entries();
            let count = entries.len();
            entries.clear();
            count
        };
        info!(drained, "live registry drained");
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, LiveEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
