use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AudioStoreError {
    #[error("failed to prepare audio directory {path}: {message}")]
    Directory { path: String, message: String },
    #[error("failed to write audio file: {0}")]
    Write(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredAudio {
    pub size: usize,
}

#[derive(Debug, Clone)]
struct AudioEntry {
    path: PathBuf,
    stored_at: Instant,
}

/// Holds at most one synthesized reply per session on disk until the client fetches
/// it. Each file is served once; unfetched files are removed by [`AudioStore::sweep_orphans`].
#[derive(Clone)]
pub struct AudioStore {
    dir: PathBuf,
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, AudioEntry>>>,
}

impl AudioStore {
    pub fn new(dir: impl Into<PathBuf>, ttl_seconds: u64) -> Result<Self, AudioStoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|err| AudioStoreError::Directory {
            path: dir.display().to_string(),
            message: err.to_string(),
        })?;

        Ok(Self {
            dir,
            ttl: Duration::from_secs(ttl_seconds),
            entries: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Writes `audio` and registers it as the session's pending reply, replacing any
    /// reply the client never fetched.
    pub async fn store(
        &self,
        session_id: &str,
        audio: &[u8],
    ) -> Result<StoredAudio, AudioStoreError> {
        let path = self.dir.join(format!("{}.mp3", Uuid::new_v4()));
        tokio::fs::write(&path, audio)
            .await
            .map_err(|err| AudioStoreError::Write(err.to_string()))?;

        let replaced = self.lock_entries().insert(
            session_id.to_string(),
            AudioEntry {
                path,
                stored_at: Instant::now(),
            },
        );
        if let Some(previous) = replaced {
            remove_file_best_effort(&previous.path).await;
        }

        Ok(StoredAudio { size: audio.len() })
    }

    /// Returns the pending reply for `session_id` and deletes it.
    pub async fn take(&self, session_id: &str) -> Option<Vec<u8>> {
        let entry = self.lock_entries().remove(session_id)?;
        let audio = match tokio::fs::read(&entry.path).await {
            Ok(audio) => Some(audio),
            Err(err) => {
                warn!(session_id, error = %err, "pending audio file is unreadable");
                None
            }
        };
        remove_file_best_effort(&entry.path).await;
        audio
    }

    pub fn has_pending(&self, session_id: &str) -> bool {
        self.lock_entries().contains_key(session_id)
    }

    /// Drops the pending reply for a session without serving it.
    pub async fn discard(&self, session_id: &str) {
        let entry = self.lock_entries().remove(session_id);
        if let Some(entry) = entry {
            remove_file_best_effort(&entry.path).await;
        }
    }

    /// Removes replies older than the TTL along with stray files left in the directory
    /// by a previous process. Returns how many files were removed.
    pub async fn sweep_orphans(&self) -> usize {
        let expired = {
            let mut entries = self.lock_entries();
            let expired_ids = entries
                .iter()
                .filter(|(_, entry)| entry.stored_at.elapsed() >= self.ttl)
                .map(|(session_id, _)| session_id.clone())
                .collect::<Vec<_>>();
            expired_ids
                .into_iter()
                .filter_map(|session_id| entries.remove(&session_id))
                .collect::<Vec<_>>()
        };

        let mut removed = 0_usize;
        for entry in &expired {
            if remove_file_best_effort(&entry.path).await {
                removed += 1;
            }
        }

        removed + self.sweep_untracked_files().await
    }

    async fn sweep_untracked_files(&self) -> usize {
        let tracked = self
            .lock_entries()
            .values()
            .map(|entry| entry.path.clone())
            .collect::<Vec<_>>();

        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) => {
                warn!(error = %err, dir = %self.dir.display(), "audio directory unreadable");
                return 0;
            }
        };

        let mut removed = 0_usize;
        while let Ok(Some(file)) = dir.next_entry().await {
            let path = file.path();
            if tracked.contains(&path) || path.extension().is_none_or(|ext| ext != "mp3") {
                continue;
            }
            let stale = file
                .metadata()
                .await
                .ok()
                .and_then(|metadata| metadata.modified().ok())
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age >= self.ttl);
            if stale && remove_file_best_effort(&path).await {
                removed += 1;
            }
        }
        removed
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, AudioEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

async fn remove_file_best_effort(path: &Path) -> bool {
    match tokio::fs::remove_file(path).await {
        Ok(()) => true,
        Err(err) => {
            debug!(error = %err, path = %path.display(), "audio file already gone");
            false
        }
    }
}
