use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::Session;

pub type MirrorFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, MirrorError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("session mirror backend failed: {0}")]
    Backend(String),
    #[error("session mirror payload is invalid: {0}")]
    InvalidPayload(String),
}

/// Durable copy of the session map. Every call is best-effort from the store's point
/// of view: failures are logged and never surface to the caller of the store.
pub trait SessionMirror: Send + Sync {
    fn save<'a>(&'a self, session: &'a Session, ttl_seconds: u64) -> MirrorFuture<'a, ()>;
    fn load<'a>(&'a self, session_id: &'a str) -> MirrorFuture<'a, Option<Session>>;
    fn delete<'a>(&'a self, session_id: &'a str) -> MirrorFuture<'a, bool>;
    fn ping(&self) -> MirrorFuture<'_, ()>;
}

#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    ttl: Duration,
    mirror: Option<Arc<dyn SessionMirror>>,
}

impl SessionStore {
    pub fn in_memory(ttl_seconds: u64) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl: Duration::try_seconds(i64::try_from(ttl_seconds).unwrap_or(i64::MAX))
                .unwrap_or(Duration::MAX),
            mirror: None,
        }
    }

    pub fn with_mirror(ttl_seconds: u64, mirror: Arc<dyn SessionMirror>) -> Self {
        Self {
            mirror: Some(mirror),
            ..Self::in_memory(ttl_seconds)
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    /// Returns the live session for `session_id`, or a freshly allocated one when the id
    /// is missing, unknown or expired. New sessions are persisted before returning.
    pub async fn get_or_create(&self, session_id: Option<&str>) -> Session {
        if let Some(session_id) = session_id.map(str::trim).filter(|id| !id.is_empty())
            && let Some(session) = self.get(session_id).await
        {
            return session;
        }

        let session = Session::new();
        self.lock_sessions()
            .insert(session.id().to_string(), session.clone());
        self.mirror_save(&session).await;
        info!(
            session_id = %session.id(),
            requested_session_id = session_id.unwrap_or_default(),
            "created session"
        );
        session
    }

    /// Non-creating lookup. Expired sessions are evicted and reported as absent.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let now = Utc::now();
        let cached = self.lock_sessions().get(session_id).cloned();

        let candidate = match cached {
            Some(session) => Some(session),
            None => self.mirror_load(session_id).await,
        };

        let session = candidate?;
        if session.is_expired(self.ttl, now) {
            debug!(session_id, "session expired on access");
            self.lock_sessions().remove(session_id);
            self.mirror_delete(session_id).await;
            return None;
        }

        self.lock_sessions()
            .entry(session_id.to_string())
            .or_insert_with(|| session.clone());
        Some(session)
    }

    /// Upserts the whole session. Concurrent writers to the same id resolve as
    /// last-writer-wins; the stored message list is always one writer's copy.
    pub async fn save(&self, session: &Session) {
        self.lock_sessions()
            .insert(session.id().to_string(), session.clone());
        self.mirror_save(session).await;
    }

    pub async fn delete(&self, session_id: &str) -> bool {
        let removed_in_memory = self.lock_sessions().remove(session_id).is_some();
        let removed_in_mirror = match self.mirror.as_ref() {
            Some(mirror) => match mirror.delete(session_id).await {
                Ok(removed) => removed,
                Err(err) => {
                    warn!(session_id, error = %err, "session mirror delete failed");
                    false
                }
            },
            None => false,
        };

        let removed = removed_in_memory || removed_in_mirror;
        if removed {
            info!(session_id, "deleted session");
        }
        removed
    }

    /// Drops every session older than the TTL and returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired_ids = {
            let mut sessions = self.lock_sessions();
            let expired_ids = sessions
                .iter()
                .filter(|(_, session)| session.is_expired(self.ttl, now))
                .map(|(id, _)| id.clone())
                .collect::<Vec<_>>();
            for id in &expired_ids {
                sessions.remove(id);
            }
            expired_ids
        };

        for id in &expired_ids {
            self.mirror_delete(id).await;
        }

        expired_ids.len()
    }

    pub fn len(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn ping_mirror(&self) -> Result<(), MirrorError> {
        match self.mirror.as_ref() {
            Some(mirror) => mirror.ping().await,
            None => Ok(()),
        }
    }

    async fn mirror_save(&self, session: &Session) {
        let Some(mirror) = self.mirror.as_ref() else {
            return;
        };

        let remaining = self
            .ttl
            .checked_sub(&session.age(Utc::now()))
            .unwrap_or(self.ttl);
        let ttl_seconds = u64::try_from(remaining.num_seconds()).unwrap_or(0).max(1);
        if let Err(err) = mirror.save(session, ttl_seconds).await {
            warn!(session_id = %session.id(), error = %err, "session mirror write failed");
        }
    }

    async fn mirror_load(&self, session_id: &str) -> Option<Session> {
        let mirror = self.mirror.as_ref()?;
        match mirror.load(session_id).await {
            Ok(session) => session,
            Err(err) => {
                warn!(session_id, error = %err, "session mirror read failed");
                None
            }
        }
    }

    async fn mirror_delete(&self, session_id: &str) {
        let Some(mirror) = self.mirror.as_ref() else {
            return;
        };
        if let Err(err) = mirror.delete(session_id).await {
            warn!(session_id, error = %err, "session mirror delete failed");
        }
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    use chrono::{Duration, Utc};

    use super::{MirrorError, MirrorFuture, SessionMirror, SessionStore};
    use crate::session::{Role, Session};

    #[derive(Default)]
    struct MapMirror {
        saved: Mutex<HashMap<String, Session>>,
    }

    impl SessionMirror for MapMirror {
        fn save<'a>(&'a self, session: &'a Session, _ttl_seconds: u64) -> MirrorFuture<'a, ()> {
            Box::pin(async move {
                self.saved
                    .lock()
                    .expect("mirror lock should not be poisoned")
                    .insert(session.id().to_string(), session.clone());
                Ok(())
            })
        }

        fn load<'a>(&'a self, session_id: &'a str) -> MirrorFuture<'a, Option<Session>> {
            Box::pin(async move {
                Ok(self
                    .saved
                    .lock()
                    .expect("mirror lock should not be poisoned")
                    .get(session_id)
                    .cloned())
            })
        }

        fn delete<'a>(&'a self, session_id: &'a str) -> MirrorFuture<'a, bool> {
            Box::pin(async move {
                Ok(self
                    .saved
                    .lock()
                    .expect("mirror lock should not be poisoned")
                    .remove(session_id)
                    .is_some())
            })
        }

        fn ping(&self) -> MirrorFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    struct BrokenMirror;

    impl SessionMirror for BrokenMirror {
        fn save<'a>(&'a self, _session: &'a Session, _ttl_seconds: u64) -> MirrorFuture<'a, ()> {
            Box::pin(async { Err(MirrorError::Backend("connection refused".to_string())) })
        }

        fn load<'a>(&'a self, _session_id: &'a str) -> MirrorFuture<'a, Option<Session>> {
            Box::pin(async { Err(MirrorError::Backend("connection refused".to_string())) })
        }

        fn delete<'a>(&'a self, _session_id: &'a str) -> MirrorFuture<'a, bool> {
            Box::pin(async { Err(MirrorError::Backend("connection refused".to_string())) })
        }

        fn ping(&self) -> MirrorFuture<'_, ()> {
            Box::pin(async { Err(MirrorError::Backend("connection refused".to_string())) })
        }
    }

    #[tokio::test]
    async fn get_or_create_without_id_always_allocates_a_fresh_session() {
        let store = SessionStore::in_memory(3600);
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let session = store.get_or_create(None).await;
            assert!(seen.insert(session.id().to_string()), "ids must never repeat");
        }
        assert_eq!(store.len(), 50);
    }

    #[tokio::test]
    async fn get_or_create_returns_stored_session_unmodified() {
        let store = SessionStore::in_memory(3600);
        let mut session = store.get_or_create(None).await;
        session.add_message(Role::User, "hello");
        store.save(&session).await;

        let fetched = store.get_or_create(Some(session.id())).await;
        assert_eq!(fetched, session);
    }

    #[tokio::test]
    async fn get_or_create_replaces_unknown_and_expired_ids() {
        let store = SessionStore::in_memory(60);

        let unknown = store.get_or_create(Some("not-a-real-session")).await;
        assert_ne!(unknown.id(), "not-a-real-session");

        let expired = Session::starting_at(Utc::now() - Duration::seconds(61));
        let expired_id = expired.id().to_string();
        store.save(&expired).await;

        let replacement = store.get_or_create(Some(&expired_id)).await;
        assert_ne!(replacement.id(), expired_id);
        assert!(store.get(&expired_id).await.is_none());
    }

    #[tokio::test]
    async fn delete_reports_whether_anything_was_removed() {
        let store = SessionStore::in_memory(3600);
        let session = store.get_or_create(None).await;

        assert!(store.delete(session.id()).await);
        assert!(!store.delete(session.id()).await);
        assert!(store.get(session.id()).await.is_none());
    }

    #[tokio::test]
    async fn sweep_expired_removes_only_stale_sessions() {
        let store = SessionStore::in_memory(60);
        let fresh = store.get_or_create(None).await;
        for _ in 0..3 {
            store
                .save(&Session::starting_at(Utc::now() - Duration::seconds(120)))
                .await;
        }

        assert_eq!(store.sweep_expired().await, 3);
        assert_eq!(store.len(), 1);
        assert!(store.get(fresh.id()).await.is_some());
    }

    #[tokio::test]
    async fn mirror_rehydrates_sessions_missing_from_memory() {
        let mirror = Arc::new(MapMirror::default());
        let first = SessionStore::with_mirror(3600, mirror.clone());
        let mut session = first.get_or_create(None).await;
        session.add_message(Role::User, "is this a whitefly?");
        first.save(&session).await;

        let restarted = SessionStore::with_mirror(3600, mirror);
        let restored = restarted.get_or_create(Some(session.id())).await;
        assert_eq!(restored.id(), session.id());
        assert_eq!(restored.messages.len(), 1);
    }

    #[tokio::test]
    async fn mirror_failures_do_not_fail_store_operations() {
        let store = SessionStore::with_mirror(3600, Arc::new(BrokenMirror));
        let mut session = store.get_or_create(None).await;
        session.add_message(Role::Assistant, "still works");
        store.save(&session).await;

        let fetched = store.get(session.id()).await.expect("memory copy is authoritative");
        assert_eq!(fetched.messages.len(), 1);
        assert!(store.delete(session.id()).await);
        assert!(store.ping_mirror().await.is_err());
    }

    #[tokio::test]
    async fn concurrent_writers_to_distinct_sessions_do_not_interfere() {
        let store = SessionStore::in_memory(3600);
        let mut tasks = Vec::new();
        for index in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let mut session = store.get_or_create(None).await;
                for turn in 0..10 {
                    session.add_message(Role::User, format!("session {index} turn {turn}"));
                    store.save(&session).await;
                }
                (index, session.id().to_string())
            }));
        }

        for task in tasks {
            let (index, id) = task.await.expect("writer task should join");
            let session = store.get(&id).await.expect("session should exist");
            let prefix = format!("session {index} turn");
            assert_eq!(session.messages.len(), 10);
            assert!(
                session
                    .messages
                    .iter()
                    .all(|message| message.content.starts_with(&prefix))
            );
        }
    }
}
