//! Session state - most recent exchange per session id

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::types::{SessionId, Subtask, SynthesizedResponse};

/// Latest query, plan and response recorded for a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: SessionId,
    pub last_query: String,
    pub last_decomposition: Vec<Subtask>,
    pub last_response: SynthesizedResponse,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        session_id: SessionId,
        last_query: String,
        last_decomposition: Vec<Subtask>,
        last_response: SynthesizedResponse,
    ) -> Self {
        Self {
            session_id,
            last_query,
            last_decomposition,
            last_response,
            updated_at: Utc::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        match ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()) {
            Some(ttl) => now - self.updated_at > ttl,
            None => false,
        }
    }
}

/// In-memory session map.
///
/// Writes for the same id race with last-write-wins semantics. Entries
/// older than the TTL read as missing and are dropped by [`evict_expired`].
///
/// [`evict_expired`]: SessionStore::evict_expired
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    ttl: Option<Duration>,
}

impl SessionStore {
    pub fn new(ttl: Option<Duration>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Insert or overwrite the session
    pub fn upsert(&self, session: Session) {
        let id = session.session_id.clone();
        let existed = self.sessions.write().insert(id.clone(), session).is_some();
        debug!(session_id = %id, existed, "Session updated");
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        let now = Utc::now();
        self.sessions
            .read()
            .get(id)
            .filter(|s| !s.is_expired(self.ttl, now))
            .cloned()
    }

    pub fn delete(&self, id: &SessionId) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            info!(session_id = %id, "Session deleted");
        }
        removed
    }

    /// Drop expired sessions, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(self.ttl, now));
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, "Evicted expired sessions");
        }
        evicted
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(query: &str) -> SynthesizedResponse {
        SynthesizedResponse {
            query: query.to_string(),
            results: vec![],
            summary: "ok".into(),
            succeeded_count: 0,
            failed_count: 0,
            latency_ms: 1,
        }
    }

    fn session(id: &str, query: &str) -> Session {
        Session::new(id.into(), query.into(), vec![], response(query))
    }

    #[test]
    fn test_store_creation() {
        let store = SessionStore::new(None);
        assert!(store.is_empty());
        assert!(store.get(&"nope".into()).is_none());
    }

    #[test]
    fn test_upsert_overwrites() {
        let store = SessionStore::new(None);
        store.upsert(session("s1", "first"));
        store.upsert(session("s1", "second"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"s1".into()).unwrap().last_query, "second");
    }

    #[test]
    fn test_delete() {
        let store = SessionStore::new(None);
        store.upsert(session("s1", "q"));
        assert!(store.delete(&"s1".into()));
        assert!(!store.delete(&"s1".into()));
        assert!(store.get(&"s1".into()).is_none());
    }

    #[test]
    fn test_expired_sessions_read_as_missing() {
        let store = SessionStore::new(Some(Duration::from_secs(60)));
        let mut stale = session("old", "q");
        stale.updated_at = Utc::now() - chrono::Duration::minutes(5);
        store.upsert(stale);
        store.upsert(session("fresh", "q"));

        assert!(store.get(&"old".into()).is_none());
        assert!(store.get(&"fresh".into()).is_some());
        assert_eq!(store.len(), 2);

        assert_eq!(store.evict_expired(), 1);
        assert_eq!(store.session_ids(), vec![SessionId::new("fresh")]);
    }

    #[test]
    fn test_no_ttl_never_evicts() {
        let store = SessionStore::new(None);
        let mut ancient = session("old", "q");
        ancient.updated_at = Utc::now() - chrono::Duration::days(365);
        store.upsert(ancient);

        assert!(store.get(&"old".into()).is_some());
        assert_eq!(store.evict_expired(), 0);
    }
}
