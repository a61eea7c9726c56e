use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use time::OffsetDateTime;

use crate::clock::Clock;
use crate::filestore::generate_file_id;

/// Resumable sessions live for two hours after "start".
pub const UPLOAD_SESSION_TTL: time::Duration = time::Duration::hours(2);

#[derive(Debug)]
struct ExpiringEntry<V> {
    value: V,
    expires_at: OffsetDateTime,
}

/// Map whose entries vanish once their deadline passes. Expired entries are
/// dropped on lookup; nothing sweeps in the background.
#[derive(Debug)]
pub struct ExpiringMap<V> {
    entries: Mutex<HashMap<String, ExpiringEntry<V>>>,
}

impl<V> Default for ExpiringMap<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V: Clone> ExpiringMap<V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ExpiringEntry<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, key: String, value: V, expires_at: OffsetDateTime) {
        self.lock().insert(key, ExpiringEntry { value, expires_at });
    }

    pub fn get(&self, key: &str, now: OffsetDateTime) -> Option<V> {
        let mut entries = self.lock();
        let entry = entries.get(key)?;
        if now > entry.expires_at {
            entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().remove(key).map(|entry| entry.value)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    pub credential_id: String,
    pub upstream_upload_url: String,
}

/// Binds proxy-issued session tokens to the credential and upstream URL that
/// produced them.
pub struct UploadSessions {
    sessions: ExpiringMap<UploadSession>,
    ttl: time::Duration,
    clock: Arc<dyn Clock>,
}

impl UploadSessions {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: ExpiringMap::default(),
            ttl: UPLOAD_SESSION_TTL,
            clock,
        }
    }

    /// Returns the fresh token handed to the client.
    pub fn bind(&self, session: UploadSession) -> String {
        let token = generate_file_id();
        let expires_at = self.clock.now() + self.ttl;
        self.sessions.insert(token.clone(), session, expires_at);
        token
    }

    pub fn lookup(&self, token: &str) -> Option<UploadSession> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        self.sessions.get(token, self.clock.now())
    }

    pub fn drop_session(&self, token: &str) {
        self.sessions.remove(token.trim());
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl std::fmt::Debug for UploadSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSessions")
            .field("len", &self.sessions.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn session(id: &str) -> UploadSession {
        UploadSession {
            credential_id: id.to_string(),
            upstream_upload_url: format!("https://upstream.test/upload?upload_id={id}"),
        }
    }

    #[test]
    fn expired_entries_are_evicted_on_lookup() {
        let map = ExpiringMap::default();
        let now = OffsetDateTime::UNIX_EPOCH;
        map.insert("a".to_string(), 1u32, now + time::Duration::seconds(10));

        assert_eq!(map.get("a", now), Some(1));
        assert_eq!(map.get("a", now + time::Duration::seconds(10)), Some(1));
        assert_eq!(map.get("a", now + time::Duration::seconds(11)), None);
        assert!(map.is_empty());
    }

    #[test]
    fn sessions_expire_after_two_hours() {
        let clock = Arc::new(ManualClock::default());
        let sessions = UploadSessions::new(clock.clone());

        let token = sessions.bind(session("c1"));
        assert_eq!(token.len(), 32);
        assert_eq!(sessions.lookup(&token), Some(session("c1")));

        clock.advance(time::Duration::hours(2) + time::Duration::seconds(1));
        assert_eq!(sessions.lookup(&token), None);
        assert!(sessions.is_empty());
    }

    #[test]
    fn dropped_sessions_are_gone() {
        let sessions = UploadSessions::new(Arc::new(ManualClock::default()));
        let token = sessions.bind(session("c2"));
        sessions.drop_session(&token);
        assert_eq!(sessions.lookup(&token), None);
        assert_eq!(sessions.lookup(""), None);
    }
}
