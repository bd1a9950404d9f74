//! In-memory admin sessions.
//!
//! Tokens live only as long as the process. Expired entries are evicted
//! lazily on lookup; [`SessionStore::spawn_sweep`] additionally purges them on
//! a timer so abandoned sessions do not accumulate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;
use tokio::time;
use tracing::{debug, info};

/// Sessions are valid for 24 hours after login.
pub const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub username: String,
    /// Unix time in milliseconds.
    pub login_time_ms: i64,
}

impl Session {
    fn is_expired(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.login_time_ms > ttl_ms
    }
}

/// Thread-safe token -> session map shared by every handler.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    ttl_ms: i64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            ttl_ms: ttl.as_millis() as i64,
        }
    }

    pub fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    pub fn create(&self, username: &str) -> String {
        self.create_at(username, Self::now_ms())
    }

    pub fn create_at(&self, username: &str, now_ms: i64) -> String {
        let token = generate_token();
        self.sessions.lock().insert(
            token.clone(),
            Session {
                username: username.to_owned(),
                login_time_ms: now_ms,
            },
        );
        debug!(username, "session created");
        token
    }

    pub fn validate(&self, token: &str) -> Option<Session> {
        self.validate_at(token, Self::now_ms())
    }

    /// Look up `token` as of `now_ms`. An expired entry is removed before
    /// returning `None`, so later lookups miss it outright.
    pub fn validate_at(&self, token: &str, now_ms: i64) -> Option<Session> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get(token)?;
        if session.is_expired(now_ms, self.ttl_ms) {
            sessions.remove(token);
            debug!("evicted expired session");
            return None;
        }
        Some(session.clone())
    }

    /// Remove `token`. Returns true if it was present.
    pub fn invalidate(&self, token: &str) -> bool {
        self.sessions.lock().remove(token).is_some()
    }

    /// Drop every session. Returns how many were dropped.
    pub fn clear_all(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let n = sessions.len();
        sessions.clear();
        n
    }

    pub fn purge_expired(&self, now_ms: i64) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now_ms, self.ttl_ms));
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn a background Tokio task that calls `purge_expired()` every `interval`.
    pub fn spawn_sweep(self, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.tick().await; // skip first immediate tick
            loop {
                ticker.tick().await;
                let removed = self.purge_expired(Self::now_ms());
                if removed > 0 {
                    info!(removed, "purged expired sessions");
                }
            }
        });
    }
}

/// 32 random bytes, hex-encoded.
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;

    #[test]
    fn tokens_are_unique_and_opaque() {
        let store = SessionStore::new();
        let tokens: HashSet<String> = (0..100).map(|_| store.create("admin")).collect();
        assert_eq!(tokens.len(), 100);
        assert!(tokens.iter().all(|t| t.len() == 64));
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn unknown_token_is_rejected() {
        let store = SessionStore::new();
        store.create("admin");
        assert_eq!(store.validate("not-a-token"), None);
        assert_eq!(store.validate(""), None);
    }

    #[test]
    fn session_valid_until_exactly_ttl() {
        let store = SessionStore::new();
        let token = store.create_at("admin", 1_000);
        let s = store.validate_at(&token, 1_000 + DAY_MS).unwrap();
        assert_eq!(s.username, "admin");
        assert_eq!(s.login_time_ms, 1_000);
    }

    #[test]
    fn expired_session_is_evicted() {
        let store = SessionStore::new();
        let token = store.create_at("admin", 1_000);
        assert_eq!(store.validate_at(&token, 1_000 + DAY_MS + 1), None);
        assert!(store.is_empty());
        // Going back in time does not resurrect it.
        assert_eq!(store.validate_at(&token, 1_000), None);
    }

    #[test]
    fn invalidate_is_idempotent() {
        let store = SessionStore::new();
        let token = store.create("admin");
        assert!(store.invalidate(&token));
        assert!(!store.invalidate(&token));
        assert_eq!(store.validate(&token), None);
    }

    #[test]
    fn clear_all_drops_everything() {
        let store = SessionStore::new();
        let a = store.create("admin");
        let b = store.create("admin");
        assert_eq!(store.clear_all(), 2);
        assert_eq!(store.validate(&a), None);
        assert_eq!(store.validate(&b), None);
    }

    #[test]
    fn purge_removes_only_expired() {
        let store = SessionStore::new();
        let old = store.create_at("admin", 0);
        let fresh = store.create_at("admin", DAY_MS);
        assert_eq!(store.purge_expired(DAY_MS + 10), 1);
        assert_eq!(store.validate_at(&old, DAY_MS + 10), None);
        assert!(store.validate_at(&fresh, DAY_MS + 10).is_some());
    }

    #[test]
    fn clones_share_state() {
        let store = SessionStore::new();
        let other = store.clone();
        let token = store.create("admin");
        assert!(other.validate(&token).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_purges_on_its_interval() {
        let store = SessionStore::new();
        store.create_at("admin", 0);
        let fresh = store.create("admin");

        store.clone().spawn_sweep(Duration::from_secs(60));
        time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(store.len(), 1);
        assert!(store.validate(&fresh).is_some());
    }
}
