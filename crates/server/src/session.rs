//! Bearer-token sessions.

use chrono::{DateTime, Duration, Utc};
use sheetfind_core::UserId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Ten years; longer lifetimes are clamped
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone)]
struct Session {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

/// A freshly issued token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// In-memory token table; tokens do not survive a restart.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64),
        }
    }

    /// Issue a token for `user_id`, dropping any expired sessions.
    pub fn create(&self, user_id: UserId) -> IssuedToken {
        let now = Utc::now();
        let token = uuid::Uuid::new_v4().to_string();
        let expires_at = now + self.ttl;

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(token.clone(), Session { user_id, expires_at });

        IssuedToken { token, expires_at }
    }

    /// User behind a live token
    pub fn resolve(&self, token: &str) -> Option<UserId> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(token)
            .filter(|s| s.expires_at > Utc::now())
            .map(|s| s.user_id)
    }

    /// Forget one token. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .is_some()
    }

    /// Forget every token of a user.
    pub fn revoke_user(&self, user_id: UserId) -> usize {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, s| s.user_id != user_id);
        before - sessions.len()
    }
}
