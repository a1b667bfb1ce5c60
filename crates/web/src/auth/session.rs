//! Browser session table.
//!
//! Maps the opaque `user-session` token handed to the browser to the upstream
//! session cookie it stands for. Entries live in memory only and are lost on
//! restart.

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Client-facing session token
pub type SessionToken = String;

/// Upstream session cookie, kept as the raw `name=value` pair
pub type UpstreamCookie = String;

/// Concurrent token → upstream cookie map, cheap to clone and share.
#[derive(Clone, Default)]
pub struct SessionStore {
    entries: Arc<DashMap<SessionToken, UpstreamCookie>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh token for `cookie` and store it.
    pub fn create(&self, cookie: UpstreamCookie) -> SessionToken {
        let token = Uuid::new_v4().to_string();
        self.entries.insert(token.clone(), cookie);
        token
    }

    /// Insert or replace the cookie for `token`.
    pub fn store(&self, token: &str, cookie: UpstreamCookie) {
        self.entries.insert(token.to_string(), cookie);
    }

    pub fn load(&self, token: &str) -> Option<UpstreamCookie> {
        self.entries.get(token).map(|entry| entry.value().clone())
    }

    /// Remove `token`. Returns whether it was present.
    pub fn delete(&self, token: &str) -> bool {
        self.entries.remove(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
