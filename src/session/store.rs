//! Cache of live gateway sessions keyed by (server, username, database).

use std::collections::HashMap;
use std::fmt::Debug;

use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub server: String,
    pub username: String,
    pub database: String,
}

impl SessionKey {
    pub fn new(server: &str, username: &str, database: &str) -> Self {
        Self {
            server: server.trim_end_matches('/').to_string(),
            username: username.to_string(),
            database: database.to_string(),
        }
    }
}

/// Identifiers handed out by a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIds {
    pub session_id: String,
    pub connection_id: Option<String>,
}

pub trait SessionStore: Send + Sync + Debug {
    fn get(&self, key: &SessionKey) -> Option<SessionIds>;
    fn put(&self, key: SessionKey, ids: SessionIds);
    fn remove(&self, key: &SessionKey) -> Option<SessionIds>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: RwLock<HashMap<SessionKey, SessionIds>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.inner.read().len() }
    pub fn is_empty(&self) -> bool { self.inner.read().is_empty() }
}

impl SessionStore for InMemorySessionStore {
    fn get(&self, key: &SessionKey) -> Option<SessionIds> { self.inner.read().get(key).cloned() }

    fn put(&self, key: SessionKey, ids: SessionIds) { self.inner.write().insert(key, ids); }

    fn remove(&self, key: &SessionKey) -> Option<SessionIds> { self.inner.write().remove(key) }
}
