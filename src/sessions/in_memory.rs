//! In-memory session store implementation.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::session::{generate_session_id, Session, MAX_HISTORY_MESSAGES};
use super::traits::{SessionHandle, SessionStore};

/// An in-memory session store backed by a mutex-protected hash map.
///
/// The map lock is only held for lookups and inserts; each session has its
/// own async lock for the duration of a turn.
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
    history_limit: usize,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::with_history_limit(MAX_HISTORY_MESSAGES)
    }

    /// Store whose sessions keep at most `limit` turns.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            history_limit: limit,
        }
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, id: Option<&str>) -> Result<SessionHandle> {
        let mut sessions = self.sessions.lock();

        let id = match id {
            Some(id) => {
                if let Some(existing) = sessions.get(id) {
                    return Ok(Arc::clone(existing));
                }
                id.to_string()
            }
            None => loop {
                let candidate = generate_session_id();
                if !sessions.contains_key(&candidate) {
                    break candidate;
                }
            },
        };

        let handle = Arc::new(tokio::sync::Mutex::new(Session::with_history_limit(
            id.clone(),
            self.history_limit,
        )));
        sessions.insert(id.clone(), Arc::clone(&handle));
        drop(sessions);

        tracing::debug!(session_id = %id, "Session created");
        Ok(handle)
    }

    async fn get(&self, id: &str) -> Result<Option<SessionHandle>> {
        let sessions = self.sessions.lock();
        Ok(sessions.get(id).cloned())
    }

    async fn ids(&self) -> Result<Vec<String>> {
        let sessions = self.sessions.lock();
        Ok(sessions.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.sessions.lock().clear();
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.sessions.lock().len())
    }

    fn name(&self) -> &str {
        "in_memory"
    }
}
