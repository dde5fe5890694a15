//! In-process session backend with lazy TTL expiry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::{SessionError, SessionState, SessionStore};

/// Entry count above which expired sessions are swept on write.
const SWEEP_THRESHOLD: usize = 1024;

struct Entry {
    state: SessionState,
    expires_at: Instant,
}

/// TTL-expiring session map. Suitable for a single server process.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored (possibly expired) sessions.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the store holds no sessions.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<SessionState>, SessionError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(id) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.state.clone())),
            Some(_) => {
                entries.remove(id);
                debug!(session_id = id, "session expired");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        id: &str,
        state: &SessionState,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        if let Some(existing) = entries.get(id) {
            if existing.expires_at > now && existing.state.version != state.version {
                return Err(SessionError::Conflict {
                    id: id.to_owned(),
                    expected: state.version,
                });
            }
        }

        if entries.len() > SWEEP_THRESHOLD {
            entries.retain(|_, e| e.expires_at > now);
        }

        let mut stored = state.clone();
        stored.version = state.next_version();
        let expires_at = now.checked_add(ttl).unwrap_or(now);
        entries.insert(
            id.to_owned(),
            Entry {
                state: stored,
                expires_at,
            },
        );
        Ok(())
    }

    async fn clear(&self, id: &str) -> Result<(), SessionError> {
        self.entries.lock().await.remove(id);
        Ok(())
    }
}
