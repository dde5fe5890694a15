//! SQLite session backend (`intake_sessions` table).

use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use super::{SessionError, SessionState, SessionStore};

/// Persists session state across server restarts.
pub struct SqliteSessionStore {
    db: SqlitePool,
}

impl SqliteSessionStore {
    /// Create a store on a pool whose schema is already migrated.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Delete expired rows. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Storage`] if the delete fails.
    pub async fn purge_expired(&self) -> Result<u64, SessionError> {
        let result = sqlx::query("DELETE FROM intake_sessions WHERE expires_at <= ?1")
            .bind(now_secs())
            .execute(&self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, id: &str) -> Result<Option<SessionState>, SessionError> {
        let row: Option<(String, i64)> = sqlx::query_as(
            "SELECT state_json, version FROM intake_sessions WHERE id = ?1 AND expires_at > ?2",
        )
        .bind(id)
        .bind(now_secs())
        .fetch_optional(&self.db)
        .await?;

        let Some((json, version)) = row else {
            return Ok(None);
        };
        let mut state: SessionState = serde_json::from_str(&json)?;
        state.version = u64::try_from(version).unwrap_or_default();
        Ok(Some(state))
    }

    async fn set(
        &self,
        id: &str,
        state: &SessionState,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        let now = now_secs();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl_secs);
        let expected = i64::try_from(state.version).unwrap_or(i64::MAX);
        let next = i64::try_from(state.next_version()).unwrap_or(i64::MAX);
        let json = serde_json::to_string(state)?;

        // The conflict clause only overwrites a live row still at the loaded
        // version; expired rows are always replaceable.
        let result = sqlx::query(
            "INSERT INTO intake_sessions (id, state_json, version, expires_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(id) DO UPDATE SET \
                 state_json = excluded.state_json, \
                 version = excluded.version, \
                 expires_at = excluded.expires_at \
             WHERE intake_sessions.version = ?5 OR intake_sessions.expires_at <= ?6",
        )
        .bind(id)
        .bind(json)
        .bind(next)
        .bind(expires_at)
        .bind(expected)
        .bind(now)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SessionError::Conflict {
                id: id.to_owned(),
                expected: state.version,
            });
        }
        debug!(session_id = id, version = next, "session stored");
        Ok(())
    }

    async fn clear(&self, id: &str) -> Result<(), SessionError> {
        sqlx::query("DELETE FROM intake_sessions WHERE id = ?1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
