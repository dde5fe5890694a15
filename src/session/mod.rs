//! Short-lived per-caller conversation state.
//!
//! The [`SessionStore`] trait hides where state lives. Three backends:
//! - [`cookie::CookieSessionStore`]: the state itself rides in a cookie
//! - [`memory::MemorySessionStore`]: TTL map in process memory
//! - [`sqlite::SqliteSessionStore`]: `intake_sessions` table
//!
//! Server-side backends use an optimistic `version` check so a double
//! submit from the same caller is detected instead of silently lost.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::draft::EntityDraft;

pub mod cookie;
pub mod memory;
pub mod sqlite;

/// Default session lifetime (12 hours).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// A patient offered to the caller after an ambiguous search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCandidate {
    /// Record identifier.
    pub id: String,
    /// Display name.
    pub nombre: String,
}

/// Everything remembered between turns for one caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// The entity being assembled.
    #[serde(default)]
    pub draft: EntityDraft,
    /// Pending disambiguation candidates from the last search.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<SearchCandidate>,
    /// Version this state was loaded at (0 = never stored).
    #[serde(default)]
    pub version: u64,
}

impl SessionState {
    /// Fresh state around `draft`.
    pub fn with_draft(draft: EntityDraft) -> Self {
        Self {
            draft,
            candidates: Vec::new(),
            version: 0,
        }
    }

    /// The version a successful `set` will store.
    pub fn next_version(&self) -> u64 {
        self.version.saturating_add(1)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by session backends.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The stored record changed since it was loaded.
    #[error("session {id} was modified concurrently (expected version {expected})")]
    Conflict {
        /// Session identifier.
        id: String,
        /// Version the writer loaded.
        expected: u64,
    },
    /// State could not be (de)serialized.
    #[error("session encoding error: {0}")]
    Encoding(String),
    /// Encoded state exceeds the backend's size limit.
    #[error("session state too large: {bytes} bytes")]
    TooLarge {
        /// Encoded size.
        bytes: usize,
    },
    /// Backend storage failure.
    #[error("session storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(e: serde_json::Error) -> Self {
        Self::Encoding(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Key/value session interface used by the intake engine.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the state for `id`, or `None` when absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend or decoding failure.
    async fn get(&self, id: &str) -> Result<Option<SessionState>, SessionError>;

    /// Store `state` for `ttl`. Stored version becomes `state.version + 1`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Conflict`] when a newer version is stored.
    async fn set(&self, id: &str, state: &SessionState, ttl: Duration)
        -> Result<(), SessionError>;

    /// Delete the state for `id`. Deleting an absent session is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on backend failure.
    async fn clear(&self, id: &str) -> Result<(), SessionError>;
}

/// Which backend the server uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    /// State in the `intake_draft` cookie.
    #[default]
    Cookie,
    /// Process memory.
    Memory,
    /// SQLite table.
    Sqlite,
}
