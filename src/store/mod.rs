//! Narrow read/write interface to the patient datastore.
//!
//! The datastore is an external collaborator; [`PatientStore`] is the only
//! surface the intake flow touches. Every call is scoped to one owner.
//! [`sqlite::SqlitePatientStore`] is the bundled implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::draft::EntityDraft;

pub mod sqlite;

/// Authenticated caller identity. Records are owned by exactly one caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerId(String);

impl CallerId {
    /// Wrap a non-empty identity; blank input yields `None`.
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_owned()))
    }

    /// The identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Display fields of one stored patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientSummary {
    /// Record identifier.
    pub id: String,
    /// Display name.
    pub nombre: String,
    /// Age as stored (may be empty).
    pub edad: String,
    /// Phone as stored (may be empty).
    pub telefono: String,
    /// Workflow status (e.g. `activo`).
    pub status: String,
    /// Creation timestamp, RFC 3339.
    pub created_at: String,
}

/// Aggregate counts for one owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryStats {
    /// Total records.
    pub total: u64,
    /// Records per status value.
    pub per_status: BTreeMap<String, u64>,
}

/// Datastore failure. Carries driver text; never shown to users untruncated.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Query or connection failure.
    #[error("datastore error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Database(e.to_string())
    }
}

/// Read/write operations on patient records.
#[async_trait]
pub trait PatientStore: Send + Sync {
    /// Case-insensitive substring match on the name, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on datastore failure.
    async fn search_by_name(
        &self,
        owner: &CallerId,
        term: &str,
        limit: usize,
    ) -> Result<Vec<PatientSummary>, StoreError>;

    /// Most recent records, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on datastore failure.
    async fn recent(&self, owner: &CallerId, limit: usize)
        -> Result<Vec<PatientSummary>, StoreError>;

    /// Total and per-status counts, computed in one statement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on datastore failure.
    async fn summary_stats(&self, owner: &CallerId) -> Result<SummaryStats, StoreError>;

    /// Insert a record built from a validated draft. Returns the new id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on datastore failure.
    async fn insert(&self, owner: &CallerId, draft: &EntityDraft) -> Result<String, StoreError>;
}
