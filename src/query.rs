//! Read-only operations for the intake flow, scoped to the caller.
//!
//! Wraps a [`PatientStore`] and converts every failure into a
//! [`QueryError`] whose user-facing text never carries raw driver output
//! beyond a truncated detail.

use std::sync::Arc;

use tracing::warn;

use crate::providers::truncate_diagnostic;
use crate::store::{CallerId, PatientStore, PatientSummary, StoreError, SummaryStats};

/// Default row count for [`QueryExecutor::recent_listing`].
pub const DEFAULT_RECENT_LIMIT: usize = 10;

/// Upper bound on rows fetched for a name search.
pub const MAX_SEARCH_ROWS: usize = 200;

/// Failure of a read-only query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    /// No authenticated caller.
    #[error("authentication required")]
    Unauthenticated,
    /// Datastore failure with truncated detail.
    #[error("datastore unavailable: {detail}")]
    Datastore {
        /// Truncated driver text.
        detail: String,
    },
}

impl QueryError {
    /// Message safe to show the caller.
    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthenticated => {
                "Necesitas iniciar sesión para consultar tus pacientes.".to_owned()
            }
            Self::Datastore { detail } => {
                format!("No pude consultar los registros en este momento ({detail}).")
            }
        }
    }
}

impl From<StoreError> for QueryError {
    fn from(e: StoreError) -> Self {
        warn!(error = %e, "datastore query failed");
        Self::Datastore {
            detail: truncate_diagnostic(&e.to_string()),
        }
    }
}

/// Caller-scoped queries over the patient datastore.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn PatientStore>,
}

impl QueryExecutor {
    /// Wrap a datastore handle.
    pub fn new(store: Arc<dyn PatientStore>) -> Self {
        Self { store }
    }

    /// Case-insensitive substring search on the name, newest first.
    ///
    /// # Errors
    ///
    /// [`QueryError::Unauthenticated`] without a caller, else datastore errors.
    pub async fn search_by_name(
        &self,
        caller: Option<&CallerId>,
        term: &str,
    ) -> Result<Vec<PatientSummary>, QueryError> {
        let owner = caller.ok_or(QueryError::Unauthenticated)?;
        Ok(self.store.search_by_name(owner, term, MAX_SEARCH_ROWS).await?)
    }

    /// Total and per-status counts.
    ///
    /// # Errors
    ///
    /// [`QueryError::Unauthenticated`] without a caller, else datastore errors.
    pub async fn summary_stats(&self, caller: Option<&CallerId>) -> Result<SummaryStats, QueryError> {
        let owner = caller.ok_or(QueryError::Unauthenticated)?;
        Ok(self.store.summary_stats(owner).await?)
    }

    /// Most recent records, newest first.
    ///
    /// # Errors
    ///
    /// [`QueryError::Unauthenticated`] without a caller, else datastore errors.
    pub async fn recent_listing(
        &self,
        caller: Option<&CallerId>,
        limit: usize,
    ) -> Result<Vec<PatientSummary>, QueryError> {
        let owner = caller.ok_or(QueryError::Unauthenticated)?;
        Ok(self.store.recent(owner, limit).await?)
    }
}
