//! SQLite rendition of the patient datastore (`patients` table).

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use super::{CallerId, PatientStore, PatientSummary, StoreError, SummaryStats};
use crate::draft::EntityDraft;

type SummaryRow = (String, String, String, String, String, String);

/// Patient store on a migrated SQLite pool.
pub struct SqlitePatientStore {
    db: SqlitePool,
}

impl SqlitePatientStore {
    /// Create a store on a pool whose schema is already migrated.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

/// Escape `LIKE` metacharacters so user input matches literally.
fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn limit_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn to_summary(row: SummaryRow) -> PatientSummary {
    let (id, nombre, edad, telefono, status, created_at) = row;
    PatientSummary {
        id,
        nombre,
        edad,
        telefono,
        status,
        created_at,
    }
}

#[async_trait]
impl PatientStore for SqlitePatientStore {
    async fn search_by_name(
        &self,
        owner: &CallerId,
        term: &str,
        limit: usize,
    ) -> Result<Vec<PatientSummary>, StoreError> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            "SELECT id, nombre, edad, telefono, status, created_at FROM patients \
             WHERE owner_id = ?1 AND nombre LIKE ?2 ESCAPE '\\' \
             ORDER BY created_at DESC, rowid DESC LIMIT ?3",
        )
        .bind(owner.as_str())
        .bind(like_pattern(term.trim()))
        .bind(limit_i64(limit))
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(to_summary).collect())
    }

    async fn recent(
        &self,
        owner: &CallerId,
        limit: usize,
    ) -> Result<Vec<PatientSummary>, StoreError> {
        let rows: Vec<SummaryRow> = sqlx::query_as(
            "SELECT id, nombre, edad, telefono, status, created_at FROM patients \
             WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )
        .bind(owner.as_str())
        .bind(limit_i64(limit))
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(to_summary).collect())
    }

    async fn summary_stats(&self, owner: &CallerId) -> Result<SummaryStats, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM patients WHERE owner_id = ?1 GROUP BY status",
        )
        .bind(owner.as_str())
        .fetch_all(&self.db)
        .await?;

        let mut stats = SummaryStats::default();
        for (status, count) in rows {
            let count = u64::try_from(count).unwrap_or_default();
            stats.total = stats.total.saturating_add(count);
            stats.per_status.insert(status, count);
        }
        Ok(stats)
    }

    async fn insert(&self, owner: &CallerId, draft: &EntityDraft) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO patients (id, owner_id, nombre, edad, sexo, telefono, motivo_consulta, \
             fecha_consulta, alergias, antecedentes, embarazo) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&id)
        .bind(owner.as_str())
        .bind(draft.get("nombre"))
        .bind(draft.get("edad"))
        .bind(draft.get("sexo"))
        .bind(draft.get("telefono"))
        .bind(draft.get("motivo_consulta"))
        .bind(draft.get("fecha_consulta"))
        .bind(draft.get("alergias"))
        .bind(draft.get("antecedentes"))
        .bind(draft.get("embarazo"))
        .execute(&self.db)
        .await?;

        debug!(patient_id = %id, "patient inserted");
        Ok(id)
    }
}
