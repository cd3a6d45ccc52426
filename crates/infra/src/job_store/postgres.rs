//! Postgres-backed job record store.
//!
//! Schema lives in `migrations/0001_job_records.sql` (applied by `migrate()`).
//!
//! ## Deduplication
//!
//! `insert` does not check for duplicates itself. A partial unique index on
//! `name` (restricted to `unique_in_flight` rows that have not completed) makes
//! Postgres reject the second of two racing inserts; the unique violation
//! (`23505`) is mapped to `JobStoreError::DuplicateInFlight`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | JobStoreError |
//! |------------|----------------------|---------------|
//! | Database (unique violation) | `23505` | `DuplicateInFlight` (insert only) |
//! | Database (other) | Any other | `Storage` |
//! | PoolClosed / Io / Other | N/A | `Storage` |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{FromRow, Row};
use tracing::instrument;

use jobtrack_core::{DataUpdate, JobRecord, JobRecordId, JobRecordUpdate, NewJobRecord};

use super::r#trait::{JobRecordStore, JobStoreError};

const SCHEMA: &str = include_str!("../../migrations/0001_job_records.sql");

const SELECT_COLUMNS: &str = r#"
    id,
    name,
    queued_at,
    related_table,
    related_record_id,
    data,
    serialized_payload,
    completed_at,
    success,
    feedback,
    service,
    unique_in_flight
"#;

/// Postgres job record store.
///
/// `Send + Sync`; all access goes through the SQLx connection pool.
///
/// The [`JobRecordStore`] impl is synchronous and blocks on the current tokio
/// runtime with `Handle::block_on`. Call it from a thread that has entered the
/// runtime but is not driving an async task, e.g. inside
/// `tokio::task::spawn_blocking` or a plain thread after `Runtime::enter`.
/// Calling it from async code (including `#[tokio::main]` bodies) panics;
/// async callers should use the inherent `insert_record`/`load`/
/// `load_in_flight_by_name`/`apply_update` methods instead.
#[derive(Debug, Clone)]
pub struct PostgresJobRecordStore {
    pool: Arc<PgPool>,
}

impl PostgresJobRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect using `DATABASE_URL`.
    pub async fn connect_from_env() -> Result<Self, JobStoreError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| JobStoreError::Storage("DATABASE_URL must be set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the `job_records` table and its indexes if missing.
    pub async fn migrate(&self) -> Result<(), JobStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(skip(self, record), fields(name = %record.name, unique = record.unique_in_flight), err)]
    pub async fn insert_record(&self, record: NewJobRecord) -> Result<JobRecordId, JobStoreError> {
        let id = JobRecordId::new();
        let (related_table, related_record_id) = match &record.related {
            Some(related) => (Some(related.table.as_str()), Some(related.record_id.as_str())),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO job_records (
                id,
                name,
                queued_at,
                related_table,
                related_record_id,
                data,
                serialized_payload,
                service,
                unique_in_flight
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id.as_uuid())
        .bind(&record.name)
        .bind(Utc::now())
        .bind(related_table)
        .bind(related_record_id)
        .bind(&record.data)
        .bind(record.serialized_payload.as_deref())
        .bind(record.service.as_deref())
        .bind(record.unique_in_flight)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                JobStoreError::DuplicateInFlight {
                    name: record.name.clone(),
                }
            } else {
                map_sqlx_error("insert_record", e)
            }
        })?;

        Ok(id)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    pub async fn load(&self, id: JobRecordId) -> Result<Option<JobRecord>, JobStoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM job_records WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load", e))?;

        row.map(|row| decode_row(&row)).transpose()
    }

    /// Oldest in-flight record named `name`; with `unique_only`, only rows
    /// inserted with `unique_in_flight` are considered.
    #[instrument(skip(self), err)]
    pub async fn load_in_flight_by_name(
        &self,
        name: &str,
        unique_only: bool,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        // Legacy rows may carry the epoch instead of NULL for "not completed".
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM job_records \
             WHERE name = $1 AND (completed_at IS NULL OR completed_at = to_timestamp(0)) \
             AND (unique_in_flight OR NOT $2) \
             ORDER BY queued_at ASC, id ASC \
             LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(name)
            .bind(unique_only)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_in_flight_by_name", e))?;

        row.map(|row| decode_row(&row)).transpose()
    }

    #[instrument(skip(self, update), fields(job_id = %id), err)]
    pub async fn apply_update(
        &self,
        id: JobRecordId,
        update: JobRecordUpdate,
    ) -> Result<(), JobStoreError> {
        let (completed_at, success, feedback) = match update.completion {
            Some(c) => (Some(c.completed_at), Some(c.success), Some(c.feedback)),
            None => (None, None, None),
        };
        let (data_mode, data): (Option<&str>, Option<JsonValue>) = match update.data {
            Some(DataUpdate::Replace(data)) => (Some("replace"), Some(data)),
            Some(DataUpdate::Merge(data)) => (Some("merge"), Some(data)),
            None => (None, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE job_records SET
                completed_at = COALESCE($2, completed_at),
                success = COALESCE($3, success),
                feedback = COALESCE($4, feedback),
                data = CASE
                    WHEN $5::text IS NULL THEN data
                    WHEN $5::text = 'replace' THEN $6::jsonb
                    WHEN jsonb_typeof(data) = 'object' AND jsonb_typeof($6::jsonb) = 'object'
                        THEN data || $6::jsonb
                    ELSE $6::jsonb
                END
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(completed_at)
        .bind(success)
        .bind(feedback)
        .bind(data_mode)
        .bind(data)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("apply_update", e))?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(id));
        }
        Ok(())
    }
}

// The JobRecordStore trait is synchronous; like the rest of the infra layer we
// block on the ambient tokio runtime.
fn runtime() -> Result<tokio::runtime::Handle, JobStoreError> {
    tokio::runtime::Handle::try_current().map_err(|_| {
        JobStoreError::Storage(
            "PostgresJobRecordStore requires a tokio runtime; call it from within one".to_string(),
        )
    })
}

impl JobRecordStore for PostgresJobRecordStore {
    fn insert(&self, record: NewJobRecord) -> Result<JobRecordId, JobStoreError> {
        runtime()?.block_on(self.insert_record(record))
    }

    fn find_by_id(&self, id: JobRecordId) -> Result<Option<JobRecord>, JobStoreError> {
        runtime()?.block_on(self.load(id))
    }

    fn find_in_flight_by_name(&self, name: &str) -> Result<Option<JobRecord>, JobStoreError> {
        runtime()?.block_on(self.load_in_flight_by_name(name, false))
    }

    fn find_unique_in_flight_by_name(
        &self,
        name: &str,
    ) -> Result<Option<JobRecord>, JobStoreError> {
        runtime()?.block_on(self.load_in_flight_by_name(name, true))
    }

    fn update(&self, id: JobRecordId, update: JobRecordUpdate) -> Result<(), JobStoreError> {
        runtime()?.block_on(self.apply_update(id, update))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> JobStoreError {
    JobStoreError::Storage(format!("{operation}: {err}"))
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn decode_row(row: &PgRow) -> Result<JobRecord, JobStoreError> {
    JobRecordRow::from_row(row)
        .map(Into::into)
        .map_err(|e| JobStoreError::Storage(format!("failed to decode job record row: {e}")))
}

// SQLx row types

#[derive(Debug)]
struct JobRecordRow {
    id: uuid::Uuid,
    name: String,
    queued_at: DateTime<Utc>,
    related_table: Option<String>,
    related_record_id: Option<String>,
    data: JsonValue,
    serialized_payload: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    success: Option<bool>,
    feedback: Option<String>,
    service: Option<String>,
    unique_in_flight: bool,
}

impl<'r> sqlx::FromRow<'r, PgRow> for JobRecordRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(JobRecordRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            queued_at: row.try_get("queued_at")?,
            related_table: row.try_get("related_table")?,
            related_record_id: row.try_get("related_record_id")?,
            data: row.try_get("data")?,
            serialized_payload: row.try_get("serialized_payload")?,
            completed_at: row.try_get("completed_at")?,
            success: row.try_get("success")?,
            feedback: row.try_get("feedback")?,
            service: row.try_get("service")?,
            unique_in_flight: row.try_get("unique_in_flight")?,
        })
    }
}

impl From<JobRecordRow> for JobRecord {
    fn from(row: JobRecordRow) -> Self {
        JobRecord {
            id: JobRecordId::from_uuid(row.id),
            name: row.name,
            queued_at: row.queued_at,
            related_table: row.related_table,
            related_record_id: row.related_record_id,
            data: row.data,
            serialized_payload: row.serialized_payload,
            completed_at: row.completed_at,
            success: row.success,
            feedback: row.feedback,
            service: row.service,
            unique_in_flight: row.unique_in_flight,
        }
    }
}
