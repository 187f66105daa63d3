//! PostgreSQL implementation of the timeloom `JobStore`.
//!
//! Every operation the Claim Engine needs is a single statement against one
//! table; Step A's candidate queries are plain reads and Step B/D/E are
//! conditional updates guarded by a `WHERE` clause over the row's prior
//! value — no multi-statement transaction spans Step A to Step B, since the
//! CAS in `try_claim` is what actually arbitrates the race.
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id          TEXT PRIMARY KEY,
//!     job_id      TEXT NOT NULL,
//!     job_type    TEXT NOT NULL,
//!     schedule    TEXT,
//!     priority    BIGINT NOT NULL,
//!     concurrency BIGINT NOT NULL,
//!     data        JSONB NOT NULL,
//!     due         TIMESTAMPTZ,
//!     permits     BIGINT NOT NULL,
//!     workers     TEXT[] NOT NULL DEFAULT '{}',
//!     completed   TIMESTAMPTZ,
//!     created     TIMESTAMPTZ NOT NULL,
//!     updated     TIMESTAMPTZ NOT NULL,
//!
//!     UNIQUE (job_type, job_id)
//! );
//!
//! CREATE INDEX idx_jobs_due ON jobs (priority, id) WHERE due IS NOT NULL;
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use timeloom_postgres::PgJobStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/mydb").await?;
//! let store = PgJobStore::new(pool);
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, QueryBuilder, Row};
use timeloom::{
    DeleteSelector, JobFields, JobRecord, JobStore, Meta, StoreError, StoreResult, TypeThreshold,
    WorkerIds,
};

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the `jobs` table if it does not already exist.
    pub async fn create_table(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id          TEXT PRIMARY KEY,
                job_id      TEXT NOT NULL,
                job_type    TEXT NOT NULL,
                schedule    TEXT,
                priority    BIGINT NOT NULL,
                concurrency BIGINT NOT NULL,
                data        JSONB NOT NULL,
                due         TIMESTAMPTZ,
                permits     BIGINT NOT NULL,
                workers     TEXT[] NOT NULL DEFAULT '{}',
                completed   TIMESTAMPTZ,
                created     TIMESTAMPTZ NOT NULL,
                updated     TIMESTAMPTZ NOT NULL,
                UNIQUE (job_type, job_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs (priority, id) WHERE due IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_record(row: sqlx::postgres::PgRow) -> JobRecord {
    let workers: Vec<String> = row.get("workers");
    JobRecord {
        id: row.get("id"),
        job: JobFields {
            id: row.get("job_id"),
            job_type: row.get("job_type"),
            schedule: row.get("schedule"),
            priority: row.get("priority"),
            concurrency: row.get("concurrency"),
            data: row.get("data"),
        },
        due: row.get("due"),
        permits: row.get("permits"),
        workers: WorkerIds::from_vec(workers),
        completed: row.get("completed"),
        meta: Meta {
            created: row.get("created"),
            updated: row.get("updated"),
        },
    }
}

const SELECT_COLUMNS: &str =
    "id, job_id, job_type, schedule, priority, concurrency, data, due, permits, workers, completed, created, updated";

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, record: JobRecord) -> StoreResult<()> {
        let workers: Vec<String> = record.workers.into_vec();
        let result = sqlx::query(
            r#"
            INSERT INTO jobs
                (id, job_id, job_type, schedule, priority, concurrency, data, due, permits, workers, completed, created, updated)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.job.id)
        .bind(&record.job.job_type)
        .bind(&record.job.schedule)
        .bind(record.job.priority)
        .bind(record.job.concurrency)
        .bind(&record.job.data)
        .bind(record.due)
        .bind(record.permits)
        .bind(&workers)
        .bind(record.completed)
        .bind(record.meta.created)
        .bind(record.meta.updated)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::DuplicateKey(record.id));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<JobRecord>> {
        let row = sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(row.map(row_to_record))
    }

    async fn delete(&self, selector: DeleteSelector) -> StoreResult<u64> {
        let mut query = QueryBuilder::new("DELETE FROM jobs WHERE ");
        let mut first = true;
        if let Some(id) = &selector.id {
            query.push("id = ").push_bind(id);
            first = false;
        }
        if let Some(job_type) = &selector.job_type {
            if !first {
                query.push(" AND ");
            }
            query.push("job_type = ").push_bind(job_type);
        }

        let result = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(result.rows_affected())
    }

    async fn find_idle_candidate(
        &self,
        registered_types: &[String],
        worker_id: &str,
        now: DateTime<Utc>,
        only_id: Option<&str>,
    ) -> StoreResult<Option<JobRecord>> {
        let mut query = QueryBuilder::new(format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE "));
        query
            .push("job_type = ANY(")
            .push_bind(registered_types)
            .push(") AND due <= ")
            .push_bind(now)
            .push(" AND (permits = -1 OR permits > 0) AND NOT (")
            .push_bind(worker_id)
            .push(" = ANY(workers))");
        if let Some(id) = only_id {
            query.push(" AND id = ").push_bind(id);
        }
        query.push(" ORDER BY priority ASC, id ASC LIMIT 1");

        let row = query
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(row.map(row_to_record))
    }

    async fn find_expired_candidate(
        &self,
        type_thresholds: &[TypeThreshold],
        worker_id: &str,
        now: DateTime<Utc>,
        only_id: Option<&str>,
    ) -> StoreResult<Option<JobRecord>> {
        if type_thresholds.is_empty() {
            return Ok(None);
        }

        let cols = SELECT_COLUMNS
            .split(", ")
            .map(|c| format!("j.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut query = QueryBuilder::new(format!("SELECT DISTINCT ON (j.id) {cols} FROM jobs j JOIN (VALUES "));

        for (i, (job_type, threshold)) in type_thresholds.iter().enumerate() {
            if i > 0 {
                query.push(", ");
            }
            query.push("(");
            query.push_bind(job_type);
            query.push(", ");
            query.push_bind(threshold);
            query.push(")");
        }
        query.push(") AS t(job_type, expired_threshold) ON j.job_type = t.job_type");
        query
            .push(" WHERE j.due <= ")
            .push_bind(now)
            .push(" AND j.permits = 0")
            .push(" AND EXISTS (SELECT 1 FROM unnest(j.workers) w WHERE w <= t.expired_threshold)")
            .push(" AND NOT (")
            .push_bind(worker_id)
            .push(" = ANY(j.workers))");
        if let Some(id) = only_id {
            query.push(" AND j.id = ").push_bind(id);
        }
        query.push(" ORDER BY j.priority ASC, j.id ASC LIMIT 1");

        let row = query
            .build()
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(row.map(row_to_record))
    }

    async fn try_claim(
        &self,
        id: &str,
        prev_permits: i64,
        prev_workers: &[String],
        new_permits: i64,
        new_workers: &[String],
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET permits = $1, workers = $2, updated = now()
            WHERE id = $3 AND permits = $4 AND workers = $5
            "#,
        )
        .bind(new_permits)
        .bind(new_workers)
        .bind(id)
        .bind(prev_permits)
        .bind(prev_workers)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn try_reschedule(
        &self,
        id: &str,
        job_type: &str,
        new_schedule: Option<&str>,
        new_due: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET due = $1,
                schedule = COALESCE($2, schedule),
                completed = $3,
                updated = now()
            WHERE id = $4 AND job_type = $5 AND (due IS NULL OR due <= $1)
            "#,
        )
        .bind(new_due)
        .bind(new_schedule)
        .bind(completed_at)
        .bind(id)
        .bind(job_type)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_exhausted(&self, id: &str, job_type: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM jobs WHERE id = $1 AND job_type = $2")
            .bind(id)
            .bind(job_type)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }

    async fn release_permit(&self, id: &str, job_type: &str, worker_id: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET workers = array_remove(workers, $1),
                permits = CASE WHEN permits = -1 THEN -1 ELSE permits + 1 END,
                updated = now()
            WHERE id = $2 AND job_type = $3 AND $1 = ANY(workers)
            "#,
        )
        .bind(worker_id)
        .bind(id)
        .bind(job_type)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.into()))?;
        Ok(())
    }
}

/// Convenience constructor wrapping the store in an `Arc` for
/// `Scheduler::new`, matching the shared-ownership shape every call site
/// needs.
pub fn shared(pool: PgPool) -> Arc<PgJobStore> {
    Arc::new(PgJobStore::new(pool))
}
