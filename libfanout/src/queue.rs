//! Durable job queue
//!
//! Sqlite-backed queue with visibility timeouts and at-least-once delivery.
//! A job row exists while the work is outstanding; acking deletes it, which
//! also releases the dedup key. Dequeueing is a single atomic UPDATE so
//! lease grants serialize at the storage level, and an expired lease simply
//! makes the row eligible again, wherever the previous holder went.

use std::time::Duration;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::db::Database;
use crate::error::{DbError, FanoutError, Result};
use crate::types::{Job, JobKind, JobLease, NewJob};

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    visibility_timeout: Duration,
}

/// An outstanding job plus its lease state, for introspection tooling.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job: Job,
    pub leased: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub publish_outstanding: i64,
    pub analytics_outstanding: i64,
    pub leased: i64,
    pub ready: i64,
}

impl JobQueue {
    pub fn new(db: Database, visibility_timeout: Duration) -> Self {
        Self {
            db,
            visibility_timeout,
        }
    }

    /// Enqueue a job.
    ///
    /// # Errors
    ///
    /// `DuplicateJob` when an outstanding job already holds the same dedup
    /// key. Callers doing idempotent scheduling treat that as a no-op.
    pub async fn enqueue(&self, job: NewJob) -> Result<i64> {
        let dedup_key = job.dedup_key();
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (kind, tenant_id, post_id, platform, attempt,
                              not_before, dedup_key, enqueued_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.kind)
        .bind(&job.tenant_id)
        .bind(&job.post_id)
        .bind(job.platform)
        .bind(job.attempt)
        .bind(job.not_before)
        .bind(&dedup_key)
        .bind(now)
        .execute(self.db.pool())
        .await;

        match result {
            Ok(r) => Ok(r.last_insert_rowid()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(FanoutError::DuplicateJob(dedup_key))
            }
            Err(e) => Err(DbError::SqlxError(e).into()),
        }
    }

    /// Lease the oldest eligible job of `kind`, optionally restricted to a
    /// tenant. Returns `None` when nothing is due.
    ///
    /// Eligible means `not_before` has passed and no live lease exists. The
    /// whole grant is one UPDATE, so two workers can never lease the same
    /// row.
    pub async fn dequeue(&self, kind: JobKind, tenant: Option<&str>) -> Result<Option<JobLease>> {
        let now = chrono::Utc::now().timestamp();
        let lease_token = uuid::Uuid::new_v4().to_string();
        let leased_until = now + self.visibility_timeout.as_secs() as i64;

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET leased_until = ?, lease_token = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE kind = ?
                  AND not_before <= ?
                  AND (leased_until IS NULL OR leased_until <= ?)
                  AND (? IS NULL OR tenant_id = ?)
                ORDER BY enqueued_at ASC, id ASC
                LIMIT 1
            )
            RETURNING id, kind, tenant_id, post_id, platform, attempt,
                      not_before, dedup_key, enqueued_at
            "#,
        )
        .bind(leased_until)
        .bind(&lease_token)
        .bind(kind)
        .bind(now)
        .bind(now)
        .bind(tenant)
        .bind(tenant)
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| JobLease {
            job: Self::job_from_row(&r),
            lease_token,
            leased_until,
        }))
    }

    /// Remove the job for good. Returns false when the lease is stale (the
    /// job expired and was re-leased or already removed elsewhere).
    pub async fn ack(&self, lease: &JobLease) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND lease_token = ?")
            .bind(lease.job.id)
            .bind(&lease.lease_token)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Release the lease and reschedule for `not_before`, bumping the
    /// attempt counter. Returns false on a stale lease.
    pub async fn nack(&self, lease: &JobLease, not_before: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET leased_until = NULL, lease_token = NULL,
                attempt = attempt + 1, not_before = ?
            WHERE id = ? AND lease_token = ?
            "#,
        )
        .bind(not_before)
        .bind(lease.job.id)
        .bind(&lease.lease_token)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Push the lease deadline forward for long-running work.
    pub async fn extend_lease(&self, lease: &mut JobLease) -> Result<bool> {
        let leased_until =
            chrono::Utc::now().timestamp() + self.visibility_timeout.as_secs() as i64;

        let result = sqlx::query("UPDATE jobs SET leased_until = ? WHERE id = ? AND lease_token = ?")
            .bind(leased_until)
            .bind(lease.job.id)
            .bind(&lease.lease_token)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        let extended = result.rows_affected() > 0;
        if extended {
            lease.leased_until = leased_until;
        }
        Ok(extended)
    }

    /// Drop every outstanding job for a post, leased or not. Used when a
    /// post is edited or deleted before publish; an in-flight worker's
    /// ack/nack then lands on a stale lease and does nothing.
    pub async fn cancel_jobs(&self, post_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE post_id = ?")
            .bind(post_id)
            .execute(self.db.pool())
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected())
    }

    pub async fn list_outstanding(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let now = chrono::Utc::now().timestamp();

        let rows = sqlx::query(
            r#"
            SELECT id, kind, tenant_id, post_id, platform, attempt,
                   not_before, dedup_key, enqueued_at, leased_until
            FROM jobs
            ORDER BY not_before ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows
            .iter()
            .map(|r| JobSummary {
                job: Self::job_from_row(r),
                leased: r
                    .get::<Option<i64>, _>("leased_until")
                    .map(|until| until > now)
                    .unwrap_or(false),
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        let now = chrono::Utc::now().timestamp();

        let row = sqlx::query(
            r#"
            SELECT
                SUM(CASE WHEN kind = 'publish' THEN 1 ELSE 0 END) AS publish_outstanding,
                SUM(CASE WHEN kind = 'analytics' THEN 1 ELSE 0 END) AS analytics_outstanding,
                SUM(CASE WHEN leased_until IS NOT NULL AND leased_until > ? THEN 1 ELSE 0 END) AS leased,
                SUM(CASE WHEN not_before <= ? AND (leased_until IS NULL OR leased_until <= ?) THEN 1 ELSE 0 END) AS ready
            FROM jobs
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(QueueStats {
            publish_outstanding: row
                .get::<Option<i64>, _>("publish_outstanding")
                .unwrap_or(0),
            analytics_outstanding: row
                .get::<Option<i64>, _>("analytics_outstanding")
                .unwrap_or(0),
            leased: row.get::<Option<i64>, _>("leased").unwrap_or(0),
            ready: row.get::<Option<i64>, _>("ready").unwrap_or(0),
        })
    }

    fn job_from_row(row: &SqliteRow) -> Job {
        Job {
            id: row.get("id"),
            kind: row.get("kind"),
            tenant_id: row.get("tenant_id"),
            post_id: row.get("post_id"),
            platform: row.get("platform"),
            attempt: row.get("attempt"),
            not_before: row.get("not_before"),
            dedup_key: row.get("dedup_key"),
            enqueued_at: row.get("enqueued_at"),
        }
    }
}
