//! Database operations for Fanout
//!
//! One sqlite file holds all durable state: posts, publish attempts,
//! analytics snapshots, jobs, and credentials. Keeping the queue in the
//! same store is what makes lease-timeout recovery work across restarts.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use crate::error::{DbError, FanoutError, Result};
use crate::repo::{CredentialResolver, PostRepository};
use crate::types::{
    AnalyticsSnapshot, AttemptOutcome, Credential, FailureKind, MetricMap, Platform, Post,
    PostStatus, PublishAttempt,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Use forward slashes for the sqlite URL and mode=rwc so the file is
        // created on first run.
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a new post row. Creation is normally the portal backend's
    /// job; the pipeline only needs this for tooling and tests.
    pub async fn create_post(&self, post: &Post) -> Result<()> {
        let assets = serde_json::to_string(&post.assets).map_err(DbError::Encoding)?;
        let platforms = serde_json::to_string(&post.platforms).map_err(DbError::Encoding)?;

        sqlx::query(
            r#"
            INSERT INTO posts (id, tenant_id, client_id, campaign_id, title, body,
                               assets, platforms, status, schedule_time, created_at, version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.tenant_id)
        .bind(&post.client_id)
        .bind(&post.campaign_id)
        .bind(&post.title)
        .bind(&post.body)
        .bind(assets)
        .bind(platforms)
        .bind(post.status)
        .bind(post.schedule_time)
        .bind(post.created_at)
        .bind(post.version)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Store or replace a tenant's platform credential. Owned by the portal
    /// backend in production; exposed here for seeding and tests.
    pub async fn upsert_credential(
        &self,
        tenant_id: &str,
        platform: Platform,
        access_token: &str,
        account_ref: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credentials (tenant_id, platform, access_token, account_ref, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(tenant_id, platform)
            DO UPDATE SET access_token = excluded.access_token,
                          account_ref = excluded.account_ref,
                          updated_at = excluded.updated_at
            "#,
        )
        .bind(tenant_id)
        .bind(platform)
        .bind(access_token)
        .bind(account_ref)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    fn post_from_row(row: &SqliteRow) -> Result<Post> {
        let assets: Vec<String> =
            serde_json::from_str(&row.get::<String, _>("assets")).map_err(DbError::Encoding)?;
        let platforms: Vec<Platform> =
            serde_json::from_str(&row.get::<String, _>("platforms")).map_err(DbError::Encoding)?;

        Ok(Post {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            client_id: row.get("client_id"),
            campaign_id: row.get("campaign_id"),
            title: row.get("title"),
            body: row.get("body"),
            assets,
            platforms,
            status: row.get("status"),
            schedule_time: row.get("schedule_time"),
            created_at: row.get("created_at"),
            version: row.get("version"),
        })
    }

    fn attempt_from_row(row: &SqliteRow) -> PublishAttempt {
        let success: i64 = row.get("success");
        let outcome = if success != 0 {
            AttemptOutcome::Success {
                remote_post_id: row
                    .get::<Option<String>, _>("remote_post_id")
                    .unwrap_or_default(),
            }
        } else {
            AttemptOutcome::Failure {
                kind: row
                    .get::<Option<FailureKind>, _>("error_kind")
                    .unwrap_or(FailureKind::Permanent),
                message: row
                    .get::<Option<String>, _>("error_message")
                    .unwrap_or_default(),
            }
        };

        PublishAttempt {
            id: row.get("id"),
            post_id: row.get("post_id"),
            platform: row.get("platform"),
            attempt_number: row.get("attempt_number"),
            started_at: row.get("started_at"),
            outcome,
            next_retry_at: row.get("next_retry_at"),
        }
    }

    fn snapshot_from_row(row: &SqliteRow) -> Result<AnalyticsSnapshot> {
        let metrics: MetricMap =
            serde_json::from_str(&row.get::<String, _>("metrics")).map_err(DbError::Encoding)?;

        Ok(AnalyticsSnapshot {
            id: row.get("id"),
            post_id: row.get("post_id"),
            platform: row.get("platform"),
            captured_at: row.get("captured_at"),
            metrics,
        })
    }
}

#[async_trait]
impl PostRepository for Database {
    async fn get(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, client_id, campaign_id, title, body,
                   assets, platforms, status, schedule_time, created_at, version
            FROM posts WHERE id = ?
            "#,
        )
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| Self::post_from_row(&r)).transpose()
    }

    async fn save(&self, post: &Post, expected_version: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = ?, schedule_time = ?, version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(post.status)
        .bind(post.schedule_time)
        .bind(&post.id)
        .bind(expected_version)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(FanoutError::VersionConflict(post.id.clone()));
        }

        Ok(())
    }

    async fn list_due_for_publish(&self, now: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, client_id, campaign_id, title, body,
                   assets, platforms, status, schedule_time, created_at, version
            FROM posts
            WHERE status = ? AND schedule_time IS NOT NULL AND schedule_time <= ?
            ORDER BY schedule_time ASC
            "#,
        )
        .bind(PostStatus::Scheduled)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(Self::post_from_row).collect()
    }

    async fn append_attempt(&self, attempt: &PublishAttempt) -> Result<bool> {
        let (success, remote_post_id, error_kind, error_message) = match &attempt.outcome {
            AttemptOutcome::Success { remote_post_id } => {
                (1i64, Some(remote_post_id.as_str()), None, None)
            }
            AttemptOutcome::Failure { kind, message } => {
                (0i64, None, Some(*kind), Some(message.as_str()))
            }
        };

        // INSERT OR IGNORE: replayed jobs re-record the same attempt number
        // and must not duplicate history.
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO publish_attempts
                (post_id, platform, attempt_number, started_at, success,
                 remote_post_id, error_kind, error_message, next_retry_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&attempt.post_id)
        .bind(attempt.platform)
        .bind(attempt.attempt_number)
        .bind(attempt.started_at)
        .bind(success)
        .bind(remote_post_id)
        .bind(error_kind)
        .bind(error_message)
        .bind(attempt.next_retry_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    async fn attempts_for_post(&self, post_id: &str) -> Result<Vec<PublishAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, post_id, platform, attempt_number, started_at, success,
                   remote_post_id, error_kind, error_message, next_retry_at
            FROM publish_attempts
            WHERE post_id = ?
            ORDER BY platform, attempt_number
            "#,
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(Self::attempt_from_row).collect())
    }

    async fn successful_attempt(
        &self,
        post_id: &str,
        platform: Platform,
    ) -> Result<Option<PublishAttempt>> {
        let row = sqlx::query(
            r#"
            SELECT id, post_id, platform, attempt_number, started_at, success,
                   remote_post_id, error_kind, error_message, next_retry_at
            FROM publish_attempts
            WHERE post_id = ? AND platform = ? AND success = 1
            ORDER BY attempt_number DESC
            LIMIT 1
            "#,
        )
        .bind(post_id)
        .bind(platform)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| Self::attempt_from_row(&r)))
    }

    async fn append_snapshot(&self, snapshot: &AnalyticsSnapshot) -> Result<()> {
        let metrics = serde_json::to_string(&snapshot.metrics).map_err(DbError::Encoding)?;

        sqlx::query(
            r#"
            INSERT INTO analytics_snapshots (post_id, platform, captured_at, metrics)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.post_id)
        .bind(snapshot.platform)
        .bind(snapshot.captured_at)
        .bind(metrics)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn snapshots_for_post(
        &self,
        post_id: &str,
        platform: Option<Platform>,
    ) -> Result<Vec<AnalyticsSnapshot>> {
        let rows = match platform {
            Some(platform) => {
                sqlx::query(
                    r#"
                    SELECT id, post_id, platform, captured_at, metrics
                    FROM analytics_snapshots
                    WHERE post_id = ? AND platform = ?
                    ORDER BY captured_at ASC
                    "#,
                )
                .bind(post_id)
                .bind(platform)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, post_id, platform, captured_at, metrics
                    FROM analytics_snapshots
                    WHERE post_id = ?
                    ORDER BY captured_at ASC
                    "#,
                )
                .bind(post_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(DbError::SqlxError)?;

        rows.iter().map(Self::snapshot_from_row).collect()
    }
}

#[async_trait]
impl CredentialResolver for Database {
    async fn resolve(&self, tenant_id: &str, platform: Platform) -> Result<Option<Credential>> {
        let row = sqlx::query(
            r#"
            SELECT access_token, account_ref FROM credentials
            WHERE tenant_id = ? AND platform = ?
            "#,
        )
        .bind(tenant_id)
        .bind(platform)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| {
            let mut credential = Credential::new(r.get::<String, _>("access_token"));
            if let Some(account_ref) = r.get::<Option<String>, _>("account_ref") {
                credential = credential.with_account_ref(account_ref);
            }
            credential
        }))
    }
}
