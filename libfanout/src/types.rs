//! Core types for Fanout

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A publishing destination.
///
/// The set is closed: every adapter, credential, and job row refers to one
/// of these. `website` covers client-owned sites reached through their
/// publishing endpoint rather than a social network API.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum Platform {
    Facebook,
    Instagram,
    Linkedin,
    Google,
    Website,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Facebook,
        Platform::Instagram,
        Platform::Linkedin,
        Platform::Google,
        Platform::Website,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::Linkedin => "linkedin",
            Platform::Google => "google",
            Platform::Website => "website",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "linkedin" => Ok(Platform::Linkedin),
            "google" => Ok(Platform::Google),
            "website" => Ok(Platform::Website),
            _ => Err(format!(
                "Unknown platform: '{}'. Valid options: facebook, instagram, linkedin, google, website",
                s
            )),
        }
    }
}

/// Lifecycle status of a post. Transitions are validated by the state
/// machine in [`crate::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    PendingApproval,
    Approved,
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::PendingApproval => "pending_approval",
            PostStatus::Approved => "approved",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub campaign_id: Option<String>,
    pub title: String,
    pub body: String,
    /// Ordered asset references (media ids owned by the portal backend).
    pub assets: Vec<String>,
    /// Targeted platforms. Never empty for a post that reaches the pipeline.
    pub platforms: Vec<Platform>,
    pub status: PostStatus,
    /// Unix timestamp. Present whenever `status == Scheduled`.
    pub schedule_time: Option<i64>,
    pub created_at: i64,
    /// Optimistic-concurrency counter, bumped on every save.
    pub version: i64,
}

impl Post {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        platforms: Vec<Platform>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            campaign_id: None,
            title: title.into(),
            body: body.into(),
            assets: Vec::new(),
            platforms,
            status: PostStatus::Draft,
            schedule_time: None,
            created_at: chrono::Utc::now().timestamp(),
            version: 0,
        }
    }
}

/// Failure classification driving the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum FailureKind {
    /// Rate limits, timeouts, 5xx. Worth retrying.
    Transient,
    /// Invalid credential, content rejected, other 4xx. Never retried.
    Permanent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success { remote_post_id: String },
    Failure { kind: FailureKind, message: String },
}

/// One publish attempt for a (post, platform) pair. Appended once, never
/// mutated; together the rows form the post's audit trail.
#[derive(Debug, Clone)]
pub struct PublishAttempt {
    pub id: Option<i64>,
    pub post_id: String,
    pub platform: Platform,
    /// 1-based, mirrors the job's attempt counter.
    pub attempt_number: i64,
    pub started_at: i64,
    pub outcome: AttemptOutcome,
    /// Set when the failure is retryable; absent on success and on
    /// terminal failures.
    pub next_retry_at: Option<i64>,
}

impl PublishAttempt {
    pub fn succeeded(
        post_id: impl Into<String>,
        platform: Platform,
        attempt_number: i64,
        started_at: i64,
        remote_post_id: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            post_id: post_id.into(),
            platform,
            attempt_number,
            started_at,
            outcome: AttemptOutcome::Success {
                remote_post_id: remote_post_id.into(),
            },
            next_retry_at: None,
        }
    }

    pub fn failed(
        post_id: impl Into<String>,
        platform: Platform,
        attempt_number: i64,
        started_at: i64,
        kind: FailureKind,
        message: impl Into<String>,
        next_retry_at: Option<i64>,
    ) -> Self {
        Self {
            id: None,
            post_id: post_id.into(),
            platform,
            attempt_number,
            started_at,
            outcome: AttemptOutcome::Failure {
                kind,
                message: message.into(),
            },
            next_retry_at,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }

    /// A failure with no scheduled retry: the platform gave up.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Failure { .. }) && self.next_retry_at.is_none()
    }

    pub fn remote_post_id(&self) -> Option<&str> {
        match &self.outcome {
            AttemptOutcome::Success { remote_post_id } => Some(remote_post_id),
            AttemptOutcome::Failure { .. } => None,
        }
    }
}

pub type MetricMap = BTreeMap<String, f64>;

/// One captured set of metrics for a published (post, platform).
#[derive(Debug, Clone)]
pub struct AnalyticsSnapshot {
    pub id: Option<i64>,
    pub post_id: String,
    pub platform: Platform,
    pub captured_at: i64,
    pub metrics: MetricMap,
}

impl AnalyticsSnapshot {
    pub fn new(
        post_id: impl Into<String>,
        platform: Platform,
        captured_at: i64,
        metrics: MetricMap,
    ) -> Self {
        Self {
            id: None,
            post_id: post_id.into(),
            platform,
            captured_at,
            metrics,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
pub enum JobKind {
    Publish,
    Analytics,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Publish => "publish",
            JobKind::Analytics => "analytics",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "publish" => Ok(JobKind::Publish),
            "analytics" => Ok(JobKind::Analytics),
            _ => Err(format!(
                "Unknown job kind: '{}'. Valid options: publish, analytics",
                s
            )),
        }
    }
}

/// A job about to be enqueued. The queue assigns the row id.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub kind: JobKind,
    pub tenant_id: String,
    pub post_id: String,
    pub platform: Platform,
    pub attempt: i64,
    pub not_before: i64,
}

impl NewJob {
    pub fn publish(
        tenant_id: impl Into<String>,
        post_id: impl Into<String>,
        platform: Platform,
        not_before: i64,
    ) -> Self {
        Self {
            kind: JobKind::Publish,
            tenant_id: tenant_id.into(),
            post_id: post_id.into(),
            platform,
            attempt: 1,
            not_before,
        }
    }

    pub fn analytics(
        tenant_id: impl Into<String>,
        post_id: impl Into<String>,
        platform: Platform,
        not_before: i64,
    ) -> Self {
        Self {
            kind: JobKind::Analytics,
            tenant_id: tenant_id.into(),
            post_id: post_id.into(),
            platform,
            attempt: 1,
            not_before,
        }
    }

    /// Unique while the job is outstanding: guarantees at most one in-flight
    /// job per (tenant, post, platform, kind).
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.tenant_id, self.post_id, self.platform, self.kind
        )
    }
}

/// A stored job as returned by the queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub kind: JobKind,
    pub tenant_id: String,
    pub post_id: String,
    pub platform: Platform,
    pub attempt: i64,
    pub not_before: i64,
    pub dedup_key: String,
    pub enqueued_at: i64,
}

/// A leased job. The token identifies this grant; ack/nack/extend only take
/// effect while the token is still current, so a consumer holding an expired
/// lease cannot affect a job that was re-leased elsewhere.
#[derive(Debug, Clone)]
pub struct JobLease {
    pub job: Job,
    pub lease_token: String,
    pub leased_until: i64,
}

/// A resolved per-tenant platform credential.
///
/// The token is wrapped so it never appears in debug output or logs. How it
/// was obtained (OAuth flows etc.) is the portal backend's business.
#[derive(Clone)]
pub struct Credential {
    access_token: SecretString,
    pub account_ref: Option<String>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            account_ref: None,
        }
    }

    pub fn with_account_ref(mut self, account_ref: impl Into<String>) -> Self {
        self.account_ref = Some(account_ref.into());
        self
    }

    pub fn token(&self) -> &str {
        self.access_token.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field("account_ref", &self.account_ref)
            .finish()
    }
}
