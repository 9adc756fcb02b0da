//! Collaborator interfaces
//!
//! The pipeline does not own domain records or credentials; it reaches them
//! through these narrow traits. The sqlite [`crate::db::Database`]
//! implements both for production, and tests can substitute their own.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{AnalyticsSnapshot, Credential, Platform, Post, PublishAttempt};

/// Read/write access to posts and their append-only history.
#[async_trait]
pub trait PostRepository: Send + Sync {
    async fn get(&self, post_id: &str) -> Result<Option<Post>>;

    /// Persist status/schedule changes. Fails with `VersionConflict` when
    /// the stored version no longer matches `expected_version`; the caller
    /// re-reads and retries.
    async fn save(&self, post: &Post, expected_version: i64) -> Result<()>;

    /// Posts in `scheduled` status whose schedule time has arrived.
    async fn list_due_for_publish(&self, now: i64) -> Result<Vec<Post>>;

    /// Append one publish attempt. Returns false when the same
    /// (post, platform, attempt number) was already recorded, which makes
    /// replayed jobs harmless.
    async fn append_attempt(&self, attempt: &PublishAttempt) -> Result<bool>;

    async fn attempts_for_post(&self, post_id: &str) -> Result<Vec<PublishAttempt>>;

    /// The successful attempt for (post, platform), if any.
    async fn successful_attempt(
        &self,
        post_id: &str,
        platform: Platform,
    ) -> Result<Option<PublishAttempt>>;

    async fn append_snapshot(&self, snapshot: &AnalyticsSnapshot) -> Result<()>;

    async fn snapshots_for_post(
        &self,
        post_id: &str,
        platform: Option<Platform>,
    ) -> Result<Vec<AnalyticsSnapshot>>;
}

/// Resolves the credential the tenant configured for a platform.
/// `None` means the platform is not set up for this tenant.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, tenant_id: &str, platform: Platform) -> Result<Option<Credential>>;
}

/// In-memory resolver for tests and single-tenant tooling.
#[derive(Default)]
pub struct StaticCredentialResolver {
    credentials: HashMap<(String, Platform), Credential>,
}

impl StaticCredentialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        tenant_id: impl Into<String>,
        platform: Platform,
        credential: Credential,
    ) {
        self.credentials
            .insert((tenant_id.into(), platform), credential);
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, tenant_id: &str, platform: Platform) -> Result<Option<Credential>> {
        Ok(self
            .credentials
            .get(&(tenant_id.to_string(), platform))
            .cloned())
    }
}
