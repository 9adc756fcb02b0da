//! Analytics worker
//!
//! Consumes Analytics jobs: fetches current metrics for a published
//! (post, platform), appends a snapshot, and re-enqueues itself until the
//! analytics horizon passes. The polling interval widens geometrically as
//! the post ages. Failures here never touch post status; a permanent
//! failure just ends this one polling chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::adapters::AdapterRegistry;
use crate::error::{AdapterError, FanoutError, Result};
use crate::queue::JobQueue;
use crate::repo::{CredentialResolver, PostRepository};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::types::{AnalyticsSnapshot, Job, JobKind, JobLease, MetricMap, NewJob};

#[derive(Debug, Clone)]
pub struct AnalyticsOptions {
    /// Upper bound on one adapter call; overruns count as transient.
    pub call_timeout: Duration,
    /// Base polling interval right after publish.
    pub poll_interval: Duration,
    /// Ceiling the widening interval never exceeds.
    pub max_poll_interval: Duration,
    /// The interval doubles every time the post ages by this step.
    pub widen_age_step: Duration,
    /// Polling stops once the post is older than this.
    pub horizon: Duration,
    /// Idle sleep when the queue has nothing due.
    pub idle_poll: Duration,
}

impl Default for AnalyticsOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(3600),
            max_poll_interval: Duration::from_secs(86_400),
            widen_age_step: Duration::from_secs(86_400),
            horizon: Duration::from_secs(30 * 86_400),
            idle_poll: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct AnalyticsWorker {
    queue: JobQueue,
    repo: Arc<dyn PostRepository>,
    credentials: Arc<dyn CredentialResolver>,
    adapters: AdapterRegistry,
    retry: RetryPolicy,
    options: AnalyticsOptions,
}

impl AnalyticsWorker {
    pub fn new(
        queue: JobQueue,
        repo: Arc<dyn PostRepository>,
        credentials: Arc<dyn CredentialResolver>,
        adapters: AdapterRegistry,
        retry: RetryPolicy,
        options: AnalyticsOptions,
    ) -> Self {
        Self {
            queue,
            repo,
            credentials,
            adapters,
            retry,
            options,
        }
    }

    /// Consume jobs until shutdown is requested. Returns early only on
    /// queue/storage faults.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        while !shutdown.load(Ordering::Relaxed) {
            if !self.poll_once().await? {
                sleep(self.options.idle_poll).await;
            }
        }
        Ok(())
    }

    /// Process at most one job. Returns whether a job was processed.
    pub async fn poll_once(&self) -> Result<bool> {
        match self.queue.dequeue(JobKind::Analytics, None).await? {
            Some(lease) => {
                self.process(lease).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process(&self, lease: JobLease) -> Result<()> {
        let job = lease.job.clone();
        debug!(
            "processing analytics job {} ({} -> {})",
            job.id, job.post_id, job.platform
        );

        if self.repo.get(&job.post_id).await?.is_none() {
            warn!(
                "analytics job {} references missing post {}, ending chain",
                job.id, job.post_id
            );
            self.queue.ack(&lease).await?;
            return Ok(());
        }

        let Some(published) = self
            .repo
            .successful_attempt(&job.post_id, job.platform)
            .await?
        else {
            // Publish history disappeared or never existed for this target.
            warn!(
                "no successful publish recorded for {}/{}, ending analytics chain",
                job.post_id, job.platform
            );
            self.queue.ack(&lease).await?;
            return Ok(());
        };

        let remote_post_id = published.remote_post_id().unwrap_or_default().to_string();
        let published_at = published.started_at;

        let outcome = self.dispatch_fetch(&job, &remote_post_id).await?;
        let now = chrono::Utc::now().timestamp();

        match outcome {
            Ok(metrics) => {
                debug!(
                    "captured {} metric(s) for {}/{}",
                    metrics.len(),
                    job.post_id,
                    job.platform
                );

                let snapshot =
                    AnalyticsSnapshot::new(&job.post_id, job.platform, now, metrics);
                self.repo.append_snapshot(&snapshot).await?;
                self.queue.ack(&lease).await?;

                let age = now - published_at;
                if age < self.options.horizon.as_secs() as i64 {
                    let next = now + self.next_poll_interval(age).as_secs() as i64;
                    let follow_up =
                        NewJob::analytics(&job.tenant_id, &job.post_id, job.platform, next);
                    match self.queue.enqueue(follow_up).await {
                        Ok(_) => {}
                        Err(FanoutError::DuplicateJob(_)) => {}
                        Err(e) => return Err(e),
                    }
                } else {
                    info!(
                        "analytics horizon reached for {}/{}, chain complete",
                        job.post_id, job.platform
                    );
                }
            }
            Err(error) => match self.retry.decide(job.attempt as u32, error.kind()) {
                RetryDecision::RetryAfter(delay) => {
                    let next_retry_at = now + delay.as_secs_f64().ceil() as i64;
                    warn!(
                        "analytics fetch for {}/{} failed (attempt {}): {}; retrying at {}",
                        job.post_id,
                        job.platform,
                        job.attempt,
                        error.message(),
                        next_retry_at
                    );
                    self.queue.nack(&lease, next_retry_at).await?;
                }
                RetryDecision::GiveUp => {
                    // Post status is never touched from here; the chain
                    // just stops.
                    warn!(
                        "ending analytics chain for {}/{} after attempt {}: {}",
                        job.post_id,
                        job.platform,
                        job.attempt,
                        error.message()
                    );
                    self.queue.ack(&lease).await?;
                }
            },
        }

        Ok(())
    }

    async fn dispatch_fetch(
        &self,
        job: &Job,
        remote_post_id: &str,
    ) -> Result<std::result::Result<MetricMap, AdapterError>> {
        let Some(credential) = self.credentials.resolve(&job.tenant_id, job.platform).await? else {
            return Ok(Err(AdapterError::Permanent(format!(
                "no {} credential configured for tenant {}",
                job.platform, job.tenant_id
            ))));
        };

        let Some(adapter) = self.adapters.get(job.platform) else {
            return Ok(Err(AdapterError::Permanent(format!(
                "no adapter registered for {}",
                job.platform
            ))));
        };

        let outcome = match tokio::time::timeout(
            self.options.call_timeout,
            adapter.fetch_analytics(remote_post_id, &credential),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Transient(format!(
                "analytics call exceeded {}s",
                self.options.call_timeout.as_secs()
            ))),
        };

        Ok(outcome)
    }

    /// Polling interval for a post of the given age: the base interval,
    /// doubled per elapsed age step, never above the ceiling.
    fn next_poll_interval(&self, age_secs: i64) -> Duration {
        let step = self.options.widen_age_step.as_secs().max(1) as i64;
        let doublings = (age_secs.max(0) / step).min(16) as u32;
        let widened = self
            .options
            .poll_interval
            .as_secs()
            .saturating_mul(1u64 << doublings);

        Duration::from_secs(widened.min(self.options.max_poll_interval.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::MockAdapter;
    use crate::adapters::PlatformAdapter;
    use crate::db::Database;
    use crate::repo::StaticCredentialResolver;
    use crate::types::{Credential, Platform, Post, PostStatus, PublishAttempt};

    struct Fixture {
        db: Database,
        queue: JobQueue,
        worker: AnalyticsWorker,
    }

    fn sample_metrics() -> MetricMap {
        let mut metrics = MetricMap::new();
        metrics.insert("impressions".to_string(), 420.0);
        metrics.insert("clicks".to_string(), 17.0);
        metrics
    }

    async fn fixture(adapter: MockAdapter, options: AnalyticsOptions) -> Fixture {
        let db = Database::new(":memory:").await.unwrap();
        let queue = JobQueue::new(db.clone(), Duration::from_secs(60));

        let mut registry = AdapterRegistry::new();
        let mut credentials = StaticCredentialResolver::new();
        credentials.insert("tenant-1", adapter.platform(), Credential::new("tok"));
        registry.register(Arc::new(adapter));

        let worker = AnalyticsWorker::new(
            queue.clone(),
            Arc::new(db.clone()),
            Arc::new(credentials),
            registry,
            RetryPolicy::new(Duration::ZERO, Duration::ZERO, 3),
            options,
        );

        Fixture { db, queue, worker }
    }

    /// A published post with a successful attempt `age_secs` in the past
    /// and a due analytics job.
    async fn seed_published(f: &Fixture, platform: Platform, age_secs: i64) -> Post {
        let mut post = Post::new("tenant-1", "client-1", "Title", "Body", vec![platform]);
        post.status = PostStatus::Published;
        f.db.create_post(&post).await.unwrap();

        let published_at = chrono::Utc::now().timestamp() - age_secs;
        f.db.append_attempt(&PublishAttempt::succeeded(
            &post.id,
            platform,
            1,
            published_at,
            "remote-1",
        ))
        .await
        .unwrap();

        f.queue
            .enqueue(NewJob::analytics(&post.tenant_id, &post.id, platform, 0))
            .await
            .unwrap();

        post
    }

    #[tokio::test]
    async fn test_snapshot_appended_and_chain_continues() {
        let adapter =
            MockAdapter::succeeding(Platform::Website).with_metrics(sample_metrics());
        let options = AnalyticsOptions {
            poll_interval: Duration::from_secs(100),
            widen_age_step: Duration::from_secs(1_000_000),
            ..Default::default()
        };
        let f = fixture(adapter.clone(), options).await;
        let post = seed_published(&f, Platform::Website, 60).await;

        let before = chrono::Utc::now().timestamp();
        assert!(f.worker.poll_once().await.unwrap());
        assert_eq!(adapter.fetch_calls(), 1);

        let snapshots = f
            .db
            .snapshots_for_post(&post.id, Some(Platform::Website))
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].metrics["impressions"], 420.0);

        // Chain re-enqueued one base interval out (age below the first
        // widening step).
        let outstanding = f.queue.list_outstanding(10).await.unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].job.kind, JobKind::Analytics);
        assert_eq!(outstanding[0].job.attempt, 1);
        assert!(outstanding[0].job.not_before >= before + 100);
        assert!(outstanding[0].job.not_before <= before + 102);
    }

    #[tokio::test]
    async fn test_horizon_ends_chain() {
        let adapter =
            MockAdapter::succeeding(Platform::Website).with_metrics(sample_metrics());
        let options = AnalyticsOptions {
            horizon: Duration::from_secs(500),
            ..Default::default()
        };
        let f = fixture(adapter, options).await;
        let post = seed_published(&f, Platform::Website, 1000).await;

        assert!(f.worker.poll_once().await.unwrap());

        // Final snapshot still captured, but nothing re-enqueued.
        let snapshots = f.db.snapshots_for_post(&post.id, None).await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert!(f.queue.list_outstanding(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_fetch_failure_ends_chain_only() {
        let adapter = MockAdapter::succeeding(Platform::Website).with_fetch_error(
            AdapterError::Permanent("metrics endpoint gone".to_string()),
        );
        let f = fixture(adapter, AnalyticsOptions::default()).await;
        let post = seed_published(&f, Platform::Website, 60).await;

        assert!(f.worker.poll_once().await.unwrap());

        // Chain ended, no snapshot, and the post status is untouched.
        assert!(f.queue.list_outstanding(10).await.unwrap().is_empty());
        assert!(f.db.snapshots_for_post(&post.id, None).await.unwrap().is_empty());

        let reloaded = f.db.get(&post.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, PostStatus::Published);
        assert_eq!(reloaded.version, 0);
    }

    #[tokio::test]
    async fn test_transient_fetch_failure_retries() {
        let adapter = MockAdapter::succeeding(Platform::Website)
            .with_fetch_error(AdapterError::Transient("503".to_string()));
        let f = fixture(adapter, AnalyticsOptions::default()).await;
        seed_published(&f, Platform::Website, 60).await;

        assert!(f.worker.poll_once().await.unwrap());

        // Nacked: same job, bumped attempt.
        let outstanding = f.queue.list_outstanding(10).await.unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].job.attempt, 2);
        assert!(!outstanding[0].leased);
    }

    #[tokio::test]
    async fn test_missing_publish_record_drops_chain() {
        let adapter = MockAdapter::succeeding(Platform::Website);
        let f = fixture(adapter.clone(), AnalyticsOptions::default()).await;

        let mut post = Post::new(
            "tenant-1",
            "client-1",
            "Title",
            "Body",
            vec![Platform::Website],
        );
        post.status = PostStatus::Published;
        f.db.create_post(&post).await.unwrap();

        f.queue
            .enqueue(NewJob::analytics(
                &post.tenant_id,
                &post.id,
                Platform::Website,
                0,
            ))
            .await
            .unwrap();

        assert!(f.worker.poll_once().await.unwrap());
        assert_eq!(adapter.fetch_calls(), 0);
        assert!(f.queue.list_outstanding(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_post_drops_chain() {
        let adapter = MockAdapter::succeeding(Platform::Website);
        let f = fixture(adapter, AnalyticsOptions::default()).await;

        f.queue
            .enqueue(NewJob::analytics("tenant-1", "ghost", Platform::Website, 0))
            .await
            .unwrap();

        assert!(f.worker.poll_once().await.unwrap());
        assert!(f.queue.list_outstanding(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_interval_widens_geometrically() {
        let options = AnalyticsOptions {
            poll_interval: Duration::from_secs(100),
            max_poll_interval: Duration::from_secs(600),
            widen_age_step: Duration::from_secs(1000),
            ..Default::default()
        };
        let f = fixture(MockAdapter::succeeding(Platform::Website), options).await;

        assert_eq!(f.worker.next_poll_interval(0), Duration::from_secs(100));
        assert_eq!(f.worker.next_poll_interval(999), Duration::from_secs(100));
        assert_eq!(f.worker.next_poll_interval(1000), Duration::from_secs(200));
        assert_eq!(f.worker.next_poll_interval(2500), Duration::from_secs(400));
        // Capped.
        assert_eq!(f.worker.next_poll_interval(10_000), Duration::from_secs(600));
    }
}
