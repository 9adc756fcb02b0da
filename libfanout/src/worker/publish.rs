//! Publish worker
//!
//! Consumes Publish jobs: resolves the post and credential, dispatches to
//! the platform adapter, records the attempt, and either acks (done or
//! given up) or nacks to the retry time. After every job it recomputes the
//! post's aggregate status from the attempt history.

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
use crate::state;
use crate::types::{Job, JobKind, JobLease, NewJob, Post, PostStatus, PublishAttempt};

/// Bounded read-modify-write retries for the status recomputation before a
/// version conflict is surfaced as fatal.
const MAX_STATUS_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct PublishOptions {
    /// Upper bound on one adapter call; overruns count as transient.
    pub call_timeout: Duration,
    /// Gap between a successful publish and the first analytics fetch.
    pub analytics_delay: Duration,
    /// Idle sleep when the queue has nothing due.
    pub idle_poll: Duration,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            analytics_delay: Duration::from_secs(900),
            idle_poll: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct PublishWorker {
    queue: JobQueue,
    repo: Arc<dyn PostRepository>,
    credentials: Arc<dyn CredentialResolver>,
    adapters: AdapterRegistry,
    retry: RetryPolicy,
    options: PublishOptions,
}

impl PublishWorker {
    pub fn new(
        queue: JobQueue,
        repo: Arc<dyn PostRepository>,
        credentials: Arc<dyn CredentialResolver>,
        adapters: AdapterRegistry,
        retry: RetryPolicy,
        options: PublishOptions,
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
        match self.queue.dequeue(JobKind::Publish, None).await? {
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
            "processing publish job {} ({} -> {}, attempt {})",
            job.id, job.post_id, job.platform, job.attempt
        );

        let Some(post) = self.repo.get(&job.post_id).await? else {
            warn!(
                "publish job {} references missing post {}, dropping",
                job.id, job.post_id
            );
            self.queue.ack(&lease).await?;
            return Ok(());
        };

        let outcome = self.dispatch_publish(&post, &job).await?;
        let now = chrono::Utc::now().timestamp();

        match outcome {
            Ok(remote_post_id) => {
                info!(
                    "published post {} to {} as {}",
                    job.post_id, job.platform, remote_post_id
                );

                let attempt = PublishAttempt::succeeded(
                    &job.post_id,
                    job.platform,
                    job.attempt,
                    now,
                    &remote_post_id,
                );
                if !self.repo.append_attempt(&attempt).await? {
                    debug!(
                        "attempt {} for {}/{} already recorded, replayed job",
                        job.attempt, job.post_id, job.platform
                    );
                }
                self.queue.ack(&lease).await?;

                let follow_up = NewJob::analytics(
                    &job.tenant_id,
                    &job.post_id,
                    job.platform,
                    now + self.options.analytics_delay.as_secs() as i64,
                );
                match self.queue.enqueue(follow_up).await {
                    Ok(_) => {}
                    // An analytics chain for this target already exists.
                    Err(FanoutError::DuplicateJob(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Err(error) => {
                let kind = error.kind();
                match self.retry.decide(job.attempt as u32, kind) {
                    RetryDecision::RetryAfter(delay) => {
                        let next_retry_at = now + delay.as_secs_f64().ceil() as i64;
                        warn!(
                            "publish of {} to {} failed (attempt {}): {}; retrying at {}",
                            job.post_id,
                            job.platform,
                            job.attempt,
                            error.message(),
                            next_retry_at
                        );

                        let attempt = PublishAttempt::failed(
                            &job.post_id,
                            job.platform,
                            job.attempt,
                            now,
                            kind,
                            error.message(),
                            Some(next_retry_at),
                        );
                        self.repo.append_attempt(&attempt).await?;
                        self.queue.nack(&lease, next_retry_at).await?;
                    }
                    RetryDecision::GiveUp => {
                        warn!(
                            "giving up on {} to {} after attempt {}: {}",
                            job.post_id,
                            job.platform,
                            job.attempt,
                            error.message()
                        );

                        let attempt = PublishAttempt::failed(
                            &job.post_id,
                            job.platform,
                            job.attempt,
                            now,
                            kind,
                            error.message(),
                            None,
                        );
                        self.repo.append_attempt(&attempt).await?;
                        self.queue.ack(&lease).await?;
                    }
                }
            }
        }

        self.refresh_status(&job.post_id).await
    }

    /// One adapter call, bounded by the call timeout. The inner result is
    /// the business outcome; the outer one carries storage faults from
    /// credential resolution, which stay fatal.
    async fn dispatch_publish(
        &self,
        post: &Post,
        job: &Job,
    ) -> Result<std::result::Result<String, AdapterError>> {
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

        let outcome =
            match tokio::time::timeout(self.options.call_timeout, adapter.publish(post, &credential))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(AdapterError::Transient(format!(
                    "publish call exceeded {}s",
                    self.options.call_timeout.as_secs()
                ))),
            };

        Ok(outcome)
    }

    /// Recompute the aggregate status from the attempt history and persist
    /// it, retrying the read-modify-write on version conflicts.
    async fn refresh_status(&self, post_id: &str) -> Result<()> {
        for _ in 0..MAX_STATUS_RETRIES {
            let Some(post) = self.repo.get(post_id).await? else {
                return Ok(());
            };
            // Only in-flight posts move; a post someone already resolved
            // (or manually reset) is left alone.
            if post.status != PostStatus::Scheduled {
                return Ok(());
            }

            let attempts = self.repo.attempts_for_post(post_id).await?;
            let derived = state::derive_aggregate(
                &post.platforms,
                &attempts,
                post.schedule_time.unwrap_or(0),
            );
            if derived == post.status {
                return Ok(());
            }
            state::validate_transition(post.status, derived)?;

            let mut updated = post.clone();
            updated.status = derived;
            match self.repo.save(&updated, post.version).await {
                Ok(()) => {
                    info!("post {} is now {}", post_id, derived);
                    return Ok(());
                }
                // Another worker finished a sibling platform first; re-read
                // and try again.
                Err(FanoutError::VersionConflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(FanoutError::VersionConflict(post_id.to_string()))
    }
}
