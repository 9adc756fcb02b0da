//! Scheduler sweep
//!
//! Periodically promotes due posts into Publish jobs: every post in
//! `scheduled` status whose schedule time has arrived gets one job per
//! still-unresolved platform. Re-running a sweep before jobs complete is
//! harmless; the queue's dedup key rejects the second enqueue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::error::{FanoutError, Result};
use crate::queue::JobQueue;
use crate::repo::PostRepository;
use crate::state::{platform_resolution, PlatformResolution};
use crate::types::NewJob;

pub struct Scheduler {
    queue: JobQueue,
    repo: Arc<dyn PostRepository>,
    sweep_interval: Duration,
}

impl Scheduler {
    pub fn new(queue: JobQueue, repo: Arc<dyn PostRepository>, sweep_interval: Duration) -> Self {
        Self {
            queue,
            repo,
            sweep_interval,
        }
    }

    /// Run one sweep. Returns how many jobs were enqueued.
    pub async fn sweep_once(&self) -> Result<usize> {
        let now = chrono::Utc::now().timestamp();
        let due = self.repo.list_due_for_publish(now).await?;

        if due.is_empty() {
            return Ok(0);
        }

        debug!("sweep found {} post(s) due for publish", due.len());

        let mut enqueued = 0;
        for post in due {
            let attempts = self.repo.attempts_for_post(&post.id).await?;
            let epoch = post.schedule_time.unwrap_or(0);

            for platform in &post.platforms {
                // A platform that already succeeded or exhausted its
                // retries needs no new job; one with a retry pending has an
                // outstanding job that the dedup key will catch below.
                if platform_resolution(*platform, &attempts, epoch)
                    != PlatformResolution::Unresolved
                {
                    continue;
                }

                // Attempt numbering continues across re-submissions so the
                // audit trail stays unique.
                let mut job = NewJob::publish(&post.tenant_id, &post.id, *platform, now);
                job.attempt = attempts
                    .iter()
                    .filter(|a| a.platform == *platform)
                    .map(|a| a.attempt_number)
                    .max()
                    .unwrap_or(0)
                    + 1;

                match self.queue.enqueue(job).await {
                    Ok(_) => {
                        info!("enqueued publish job for {} -> {}", post.id, platform);
                        enqueued += 1;
                    }
                    Err(FanoutError::DuplicateJob(_)) => {
                        debug!("publish job for {} -> {} already outstanding", post.id, platform);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(enqueued)
    }

    /// Sweep on the configured interval until shutdown is requested.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested, stopping scheduler");
                return Ok(());
            }

            if let Err(e) = self.sweep_once().await {
                // Storage faults are fatal to the process; anything else
                // just waits for the next sweep.
                match e {
                    FanoutError::Database(_) => return Err(e),
                    other => error!("sweep failed: {}", other),
                }
            }

            // Sleep in one-second slices so shutdown stays responsive.
            for _ in 0..self.sweep_interval.as_secs().max(1) {
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
