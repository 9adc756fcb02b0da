//! Job submission API
//!
//! The surface the rest of the system calls into: put an approved post on
//! the schedule, or withdraw a post's outstanding work when it is edited or
//! deleted before publish. Everything else flows through the scheduler and
//! workers.

use std::sync::Arc;

use tracing::info;

use crate::error::{FanoutError, Result};
use crate::queue::JobQueue;
use crate::repo::PostRepository;
use crate::state;
use crate::types::PostStatus;

pub struct SchedulingService {
    repo: Arc<dyn PostRepository>,
    queue: JobQueue,
}

impl SchedulingService {
    pub fn new(repo: Arc<dyn PostRepository>, queue: JobQueue) -> Self {
        Self { repo, queue }
    }

    /// Put a post on the schedule.
    ///
    /// Valid from `approved` (normal flow) and from `failed` (manual
    /// re-submission); the state machine rejects anything else. The
    /// schedule time must be in the future.
    pub async fn schedule_post(&self, post_id: &str, schedule_time: i64) -> Result<()> {
        let Some(post) = self.repo.get(post_id).await? else {
            return Err(FanoutError::InvalidInput(format!(
                "No such post: {}",
                post_id
            )));
        };

        let now = chrono::Utc::now().timestamp();
        if schedule_time <= now {
            return Err(FanoutError::InvalidInput(format!(
                "Schedule time {} is not in the future",
                schedule_time
            )));
        }

        state::validate_transition(post.status, PostStatus::Scheduled)?;

        let mut updated = post.clone();
        updated.status = PostStatus::Scheduled;
        updated.schedule_time = Some(schedule_time);
        self.repo.save(&updated, post.version).await?;

        info!("post {} scheduled for {}", post_id, schedule_time);
        Ok(())
    }

    /// Drop all outstanding jobs for a post. Used before edits or deletion;
    /// returns how many jobs were removed.
    pub async fn cancel_scheduled_jobs(&self, post_id: &str) -> Result<u64> {
        let removed = self.queue.cancel_jobs(post_id).await?;
        if removed > 0 {
            info!("cancelled {} outstanding job(s) for post {}", removed, post_id);
        }
        Ok(removed)
    }
}
