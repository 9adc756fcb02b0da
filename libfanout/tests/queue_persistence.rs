//! Durability tests
//!
//! The queue must survive process restarts: jobs enqueued before a crash
//! are still there afterwards, and expired leases from the dead process
//! are recoverable by the new one.

use std::time::Duration;

use libfanout::repo::PostRepository;
use libfanout::types::{JobKind, NewJob, Platform, PublishAttempt};
use libfanout::{Database, JobQueue};
use tempfile::TempDir;

fn db_path(temp_dir: &TempDir) -> String {
    temp_dir
        .path()
        .join("fanout.db")
        .to_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_jobs_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);

    {
        let db = Database::new(&path).await.unwrap();
        let queue = JobQueue::new(db, Duration::from_secs(60));
        queue
            .enqueue(NewJob::publish("tenant-1", "post-1", Platform::Website, 0))
            .await
            .unwrap();
    }

    // New process, same file.
    let db = Database::new(&path).await.unwrap();
    let queue = JobQueue::new(db, Duration::from_secs(60));

    let lease = queue
        .dequeue(JobKind::Publish, None)
        .await
        .unwrap()
        .expect("job must survive reopen");
    assert_eq!(lease.job.post_id, "post-1");
    assert_eq!(lease.job.platform, Platform::Website);
}

#[tokio::test]
async fn test_expired_lease_recovered_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);

    // First process leases the job and crashes without acking. Zero
    // visibility stands in for the lease having expired by the time the
    // replacement process looks.
    let dead_lease = {
        let db = Database::new(&path).await.unwrap();
        let queue = JobQueue::new(db, Duration::ZERO);
        queue
            .enqueue(NewJob::publish("tenant-1", "post-1", Platform::Website, 0))
            .await
            .unwrap();
        queue
            .dequeue(JobKind::Publish, None)
            .await
            .unwrap()
            .unwrap()
    };

    let db = Database::new(&path).await.unwrap();
    let queue = JobQueue::new(db, Duration::from_secs(60));

    // The replacement process picks the job up exactly once.
    let recovered = queue
        .dequeue(JobKind::Publish, None)
        .await
        .unwrap()
        .expect("expired lease must be recoverable");
    assert_eq!(recovered.job.id, dead_lease.job.id);
    assert!(queue.dequeue(JobKind::Publish, None).await.unwrap().is_none());

    // The dead process's handle is useless even across restarts.
    assert!(!queue.ack(&dead_lease).await.unwrap());
    assert!(queue.ack(&recovered).await.unwrap());
}

#[tokio::test]
async fn test_attempt_history_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = db_path(&temp_dir);

    let post_id = {
        let db = Database::new(&path).await.unwrap();
        let post = libfanout::Post::new(
            "tenant-1",
            "client-1",
            "Title",
            "Body",
            vec![Platform::Website],
        );
        db.create_post(&post).await.unwrap();
        db.append_attempt(&PublishAttempt::succeeded(
            &post.id,
            Platform::Website,
            1,
            100,
            "remote-1",
        ))
        .await
        .unwrap();
        post.id
    };

    let db = Database::new(&path).await.unwrap();
    let attempts = db.attempts_for_post(&post_id).await.unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].remote_post_id(), Some("remote-1"));

    // Replayed attempt numbers stay idempotent across restarts too.
    assert!(!db
        .append_attempt(&PublishAttempt::succeeded(
            &post_id,
            Platform::Website,
            1,
            100,
            "remote-1",
        ))
        .await
        .unwrap());
}
