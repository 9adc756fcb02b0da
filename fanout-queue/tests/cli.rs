//! Integration tests for the fanout-queue CLI

use std::fs;
use std::time::Duration;

use assert_cmd::Command;
use libfanout::repo::PostRepository;
use libfanout::types::{NewJob, Platform};
use libfanout::{Database, JobQueue, Post, PostStatus};
use predicates::prelude::*;
use tempfile::TempDir;

/// Setup test environment with config and database
async fn setup_test_env() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("test.db");

    let config_content = format!(
        r#"
[database]
path = "{}"
"#,
        db_path.display().to_string().replace('\\', "/")
    );

    fs::write(&config_path, config_content).unwrap();

    let _db = Database::new(db_path.to_str().unwrap()).await.unwrap();

    (
        temp_dir,
        config_path.to_str().unwrap().to_string(),
        db_path.to_str().unwrap().to_string(),
    )
}

async fn create_post(db_path: &str, status: PostStatus) -> String {
    let db = Database::new(db_path).await.unwrap();

    let mut post = Post::new(
        "tenant-1",
        "client-1",
        "CLI post",
        "Body",
        vec![Platform::Website],
    );
    post.status = status;

    let post_id = post.id.clone();
    db.create_post(&post).await.unwrap();
    post_id
}

fn queue_cmd(config_path: &str) -> Command {
    let mut cmd = Command::cargo_bin("fanout-queue").unwrap();
    cmd.env("FANOUT_CONFIG", config_path);
    cmd
}

#[test]
fn test_help() {
    let mut cmd = Command::cargo_bin("fanout-queue").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Inspect and manage"));
}

#[tokio::test]
async fn test_schedule_approved_post() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    let post_id = create_post(&db_path, PostStatus::Approved).await;

    queue_cmd(&config_path)
        .args(["schedule", &post_id, "2h"])
        .assert()
        .success()
        .stdout(predicate::str::contains("scheduled at"));

    let db = Database::new(&db_path).await.unwrap();
    let post = db.get(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Scheduled);
    assert!(post.schedule_time.unwrap() > chrono::Utc::now().timestamp());
}

#[tokio::test]
async fn test_schedule_rejects_bad_time() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    let post_id = create_post(&db_path, PostStatus::Approved).await;

    queue_cmd(&config_path)
        .args(["schedule", &post_id, "whenever"])
        .assert()
        .failure()
        .code(3);
}

#[tokio::test]
async fn test_schedule_rejects_draft_post() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    let post_id = create_post(&db_path, PostStatus::Draft).await;

    // draft -> scheduled is not in the transition table.
    queue_cmd(&config_path)
        .args(["schedule", &post_id, "2h"])
        .assert()
        .failure()
        .code(1);
}

#[tokio::test]
async fn test_cancel_outstanding_jobs() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    let post_id = create_post(&db_path, PostStatus::Scheduled).await;

    let db = Database::new(&db_path).await.unwrap();
    let queue = JobQueue::new(db, Duration::from_secs(60));
    queue
        .enqueue(NewJob::publish("tenant-1", &post_id, Platform::Website, 0))
        .await
        .unwrap();
    queue
        .enqueue(NewJob::analytics("tenant-1", &post_id, Platform::Website, 0))
        .await
        .unwrap();

    queue_cmd(&config_path)
        .args(["cancel", &post_id])
        .assert()
        .success()
        .stdout(predicate::str::contains("cancelled 2 job(s)"));

    assert!(queue.list_outstanding(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_and_stats() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    let post_id = create_post(&db_path, PostStatus::Scheduled).await;

    let db = Database::new(&db_path).await.unwrap();
    let queue = JobQueue::new(db, Duration::from_secs(60));
    queue
        .enqueue(NewJob::publish("tenant-1", &post_id, Platform::Website, 0))
        .await
        .unwrap();

    queue_cmd(&config_path)
        .args(["list"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&post_id).and(predicate::str::contains("publish")));

    queue_cmd(&config_path)
        .args(["list", "--kind", "analytics"])
        .assert()
        .success()
        .stdout(predicate::str::contains(&post_id).not());

    queue_cmd(&config_path)
        .args(["stats", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"publish_outstanding\": 1"));
}

#[tokio::test]
async fn test_list_rejects_unknown_kind() {
    let (_temp_dir, config_path, _db_path) = setup_test_env().await;

    queue_cmd(&config_path)
        .args(["list", "--kind", "cleanup"])
        .assert()
        .failure()
        .code(3);
}
