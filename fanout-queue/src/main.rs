//! fanout-queue - Inspect and manage the job queue
//!
//! Unix-style tool for operating on the Fanout publishing queue.

use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use libfanout::queue::JobSummary;
use libfanout::service::SchedulingService;
use libfanout::types::JobKind;
use libfanout::{Config, Database, FanoutError, JobQueue, Result};

#[derive(Parser, Debug)]
#[command(name = "fanout-queue")]
#[command(version)]
#[command(about = "Inspect and manage the Fanout job queue")]
#[command(long_about = "\
fanout-queue - Inspect and manage the Fanout job queue

DESCRIPTION:
    fanout-queue is a Unix-style tool for operating on the publishing
    queue: list outstanding jobs, put an approved post on the schedule,
    withdraw a post's jobs, or view queue statistics.

COMMANDS:
    list        List outstanding jobs
    schedule    Put a post on the schedule
    cancel      Cancel all outstanding jobs for a post
    stats       Show queue statistics

USAGE EXAMPLES:
    # List outstanding jobs
    fanout-queue list

    # List only analytics jobs, as JSON
    fanout-queue list --kind analytics --format json

    # Schedule a post two hours from now
    fanout-queue schedule <POST_ID> 2h

    # Schedule a post at an absolute time
    fanout-queue schedule <POST_ID> 2026-09-01T09:00:00Z

    # Cancel everything outstanding for a post
    fanout-queue cancel <POST_ID>

    # View queue statistics
    fanout-queue stats

CONFIGURATION:
    Configuration file: ~/.config/fanout/config.toml
    Override with the FANOUT_CONFIG environment variable.

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (bad post ID, time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List outstanding jobs
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Filter by job kind: publish or analytics
        #[arg(short, long)]
        kind: Option<String>,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Put a post on the schedule
    Schedule {
        /// Post ID to schedule
        post_id: String,

        /// When to publish: a relative offset ("2h", "30m") or an RFC 3339
        /// timestamp ("2026-09-01T09:00:00Z")
        time: String,
    },

    /// Cancel all outstanding jobs for a post
    Cancel {
        /// Post ID to cancel jobs for
        post_id: String,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("error")
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let queue = JobQueue::new(db.clone(), config.queue.visibility_timeout());

    match cli.command {
        Commands::List {
            format,
            kind,
            limit,
        } => {
            cmd_list(&queue, &format, kind.as_deref(), limit).await?;
        }
        Commands::Schedule { post_id, time } => {
            let service = SchedulingService::new(Arc::new(db), queue);
            cmd_schedule(&service, &post_id, &time).await?;
        }
        Commands::Cancel { post_id } => {
            let service = SchedulingService::new(Arc::new(db), queue);
            cmd_cancel(&service, &post_id).await?;
        }
        Commands::Stats { format } => {
            cmd_stats(&queue, &format).await?;
        }
    }

    Ok(())
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(FanoutError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

/// List outstanding jobs
async fn cmd_list(queue: &JobQueue, format: &str, kind: Option<&str>, limit: usize) -> Result<()> {
    validate_format(format)?;

    let kind = kind
        .map(|k| {
            JobKind::from_str(k).map_err(FanoutError::InvalidInput)
        })
        .transpose()?;

    let mut jobs = queue.list_outstanding(limit).await?;
    if let Some(kind) = kind {
        jobs.retain(|s| s.job.kind == kind);
    }

    if format == "json" {
        output_list_json(&jobs);
    } else {
        output_list_text(&jobs);
    }

    Ok(())
}

/// Output jobs as JSON
fn output_list_json(jobs: &[JobSummary]) {
    let json: Vec<serde_json::Value> = jobs
        .iter()
        .map(|s| {
            serde_json::json!({
                "id": s.job.id,
                "kind": s.job.kind,
                "tenant_id": s.job.tenant_id,
                "post_id": s.job.post_id,
                "platform": s.job.platform,
                "attempt": s.job.attempt,
                "not_before": s.job.not_before,
                "leased": s.leased,
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json).unwrap());
}

/// Output jobs as human-readable text
fn output_list_text(jobs: &[JobSummary]) {
    if jobs.is_empty() {
        return;
    }

    let now = chrono::Utc::now().timestamp();

    for summary in jobs {
        let job = &summary.job;
        let due = format_time_until(now, job.not_before);
        let state = if summary.leased { "leased" } else { "waiting" };

        println!(
            "{} | {} | {} -> {} | attempt {} | {} | {}",
            job.id, job.kind, job.post_id, job.platform, job.attempt, due, state
        );
    }
}

/// Format time until a timestamp in human-readable form
fn format_time_until(now: i64, at: i64) -> String {
    let diff = at - now;

    if diff <= 0 {
        return "due".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}

/// Parse a schedule time: relative offset or RFC 3339 timestamp
fn parse_schedule_time(input: &str, now: i64) -> Result<i64> {
    if let Ok(offset) = humantime::parse_duration(input) {
        return Ok(now + offset.as_secs() as i64);
    }

    if let Ok(at) = chrono::DateTime::parse_from_rfc3339(input) {
        return Ok(at.timestamp());
    }

    Err(FanoutError::InvalidInput(format!(
        "Could not parse schedule time '{}'. Use a relative offset like '2h' or an RFC 3339 timestamp",
        input
    )))
}

/// Put a post on the schedule
async fn cmd_schedule(service: &SchedulingService, post_id: &str, time: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let schedule_time = parse_schedule_time(time, now)?;

    service.schedule_post(post_id, schedule_time).await?;

    println!("{} scheduled at {}", post_id, schedule_time);
    Ok(())
}

/// Cancel all outstanding jobs for a post
async fn cmd_cancel(service: &SchedulingService, post_id: &str) -> Result<()> {
    let removed = service.cancel_scheduled_jobs(post_id).await?;
    println!("cancelled {} job(s) for {}", removed, post_id);
    Ok(())
}

/// Show queue statistics
async fn cmd_stats(queue: &JobQueue, format: &str) -> Result<()> {
    validate_format(format)?;

    let stats = queue.stats().await?;

    if format == "json" {
        let json = serde_json::json!({
            "publish_outstanding": stats.publish_outstanding,
            "analytics_outstanding": stats.analytics_outstanding,
            "leased": stats.leased,
            "ready": stats.ready,
        });
        println!("{}", serde_json::to_string_pretty(&json).unwrap());
    } else {
        println!("publish jobs:    {}", stats.publish_outstanding);
        println!("analytics jobs:  {}", stats.analytics_outstanding);
        println!("currently leased: {}", stats.leased);
        println!("ready to run:    {}", stats.ready);
    }

    Ok(())
}
