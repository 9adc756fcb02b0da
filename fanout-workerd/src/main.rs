//! fanout-workerd - Background daemon for the publishing pipeline
//!
//! Runs the scheduler sweep plus fixed-size publish and analytics worker
//! pools against the shared durable queue.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use libfanout::adapters::website::WebsiteAdapter;
use libfanout::adapters::AdapterRegistry;
use libfanout::scheduler::Scheduler;
use libfanout::worker::analytics::{AnalyticsOptions, AnalyticsWorker};
use libfanout::worker::publish::{PublishOptions, PublishWorker};
use libfanout::{Config, Database, FanoutError, JobQueue, Result};
use tokio::task::JoinSet;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "fanout-workerd")]
#[command(version)]
#[command(about = "Background daemon for the publishing pipeline")]
#[command(long_about = "\
fanout-workerd - Background daemon for the publishing pipeline

DESCRIPTION:
    fanout-workerd is a long-running daemon that drives the Fanout job
    queue. It sweeps for posts whose schedule time has arrived, publishes
    them to each targeted platform through the configured adapters, and
    polls platform analytics for published posts.

    Worker pools are fixed-size and consume the queue independently. Any
    job interrupted by a crash or shutdown becomes visible again once its
    lease expires, so restarting the daemon is always safe.

USAGE:
    # Run in foreground (logs to stderr)
    fanout-workerd

    # Run with a custom sweep interval
    fanout-workerd --sweep-interval 10

    # Enable verbose logging
    fanout-workerd --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (drains in-flight jobs up to the
    configured drain deadline, then relies on lease expiry)

CONFIGURATION:
    Configuration file: ~/.config/fanout/config.toml
    Override with FANOUT_CONFIG or --config.

    [database]
    path = \"~/.local/share/fanout/fanout.db\"

    [workers]
    publish = 4
    analytics = 2

    [platforms.website]
    enabled = true
    endpoint = \"https://client.example.com/api\"

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Path to the config file (overrides FANOUT_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Scheduler sweep interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    sweep_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run one sweep, drain due jobs, and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("fanout-workerd failed: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };

    let db = Database::new(&config.database.path).await?;
    let queue = JobQueue::new(db.clone(), config.queue.visibility_timeout());
    let repo = Arc::new(db.clone());

    let registry = build_registry(&config);
    if registry.is_empty() {
        warn!("no platform adapters are enabled in configuration");
    } else {
        info!("registered adapter(s) for: {:?}", registry.platforms());
    }

    let retry = config.retry.policy();
    let idle_poll = config.queue.idle_poll();

    let publish_worker = PublishWorker::new(
        queue.clone(),
        repo.clone(),
        repo.clone(),
        registry.clone(),
        retry,
        PublishOptions {
            call_timeout: config.publish.call_timeout(),
            analytics_delay: config.publish.analytics_delay(),
            idle_poll,
        },
    );

    let analytics_worker = AnalyticsWorker::new(
        queue.clone(),
        repo.clone(),
        repo.clone(),
        registry,
        retry,
        AnalyticsOptions {
            call_timeout: config.publish.call_timeout(),
            poll_interval: config.analytics.poll_interval(),
            max_poll_interval: config.analytics.max_poll_interval(),
            widen_age_step: config.analytics.widen_age_step(),
            horizon: config.analytics.horizon(),
            idle_poll,
        },
    );

    let sweep_interval = cli
        .sweep_interval
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.scheduler.sweep_interval());
    let scheduler = Scheduler::new(queue.clone(), repo, sweep_interval);

    info!(
        "fanout-workerd starting (publish pool: {}, analytics pool: {}, sweep: {}s)",
        config.workers.publish,
        config.workers.analytics,
        sweep_interval.as_secs()
    );

    if cli.once {
        run_once(&scheduler, &publish_worker, &analytics_worker).await?;
        info!("fanout-workerd: processed due work once, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let outcome = run_daemon(
        scheduler,
        publish_worker,
        analytics_worker,
        &config,
        shutdown,
    )
    .await;

    info!("fanout-workerd stopped");
    outcome
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Build the adapter registry from configuration. Adapters are constructed
/// once here and shared by every worker.
fn build_registry(config: &Config) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();

    if let Some(website) = &config.platforms.website {
        if website.enabled {
            registry.register(Arc::new(WebsiteAdapter::new(website.endpoint.as_str())));
        }
    }

    registry
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
            FanoutError::InvalidInput(format!("Signal setup failed: {}", e))
        })?;

        std::thread::spawn(move || {
            for sig in signals.forever() {
                match sig {
                    SIGTERM | SIGINT => {
                        info!("received shutdown signal, stopping gracefully...");
                        shutdown.store(true, Ordering::Relaxed);
                        break;
                    }
                    _ => {}
                }
            }
        });
    }

    #[cfg(not(unix))]
    let _ = shutdown;

    Ok(())
}

/// One sweep, then drain everything currently due. Used by `--once`.
async fn run_once(
    scheduler: &Scheduler,
    publish_worker: &PublishWorker,
    analytics_worker: &AnalyticsWorker,
) -> Result<()> {
    let enqueued = scheduler.sweep_once().await?;
    info!("sweep enqueued {} job(s)", enqueued);

    loop {
        let published = publish_worker.poll_once().await?;
        let fetched = analytics_worker.poll_once().await?;
        if !published && !fetched {
            return Ok(());
        }
    }
}

async fn run_daemon(
    scheduler: Scheduler,
    publish_worker: PublishWorker,
    analytics_worker: AnalyticsWorker,
    config: &Config,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    {
        let shutdown = shutdown.clone();
        tasks.spawn(async move { scheduler.run(shutdown).await });
    }
    for _ in 0..config.workers.publish {
        let worker = publish_worker.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move { worker.run(shutdown).await });
    }
    for _ in 0..config.workers.analytics {
        let worker = analytics_worker.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(async move { worker.run(shutdown).await });
    }

    // Supervise: a clean exit only happens after a shutdown signal. A task
    // returning an error means the durable store is unreachable, which is
    // fatal for the whole process.
    let mut failure: Option<FanoutError> = None;
    while !shutdown.load(Ordering::Relaxed) {
        tokio::select! {
            joined = tasks.join_next() => {
                match joined {
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        error!("worker stopped with fatal error: {}", e);
                        failure = Some(e);
                        shutdown.store(true, Ordering::Relaxed);
                    }
                    Some(Err(join_error)) => {
                        error!("worker panicked: {}", join_error);
                        failure = Some(FanoutError::InvalidInput(format!(
                            "worker panicked: {}",
                            join_error
                        )));
                        shutdown.store(true, Ordering::Relaxed);
                    }
                    None => break,
                }
            }
            _ = sleep(Duration::from_millis(250)) => {}
        }
    }
    shutdown.store(true, Ordering::Relaxed);

    // Drain: give in-flight jobs until the deadline to ack/nack, then
    // abandon the rest to lease-timeout recovery.
    let drain = config.workers.drain_deadline();
    let drained = tokio::time::timeout(drain, async {
        while let Some(joined) = tasks.join_next().await {
            if let Ok(Err(e)) = joined {
                error!("worker failed during drain: {}", e);
            }
        }
    })
    .await;

    if drained.is_err() {
        warn!(
            "drain deadline of {}s reached, abandoning in-flight jobs to lease recovery",
            drain.as_secs()
        );
        tasks.abort_all();
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
