//! red-send - Background daemon for scheduled Reddit posts
//!
//! Polls the post store and publishes every scheduled post whose time has
//! come, using the credentials captured when it was scheduled.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use libredcast::logging::LoggingConfig;
use libredcast::{Config, Database, Dispatcher, Poster};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "red-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled Reddit posts")]
#[command(long_about = "\
red-send - Background daemon for scheduled Reddit posts

DESCRIPTION:
    red-send is a long-running daemon that publishes posts scheduled with
    red-post once they fall due.

    Each poll picks up due posts, oldest first, and submits them
    concurrently. A post whose access token expired is refreshed and
    retried once. Any other failure marks the post failed; it is not
    retried and its quota is not returned.

USAGE:
    # Run in foreground (logs to stderr)
    red-send

    # Run with custom poll interval
    red-send --poll-interval 30

    # Enable verbose logging
    red-send --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current poll)

CONFIGURATION:
    Configuration file: ~/.config/redcast/config.toml
    Database location: ~/.local/share/redcast/posts.db

    [scheduling]
    poll_interval_secs = 60    # seconds between polls
    dispatch_batch_size = 50   # due posts handled per poll

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime or configuration error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Process due posts once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    let config = Config::load().context("Failed to load configuration")?;
    let db = Database::new(&config.database.path)
        .await
        .context("Failed to open post database")?;
    let poster = Poster::from_config(&config, db)?;
    let dispatcher = Dispatcher::new(poster, config.scheduling.dispatch_batch_size);

    info!("red-send daemon starting");

    if cli.once {
        process_due_posts(&dispatcher).await?;
        info!("red-send: processed posts once, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval = cli
        .poll_interval
        .unwrap_or(config.scheduling.poll_interval_secs)
        .max(1);
    info!("Poll interval: {}s", poll_interval);

    run_daemon_loop(&dispatcher, poll_interval, shutdown).await;

    info!("red-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    Ok(())
}

async fn run_daemon_loop(dispatcher: &Dispatcher, poll_interval: u64, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        if let Err(e) = process_due_posts(dispatcher).await {
            error!("Error processing posts: {}", e);
        }

        // Sleep until next poll (check shutdown every second)
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

async fn process_due_posts(dispatcher: &Dispatcher) -> Result<()> {
    let summary = dispatcher.run_once(Utc::now()).await?;

    if summary.total() > 0 {
        info!(
            published = summary.published,
            failed = summary.failed,
            unrecorded = summary.unrecorded,
            "Dispatched {} due post(s)",
            summary.total()
        );
    }

    Ok(())
}
