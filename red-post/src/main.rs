//! red-post - Post or cross-post to Reddit, now or later

use chrono::Utc;
use clap::Parser;
use std::collections::HashMap;
use std::io::Read;

use libredcast::logging::LoggingConfig;
use libredcast::scheduling::parse_requested_instant;
use libredcast::types::{normalize_community, CredentialPair, Destination, PostContent};
use libredcast::{
    Config, Database, FanOut, FanOutReport, FanOutRequest, Ledger, Outcome, Poster, RedcastError,
    Result,
};

#[derive(Parser, Debug)]
#[command(name = "red-post")]
#[command(version)]
#[command(about = "Post or cross-post to Reddit, now or later")]
#[command(long_about = "\
red-post - Post or cross-post to Reddit, now or later

DESCRIPTION:
    Submits one text post to one or more subreddits. Posts due within two
    minutes are published immediately; later ones are stored for red-send.
    With several subreddits, --stagger spaces them out by N minutes each.

USAGE EXAMPLES:
    # Post now
    echo \"Body text\" | red-post --user me --title \"Hello\" --to rust

    # Cross-post tomorrow, one subreddit every 30 minutes
    red-post --user me --title \"Launch\" --to rust,programming --at \"tomorrow 9am\" --stagger 30 \"We shipped\"

    # Pick a flair for one destination
    red-post --user me --title \"Q\" --to rust --flair rust=abc123:Question \"How do I...\"

CREDENTIALS:
    REDDIT_ACCESS_TOKEN   - OAuth access token
    REDDIT_REFRESH_TOKEN  - OAuth refresh token (used once if the access token expired)

EXIT CODES:
    0 - All destinations accepted (or some, with a warning)
    1 - Every destination failed, or a runtime error
    2 - Authentication error
    3 - Invalid input
    4 - Not enough posts left on the plan
")]
struct Cli {
    /// Post body (reads from stdin if not provided)
    body: Option<String>,

    /// User the post is charged to
    #[arg(short, long)]
    user: String,

    /// Post title
    #[arg(short, long)]
    title: String,

    /// Target subreddit(s), comma-separated
    #[arg(long = "to", value_delimiter = ',', required = true)]
    to: Vec<String>,

    /// Publish time: RFC 3339, "30m", or "tomorrow 3pm" (default: now)
    #[arg(short, long)]
    at: Option<String>,

    /// Minutes between consecutive subreddits
    #[arg(short, long, default_value_t = 0)]
    stagger: u32,

    /// Flair for a subreddit as SUBREDDIT=FLAIR_ID[:TEXT] (repeatable)
    #[arg(long)]
    flair: Vec<String>,

    /// IANA timezone the post was scheduled in (stored for display)
    #[arg(long)]
    tz: Option<String>,

    #[arg(long, env = "REDDIT_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    #[arg(long, env = "REDDIT_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: String,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    match run(cli).await {
        Ok(Outcome::Failed) => std::process::exit(1),
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<Outcome> {
    if cli.format != "text" && cli.format != "json" {
        return Err(RedcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            cli.format
        )));
    }

    let body = match cli.body {
        Some(body) => body,
        None => read_stdin()?,
    };

    let now = Utc::now();
    let base_instant = match cli.at.as_deref() {
        Some(at) => parse_requested_instant(at, now)?,
        None => now,
    };

    let destinations = build_destinations(&cli.to, &cli.flair)?;

    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let poster = Poster::from_config(&config, db.clone())?;
    let ledger = Ledger::new(db, config.quota.initial_posts);
    let fanout = FanOut::new(poster, ledger);

    let request = FanOutRequest {
        user_id: cli.user,
        content: PostContent::text(cli.title, body.trim_end().to_string()),
        destinations,
        stagger_minutes: cli.stagger,
        base_instant,
        reference_instant: now,
        time_zone: cli.tz,
        credentials: CredentialPair::new(cli.access_token, cli.refresh_token),
    };

    tracing::debug!(
        user = %request.user_id,
        destinations = request.destinations.len(),
        at = %base_instant,
        "Submitting post"
    );

    let report = if request.destinations.len() == 1 {
        fanout.run_single(&request).await?
    } else {
        fanout.run(&request).await?
    };

    if cli.format == "json" {
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| RedcastError::InvalidInput(format!("Failed to encode report: {}", e)))?;
        println!("{}", json);
    } else {
        print_report(&report);
    }

    if let Some(quota_error) = &report.quota_error {
        eprintln!("Warning: {}", quota_error);
    }

    let outcome = report.outcome();
    match outcome {
        Outcome::Partial => eprintln!(
            "Warning: {} of {} subreddits failed",
            report.failed.len(),
            report.total
        ),
        Outcome::Failed => eprintln!("Error: every subreddit failed"),
        Outcome::Success => {}
    }

    Ok(outcome)
}

fn read_stdin() -> Result<String> {
    let mut body = String::new();
    std::io::stdin()
        .read_to_string(&mut body)
        .map_err(|e| RedcastError::InvalidInput(format!("Failed to read stdin: {}", e)))?;
    Ok(body)
}

/// Pair each `--to` subreddit with its `--flair`, if any
fn build_destinations(to: &[String], flairs: &[String]) -> Result<Vec<Destination>> {
    let mut by_community: HashMap<String, (String, Option<String>)> = HashMap::new();
    for arg in flairs {
        let (community, flair) = parse_flair(arg)?;
        by_community.insert(community.to_lowercase(), flair);
    }

    let mut destinations = Vec::with_capacity(to.len());
    for name in to {
        let mut destination = Destination::new(name);
        if let Some((id, text)) = by_community.remove(&destination.community.to_lowercase()) {
            destination = destination.with_flair(id, text);
        }
        destinations.push(destination);
    }

    if let Some(unused) = by_community.keys().next() {
        return Err(RedcastError::InvalidInput(format!(
            "Flair given for r/{} which is not a target",
            unused
        )));
    }

    Ok(destinations)
}

/// Parse SUBREDDIT=FLAIR_ID[:TEXT]
fn parse_flair(arg: &str) -> Result<(String, (String, Option<String>))> {
    let invalid = || {
        RedcastError::InvalidInput(format!(
            "Invalid flair '{}'. Expected SUBREDDIT=FLAIR_ID[:TEXT]",
            arg
        ))
    };

    let (community, flair) = arg.split_once('=').ok_or_else(invalid)?;
    let community = normalize_community(community);
    let (id, text) = match flair.split_once(':') {
        Some((id, text)) => (id.trim(), Some(text.trim().to_string())),
        None => (flair.trim(), None),
    };

    if community.is_empty() || id.is_empty() {
        return Err(invalid());
    }

    Ok((
        community,
        (id.to_string(), text.filter(|t| !t.is_empty())),
    ))
}

fn print_report(report: &FanOutReport) {
    for success in &report.successful {
        let detail = match (&success.url, success.duplicate) {
            (_, true) => "already submitted".to_string(),
            (Some(url), false) => url.clone(),
            (None, false) => chrono::DateTime::from_timestamp(success.scheduled_for, 0)
                .map(|t| format!("at {}", t.to_rfc3339()))
                .unwrap_or_default(),
        };
        println!("r/{}: {} {}", success.destination, success.status, detail);
    }

    for failure in &report.failed {
        println!(
            "r/{}: failed - {} ({})",
            failure.destination,
            failure.reason,
            failure.category.user_message()
        );
    }
}
