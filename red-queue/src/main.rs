//! red-queue - Inspect stored posts and post quotas
//!
//! Unix-style tool over the Redcast post store and availability ledger.

use chrono::Utc;
use clap::{Parser, Subcommand};
use libredcast::logging::LoggingConfig;
use libredcast::{
    Config, Database, Ledger, PostFilter, PostStatus, RedcastError, Result, ScheduledPost,
};

#[derive(Parser, Debug)]
#[command(name = "red-queue")]
#[command(version)]
#[command(about = "Inspect stored posts and post quotas")]
#[command(long_about = "\
red-queue - Inspect stored posts and post quotas

DESCRIPTION:
    red-queue lists the posts Redcast has scheduled, published or failed,
    summarizes them, and shows or tops up how many posts a user has left.

COMMANDS:
    list        List stored posts, newest scheduled time first
    stats       Count posts per status
    quota       Show or grant a user's remaining posts

USAGE EXAMPLES:
    # Everything still waiting for red-send
    red-queue list --status scheduled

    # One user's cross-posts as JSON
    red-queue list --user alice --cross-posts --format json

    # Remaining posts for a user
    red-queue quota show alice

    # Add 10 posts to a user's plan
    red-queue quota grant alice 10

CONFIGURATION:
    Configuration file: ~/.config/redcast/config.toml
    Database location: ~/.local/share/redcast/posts.db

    Override with environment variables:
        REDCAST_CONFIG    - Path to config file
        REDCAST_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Database or configuration error
    3 - Invalid input (bad status, format, amount)
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
    /// List stored posts
    List {
        /// Only posts owned by this user
        #[arg(short, long)]
        user: Option<String>,

        /// Only posts in this status: scheduled, published or failed
        #[arg(short, long)]
        status: Option<String>,

        /// Only posts created by a cross-post batch
        #[arg(long)]
        cross_posts: bool,

        /// Maximum number of posts to show
        #[arg(short, long)]
        limit: Option<u32>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show post counts per status
    Stats {
        /// Only posts owned by this user
        #[arg(short, long)]
        user: Option<String>,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show or grant post quota
    Quota {
        #[command(subcommand)]
        action: QuotaAction,
    },
}

#[derive(Subcommand, Debug)]
enum QuotaAction {
    /// Show how many posts a user has left
    Show { user: String },

    /// Add posts to a user's remaining quota
    Grant { user: String, amount: i64 },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    tracing::debug!(path = %config.database.path, "Opened post store");

    match cli.command {
        Commands::List {
            user,
            status,
            cross_posts,
            limit,
            format,
        } => {
            validate_format(&format)?;
            let filter = PostFilter {
                user_id: user,
                status: status.as_deref().map(parse_status).transpose()?,
                cross_posts_only: cross_posts,
                limit,
            };
            cmd_list(&db, &filter, &format).await?;
        }
        Commands::Stats { user, format } => {
            validate_format(&format)?;
            cmd_stats(&db, user.as_deref(), &format).await?;
        }
        Commands::Quota { action } => {
            let ledger = Ledger::new(db, config.quota.initial_posts);
            match action {
                QuotaAction::Show { user } => {
                    let available = ledger.check_available(&user).await?;
                    println!("{}: {} post(s) available", user, available);
                }
                QuotaAction::Grant { user, amount } => {
                    let available = ledger.grant(&user, amount).await?;
                    println!("{}: {} post(s) available", user, available);
                }
            }
        }
    }

    Ok(())
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(RedcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn parse_status(status: &str) -> Result<PostStatus> {
    PostStatus::parse(status).ok_or_else(|| {
        RedcastError::InvalidInput(format!(
            "Invalid status '{}'. Must be 'scheduled', 'published' or 'failed'",
            status
        ))
    })
}

async fn cmd_list(db: &Database, filter: &PostFilter, format: &str) -> Result<()> {
    let posts = db.list_posts(filter).await?;

    if format == "json" {
        output_list_json(&posts)
    } else {
        output_list_text(&posts);
        Ok(())
    }
}

fn output_list_json(posts: &[ScheduledPost]) -> Result<()> {
    let json: Vec<serde_json::Value> = posts
        .iter()
        .map(|p| {
            serde_json::json!({
                "id": p.id,
                "user_id": p.user_id,
                "community": p.community,
                "title": p.title,
                "status": p.status,
                "scheduled_for": p.scheduled_for,
                "time_zone": p.time_zone,
                "posted_at": p.posted_at,
                "is_cross_post": p.is_cross_post,
                "url": p.external_url,
                "error": p.error_message,
            })
        })
        .collect();

    println!("{}", to_pretty_json(&json)?);
    Ok(())
}

fn output_list_text(posts: &[ScheduledPost]) {
    let now = Utc::now().timestamp();

    for post in posts {
        let when = match post.status {
            PostStatus::Scheduled => format_relative(now, post.scheduled_for),
            PostStatus::Published => post
                .external_url
                .clone()
                .unwrap_or_else(|| format_relative(now, post.posted_at.unwrap_or(post.scheduled_for))),
            PostStatus::Failed => post.error_message.clone().unwrap_or_default(),
        };

        println!(
            "{} | r/{} | {} | {} | {}",
            post.id,
            post.community,
            post.status,
            truncate_content(&post.title, 50),
            when
        );
    }
}

async fn cmd_stats(db: &Database, user: Option<&str>, format: &str) -> Result<()> {
    let counts = db.count_by_status(user).await?;

    if format == "json" {
        println!("{}", to_pretty_json(&counts)?);
    } else {
        println!("Scheduled: {}", counts.scheduled);
        println!("Published: {}", counts.published);
        println!("Failed:    {}", counts.failed);
    }

    Ok(())
}

fn to_pretty_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| RedcastError::InvalidInput(format!("Failed to encode output: {}", e)))
}

/// Truncate to `max_chars` characters with an ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        None => content.to_string(),
        Some((byte_index, _)) => format!("{}...", &content[..byte_index]),
    }
}

/// Describe `at` relative to `now`, e.g. "in 3 hours" or "2 days ago"
fn format_relative(now: i64, at: i64) -> String {
    let diff = at - now;
    let past = diff < 0;
    let seconds = diff.abs();

    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    let span = if days > 0 {
        format!("{} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("{} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        return if past { "just now" } else { "in <1 minute" }.to_string();
    };

    if past {
        format!("{} ago", span)
    } else {
        format!("in {}", span)
    }
}
