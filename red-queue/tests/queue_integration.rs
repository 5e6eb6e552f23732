//! Integration tests for red-queue

use assert_cmd::Command;
use libredcast::types::{CredentialPair, Destination, PostContent, ScheduledPost};
use libredcast::Database;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Create config and seed the database with one scheduled and one failed post
async fn setup_test_env() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("posts.db");
    let db_path_str = db_path.display().to_string().replace('\\', "/");

    let config_content = format!(
        r#"
[database]
path = "{db_path_str}"

[reddit]
client_id = "test-client"

[quota]
initial_posts = 3
"#
    );
    fs::write(&config_path, config_content).unwrap();

    let db = Database::new(&db_path_str).await.unwrap();
    let later = chrono::Utc::now().timestamp() + 3 * 3600 - 30;
    let content = PostContent::text("Show and tell", "What did you build?");

    let scheduled = ScheduledPost::scheduled(
        "alice",
        &content,
        &Destination::new("rust"),
        later,
        Some("Europe/Berlin".to_string()),
        true,
        CredentialPair::new("a", "r"),
    );
    db.insert_post(&scheduled).await.unwrap();

    let mut failed = ScheduledPost::scheduled(
        "bob",
        &content,
        &Destination::new("golang"),
        later,
        None,
        false,
        CredentialPair::new("a", "r"),
    );
    failed.mark_failed("Rejected by subreddit: SUBREDDIT_NOTALLOWED".to_string());
    db.insert_post(&failed).await.unwrap();

    (temp_dir, config_path)
}

fn red_queue(config_path: &PathBuf) -> Command {
    let mut cmd = Command::cargo_bin("red-queue").unwrap();
    cmd.env("REDCAST_CONFIG", config_path)
        .env_remove("REDCAST_DB_PATH");
    cmd
}

#[tokio::test]
async fn test_list_all_posts_text() {
    let (_temp, config) = setup_test_env().await;

    red_queue(&config)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("r/rust | scheduled | Show and tell | in 2 hours"))
        .stdout(predicate::str::contains("r/golang | failed"))
        .stdout(predicate::str::contains("SUBREDDIT_NOTALLOWED"));
}

#[tokio::test]
async fn test_list_filters_json() {
    let (_temp, config) = setup_test_env().await;

    let output = red_queue(&config)
        .args(["list", "--cross-posts", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let posts: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["community"], "rust");
    assert_eq!(posts[0]["status"], "scheduled");
    assert_eq!(posts[0]["time_zone"], "Europe/Berlin");
    assert_eq!(posts[0]["is_cross_post"], true);

    let output = red_queue(&config)
        .args(["list", "--user", "bob", "--status", "failed", "--format", "json"])
        .output()
        .unwrap();
    let posts: Vec<serde_json::Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0]["community"], "golang");
}

#[tokio::test]
async fn test_list_invalid_status_exits_3() {
    let (_temp, config) = setup_test_env().await;

    red_queue(&config)
        .args(["list", "--status", "drafted"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid status"));
}

#[tokio::test]
async fn test_stats_json() {
    let (_temp, config) = setup_test_env().await;

    let output = red_queue(&config)
        .args(["stats", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let counts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(counts["scheduled"], 1);
    assert_eq!(counts["published"], 0);
    assert_eq!(counts["failed"], 1);
}

#[tokio::test]
async fn test_quota_show_and_grant() {
    let (_temp, config) = setup_test_env().await;

    red_queue(&config)
        .args(["quota", "show", "carol"])
        .assert()
        .success()
        .stdout(predicate::str::contains("carol: 3 post(s) available"));

    red_queue(&config)
        .args(["quota", "grant", "carol", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("carol: 13 post(s) available"));

    red_queue(&config)
        .args(["quota", "grant", "carol", "--", "-1"])
        .assert()
        .code(3);
}
