//! Configuration management for Redcast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub reddit: RedditConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedditConfig {
    /// OAuth API host that accepts bearer tokens
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Token endpoint used to exchange refresh tokens
    #[serde(default = "default_token_url")]
    pub token_url: String,

    pub client_id: String,

    /// File holding the OAuth client secret (installed apps have none)
    #[serde(default)]
    pub client_secret_file: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Upper bound for every remote call, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Posts requested at most this many minutes ahead publish immediately
    #[serde(default = "default_immediate_window")]
    pub immediate_window_minutes: i64,

    /// Seconds between deferred dispatcher polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum due posts handled per dispatcher poll
    #[serde(default = "default_batch_size")]
    pub dispatch_batch_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QuotaConfig {
    /// Posts granted to a user the first time the ledger sees them
    #[serde(default)]
    pub initial_posts: i64,
}

fn default_api_base() -> String {
    "https://oauth.reddit.com".to_string()
}

fn default_token_url() -> String {
    "https://www.reddit.com/api/v1/access_token".to_string()
}

fn default_user_agent() -> String {
    format!("redcast/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_immediate_window() -> i64 {
    crate::scheduling::IMMEDIATE_WINDOW_MINUTES
}

fn default_poll_interval() -> u64 {
    60
}

fn default_batch_size() -> u32 {
    50
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            immediate_window_minutes: default_immediate_window(),
            poll_interval_secs: default_poll_interval(),
            dispatch_batch_size: default_batch_size(),
        }
    }
}

impl RedditConfig {
    /// Read the client secret from `client_secret_file`, if one is configured
    pub fn read_client_secret(&self) -> Result<Option<String>> {
        let Some(path) = &self.client_secret_file else {
            return Ok(None);
        };

        let expanded = shellexpand::tilde(path).to_string();
        let secret = std::fs::read_to_string(&expanded).map_err(ConfigError::ReadError)?;
        let secret = secret.trim().to_string();

        if secret.is_empty() {
            return Err(ConfigError::MissingField(format!(
                "reddit.client_secret_file ({} is empty)",
                expanded
            ))
            .into());
        }

        Ok(Some(secret))
    }
}

impl Config {
    /// Load configuration from the default location
    ///
    /// `REDCAST_DB_PATH` overrides the configured database path.
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        let mut config = Self::load_from_path(&config_path)?;

        if let Ok(db_path) = std::env::var("REDCAST_DB_PATH") {
            config.database.path = db_path;
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;

        if config.reddit.client_id.trim().is_empty() {
            return Err(ConfigError::MissingField("reddit.client_id".to_string()).into());
        }

        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/redcast/posts.db".to_string(),
            },
            reddit: RedditConfig {
                api_base: default_api_base(),
                token_url: default_token_url(),
                client_id: "your-client-id".to_string(),
                client_secret_file: Some("~/.config/redcast/client_secret".to_string()),
                user_agent: default_user_agent(),
                request_timeout_secs: default_request_timeout(),
            },
            scheduling: SchedulingConfig::default(),
            quota: QuotaConfig::default(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory conventions
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("REDCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("redcast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[database]
path = "/tmp/redcast.db"

[reddit]
client_id = "abc123"
"#,
        );

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.reddit.api_base, "https://oauth.reddit.com");
        assert_eq!(
            config.reddit.token_url,
            "https://www.reddit.com/api/v1/access_token"
        );
        assert_eq!(config.reddit.request_timeout_secs, 30);
        assert!(config.reddit.user_agent.starts_with("redcast/"));
        assert_eq!(config.scheduling.immediate_window_minutes, 2);
        assert_eq!(config.scheduling.poll_interval_secs, 60);
        assert_eq!(config.quota.initial_posts, 0);
    }

    #[test]
    fn test_full_config() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[database]
path = "/tmp/redcast.db"

[reddit]
api_base = "http://localhost:9000"
token_url = "http://localhost:9000/token"
client_id = "abc123"
user_agent = "test-agent/1.0"
request_timeout_secs = 5

[scheduling]
immediate_window_minutes = 5
poll_interval_secs = 10
dispatch_batch_size = 7

[quota]
initial_posts = 3
"#,
        );

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.reddit.api_base, "http://localhost:9000");
        assert_eq!(config.reddit.request_timeout_secs, 5);
        assert_eq!(config.scheduling.immediate_window_minutes, 5);
        assert_eq!(config.scheduling.dispatch_batch_size, 7);
        assert_eq!(config.quota.initial_posts, 3);
    }

    #[test]
    fn test_missing_client_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[database]
path = "/tmp/redcast.db"

[reddit]
client_id = "  "
"#,
        );

        let err = Config::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("reddit.client_id"));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[database\npath = ");
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(
            err,
            crate::RedcastError::Config(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_read_client_secret() {
        let dir = TempDir::new().unwrap();
        let secret_path = dir.path().join("secret");
        std::fs::write(&secret_path, "  s3cret\n").unwrap();

        let mut reddit = Config::default_config().reddit;
        reddit.client_secret_file = Some(secret_path.to_string_lossy().to_string());
        assert_eq!(reddit.read_client_secret().unwrap().as_deref(), Some("s3cret"));

        reddit.client_secret_file = None;
        assert_eq!(reddit.read_client_secret().unwrap(), None);
    }

    #[test]
    fn test_empty_client_secret_is_rejected() {
        let dir = TempDir::new().unwrap();
        let secret_path = dir.path().join("secret");
        std::fs::write(&secret_path, "\n").unwrap();

        let mut reddit = Config::default_config().reddit;
        reddit.client_secret_file = Some(secret_path.to_string_lossy().to_string());
        assert!(reddit.read_client_secret().is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[database]
path = "/tmp/original.db"

[reddit]
client_id = "abc123"
"#,
        );

        std::env::set_var("REDCAST_CONFIG", &path);
        std::env::set_var("REDCAST_DB_PATH", "/tmp/override.db");

        let config = Config::load().unwrap();
        assert_eq!(config.database.path, "/tmp/override.db");

        std::env::remove_var("REDCAST_CONFIG");
        std::env::remove_var("REDCAST_DB_PATH");
    }
}
