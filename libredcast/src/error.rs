//! Error types for Redcast

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedcastError>;

/// Result of a single remote call to Reddit or its token endpoint
pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

#[derive(Error, Debug)]
pub enum RedcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No posts available ({available} left, {requested} requested). Please upgrade your plan.")]
    QuotaExceeded { available: i64, requested: i64 },

    /// Reddit accepted the post but the store write failed
    #[error("Published to {url} but the post could not be recorded: {source}")]
    Unrecorded {
        url: String,
        source: Box<RedcastError>,
    },
}

impl RedcastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            RedcastError::InvalidInput(_) => 3,
            RedcastError::QuotaExceeded { .. } => 4,
            RedcastError::Platform(PlatformError::AuthExpired)
            | RedcastError::Platform(PlatformError::RefreshFailed(_)) => 2,
            RedcastError::Platform(_) => 1,
            RedcastError::Config(_) => 1,
            RedcastError::Database(_) => 1,
            RedcastError::Unrecorded { .. } => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failures of a single submission or token refresh.
///
/// Only `AuthExpired` is recoverable, and only once, by refreshing the
/// access token and resubmitting. Everything else is terminal for the
/// destination it happened on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Access token expired")]
    AuthExpired,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("Unexpected response: {0}")]
    Malformed(String),

    #[error("Rejected by subreddit: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl PlatformError {
    /// Whether a refresh-and-resubmit may recover from this error
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, PlatformError::AuthExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_invalid_input() {
        let error = RedcastError::InvalidInput("Title is required".to_string());
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn test_exit_code_quota_exceeded() {
        let error = RedcastError::QuotaExceeded {
            available: 2,
            requested: 3,
        };
        assert_eq!(error.exit_code(), 4);
    }

    #[test]
    fn test_exit_code_auth_errors() {
        assert_eq!(RedcastError::Platform(PlatformError::AuthExpired).exit_code(), 2);
        assert_eq!(
            RedcastError::Platform(PlatformError::RefreshFailed("invalid_grant".into())).exit_code(),
            2
        );
    }

    #[test]
    fn test_exit_code_terminal_platform_errors() {
        for error in [
            PlatformError::Malformed("not json".into()),
            PlatformError::Rejected("SUBREDDIT_NOTALLOWED".into()),
            PlatformError::Network("connection refused".into()),
            PlatformError::Timeout("submit".into()),
        ] {
            assert_eq!(RedcastError::Platform(error).exit_code(), 1);
        }
    }

    #[test]
    fn test_exit_code_config_and_database() {
        let config = RedcastError::Config(ConfigError::MissingField("reddit.client_id".into()));
        assert_eq!(config.exit_code(), 1);

        let db = RedcastError::Database(DbError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        )));
        assert_eq!(db.exit_code(), 1);
    }

    #[test]
    fn test_quota_message_points_at_upgrade() {
        let error = RedcastError::QuotaExceeded {
            available: 2,
            requested: 3,
        };
        let message = error.to_string();
        assert!(message.contains("2 left"));
        assert!(message.contains("3 requested"));
        assert!(message.contains("upgrade"));
    }

    #[test]
    fn test_platform_error_formatting() {
        let error = RedcastError::Platform(PlatformError::Malformed(
            "Non-JSON response: <html>...".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Platform error: Unexpected response: Non-JSON response: <html>..."
        );
    }

    #[test]
    fn test_only_auth_expired_is_recoverable() {
        assert!(PlatformError::AuthExpired.is_auth_expired());
        assert!(!PlatformError::RefreshFailed("x".into()).is_auth_expired());
        assert!(!PlatformError::Malformed("x".into()).is_auth_expired());
        assert!(!PlatformError::Timeout("x".into()).is_auth_expired());
    }

    #[test]
    fn test_error_conversion_from_platform_error() {
        let converted: RedcastError = PlatformError::Network("reset".into()).into();
        match converted {
            RedcastError::Platform(PlatformError::Network(msg)) => assert_eq!(msg, "reset"),
            _ => panic!("Expected RedcastError::Platform"),
        }
    }
}
