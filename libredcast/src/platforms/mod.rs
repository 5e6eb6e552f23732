//! Platform seams for submitting posts and refreshing OAuth tokens
//!
//! Delivery code only ever talks to these two traits. The real Reddit
//! client implements both; [`mock`] provides scriptable doubles.
//!
//! # Examples
//!
//! ```no_run
//! use libredcast::platforms::{reddit::RedditClient, Publisher};
//! use libredcast::types::{CredentialPair, Destination, PostContent, ScheduledPost};
//!
//! # async fn example(config: &libredcast::Config) -> libredcast::Result<()> {
//! let client = RedditClient::from_config(&config.reddit)?;
//! let post = ScheduledPost::scheduled(
//!     "user-1",
//!     &PostContent::text("Hello", "First post"),
//!     &Destination::new("r/test"),
//!     chrono::Utc::now().timestamp(),
//!     None,
//!     false,
//!     CredentialPair::new("access", "refresh"),
//! );
//!
//! let submission = client.submit(post.credentials.access_token(), &post).await?;
//! println!("Posted: {:?}", submission.url);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::error::PlatformResult;
use crate::types::{CredentialPair, ScheduledPost, Submission};

pub mod reddit;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Submits one post to one subreddit
///
/// Implementations are stateless: they persist nothing and never refresh
/// credentials on their own.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Submit `post` using `access_token`
    ///
    /// # Errors
    ///
    /// - `PlatformError::AuthExpired` on HTTP 401, the only recoverable case
    /// - `PlatformError::Rejected` when Reddit returns business-rule errors
    /// - `PlatformError::Malformed` for non-JSON or incomplete payloads
    /// - `PlatformError::Network` / `PlatformError::Timeout` for transport failures
    async fn submit(&self, access_token: &str, post: &ScheduledPost) -> PlatformResult<Submission>;

    /// Lowercase platform identifier for logs
    fn name(&self) -> &str;
}

/// Exchanges a refresh token for a new credential pair
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Returns `PlatformError::RefreshFailed` on any failure. Never retried.
    async fn refresh(&self, refresh_token: &str) -> PlatformResult<CredentialPair>;
}
