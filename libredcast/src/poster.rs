//! Per-destination delivery
//!
//! [`Poster`] publishes one post to one subreddit, recovering from an
//! expired access token exactly once, and records the outcome in the post
//! store. It is shared by the fan-out orchestrator and the deferred
//! dispatcher.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::error::{PlatformError, PlatformResult, RedcastError, Result};
use crate::platforms::{reddit::RedditClient, Publisher, TokenRefresher};
use crate::scheduling::{decide_within, Dispatch, IMMEDIATE_WINDOW_MINUTES};
use crate::types::{CredentialPair, ScheduledPost, Submission};

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a submit with at most one refresh-and-resubmit
#[derive(Debug)]
pub struct PublishAttempt {
    pub result: PlatformResult<Submission>,
    /// The pair to keep using: refreshed if a refresh succeeded, otherwise
    /// the pair that was passed in
    pub credentials: CredentialPair,
    pub refreshed: bool,
}

/// What happened to one destination
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Submitted now and stored as `published`
    Published(ScheduledPost),
    /// Stored as `scheduled` for the dispatcher
    Scheduled(ScheduledPost),
    /// An identical request was already stored; nothing was done
    Duplicate(ScheduledPost),
}

impl Delivery {
    pub fn post(&self) -> &ScheduledPost {
        match self {
            Delivery::Published(post) | Delivery::Scheduled(post) | Delivery::Duplicate(post) => {
                post
            }
        }
    }

    /// Whether this delivery is charged against the user's quota
    pub fn consumes_quota(&self) -> bool {
        !matches!(self, Delivery::Duplicate(_))
    }
}

#[derive(Clone)]
pub struct Poster {
    publisher: Arc<dyn Publisher>,
    refresher: Arc<dyn TokenRefresher>,
    db: Database,
    call_timeout: Duration,
    immediate_window_minutes: i64,
}

impl Poster {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        refresher: Arc<dyn TokenRefresher>,
        db: Database,
    ) -> Self {
        Self {
            publisher,
            refresher,
            db,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            immediate_window_minutes: IMMEDIATE_WINDOW_MINUTES,
        }
    }

    /// Build a poster talking to Reddit as configured
    pub fn from_config(config: &Config, db: Database) -> Result<Self> {
        let client = Arc::new(RedditClient::from_config(&config.reddit)?);
        Ok(Self::new(client.clone(), client, db)
            .with_call_timeout(Duration::from_secs(config.reddit.request_timeout_secs))
            .with_immediate_window(config.scheduling.immediate_window_minutes))
    }

    /// Upper bound for each submit and refresh call
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_immediate_window(mut self, minutes: i64) -> Self {
        self.immediate_window_minutes = minutes;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Submit `post`, refreshing and resubmitting once on `AuthExpired`
    ///
    /// A second `AuthExpired` is returned as-is. Refresh failures surface as
    /// `RefreshFailed`; the original credentials come back unchanged.
    pub async fn publish_with_refresh(
        &self,
        credentials: CredentialPair,
        post: &ScheduledPost,
    ) -> PublishAttempt {
        let first = self.submit_bounded(credentials.access_token(), post).await;
        match first {
            Err(PlatformError::AuthExpired) => {}
            result => {
                return PublishAttempt {
                    result,
                    credentials,
                    refreshed: false,
                }
            }
        }

        info!(
            destination = %post.community,
            token = %credentials.redacted_access(),
            "Access token expired, refreshing"
        );

        let refreshed = match self.refresh_bounded(credentials.refresh_token()).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(destination = %post.community, "Token refresh failed: {}", e);
                return PublishAttempt {
                    result: Err(e),
                    credentials,
                    refreshed: false,
                };
            }
        };

        debug!(
            destination = %post.community,
            token = %refreshed.redacted_access(),
            attempt = 2,
            "Resubmitting with refreshed token"
        );
        let result = self.submit_bounded(refreshed.access_token(), post).await;

        PublishAttempt {
            result,
            credentials: refreshed,
            refreshed: true,
        }
    }

    async fn submit_bounded(&self, access_token: &str, post: &ScheduledPost) -> PlatformResult<Submission> {
        tokio::time::timeout(self.call_timeout, self.publisher.submit(access_token, post))
            .await
            .unwrap_or_else(|_| {
                Err(PlatformError::Timeout(format!(
                    "submit to r/{} exceeded {}s",
                    post.community,
                    self.call_timeout.as_secs_f64()
                )))
            })
    }

    async fn refresh_bounded(&self, refresh_token: &str) -> PlatformResult<CredentialPair> {
        match tokio::time::timeout(self.call_timeout, self.refresher.refresh(refresh_token)).await {
            Ok(Ok(pair)) => Ok(pair),
            Ok(Err(PlatformError::RefreshFailed(reason))) => Err(PlatformError::RefreshFailed(reason)),
            Ok(Err(other)) => Err(PlatformError::RefreshFailed(other.to_string())),
            Err(_) => Err(PlatformError::RefreshFailed(format!(
                "token refresh exceeded {}s",
                self.call_timeout.as_secs_f64()
            ))),
        }
    }

    /// Deliver one post: publish it now or store it for later
    ///
    /// `requested` is the full-precision instant `post.scheduled_for` was
    /// derived from; it is compared with `reference` to decide.
    ///
    /// An already stored identical request short-circuits to
    /// [`Delivery::Duplicate`] without any remote call.
    ///
    /// # Errors
    ///
    /// - `Platform` when publishing failed terminally (nothing is stored)
    /// - `Unrecorded` when Reddit accepted the post but the store write failed
    /// - `Database` when a scheduled row could not be stored
    pub async fn deliver(
        &self,
        post: ScheduledPost,
        requested: DateTime<Utc>,
        reference: DateTime<Utc>,
    ) -> Result<Delivery> {
        if let Some(existing) = self.db.find_by_idempotency_key(&post.idempotency_key).await? {
            info!(
                destination = %post.community,
                post_id = %existing.id,
                status = %existing.status,
                "Identical post already recorded, skipping"
            );
            return Ok(Delivery::Duplicate(existing));
        }

        match decide_within(requested, reference, self.immediate_window_minutes) {
            Dispatch::Deferred => {
                self.db.insert_post(&post).await?;
                info!(
                    destination = %post.community,
                    post_id = %post.id,
                    scheduled_for = post.scheduled_for,
                    "Post scheduled"
                );
                Ok(Delivery::Scheduled(post))
            }
            Dispatch::Immediate => self.publish_now(post).await,
        }
    }

    async fn publish_now(&self, mut post: ScheduledPost) -> Result<Delivery> {
        let attempt = self
            .publish_with_refresh(post.credentials.clone(), &post)
            .await;

        let submission = attempt.result.map_err(|e| {
            warn!(destination = %post.community, "Publish failed: {}", e);
            e
        })?;

        post.credentials = attempt.credentials;
        post.mark_published(submission, Utc::now().timestamp());

        if let Err(e) = self.db.insert_post(&post).await {
            let url = post
                .external_url
                .clone()
                .unwrap_or_else(|| post.external_id.clone().unwrap_or_default());
            error!(
                destination = %post.community,
                url = %url,
                "Published but failed to record post: {}",
                e
            );
            return Err(RedcastError::Unrecorded {
                url,
                source: Box::new(e),
            });
        }

        info!(
            destination = %post.community,
            post_id = %post.id,
            url = post.external_url.as_deref().unwrap_or(""),
            "Post published"
        );
        Ok(Delivery::Published(post))
    }
}
