//! Fan-out of one post to many subreddits
//!
//! A batch is validated, its quota is reserved in one atomic step, every
//! destination is delivered concurrently, and the reservation is settled
//! down to the number of destinations that were actually fulfilled.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{error, info};

use crate::error::{RedcastError, Result};
use crate::ledger::Ledger;
use crate::poster::{Delivery, Poster};
use crate::scheduling::destination_instant;
use crate::types::{
    normalize_community, CredentialPair, Destination, PostContent, PostStatus, ScheduledPost,
};

/// One source post headed for one or more subreddits
#[derive(Debug, Clone)]
pub struct FanOutRequest {
    pub user_id: String,
    pub content: PostContent,
    pub destinations: Vec<Destination>,
    /// Minutes between consecutive destinations; 0 publishes all at once
    pub stagger_minutes: u32,
    /// Requested instant of the first destination
    pub base_instant: DateTime<Utc>,
    /// "Now" for the immediate/deferred decision
    pub reference_instant: DateTime<Utc>,
    /// IANA timezone of the user, stored for display
    pub time_zone: Option<String>,
    pub credentials: CredentialPair,
}

/// A normalized destination and the instant it was requested for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDestination {
    pub destination: Destination,
    pub instant: DateTime<Utc>,
}

impl FanOutRequest {
    /// Check the request and plan each destination's publish instant
    ///
    /// Nothing is written when this fails.
    pub fn validate(&self) -> Result<Vec<PlannedDestination>> {
        if self.user_id.trim().is_empty() {
            return Err(RedcastError::InvalidInput("User id is required".to_string()));
        }
        if self.destinations.is_empty() {
            return Err(RedcastError::InvalidInput(
                "At least one subreddit is required".to_string(),
            ));
        }
        if self.content.title.trim().is_empty() {
            return Err(RedcastError::InvalidInput("Title is required".to_string()));
        }
        if !self.content.kind.is_enabled() {
            return Err(RedcastError::InvalidInput(format!(
                "{} posts are not supported yet",
                self.content.kind
            )));
        }
        if self.content.body.trim().is_empty() {
            return Err(RedcastError::InvalidInput(
                "Text content is required for text posts".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(self.destinations.len());
        for (index, destination) in self.destinations.iter().enumerate() {
            let community = normalize_community(&destination.community);
            if community.is_empty() {
                return Err(RedcastError::InvalidInput(
                    "Subreddit name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(community.to_lowercase()) {
                return Err(RedcastError::InvalidInput(format!(
                    "Subreddit r/{} is listed more than once",
                    community
                )));
            }
            normalized.push(PlannedDestination {
                destination: Destination {
                    community,
                    flair: destination.flair.clone(),
                },
                instant: destination_instant(self.base_instant, index, self.stagger_minutes)?,
            });
        }

        Ok(normalized)
    }
}

/// Coarse reason a destination failed, for display only
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// The subreddit requires karma or otherwise restricts who may post
    KarmaGated,
    /// Posted too recently
    Cooldown,
    Unknown,
}

impl FailureCategory {
    pub fn classify(reason: &str) -> Self {
        let reason = reason.to_lowercase();
        if reason.contains("ratelimit")
            || reason.contains("doing that too much")
            || reason.contains("try again in")
        {
            FailureCategory::Cooldown
        } else if reason.contains("karma")
            || reason.contains("not allowed")
            || reason.contains("notallowed")
            || reason.contains("restricted")
        {
            FailureCategory::KarmaGated
        } else {
            FailureCategory::Unknown
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            FailureCategory::KarmaGated => {
                "This subreddit restricts posting (karma or account requirements)"
            }
            FailureCategory::Cooldown => "You are posting too often here; wait and try again",
            FailureCategory::Unknown => "Reddit did not accept the post",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestinationSuccess {
    pub destination: String,
    pub status: PostStatus,
    pub post_id: String,
    pub url: Option<String>,
    pub scheduled_for: i64,
    /// Matched an existing post; not republished, not charged
    #[serde(default)]
    pub duplicate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestinationFailure {
    pub destination: String,
    pub reason: String,
    pub category: FailureCategory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Partial,
    Failed,
}

/// Per-destination results of a batch, in request order
///
/// Duplicates of an already stored post are listed in `successful` but are
/// not charged, so the quota drops by [`FanOutReport::charged`], which is
/// the success count minus duplicates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FanOutReport {
    pub successful: Vec<DestinationSuccess>,
    pub failed: Vec<DestinationFailure>,
    pub total: usize,
    /// Set when unused quota could not be handed back
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_error: Option<String>,
}

impl FanOutReport {
    pub fn outcome(&self) -> Outcome {
        if self.failed.is_empty() {
            Outcome::Success
        } else if self.successful.is_empty() {
            Outcome::Failed
        } else {
            Outcome::Partial
        }
    }

    /// Non-duplicate successes, the amount charged against the quota
    pub fn charged(&self) -> usize {
        self.successful.iter().filter(|s| !s.duplicate).count()
    }

    fn record(&mut self, destination: String, result: Result<Delivery>) {
        match result {
            Ok(delivery) => {
                let duplicate = !delivery.consumes_quota();
                let post = delivery.post();
                self.successful.push(DestinationSuccess {
                    destination,
                    status: post.status,
                    post_id: post.id.clone(),
                    url: post.external_url.clone(),
                    scheduled_for: post.scheduled_for,
                    duplicate,
                });
            }
            Err(e) => {
                let reason = match &e {
                    RedcastError::Platform(platform_error) => platform_error.to_string(),
                    other => other.to_string(),
                };
                self.failed.push(DestinationFailure {
                    destination,
                    category: FailureCategory::classify(&reason),
                    reason,
                });
            }
        }
    }
}

#[derive(Clone)]
pub struct FanOut {
    poster: Poster,
    ledger: Ledger,
}

impl FanOut {
    pub fn new(poster: Poster, ledger: Ledger) -> Self {
        Self { poster, ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Cross-post to every destination in the request
    ///
    /// # Errors
    ///
    /// `InvalidInput` or `QuotaExceeded` before any remote call or write.
    /// Per-destination failures are reported, never returned.
    pub async fn run(&self, request: &FanOutRequest) -> Result<FanOutReport> {
        self.execute(request, true).await
    }

    /// Submit a standalone post to exactly one subreddit
    pub async fn run_single(&self, request: &FanOutRequest) -> Result<FanOutReport> {
        if request.destinations.len() != 1 {
            return Err(RedcastError::InvalidInput(format!(
                "A single post needs exactly one subreddit, got {}",
                request.destinations.len()
            )));
        }
        self.execute(request, false).await
    }

    async fn execute(&self, request: &FanOutRequest, is_cross_post: bool) -> Result<FanOutReport> {
        let planned = request.validate()?;
        let total = planned.len();

        let reservation = self.ledger.reserve(&request.user_id, total as i64).await?;

        info!(
            user_id = %request.user_id,
            destinations = total,
            stagger_minutes = request.stagger_minutes,
            "Starting fan-out"
        );

        let deliveries = planned.iter().map(|plan| {
            let post = ScheduledPost::scheduled(
                &request.user_id,
                &request.content,
                &plan.destination,
                plan.instant.timestamp(),
                request.time_zone.clone(),
                is_cross_post,
                request.credentials.clone(),
            );
            async move {
                (
                    plan.destination.community.clone(),
                    self.poster
                        .deliver(post, plan.instant, request.reference_instant)
                        .await,
                )
            }
        });

        let results = join_all(deliveries).await;

        let mut report = FanOutReport {
            total,
            ..Default::default()
        };
        for (destination, result) in results {
            report.record(destination, result);
        }

        let charged = report.charged() as i64;
        if let Err(e) = self.ledger.settle(reservation, charged).await {
            error!(
                user_id = %request.user_id,
                charged,
                "Failed to settle quota reservation: {}",
                e
            );
            report.quota_error = Some(format!(
                "{} unused post(s) were not returned to the quota: {}",
                total as i64 - charged,
                e
            ));
        }

        info!(
            user_id = %request.user_id,
            successful = report.successful.len(),
            failed = report.failed.len(),
            charged,
            "Fan-out finished"
        );

        Ok(report)
    }
}
