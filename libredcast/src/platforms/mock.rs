//! Mock publisher and token refresher for testing
//!
//! Scriptable doubles for the [`Publisher`] and [`TokenRefresher`] seams.
//! Responses can be queued per subreddit, delays simulate slow or hung
//! destinations, and every call is recorded for verification.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{PlatformError, PlatformResult};
use crate::platforms::{Publisher, TokenRefresher};
use crate::types::{CredentialPair, ScheduledPost, Submission};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One recorded `submit` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitCall {
    pub community: String,
    pub access_token: String,
}

#[derive(Default)]
struct Script {
    /// Consumed front to back, one per call
    queued: VecDeque<PlatformResult<Submission>>,
    /// Returned once the queue is empty; success when unset
    fallback: Option<PlatformError>,
    delay: Duration,
}

/// Mock publisher
///
/// Succeeds for every subreddit unless scripted otherwise. Clones share
/// their scripts and call log.
#[derive(Clone, Default)]
pub struct MockPublisher {
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    calls: Arc<Mutex<Vec<SubmitCall>>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses for a subreddit, returned in order
    pub fn with_responses(
        self,
        community: &str,
        responses: Vec<PlatformResult<Submission>>,
    ) -> Self {
        lock(&self.scripts)
            .entry(community.to_string())
            .or_default()
            .queued
            .extend(responses);
        self
    }

    /// Fail every call to a subreddit (after any queued responses)
    pub fn with_failure(self, community: &str, error: PlatformError) -> Self {
        lock(&self.scripts)
            .entry(community.to_string())
            .or_default()
            .fallback = Some(error);
        self
    }

    /// Delay every call to a subreddit
    pub fn with_delay(self, community: &str, delay: Duration) -> Self {
        lock(&self.scripts)
            .entry(community.to_string())
            .or_default()
            .delay = delay;
        self
    }

    /// Total number of submit calls
    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Submit calls made for one subreddit
    pub fn calls_for(&self, community: &str) -> Vec<SubmitCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.community == community)
            .cloned()
            .collect()
    }

    /// All submit calls, in call order
    pub fn calls(&self) -> Vec<SubmitCall> {
        lock(&self.calls).clone()
    }

    fn next_response(&self, community: &str) -> (Duration, PlatformResult<Submission>) {
        let mut scripts = lock(&self.scripts);
        let Some(script) = scripts.get_mut(community) else {
            return (Duration::ZERO, Ok(mock_submission(community)));
        };

        let result = match script.queued.pop_front() {
            Some(result) => result,
            None => match &script.fallback {
                Some(error) => Err(error.clone()),
                None => Ok(mock_submission(community)),
            },
        };
        (script.delay, result)
    }
}

/// Submission identifiers for a mocked success
pub fn mock_submission(community: &str) -> Submission {
    let id: String = uuid::Uuid::new_v4().simple().to_string().chars().take(7).collect();
    Submission {
        url: Some(format!(
            "https://www.reddit.com/r/{}/comments/{}/",
            community, id
        )),
        fullname: Some(format!("t3_{}", id)),
        external_id: id,
    }
}

#[async_trait]
impl Publisher for MockPublisher {
    async fn submit(&self, access_token: &str, post: &ScheduledPost) -> PlatformResult<Submission> {
        lock(&self.calls).push(SubmitCall {
            community: post.community.clone(),
            access_token: access_token.to_string(),
        });

        let (delay, result) = self.next_response(&post.community);
        if !delay.is_zero() {
            sleep(delay).await;
        }
        result
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Mock token refresher
///
/// Each successful refresh hands out `refreshed-access-<n>`.
#[derive(Clone, Default)]
pub struct MockRefresher {
    error: Option<PlatformError>,
    delay: Duration,
    refreshed_with: Arc<Mutex<Vec<String>>>,
}

impl MockRefresher {
    /// A refresher that always succeeds
    pub fn success() -> Self {
        Self::default()
    }

    /// A refresher that always fails with `RefreshFailed(reason)`
    pub fn failing(reason: &str) -> Self {
        Self {
            error: Some(PlatformError::RefreshFailed(reason.to_string())),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of refresh calls
    pub fn call_count(&self) -> usize {
        lock(&self.refreshed_with).len()
    }

    /// Refresh tokens presented, in call order
    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        lock(&self.refreshed_with).clone()
    }
}

#[async_trait]
impl TokenRefresher for MockRefresher {
    async fn refresh(&self, refresh_token: &str) -> PlatformResult<CredentialPair> {
        let n = {
            let mut seen = lock(&self.refreshed_with);
            seen.push(refresh_token.to_string());
            seen.len()
        };

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(CredentialPair::new(
                format!("refreshed-access-{}", n),
                refresh_token,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Destination, PostContent};

    fn post_to(community: &str) -> ScheduledPost {
        ScheduledPost::scheduled(
            "u",
            &PostContent::text("t", "b"),
            &Destination::new(community),
            0,
            None,
            true,
            CredentialPair::default(),
        )
    }

    #[tokio::test]
    async fn test_unscripted_destination_succeeds() {
        let publisher = MockPublisher::new();
        let submission = publisher.submit("tok", &post_to("rust")).await.unwrap();
        assert_eq!(submission.fullname, Some(format!("t3_{}", submission.external_id)));
        assert_eq!(publisher.call_count(), 1);
        assert_eq!(
            publisher.calls_for("rust"),
            vec![SubmitCall {
                community: "rust".into(),
                access_token: "tok".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_queued_responses_then_fallback() {
        let publisher = MockPublisher::new()
            .with_responses("rust", vec![Err(PlatformError::AuthExpired)])
            .with_failure("rust", PlatformError::Malformed("bad".into()));

        let post = post_to("rust");
        assert_eq!(
            publisher.submit("a", &post).await,
            Err(PlatformError::AuthExpired)
        );
        assert_eq!(
            publisher.submit("b", &post).await,
            Err(PlatformError::Malformed("bad".into()))
        );
        assert_eq!(
            publisher.submit("c", &post).await,
            Err(PlatformError::Malformed("bad".into()))
        );
    }

    #[tokio::test]
    async fn test_clones_share_call_log() {
        let publisher = MockPublisher::new();
        let clone = publisher.clone();
        clone.submit("tok", &post_to("a")).await.unwrap();
        assert_eq!(publisher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_refresher_counts_and_fails() {
        let ok = MockRefresher::success();
        let pair = ok.refresh("r1").await.unwrap();
        assert_eq!(pair.access_token(), "refreshed-access-1");
        assert_eq!(pair.refresh_token(), "r1");
        assert_eq!(ok.call_count(), 1);

        let failing = MockRefresher::failing("invalid_grant");
        assert_eq!(
            failing.refresh("r1").await.unwrap_err(),
            PlatformError::RefreshFailed("invalid_grant".into())
        );
        assert_eq!(failing.refresh_tokens_seen(), vec!["r1".to_string()]);
    }
}
