//! Deferred dispatcher
//!
//! Publishes `scheduled` rows once their time has come, through the same
//! submit-and-refresh path as immediate posts. Quota was charged when the
//! row was scheduled, so dispatching never touches the ledger.
//!
//! One dispatcher process per database is assumed; rows are not leased.
//! A submission Reddit accepted but the store failed to record is kept in
//! memory and recorded on a later pass, never submitted again.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::poster::Poster;
use crate::types::{ScheduledPost, Submission};

/// Counts for one dispatcher pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    pub published: usize,
    pub failed: usize,
    /// Accepted by Reddit but not yet recorded as published
    pub unrecorded: usize,
}

impl DispatchSummary {
    pub fn total(&self) -> usize {
        self.published + self.failed + self.unrecorded
    }
}

enum Dispatched {
    Published,
    Failed,
    Unrecorded,
}

/// A submission waiting to be written back to its row
struct PendingRecord {
    submission: Submission,
    posted_at: i64,
}

pub struct Dispatcher {
    poster: Poster,
    batch_size: u32,
    unrecorded: Mutex<HashMap<String, PendingRecord>>,
}

impl Dispatcher {
    pub fn new(poster: Poster, batch_size: u32) -> Self {
        Self {
            poster,
            batch_size: batch_size.max(1),
            unrecorded: Mutex::new(HashMap::new()),
        }
    }

    /// Publish every due row (oldest first, up to the batch size)
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<DispatchSummary> {
        let mut summary = DispatchSummary::default();
        let (recorded, pending) = self.record_pending().await;
        summary.published += recorded;

        let due: Vec<ScheduledPost> = self
            .poster
            .db()
            .get_due_scheduled_posts(
                now.timestamp(),
                self.batch_size.saturating_add(pending.len() as u32),
            )
            .await?
            .into_iter()
            .filter(|post| !pending.contains(&post.id))
            .take(self.batch_size as usize)
            .collect();

        if due.is_empty() {
            return Ok(summary);
        }

        info!(count = due.len(), "Dispatching due posts");

        let outcomes = join_all(due.iter().map(|post| self.dispatch(post, now))).await;

        for outcome in outcomes {
            match outcome {
                Dispatched::Published => summary.published += 1,
                Dispatched::Failed => summary.failed += 1,
                Dispatched::Unrecorded => summary.unrecorded += 1,
            }
        }

        info!(
            published = summary.published,
            failed = summary.failed,
            unrecorded = summary.unrecorded,
            "Dispatch pass finished"
        );
        Ok(summary)
    }

    /// Retry recording earlier submissions; returns how many were recorded
    /// and the ids still waiting
    async fn record_pending(&self) -> (usize, HashSet<String>) {
        let mut unrecorded = self.unrecorded.lock().await;
        let mut recorded = Vec::new();

        for (post_id, pending) in unrecorded.iter() {
            match self
                .poster
                .db()
                .mark_published(post_id, &pending.submission, pending.posted_at)
                .await
            {
                Ok(_) => {
                    info!(post_id = %post_id, "Recorded earlier submission");
                    recorded.push(post_id.clone());
                }
                Err(e) => warn!(post_id = %post_id, "Still unable to record submission: {}", e),
            }
        }

        for post_id in &recorded {
            unrecorded.remove(post_id);
        }
        (recorded.len(), unrecorded.keys().cloned().collect())
    }

    async fn dispatch(&self, post: &ScheduledPost, now: DateTime<Utc>) -> Dispatched {
        let db = self.poster.db();
        let attempt = self
            .poster
            .publish_with_refresh(post.credentials.clone(), post)
            .await;

        let outcome = match attempt.result {
            Ok(submission) => self.record_published(post, submission, now).await,
            Err(e) => {
                warn!(post_id = %post.id, destination = %post.community, "Scheduled post failed: {}", e);
                if let Err(db_err) = db.mark_failed(&post.id, &e.to_string()).await {
                    error!(post_id = %post.id, "Failed to mark post failed: {}", db_err);
                }
                Dispatched::Failed
            }
        };

        if attempt.refreshed {
            if let Err(e) = db.update_credentials(&post.id, &attempt.credentials).await {
                warn!(post_id = %post.id, "Failed to store refreshed credentials: {}", e);
            }
        }

        outcome
    }

    async fn record_published(
        &self,
        post: &ScheduledPost,
        submission: Submission,
        now: DateTime<Utc>,
    ) -> Dispatched {
        let posted_at = now.timestamp();
        let url = submission
            .url
            .clone()
            .unwrap_or_else(|| submission.external_id.clone());

        match self
            .poster
            .db()
            .mark_published(&post.id, &submission, posted_at)
            .await
        {
            Ok(marked) => {
                if !marked {
                    warn!(post_id = %post.id, "Post left scheduled state before it was marked published");
                }
                info!(
                    post_id = %post.id,
                    destination = %post.community,
                    url = %url,
                    "Scheduled post published"
                );
                Dispatched::Published
            }
            Err(e) => {
                error!(
                    post_id = %post.id,
                    destination = %post.community,
                    url = %url,
                    "Published but failed to record post: {}",
                    e
                );
                self.unrecorded.lock().await.insert(
                    post.id.clone(),
                    PendingRecord {
                        submission,
                        posted_at,
                    },
                );
                Dispatched::Unrecorded
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::error::PlatformError;
    use crate::platforms::mock::{MockPublisher, MockRefresher};
    use crate::types::{CredentialPair, Destination, PostContent, PostStatus};
    use chrono::Duration;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup(publisher: MockPublisher, refresher: MockRefresher) -> (TempDir, Dispatcher) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path.to_string_lossy()).await.unwrap();
        let poster = Poster::new(Arc::new(publisher), Arc::new(refresher), db);
        (temp_dir, Dispatcher::new(poster, 10))
    }

    async fn schedule(dispatcher: &Dispatcher, community: &str, at: DateTime<Utc>) -> ScheduledPost {
        let post = ScheduledPost::scheduled(
            "user-1",
            &PostContent::text("Later", "Body"),
            &Destination::new(community),
            at.timestamp(),
            None,
            true,
            CredentialPair::new("stored-access", "stored-refresh"),
        );
        dispatcher.poster.db().insert_post(&post).await.unwrap();
        post
    }

    #[tokio::test]
    async fn test_empty_pass() {
        let (_temp, dispatcher) = setup(MockPublisher::new(), MockRefresher::success()).await;
        let summary = dispatcher.run_once(Utc::now()).await.unwrap();
        assert_eq!(summary, DispatchSummary::default());
    }

    #[tokio::test]
    async fn test_publishes_due_and_leaves_future() {
        let publisher = MockPublisher::new();
        let (_temp, dispatcher) = setup(publisher.clone(), MockRefresher::success()).await;

        let now = Utc::now();
        let due = schedule(&dispatcher, "rust", now - Duration::minutes(1)).await;
        let future = schedule(&dispatcher, "golang", now + Duration::hours(1)).await;

        let summary = dispatcher.run_once(now).await.unwrap();
        assert_eq!(summary.published, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(publisher.call_count(), 1);
        assert_eq!(publisher.calls()[0].access_token, "stored-access");

        let db = dispatcher.poster.db();
        let due = db.get_post(&due.id).await.unwrap().unwrap();
        assert_eq!(due.status, PostStatus::Published);
        assert_eq!(due.posted_at, Some(now.timestamp()));
        assert!(due.external_id.is_some());

        let future = db.get_post(&future.id).await.unwrap().unwrap();
        assert_eq!(future.status, PostStatus::Scheduled);

        // Nothing left to do
        assert_eq!(dispatcher.run_once(now).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_refreshed_credentials_are_stored() {
        let publisher =
            MockPublisher::new().with_responses("rust", vec![Err(PlatformError::AuthExpired)]);
        let (_temp, dispatcher) = setup(publisher, MockRefresher::success()).await;

        let now = Utc::now();
        let post = schedule(&dispatcher, "rust", now).await;
        dispatcher.run_once(now).await.unwrap();

        let stored = dispatcher.poster.db().get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Published);
        assert_eq!(stored.credentials.access_token(), "refreshed-access-1");
        assert_eq!(stored.credentials.refresh_token(), "stored-refresh");
    }

    #[tokio::test]
    async fn test_failures_are_marked_and_isolated() {
        let publisher = MockPublisher::new()
            .with_failure("banned", PlatformError::Rejected("SUBREDDIT_NOTALLOWED".into()));
        let (_temp, dispatcher) = setup(publisher, MockRefresher::success()).await;

        let now = Utc::now();
        let bad = schedule(&dispatcher, "banned", now).await;
        let good = schedule(&dispatcher, "rust", now).await;

        let summary = dispatcher.run_once(now).await.unwrap();
        assert_eq!(
            summary,
            DispatchSummary {
                published: 1,
                failed: 1,
                unrecorded: 0
            }
        );

        let db = dispatcher.poster.db();
        let bad = db.get_post(&bad.id).await.unwrap().unwrap();
        assert_eq!(bad.status, PostStatus::Failed);
        assert!(bad.error_message.unwrap().contains("SUBREDDIT_NOTALLOWED"));
        assert!(bad.external_id.is_none());

        let good = db.get_post(&good.id).await.unwrap().unwrap();
        assert_eq!(good.status, PostStatus::Published);
    }

    #[tokio::test]
    async fn test_batch_size_limits_pass() {
        let (_temp, dispatcher) = setup(MockPublisher::new(), MockRefresher::success()).await;
        let dispatcher = Dispatcher::new(dispatcher.poster, 2);

        let now = Utc::now();
        for (i, community) in ["a", "b", "c"].iter().enumerate() {
            schedule(&dispatcher, community, now - Duration::minutes(10 - i as i64)).await;
        }

        assert_eq!(dispatcher.run_once(now).await.unwrap().published, 2);
        assert_eq!(dispatcher.run_once(now).await.unwrap().published, 1);
    }

    async fn install_trigger(dispatcher: &Dispatcher, sql: &str) {
        sqlx::query(sql)
            .execute(dispatcher.poster.db().pool())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_credential_write_failure_still_records_publish() {
        let publisher =
            MockPublisher::new().with_responses("rust", vec![Err(PlatformError::AuthExpired)]);
        let (_temp, dispatcher) = setup(publisher.clone(), MockRefresher::success()).await;
        install_trigger(
            &dispatcher,
            r#"
            CREATE TRIGGER block_credentials BEFORE UPDATE OF access_token ON scheduled_posts
            BEGIN SELECT RAISE(ABORT, 'credential write blocked'); END
            "#,
        )
        .await;

        let now = Utc::now();
        let post = schedule(&dispatcher, "rust", now).await;

        let summary = dispatcher.run_once(now).await.unwrap();
        assert_eq!(summary.published, 1);
        assert_eq!(summary.failed, 0);

        let stored = dispatcher.poster.db().get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Published);
        assert_eq!(stored.credentials.access_token(), "stored-access");

        // Expired attempt plus one resubmit, nothing more
        assert_eq!(dispatcher.run_once(now).await.unwrap().total(), 0);
        assert_eq!(publisher.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unrecorded_publish_is_not_resubmitted() {
        let publisher = MockPublisher::new();
        let (_temp, dispatcher) = setup(publisher.clone(), MockRefresher::success()).await;
        install_trigger(
            &dispatcher,
            r#"
            CREATE TRIGGER block_publish BEFORE UPDATE OF status ON scheduled_posts
            WHEN NEW.status = 'published'
            BEGIN SELECT RAISE(ABORT, 'store unavailable'); END
            "#,
        )
        .await;

        let now = Utc::now();
        let post = schedule(&dispatcher, "rust", now).await;

        let summary = dispatcher.run_once(now).await.unwrap();
        assert_eq!(summary.unrecorded, 1);
        assert_eq!(summary.published, 0);

        // Store still failing: the row is skipped, not submitted again
        assert_eq!(dispatcher.run_once(now).await.unwrap().total(), 0);
        assert_eq!(publisher.call_count(), 1);

        install_trigger(&dispatcher, "DROP TRIGGER block_publish").await;
        assert_eq!(dispatcher.run_once(now).await.unwrap().published, 1);
        assert_eq!(publisher.call_count(), 1);

        let stored = dispatcher.poster.db().get_post(&post.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PostStatus::Published);
        assert!(stored.external_id.is_some());
    }
}
