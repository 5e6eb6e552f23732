//! Database operations for Redcast
//!
//! The post store: every scheduled, published or failed post, one row per
//! subreddit. The users table behind the quota ledger lives in the same
//! database; see [`crate::ledger`].

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{CredentialPair, Flair, PostKind, PostStatus, ScheduledPost, Submission};

const POST_COLUMNS: &str = r#"
    id, user_id, community, title, body, kind, flair_id, flair_text,
    scheduled_for, time_zone, created_at, posted_at, is_cross_post, status,
    external_id, external_fullname, external_url, access_token, refresh_token,
    idempotency_key, error_message
"#;

/// Filter for listing stored posts
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub user_id: Option<String>,
    pub status: Option<PostStatus>,
    /// Only posts created by a fan-out batch
    pub cross_posts_only: bool,
    pub limit: Option<u32>,
}

/// Number of posts per lifecycle status
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatusCounts {
    pub scheduled: i64,
    pub published: i64,
    pub failed: i64,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Use forward slashes for SQLite URL (works on both Windows and Unix)
        // Use mode=rwc to allow creating the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a post
    pub async fn insert_post(&self, post: &ScheduledPost) -> Result<()> {
        let (flair_id, flair_text) = match &post.flair {
            Some(flair) => (Some(flair.id.as_str()), flair.text.as_deref()),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO scheduled_posts (
                id, user_id, community, title, body, kind, flair_id, flair_text,
                scheduled_for, time_zone, created_at, posted_at, is_cross_post, status,
                external_id, external_fullname, external_url, access_token, refresh_token,
                idempotency_key, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(&post.community)
        .bind(&post.title)
        .bind(&post.body)
        .bind(post.kind.as_str())
        .bind(flair_id)
        .bind(flair_text)
        .bind(post.scheduled_for)
        .bind(&post.time_zone)
        .bind(post.created_at)
        .bind(post.posted_at)
        .bind(post.is_cross_post)
        .bind(post.status.as_str())
        .bind(&post.external_id)
        .bind(&post.external_fullname)
        .bind(&post.external_url)
        .bind(post.credentials.access_token())
        .bind(post.credentials.refresh_token())
        .bind(&post.idempotency_key)
        .bind(&post.error_message)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Get a post by ID
    pub async fn get_post(&self, post_id: &str) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scheduled_posts WHERE id = ?",
            POST_COLUMNS
        ))
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| post_from_row(&r)))
    }

    /// Find a live (scheduled or published) post with the given idempotency key
    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<ScheduledPost>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM scheduled_posts WHERE idempotency_key = ? AND status != 'failed'",
            POST_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| post_from_row(&r)))
    }

    /// List posts, newest first
    pub async fn list_posts(&self, filter: &PostFilter) -> Result<Vec<ScheduledPost>> {
        let mut sql = format!("SELECT {} FROM scheduled_posts WHERE 1 = 1", POST_COLUMNS);

        if filter.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.cross_posts_only {
            sql.push_str(" AND is_cross_post = 1");
        }
        sql.push_str(" ORDER BY scheduled_for DESC, created_at DESC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(user_id) = &filter.user_id {
            query = query.bind(user_id);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(limit) = filter.limit {
            query = query.bind(limit as i64);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(post_from_row).collect())
    }

    /// Scheduled posts whose publish time has arrived, oldest first
    pub async fn get_due_scheduled_posts(&self, now: i64, limit: u32) -> Result<Vec<ScheduledPost>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM scheduled_posts
            WHERE status = 'scheduled' AND scheduled_for <= ?
            ORDER BY scheduled_for ASC
            LIMIT ?
            "#,
            POST_COLUMNS
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(rows.iter().map(post_from_row).collect())
    }

    /// Transition a scheduled post to published
    ///
    /// Returns false if the post was not in `scheduled` state.
    pub async fn mark_published(
        &self,
        post_id: &str,
        submission: &Submission,
        posted_at: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'published', external_id = ?, external_fullname = ?,
                external_url = ?, posted_at = ?, error_message = NULL
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(&submission.external_id)
        .bind(&submission.fullname)
        .bind(&submission.url)
        .bind(posted_at)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition a scheduled post to failed
    pub async fn mark_failed(&self, post_id: &str, error_message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_posts
            SET status = 'failed', error_message = ?
            WHERE id = ? AND status = 'scheduled'
            "#,
        )
        .bind(error_message)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Replace the stored credential snapshot after a refresh
    pub async fn update_credentials(&self, post_id: &str, credentials: &CredentialPair) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_posts SET access_token = ?, refresh_token = ? WHERE id = ?
            "#,
        )
        .bind(credentials.access_token())
        .bind(credentials.refresh_token())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    /// Count posts per status, optionally for one user
    pub async fn count_by_status(&self, user_id: Option<&str>) -> Result<StatusCounts> {
        let rows = match user_id {
            Some(user_id) => sqlx::query(
                "SELECT status, COUNT(*) AS n FROM scheduled_posts WHERE user_id = ? GROUP BY status",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await,
            None => sqlx::query("SELECT status, COUNT(*) AS n FROM scheduled_posts GROUP BY status")
                .fetch_all(&self.pool)
                .await,
        }
        .map_err(DbError::SqlxError)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let n: i64 = row.get("n");
            match PostStatus::parse(&row.get::<String, _>("status")) {
                Some(PostStatus::Scheduled) => counts.scheduled = n,
                Some(PostStatus::Published) => counts.published = n,
                Some(PostStatus::Failed) => counts.failed = n,
                None => {}
            }
        }

        Ok(counts)
    }
}

fn post_from_row(r: &SqliteRow) -> ScheduledPost {
    let flair = r
        .get::<Option<String>, _>("flair_id")
        .map(|id| Flair {
            id,
            text: r.get("flair_text"),
        });

    ScheduledPost {
        id: r.get("id"),
        user_id: r.get("user_id"),
        community: r.get("community"),
        title: r.get("title"),
        body: r.get("body"),
        kind: PostKind::parse(&r.get::<String, _>("kind")).unwrap_or_default(),
        flair,
        scheduled_for: r.get("scheduled_for"),
        time_zone: r.get("time_zone"),
        created_at: r.get("created_at"),
        posted_at: r.get("posted_at"),
        is_cross_post: r.get("is_cross_post"),
        status: PostStatus::parse(&r.get::<String, _>("status")).unwrap_or(PostStatus::Scheduled),
        external_id: r.get("external_id"),
        external_fullname: r.get("external_fullname"),
        external_url: r.get("external_url"),
        credentials: CredentialPair::new(
            r.get::<String, _>("access_token"),
            r.get::<String, _>("refresh_token"),
        ),
        idempotency_key: r.get("idempotency_key"),
        error_message: r.get("error_message"),
    }
}
