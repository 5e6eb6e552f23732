//! Core types for Redcast

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Kind of Reddit submission.
///
/// Only self (text) posts are accepted today. Link and image posts are
/// modelled so stored rows and requests can name them, but they are
/// rejected at validation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PostKind {
    #[default]
    Text,
    Link,
    Image,
}

impl PostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Link => "link",
            Self::Image => "image",
        }
    }

    /// Parse a stored or user supplied kind name
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "self" => Some(Self::Text),
            "link" => Some(Self::Link),
            "image" => Some(Self::Image),
            _ => None,
        }
    }

    /// Value of the `kind` field on Reddit's submit endpoint
    pub fn reddit_kind(&self) -> &'static str {
        match self {
            Self::Text => "self",
            Self::Link => "link",
            Self::Image => "image",
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Text)
    }
}

impl std::fmt::Display for PostKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a stored post.
///
/// `Scheduled` rows carry no platform identifiers; `Published` rows always
/// carry an external id and a posted instant. `Failed` is only reached when
/// the deferred dispatcher gives up on a row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Scheduled,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "scheduled" => Some(Self::Scheduled),
            "published" => Some(Self::Published),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post flair selection for one destination
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Flair {
    pub id: String,
    pub text: Option<String>,
}

/// OAuth access/refresh token pair.
///
/// Passed by value through every call that may refresh it, and handed back
/// with the result, so a refresh on one destination never leaks into a
/// sibling destination's request.
pub struct CredentialPair {
    access_token: SecretString,
    refresh_token: SecretString,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: SecretString::from(refresh_token.into()),
        }
    }

    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_token(&self) -> &str {
        self.refresh_token.expose_secret()
    }

    /// First characters of the access token, safe for log lines
    pub fn redacted_access(&self) -> String {
        redact(self.access_token())
    }
}

impl Clone for CredentialPair {
    fn clone(&self) -> Self {
        Self::new(self.access_token(), self.refresh_token())
    }
}

impl Default for CredentialPair {
    fn default() -> Self {
        Self::new(String::new(), String::new())
    }
}

impl std::fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &self.redacted_access())
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

/// Keep at most 8 characters of a token for diagnostics
pub fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{}...", prefix)
}

/// Strip an `r/` or `/r/` prefix and surrounding whitespace from a subreddit name
pub fn normalize_community(name: &str) -> String {
    let trimmed = name.trim();
    let without_slash = trimmed.strip_prefix('/').unwrap_or(trimmed);
    without_slash
        .strip_prefix("r/")
        .or_else(|| without_slash.strip_prefix("R/"))
        .unwrap_or(without_slash)
        .trim()
        .to_string()
}

/// A subreddit a post is published into
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Destination {
    pub community: String,
    pub flair: Option<Flair>,
}

impl Destination {
    pub fn new(community: &str) -> Self {
        Self {
            community: normalize_community(community),
            flair: None,
        }
    }

    pub fn with_flair(mut self, id: impl Into<String>, text: Option<String>) -> Self {
        self.flair = Some(Flair {
            id: id.into(),
            text,
        });
        self
    }
}

/// The user-authored part of a post, shared by every destination of a batch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostContent {
    pub title: String,
    pub body: String,
    pub kind: PostKind,
}

impl PostContent {
    pub fn text(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            kind: PostKind::Text,
        }
    }
}

/// Reddit's identifiers for a submitted post
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Submission {
    /// Short id (e.g. "1abc23")
    pub external_id: String,
    /// Fullname (e.g. "t3_1abc23")
    pub fullname: Option<String>,
    pub url: Option<String>,
}

/// One post targeting exactly one subreddit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: String,
    pub user_id: String,
    pub community: String,
    pub title: String,
    pub body: String,
    pub kind: PostKind,
    pub flair: Option<Flair>,
    /// Requested publish instant (Unix seconds, UTC)
    pub scheduled_for: i64,
    /// IANA timezone the user scheduled from; display only
    pub time_zone: Option<String>,
    pub created_at: i64,
    pub posted_at: Option<i64>,
    pub is_cross_post: bool,
    pub status: PostStatus,
    pub external_id: Option<String>,
    pub external_fullname: Option<String>,
    pub external_url: Option<String>,
    /// Tokens captured at submission so a later dispatcher can publish
    /// without a live session
    #[serde(skip)]
    pub credentials: CredentialPair,
    pub idempotency_key: String,
    pub error_message: Option<String>,
}

impl ScheduledPost {
    /// Create a post in `Scheduled` state for one destination
    pub fn scheduled(
        user_id: &str,
        content: &PostContent,
        destination: &Destination,
        scheduled_for: i64,
        time_zone: Option<String>,
        is_cross_post: bool,
        credentials: CredentialPair,
    ) -> Self {
        let idempotency_key = idempotency_key(
            user_id,
            &destination.community,
            scheduled_for,
            &content.title,
            &content.body,
        );

        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            community: destination.community.clone(),
            title: content.title.clone(),
            body: content.body.clone(),
            kind: content.kind,
            flair: destination.flair.clone(),
            scheduled_for,
            time_zone,
            created_at: chrono::Utc::now().timestamp(),
            posted_at: None,
            is_cross_post,
            status: PostStatus::Scheduled,
            external_id: None,
            external_fullname: None,
            external_url: None,
            credentials,
            idempotency_key,
            error_message: None,
        }
    }

    /// Record a successful submission
    pub fn mark_published(&mut self, submission: Submission, posted_at: i64) {
        self.external_id = Some(submission.external_id);
        self.external_fullname = submission.fullname;
        self.external_url = submission.url;
        self.posted_at = Some(posted_at);
        self.status = PostStatus::Published;
        self.error_message = None;
    }

    /// Record a terminal dispatch failure
    pub fn mark_failed(&mut self, error_message: String) {
        self.status = PostStatus::Failed;
        self.error_message = Some(error_message);
    }
}

/// Key identifying "the same post to the same place at the same time".
///
/// sha256 over user, subreddit, requested instant and a hash of the
/// content, hex encoded.
pub fn idempotency_key(
    user_id: &str,
    community: &str,
    scheduled_for: i64,
    title: &str,
    body: &str,
) -> String {
    let content_hash = Sha256::digest(format!("{}\n{}", title, body).as_bytes());
    let key_material = format!(
        "{}|{}|{}|{:x}",
        user_id,
        community.to_lowercase(),
        scheduled_for,
        content_hash
    );
    format!("{:x}", Sha256::digest(key_material.as_bytes()))
}
