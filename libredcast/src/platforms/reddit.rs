//! Reddit platform implementation
//!
//! Submits self posts through `POST /api/submit` on the OAuth host and
//! refreshes access tokens against the OAuth token endpoint.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::RedditConfig;
use crate::error::{PlatformError, PlatformResult, Result};
use crate::platforms::{Publisher, TokenRefresher};
use crate::types::{CredentialPair, ScheduledPost, Submission};

/// Characters of an unexpected response body kept in error details
const DETAIL_LIMIT: usize = 100;

pub struct RedditClient {
    http: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
}

impl RedditClient {
    pub fn new(
        api_base: &str,
        token_url: &str,
        client_id: &str,
        client_secret: Option<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> PlatformResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: SecretString::from(client_secret.unwrap_or_default()),
        })
    }

    /// Build a client from the `[reddit]` config section
    pub fn from_config(config: &RedditConfig) -> Result<Self> {
        let secret = config.read_client_secret()?;
        let client = Self::new(
            &config.api_base,
            &config.token_url,
            &config.client_id,
            secret,
            &config.user_agent,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(client)
    }
}

/// Form fields for `/api/submit`
///
/// Flair text is only sent alongside a flair id.
pub fn build_submit_form(post: &ScheduledPost) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("sr", post.community.clone()),
        ("kind", post.kind.reddit_kind().to_string()),
        ("title", post.title.clone()),
        ("text", post.body.clone()),
        ("api_type", "json".to_string()),
        ("resubmit", "true".to_string()),
    ];

    if let Some(flair) = &post.flair {
        form.push(("flair_id", flair.id.clone()));
        if let Some(text) = &flair.text {
            form.push(("flair_text", text.clone()));
        }
    }

    form
}

/// Classify a raw `/api/submit` response
pub fn classify_submit_response(
    status: u16,
    content_type: Option<&str>,
    body: &str,
) -> PlatformResult<Submission> {
    if status == 401 {
        return Err(PlatformError::AuthExpired);
    }

    let is_json = content_type
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Err(PlatformError::Malformed(format!(
            "Non-JSON response: {}...",
            truncate(body)
        )));
    }

    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| PlatformError::Malformed(format!("Invalid JSON ({}): {}...", e, truncate(body))))?;

    let errors = reddit_errors(&json);
    if !errors.is_empty() {
        return Err(PlatformError::Rejected(errors.join("; ")));
    }

    if status == 429 {
        return Err(PlatformError::Rejected(
            "RATELIMIT: too many requests".to_string(),
        ));
    }

    if !(200..300).contains(&status) {
        return Err(PlatformError::Malformed(format!(
            "HTTP {}: {}...",
            status,
            truncate(body)
        )));
    }

    let data = &json["json"]["data"];
    let external_id = data["id"].as_str().ok_or_else(|| {
        PlatformError::Malformed(format!(
            "Invalid response from Reddit API: {}...",
            truncate(body)
        ))
    })?;

    Ok(Submission {
        external_id: external_id.to_string(),
        fullname: data["name"].as_str().map(str::to_string),
        url: data["url"].as_str().map(str::to_string),
    })
}

/// Reddit reports errors as `[code, message, field]` triples
fn reddit_errors(json: &serde_json::Value) -> Vec<String> {
    let Some(errors) = json["json"]["errors"].as_array() else {
        return Vec::new();
    };

    errors
        .iter()
        .map(|error| match error {
            serde_json::Value::Array(parts) => parts
                .iter()
                .take(2)
                .filter_map(|p| p.as_str())
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join(": "),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect()
}

fn truncate(body: &str) -> String {
    body.chars().take(DETAIL_LIMIT).collect()
}

fn map_transport_error(e: reqwest::Error) -> PlatformError {
    if e.is_timeout() {
        PlatformError::Timeout(e.to_string())
    } else {
        PlatformError::Network(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    error: Option<String>,
}

#[async_trait]
impl Publisher for RedditClient {
    async fn submit(&self, access_token: &str, post: &ScheduledPost) -> PlatformResult<Submission> {
        let url = format!("{}/api/submit", self.api_base);
        debug!(destination = %post.community, post_id = %post.id, "Submitting to Reddit");

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .form(&build_submit_form(post))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(map_transport_error)?;

        classify_submit_response(status, content_type.as_deref(), &body)
    }

    fn name(&self) -> &str {
        "reddit"
    }
}

#[async_trait]
impl TokenRefresher for RedditClient {
    async fn refresh(&self, refresh_token: &str) -> PlatformResult<CredentialPair> {
        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| PlatformError::RefreshFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PlatformError::RefreshFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(PlatformError::RefreshFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&body)
            )));
        }

        let tokens: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| PlatformError::RefreshFailed(format!("Invalid token response: {}", e)))?;

        if let Some(error) = tokens.error {
            return Err(PlatformError::RefreshFailed(error));
        }

        let access_token = tokens
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PlatformError::RefreshFailed("No access token returned".to_string()))?;

        Ok(CredentialPair::new(
            access_token,
            tokens.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
        ))
    }
}
