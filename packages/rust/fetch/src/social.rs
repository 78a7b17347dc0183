//! Social API client (X v2 dialect) built on [`RateLimitedClient`].
//!
//! Every method costs one or more paced API calls; callers budget them
//! (see the ingest runner's per-run social call limit).

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, instrument};

use bookforge_shared::{BookForgeError, FetchReason, Result, SocialConfig};

use crate::client::RateLimitedClient;

/// Post id embedded in a status URL (`.../status/123456`).
static POST_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/status/(\d+)").expect("valid regex"));

/// Extract a post id from a URL or a bare numeric id.
pub fn extract_post_id(url_or_id: &str) -> Option<String> {
    let trimmed = url_or_id.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Some(trimmed.to_string());
    }
    POST_ID_RE
        .captures(trimmed)
        .map(|caps| caps[1].to_string())
}

/// Whether a URL points at the social platform.
pub fn is_social_url(url: &str) -> bool {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .is_some_and(|host| {
            host == "x.com"
                || host == "twitter.com"
                || host.ends_with(".x.com")
                || host.ends_with(".twitter.com")
        })
}

/// A post returned by the social API.
#[derive(Debug, Clone)]
pub struct SocialPost {
    pub id: String,
    pub text: String,
    pub author_id: String,
    pub conversation_id: String,
    pub created_at: String,
}

/// Client for the social platform's v2 REST API.
#[derive(Clone)]
pub struct SocialClient {
    inner: RateLimitedClient,
    base_url: String,
}

impl SocialClient {
    /// Build a client from config, reading the bearer token from the env
    /// var the config names.
    pub fn from_config(config: &SocialConfig, timeout: Duration) -> Result<Self> {
        let token = bookforge_shared::api_key_from_env(&config.bearer_token_env)?;
        let inner = RateLimitedClient::new(
            token,
            Duration::from_secs_f64(config.min_seconds_between_calls),
            timeout,
        )?;
        Ok(Self {
            inner,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build against an explicit base URL (tests, mirrors).
    pub fn new(inner: RateLimitedClient, base_url: impl Into<String>) -> Self {
        Self {
            inner,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch a single post by id.
    pub async fn fetch_post(&self, post_id: &str) -> Result<SocialPost> {
        let url = format!("{}/tweets/{post_id}", self.base_url);
        let body = self
            .inner
            .get_json(&url, &[("tweet.fields", "author_id,conversation_id,created_at")])
            .await?;
        parse_post(&body["data"])
            .ok_or_else(|| BookForgeError::parse(format!("post {post_id}: missing fields")))
    }

    /// Resolve a user id to a username.
    pub async fn fetch_username(&self, user_id: &str) -> Result<String> {
        let url = format!("{}/users/{user_id}", self.base_url);
        let body = self.inner.get_json(&url, &[]).await?;
        body["data"]["username"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BookForgeError::parse(format!("user {user_id}: missing username")))
    }

    /// Fetch a conversation's posts by one author, oldest first.
    ///
    /// Replies from other accounts are excluded; only the named handle's
    /// side of the thread counts as source text.
    pub async fn fetch_thread(
        &self,
        conversation_id: &str,
        username: &str,
    ) -> Result<Vec<SocialPost>> {
        let query = format!("conversation_id:{conversation_id} from:{username}");
        let mut posts = self.search(&query, 50).await?;
        posts.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(posts)
    }

    /// Search recent posts matching `query`.
    pub async fn search_recent(&self, query: &str, max_results: usize) -> Result<Vec<SocialPost>> {
        self.search(query, max_results).await
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SocialPost>> {
        // API accepts 10..=100 for max_results.
        let capped = max_results.clamp(10, 100).to_string();
        let url = format!("{}/tweets/search/recent", self.base_url);
        let body = self
            .inner
            .get_json(
                &url,
                &[
                    ("query", query),
                    ("max_results", capped.as_str()),
                    ("tweet.fields", "author_id,conversation_id,created_at"),
                ],
            )
            .await?;

        let posts: Vec<SocialPost> = body["data"]
            .as_array()
            .map(|items| items.iter().filter_map(parse_post).collect())
            .unwrap_or_default();
        Ok(posts)
    }

    /// Fetch a post plus its thread and flatten them into readable text.
    ///
    /// Accepts a status URL or a bare post id. Each post is rendered as
    /// `@username: text` with the root post first. Costs up to three API
    /// calls (post, author, thread).
    #[instrument(skip_all, fields(source = %url_or_id))]
    pub async fn fetch_post_text(&self, url_or_id: &str) -> Result<String> {
        let post_id = extract_post_id(url_or_id)
            .ok_or(BookForgeError::Fetch(FetchReason::InvalidUrl))?;

        let root = self.fetch_post(&post_id).await?;
        let username = match self.fetch_username(&root.author_id).await {
            Ok(name) => name,
            Err(e) => {
                debug!(error = %e, "username lookup failed, keeping root post only");
                return Ok(root.text);
            }
        };

        let mut lines = vec![format!("@{username}: {}", root.text)];

        match self.fetch_thread(&root.conversation_id, &username).await {
            Ok(thread) => {
                for post in thread {
                    if post.id != root.id {
                        lines.push(post.text);
                    }
                }
            }
            Err(e) => debug!(error = %e, "thread fetch failed, keeping root post only"),
        }

        Ok(lines.join("\n\n"))
    }
}

fn parse_post(value: &serde_json::Value) -> Option<SocialPost> {
    Some(SocialPost {
        id: value["id"].as_str()?.to_string(),
        text: value["text"].as_str()?.to_string(),
        author_id: value["author_id"].as_str().unwrap_or_default().to_string(),
        conversation_id: value["conversation_id"]
            .as_str()
            .or(value["id"].as_str())?
            .to_string(),
        created_at: value["created_at"].as_str().unwrap_or_default().to_string(),
    })
}
