//! Source fetch dispatch: local files, social posts, generic web pages.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use bookforge_shared::{BookForgeError, FetchReason, Result};

use crate::html::{clean_html, looks_blocked, normalize_whitespace};
use crate::social::{SocialClient, is_social_url};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("BookForge/", env!("CARGO_PKG_VERSION"));

/// Reader proxy used as a fallback when a page refuses direct fetches.
const DEFAULT_READER_PROXY: &str = "https://r.jina.ai";

/// Statuses that mean "the page exists but won't talk to us directly".
const PROXY_RETRY_STATUSES: &[u16] = &[403, 429, 451];

/// Fetches a source URL and returns cleaned plain text.
///
/// Dispatch is by URL shape: `file:` URLs read from disk, social status
/// URLs go through the social API (when configured), everything else is
/// an HTTP GET with a reader-proxy fallback for bot-hostile hosts.
#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    social: Option<SocialClient>,
    reader_proxy: String,
}

impl Fetcher {
    pub fn new(timeout: Duration, social: Option<SocialClient>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| BookForgeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            social,
            reader_proxy: DEFAULT_READER_PROXY.into(),
        })
    }

    /// Override the reader proxy base URL (tests, self-hosted proxies).
    pub fn with_reader_proxy(mut self, base_url: impl Into<String>) -> Self {
        self.reader_proxy = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Whether a social client is configured.
    pub fn social_enabled(&self) -> bool {
        self.social.is_some()
    }

    /// Whether `url` would be dispatched to the social API.
    pub fn is_social(&self, url: &str) -> bool {
        is_social_url(url)
    }

    /// Fetch and clean a source. Returns plain text ready for gating
    /// and chunking.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch(&self, url: &str) -> Result<String> {
        if let Some(path) = url.strip_prefix("file://").or_else(|| url.strip_prefix("file:")) {
            return self.fetch_file(path);
        }

        if is_social_url(url) {
            let social = self.social.as_ref().ok_or_else(|| {
                BookForgeError::config("social URL queued but no social client is configured")
            })?;
            return social.fetch_post_text(url).await;
        }

        self.fetch_web(url).await
    }

    fn fetch_file(&self, path: &str) -> Result<String> {
        debug!(path, "reading local file source");
        let raw = std::fs::read_to_string(path).map_err(|e| BookForgeError::io(path, e))?;
        let text = if path.ends_with(".html") || path.ends_with(".htm") {
            clean_html(&raw)
        } else {
            raw.trim().to_string()
        };
        Ok(text)
    }

    async fn fetch_web(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BookForgeError::Network(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let text = if PROXY_RETRY_STATUSES.contains(&status) {
            warn!(status, "direct fetch refused, retrying via reader proxy");
            self.fetch_via_proxy(url).await?
        } else if !response.status().is_success() {
            return Err(BookForgeError::Network(format!(
                "{url}: HTTP {}",
                response.status()
            )));
        } else {
            let body = response
                .text()
                .await
                .map_err(|e| BookForgeError::Network(format!("{url}: body read failed: {e}")))?;
            clean_html(&body)
        };

        if looks_blocked(&text) {
            return Err(BookForgeError::Fetch(FetchReason::Blocked));
        }
        Ok(text)
    }

    /// Fetch through the reader proxy, which returns pre-extracted text.
    async fn fetch_via_proxy(&self, url: &str) -> Result<String> {
        let proxy_url = format!("{}/{url}", self.reader_proxy);
        let response = self
            .client
            .get(&proxy_url)
            .send()
            .await
            .map_err(|e| BookForgeError::Network(format!("reader proxy: {e}")))?;

        if !response.status().is_success() {
            return Err(BookForgeError::Network(format!(
                "reader proxy: HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| BookForgeError::Network(format!("reader proxy: body read failed: {e}")))?;
        // The proxy returns pre-extracted text, but its paragraph spacing
        // still needs the same blank-line collapse as cleaned HTML.
        Ok(normalize_whitespace(&body))
    }
}
