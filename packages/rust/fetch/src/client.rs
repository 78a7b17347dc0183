//! Rate-limited HTTP client for authenticated JSON APIs.
//!
//! Wraps a `reqwest::Client` with two behaviors the social API requires:
//! a minimum spacing between calls, and a single retry after an HTTP 429
//! that honors the server's `x-rate-limit-reset` header. The last-call
//! timestamp lives inside the client so concurrent holders of a clone
//! share one pacing window.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use bookforge_shared::{BookForgeError, Result};

/// Header carrying the unix timestamp at which a 429 window resets.
const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";

/// Upper bound on how long a reset header can make us sleep.
const MAX_RESET_WAIT: Duration = Duration::from_secs(900);

/// HTTP client that self-paces and retries once on rate limiting.
#[derive(Clone)]
pub struct RateLimitedClient {
    client: reqwest::Client,
    bearer_token: String,
    min_spacing: Duration,
    last_call: Arc<Mutex<Option<Instant>>>,
}

impl RateLimitedClient {
    pub fn new(bearer_token: String, min_spacing: Duration, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BookForgeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            bearer_token,
            min_spacing,
            last_call: Arc::new(Mutex::new(None)),
        })
    }

    /// GET a JSON document, pacing against the previous call.
    ///
    /// On a 429 the reset header is honored (bounded by [`MAX_RESET_WAIT`])
    /// and the request retried exactly once; a second 429 surfaces as
    /// [`BookForgeError::RateLimited`].
    pub async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<serde_json::Value> {
        self.pace().await;

        let response = self.send(url, query).await?;
        let response = if response.status().as_u16() == 429 {
            let wait = reset_wait(&response);
            warn!(%url, wait_secs = wait.as_secs(), "rate limited, waiting for reset");
            tokio::time::sleep(wait).await;
            let retry = self.send(url, query).await?;
            if retry.status().as_u16() == 429 {
                return Err(BookForgeError::RateLimited);
            }
            retry
        } else {
            response
        };

        let status = response.status();
        if !status.is_success() {
            return Err(BookForgeError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| BookForgeError::Network(format!("{url}: invalid JSON body: {e}")))
    }

    async fn send(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        self.client
            .get(url)
            .bearer_auth(&self.bearer_token)
            .query(query)
            .send()
            .await
            .map_err(|e| BookForgeError::Network(format!("{url}: {e}")))
    }

    /// Sleep until `min_spacing` has elapsed since the previous call.
    ///
    /// The lock is held across the sleep so callers queue up instead of
    /// racing through the same gap.
    async fn pace(&self) {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_spacing {
                let wait = self.min_spacing - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "pacing API call");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// How long to wait before the retry, from the response's reset header.
///
/// Falls back to one second if the header is missing or malformed, and
/// never waits less than one second even when the reset is in the past.
fn reset_wait(response: &reqwest::Response) -> Duration {
    let reset_ts = response
        .headers()
        .get(RATE_LIMIT_RESET_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let Some(reset_ts) = reset_ts else {
        return Duration::from_secs(1);
    };

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let wait = Duration::from_secs(reset_ts.saturating_sub(now).max(1));
    wait.min(MAX_RESET_WAIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(spacing_ms: u64) -> RateLimitedClient {
        RateLimitedClient::new(
            "test-token".into(),
            Duration::from_millis(spacing_ms),
            Duration::from_secs(5),
        )
        .expect("build client")
    }

    #[tokio::test]
    async fn sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"a": 1})))
            .mount(&server)
            .await;

        let client = test_client(0);
        let body = client
            .get_json(&format!("{}/ok", server.uri()), &[])
            .await
            .expect("get json");
        assert_eq!(body["a"], 1);
    }

    #[tokio::test]
    async fn paces_consecutive_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = test_client(150);
        let url = format!("{}/", server.uri());
        let start = Instant::now();
        client.get_json(&url, &[]).await.unwrap();
        client.get_json(&url, &[]).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn retries_once_after_429() {
        let server = MockServer::start().await;
        // First call rate limited with a reset already in the past, so the
        // retry happens after the 1s floor.
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("x-rate-limit-reset", "0"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/limited"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = test_client(0);
        let body = client
            .get_json(&format!("{}/limited", server.uri()), &[])
            .await
            .expect("retry succeeds");
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn second_429_is_rate_limited_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("x-rate-limit-reset", "0"),
            )
            .mount(&server)
            .await;

        let client = test_client(0);
        let err = client
            .get_json(&format!("{}/always", server.uri()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, BookForgeError::RateLimited));
    }

    #[tokio::test]
    async fn non_success_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = test_client(0);
        let err = client
            .get_json(&format!("{}/missing", server.uri()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, BookForgeError::Network(_)));
    }
}
