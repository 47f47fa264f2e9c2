//! Rate-limited, retrying HTTP fetch primitive shared by every source.
//!
//! Every attempt is preceded by a fixed politeness delay. Failed attempts
//! (transport error, non-2xx status, or a block page) are retried with
//! exponential backoff up to `max_attempts`; after that the caller gets a
//! [`FetchFailure`] and nothing is raised further.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use tracing::{debug, instrument, warn};
use url::Url;

use firmscope_shared::{FirmscopeError, HttpConfig, Result};

/// Bodies beyond this size are truncated while reading.
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Lowercased substrings that identify CAPTCHA / robot-check pages.
const BLOCK_MARKERS: [&str; 4] = ["captcha", "access denied", "robot check", "unusual traffic"];

/// Exponent cap so `base * 2^n` cannot overflow.
const MAX_BACKOFF_EXPONENT: u32 = 16;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A successful response body.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: String,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureCause {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("blocked (matched '{0}')")]
    Blocked(&'static str),
}

/// All attempts for a URL failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{url}: gave up after {attempts} attempt(s): {cause}")]
pub struct FetchFailure {
    pub url: String,
    pub attempts: u32,
    /// Cause of the last attempt.
    pub cause: FailureCause,
    /// Backoff delays slept between attempts, in order.
    pub backoffs: Vec<Duration>,
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// HTTP client with politeness delay, block detection and bounded retry.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    max_attempts: u32,
    backoff_base: Duration,
    request_delay: Duration,
}

impl Transport {
    /// Build a transport from the `[http]` config section.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert("DNT", HeaderValue::from_static("1"));
        headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(config.timeout())
            .build()
            .map_err(|e| FirmscopeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_attempts: config.max_attempts.max(1),
            backoff_base: config.backoff_base(),
            request_delay: config.request_delay(),
        })
    }

    /// Fetch `url`, retrying until it succeeds or `max_attempts` is spent.
    #[instrument(skip(self), fields(max_attempts = self.max_attempts))]
    pub async fn fetch(&self, url: &str) -> std::result::Result<FetchedBody, FetchFailure> {
        let mut backoffs = Vec::new();
        let mut last_cause = FailureCause::Transport("no attempt made".into());

        for attempt in 0..self.max_attempts {
            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }

            match self.attempt(url).await {
                Ok((final_url, status, body)) => {
                    debug!(attempt = attempt + 1, status, len = body.len(), "fetched");
                    return Ok(FetchedBody {
                        url: final_url,
                        status,
                        body,
                        attempts: attempt + 1,
                    });
                }
                Err(cause) => {
                    let is_last = attempt + 1 >= self.max_attempts;
                    if is_last {
                        last_cause = cause;
                        break;
                    }
                    let delay = backoff_delay(self.backoff_base, attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        cause = %cause,
                        "fetch failed, retrying"
                    );
                    last_cause = cause;
                    tokio::time::sleep(delay).await;
                    backoffs.push(delay);
                }
            }
        }

        warn!(attempts = self.max_attempts, cause = %last_cause, "giving up on URL");
        Err(FetchFailure {
            url: url.to_string(),
            attempts: self.max_attempts,
            cause: last_cause,
            backoffs,
        })
    }

    /// Like [`fetch`](Self::fetch) but only the body, for callers that map
    /// any failure to absence.
    pub async fn fetch_text(&self, url: &str) -> Option<String> {
        self.fetch(url).await.ok().map(|fetched| fetched.body)
    }

    /// One GET: status check, capped body read, block detection.
    async fn attempt(
        &self,
        url: &str,
    ) -> std::result::Result<(String, u16, String), FailureCause> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FailureCause::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FailureCause::Status(status.as_u16()));
        }
        let final_url = response.url().to_string();

        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FailureCause::Transport(format!("body read failed: {e}")))?
        {
            let remaining = MAX_BODY_BYTES.saturating_sub(bytes.len());
            if remaining == 0 {
                debug!(limit = MAX_BODY_BYTES, "response body truncated");
                break;
            }
            bytes.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
        }
        let body = String::from_utf8_lossy(&bytes).into_owned();

        if let Some(marker) = detect_block(&body) {
            return Err(FailureCause::Blocked(marker));
        }

        Ok((final_url, status.as_u16(), body))
    }
}

/// Delay slept after failed attempt `attempt` (0-based): `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_EXPONENT))
}

/// Return the block marker found in `body`, if any.
pub fn detect_block(body: &str) -> Option<&'static str> {
    let lowered = body.to_lowercase();
    BLOCK_MARKERS
        .into_iter()
        .find(|marker| lowered.contains(marker))
}

/// Build `base?key=value&...` with proper escaping.
pub fn url_with_query(base: &str, params: &[(&str, &str)]) -> Result<String> {
    Url::parse_with_params(base, params)
        .map(|u| u.to_string())
        .map_err(|e| FirmscopeError::validation(format!("invalid endpoint '{base}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(max_attempts: u32) -> HttpConfig {
        HttpConfig {
            timeout_secs: 5,
            max_attempts,
            backoff_base_ms: 5,
            request_delay_ms: 0,
            fetch_concurrency: 4,
            user_agent: "firmscope-test".into(),
        }
    }

    #[test]
    fn backoff_is_exponential() {
        let base = Duration::from_secs(2);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(8));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let huge = backoff_delay(Duration::from_secs(u64::MAX / 2), 40);
        assert_eq!(huge, Duration::MAX);
    }

    #[test]
    fn block_markers_are_case_insensitive() {
        assert_eq!(detect_block("<h1>Please solve this CAPTCHA</h1>"), Some("captcha"));
        assert_eq!(detect_block("Access Denied"), Some("access denied"));
        assert_eq!(detect_block("<p>Acme makes widgets</p>"), None);
    }

    #[test]
    fn query_urls_are_escaped() {
        let url = url_with_query("https://search.example.com/search", &[("q", "Acme & Co TX")])
            .unwrap();
        assert_eq!(url, "https://search.example.com/search?q=Acme+%26+Co+TX");
    }

    #[tokio::test]
    async fn fetch_returns_body_on_success() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/about"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("<p>Acme</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let transport = Transport::new(&fast_config(3)).unwrap();
        let fetched = transport
            .fetch(&format!("{}/about", server.uri()))
            .await
            .expect("fetch ok");
        assert_eq!(fetched.status, 200);
        assert_eq!(fetched.attempts, 1);
        assert_eq!(fetched.body, "<p>Acme</p>");
    }

    #[tokio::test]
    async fn fetch_gives_up_after_exactly_max_attempts() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;

        let transport = Transport::new(&fast_config(4)).unwrap();
        let failure = transport
            .fetch(&format!("{}/down", server.uri()))
            .await
            .expect_err("should fail");

        assert_eq!(failure.attempts, 4);
        assert_eq!(failure.cause, FailureCause::Status(503));
        // No backoff after the final attempt.
        assert_eq!(failure.backoffs.len(), 3);
        assert!(failure.backoffs.windows(2).all(|w| w[0] < w[1]));
        // MockServer verifies `.expect(4)` on drop.
    }

    #[tokio::test]
    async fn block_page_counts_as_failure() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_string("<html>Our systems detected unusual traffic</html>"),
            )
            .expect(2)
            .mount(&server)
            .await;

        let transport = Transport::new(&fast_config(2)).unwrap();
        let failure = transport.fetch(&server.uri()).await.expect_err("blocked");
        assert_eq!(failure.cause, FailureCause::Blocked("unusual traffic"));
        assert_eq!(failure.attempts, 2);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let transport = Transport::new(&fast_config(3)).unwrap();
        let fetched = transport.fetch(&server.uri()).await.expect("second attempt");
        assert_eq!(fetched.attempts, 2);
        assert_eq!(fetched.body, "ok");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_failure_not_a_panic() {
        let transport = Transport::new(&fast_config(1)).unwrap();
        let failure = transport
            .fetch("http://127.0.0.1:1/nothing")
            .await
            .expect_err("connection refused");
        assert!(matches!(failure.cause, FailureCause::Transport(_)));
        assert!(transport.fetch_text("http://127.0.0.1:1/").await.is_none());
    }
}
