//! HTTP session: a generic retrying request executor plus the cookie cache.
//!
//! Call sites only interpret responses. Transport errors and retryable
//! statuses are absorbed here according to [`RetryPolicy`]; everything else
//! (including 4xx) is handed back to the caller.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, COOKIE, HeaderMap, HeaderValue, ORIGIN, REFERER, RETRY_AFTER,
};
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, warn};

use lawledger_shared::{AppConfig, HttpConfig, LawLedgerError, Result};

use crate::cookies::{BrowserCookieSource, CookieCache, CookieSource};

/// Desktop Chrome identity presented to the catalog service.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                              (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36";

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Attempts, backoff curve and retryable status set.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub retry_statuses: Vec<u16>,
}

impl From<&HttpConfig> for RetryPolicy {
    fn from(config: &HttpConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.backoff_base_ms),
            max_backoff: Duration::from_millis(config.backoff_max_ms),
            retry_statuses: config.retry_statuses.clone(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status.as_u16())
    }

    /// Exponential backoff with ±30% jitter for the 1-based `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt.saturating_sub(1).min(16) as i32);
        let jitter = rand::thread_rng().gen_range(0.7..1.3);
        let millis = self.base_backoff.as_millis() as f64 * exp * jitter;
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }

    /// Server-requested delay from `Retry-After` (seconds form), capped.
    fn retry_after(&self, response: &Response) -> Option<Duration> {
        let secs: u64 = response
            .headers()
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()?;
        Some(Duration::from_secs(secs).min(self.max_backoff))
    }
}

// ---------------------------------------------------------------------------
// Request options
// ---------------------------------------------------------------------------

/// Per-call options for [`SessionManager::request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub json: Option<serde_json::Value>,
    pub query: Vec<(String, String)>,
    /// Leave redirects for the caller to read from `Location`.
    pub no_redirects: bool,
}

impl RequestOptions {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            json: Some(body),
            ..Default::default()
        }
    }

    pub fn query(pairs: &[(&str, &str)]) -> Self {
        Self {
            query: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn without_redirects(mut self) -> Self {
        self.no_redirects = true;
        self
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Shared HTTP client, retry policy and cookie cache.
pub struct SessionManager {
    client: Client,
    no_redirect_client: Client,
    policy: RetryPolicy,
    cookies: CookieCache,
}

impl SessionManager {
    /// Build a session from config, wiring the browser handshake when enabled.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let source: Option<Arc<dyn CookieSource>> = if config.session.browser_handshake {
            let url = config.remote.endpoint(&config.remote.handshake_path);
            Some(Arc::new(BrowserCookieSource::new(url, &config.session)))
        } else {
            None
        };
        Self::new(
            &config.remote.base_url,
            &config.http,
            CookieCache::new(source),
        )
    }

    pub fn new(base_url: &str, http: &HttpConfig, cookies: CookieCache) -> Result<Self> {
        let headers = default_headers(base_url)?;
        let build = |redirects: reqwest::redirect::Policy| {
            Client::builder()
                .user_agent(USER_AGENT)
                .default_headers(headers.clone())
                .redirect(redirects)
                .connect_timeout(Duration::from_millis(http.connect_timeout_ms))
                .read_timeout(Duration::from_millis(http.read_timeout_ms))
                .build()
                .map_err(|e| LawLedgerError::Network(format!("failed to build HTTP client: {e}")))
        };

        Ok(Self {
            client: build(reqwest::redirect::Policy::limited(5))?,
            no_redirect_client: build(reqwest::redirect::Policy::none())?,
            policy: RetryPolicy::from(http),
            cookies,
        })
    }

    pub fn cookies(&self) -> &CookieCache {
        &self.cookies
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send a request, retrying transport errors and retryable statuses.
    ///
    /// Non-retryable responses (any status) are returned as-is. Exhausting the
    /// attempt budget yields [`LawLedgerError::Network`].
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: &RequestOptions,
    ) -> Result<Response> {
        let client = if options.no_redirects {
            &self.no_redirect_client
        } else {
            &self.client
        };
        let max_attempts = self.policy.max_attempts;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let mut builder = client.request(method.clone(), url);
            if !options.query.is_empty() {
                builder = builder.query(&options.query);
            }
            if let Some(body) = &options.json {
                builder = builder.json(body);
            }
            if let Some(cookie) = self.cookies.header_value().await {
                builder = builder.header(COOKIE, cookie);
            }

            let delay = match builder.send().await {
                Ok(response) if self.policy.is_retryable(response.status()) => {
                    last_error = format!("HTTP {}", response.status());
                    self.policy
                        .retry_after(&response)
                        .unwrap_or_else(|| self.policy.backoff(attempt))
                }
                Ok(response) => {
                    debug!(%method, url, status = response.status().as_u16(), attempt, "response");
                    return Ok(response);
                }
                Err(e) => {
                    last_error = e.to_string();
                    self.policy.backoff(attempt)
                }
            };

            if attempt < max_attempts {
                warn!(
                    %method,
                    url,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "request failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(LawLedgerError::Network(format!(
            "{method} {url} failed after {max_attempts} attempts: {last_error}"
        )))
    }
}

fn default_headers(base_url: &str) -> Result<HeaderMap> {
    let origin = base_url.trim_end_matches('/');
    let value = |v: &str| {
        HeaderValue::from_str(v)
            .map_err(|e| LawLedgerError::config(format!("invalid header value {v:?}: {e}")))
    };

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, value("application/json, text/plain, */*")?);
    headers.insert(ACCEPT_LANGUAGE, value("zh-CN,zh;q=0.9")?);
    headers.insert(ORIGIN, value(origin)?);
    headers.insert(REFERER, value(&format!("{origin}/"))?);
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StaticSource, fast_http};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn backoff_is_capped_and_grows() {
        let policy = RetryPolicy::from(&HttpConfig::default());
        for attempt in 1..=10 {
            assert!(policy.backoff(attempt) <= Duration::from_secs(30));
        }
        let first = policy.backoff(1);
        assert!(first >= Duration::from_millis(525) && first <= Duration::from_millis(975));
        assert!(policy.is_retryable(StatusCode::TOO_MANY_REQUESTS));
        assert!(!policy.is_retryable(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn retries_retryable_status_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let session =
            SessionManager::new(&server.uri(), &fast_http(), CookieCache::disabled()).unwrap();
        let response = session
            .request(
                Method::GET,
                &format!("{}/flaky", server.uri()),
                &RequestOptions::default(),
            )
            .await
            .expect("eventual success");
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn exhausting_retries_is_a_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let session =
            SessionManager::new(&server.uri(), &fast_http(), CookieCache::disabled()).unwrap();
        let err = session
            .request(Method::GET, &server.uri(), &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LawLedgerError::Network(_)));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let session =
            SessionManager::new(&server.uri(), &fast_http(), CookieCache::disabled()).unwrap();
        let response = session
            .request(Method::GET, &server.uri(), &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn cached_cookies_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("cookie", "wzws_sessionid=s1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let source = Arc::new(StaticSource::new(&[("wzws_sessionid", "s1")]));
        let session =
            SessionManager::new(&server.uri(), &fast_http(), CookieCache::new(Some(source)))
                .unwrap();
        let response = session
            .request(Method::GET, &server.uri(), &RequestOptions::default())
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn browser_headers_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(|request: &wiremock::Request| {
                let get = |name: &str| {
                    request
                        .headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned)
                };
                get("accept-language").as_deref() == Some("zh-CN,zh;q=0.9")
                    && get("accept").as_deref() == Some("application/json, text/plain, */*")
            })
            .and(header("origin", server.uri().as_str()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let session =
            SessionManager::new(&server.uri(), &fast_http(), CookieCache::disabled()).unwrap();
        let response = session
            .request(Method::GET, &server.uri(), &RequestOptions::default())
            .await
            .unwrap();
        assert!(response.status().is_success());
    }
}
