//! Catalog client: listing pages and download-URL resolution.
//!
//! Both calls sit on top of the [`SessionManager`] retry executor and add
//! the anti-bot layer: a challenge clears the cookie cache, waits a growing
//! cooldown, and retries the same request a bounded number of times.

use std::sync::Arc;

use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use lawledger_shared::{AppConfig, LawLedgerError, RemoteConfig, Result, ThrottleConfig};

use crate::listing::{ListingPage, ListingResponse, ListingScope, classify_listing, is_challenge};
use crate::session::{RequestOptions, SessionManager};

/// Remote catalog API bound to one session.
pub struct CatalogClient {
    session: Arc<SessionManager>,
    remote: RemoteConfig,
    throttle: ThrottleConfig,
}

impl CatalogClient {
    pub fn new(session: Arc<SessionManager>, config: &AppConfig) -> Self {
        Self {
            session,
            remote: config.remote.clone(),
            throttle: config.throttle.clone(),
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn page_size(&self) -> u32 {
        self.remote.page_size
    }

    pub fn throttle(&self) -> &ThrottleConfig {
        &self.throttle
    }

    /// Fetch one listing page, absorbing anti-bot challenges.
    pub async fn fetch_listing(&self, scope: ListingScope, page: u32) -> Result<ListingPage> {
        let url = self.remote.endpoint(&self.remote.listing_path);
        let options = RequestOptions::json(crate::listing::listing_payload(
            scope,
            page,
            self.remote.page_size,
        ));
        let attempts = self.throttle.anti_bot_attempts.max(1);

        for attempt in 0..attempts {
            let response = self.session.request(Method::POST, &url, &options).await?;
            let status = response.status();

            if is_session_rejection(status) {
                warn!(page, status = status.as_u16(), attempt, "listing rejected session");
                self.challenge_backoff(attempt, attempts).await;
                continue;
            }
            if !status.is_success() {
                return Err(LawLedgerError::Http {
                    status: status.as_u16(),
                    url,
                });
            }

            let body = read_text(response).await?;
            match classify_listing(&body) {
                ListingResponse::Page(listing) => {
                    debug!(page, items = listing.items.len(), total = listing.total, "listing page");
                    return Ok(listing);
                }
                ListingResponse::AntiBot => {
                    warn!(page, attempt, "anti-bot challenge on listing page");
                    self.challenge_backoff(attempt, attempts).await;
                }
                ListingResponse::HtmlError => {
                    return Err(LawLedgerError::parse(format!(
                        "listing page {page} returned an HTML error page"
                    )));
                }
                ListingResponse::Malformed(message) => {
                    self.session.cookies().clear().await;
                    return Err(LawLedgerError::parse(format!(
                        "listing page {page}: {message}"
                    )));
                }
            }
        }

        Err(LawLedgerError::AntiBot(format!(
            "listing page {page} still challenged after {attempts} attempts"
        )))
    }

    /// Resolve an opaque document id to its binary download URL.
    ///
    /// `Ok(None)` means the service answered but offered no file.
    pub async fn resolve_download(&self, source_id: &str) -> Result<Option<String>> {
        let url = self.remote.endpoint(&self.remote.download_path);
        let options =
            RequestOptions::query(&[("format", "docx"), ("bbbs", source_id)]).without_redirects();
        let attempts = self.throttle.anti_bot_attempts.max(1);

        for attempt in 0..attempts {
            let response = self.session.request(Method::GET, &url, &options).await?;
            let status = response.status();

            if let Some(location) = response.headers().get(LOCATION) {
                let location = location
                    .to_str()
                    .map_err(|e| LawLedgerError::parse(format!("bad Location header: {e}")))?;
                return Ok(Some(absolutize(response.url(), location)));
            }
            if is_session_rejection(status) {
                warn!(source_id, status = status.as_u16(), attempt, "resolve rejected session");
                self.challenge_backoff(attempt, attempts).await;
                continue;
            }
            if !status.is_success() {
                return Err(LawLedgerError::Http {
                    status: status.as_u16(),
                    url: response.url().to_string(),
                });
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_ascii_lowercase();
            let direct_url = response.url().to_string();

            if is_binary(&content_type) {
                return Ok(Some(direct_url));
            }

            let body = read_text(response).await?;
            if is_challenge(&body) {
                warn!(source_id, attempt, "anti-bot challenge on resolve");
                self.challenge_backoff(attempt, attempts).await;
                continue;
            }
            return Ok(download_url_from_json(&body));
        }

        Err(LawLedgerError::AntiBot(format!(
            "resolve {source_id} still challenged after {attempts} attempts"
        )))
    }

    /// Clear cookies, then sleep the growing cooldown unless this was the last attempt.
    async fn challenge_backoff(&self, attempt: u32, attempts: u32) {
        self.session.cookies().clear().await;
        if attempt + 1 < attempts {
            let cooldown = self.throttle.anti_bot_cooldown(attempt);
            info!(cooldown_ms = cooldown.as_millis() as u64, "cooling down after challenge");
            tokio::time::sleep(cooldown).await;
        }
    }
}

fn is_session_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

fn is_binary(content_type: &str) -> bool {
    (content_type.starts_with("application/") && !content_type.starts_with("application/json"))
        || content_type.starts_with("binary/")
}

async fn read_text(response: Response) -> Result<String> {
    response
        .text()
        .await
        .map_err(|e| LawLedgerError::Network(format!("failed to read body: {e}")))
}

fn absolutize(base: &Url, location: &str) -> String {
    base.join(location)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| location.to_string())
}

/// `{code: 200, msg: "Success", data: {url}}` → url.
fn download_url_from_json(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let ok_code = match value.get("code")? {
        Value::Number(n) => n.as_i64() == Some(200),
        Value::String(s) => s == "200",
        _ => false,
    };
    if !ok_code || value.get("msg").and_then(Value::as_str) != Some("Success") {
        debug!(body = %body.chars().take(200).collect::<String>(), "resolve returned no url");
        return None;
    }
    value
        .get("data")?
        .get("url")?
        .as_str()
        .filter(|u| !u.is_empty())
        .map(String::from)
}
