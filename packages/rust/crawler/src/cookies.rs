//! Anti-automation cookie cache with single-flight population.
//!
//! The cache starts empty. The first caller that needs cookies runs the
//! handshake while holding the lock; concurrent callers wait and then reuse
//! the result. `clear` drops the cookies so the next `get` handshakes again.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lawledger_shared::{LawLedgerError, Result, SessionConfig};

use crate::session::USER_AGENT;

pub type CookieMap = HashMap<String, String>;

/// Something that can produce a fresh set of session cookies.
pub trait CookieSource: Send + Sync {
    fn acquire(&self) -> BoxFuture<'_, Result<CookieMap>>;
}

#[derive(Default)]
struct CookieState {
    cookies: CookieMap,
    /// A handshake ran since the last clear, even if it produced nothing.
    attempted: bool,
}

/// Process-wide cookie cache shared by every request of a session.
pub struct CookieCache {
    state: Mutex<CookieState>,
    source: Option<Arc<dyn CookieSource>>,
    clears: AtomicUsize,
    handshakes: AtomicUsize,
}

impl CookieCache {
    pub fn new(source: Option<Arc<dyn CookieSource>>) -> Self {
        Self {
            state: Mutex::new(CookieState::default()),
            source,
            clears: AtomicUsize::new(0),
            handshakes: AtomicUsize::new(0),
        }
    }

    /// A cache that never handshakes; requests go out unauthenticated.
    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Current cookies, running the handshake if none are cached.
    ///
    /// An empty map means "proceed unauthenticated".
    pub async fn get(&self) -> CookieMap {
        let mut state = self.state.lock().await;
        if !state.cookies.is_empty() || state.attempted {
            return state.cookies.clone();
        }
        let Some(source) = &self.source else {
            return CookieMap::new();
        };

        state.attempted = true;
        self.handshakes.fetch_add(1, Ordering::Relaxed);
        match source.acquire().await {
            Ok(cookies) => {
                if cookies.is_empty() {
                    warn!("cookie handshake returned no required cookies");
                } else {
                    info!(count = cookies.len(), "session cookies acquired");
                }
                state.cookies = cookies;
            }
            Err(e) => {
                warn!(error = %e, "cookie handshake failed, continuing without cookies");
            }
        }
        state.cookies.clone()
    }

    /// Drop cached cookies; visible to every later caller.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.cookies.clear();
        state.attempted = false;
        self.clears.fetch_add(1, Ordering::Relaxed);
        debug!("session cookies cleared");
    }

    /// Clear and immediately handshake again.
    pub async fn refresh(&self) -> CookieMap {
        self.clear().await;
        self.get().await
    }

    /// `Cookie` header value for the cached cookies, if any.
    pub async fn header_value(&self) -> Option<String> {
        let cookies = self.get().await;
        if cookies.is_empty() {
            return None;
        }
        let mut pairs: Vec<String> = cookies.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        Some(pairs.join("; "))
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::Relaxed)
    }

    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Headless browser handshake
// ---------------------------------------------------------------------------

/// Opens the site in headless Chromium and keeps the challenge cookies it sets.
pub struct BrowserCookieSource {
    url: String,
    required: Vec<String>,
    wait: Duration,
    executable: Option<PathBuf>,
}

impl BrowserCookieSource {
    pub fn new(url: impl Into<String>, config: &SessionConfig) -> Self {
        Self {
            url: url.into(),
            required: config.required_cookies.clone(),
            wait: Duration::from_millis(config.handshake_wait_ms),
            executable: config.browser_executable.clone(),
        }
    }

    async fn handshake(&self) -> Result<CookieMap> {
        let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
            "--no-sandbox".to_string(),
            "--disable-gpu".to_string(),
            "--disable-dev-shm-usage".to_string(),
            format!("--user-agent={USER_AGENT}"),
        ]);
        if let Some(exe) = &self.executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder.build().map_err(LawLedgerError::Browser)?;

        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| LawLedgerError::Browser(format!("launch failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let visited: std::result::Result<_, chromiumoxide::error::CdpError> = async {
            let page = browser.new_page(self.url.as_str()).await?;
            tokio::time::sleep(self.wait).await;
            page.get_cookies().await
        }
        .await;

        if let Err(e) = browser.close().await {
            debug!(error = %e, "browser close failed");
        }
        handler_task.abort();

        let cookies = visited.map_err(|e| LawLedgerError::Browser(e.to_string()))?;
        Ok(cookies
            .into_iter()
            .filter(|c| self.required.iter().any(|name| c.name.starts_with(name.as_str())))
            .map(|c| (c.name, c.value))
            .collect())
    }
}

impl CookieSource for BrowserCookieSource {
    fn acquire(&self) -> BoxFuture<'_, Result<CookieMap>> {
        Box::pin(self.handshake())
    }
}
