//! Core pipeline stages and workflow orchestration for lawledger.
//!
//! This crate ties the ledger, the catalog client, discovery and the
//! markdown converter together:
//! - [`classify`] / [`layout`]: where a document lives on disk
//! - [`download`]: resolve, place and stream source files
//! - [`transform`]: source file → markdown
//! - [`reconcile`]: sync, reorganize and reset against the filesystem
//! - [`pipeline`]: crawl, download, parse and the full workflow

pub mod classify;
pub mod download;
pub mod layout;
pub mod pipeline;
pub mod reconcile;
pub mod transform;

pub use classify::{Placement, Rule, RuleMatch, classify, classify_placement, jurisdiction};
pub use download::{DownloadOutcome, DownloadReport, Downloader, decode_source_id};
pub use pipeline::{Pipeline, ProgressReporter, SilentProgress, StageTotals, WorkflowReport};
pub use reconcile::{Reconciler, ReorganizeReport, ResetMode, SyncReport};
pub use transform::{TransformOutcome, TransformReport, Transformer};

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use lawledger_crawler::{CatalogClient, CookieCache, SessionManager};
    use lawledger_shared::{AppConfig, HttpConfig};
    use lawledger_storage::Ledger;
    use uuid::Uuid;
    use wiremock::MockServer;

    /// Config pointed at a mock server with every delay zeroed.
    pub(crate) fn test_config(server: &MockServer) -> AppConfig {
        let mut config = AppConfig::default();
        config.remote.base_url = server.uri();
        config.http = HttpConfig {
            max_attempts: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..HttpConfig::default()
        };
        config.throttle.request_delay_ms = 0;
        config.throttle.anti_bot_cooldown_ms = 0;
        config.session.browser_handshake = false;
        config
    }

    pub(crate) fn catalog_for(server: &MockServer) -> CatalogClient {
        let config = test_config(server);
        let session =
            SessionManager::new(&config.remote.base_url, &config.http, CookieCache::disabled())
                .expect("session");
        CatalogClient::new(Arc::new(session), &config)
    }

    pub(crate) async fn test_ledger() -> Ledger {
        let path = std::env::temp_dir().join(format!("ll_test_{}.db", Uuid::now_v7()));
        Ledger::open(&path).await.expect("open test db")
    }
}
