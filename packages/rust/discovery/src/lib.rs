//! Discovery of catalog items missing from the ledger.
//!
//! Rather than re-crawling every category, discovery walks the unfiltered
//! listing page by page from the newest entries and keeps only items whose
//! primary id, alternate id (and optionally title) are unknown. Pagination
//! stops at the first page that yields nothing new when
//! [`DiscoveryOptions::stop_on_known_page`] is set, which assumes the remote
//! listing is ordered newest first.

mod partition;

use std::collections::BTreeMap;

use lawledger_crawler::{CatalogClient, ListingScope, page_count};
use lawledger_shared::{Category, DiscoveryConfig, DocumentRecord, Result};
use lawledger_storage::{KnownIdentifiers, Ledger};
use tracing::{debug, info, instrument, warn};

pub use partition::{PagePartition, partition_page};

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

/// Configuration for one discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Treat a title match as "already known".
    pub title_check: bool,
    /// Stop at the first page with zero new items.
    pub stop_on_known_page: bool,
    /// Page limit; `None` means until the listing runs out.
    pub max_pages: Option<u32>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

impl From<&DiscoveryConfig> for DiscoveryOptions {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            title_check: config.title_check,
            stop_on_known_page: config.stop_on_known_page,
            max_pages: (config.max_pages > 0).then_some(config.max_pages),
        }
    }
}

/// Why pagination ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A page yielded zero new items.
    NoNewItems,
    /// An empty page or the reported total was reached.
    Exhausted,
    /// `max_pages` was reached.
    PageLimit,
    /// A page could not be fetched.
    FetchError,
}

/// Outcome of a discovery run.
#[derive(Debug)]
pub struct DiscoveryReport {
    /// New items bucketed by resolved category.
    pub new_items: BTreeMap<Category, Vec<DocumentRecord>>,
    pub pages_fetched: u32,
    pub processed: usize,
    pub existing: usize,
    pub invalid: usize,
    pub stop_reason: StopReason,
}

impl DiscoveryReport {
    pub fn new_count(&self) -> usize {
        self.new_items.values().map(Vec::len).sum()
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Find catalog items absent from `ledger`.
///
/// Known identifiers are loaded once; new items are returned, not inserted.
#[instrument(skip_all, fields(title_check = opts.title_check))]
pub async fn discover(
    catalog: &CatalogClient,
    ledger: &Ledger,
    opts: &DiscoveryOptions,
) -> Result<DiscoveryReport> {
    let known = ledger.known_identifiers(opts.title_check).await?;
    discover_with(catalog, known, opts).await
}

/// Discovery against an explicit known-identifier set.
pub async fn discover_with(
    catalog: &CatalogClient,
    mut known: KnownIdentifiers,
    opts: &DiscoveryOptions,
) -> Result<DiscoveryReport> {
    let mut report = DiscoveryReport {
        new_items: BTreeMap::new(),
        pages_fetched: 0,
        processed: 0,
        existing: 0,
        invalid: 0,
        stop_reason: StopReason::Exhausted,
    };
    let mut last_page: Option<u32> = None;
    let mut page = 1;

    loop {
        if opts.max_pages.is_some_and(|max| page > max) {
            report.stop_reason = StopReason::PageLimit;
            break;
        }
        if last_page.is_some_and(|last| page > last) {
            report.stop_reason = StopReason::Exhausted;
            break;
        }

        let listing = match catalog.fetch_listing(ListingScope::All, page).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(page, error = %e, "discovery page failed, stopping");
                report.stop_reason = StopReason::FetchError;
                break;
            }
        };
        report.pages_fetched += 1;
        if last_page.is_none() && listing.total > 0 {
            last_page = Some(page_count(listing.total, catalog.page_size()));
        }
        if listing.items.is_empty() {
            report.stop_reason = StopReason::Exhausted;
            break;
        }

        report.processed += listing.items.len();
        let partition = partition_page(listing.items, &mut known, opts.title_check);
        let page_new = partition.new.len();
        report.existing += partition.existing;
        report.invalid += partition.invalid;
        for (category, item) in partition.new {
            report.new_items.entry(category).or_default().push(item);
        }

        debug!(
            page,
            new = page_new,
            existing = partition.existing,
            invalid = partition.invalid,
            "discovery page"
        );

        if page_new == 0 && opts.stop_on_known_page {
            report.stop_reason = StopReason::NoNewItems;
            break;
        }
        page += 1;
    }

    info!(
        pages = report.pages_fetched,
        processed = report.processed,
        existing = report.existing,
        invalid = report.invalid,
        new = report.new_count(),
        stop_reason = ?report.stop_reason,
        "discovery completed"
    );
    for (category, items) in &report.new_items {
        info!(category = %category, count = items.len(), "new items");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lawledger_crawler::{CookieCache, SessionManager};
    use lawledger_shared::{AppConfig, HttpConfig};
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn catalog_for(server: &MockServer) -> CatalogClient {
        let mut config = AppConfig::default();
        config.remote.base_url = server.uri();
        config.http = HttpConfig {
            max_attempts: 2,
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..HttpConfig::default()
        };
        config.throttle.anti_bot_cooldown_ms = 0;
        let session =
            SessionManager::new(&config.remote.base_url, &config.http, CookieCache::disabled())
                .expect("session");
        CatalogClient::new(Arc::new(session), &config)
    }

    async fn test_ledger() -> Ledger {
        let path = std::env::temp_dir().join(format!("ll_test_{}.db", Uuid::now_v7()));
        Ledger::open(&path).await.expect("open test db")
    }

    fn rows_page(items: &[(&str, &str, &str)], total: u64) -> String {
        let rows: Vec<serde_json::Value> = items
            .iter()
            .map(|(bbbs, title, flxz)| json!({"bbbs": bbbs, "title": title, "flxz": flxz}))
            .collect();
        json!({"rows": rows, "total": total}).to_string()
    }

    async fn mount(server: &MockServer, page: u32, body: String) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"pageNum": page, "searchRange": 0})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn second_run_over_unchanged_listing_finds_nothing() {
        let server = MockServer::start().await;
        mount(&server, 1, rows_page(&[("n1", "甲法", "法律"), ("n2", "乙规定", "行政法规")], 12)).await;
        mount(&server, 2, rows_page(&[("n3", "丙条例", "地方性法规")], 12)).await;

        let catalog = catalog_for(&server);
        let ledger = test_ledger().await;
        let opts = DiscoveryOptions::default();

        let first = discover(&catalog, &ledger, &opts).await.unwrap();
        assert_eq!(first.new_count(), 3);
        assert_eq!(first.stop_reason, StopReason::Exhausted);
        for (category, items) in &first.new_items {
            ledger.upsert_records(*category, items).await.unwrap();
        }

        let second = discover(&catalog, &ledger, &opts).await.unwrap();
        assert_eq!(second.new_count(), 0);
        assert_eq!(second.pages_fetched, 1);
        assert_eq!(second.stop_reason, StopReason::NoNewItems);
    }

    #[tokio::test]
    async fn alternate_id_in_ledger_blocks_reinsertion() {
        let server = MockServer::start().await;
        mount(&server, 1, rows_page(&[("bbbs-9", "改名后的法", "法律")], 1)).await;

        let ledger = test_ledger().await;
        ledger
            .upsert_records(
                Category::LawStatute,
                &[DocumentRecord {
                    id: "legacy-primary".into(),
                    title: "旧名".into(),
                    alt_id: Some("bbbs-9".into()),
                    ..Default::default()
                }],
            )
            .await
            .unwrap();

        let report = discover(&catalog_for(&server), &ledger, &DiscoveryOptions::default())
            .await
            .unwrap();
        assert_eq!(report.new_count(), 0);
        assert_eq!(report.existing, 1);
    }

    #[tokio::test]
    async fn exhaustive_mode_keeps_paginating_past_known_pages() {
        let server = MockServer::start().await;
        mount(&server, 1, rows_page(&[("k1", "已知", "法律")], 15)).await;
        mount(&server, 2, rows_page(&[("n2", "新法", "宪法")], 15)).await;

        let mut known = KnownIdentifiers::default();
        known.ids.insert("k1".into());
        let opts = DiscoveryOptions {
            stop_on_known_page: false,
            ..DiscoveryOptions::default()
        };

        let report = discover_with(&catalog_for(&server), known, &opts).await.unwrap();
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.new_items[&Category::Constitution].len(), 1);
    }

    #[tokio::test]
    async fn page_limit_and_fetch_errors_stop_pagination() {
        let server = MockServer::start().await;
        mount(&server, 1, rows_page(&[("a", "甲", "法律")], 100)).await;

        let opts = DiscoveryOptions {
            max_pages: Some(1),
            ..DiscoveryOptions::default()
        };
        let report = discover_with(&catalog_for(&server), KnownIdentifiers::default(), &opts)
            .await
            .unwrap();
        assert_eq!(report.stop_reason, StopReason::PageLimit);

        let report = discover_with(
            &catalog_for(&server),
            KnownIdentifiers::default(),
            &DiscoveryOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(report.stop_reason, StopReason::FetchError, "page 2 is not mocked");
        assert_eq!(report.new_count(), 1);
    }
}
