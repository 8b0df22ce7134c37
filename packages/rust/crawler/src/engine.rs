//! Concurrent per-category metadata crawler.
//!
//! Page 1 is fetched first to learn the total item count; the remaining pages
//! are fetched on a bounded worker pool. Failed pages are logged and counted
//! without aborting the category. Everything fetched is upserted into the
//! ledger in one transaction.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use lawledger_shared::{Category, DocumentRecord, Result, allocate_workers, per_worker_delay};
use lawledger_storage::Ledger;

use crate::catalog::CatalogClient;
use crate::listing::{ListingScope, page_count};

// ---------------------------------------------------------------------------
// CrawlReport
// ---------------------------------------------------------------------------

/// Summary of one category crawl.
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub category: Category,
    /// Pages implied by the remote total.
    pub pages_total: u32,
    pub pages_fetched: u32,
    pub pages_failed: u32,
    /// Rows written to the ledger.
    pub items_written: usize,
    /// Failed pages with their error message.
    pub errors: Vec<(u32, String)>,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// MetadataCrawler
// ---------------------------------------------------------------------------

/// Walks the paginated listing of one category at a time.
pub struct MetadataCrawler {
    catalog: Arc<CatalogClient>,
    max_workers: usize,
    request_delay: Duration,
}

impl MetadataCrawler {
    pub fn new(catalog: Arc<CatalogClient>, max_workers: usize) -> Self {
        let request_delay = catalog.throttle().request_delay();
        Self {
            catalog,
            max_workers,
            request_delay,
        }
    }

    /// Crawl every page of `category` and upsert the rows into `ledger`.
    ///
    /// Only a page-1 failure or a ledger write failure is returned as an error.
    #[instrument(skip_all, fields(category = %category))]
    pub async fn crawl_category(&self, category: Category, ledger: &Ledger) -> Result<CrawlReport> {
        let start = Instant::now();
        let scope = ListingScope::Category(category);

        let first = self.catalog.fetch_listing(scope, 1).await?;
        let pages_total = page_count(first.total, self.catalog.page_size()).max(1);
        let mut items: Vec<DocumentRecord> = first.items;
        let mut pages_fetched = 1;
        let mut errors: Vec<(u32, String)> = Vec::new();

        info!(total = first.total, pages_total, "starting category crawl");

        let remaining: Vec<u32> = (2..=pages_total).collect();
        if !remaining.is_empty() {
            let workers = allocate_workers(remaining.len(), self.max_workers);
            let delay = per_worker_delay(self.request_delay, workers);
            let semaphore = Arc::new(Semaphore::new(workers));
            let mut tasks = JoinSet::new();

            for page in remaining {
                let catalog = self.catalog.clone();
                let sem = semaphore.clone();
                tasks.spawn(async move {
                    let _permit = sem.acquire_owned().await.ok();
                    let result = catalog.fetch_listing(scope, page).await;
                    if result.is_ok() && !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    (page, result)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((_, Ok(listing))) => {
                        pages_fetched += 1;
                        items.extend(listing.items);
                    }
                    Ok((page, Err(e))) => {
                        warn!(page, error = %e, "listing page failed");
                        errors.push((page, e.to_string()));
                    }
                    Err(e) => {
                        warn!(error = %e, "listing task panicked");
                        errors.push((0, e.to_string()));
                    }
                }
            }
        }

        items.retain(|item| !item.id.is_empty());
        let items_written = ledger.upsert_records(category, &items).await?;
        let report = CrawlReport {
            category,
            pages_total,
            pages_fetched,
            pages_failed: errors.len() as u32,
            items_written,
            errors,
            duration: start.elapsed(),
        };

        info!(
            pages_fetched = report.pages_fetched,
            pages_failed = report.pages_failed,
            items_written = report.items_written,
            duration_ms = report.duration.as_millis() as u64,
            "category crawl completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{catalog_for, listing_body, test_ledger};
    use lawledger_storage::RecordFilter;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn mount_page(server: &MockServer, page: u32, ids: &[&str], total: u64, status: u16) {
        Mock::given(method("POST"))
            .and(path("/law-search/search/list"))
            .and(body_partial_json(serde_json::json!({"pageNum": page})))
            .respond_with(ResponseTemplate::new(status).set_body_string(listing_body(ids, total)))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn twenty_five_items_take_three_pages() {
        let server = MockServer::start().await;
        mount_page(&server, 1, &["a1", "a2"], 25, 200).await;
        mount_page(&server, 2, &["b1"], 25, 200).await;
        mount_page(&server, 3, &["c1"], 25, 200).await;

        let (catalog, _) = catalog_for(&server);
        let ledger = test_ledger().await;
        let crawler = MetadataCrawler::new(Arc::new(catalog), 8);

        let report = crawler.crawl_category(Category::Law, &ledger).await.unwrap();
        assert_eq!(report.pages_total, 3);
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.items_written, 4);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3, "page 1 plus exactly two more fetches");

        let rows = ledger.records(Category::Law, RecordFilter::All, None).await.unwrap();
        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn failed_page_does_not_abort_category() {
        let server = MockServer::start().await;
        mount_page(&server, 1, &["a1"], 30, 200).await;
        mount_page(&server, 2, &["b1"], 30, 200).await;
        mount_page(&server, 3, &[], 30, 404).await;

        let (catalog, _) = catalog_for(&server);
        let ledger = test_ledger().await;
        let crawler = MetadataCrawler::new(Arc::new(catalog), 8);

        let report = crawler.crawl_category(Category::Law, &ledger).await.unwrap();
        assert_eq!(report.pages_fetched, 2);
        assert_eq!(report.pages_failed, 1);
        assert_eq!(report.errors[0].0, 3);
        assert_eq!(report.items_written, 2);
    }

    #[tokio::test]
    async fn page_one_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (catalog, _) = catalog_for(&server);
        let ledger = test_ledger().await;
        let crawler = MetadataCrawler::new(Arc::new(catalog), 8);
        assert!(crawler.crawl_category(Category::Law, &ledger).await.is_err());
    }
}
