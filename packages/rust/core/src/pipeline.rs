//! Workflow orchestration: crawl, download, parse, the full incremental
//! workflow and the maintenance operations behind the CLI.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use lawledger_crawler::{CatalogClient, CrawlReport, MetadataCrawler, SessionManager};
use lawledger_discovery::{DiscoveryOptions, StopReason, discover};
use lawledger_shared::{AppConfig, Category, DocumentRecord, Result};
use lawledger_storage::{Ledger, LedgerCounts, RecordFilter};

use crate::download::{DownloadReport, Downloader};
use crate::reconcile::{Reconciler, ReorganizeReport, ResetMode, SyncReport};
use crate::transform::{TransformReport, Transformer};

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Progress callback for long-running stages.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a pool starts working through `total` items.
    fn items_started(&self, stage: &str, total: usize);
    /// Called as each item of a pool completes, in completion order.
    fn item_finished(&self, stage: &str, current: usize, total: usize, ok: bool);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn items_started(&self, _stage: &str, _total: usize) {}
    fn item_finished(&self, _stage: &str, _current: usize, _total: usize, _ok: bool) {}
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Success/failure counts of one stage, summed across categories.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StageTotals {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl StageTotals {
    fn add(&mut self, attempted: usize, succeeded: usize) {
        self.attempted += attempted;
        self.succeeded += succeeded;
        self.failed += attempted.saturating_sub(succeeded);
    }

    fn add_download(&mut self, report: &DownloadReport) {
        self.add(report.attempted, report.succeeded.len());
    }

    fn add_transform(&mut self, report: &TransformReport) {
        self.add(report.attempted, report.succeeded.len());
    }
}

/// Result of [`Pipeline::full_workflow`].
#[derive(Debug, Default)]
pub struct WorkflowReport {
    pub discovered: usize,
    pub inserted: usize,
    pub stop_reason: Option<StopReason>,
    pub downloads: StageTotals,
    pub transforms: StageTotals,
    pub reorganized: ReorganizeReport,
    /// Categories whose batch aborted, with the error.
    pub category_errors: Vec<(Category, String)>,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Everything one run needs: config, ledger, catalog client.
#[derive(Clone)]
pub struct Pipeline {
    config: AppConfig,
    root: PathBuf,
    ledger: Arc<Ledger>,
    catalog: Arc<CatalogClient>,
}

impl Pipeline {
    /// Open the ledger (creating the schema) and build the session.
    ///
    /// A ledger failure here is fatal to the caller.
    pub async fn connect(config: AppConfig) -> Result<Self> {
        let ledger = Ledger::open(&config.storage.database).await?;
        let session = SessionManager::from_config(&config)?;
        let catalog = CatalogClient::new(Arc::new(session), &config);
        Ok(Self::new(config, Arc::new(ledger), Arc::new(catalog)))
    }

    pub fn new(config: AppConfig, ledger: Arc<Ledger>, catalog: Arc<CatalogClient>) -> Self {
        let root = config.storage.root_dir.clone();
        Self {
            config,
            root,
            ledger,
            catalog,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn downloader(&self) -> Downloader {
        Downloader::new(self.catalog.clone(), &self.root, self.config.workers.download)
    }

    fn transformer(&self) -> Transformer {
        Transformer::new(&self.root, self.config.workers.parse)
    }

    fn reconciler(&self) -> Reconciler {
        Reconciler::new(&self.root, self.ledger.clone(), self.config.workers.categories)
    }

    // -----------------------------------------------------------------------
    // Crawl
    // -----------------------------------------------------------------------

    /// Crawl one category, or every top-level category two at a time.
    ///
    /// A failed category is logged and left out of the returned reports.
    #[instrument(skip_all, fields(category = ?category))]
    pub async fn crawl(
        &self,
        category: Option<Category>,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<CrawlReport>> {
        let categories = category.map_or_else(|| Category::PRIMARY.to_vec(), |c| vec![c]);
        let crawler = Arc::new(MetadataCrawler::new(
            self.catalog.clone(),
            self.config.workers.crawl,
        ));
        let semaphore = Arc::new(Semaphore::new(self.config.workers.categories.max(1)));
        let mut tasks = JoinSet::new();

        progress.phase("Crawling catalog");
        progress.items_started("crawl", categories.len());
        for category in categories.iter().copied() {
            let crawler = crawler.clone();
            let ledger = self.ledger.clone();
            let sem = semaphore.clone();
            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                (category, crawler.crawl_category(category, &ledger).await)
            });
        }

        let total = categories.len();
        let mut reports = Vec::with_capacity(total);
        let mut done = 0;
        while let Some(joined) = tasks.join_next().await {
            done += 1;
            match joined {
                Ok((_, Ok(report))) => {
                    progress.item_finished("crawl", done, total, true);
                    reports.push(report);
                }
                Ok((category, Err(e))) => {
                    progress.item_finished("crawl", done, total, false);
                    error!(%category, error = %e, "category crawl failed");
                }
                Err(e) => warn!(error = %e, "crawl task panicked"),
            }
        }
        reports.sort_by_key(|r| r.category);

        info!(
            categories = total,
            succeeded = reports.len(),
            items = reports.iter().map(|r| r.items_written).sum::<usize>(),
            "crawl completed"
        );
        Ok(reports)
    }

    // -----------------------------------------------------------------------
    // Download / parse
    // -----------------------------------------------------------------------

    /// Download every pending row, optionally transforming afterwards.
    #[instrument(skip_all, fields(category = ?category, transform = transform))]
    pub async fn download(
        &self,
        category: Option<Category>,
        transform: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<(StageTotals, StageTotals)> {
        let mut downloads = StageTotals::default();
        let mut errors = Vec::new();
        progress.phase("Downloading documents");
        for category in ledger_categories(category) {
            let pending = self
                .ledger
                .records(category, RecordFilter::PendingDownload, None)
                .await?;
            if let Some(report) = self
                .download_records(category, pending, progress, &mut errors)
                .await
            {
                downloads.add_download(&report);
            }
        }
        let transforms = if transform {
            self.transform_pending(ledger_categories(category), progress, &mut errors)
                .await?
        } else {
            StageTotals::default()
        };
        log_category_errors(&errors);
        Ok((downloads, transforms))
    }

    /// Transform every downloaded but untransformed row.
    #[instrument(skip_all, fields(category = ?category))]
    pub async fn parse(
        &self,
        category: Option<Category>,
        progress: &dyn ProgressReporter,
    ) -> Result<StageTotals> {
        let mut errors = Vec::new();
        progress.phase("Converting documents");
        let totals = self
            .transform_pending(ledger_categories(category), progress, &mut errors)
            .await?;
        log_category_errors(&errors);
        Ok(totals)
    }

    async fn download_records(
        &self,
        category: Category,
        records: Vec<DocumentRecord>,
        progress: &dyn ProgressReporter,
        errors: &mut Vec<(Category, String)>,
    ) -> Option<DownloadReport> {
        if records.is_empty() {
            return None;
        }
        match self
            .downloader()
            .download_batch(category, records, &self.ledger, progress)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                errors.push((category, e.to_string()));
                None
            }
        }
    }

    async fn transform_records(
        &self,
        category: Category,
        records: Vec<DocumentRecord>,
        progress: &dyn ProgressReporter,
        errors: &mut Vec<(Category, String)>,
    ) -> Option<TransformReport> {
        if records.is_empty() {
            return None;
        }
        match self
            .transformer()
            .transform_batch(category, records, &self.ledger, progress)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                errors.push((category, e.to_string()));
                None
            }
        }
    }

    async fn transform_pending(
        &self,
        categories: Vec<Category>,
        progress: &dyn ProgressReporter,
        errors: &mut Vec<(Category, String)>,
    ) -> Result<StageTotals> {
        let mut totals = StageTotals::default();
        for category in categories {
            let pending = self
                .ledger
                .records(category, RecordFilter::PendingTransform, None)
                .await?;
            if let Some(report) = self
                .transform_records(category, pending, progress, errors)
                .await
            {
                totals.add_transform(&report);
            }
        }
        Ok(totals)
    }

    // -----------------------------------------------------------------------
    // Full workflow
    // -----------------------------------------------------------------------

    /// Discover new catalog items and carry them through to markdown, then
    /// work off a bounded slice of the existing backlog and reorganize.
    ///
    /// All discovered items are inserted; only the selected categories are
    /// downloaded and transformed.
    #[instrument(skip_all, fields(category = ?category))]
    pub async fn full_workflow(
        &self,
        category: Option<Category>,
        progress: &dyn ProgressReporter,
    ) -> Result<WorkflowReport> {
        let start = Instant::now();
        let selected: HashSet<Category> = ledger_categories(category).into_iter().collect();
        let mut report = WorkflowReport::default();
        let mut errors = Vec::new();

        progress.phase("Discovering new documents");
        let options = DiscoveryOptions::from(&self.config.discovery);
        let discovery = discover(&self.catalog, &self.ledger, &options).await?;
        report.discovered = discovery.new_count();
        report.stop_reason = Some(discovery.stop_reason);

        progress.phase("Processing new documents");
        for (category, items) in discovery.new_items {
            match self.ledger.upsert_records(category, &items).await {
                Ok(n) => report.inserted += n,
                Err(e) => {
                    errors.push((category, e.to_string()));
                    continue;
                }
            }
            if !selected.contains(&category) {
                continue;
            }
            let Some(downloaded) = self
                .download_records(category, items.clone(), progress, &mut errors)
                .await
            else {
                continue;
            };
            report.downloads.add_download(&downloaded);

            let fetched: HashSet<&str> = downloaded.succeeded.iter().map(String::as_str).collect();
            let ready: Vec<DocumentRecord> = items
                .into_iter()
                .filter(|item| fetched.contains(item.id.as_str()))
                .collect();
            if let Some(transformed) = self
                .transform_records(category, ready, progress, &mut errors)
                .await
            {
                report.transforms.add_transform(&transformed);
            }
        }

        progress.phase("Downloading backlog");
        let limit = self.config.workflow.existing_batch_limit;
        for category in ledger_categories(category) {
            let pending = self
                .ledger
                .records(category, RecordFilter::PendingDownload, Some(limit))
                .await?;
            if let Some(downloaded) = self
                .download_records(category, pending, progress, &mut errors)
                .await
            {
                report.downloads.add_download(&downloaded);
            }
        }

        progress.phase("Converting backlog");
        let transforms = self
            .transform_pending(ledger_categories(category), progress, &mut errors)
            .await?;
        report.transforms.attempted += transforms.attempted;
        report.transforms.succeeded += transforms.succeeded;
        report.transforms.failed += transforms.failed;

        progress.phase("Reorganizing files");
        report.reorganized = self.reorganize(category).await?;

        log_category_errors(&errors);
        report.category_errors = errors;
        report.elapsed = start.elapsed();
        info!(
            discovered = report.discovered,
            inserted = report.inserted,
            downloaded = report.downloads.succeeded,
            download_failures = report.downloads.failed,
            transformed = report.transforms.succeeded,
            transform_failures = report.transforms.failed,
            moved = report.reorganized.moved,
            category_errors = report.category_errors.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "workflow completed"
        );
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Repair both flags of every titled row from the filesystem.
    pub async fn sync(&self, category: Option<Category>) -> Result<SyncReport> {
        self.reconciler().sync(&ledger_categories(category)).await
    }

    /// Move misfiled documents into their classified directories.
    pub async fn reorganize(&self, category: Option<Category>) -> Result<ReorganizeReport> {
        let categories = match category {
            Some(c) => vec![folder_category(c)],
            None => Category::PRIMARY.to_vec(),
        };
        self.reconciler().reorganize(&categories).await
    }

    /// Clear progress flags.
    pub async fn reset(
        &self,
        mode: ResetMode,
        category: Option<Category>,
        keep_transformed: bool,
    ) -> Result<u64> {
        self.reconciler()
            .reset(&ledger_categories(category), mode, keep_transformed)
            .await
    }

    /// Drop cached session cookies and run a fresh handshake.
    pub async fn refresh_cookies(&self) -> usize {
        let cookies = self.catalog.session().cookies().refresh().await;
        info!(cookies = cookies.len(), "session cookies refreshed");
        cookies.len()
    }

    /// Per-category counts.
    pub async fn status(&self) -> Result<Vec<(Category, LedgerCounts)>> {
        let mut counts = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            counts.push((category, self.ledger.counts(category).await?));
        }
        Ok(counts)
    }
}

/// Every ledger table, or just the requested one.
fn ledger_categories(category: Option<Category>) -> Vec<Category> {
    category.map_or_else(|| Category::ALL.to_vec(), |c| vec![c])
}

/// Top-level category whose folder holds `category`'s documents.
fn folder_category(category: Category) -> Category {
    match category {
        Category::LawStatute => Category::Law,
        other => other.parent().unwrap_or(other),
    }
}

fn log_category_errors(errors: &[(Category, String)]) {
    for (category, message) in errors {
        error!(%category, error = %message, "category batch aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{test_config, test_ledger};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const HTML: &str = include_str!("../../markdown/fixtures/law.html");

    async fn pipeline_for(server: &MockServer, root: &Path) -> Pipeline {
        let mut config = test_config(server);
        config.storage.root_dir = root.to_path_buf();
        let session = SessionManager::new(
            &config.remote.base_url,
            &config.http,
            lawledger_crawler::CookieCache::disabled(),
        )
        .unwrap();
        let catalog = CatalogClient::new(Arc::new(session), &config);
        Pipeline::new(config, Arc::new(test_ledger().await), Arc::new(catalog))
    }

    #[tokio::test]
    async fn full_workflow_carries_new_items_to_markdown() {
        let server = MockServer::start().await;
        let page = json!({
            "rows": [{"bbbs": "w1", "title": "中华人民共和国测试法", "flxz": "法律"}],
            "total": 1
        });
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"pageNum": 1, "searchRange": 0})))
            .respond_with(ResponseTemplate::new(200).set_body_string(page.to_string()))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/law-search/download/pc"))
            .and(query_param("bbbs", "w1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 200, "msg": "Success",
                "data": {"url": format!("{}/files/w1.html", server.uri())}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/w1.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HTML))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(&server, tmp.path()).await;

        let report = pipeline.full_workflow(None, &SilentProgress).await.unwrap();
        assert_eq!(report.discovered, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.downloads.succeeded, 1);
        assert_eq!(report.transforms.succeeded, 1);
        assert!(report.category_errors.is_empty());

        let law_dir = tmp.path().join("法律");
        assert!(law_dir.join("中华人民共和国测试法.html").exists());
        let markdown = std::fs::read_to_string(law_dir.join("中华人民共和国测试法.md")).unwrap();
        assert!(markdown.contains("<!-- INFO END -->"));

        let row = pipeline
            .ledger()
            .get_record(Category::LawStatute, "w1")
            .await
            .unwrap()
            .unwrap();
        assert!(row.fetched && row.transformed);

        // Nothing new the second time round.
        let again = pipeline.full_workflow(None, &SilentProgress).await.unwrap();
        assert_eq!(again.discovered, 0);
        assert_eq!(again.downloads.attempted, 0);
    }

    #[tokio::test]
    async fn crawl_single_category_writes_rows() {
        let server = MockServer::start().await;
        let body = json!({"result": {"totalSizes": 2, "data": [
            {"id": "c1", "title": "宪法", "type": "宪法", "flfgCodeId": 100},
            {"id": "c2", "title": "宪法修正案", "type": "宪法", "flfgCodeId": 100}
        ]}});
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"searchRange": 1, "flfgCodeId": [100]})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(&server, tmp.path()).await;
        let reports = pipeline
            .crawl(Some(Category::Constitution), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].items_written, 2);

        let status = pipeline.status().await.unwrap();
        let (_, counts) = status
            .iter()
            .find(|(c, _)| *c == Category::Constitution)
            .unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.fetched, 0);
    }

    #[tokio::test]
    async fn failed_category_crawl_is_contained() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = tempfile::tempdir().unwrap();
        let pipeline = pipeline_for(&server, tmp.path()).await;
        let reports = pipeline
            .crawl(Some(Category::Constitution), &SilentProgress)
            .await
            .unwrap();
        assert!(reports.is_empty());
    }

    #[test]
    fn law_subcategories_reorganize_under_law() {
        assert_eq!(folder_category(Category::LawStatute), Category::Law);
        assert_eq!(folder_category(Category::LawDecision), Category::Law);
        assert_eq!(
            folder_category(Category::LocalRegulation),
            Category::LocalRegulation
        );
    }
}
