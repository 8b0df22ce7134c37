//! Source document downloader.
//!
//! Each record's opaque id is resolved to a file URL, the target directory is
//! chosen through the classifier's write chain, and the body is streamed into
//! a dot-prefixed temporary file that is renamed into place only once
//! complete. Successful ids are flipped to `fetched = 1` in one batch.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use percent_encoding::percent_decode_str;
use reqwest::Method;
use tempfile::NamedTempFile;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

use lawledger_crawler::{CatalogClient, RequestOptions};
use lawledger_shared::{
    Category, DocumentRecord, LawLedgerError, Result, allocate_workers, candidate_stems,
    per_worker_delay,
};
use lawledger_storage::Ledger;

use crate::layout::{first_writable, is_nonempty_file, safe_join, write_chain};
use crate::pipeline::ProgressReporter;

/// Extension the service reports when it has no file for a document.
pub const NO_SOURCE_EXTENSION: &str = "cnnone";
const DEFAULT_EXTENSION: &str = "docx";

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded { path: PathBuf, bytes: u64 },
    /// A non-empty file already existed under one of the candidate names.
    AlreadyPresent(PathBuf),
    /// The service has no file for this document; counts as processed.
    NoSource,
    /// The resolve call returned no URL.
    Unresolved,
    Failed(String),
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Downloaded { .. } | Self::AlreadyPresent(_) | Self::NoSource
        )
    }
}

/// Summary of one batch.
#[derive(Debug, Default, Clone)]
pub struct DownloadReport {
    pub attempted: usize,
    /// Ids flipped to `fetched = 1`.
    pub succeeded: Vec<String>,
    pub downloaded: usize,
    pub already_present: usize,
    pub no_source: usize,
    pub unresolved: usize,
    pub failed: usize,
}

impl DownloadReport {
    fn record(&mut self, id: String, outcome: &DownloadOutcome) {
        match outcome {
            DownloadOutcome::Downloaded { .. } => self.downloaded += 1,
            DownloadOutcome::AlreadyPresent(_) => self.already_present += 1,
            DownloadOutcome::NoSource => self.no_source += 1,
            DownloadOutcome::Unresolved => self.unresolved += 1,
            DownloadOutcome::Failed(_) => self.failed += 1,
        }
        if outcome.is_success() {
            self.succeeded.push(id);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Percent-encoded ids carry a base64 payload; anything that fails to
/// decode is used as-is.
pub fn decode_source_id(id: &str) -> String {
    if !id.contains('%') {
        return id.to_string();
    }
    percent_decode_str(id)
        .decode_utf8()
        .ok()
        .and_then(|unquoted| STANDARD.decode(unquoted.as_bytes()).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| id.to_string())
}

/// Lowercased extension of the URL path, defaulting to `docx`.
pub fn extension_from_url(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or("").to_string());
    Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

// ---------------------------------------------------------------------------
// Downloader
// ---------------------------------------------------------------------------

/// Bounded-concurrency document downloader.
#[derive(Clone)]
pub struct Downloader {
    catalog: Arc<CatalogClient>,
    root: PathBuf,
    max_workers: usize,
    request_delay: Duration,
}

impl Downloader {
    pub fn new(catalog: Arc<CatalogClient>, root: impl Into<PathBuf>, max_workers: usize) -> Self {
        let request_delay = catalog.throttle().request_delay();
        Self {
            catalog,
            root: root.into(),
            max_workers,
            request_delay,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Download every record and mark the successes fetched.
    #[instrument(skip_all, fields(category = %category, count = records.len()))]
    pub async fn download_batch(
        &self,
        category: Category,
        records: Vec<DocumentRecord>,
        ledger: &Ledger,
        progress: &dyn ProgressReporter,
    ) -> Result<DownloadReport> {
        let mut report = DownloadReport {
            attempted: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            info!("no pending downloads");
            return Ok(report);
        }

        let start = Instant::now();
        let total = records.len();
        let workers = allocate_workers(total, self.max_workers);
        let delay = per_worker_delay(self.request_delay, workers);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        progress.items_started("download", total);
        for record in records {
            let this = self.clone();
            let sem = semaphore.clone();
            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let outcome = this.download_one(category, &record, delay).await;
                (record.id, outcome)
            });
        }

        let mut done = 0;
        while let Some(joined) = tasks.join_next().await {
            done += 1;
            match joined {
                Ok((id, outcome)) => {
                    progress.item_finished("download", done, total, outcome.is_success());
                    report.record(id, &outcome);
                }
                Err(e) => {
                    warn!(error = %e, "download task panicked");
                    report.failed += 1;
                }
            }
        }

        ledger.mark_fetched(category, &report.succeeded).await?;
        info!(
            succeeded = report.succeeded.len(),
            downloaded = report.downloaded,
            already_present = report.already_present,
            no_source = report.no_source,
            unresolved = report.unresolved,
            failed = report.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "download batch completed"
        );
        Ok(report)
    }

    /// Resolve, place and stream one record. Never returns an error; failures
    /// are reported as [`DownloadOutcome::Failed`].
    #[instrument(skip_all, fields(id = %record.id))]
    pub async fn download_one(
        &self,
        category: Category,
        record: &DocumentRecord,
        delay: Duration,
    ) -> DownloadOutcome {
        let source_id = decode_source_id(&record.id);
        let url = match self.catalog.resolve_download(&source_id).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                warn!(title = %record.title, "no download URL");
                return DownloadOutcome::Unresolved;
            }
            Err(e) => {
                warn!(title = %record.title, error = %e, "resolve failed");
                return DownloadOutcome::Failed(e.to_string());
            }
        };

        let ext = extension_from_url(&url);
        if ext == NO_SOURCE_EXTENSION {
            info!(title = %record.title, "service has no source file");
            return DownloadOutcome::NoSource;
        }

        let outcome = match self.fetch_to_disk(category, record, &url, &ext).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(title = %record.title, error = %e, "download failed");
                DownloadOutcome::Failed(e.to_string())
            }
        };
        if matches!(outcome, DownloadOutcome::Downloaded { .. }) && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        outcome
    }

    async fn fetch_to_disk(
        &self,
        category: Category,
        record: &DocumentRecord,
        url: &str,
        ext: &str,
    ) -> Result<DownloadOutcome> {
        let dir = first_writable(&write_chain(&self.root, category, record))?;
        let targets = candidate_stems(&record.title, &record.id)
            .iter()
            .map(|stem| safe_join(&dir, &format!("{stem}.{ext}")))
            .collect::<Result<Vec<_>>>()?;

        if let Some(existing) = targets.iter().find(|p| is_nonempty_file(p)) {
            debug!(path = %existing.display(), "already downloaded");
            return Ok(DownloadOutcome::AlreadyPresent(existing.clone()));
        }

        let mut response = self
            .catalog
            .session()
            .request(Method::GET, url, &RequestOptions::default())
            .await?;
        if !response.status().is_success() {
            return Err(LawLedgerError::Http {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mut tmp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| LawLedgerError::io(&dir, e))?;
        let mut bytes = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| LawLedgerError::Network(format!("body stream failed: {e}")))?
        {
            tmp.write_all(&chunk)
                .map_err(|e| LawLedgerError::io(tmp.path(), e))?;
            bytes += chunk.len() as u64;
        }
        if bytes == 0 {
            return Err(LawLedgerError::validation(format!("empty body from {url}")));
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| LawLedgerError::io(tmp.path(), e))?;

        let path = persist_first(tmp, &targets)?;
        info!(path = %path.display(), bytes, "downloaded");
        Ok(DownloadOutcome::Downloaded { path, bytes })
    }
}

/// Rename `tmp` onto the first target that accepts it. The temporary file is
/// removed when every target fails.
pub(crate) fn persist_first(mut tmp: NamedTempFile, targets: &[PathBuf]) -> Result<PathBuf> {
    let mut last_error = None;
    for target in targets {
        match tmp.persist(target) {
            Ok(_) => return Ok(target.clone()),
            Err(e) => {
                warn!(path = %target.display(), error = %e.error, "rename failed");
                last_error = Some(LawLedgerError::io(target, e.error));
                tmp = e.file;
            }
        }
    }
    Err(last_error.unwrap_or_else(|| LawLedgerError::validation("no target file names")))
}
