//! Transform stage: downloaded source file → markdown next to it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use lawledger_markdown::{DocumentKind, convert, parse};
use lawledger_shared::{
    Category, DocumentRecord, LawLedgerError, Result, allocate_workers, candidate_stems,
    sanitize_component,
};
use lawledger_storage::Ledger;

use crate::download::persist_first;
use crate::layout::{find_source, safe_join};
use crate::pipeline::ProgressReporter;

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    Written(PathBuf),
    /// An identical markdown file already existed.
    Unchanged(PathBuf),
    MissingSource,
    /// The parser produced nothing to format.
    Empty,
    Failed(String),
}

impl TransformOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Written(_) | Self::Unchanged(_))
    }
}

#[derive(Debug, Default, Clone)]
pub struct TransformReport {
    pub attempted: usize,
    pub succeeded: Vec<String>,
    pub written: usize,
    pub unchanged: usize,
    pub missing_source: usize,
    pub empty: usize,
    pub failed: usize,
}

impl TransformReport {
    fn record(&mut self, id: String, outcome: &TransformOutcome) {
        match outcome {
            TransformOutcome::Written(_) => self.written += 1,
            TransformOutcome::Unchanged(_) => self.unchanged += 1,
            TransformOutcome::MissingSource => self.missing_source += 1,
            TransformOutcome::Empty => self.empty += 1,
            TransformOutcome::Failed(_) => self.failed += 1,
        }
        if outcome.is_success() {
            self.succeeded.push(id);
        }
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Output names in preference order: title, id, content hash.
fn output_names(record: &DocumentRecord, markdown: &str) -> Vec<String> {
    let mut names: Vec<String> = candidate_stems(&record.title, "")
        .into_iter()
        .take(1)
        .collect();
    let id = sanitize_component(&record.id);
    if !id.is_empty() {
        names.push(id);
    }
    names.push(sha256_hex(markdown.as_bytes()));
    names.dedup();
    names.into_iter().map(|stem| format!("{stem}.md")).collect()
}

/// Write `markdown` into `dir`, reusing a byte-identical existing file.
pub(crate) fn write_markdown(
    dir: &Path,
    record: &DocumentRecord,
    markdown: &str,
) -> Result<TransformOutcome> {
    let targets = output_names(record, markdown)
        .iter()
        .map(|name| safe_join(dir, name))
        .collect::<Result<Vec<_>>>()?;

    let digest = sha256_hex(markdown.as_bytes());
    if let Some(same) = targets.iter().find(|path| {
        std::fs::read(path).is_ok_and(|existing| sha256_hex(&existing) == digest)
    }) {
        return Ok(TransformOutcome::Unchanged(same.clone()));
    }

    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| LawLedgerError::io(dir, e))?;
    tmp.write_all(markdown.as_bytes())
        .map_err(|e| LawLedgerError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| LawLedgerError::io(tmp.path(), e))?;
    persist_first(tmp, &targets).map(TransformOutcome::Written)
}

/// Parse and format one source file. Runs on the blocking pool.
fn transform_file(source: &Path, record: &DocumentRecord) -> Result<TransformOutcome> {
    let Some(kind) = DocumentKind::from_path(source) else {
        return Err(LawLedgerError::validation(format!(
            "no parser for {}",
            source.display()
        )));
    };
    let extracted = parse(kind, source, &record.title);
    let Some(markdown) = convert(&extracted) else {
        return Ok(TransformOutcome::Empty);
    };
    let dir = source
        .parent()
        .ok_or_else(|| LawLedgerError::validation("source file has no parent directory"))?;
    write_markdown(dir, record, &markdown)
}

/// Bounded-concurrency transformer over one category.
#[derive(Clone)]
pub struct Transformer {
    root: PathBuf,
    max_workers: usize,
}

impl Transformer {
    pub fn new(root: impl Into<PathBuf>, max_workers: usize) -> Self {
        Self {
            root: root.into(),
            max_workers,
        }
    }

    /// Transform one record whose source was already downloaded.
    pub async fn transform_one(&self, category: Category, record: DocumentRecord) -> TransformOutcome {
        let Some(source) = find_source(&self.root, category, &record) else {
            debug!(id = %record.id, title = %record.title, "source file not found");
            return TransformOutcome::MissingSource;
        };
        let id = record.id.clone();
        match tokio::task::spawn_blocking(move || transform_file(&source, &record)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(%id, error = %e, "transform failed");
                TransformOutcome::Failed(e.to_string())
            }
            Err(e) => {
                warn!(%id, error = %e, "transform task panicked");
                TransformOutcome::Failed(e.to_string())
            }
        }
    }

    /// Transform `records` and flip the successes to `transformed = 1`.
    #[instrument(skip_all, fields(category = %category, count = records.len()))]
    pub async fn transform_batch(
        &self,
        category: Category,
        records: Vec<DocumentRecord>,
        ledger: &Ledger,
        progress: &dyn ProgressReporter,
    ) -> Result<TransformReport> {
        let mut report = TransformReport {
            attempted: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            info!("no pending transforms");
            return Ok(report);
        }

        let start = Instant::now();
        let total = records.len();
        let semaphore = Arc::new(Semaphore::new(allocate_workers(total, self.max_workers)));
        let mut tasks = JoinSet::new();

        progress.items_started("parse", total);
        for record in records {
            let this = self.clone();
            let sem = semaphore.clone();
            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                let id = record.id.clone();
                (id, this.transform_one(category, record).await)
            });
        }

        let mut done = 0;
        while let Some(joined) = tasks.join_next().await {
            done += 1;
            match joined {
                Ok((id, outcome)) => {
                    progress.item_finished("parse", done, total, outcome.is_success());
                    report.record(id, &outcome);
                }
                Err(e) => {
                    warn!(error = %e, "transform task panicked");
                    report.failed += 1;
                }
            }
        }

        ledger.mark_transformed(category, &report.succeeded).await?;
        info!(
            succeeded = report.succeeded.len(),
            written = report.written,
            unchanged = report.unchanged,
            missing_source = report.missing_source,
            empty = report.empty,
            failed = report.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "transform batch completed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use crate::test_support::test_ledger;
    use lawledger_storage::RecordFilter;
    use std::fs;

    const HTML: &str = include_str!("../../markdown/fixtures/law.html");

    fn law(id: &str, title: &str) -> DocumentRecord {
        DocumentRecord {
            id: id.into(),
            title: title.into(),
            subtype: Some(160),
            ..Default::default()
        }
    }

    #[test]
    fn output_names_fall_back_to_id_and_hash() {
        let names = output_names(&law("abc", "中华人民共和国刑法"), "# x");
        assert_eq!(names.len(), 3);
        assert_eq!(names[0], "中华人民共和国刑法.md");
        assert_eq!(names[1], "abc.md");
        assert_eq!(names[2], format!("{}.md", sha256_hex(b"# x")));

        let names = output_names(&law("abc", "///"), "# x");
        assert_eq!(names[0], "abc.md");
    }

    #[test]
    fn identical_output_is_left_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let record = law("a1", "测试法");
        let first = write_markdown(tmp.path(), &record, "# 测试法").unwrap();
        let path = tmp.path().join("测试法.md");
        assert_eq!(first, TransformOutcome::Written(path.clone()));

        let second = write_markdown(tmp.path(), &record, "# 测试法").unwrap();
        assert_eq!(second, TransformOutcome::Unchanged(path.clone()));

        let third = write_markdown(tmp.path(), &record, "# 测试法 修订").unwrap();
        assert_eq!(third, TransformOutcome::Written(path.clone()));
        assert_eq!(fs::read_to_string(&path).unwrap(), "# 测试法 修订");

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn batch_converts_sources_and_marks_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let ledger = test_ledger().await;

        let ok = law("t1", "中华人民共和国测试法");
        let missing = law("t2", "不存在的法");
        ledger
            .upsert_records(Category::Law, &[ok.clone(), missing.clone()])
            .await
            .unwrap();
        ledger
            .mark_fetched(Category::Law, &["t1".into(), "t2".into()])
            .await
            .unwrap();

        let dir = root.join("法律").join("刑法");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("中华人民共和国测试法.html"), HTML).unwrap();

        let transformer = Transformer::new(root, 10);
        let pending = ledger
            .records(Category::Law, RecordFilter::PendingTransform, None)
            .await
            .unwrap();
        let report = transformer
            .transform_batch(Category::Law, pending, &ledger, &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.written, 1);
        assert_eq!(report.missing_source, 1);
        assert_eq!(report.succeeded, vec!["t1".to_string()]);

        let markdown = fs::read_to_string(dir.join("中华人民共和国测试法.md")).unwrap();
        assert!(markdown.starts_with("# 中华人民共和国测试法"));

        let row = ledger.get_record(Category::Law, "t1").await.unwrap().unwrap();
        assert!(row.fetched && row.transformed);
        let row = ledger.get_record(Category::Law, "t2").await.unwrap().unwrap();
        assert!(row.fetched && !row.transformed);
        assert_eq!(ledger.invariant_violations(Category::Law).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn corrupt_word_source_fails_soft() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("法律").join("刑法");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("坏文件.docx"), b"not a zip").unwrap();

        let transformer = Transformer::new(tmp.path(), 2);
        let outcome = transformer
            .transform_one(Category::Law, law("b1", "坏文件"))
            .await;
        assert_eq!(outcome, TransformOutcome::Empty);
        assert!(!dir.join("坏文件.md").exists());
    }
}
