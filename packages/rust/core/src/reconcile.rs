//! Ledger ↔ filesystem maintenance: sync, reorganize and reset.
//!
//! Each pass runs per category; categories are processed on a small
//! bounded pool.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use lawledger_shared::{Category, DocumentRecord, LawLedgerError, Result, candidate_stems};
use lawledger_storage::{Ledger, RecordFilter};

use crate::classify::classify;
use crate::layout::{find_output, find_source, is_hidden};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub checked: usize,
    pub present: usize,
    /// Rows whose flags were changed.
    pub corrected: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReorganizeReport {
    pub scanned: usize,
    pub moved: usize,
    /// Files left where they were: no ledger title matched, already in the
    /// classified directory, or the destination was taken.
    pub skipped: usize,
    /// The part of `skipped` with no matching ledger title.
    pub unmatched: usize,
    pub failed: usize,
}

impl ReorganizeReport {
    fn skip_unmatched(&mut self) {
        self.unmatched += 1;
        self.skipped += 1;
    }
}

/// Which rows a reset touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Only fetched rows whose source file is gone.
    Missing,
    /// Every fetched row.
    All,
}

impl std::str::FromStr for ResetMode {
    type Err = LawLedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "missing" => Ok(ResetMode::Missing),
            "all" => Ok(ResetMode::All),
            other => Err(LawLedgerError::validation(format!(
                "unknown reset mode {other:?} (expected missing or all)"
            ))),
        }
    }
}

impl std::ops::AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.checked += other.checked;
        self.present += other.present;
        self.corrected += other.corrected;
    }
}

impl std::ops::AddAssign for ReorganizeReport {
    fn add_assign(&mut self, other: Self) {
        self.scanned += other.scanned;
        self.moved += other.moved;
        self.unmatched += other.unmatched;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Maintenance passes over one document root.
#[derive(Clone)]
pub struct Reconciler {
    root: PathBuf,
    ledger: Arc<Ledger>,
    category_workers: usize,
}

impl Reconciler {
    pub fn new(root: impl Into<PathBuf>, ledger: Arc<Ledger>, category_workers: usize) -> Self {
        Self {
            root: root.into(),
            ledger,
            category_workers: category_workers.max(1),
        }
    }

    /// Set both flags of every titled row to whether its markdown exists.
    #[instrument(skip_all, fields(category = %category))]
    pub async fn sync_category(&self, category: Category) -> Result<SyncReport> {
        let records = self
            .ledger
            .records(category, RecordFilter::Titled, None)
            .await?;
        let root = self.root.clone();
        let observations = tokio::task::spawn_blocking(move || {
            records
                .iter()
                .map(|r| (r.id.clone(), find_output(&root, category, r).is_some()))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| LawLedgerError::Storage(format!("sync scan task failed: {e}")))?;

        let report = SyncReport {
            checked: observations.len(),
            present: observations.iter().filter(|(_, present)| *present).count(),
            corrected: self.ledger.apply_presence(category, &observations).await?,
        };
        info!(
            checked = report.checked,
            present = report.present,
            corrected = report.corrected,
            "sync completed"
        );
        Ok(report)
    }

    /// Move files lying directly in a category folder into their classified
    /// directory.
    #[instrument(skip_all, fields(category = %category))]
    pub async fn reorganize_category(&self, category: Category) -> Result<ReorganizeReport> {
        let mut index: HashMap<String, (Category, DocumentRecord)> = HashMap::new();
        for member in reorganize_members(category) {
            for record in self
                .ledger
                .records(member, RecordFilter::Titled, None)
                .await?
            {
                for stem in candidate_stems(&record.title, &record.id) {
                    index.entry(stem).or_insert_with(|| (member, record.clone()));
                }
            }
        }

        let root = self.root.clone();
        let report = tokio::task::spawn_blocking(move || relocate(&root, category, &index))
            .await
            .map_err(|e| LawLedgerError::Storage(format!("reorganize task failed: {e}")))??;
        info!(
            scanned = report.scanned,
            moved = report.moved,
            unmatched = report.unmatched,
            skipped = report.skipped,
            failed = report.failed,
            "reorganize completed"
        );
        Ok(report)
    }

    /// Clear progress flags. Returns the number of rows changed.
    #[instrument(skip_all, fields(category = %category, ?mode, keep_transformed = keep_transformed))]
    pub async fn reset_category(
        &self,
        category: Category,
        mode: ResetMode,
        keep_transformed: bool,
    ) -> Result<u64> {
        let changed = match mode {
            ResetMode::All => {
                self.ledger
                    .reset_flags(category, None, keep_transformed)
                    .await?
            }
            ResetMode::Missing => {
                let records = self
                    .ledger
                    .records(category, RecordFilter::Fetched, None)
                    .await?;
                let root = self.root.clone();
                let missing: Vec<String> = tokio::task::spawn_blocking(move || {
                    records
                        .into_iter()
                        .filter(|r| find_source(&root, category, r).is_none())
                        .map(|r| r.id)
                        .collect()
                })
                .await
                .map_err(|e| LawLedgerError::Storage(format!("reset scan task failed: {e}")))?;
                debug!(missing = missing.len(), "rows without a source file");
                self.ledger
                    .reset_flags(category, Some(&missing), keep_transformed)
                    .await?
            }
        };
        info!(changed, "reset completed");
        Ok(changed)
    }

    /// Run sync over `categories` on the category pool.
    pub async fn sync(&self, categories: &[Category]) -> Result<SyncReport> {
        let reports = self
            .fan_out(categories, |this, category| async move {
                this.sync_category(category).await
            })
            .await;
        let mut total = SyncReport::default();
        for report in reports {
            total += report;
        }
        Ok(total)
    }

    /// Run reorganize over `categories` on the category pool.
    pub async fn reorganize(&self, categories: &[Category]) -> Result<ReorganizeReport> {
        let reports = self
            .fan_out(categories, |this, category| async move {
                this.reorganize_category(category).await
            })
            .await;
        let mut total = ReorganizeReport::default();
        for report in reports {
            total += report;
        }
        Ok(total)
    }

    /// Reset `categories` one after another.
    pub async fn reset(
        &self,
        categories: &[Category],
        mode: ResetMode,
        keep_transformed: bool,
    ) -> Result<u64> {
        let mut changed = 0;
        for &category in categories {
            changed += self.reset_category(category, mode, keep_transformed).await?;
        }
        Ok(changed)
    }

    /// Run `task` per category; a failed category is logged and left out.
    async fn fan_out<T, F, Fut>(&self, categories: &[Category], task: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(Reconciler, Category) -> Fut,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.category_workers));
        let mut tasks = JoinSet::new();
        for &category in categories {
            let sem = semaphore.clone();
            let fut = task(self.clone(), category);
            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                (category, fut.await)
            });
        }

        let mut results = Vec::with_capacity(categories.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(value))) => results.push(value),
                Ok((category, Err(e))) => warn!(%category, error = %e, "category pass failed"),
                Err(e) => warn!(error = %e, "category task panicked"),
            }
        }
        results
    }
}

/// Categories whose files may sit directly in `category`'s folder.
fn reorganize_members(category: Category) -> Vec<Category> {
    Category::ALL
        .into_iter()
        .filter(|&member| {
            member == category
                || member.parent() == Some(category)
                || (category == Category::Law && member == Category::LawStatute)
        })
        .collect()
}

fn relocate(
    root: &Path,
    category: Category,
    index: &HashMap<String, (Category, DocumentRecord)>,
) -> Result<ReorganizeReport> {
    let dir = category.dir(root);
    let mut report = ReorganizeReport::default();
    if !dir.is_dir() {
        return Ok(report);
    }

    let entries = fs::read_dir(&dir).map_err(|e| LawLedgerError::io(&dir, e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() || is_hidden(&path) {
            continue;
        }
        report.scanned += 1;

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            report.skip_unmatched();
            continue;
        };
        let Some((member, record)) = index.get(stem) else {
            debug!(file = %path.display(), "no ledger title for file");
            report.skip_unmatched();
            continue;
        };

        let target_dir = classify(root, *member, record);
        if target_dir == dir {
            report.skipped += 1;
            continue;
        }
        let Some(file_name) = path.file_name() else {
            report.skip_unmatched();
            continue;
        };
        let target = target_dir.join(file_name);
        if target.exists() {
            debug!(target = %target.display(), "destination already present");
            report.skipped += 1;
            continue;
        }

        let moved = fs::create_dir_all(&target_dir).and_then(|()| fs::rename(&path, &target));
        match moved {
            Ok(()) => {
                debug!(from = %path.display(), to = %target.display(), "moved");
                report.moved += 1;
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "move failed");
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_ledger;

    fn law(id: &str, title: &str, subtype: u32) -> DocumentRecord {
        DocumentRecord {
            id: id.into(),
            title: title.into(),
            subtype: Some(subtype),
            ..Default::default()
        }
    }

    async fn reconciler(root: &Path) -> Reconciler {
        Reconciler::new(root, Arc::new(test_ledger().await), 2)
    }

    #[tokio::test]
    async fn sync_clears_flags_of_deleted_output() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = reconciler(tmp.path()).await;
        let ledger = rec.ledger.clone();

        ledger
            .upsert_records(Category::Law, &[law("a", "甲法", 160), law("b", "乙法", 160)])
            .await
            .unwrap();
        ledger
            .mark_transformed(Category::Law, &["a".into(), "b".into()])
            .await
            .unwrap();

        let dir = tmp.path().join("法律").join("刑法");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("甲法.md"), "# 甲法").unwrap();

        let report = rec.sync_category(Category::Law).await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.present, 1);
        assert_eq!(report.corrected, 1);

        let b = ledger.get_record(Category::Law, "b").await.unwrap().unwrap();
        assert!(!b.fetched && !b.transformed);
        let a = ledger.get_record(Category::Law, "a").await.unwrap().unwrap();
        assert!(a.fetched && a.transformed);
        assert_eq!(ledger.invariant_violations(Category::Law).await.unwrap(), 0);

        // Repair is idempotent.
        let again = rec.sync_category(Category::Law).await.unwrap();
        assert_eq!(again.corrected, 0);
    }

    #[tokio::test]
    async fn sync_sets_flags_when_output_appears() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = reconciler(tmp.path()).await;
        rec.ledger
            .upsert_records(Category::Constitution, &[law("c1", "宪法", 100)])
            .await
            .unwrap();
        fs::create_dir_all(tmp.path().join("宪法")).unwrap();
        fs::write(tmp.path().join("宪法").join("c1.md"), "# 宪法").unwrap();

        let report = rec.sync(&[Category::Constitution]).await.unwrap();
        assert_eq!(report.corrected, 1);
        let row = rec
            .ledger
            .get_record(Category::Constitution, "c1")
            .await
            .unwrap()
            .unwrap();
        assert!(row.fetched && row.transformed);
    }

    #[tokio::test]
    async fn reorganize_moves_known_files_only() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let rec = reconciler(root).await;
        rec.ledger
            .upsert_records(Category::Law, &[law("a", "甲法", 160)])
            .await
            .unwrap();
        rec.ledger
            .upsert_records(Category::LawInterpretation, &[law("i", "某解释", 180)])
            .await
            .unwrap();

        let law_dir = root.join("法律");
        fs::create_dir_all(&law_dir).unwrap();
        fs::write(law_dir.join("甲法.md"), "# 甲法").unwrap();
        fs::write(law_dir.join("甲法.docx"), "PK").unwrap();
        fs::write(law_dir.join("某解释.md"), "# 某解释").unwrap();
        fs::write(law_dir.join("无名.md"), "# ?").unwrap();
        fs::write(law_dir.join(".partial.tmp"), "x").unwrap();

        let report = rec.reorganize_category(Category::Law).await.unwrap();
        assert_eq!(report.scanned, 4);
        assert_eq!(report.moved, 3);
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.skipped, 1);
        assert!(law_dir.join("刑法").join("甲法.md").exists());
        assert!(law_dir.join("刑法").join("甲法.docx").exists());
        assert!(law_dir.join("法律解释").join("某解释.md").exists());
        assert!(law_dir.join("无名.md").exists());
        assert!(law_dir.join(".partial.tmp").exists());
    }

    #[tokio::test]
    async fn reorganize_never_overwrites_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let rec = reconciler(root).await;
        rec.ledger
            .upsert_records(Category::Law, &[law("a", "甲法", 160)])
            .await
            .unwrap();

        let target = root.join("法律").join("刑法");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("甲法.md"), "kept").unwrap();
        fs::write(root.join("法律").join("甲法.md"), "stray").unwrap();

        let report = rec.reorganize(&[Category::Law]).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(fs::read_to_string(target.join("甲法.md")).unwrap(), "kept");
        assert!(root.join("法律").join("甲法.md").exists());
    }

    #[tokio::test]
    async fn reset_missing_only_touches_rows_without_source() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let rec = reconciler(root).await;
        rec.ledger
            .upsert_records(Category::Law, &[law("a", "甲法", 160), law("b", "乙法", 160)])
            .await
            .unwrap();
        rec.ledger
            .mark_transformed(Category::Law, &["a".into(), "b".into()])
            .await
            .unwrap();

        let dir = root.join("法律").join("刑法");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("甲法.docx"), "PK").unwrap();

        let changed = rec
            .reset_category(Category::Law, ResetMode::Missing, false)
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let b = rec.ledger.get_record(Category::Law, "b").await.unwrap().unwrap();
        assert!(!b.fetched && !b.transformed);
        let a = rec.ledger.get_record(Category::Law, "a").await.unwrap().unwrap();
        assert!(a.fetched && a.transformed);
        assert_eq!(rec.ledger.invariant_violations(Category::Law).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn reset_all_keeping_transformed() {
        let tmp = tempfile::tempdir().unwrap();
        let rec = reconciler(tmp.path()).await;
        rec.ledger
            .upsert_records(Category::Law, &[law("a", "甲法", 160), law("b", "乙法", 160)])
            .await
            .unwrap();
        rec.ledger.mark_transformed(Category::Law, &["a".into()]).await.unwrap();
        rec.ledger.mark_fetched(Category::Law, &["b".into()]).await.unwrap();

        let changed = rec
            .reset(&[Category::Law], ResetMode::All, true)
            .await
            .unwrap();
        assert_eq!(changed, 1);
        let a = rec.ledger.get_record(Category::Law, "a").await.unwrap().unwrap();
        assert!(a.fetched && a.transformed);
        let b = rec.ledger.get_record(Category::Law, "b").await.unwrap().unwrap();
        assert!(!b.fetched);
    }

    #[test]
    fn reset_mode_parsing() {
        assert_eq!("missing".parse::<ResetMode>().unwrap(), ResetMode::Missing);
        assert_eq!("ALL".parse::<ResetMode>().unwrap(), ResetMode::All);
        assert!("some".parse::<ResetMode>().is_err());
    }

    #[test]
    fn law_members_include_subcategories() {
        let members = reorganize_members(Category::Law);
        assert!(members.contains(&Category::LawStatute));
        assert!(members.contains(&Category::LawInterpretation));
        assert!(!members.contains(&Category::Constitution));
        assert_eq!(reorganize_members(Category::Constitution), vec![Category::Constitution]);
    }
}
